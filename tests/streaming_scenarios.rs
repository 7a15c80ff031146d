// End-to-end scenarios from the streaming protocol engine's testable
// properties: window accounting, realtime overlay during streaming,
// stop-during-run soft reset timing, expression substitution, alarm
// halting the feeder, and stall recovery.

use grbl_streamer::collaborators::test_support::{
    FakeClock, FakeFileMonitor, FakeTaskRunner, RecordingTransport,
};
use grbl_streamer::collaborators::InMemoryMacroStore;
use grbl_streamer::commands::Command;
use grbl_streamer::controller::{Controller, ControllerDeps, SerialOptions};
use grbl_streamer::expression::ExprContext;
use grbl_streamer::workflow::WorkflowState;
use std::sync::Arc;

fn harness() -> (Arc<Controller>, Arc<RecordingTransport>, Arc<FakeClock>) {
    let transport = Arc::new(RecordingTransport::new_open());
    let clock = Arc::new(FakeClock::new());
    let controller = Arc::new(Controller::new(ControllerDeps {
        transport: transport.clone(),
        macro_store: Arc::new(InMemoryMacroStore::default()),
        file_monitor: Arc::new(FakeFileMonitor::default()),
        task_runner: Arc::new(FakeTaskRunner::default()),
        clock: clock.clone(),
    }));
    controller.connect(SerialOptions::default()).unwrap();
    (controller, transport, clock)
}

// ── Window accounting ──────────────────────────────────────────────────

#[tokio::test]
async fn window_accounting_admits_greedily_under_the_ceiling() {
    let (controller, transport, _clock) = harness();
    controller
        .dispatch(Command::GcodeLoad {
            name: "job".into(),
            gcode: "G0 X1\nG1 Y2\nM30\n".into(),
            context: ExprContext::new(),
        })
        .await
        .unwrap();
    controller.dispatch(Command::GcodeStart).await.unwrap();

    // All three lines (wire bytes 6+6+4=16) fit well under the default
    // ~120-byte ceiling, so a single start admits the whole program.
    let writes = transport.writes_as_strings();
    assert!(writes.iter().any(|w| w == "G0 X1\n"));
    assert!(writes.iter().any(|w| w == "G1 Y2\n"));
    assert!(writes.iter().any(|w| w == "M30\n"));
    assert_eq!(controller.sender_snapshot().sent, 3);

    controller.on_data(b"ok\nok\nok\n");
    assert_eq!(controller.sender_snapshot().received, 3);
    assert!(controller.sender_snapshot().data_length == 0);
}

// ── Realtime overlay during streaming ──────────────────────────────────

#[tokio::test]
async fn feed_hold_overlays_a_running_program_without_touching_the_sender_window() {
    let (controller, transport, _clock) = harness();
    controller
        .dispatch(Command::GcodeLoad {
            name: "job".into(),
            gcode: "G0 X1\nG0 Y1\n".into(),
            context: ExprContext::new(),
        })
        .await
        .unwrap();
    controller.dispatch(Command::GcodeStart).await.unwrap();
    let sent_before = controller.sender_snapshot().sent;

    controller.dispatch(Command::FeedHold).await.unwrap();

    assert!(transport.writes_as_strings().iter().any(|w| w == "!"));
    // The hold byte is never counted against the sender's in-flight window.
    assert_eq!(controller.sender_snapshot().sent, sent_before);
}

// ── Stop during run delays the soft reset ──────────────────────────────

#[tokio::test(start_paused = true)]
async fn stop_during_run_rewinds_immediately_and_soft_resets_after_500ms() {
    let (controller, transport, _clock) = harness();
    controller
        .dispatch(Command::GcodeLoad {
            name: "job".into(),
            gcode: "G0 X1\nG0 Y1\n".into(),
            context: ExprContext::new(),
        })
        .await
        .unwrap();
    controller.dispatch(Command::GcodeStart).await.unwrap();
    controller.on_data(b"<Run|MPos:0,0,0|WPos:0,0,0>\n");

    controller.dispatch(Command::GcodeStop).await.unwrap();
    assert_eq!(controller.workflow_state(), WorkflowState::Idle);
    assert_eq!(controller.sender_snapshot().sent, 0);
    assert!(transport.writes_as_strings().iter().any(|w| w == "!"));

    let writes_immediately_after_stop = transport.writes_as_strings().len();
    tokio::time::advance(std::time::Duration::from_millis(600)).await;
    tokio::task::yield_now().await;

    let writes_after_delay = transport.written.lock().unwrap();
    assert!(writes_after_delay.len() > writes_immediately_after_stop);
    assert_eq!(*writes_after_delay.last().unwrap(), vec![0x18]);
}

// ── Expression substitution ─────────────────────────────────────────────

#[tokio::test]
async fn inline_expressions_translate_against_bounds_and_position() {
    let (controller, transport, _clock) = harness();
    let mut context = ExprContext::new();
    context.insert("xmax".to_string(), 50.0);
    controller
        .dispatch(Command::Gcode {
            lines: vec!["G0 X[posx - 8] Y[ymax]".to_string()],
            context,
        })
        .await
        .unwrap();

    assert!(transport
        .writes_as_strings()
        .iter()
        .any(|w| w == "G0 X-8 Y0\n"));
}

// ── Alarm halts the feeder ──────────────────────────────────────────────

#[tokio::test]
async fn alarm_clears_pending_work_and_forces_workflow_idle() {
    let (controller, _transport, _clock) = harness();
    controller
        .dispatch(Command::GcodeLoad {
            name: "job".into(),
            gcode: "G0 X1\nG0 Y1\nG0 Z1\n".into(),
            context: ExprContext::new(),
        })
        .await
        .unwrap();
    controller.dispatch(Command::GcodeStart).await.unwrap();

    controller.on_data(b"ALARM:9\n");

    assert_eq!(controller.workflow_state(), WorkflowState::Idle);
    assert_eq!(controller.feeder_snapshot().pending, 0);
    assert_eq!(controller.sender_snapshot().sent, 0);
}

// ── Stall recovery ───────────────────────────────────────────────────────

#[tokio::test]
async fn no_reply_for_ten_seconds_marks_the_port_not_ready() {
    let (controller, _transport, clock) = harness();
    controller.tick();
    assert!(controller.is_ready());

    clock.advance(5_500);
    controller.tick();
    assert!(controller.is_ready(), "still within the 10s escalation window");

    clock.advance(5_000);
    controller.tick();
    assert!(!controller.is_ready());
}

#[tokio::test]
async fn replies_to_both_outstanding_queries_clear_the_stall_timer() {
    let (controller, _transport, clock) = harness();
    controller.tick();
    controller.on_data(b"<Idle|MPos:0,0,0|WPos:0,0,0>\n[GC:G0 G54 G17 G21 G90 G94]\n");

    clock.advance(20_000);
    controller.tick();
    // Both outstanding queries were answered, resetting their timers, so no
    // stall is detected even though a lot of wall-clock time has passed.
    assert!(controller.is_ready());
}
