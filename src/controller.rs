//! The orchestrator: owns the parser, feeder, sender, workflow and event
//! trigger table, and drives them from incoming serial data, a periodic
//! poller tick, and inbound client commands (§4.6).
//!
//! Shared state lives behind `Mutex`es rather than actor-style message
//! passing, matching the teacher's controller: callers are expected to hold
//! an `Arc<Controller>` and call methods directly from whatever async
//! context they run in (a websocket handler, the poller task, a test).

use crate::collaborators::{Clock, FileMonitor, MacroStore, SerialTransport, TaskRunner};
use crate::commands::{Command, OverrideAdjust, RapidOverride};
use crate::connections::{ConnectionRegistry, ConnectionSink, Event};
use crate::error::GrblError;
use crate::event_trigger::{EventTrigger, TriggerAction, TriggerEvent};
use crate::expression::{self, ExprContext};
use crate::feeder::{Feeder, FeederSnapshot};
use crate::parser::{LineParser, ParsedMessage};
use crate::sender::{Sender, SenderSnapshot};
use crate::state::{ActiveState, MachineState};
use crate::workflow::{Workflow, WorkflowEffect, WorkflowState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Serial port identification, supplied at `connect` time. The actual open
/// call is the embedder's job (§1 Non-goals); the controller only needs to
/// know what to put in the `serialport:open` event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerialOptions {
    pub port: String,
    pub baudrate: u32,
}

impl Default for SerialOptions {
    fn default() -> Self {
        Self {
            port: String::new(),
            baudrate: 115200,
        }
    }
}

/// Firmware bytes that must never be queued behind a newline (§4.6): `?`
/// status query, `~` cycle start, `!` feed hold, ctrl-X soft reset, and the
/// 0x84-0x9d override/jog extension range.
const REALTIME_BYTES: &[u8] = &[
    b'?', b'~', b'!', 0x18, 0x84, 0x85, 0x90, 0x91, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97, 0x99, 0x9a,
    0x9b, 0x9c, 0x9d,
];

fn is_realtime_byte(b: u8) -> bool {
    REALTIME_BYTES.contains(&b)
}

/// Tracks outstanding status/parser-state queries so the poller can detect
/// a firmware that has stopped answering (§4.6 stall recovery), and the
/// two-phase parser-state handshake so a trailing `ok` that only answers a
/// `$G` never reaches the sender.
#[derive(Debug, Default)]
struct ActionFlags {
    reply_status_report: bool,
    reply_parser_state: bool,
    /// `$G` sent, awaiting the parser-state reply line.
    query_parser_state_state: bool,
    /// Parser-state line received, awaiting the trailing `ok` that closes
    /// out the query — that `ok` must not be routed to the sender/feeder.
    query_parser_state_reply: bool,
    action_time_query_status_report: Option<u64>,
    action_time_query_parser_state: Option<u64>,
    /// Last time a `$G` poll was actually issued, independent of the flags
    /// above, to enforce the ≥500ms throttle between issues.
    last_parser_state_poll_ms: Option<u64>,
}

/// The collaborators a [`Controller`] is built from. Bundled into one
/// struct so construction reads as one call instead of five positional
/// `Arc`s (§9 "Global singletons" — these are the antidote).
pub struct ControllerDeps {
    pub transport: Arc<dyn SerialTransport>,
    pub macro_store: Arc<dyn MacroStore>,
    pub file_monitor: Arc<dyn FileMonitor>,
    pub task_runner: Arc<dyn TaskRunner>,
    pub clock: Arc<dyn Clock>,
}

pub struct Controller {
    transport: Arc<dyn SerialTransport>,
    macro_store: Arc<dyn MacroStore>,
    file_monitor: Arc<dyn FileMonitor>,
    task_runner: Arc<dyn TaskRunner>,
    clock: Arc<dyn Clock>,

    parser: Mutex<LineParser>,
    feeder: Mutex<Feeder>,
    sender: Mutex<Sender>,
    workflow: Mutex<Workflow>,
    event_trigger: Mutex<EventTrigger>,
    connections: Mutex<ConnectionRegistry>,
    action_flags: Mutex<ActionFlags>,

    serial_options: Mutex<SerialOptions>,
    ready: AtomicBool,
    alarm_active: AtomicBool,
    last_broadcast_state: Mutex<Option<MachineState>>,
}

impl Controller {
    pub fn new(deps: ControllerDeps) -> Self {
        Self {
            transport: deps.transport,
            macro_store: deps.macro_store,
            file_monitor: deps.file_monitor,
            task_runner: deps.task_runner,
            clock: deps.clock,
            parser: Mutex::new(LineParser::new()),
            feeder: Mutex::new(Feeder::new()),
            sender: Mutex::new(Sender::new()),
            workflow: Mutex::new(Workflow::new()),
            event_trigger: Mutex::new(EventTrigger::new()),
            connections: Mutex::new(ConnectionRegistry::new()),
            action_flags: Mutex::new(ActionFlags::default()),
            serial_options: Mutex::new(SerialOptions::default()),
            ready: AtomicBool::new(false),
            alarm_active: AtomicBool::new(false),
            last_broadcast_state: Mutex::new(None),
        }
    }

    pub fn bind_trigger(&self, event: TriggerEvent, binding: crate::event_trigger::TriggerBinding) {
        self.event_trigger.lock().unwrap().bind(event, binding);
    }

    // -- connection lifecycle (§5) ------------------------------------

    pub fn add_connection(&self, client_id: impl Into<String>, sink: Arc<dyn ConnectionSink>) {
        let machine_state = self.parser.lock().unwrap().state.clone();
        let sender_snapshot = {
            let sender = self.sender.lock().unwrap();
            sender.is_loaded().then(|| sender.snapshot())
        };
        self.connections.lock().unwrap().add_connection(
            client_id,
            sink,
            &machine_state,
            sender_snapshot.as_ref(),
        );
    }

    pub fn remove_connection(&self, client_id: &str) {
        self.connections.lock().unwrap().remove_connection(client_id);
    }

    /// Marks the port open and announces it to every client (§5).
    pub fn connect(&self, options: SerialOptions) -> Result<(), GrblError> {
        if self.ready.load(Ordering::SeqCst) {
            return Err(GrblError::AlreadyOpen);
        }
        if !self.transport.is_open() {
            return Err(GrblError::NotOpen);
        }
        self.ready.store(true, Ordering::SeqCst);
        self.alarm_active.store(false, Ordering::SeqCst);
        *self.serial_options.lock().unwrap() = options.clone();
        self.connections.lock().unwrap().broadcast(Event::SerialportOpen {
            port: options.port,
            baudrate: options.baudrate,
            controller_type: "grbl".to_string(),
            inuse: true,
        });
        Ok(())
    }

    /// Tears down in-flight work and drops every connection (§5).
    pub fn disconnect(&self) {
        let port = self.serial_options.lock().unwrap().port.clone();
        self.ready.store(false, Ordering::SeqCst);
        self.feeder.lock().unwrap().clear();
        self.sender.lock().unwrap().unload();
        self.workflow.lock().unwrap().stop();
        let mut connections = self.connections.lock().unwrap();
        connections.broadcast(Event::SerialportClose { port, inuse: false });
        connections.clear();
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Spawns a task that pulls byte chunks off `rx` and feeds them to
    /// [`Controller::on_data`] until the channel closes. The embedder owns
    /// the actual serial read loop and only hands bytes across this channel
    /// (§6) — the core never polls a transport directly.
    pub fn spawn_reader(
        self: &Arc<Self>,
        mut rx: tokio::sync::mpsc::Receiver<Vec<u8>>,
    ) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                this.on_data(&chunk);
            }
        })
    }

    /// Spawns the periodic poller at the given cadence (250ms in production,
    /// per §4.6). Runs until the returned handle is aborted.
    pub fn spawn_poller(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.tick();
            }
        })
    }

    // -- snapshots ------------------------------------------------------

    pub fn machine_state(&self) -> MachineState {
        self.parser.lock().unwrap().state.clone()
    }

    pub fn feeder_snapshot(&self) -> FeederSnapshot {
        self.feeder.lock().unwrap().snapshot()
    }

    pub fn sender_snapshot(&self) -> SenderSnapshot {
        self.sender.lock().unwrap().snapshot()
    }

    pub fn workflow_state(&self) -> WorkflowState {
        self.workflow.lock().unwrap().state()
    }

    // -- low-level writes (§4.6) ----------------------------------------

    /// Writes raw bytes, broadcasting a `serialport:write` event and
    /// flagging an outstanding query when `data` is exactly `?`. The
    /// corresponding `$G` bookkeeping lives in
    /// [`Self::poll_status_and_parser_state`], the only caller that ever
    /// issues one, since it also needs to apply the ≥500ms throttle before
    /// deciding whether to write at all.
    /// Operates on bytes rather than `&str` because several realtime
    /// command bytes are not valid standalone UTF-8.
    fn write(&self, data: &[u8]) -> Result<(), GrblError> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(GrblError::NotOpen);
        }
        self.transport
            .write(data)
            .map_err(|e| GrblError::Transport(e.to_string()))?;
        self.connections
            .lock()
            .unwrap()
            .broadcast(Event::SerialportWrite(String::from_utf8_lossy(data).into_owned()));

        if data == b"?" {
            let mut flags = self.action_flags.lock().unwrap();
            flags.reply_status_report = true;
            flags.action_time_query_status_report = Some(self.clock.now_ms());
        }
        Ok(())
    }

    /// Writes a line of text. A single realtime byte is sent as-is, with no
    /// trailing newline; everything else gets `\n` appended.
    fn writeln(&self, data: &[u8]) -> Result<(), GrblError> {
        if data.len() == 1 && is_realtime_byte(data[0]) {
            self.write(data)
        } else {
            let mut buf = data.to_vec();
            buf.push(b'\n');
            self.write(&buf)
        }
    }

    fn writeln_str(&self, line: &str) -> Result<(), GrblError> {
        self.writeln(line.as_bytes())
    }

    // -- incoming data (§4.1, §4.6) ---------------------------------------

    /// Feeds a chunk of bytes read from the serial port. Classifies every
    /// complete line, updates machine state, forwards the raw line to every
    /// client, then routes the classification into whatever side effect it
    /// implies (ack a sent line, halt on alarm, grow the buffer window...).
    pub fn on_data(&self, bytes: &[u8]) {
        let lines = self.parser.lock().unwrap().feed(bytes);
        for (raw, msg) in lines {
            self.connections
                .lock()
                .unwrap()
                .broadcast(Event::SerialportRead(raw));
            self.route_ack(msg);
        }
        self.try_feed_sender();
    }

    fn route_ack(&self, msg: ParsedMessage) {
        match msg {
            ParsedMessage::Ok => {
                let mut flags = self.action_flags.lock().unwrap();
                if flags.query_parser_state_reply {
                    flags.query_parser_state_reply = false;
                    flags.reply_parser_state = false;
                    return;
                }
                drop(flags);
                self.consume_ack();
            }
            ParsedMessage::Error { code, message } => {
                warn!(?code, %message, "grbl reported an error");
                self.consume_ack();
            }
            ParsedMessage::Alarm { code, message } => {
                warn!(?code, %message, "grbl alarm, halting feeder");
                self.alarm_active.store(true, Ordering::SeqCst);
                self.feeder.lock().unwrap().clear();
                self.workflow.lock().unwrap().stop();
                self.sender.lock().unwrap().rewind();
            }
            ParsedMessage::Status(_) => {
                let mut flags = self.action_flags.lock().unwrap();
                flags.reply_status_report = false;
                flags.action_time_query_status_report = None;
                drop(flags);
                let workflow_idle = self.workflow_state() == WorkflowState::Idle;
                if let Some(buf) = self.machine_state().buf {
                    self.sender.lock().unwrap().grow_buffer_size(buf.rx, workflow_idle);
                }
            }
            ParsedMessage::ParserState(_) => {
                let mut flags = self.action_flags.lock().unwrap();
                flags.query_parser_state_state = false;
                flags.query_parser_state_reply = true;
                flags.action_time_query_parser_state = None;
                flags.reply_parser_state = false;
            }
            ParsedMessage::Startup(banner) => {
                info!(%banner, "grbl restarted");
                self.alarm_active.store(false, Ordering::SeqCst);
                self.feeder.lock().unwrap().clear();
                self.sender.lock().unwrap().unload();
                self.workflow.lock().unwrap().stop();
            }
            ParsedMessage::Settings { .. }
            | ParsedMessage::Parameters { .. }
            | ParsedMessage::Feedback(_)
            | ParsedMessage::Other(_) => {}
        }
    }

    /// Consumes one `ok`/`error` acknowledgement (§4.3: only while RUNNING
    /// does the Sender consume acknowledgements into forward progress).
    /// Outside RUNNING, the acknowledgement instead pumps exactly one
    /// ad-hoc feeder line (§4.6 ack routing's non-running branch).
    fn consume_ack(&self) {
        if self.workflow_state() == WorkflowState::Running {
            self.sender.lock().unwrap().ack();
            self.try_feed_sender();
        } else {
            self.pump_feeder();
        }
    }

    /// Writes every line the sender currently admits, if the workflow is
    /// running. Does not touch the feeder — feeder lines are pumped one at
    /// a time, paced by acknowledgements (see [`Self::pump_feeder`]).
    fn try_feed_sender(&self) {
        if self.workflow_state() == WorkflowState::Running {
            let emitted = self.sender.lock().unwrap().next();
            let context = self.sender.lock().unwrap().context().clone();
            for line in emitted {
                let position = self.machine_state().work_position;
                let translated = expression::translate(&line, &context, &position);
                let _ = self.writeln_str(&translated);
            }
            if self.sender.lock().unwrap().is_done() {
                self.workflow.lock().unwrap().stop();
            }
        }
    }

    /// Pumps exactly one ad-hoc feeder line (§4.2: `next()` is pull-driven;
    /// §4.6 pumps exactly one `feeder.next()` per incoming acknowledgement,
    /// never a drain of the whole queue). No-op when the feeder is empty.
    fn pump_feeder(&self) {
        if let Some((line, context)) = self.feeder.lock().unwrap().next() {
            let position = self.machine_state().work_position;
            let translated = expression::translate(&line, &context, &position);
            let _ = self.writeln_str(&translated);
        }
    }

    // -- periodic poller tick (§4.6, 250ms cadence) -----------------------

    /// One poller tick: emits status snapshots to clients, polls the
    /// firmware for status/parser state (throttled to 500ms), and detects a
    /// stalled port (no reply within 5s, escalating at 10s). Deterministic
    /// given a fake clock, so it is driven directly in tests rather than
    /// through a real `tokio::time::interval`.
    pub fn tick(&self) {
        if !self.ready.load(Ordering::SeqCst) {
            return;
        }

        self.connections
            .lock()
            .unwrap()
            .broadcast(Event::FeederStatus(self.feeder_snapshot()));
        if self.sender.lock().unwrap().is_loaded() {
            self.connections
                .lock()
                .unwrap()
                .broadcast(Event::SenderStatus(self.sender_snapshot()));
        }

        let state = self.machine_state();
        let mut last = self.last_broadcast_state.lock().unwrap();
        if last.as_ref() != Some(&state) {
            self.connections
                .lock()
                .unwrap()
                .broadcast(Event::ControllerState(state.clone()));
            *last = Some(state);
        }
        drop(last);

        self.poll_status_and_parser_state();
        self.check_stall();
    }

    fn poll_status_and_parser_state(&self) {
        let now = self.clock.now_ms();
        let mut flags = self.action_flags.lock().unwrap();
        let status_due = !flags.reply_status_report;
        let parser_due = !flags.reply_parser_state
            && !flags.query_parser_state_state
            && match flags.last_parser_state_poll_ms {
                Some(last) => now.saturating_sub(last) >= 500,
                None => true,
            };
        if parser_due {
            flags.query_parser_state_state = true;
            flags.action_time_query_parser_state = Some(now);
            flags.last_parser_state_poll_ms = Some(now);
        }
        drop(flags);

        if status_due {
            let _ = self.write(b"?");
        }
        if parser_due {
            let _ = self.writeln_str("$G");
        }
    }

    /// Warns at 5s without a reply, escalates to marking the port not ready
    /// at 10s (§4.6 stall recovery).
    fn check_stall(&self) {
        let now = self.clock.now_ms();
        let flags = self.action_flags.lock().unwrap();
        let oldest = [
            flags.action_time_query_status_report,
            flags.action_time_query_parser_state,
        ]
        .into_iter()
        .flatten()
        .min();
        drop(flags);

        let Some(since) = oldest else { return };
        let elapsed = now.saturating_sub(since);
        if elapsed >= 10_000 {
            warn!(elapsed, "serial port stalled, marking not ready");
            self.ready.store(false, Ordering::SeqCst);
            self.connections.lock().unwrap().broadcast(Event::SerialportError {
                err: "no response from controller".to_string(),
                port: self.serial_options.lock().unwrap().port.clone(),
            });
        } else if elapsed >= 5_000 {
            warn!(elapsed, "no response from controller in 5s");
        }
    }

    // -- event triggers (§4.5) -------------------------------------------

    async fn fire(&self, event: TriggerEvent) {
        let action = self.event_trigger.lock().unwrap().trigger(&event);
        match action {
            Some(TriggerAction::RunSystemCommand(command)) => {
                if let Err(err) = self.task_runner.run(&command).await {
                    warn!(%event, %err, "trigger task failed");
                }
            }
            Some(TriggerAction::FeedGcode(lines)) => {
                self.feeder.lock().unwrap().feed(lines, ExprContext::new());
                self.pump_feeder();
            }
            None => {}
        }
    }

    // -- command dispatch (§4.6) -----------------------------------------

    /// Takes `self` as an `Arc` because a handful of commands (`gcode:stop`'s
    /// delayed soft reset, `lasertest:on`'s auto-off) need to schedule work
    /// on the runtime that outlives this call.
    pub async fn dispatch(self: &Arc<Self>, command: Command) -> Result<(), GrblError> {
        match command {
            Command::Gcode { lines, context } => {
                self.feeder.lock().unwrap().feed(lines, context);
                self.pump_feeder();
            }
            Command::GcodeLoad { name, gcode, context } => {
                self.sender.lock().unwrap().load(name, &gcode, context);
            }
            Command::GcodeUnload => {
                self.sender.lock().unwrap().unload();
            }
            Command::GcodeStart | Command::Start => {
                self.fire(TriggerEvent::GcodeStart).await;
                if let Some((_, WorkflowEffect::RewindSender)) = self.workflow.lock().unwrap().start() {
                    self.sender.lock().unwrap().rewind();
                }
                // Ad-hoc must not interleave with the program that's starting.
                self.feeder.lock().unwrap().clear();
                self.try_feed_sender();
            }
            Command::GcodeStop | Command::Stop => {
                self.fire(TriggerEvent::GcodeStop).await;
                if let Some((_, WorkflowEffect::RewindSender)) = self.workflow.lock().unwrap().stop() {
                    self.sender.lock().unwrap().rewind();
                }
                if self.machine_state().active_state == ActiveState::Run {
                    self.writeln(&[b'!'])?;
                    let this = Arc::clone(self);
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        let _ = this.write(&[0x18]);
                    });
                }
            }
            Command::GcodePause | Command::Pause => {
                self.fire(TriggerEvent::GcodePause).await;
                self.workflow.lock().unwrap().pause();
                self.writeln(&[b'!'])?;
            }
            Command::GcodeResume | Command::Resume => {
                self.fire(TriggerEvent::GcodeResume).await;
                self.workflow.lock().unwrap().resume();
                self.writeln(&[b'~'])?;
                self.try_feed_sender();
            }
            Command::FeedHold => {
                self.fire(TriggerEvent::FeedHold).await;
                self.writeln(&[b'!'])?;
            }
            Command::CycleStart => {
                self.fire(TriggerEvent::CycleStart).await;
                self.writeln(&[b'~'])?;
            }
            Command::StatusReport => {
                self.write(b"?")?;
            }
            Command::Homing => {
                self.fire(TriggerEvent::Homing).await;
                self.writeln_str("$H")?;
            }
            Command::Sleep => {
                self.writeln_str("$SLP")?;
            }
            Command::Unlock => {
                self.fire(TriggerEvent::Unlock).await;
                self.alarm_active.store(false, Ordering::SeqCst);
                self.writeln_str("$X")?;
            }
            Command::Reset => {
                self.write(&[0x18])?;
            }
            Command::FeedOverride(adjust) => self.writeln(&[realtime_byte_for_feed(adjust)])?,
            Command::SpindleOverride(adjust) => self.writeln(&[realtime_byte_for_spindle(adjust)])?,
            Command::RapidOverride(value) => self.writeln(&[realtime_byte_for_rapid(value)])?,
            Command::LaserTestOn { power, duration_ms } => {
                self.writeln_str(&format!("M3 S{power}"))?;
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(duration_ms)).await;
                    let _ = this.writeln_str("M5");
                });
            }
            Command::LaserTestOff => {
                self.writeln_str("M5")?;
            }
            Command::MacroRun { id, context } => {
                let macro_def = self
                    .macro_store
                    .find(&id)
                    .ok_or_else(|| GrblError::MacroNotFound(id.clone()))?;
                let lines: Vec<String> = macro_def
                    .content
                    .split('\n')
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect();
                self.feeder.lock().unwrap().feed(lines, context);
                self.pump_feeder();
            }
            Command::MacroLoad { id, context } => {
                let macro_def = self
                    .macro_store
                    .find(&id)
                    .ok_or_else(|| GrblError::MacroNotFound(id.clone()))?;
                self.sender
                    .lock()
                    .unwrap()
                    .load(macro_def.name, &macro_def.content, context);
            }
            Command::WatchdirLoad { file } => {
                let content = self
                    .file_monitor
                    .read_file(&file)
                    .await
                    .map_err(|e| GrblError::FileRead(e.to_string()))?;
                self.sender.lock().unwrap().load(file, &content, ExprContext::new());
            }
        }
        Ok(())
    }
}

fn realtime_byte_for_feed(adjust: OverrideAdjust) -> u8 {
    match adjust {
        OverrideAdjust::Reset => 0x90,
        OverrideAdjust::CoarsePlus => 0x91,
        OverrideAdjust::CoarseMinus => 0x92,
        OverrideAdjust::FinePlus => 0x93,
        OverrideAdjust::FineMinus => 0x94,
    }
}

fn realtime_byte_for_spindle(adjust: OverrideAdjust) -> u8 {
    match adjust {
        OverrideAdjust::Reset => 0x99,
        OverrideAdjust::CoarsePlus => 0x9a,
        OverrideAdjust::CoarseMinus => 0x9b,
        OverrideAdjust::FinePlus => 0x9c,
        OverrideAdjust::FineMinus => 0x9d,
    }
}

fn realtime_byte_for_rapid(value: RapidOverride) -> u8 {
    match value {
        RapidOverride::Full => 0x95,
        RapidOverride::Half => 0x96,
        RapidOverride::Quarter => 0x97,
    }
}
