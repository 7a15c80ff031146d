//! Three-state gate over the Sender: {Idle, Paused, Running}.
//!
//! Transitions from a disallowed source state are silently ignored — see
//! §4.3. `start`/`stop` drive the Sender to rewind; `resume` advances it one
//! line; only `Running` lets the Sender consume acknowledgements into
//! forward progress. The controller owns that wiring; this module is only
//! the state machine itself.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowState {
    #[default]
    Idle,
    Paused,
    Running,
}

/// Side effect the caller must perform after a transition actually occurs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkflowEffect {
    RewindSender,
    AdvanceSenderOneLine,
    None,
}

/// Event emitted on a successful transition (`start`/`pause`/`resume`/`stop`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkflowEvent {
    Start,
    Pause,
    Resume,
    Stop,
}

#[derive(Debug, Default)]
pub struct Workflow {
    state: WorkflowState,
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn start(&mut self) -> Option<(WorkflowEvent, WorkflowEffect)> {
        if self.state == WorkflowState::Idle {
            self.state = WorkflowState::Running;
            Some((WorkflowEvent::Start, WorkflowEffect::RewindSender))
        } else {
            None
        }
    }

    pub fn pause(&mut self) -> Option<(WorkflowEvent, WorkflowEffect)> {
        if self.state == WorkflowState::Running {
            self.state = WorkflowState::Paused;
            Some((WorkflowEvent::Pause, WorkflowEffect::None))
        } else {
            None
        }
    }

    pub fn resume(&mut self) -> Option<(WorkflowEvent, WorkflowEffect)> {
        if self.state == WorkflowState::Paused {
            self.state = WorkflowState::Running;
            Some((WorkflowEvent::Resume, WorkflowEffect::AdvanceSenderOneLine))
        } else {
            None
        }
    }

    pub fn stop(&mut self) -> Option<(WorkflowEvent, WorkflowEffect)> {
        if self.state == WorkflowState::Idle {
            None
        } else {
            self.state = WorkflowState::Idle;
            Some((WorkflowEvent::Stop, WorkflowEffect::RewindSender))
        }
    }
}
