//! Maps named lifecycle events to configured command lists.
//!
//! `trigger(event)` looks up the configured `(kind, commands)` pair. When
//! `kind` is [`TriggerKind::System`] the commands string is handed to the
//! external task runner; otherwise it is split into lines and fed to the
//! controller as G-code. Missing triggers are silently ignored (§4.5).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Named lifecycle event. `Custom` covers any string key not named here —
/// configuration is free to bind triggers to events this core doesn't itself
/// fire, for forward compatibility with future controller features.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerEvent {
    GcodeStart,
    GcodeStop,
    GcodePause,
    GcodeResume,
    Homing,
    Unlock,
    FeedHold,
    CycleStart,
    ProbeStart,
    ProbeEnd,
    Custom(String),
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerEvent::GcodeStart => "gcode:start",
            TriggerEvent::GcodeStop => "gcode:stop",
            TriggerEvent::GcodePause => "gcode:pause",
            TriggerEvent::GcodeResume => "gcode:resume",
            TriggerEvent::Homing => "homing",
            TriggerEvent::Unlock => "unlock",
            TriggerEvent::FeedHold => "feedhold",
            TriggerEvent::CycleStart => "cyclestart",
            TriggerEvent::ProbeStart => "probe:start",
            TriggerEvent::ProbeEnd => "probe:end",
            TriggerEvent::Custom(s) => s,
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerKind {
    System,
    Gcode,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerBinding {
    pub kind: TriggerKind,
    pub commands: String,
}

/// What the controller must do after firing a trigger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerAction {
    RunSystemCommand(String),
    FeedGcode(Vec<String>),
}

/// Configured event -> command-list bindings.
#[derive(Debug, Default)]
pub struct EventTrigger {
    bindings: HashMap<TriggerEvent, TriggerBinding>,
}

impl EventTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, event: TriggerEvent, binding: TriggerBinding) {
        self.bindings.insert(event, binding);
    }

    /// Looks up `event`'s binding and returns the action the controller
    /// should take. Returns `None` when no trigger is configured for this
    /// event — a no-op, not an error.
    pub fn trigger(&self, event: &TriggerEvent) -> Option<TriggerAction> {
        let binding = self.bindings.get(event)?;
        match binding.kind {
            TriggerKind::System => Some(TriggerAction::RunSystemCommand(binding.commands.clone())),
            TriggerKind::Gcode => {
                let lines: Vec<String> = binding
                    .commands
                    .split('\n')
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect();
                Some(TriggerAction::FeedGcode(lines))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_trigger_is_ignored() {
        let t = EventTrigger::new();
        assert_eq!(t.trigger(&TriggerEvent::Homing), None);
    }

    #[test]
    fn system_trigger_runs_external_command() {
        let mut t = EventTrigger::new();
        t.bind(
            TriggerEvent::GcodeStart,
            TriggerBinding {
                kind: TriggerKind::System,
                commands: "notify-send starting".to_string(),
            },
        );
        assert_eq!(
            t.trigger(&TriggerEvent::GcodeStart),
            Some(TriggerAction::RunSystemCommand(
                "notify-send starting".to_string()
            ))
        );
    }

    #[test]
    fn gcode_trigger_splits_into_lines() {
        let mut t = EventTrigger::new();
        t.bind(
            TriggerEvent::Homing,
            TriggerBinding {
                kind: TriggerKind::Gcode,
                commands: "G0 Z5\n\nG0 X0 Y0\n".to_string(),
            },
        );
        assert_eq!(
            t.trigger(&TriggerEvent::Homing),
            Some(TriggerAction::FeedGcode(vec![
                "G0 Z5".to_string(),
                "G0 X0 Y0".to_string()
            ]))
        );
    }

    #[test]
    fn custom_event_key_round_trips() {
        let mut t = EventTrigger::new();
        let event = TriggerEvent::Custom("tool:change".to_string());
        t.bind(
            event.clone(),
            TriggerBinding {
                kind: TriggerKind::Gcode,
                commands: "M6".to_string(),
            },
        );
        assert!(t.trigger(&event).is_some());
        assert_eq!(event.to_string(), "tool:change");
    }
}
