//! Client fan-out: named event emission and the connection registry.
//!
//! The actual transport (websocket, HTTP, ...) is out of scope (§1); the
//! core only emits named events with payloads to whatever [`ConnectionSink`]
//! each client installed.

use crate::feeder::FeederSnapshot;
use crate::sender::SenderSnapshot;
use crate::state::MachineState;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// One upward event emission (§6). `Serialize` so an embedder can forward
/// the payload as JSON without the core knowing about any wire format.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum Event {
    SerialportOpen {
        port: String,
        baudrate: u32,
        controller_type: String,
        inuse: bool,
    },
    SerialportClose {
        port: String,
        inuse: bool,
    },
    SerialportError {
        err: String,
        port: String,
    },
    SerialportWrite(String),
    SerialportRead(String),
    ControllerState(MachineState),
    FeederStatus(FeederSnapshot),
    SenderStatus(SenderSnapshot),
}

/// Receives named events for one client. Implemented by the embedding
/// application's transport adapter (websocket session, test probe, ...).
pub trait ConnectionSink: Send + Sync {
    fn send(&self, event: Event);
}

/// Mapping from client identifier to its sink. Insertion order is
/// irrelevant (§3).
#[derive(Default)]
pub struct ConnectionRegistry {
    sinks: HashMap<String, Arc<dyn ConnectionSink>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `sink` under `client_id`. Immediately replays the current
    /// machine state snapshot, and the sender status if a program is
    /// loaded, to the newly attached client (§3).
    pub fn add_connection(
        &mut self,
        client_id: impl Into<String>,
        sink: Arc<dyn ConnectionSink>,
        machine_state: &MachineState,
        sender_status: Option<&SenderSnapshot>,
    ) {
        sink.send(Event::ControllerState(machine_state.clone()));
        if let Some(status) = sender_status {
            sink.send(Event::SenderStatus(status.clone()));
        }
        self.sinks.insert(client_id.into(), sink);
    }

    pub fn remove_connection(&mut self, client_id: &str) {
        self.sinks.remove(client_id);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Sends `event` to every registered client.
    pub fn broadcast(&self, event: Event) {
        for sink in self.sinks.values() {
            sink.send(event.clone());
        }
    }

    /// Drops every connection (§5, on port close).
    pub fn clear(&mut self) {
        self.sinks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<Event>>,
    }

    impl ConnectionSink for RecordingSink {
        fn send(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn add_connection_replays_current_state() {
        let mut registry = ConnectionRegistry::new();
        let sink = Arc::new(RecordingSink::default());
        let state = MachineState::default();
        let sender_status = SenderSnapshot {
            name: "job".into(),
            total: 3,
            ..Default::default()
        };
        registry.add_connection(
            "client-1",
            sink.clone(),
            &state,
            Some(&sender_status),
        );
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::ControllerState(_)));
        assert!(matches!(events[1], Event::SenderStatus(_)));
    }

    #[test]
    fn add_connection_skips_sender_status_when_none() {
        let mut registry = ConnectionRegistry::new();
        let sink = Arc::new(RecordingSink::default());
        registry.add_connection("client-1", sink.clone(), &MachineState::default(), None);
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn broadcast_reaches_every_connection() {
        let mut registry = ConnectionRegistry::new();
        let a = Arc::new(RecordingSink::default());
        let b = Arc::new(RecordingSink::default());
        registry.add_connection("a", a.clone(), &MachineState::default(), None);
        registry.add_connection("b", b.clone(), &MachineState::default(), None);

        registry.broadcast(Event::SerialportWrite("?".to_string()));

        assert_eq!(a.events.lock().unwrap().len(), 2);
        assert_eq!(b.events.lock().unwrap().len(), 2);
    }

    #[test]
    fn remove_connection_stops_future_broadcasts() {
        let mut registry = ConnectionRegistry::new();
        let a = Arc::new(RecordingSink::default());
        registry.add_connection("a", a.clone(), &MachineState::default(), None);
        registry.remove_connection("a");
        registry.broadcast(Event::SerialportWrite("?".to_string()));
        assert_eq!(a.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn clear_empties_the_registry() {
        let mut registry = ConnectionRegistry::new();
        let a = Arc::new(RecordingSink::default());
        registry.add_connection("a", a, &MachineState::default(), None);
        registry.clear();
        assert!(registry.is_empty());
    }
}
