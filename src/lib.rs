//! Grbl/grblHAL streaming protocol engine.
//!
//! A transport-agnostic core: line parsing, flow-controlled streaming, and
//! workflow state for driving a Grbl-family CNC/laser controller over its
//! ASCII serial protocol. Serial I/O, client fan-out, macro storage, file
//! monitoring and task execution are injected as trait objects (see
//! [`collaborators`]) so [`controller::Controller`] is unit-testable without
//! hardware.

pub mod collaborators;
pub mod commands;
pub mod connections;
pub mod controller;
pub mod error;
pub mod event_trigger;
pub mod expression;
pub mod feeder;
pub mod parser;
pub mod sender;
pub mod state;
pub mod workflow;

pub use commands::Command;
pub use controller::{Controller, ControllerDeps, SerialOptions};
pub use error::GrblError;
