//! Crate-wide error types.
//!
//! Per-module parsers keep their own narrow error enum (see
//! [`crate::parser::ParseError`]); this module holds the error surface for
//! the controller itself — collaborator failures and command dispatch.

use thiserror::Error;

/// Errors the controller can surface to its caller. Bad data from the wire
/// never reaches this type — see §7: only programmer-contract violations
/// and collaborator failures are errors here.
#[derive(Debug, Error)]
pub enum GrblError {
    #[error("serial transport error: {0}")]
    Transport(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("macro not found: {0}")]
    MacroNotFound(String),

    #[error("file read failed: {0}")]
    FileRead(String),

    #[error("task runner failed: {0}")]
    TaskRunner(String),

    #[error("wrote to a closed port")]
    NotOpen,

    #[error("port already open")]
    AlreadyOpen,
}
