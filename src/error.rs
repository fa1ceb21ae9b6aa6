// src/error.rs
//! Typed errors that cross module seams.

use thiserror::Error;

pub use crate::engine::EngineCallError;

/// A command-channel request that could not be carried out.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("{0}")]
    BadArgs(String),
    #[error("Malformed request: {0}")]
    Malformed(String),
}

impl CommandError {
    /// Error code reported back to the host.
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::BadArgs(_) | CommandError::Malformed(_) => "bad_args",
        }
    }
}
