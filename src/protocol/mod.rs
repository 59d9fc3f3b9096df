pub mod classify;
pub mod frame;
pub mod parser;
pub mod types;
pub mod validate;

pub use classify::{DeviceClassifier, MarkerClassifier};
pub use frame::{command, Frame, FRAME_LEN};
pub use parser::{AddressPolicy, Payload};
pub use types::*;

use crate::config::ConfigError;
use crate::serial::SerialError;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("{field} must be an integer in {min}..={max}, got '{value}'")]
    Validation {
        field: String,
        value: String,
        min: u8,
        max: u8,
    },

    #[error("Malformed response '{line}': {reason}")]
    MalformedResponse { line: String, reason: String },

    #[error("No response to {kind} before timeout")]
    Timeout { kind: RequestKind },

    #[error("Transport error: {0}")]
    Transport(#[from] SerialError),

    #[error("Storage error: {0}")]
    Storage(#[from] ConfigError),

    #[error("A bus scan is already in progress")]
    ScanInProgress,

    #[error("An address write sequence is already in progress")]
    SequenceInProgress,

    #[error("Configurator engine stopped")]
    EngineStopped,
}

impl ProtocolError {
    pub(crate) fn malformed(line: impl Into<String>, reason: impl Into<String>) -> Self {
        ProtocolError::MalformedResponse {
            line: line.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
