//! OBD-II Error Types

use thiserror::Error;

/// Errors that can occur during an adapter session
///
/// None of these cross the public session operations; they are reported to
/// observers as events.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ObdError {
    /// Write attempted while the session does not accept writes
    #[error("OBD-II adapter is not connected")]
    NotConnected,

    /// Command queue is full, the command was dropped
    #[error("Command queue overflow (capacity {capacity})")]
    QueueOverflow { capacity: usize },

    /// Writing to the transport failed
    #[error("Transport write failed: {0}")]
    TransportWrite(String),

    /// Opening the transport failed
    #[error("Transport connect failed: {0}")]
    TransportConnect(String),

    /// Transport closed or failed while reading
    #[error("Transport read failed: {0}")]
    TransportRead(String),

    /// Reply could not be decoded, the raw content is still emitted
    #[error("Unrecognized reply: {0}")]
    UnrecognizedReply(String),

    /// Parameter name not present in the catalog
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    /// Operation rejected for the current session state
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },
}
