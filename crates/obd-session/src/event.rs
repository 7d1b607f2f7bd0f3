//! Observer Events

use crate::state::SessionState;
use obd_protocol::{ObdError, Reading};
use tokio::sync::mpsc;

/// Everything a session reports to its observer, in the order it happens
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// Adapter setup is queued and the session is ready
    Connected,
    DataReceived(Reading),
    /// Non-fatal and fatal errors alike; operations never return them
    Error(ObdError),
    Debug(String),
}

/// Receiving end of a session's event stream
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;
