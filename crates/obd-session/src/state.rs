//! Session Lifecycle State

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Connection lifecycle of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum SessionState {
    #[default]
    Disconnected,
    /// Transport is being opened
    Connecting,
    /// Adapter setup commands are being queued
    Initializing,
    /// Adapter is set up, pacing and polling may run
    Ready,
    /// Transport failed; reconnect with `connect`
    Failed,
}

impl SessionState {
    /// Writes are only accepted once a transport is open
    pub fn accepts_writes(&self) -> bool {
        matches!(self, SessionState::Initializing | SessionState::Ready)
    }

    pub fn can_connect(&self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Commands waiting for the pacing writer
    pub queued: usize,
    /// Received bytes not yet terminated by a prompt
    pub pending_bytes: usize,
    /// Active poller names, in poll order
    pub pollers: Vec<String>,
    pub pacing_active: bool,
    pub polling_active: bool,
    pub poll_interval: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_acceptance() {
        assert!(!SessionState::Disconnected.accepts_writes());
        assert!(!SessionState::Connecting.accepts_writes());
        assert!(SessionState::Initializing.accepts_writes());
        assert!(SessionState::Ready.accepts_writes());
        assert!(!SessionState::Failed.accepts_writes());
    }

    #[test]
    fn test_reconnect_allowed_after_failure() {
        assert!(SessionState::Failed.can_connect());
        assert!(!SessionState::Ready.can_connect());
    }
}
