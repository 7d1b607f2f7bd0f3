//! ELM327 Session Engine
//!
//! Owns one adapter connection: connect, adapter initialization, paced
//! command writes, reply framing and periodic polling all run on a single
//! task. Callers talk to it through [`ObdSession`] and observe it through
//! [`SessionEvent`]s.

mod config;
mod event;
mod session;
mod state;

pub use self::config::{ConfigError, SessionConfig};
pub use event::{SessionEvent, SessionEvents};
pub use session::ObdSession;
pub use state::{SessionState, SessionStatus};
