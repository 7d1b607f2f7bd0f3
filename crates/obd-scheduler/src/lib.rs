//! OBD-II Command Scheduling
//!
//! [`PacingWriter`] drains queued commands to the adapter no faster than one
//! per pacing interval. [`PollingScheduler`] re-enqueues the active poller
//! set on its own timer.

mod pacing;
mod poller;
mod scheduler;

pub use pacing::{PacingWriter, DEFAULT_PACING_INTERVAL};
pub use poller::{Poller, PollerSet};
pub use scheduler::{PollingScheduler, SchedulerConfig};
