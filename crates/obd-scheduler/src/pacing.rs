//! Pacing Writer
//!
//! The adapter handles one command at a time with little internal buffering,
//! so queued commands are released on a fixed tick, at most one per tick.

use obd_protocol::{Command, CommandQueue, ObdError};
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

/// Default minimum spacing between two writes
pub const DEFAULT_PACING_INTERVAL: Duration = Duration::from_millis(50);

/// Bounded FIFO of outbound commands drained on a fixed tick
#[derive(Debug)]
pub struct PacingWriter {
    queue: CommandQueue,
    interval: Duration,
    ticker: Option<Interval>,
}

impl PacingWriter {
    pub fn new(interval: Duration, capacity: usize) -> Self {
        Self {
            queue: CommandQueue::new(capacity),
            interval: interval.max(Duration::from_millis(1)),
            ticker: None,
        }
    }

    /// Append a command; fails with `QueueOverflow` when full.
    pub fn enqueue(&mut self, command: Command) -> Result<(), ObdError> {
        debug!("Queueing command {}", command);
        self.queue.push(command)
    }

    /// Start the pacing tick. The first write happens one interval from now.
    /// Starting an active writer keeps the running tick.
    pub fn start(&mut self) {
        if self.ticker.is_some() {
            return;
        }
        info!("Starting pacing writer every {:?}", self.interval);
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
    }

    /// Cancel the pacing tick. Queued commands are kept.
    pub fn stop(&mut self) {
        if self.ticker.take().is_some() {
            info!("Pacing writer stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.ticker.is_some()
    }

    /// Wait for the next tick and dequeue at most one command.
    ///
    /// Never completes while the writer is stopped, so it can sit in a
    /// `select!` next to the other event sources.
    pub async fn tick(&mut self) -> Option<Command> {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
                self.queue.pop()
            }
            None => std::future::pending().await,
        }
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for PacingWriter {
    fn default() -> Self {
        Self::new(DEFAULT_PACING_INTERVAL, obd_protocol::DEFAULT_QUEUE_CAPACITY)
    }
}
