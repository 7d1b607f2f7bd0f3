//! Polling Scheduler Implementation

use crate::pacing::DEFAULT_PACING_INTERVAL;
use crate::poller::PollerSet;
use obd_protocol::Command;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the polling scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pacing interval of the writer draining the polls (default: 50ms)
    pub pacing_interval: Duration,
    /// Headroom factor for the derived poll interval, leaves room for
    /// manual requests between polls (default: 2)
    pub safety_multiplier: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pacing_interval: DEFAULT_PACING_INTERVAL,
            safety_multiplier: 2,
        }
    }
}

/// Periodically re-enqueues every active poller
pub struct PollingScheduler {
    /// Active pollers, kept across stop/start
    pollers: PollerSet,
    /// Configuration
    config: SchedulerConfig,
    /// Poll timer, `None` while stopped
    ticker: Option<Interval>,
    /// Period of the running timer
    period: Option<Duration>,
    /// Running period follows the poller count
    derived: bool,
}

impl PollingScheduler {
    /// Create a stopped scheduler with no pollers
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            pollers: PollerSet::new(),
            config,
            ticker: None,
            period: None,
            derived: false,
        }
    }

    pub fn pollers(&self) -> &PollerSet {
        &self.pollers
    }

    pub fn pollers_mut(&mut self) -> &mut PollerSet {
        &mut self.pollers
    }

    /// Poll period that keeps the enqueue rate below what the writer drains:
    /// pacing interval × poller count × safety multiplier.
    pub fn derived_interval(&self) -> Duration {
        let pollers = self.pollers.len().max(1) as u32;
        self.config.pacing_interval * pollers * self.config.safety_multiplier.max(1)
    }

    /// Start polling, replacing any running timer so only one is ever active.
    /// Returns the period in use.
    pub fn start(&mut self, interval: Option<Duration>) -> Duration {
        let period = match interval {
            Some(period) if period.is_zero() => {
                warn!("Zero poll interval requested, using pacing interval");
                self.config.pacing_interval
            }
            Some(period) => period,
            None => self.derived_interval(),
        };

        if self.ticker.is_some() {
            debug!("Replacing running poll timer");
        }
        self.derived = interval.is_none();
        self.restart(period);
        period
    }

    /// Re-derive the period after the poller set changed.
    ///
    /// Only a running timer started without an explicit interval is
    /// restarted. Returns the new period when it changed.
    pub fn refresh(&mut self) -> Option<Duration> {
        if self.ticker.is_none() || !self.derived {
            return None;
        }
        let period = self.derived_interval();
        if self.period == Some(period) {
            return None;
        }
        self.restart(period);
        Some(period)
    }

    /// Stop the poll timer. The poller set is kept for a later restart.
    pub fn stop(&mut self) {
        if self.ticker.take().is_some() {
            info!("Polling stopped");
        }
        self.period = None;
        self.derived = false;
    }

    fn restart(&mut self, period: Duration) {
        info!(
            "Polling {} parameters every {:?}",
            self.pollers.len(),
            period
        );
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        self.period = Some(period);
    }

    /// Check if the poll timer is running
    pub fn is_polling(&self) -> bool {
        self.ticker.is_some()
    }

    /// Period of the running timer
    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    /// Wait for the next poll and return the batch to enqueue.
    ///
    /// Never completes while stopped.
    pub async fn tick(&mut self) -> Vec<Command> {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
                self.pollers.commands()
            }
            None => std::future::pending().await,
        }
    }
}

impl Default for PollingScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}
