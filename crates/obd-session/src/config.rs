//! Session configuration

use obd_protocol::{init_sequence, ObdProtocol, DEFAULT_QUEUE_CAPACITY};
use obd_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Session tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Minimum spacing between writes (milliseconds)
    pub pacing_interval_ms: u64,

    /// Maximum queued commands before writes are dropped
    pub queue_capacity: usize,

    /// Headroom factor for the derived poll interval
    pub poll_safety_multiplier: u32,

    /// Protocol selected during adapter setup
    pub protocol: ObdProtocol,

    /// ELM327 adaptive timing mode (0 = off, 2 = aggressive)
    pub adaptive_timing: u8,

    /// Bytes requested per transport read
    pub read_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pacing_interval_ms: 50,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_safety_multiplier: 2,
            protocol: ObdProtocol::Auto,
            adaptive_timing: 2,
            read_buffer_size: 256,
        }
    }
}

impl SessionConfig {
    /// Load from an optional TOML file, then `OBD_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }
        builder = builder.add_source(::config::Environment::with_prefix("OBD").try_parsing(true));

        let settings: SessionConfig = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pacing_interval_ms == 0 {
            return Err(ConfigError::Invalid("pacing_interval_ms must be > 0".into()));
        }
        let setup = init_sequence(self.protocol, self.adaptive_timing).len();
        if self.queue_capacity < setup {
            return Err(ConfigError::Invalid(format!(
                "queue_capacity must hold the {} adapter setup commands, got {}",
                setup, self.queue_capacity
            )));
        }
        if self.poll_safety_multiplier == 0 {
            return Err(ConfigError::Invalid("poll_safety_multiplier must be > 0".into()));
        }
        if self.adaptive_timing > 2 {
            return Err(ConfigError::Invalid(format!(
                "adaptive_timing must be 0, 1 or 2, got {}",
                self.adaptive_timing
            )));
        }
        if self.read_buffer_size == 0 {
            return Err(ConfigError::Invalid("read_buffer_size must be > 0".into()));
        }
        Ok(())
    }

    pub fn pacing_interval(&self) -> Duration {
        Duration::from_millis(self.pacing_interval_ms)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            pacing_interval: self.pacing_interval(),
            safety_multiplier: self.poll_safety_multiplier,
        }
    }
}
