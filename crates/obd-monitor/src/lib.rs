//! OBD-II Monitor
//!
//! Wires a serial ELM327 adapter, logging and configuration to an
//! [`ObdSession`] and streams every reading to stdout as one JSON object
//! per line. Logs go to stderr.

use obd_protocol::{ObdError, Reading, SerialConnector, DEFAULT_BAUD_RATE};
use obd_session::{ObdSession, SessionConfig, SessionEvent, SessionEvents, SessionState};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Monitor errors
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error(transparent)]
    Session(#[from] obd_session::ConfigError),

    #[error("Invalid log level: {0}")]
    LogLevel(String),

    #[error("Failed to install logger: {0}")]
    Logging(String),

    #[error("Adapter connection lost: {0}")]
    ConnectionLost(ObdError),

    #[error("Failed to encode reading: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Output error: {0}")]
    Io(#[from] std::io::Error),
}

/// Monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Serial port device path (e.g., "/dev/rfcomm0")
    pub device: String,

    pub baud_rate: u32,

    /// RFCOMM channel, passed through to the connector
    pub channel: Option<u8>,

    /// Parameters polled once the adapter is ready
    pub pollers: Vec<String>,

    /// Poll period (milliseconds), 0 derives it from the pacing interval
    pub poll_interval_ms: u64,

    /// Stop after this many decoded values
    pub samples: Option<usize>,

    /// Delay before reconnecting after a transport failure (milliseconds),
    /// 0 exits instead
    pub reconnect_delay_ms: u64,

    /// Max tracing level: error, warn, info, debug or trace
    pub log_level: String,

    /// Log as JSON instead of plain text
    pub log_json: bool,

    pub session: SessionConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            device: "/dev/rfcomm0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            channel: None,
            pollers: vec!["rpm".to_string(), "vss".to_string(), "temp".to_string()],
            poll_interval_ms: 0,
            samples: None,
            reconnect_delay_ms: 0,
            log_level: "info".to_string(),
            log_json: false,
            session: SessionConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load from an optional TOML file, then `OBD_*` environment variables.
    /// Session settings nest under `session` (`OBD_SESSION__QUEUE_CAPACITY`).
    pub fn load(path: Option<&Path>) -> Result<Self, MonitorError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("OBD")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("pollers")
                .try_parsing(true),
        );

        let config: MonitorConfig = builder.build()?.try_deserialize()?;
        config.session.validate()?;
        config.level()?;
        Ok(config)
    }

    pub fn level(&self) -> Result<Level, MonitorError> {
        Level::from_str(&self.log_level).map_err(|_| MonitorError::LogLevel(self.log_level.clone()))
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_ms > 0).then(|| Duration::from_millis(self.poll_interval_ms))
    }

    fn reconnect_delay(&self) -> Option<Duration> {
        (self.reconnect_delay_ms > 0).then(|| Duration::from_millis(self.reconnect_delay_ms))
    }
}

/// Initialize logging
pub fn init_logging(level: Level, json: bool) -> Result<(), MonitorError> {
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr);

    let result = if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    result.map_err(|e| MonitorError::Logging(e.to_string()))
}

/// Encode a reading as one JSON line
pub fn reading_line(reading: &Reading) -> Result<String, MonitorError> {
    Ok(serde_json::to_string(reading)?)
}

/// Run the monitor against a serial adapter until Ctrl-C
pub async fn run(config: MonitorConfig) -> Result<(), MonitorError> {
    let connector = SerialConnector::new(config.device.clone(), config.baud_rate);
    info!("Monitoring {} at {} baud", connector.device(), config.baud_rate);

    let (session, events) = ObdSession::with_standard_catalog(connector, config.session.clone());
    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Interrupted");
    };

    monitor(&session, events, &config, std::io::stdout(), interrupted).await
}

/// Drive a session: connect, start the configured pollers once ready and
/// write readings to `out` until `stop` completes, the sample limit is
/// reached or the adapter is lost.
pub async fn monitor<W, F>(
    session: &ObdSession,
    mut events: SessionEvents,
    config: &MonitorConfig,
    mut out: W,
    stop: F,
) -> Result<(), MonitorError>
where
    W: Write,
    F: Future<Output = ()>,
{
    tokio::pin!(stop);
    session.connect(None, config.channel).await;

    let mut samples = 0;
    let result = loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = &mut stop => break Ok(()),
        };
        let Some(event) = event else {
            break Ok(());
        };

        match event {
            SessionEvent::Connected => {
                for name in &config.pollers {
                    session.add_poller(name).await;
                }
                if !config.pollers.is_empty() {
                    session.start_polling(config.poll_interval()).await;
                }
            }
            SessionEvent::DataReceived(reading) => {
                writeln!(out, "{}", reading_line(&reading)?)?;
                out.flush()?;
                if reading.value().is_some() {
                    samples += 1;
                    if config.samples.is_some_and(|limit| samples >= limit) {
                        info!("Collected {} samples", samples);
                        break Ok(());
                    }
                }
            }
            SessionEvent::Error(
                e @ (ObdError::TransportConnect(_)
                | ObdError::TransportRead(_)
                | ObdError::TransportWrite(_)),
            ) => match config.reconnect_delay() {
                Some(delay) => {
                    warn!("{}, reconnecting in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                    session.connect(None, config.channel).await;
                }
                None => break Err(MonitorError::ConnectionLost(e)),
            },
            SessionEvent::Error(e) => warn!("{}", e),
            SessionEvent::Debug(message) => debug!("{}", message),
            SessionEvent::StateChanged(SessionState::Failed) => {
                warn!("Adapter session failed");
            }
            SessionEvent::StateChanged(state) => info!("Session {}", state),
        }
    };

    session.shutdown().await;
    result
}
