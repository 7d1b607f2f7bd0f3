//! Transport Seam
//!
//! A session only needs a duplex byte stream to the adapter. [`Connector`]
//! opens one; [`SerialConnector`] does so for serial and RFCOMM device nodes.

use crate::error::ObdError;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

/// Default serial baud rate for ELM327 adapters
pub const DEFAULT_BAUD_RATE: u32 = 38400;

/// Opens the byte stream a session talks to the adapter over
pub trait Connector: Send + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open the transport. `address` overrides the connector's default
    /// target; `channel` selects a service channel where the transport has one.
    fn connect(
        &mut self,
        address: Option<String>,
        channel: Option<u8>,
    ) -> impl Future<Output = Result<Self::Stream, ObdError>> + Send;
}

/// Connector for serial ports (USB adapters or bound `/dev/rfcomm*` nodes)
#[derive(Debug, Clone)]
pub struct SerialConnector {
    /// Serial port device path (e.g., "/dev/rfcomm0" or "COM3")
    device: String,
    baud_rate: u32,
}

impl SerialConnector {
    pub fn new(device: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            device: device.into(),
            baud_rate,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

impl Connector for SerialConnector {
    type Stream = SerialStream;

    fn connect(
        &mut self,
        address: Option<String>,
        channel: Option<u8>,
    ) -> impl Future<Output = Result<SerialStream, ObdError>> + Send {
        let path = address.unwrap_or_else(|| self.device.clone());
        let baud_rate = self.baud_rate;

        async move {
            if let Some(channel) = channel {
                // RFCOMM channels are bound to the device node outside this process
                debug!("Ignoring channel {} for serial device {}", channel, path);
            }
            info!("Opening OBD adapter on {} at {} baud", path, baud_rate);

            tokio_serial::new(&path, baud_rate)
                .open_native_async()
                .map_err(|e| ObdError::TransportConnect(format!("{}: {}", path, e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_device_is_connect_failure() {
        let mut connector = SerialConnector::new("/dev/does-not-exist-obd", DEFAULT_BAUD_RATE);
        let err = connector.connect(None, None).await.unwrap_err();
        assert!(matches!(err, ObdError::TransportConnect(msg) if msg.contains("does-not-exist")));
    }

    #[tokio::test]
    async fn test_address_overrides_device() {
        let mut connector = SerialConnector::new("/dev/does-not-exist-obd", DEFAULT_BAUD_RATE);
        let err = connector
            .connect(Some("/dev/also-missing-obd".to_string()), Some(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ObdError::TransportConnect(msg) if msg.contains("also-missing")));
    }
}
