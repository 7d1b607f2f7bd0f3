//! ELM327 Wire Protocol
//!
//! Commands, the bounded command queue, reply framing and the parameter
//! catalog used to turn an ELM327 adapter's byte stream into typed readings.
//! The transport itself is abstracted behind [`Connector`].

mod catalog;
mod command;
mod error;
mod frame;
mod protocol;
mod transport;

pub use catalog::{Decoder, ParameterCatalog, ParameterDef, StandardCatalog, Value};
pub use command::{Command, CommandQueue, DEFAULT_QUEUE_CAPACITY};
pub use error::ObdError;
pub use frame::{parse_message, AdapterStatus, FrameParser, Reading, PROMPT};
pub use protocol::{init_sequence, ObdProtocol};
pub use transport::{Connector, SerialConnector, DEFAULT_BAUD_RATE};

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
    /// Diagnostic trouble codes
    pub const READ_DTC: u8 = 0x03;
    /// Clear trouble codes
    pub const CLEAR_DTC: u8 = 0x04;
    /// Vehicle information
    pub const VEHICLE_INFO: u8 = 0x09;

    /// Offset the adapter adds to a request mode in its positive reply
    pub const RESPONSE_OFFSET: u8 = 0x40;
}
