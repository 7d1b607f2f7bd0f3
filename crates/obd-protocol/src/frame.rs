//! Reply Framing and Parsing
//!
//! The adapter terminates every completed reply with a `>` prompt. Bytes are
//! buffered until a prompt arrives, then each line of every completed reply
//! is parsed into a [`Reading`]. Framing only depends on the byte stream, so
//! the readings are the same however the stream is chunked.

use crate::catalog::{ParameterCatalog, Value};
use crate::mode;
use serde::{Serialize, Serializer};
use std::fmt;
use tracing::{debug, warn};

/// Prompt the adapter prints once it is ready for the next command
pub const PROMPT: u8 = b'>';

/// Default cap on bytes buffered while no prompt has arrived
const DEFAULT_PENDING_LIMIT: usize = 4096;

/// Terminal status replies passed through verbatim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AdapterStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "NO DATA")]
    NoData,
    #[serde(rename = "SEARCHING...")]
    Searching,
    #[serde(rename = "UNABLE TO CONNECT")]
    UnableToConnect,
    /// Adapter did not understand the command
    #[serde(rename = "?")]
    Unknown,
}

impl AdapterStatus {
    pub fn from_message(message: &str) -> Option<Self> {
        match message {
            "OK" => Some(AdapterStatus::Ok),
            "NO DATA" => Some(AdapterStatus::NoData),
            "SEARCHING..." => Some(AdapterStatus::Searching),
            "UNABLE TO CONNECT" => Some(AdapterStatus::UnableToConnect),
            "?" => Some(AdapterStatus::Unknown),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterStatus::Ok => "OK",
            AdapterStatus::NoData => "NO DATA",
            AdapterStatus::Searching => "SEARCHING...",
            AdapterStatus::UnableToConnect => "UNABLE TO CONNECT",
            AdapterStatus::Unknown => "?",
        }
    }
}

impl fmt::Display for AdapterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed result of one adapter message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reading {
    /// Terminal status string, no mode or pid
    Status { status: AdapterStatus },
    /// Decoded parameter. `pid` is `None` for pid-less modes such as stored DTCs
    Value {
        #[serde(serialize_with = "hex_byte")]
        mode: u8,
        #[serde(serialize_with = "hex_pid")]
        pid: Option<u8>,
        name: String,
        value: Value,
    },
    /// Reply the catalog could not decode, kept as received
    Raw { text: String, bytes: Vec<u8> },
}

impl Reading {
    pub fn status(&self) -> Option<AdapterStatus> {
        match self {
            Reading::Status { status } => Some(*status),
            _ => None,
        }
    }

    /// Parameter name for decoded values
    pub fn name(&self) -> Option<&str> {
        match self {
            Reading::Value { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Reading::Value { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Reading::Raw { .. })
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Status { status } => write!(f, "{}", status),
            Reading::Value {
                mode,
                pid: Some(pid),
                name,
                value,
            } => write!(f, "{:02X}{:02X} {}={}", mode, pid, name, value),
            Reading::Value {
                mode, name, value, ..
            } => write!(f, "{:02X} {}={}", mode, name, value),
            Reading::Raw { text, .. } => write!(f, "raw {:?}", text),
        }
    }
}

// Mode and pid are written the way the adapter prints them ("41", "0C")
fn hex_byte<S: Serializer>(byte: &u8, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{:02X}", byte))
}

fn hex_pid<S: Serializer>(pid: &Option<u8>, serializer: S) -> Result<S::Ok, S::Error> {
    match pid {
        Some(pid) => hex_byte(pid, serializer),
        None => serializer.serialize_none(),
    }
}

/// Reassembles the adapter byte stream into readings
#[derive(Debug)]
pub struct FrameParser {
    /// Unconsumed tail after the last prompt
    pending: Vec<u8>,
    /// Most bytes kept in `pending`; older bytes are dropped past this
    limit: usize,
    /// Bytes dropped since the last `take_discarded`
    discarded: usize,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_PENDING_LIMIT)
    }

    /// Parser keeping at most `limit` unterminated bytes
    pub fn with_limit(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            limit: limit.max(1),
            discarded: 0,
        }
    }

    /// Append a chunk and parse every reply it completes, in stream order.
    pub fn feed(&mut self, chunk: &[u8], catalog: &dyn ParameterCatalog) -> Vec<Reading> {
        self.pending.extend_from_slice(chunk);

        let Some(last_prompt) = self.pending.iter().rposition(|b| *b == PROMPT) else {
            self.enforce_limit();
            return Vec::new();
        };

        let tail = self.pending.split_off(last_prompt + 1);
        let complete = std::mem::replace(&mut self.pending, tail);
        self.enforce_limit();

        complete
            .split(|b| matches!(*b, PROMPT | b'\r' | b'\n'))
            .filter_map(|message| {
                let text = String::from_utf8_lossy(message);
                let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
                (!text.is_empty()).then(|| parse_message(text, catalog))
            })
            .collect()
    }

    /// Number of buffered bytes still waiting for a prompt
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Bytes dropped for lack of a prompt since the last call
    pub fn take_discarded(&mut self) -> usize {
        std::mem::take(&mut self.discarded)
    }

    fn enforce_limit(&mut self) {
        if self.pending.len() <= self.limit {
            return;
        }
        let excess = self.pending.len() - self.limit;
        self.pending.drain(..excess);
        self.discarded += excess;
        warn!("Dropped {} buffered bytes, no prompt from adapter", excess);
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse one adapter message.
pub fn parse_message(message: &str, catalog: &dyn ParameterCatalog) -> Reading {
    if let Some(status) = AdapterStatus::from_message(message) {
        return Reading::Status { status };
    }

    let compact: String = message.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = match hex_bytes(&compact) {
        Some(bytes) if !bytes.is_empty() => bytes,
        _ => return raw(message, Vec::new()),
    };

    let decoded = match bytes[0] {
        m if m == mode::CURRENT_DATA + mode::RESPONSE_OFFSET => decode_current(&bytes, catalog),
        m if m == mode::READ_DTC + mode::RESPONSE_OFFSET => decode_pidless(&bytes, catalog),
        _ => None,
    };

    decoded.unwrap_or_else(|| raw(message, bytes))
}

fn decode_current(bytes: &[u8], catalog: &dyn ParameterCatalog) -> Option<Reading> {
    let pid = *bytes.get(1)?;
    let def = catalog.lookup_by_pid(pid)?;
    let data = bytes.get(2..2 + def.bytes)?;

    Some(Reading::Value {
        mode: bytes[0],
        pid: Some(pid),
        name: def.name.to_string(),
        value: def.decode(data),
    })
}

fn decode_pidless(bytes: &[u8], catalog: &dyn ParameterCatalog) -> Option<Reading> {
    let def = catalog.lookup_by_mode(bytes[0] - mode::RESPONSE_OFFSET)?;

    Some(Reading::Value {
        mode: bytes[0],
        pid: None,
        name: def.name.to_string(),
        value: def.decode(&bytes[1..]),
    })
}

fn raw(message: &str, bytes: Vec<u8>) -> Reading {
    debug!("Unrecognized reply: {:?}", message);
    Reading::Raw {
        text: message.to_string(),
        bytes,
    }
}

/// Split a string into 2-hex-digit byte groups
fn hex_bytes(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}
