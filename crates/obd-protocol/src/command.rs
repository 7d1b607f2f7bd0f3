//! Outbound Commands and the Bounded Command Queue

use crate::error::ObdError;
use std::collections::VecDeque;
use std::fmt;

/// Default maximum number of queued commands
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// An outbound ASCII instruction for the adapter (AT command or mode+pid request)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    /// Expected reply count, 0 = until prompt
    expected_replies: u8,
}

impl Command {
    /// Create a command that waits for the adapter prompt
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            expected_replies: 0,
        }
    }

    /// Create a command with an expected reply count hint
    pub fn with_replies(text: impl Into<String>, expected_replies: u8) -> Self {
        Self {
            text: text.into(),
            expected_replies,
        }
    }

    /// Command text without terminator
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Expected reply count hint
    pub fn expected_replies(&self) -> u8 {
        self.expected_replies
    }

    /// Bytes written to the transport.
    ///
    /// A non-zero reply hint is appended as the ELM327 response-count
    /// suffix (`010D` with 1 reply becomes `010D1\r`).
    pub fn to_wire(&self) -> Vec<u8> {
        let mut wire = String::with_capacity(self.text.len() + 4);
        wire.push_str(&self.text);
        if self.expected_replies != 0 {
            wire.push_str(&self.expected_replies.to_string());
        }
        wire.push('\r');
        wire.into_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.expected_replies == 0 {
            write!(f, "{}", self.text)
        } else {
            write!(f, "{}{}", self.text, self.expected_replies)
        }
    }
}

/// FIFO queue of pending commands with a fixed capacity
#[derive(Debug)]
pub struct CommandQueue {
    items: VecDeque<Command>,
    capacity: usize,
}

impl CommandQueue {
    /// Create an empty queue holding at most `capacity` commands
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(DEFAULT_QUEUE_CAPACITY)),
            capacity,
        }
    }

    /// Append a command to the tail.
    ///
    /// A full queue rejects the command and is left unchanged.
    pub fn push(&mut self, command: Command) -> Result<(), ObdError> {
        if self.items.len() >= self.capacity {
            return Err(ObdError::QueueOverflow {
                capacity: self.capacity,
            });
        }
        self.items.push_back(command);
        Ok(())
    }

    /// Remove the head of the queue
    pub fn pop(&mut self) -> Option<Command> {
        self.items.pop_front()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
