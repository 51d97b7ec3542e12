//! Error types for whitecat.

use std::io;
use thiserror::Error;

/// Result type for whitecat operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for whitecat operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No byte arrived within the current read bound.
    ///
    /// Fatal to the running operation only; the session stays usable.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The transport went away or the background reader stopped.
    ///
    /// The session must be detached and attached again.
    #[error("Link to the board is down: {0}")]
    Disconnected(String),

    /// The board answered something other than the expected echo or acknowledgment.
    #[error("Protocol mismatch: expected {expected:?}, received {received:?}")]
    ProtocolMismatch {
        /// Text the host was waiting for.
        expected: String,
        /// Text the board actually sent.
        received: String,
    },

    /// Boot output showed corrupted or missing firmware.
    #[error("Firmware invalid: {0}")]
    FirmwareInvalid(String),

    /// The embedding application asked the running operation to stop.
    #[error("Operation interrupted")]
    Interrupted,

    /// No serial port looked like a board.
    #[error("No board found on any serial port")]
    DeviceNotFound,

    /// Operation needs an attached board.
    #[error("No board attached")]
    NotAttached,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build a [`Error::ProtocolMismatch`] from what was expected and what arrived.
    pub fn mismatch(expected: impl Into<String>, received: impl Into<String>) -> Self {
        Self::ProtocolMismatch {
            expected: expected.into(),
            received: received.into(),
        }
    }

    /// Whether this error leaves the session unusable.
    pub fn is_fatal_to_session(&self) -> bool {
        match self {
            Self::Disconnected(_) | Self::Io(_) => true,
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_not_fatal_to_session() {
        assert!(!Error::Timeout("read_byte".into()).is_fatal_to_session());
        assert!(!Error::mismatch("true", "false").is_fatal_to_session());
    }

    #[test]
    fn test_disconnected_is_fatal_to_session() {
        assert!(Error::Disconnected("port closed".into()).is_fatal_to_session());
    }

    #[test]
    fn test_mismatch_display() {
        let err = Error::mismatch("io.send(\"/a\")", "");
        assert_eq!(
            err.to_string(),
            "Protocol mismatch: expected \"io.send(\\\"/a\\\")\", received \"\""
        );
    }
}
