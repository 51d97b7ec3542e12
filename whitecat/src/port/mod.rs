//! Transport abstraction for the board's serial console.
//!
//! The engine needs very little from a transport: a write half for commands
//! and chunk data, control lines for the hardware reset, and one cloned read
//! half that the background classifier owns exclusively.
//!
//! ```text
//!            +----------------------+
//!            |    Device Session    |
//!            +----+------------+----+
//!         write   |            |  try_clone_reader
//!                 v            v
//!            +----+----+  +----+-------+
//!            |  Port   |  | classifier |
//!            +----+----+  +------------+
//!                 |
//!        +--------+---------+
//!        |                  |
//!  NativePort         MemoryPort
//!  (serialport)       (in-process pipe)
//! ```

#[cfg(feature = "native")]
pub mod native;

pub mod memory;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Line rate used by Lua RTOS consoles.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial line configuration.
///
/// Framing is fixed at 8N1 without flow control; only the device, the rate
/// and the read poll interval vary.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout of the transport itself.
    ///
    /// Kept short so the classifier thread notices shutdown promptly.
    pub read_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(100),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the transport read timeout.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// Duplex byte transport to a board.
pub trait Port: Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Set DTR (Data Terminal Ready) pin state.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Set RTS (Request To Send) pin state.
    ///
    /// On ESP32 boards RTS drives the EN (reset) line.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Apply both control lines at once.
    fn apply_control_state(&mut self, rts: bool, dtr: bool) -> Result<()> {
        self.set_rts(rts)?;
        self.set_dtr(dtr)
    }

    /// Discard anything buffered by the transport in either direction.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Hand out an independent read half for the background classifier.
    ///
    /// Reads on the returned handle should time out periodically with
    /// [`std::io::ErrorKind::TimedOut`] rather than block forever.
    fn try_clone_reader(&mut self) -> Result<Box<dyn Read + Send>>;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Trait for listing available serial ports.
///
/// This is separated from `Port` because it's a static operation that
/// doesn't require an open port instance.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};

pub use memory::{ControlChange, MemoryDevice, MemoryPort, memory_pair};
