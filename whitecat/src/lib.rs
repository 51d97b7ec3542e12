//! # whitecat
//!
//! Host-side serial engine for boards running the Lua RTOS shell.
//!
//! This crate talks to an ESP32 board over its serial console:
//!
//! - a background classifier that watches console output for resets,
//!   runtime errors and block markers
//! - timeout-bounded read primitives over a delivery queue
//! - the shell's command/response exchange and directory listings
//! - chunked file upload and download
//! - hardware reset with boot outcome detection
//!
//! ## Features
//!
//! - `native` (default): serial ports via the `serialport` crate
//!
//! Without `native` the engine still runs over any [`Port`], for example the
//! in-memory [`MemoryPort`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use whitecat::{LogSink, Session, SessionConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = Session::new(SessionConfig::default(), Arc::new(LogSink));
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let port = whitecat::NativePort::open_simple("/dev/ttyUSB0", 115_200)?;
//!         session.connect(Box::new(port))?;
//!
//!         let info = session.identify()?;
//!         println!("model: {}", info.model);
//!
//!         let main = session.read_file("/main.lua")?;
//!         println!("{}", String::from_utf8_lossy(&main));
//!
//!         session.detach();
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod classifier;
pub mod device;
pub mod error;
pub mod event;
pub mod link;
pub mod monitor;
pub mod port;
pub mod protocol;
pub mod session;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Boot waits and
/// file transfers poll it between lines and chunks.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    classifier::classify_line,
    device::{DetectedPort, DeviceKind, detect_ports, select_port},
    error::{Error, Result},
    event::{CollectingSink, Event, EventSink, LogSink, Progress, RuntimeFault},
    link::{LinkFlags, Mode},
    monitor::{ConsoleDecoder, drain_utf8_lossy},
    port::{MemoryDevice, MemoryPort, Port, PortEnumerator, PortInfo, SerialConfig, memory_pair},
    protocol::{BootOutcome, DirEntry, format_listing},
    session::{BoardInfo, Session, SessionConfig},
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_default_false() {
        assert!(!is_interrupted_requested());
    }
}
