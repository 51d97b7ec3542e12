//! Device Session: one attached board and the operations callers run on it.
//!
//! A [`Session`] owns the transport's write half, the delivery queue and the
//! forwarding flags. Between operations the link rests in console relay with
//! no read timeout; each operation switches to protocol capture for its
//! duration and a scope guard puts the resting state back on every exit path.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use whitecat::{LogSink, Session, SessionConfig};
//!
//! fn main() -> whitecat::Result<()> {
//!     let mut session = Session::new(SessionConfig::default(), Arc::new(LogSink));
//!     #[cfg(feature = "native")]
//!     {
//!         session.open("/dev/ttyUSB0")?;
//!         println!("{}", session.list_directory("/")?);
//!         session.write_file("/main.lua", b"print('hi')\n")?;
//!         session.detach();
//!     }
//!     Ok(())
//! }
//! ```

use crate::classifier::{ClassifierHandle, StreamClassifier};
use crate::error::{Error, Result};
use crate::event::{Event, EventSink};
use crate::link::{DEFAULT_QUEUE_CAPACITY, LinkFlags, Mode, RxQueue, delivery_queue};
use crate::port::{DEFAULT_BAUD_RATE, Port};
use crate::protocol::boot::{self, BootOutcome};
use crate::protocol::chunk::{self, MAX_CHUNK_SIZE};
use crate::protocol::shell::{self, DirEntry};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Tunables of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Line rate used when the session opens the port itself.
    pub baud_rate: u32,
    /// Upload chunk size, 1..=255.
    pub chunk_size: u8,
    /// Delivery queue capacity in bytes.
    pub queue_capacity: usize,
    /// Read bound for shell commands.
    pub command_timeout: Duration,
    /// Read bound for file transfers.
    pub transfer_timeout: Duration,
    /// Overall bound for a boot to reach the shell.
    pub boot_timeout: Duration,
    /// Hold time on each side of the reset pulse.
    pub reset_pulse: Duration,
    /// Pause before stale output is discarded.
    pub flush_settle: Duration,
    /// Pause after closing the port.
    pub detach_settle: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            chunk_size: MAX_CHUNK_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            command_timeout: Duration::from_millis(2000),
            transfer_timeout: Duration::from_millis(2000),
            boot_timeout: Duration::from_millis(4000),
            reset_pulse: Duration::from_millis(10),
            flush_settle: Duration::from_millis(200),
            detach_settle: Duration::from_millis(1000),
        }
    }
}

impl SessionConfig {
    /// Set the line rate.
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the upload chunk size, clamped to 1..=255.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = u8::try_from(chunk_size.max(1)).unwrap_or(MAX_CHUNK_SIZE);
        self
    }

    /// Set the delivery queue capacity (at least one byte).
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the shell command read bound.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the file transfer read bound.
    #[must_use]
    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    /// Set the boot bound.
    #[must_use]
    pub fn with_boot_timeout(mut self, timeout: Duration) -> Self {
        self.boot_timeout = timeout;
        self
    }

    /// Set the reset pulse hold time.
    #[must_use]
    pub fn with_reset_pulse(mut self, pulse: Duration) -> Self {
        self.reset_pulse = pulse;
        self
    }

    /// Set the settle pause used before discarding stale output.
    #[must_use]
    pub fn with_flush_settle(mut self, settle: Duration) -> Self {
        self.flush_settle = settle;
        self
    }

    /// Set the pause after closing the port.
    #[must_use]
    pub fn with_detach_settle(mut self, settle: Duration) -> Self {
        self.detach_settle = settle;
        self
    }

    /// Reject values no board exchange can work with.
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(Error::Config("baud rate must be positive".to_string()));
        }
        for (name, bound) in [
            ("command timeout", self.command_timeout),
            ("transfer timeout", self.transfer_timeout),
            ("boot timeout", self.boot_timeout),
        ] {
            if bound.is_zero() {
                return Err(Error::Config(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

/// What the board reported about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BoardInfo {
    /// Board model, e.g. `N1ESP32`. Empty when unknown.
    pub model: String,
    /// Board subtype.
    pub subtype: String,
    /// Board brand.
    pub brand: String,
    /// Firmware image id, `brand-model-subtype`.
    pub firmware: String,
}

impl BoardInfo {
    /// Build from an `os.board()` response: `model[\tsubtype[\tbrand]]`.
    pub fn from_board_response(response: &str) -> Self {
        let mut fields = response
            .lines()
            .next()
            .unwrap_or_default()
            .split('\t')
            .map(str::trim);
        let model = fields.next().unwrap_or_default().to_string();
        let subtype = fields.next().unwrap_or_default().to_string();
        let brand = fields.next().unwrap_or_default().to_string();
        let firmware = Self::compose_firmware_id(&brand, &model, &subtype);
        Self {
            model,
            subtype,
            brand,
            firmware,
        }
    }

    /// Join the non-empty parts as `brand-model-subtype`.
    pub fn compose_firmware_id(brand: &str, model: &str, subtype: &str) -> String {
        [brand, model, subtype]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("-")
    }

    /// Whether the board answered with a model.
    pub fn is_known(&self) -> bool {
        !self.model.is_empty()
    }
}

struct Link {
    port: Box<dyn Port>,
    rx: RxQueue,
    flags: Arc<LinkFlags>,
    classifier: ClassifierHandle,
}

/// Protocol capture for the lifetime of the guard.
///
/// Dropping it restores console relay and unbounded reads.
struct CaptureScope<'a> {
    link: &'a mut Link,
}

impl<'a> CaptureScope<'a> {
    fn enter(link: &'a mut Link, timeout: Option<Duration>) -> Self {
        link.flags.set_mode(Mode::ProtocolCapture);
        link.rx.set_timeout(timeout);
        Self { link }
    }

    fn io(&mut self) -> (&mut dyn Port, &mut RxQueue) {
        (self.link.port.as_mut(), &mut self.link.rx)
    }
}

impl Drop for CaptureScope<'_> {
    fn drop(&mut self) {
        self.link.rx.set_timeout(None);
        self.link.flags.set_mode(Mode::ConsoleRelay);
    }
}

/// One attached board.
pub struct Session {
    config: SessionConfig,
    sink: Arc<dyn EventSink>,
    link: Option<Link>,
    valid_firmware: bool,
    board: BoardInfo,
}

impl Session {
    /// Create a detached session.
    pub fn new(config: SessionConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            sink,
            link: None,
            valid_firmware: false,
            board: BoardInfo::default(),
        }
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether a transport is attached.
    pub fn is_attached(&self) -> bool {
        self.link.is_some()
    }

    /// Whether the background classifier is still reading the transport.
    pub fn is_link_alive(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.classifier.is_running())
    }

    /// Name of the attached port.
    pub fn port_name(&self) -> Option<&str> {
        self.link
            .as_ref()
            .map(|link| link.port.name())
    }

    /// Whether the last boot reached the shell.
    pub fn firmware_valid(&self) -> bool {
        self.valid_firmware
    }

    /// Identification gathered by [`Session::identify`].
    pub fn board_info(&self) -> &BoardInfo {
        &self.board
    }

    /// Forwarding flags of the attached link.
    pub fn flags(&self) -> Option<Arc<LinkFlags>> {
        self.link
            .as_ref()
            .map(|link| Arc::clone(&link.flags))
    }

    fn link_mut(&mut self) -> Result<&mut Link> {
        self.link.as_mut().ok_or(Error::NotAttached)
    }

    /// Open `device_name` with the configured line rate and attach to it.
    #[cfg(feature = "native")]
    pub fn open(&mut self, device_name: &str) -> Result<()> {
        self.config.validate()?;
        let config = crate::port::SerialConfig::new(device_name, self.config.baud_rate);
        let port = crate::port::NativePort::open(&config)?;
        self.attach(Box::new(port))
    }

    /// Take over `port`, start the classifier and reset the board.
    ///
    /// On failure the port is closed again before the error is returned.
    pub fn attach(&mut self, mut port: Box<dyn Port>) -> Result<()> {
        self.detach();
        if let Err(e) = self.config.validate() {
            let _ = port.close();
            return Err(e);
        }
        info!("attaching board on {} ...", port.name());

        let reader = match port.try_clone_reader() {
            Ok(reader) => reader,
            Err(e) => {
                let _ = port.close();
                return Err(e);
            },
        };

        let flags = Arc::new(LinkFlags::new());
        let (tx, rx) = delivery_queue(self.config.queue_capacity);
        let classifier =
            match StreamClassifier::new(Arc::clone(&flags), Arc::clone(&self.sink), tx).spawn(reader) {
                Ok(handle) => handle,
                Err(e) => {
                    let _ = port.close();
                    return Err(e);
                },
            };

        self.link = Some(Link {
            port,
            rx,
            flags,
            classifier,
        });
        self.valid_firmware = true;
        self.board = BoardInfo::default();

        if let Err(e) = self.reset() {
            warn!("attach failed: {e}");
            self.detach();
            self.valid_firmware = false;
            return Err(e);
        }

        info!("board attached");
        self.sink.notify(&Event::BoardAttached);
        Ok(())
    }

    /// Attach, then switch the shell to plain echo mode for scripted use.
    pub fn connect(&mut self, port: Box<dyn Port>) -> Result<()> {
        self.attach(port)?;
        if self.valid_firmware {
            self.write_raw(format!("{}\r\n", shell::PLAIN_SHELL_COMMAND).as_bytes())?;
            let settle = self.config.flush_settle;
            self.link_mut()?.rx.consume(settle);
        }
        Ok(())
    }

    /// Close the transport. Safe to call when nothing is attached.
    pub fn detach(&mut self) {
        let Some(mut link) = self.link.take() else {
            return;
        };

        info!("detaching board ...");
        link.classifier.stop();
        if let Err(e) = link.port.close() {
            warn!("closing {} failed: {e}", link.port.name());
        }
        drop(link);
        thread::sleep(self.config.detach_settle);
    }

    /// Hardware-reset the board and classify its boot.
    ///
    /// A corrupted image or a flash error is an `Ok` outcome and marks the
    /// firmware invalid. Not reaching the shell in time is an error.
    pub fn reset(&mut self) -> Result<BootOutcome> {
        let settle = self.config.flush_settle;
        let pulse = self.config.reset_pulse;
        let bound = self.config.boot_timeout;
        let sink = Arc::clone(&self.sink);
        let link = self.link_mut()?;

        link.port.clear_buffers()?;
        link.rx.consume(settle);
        let outcome = {
            let mut scope = CaptureScope::enter(link, None);
            let (port, rx) = scope.io();
            boot::pulse_reset(port, pulse)?;
            let outcome = boot::wait_for_ready(port, rx, bound, sink.as_ref())?;
            if outcome.is_ready() {
                rx.consume(settle);
            }
            outcome
        };

        if outcome.is_ready() {
            info!("board is ready ...");
        } else {
            self.valid_firmware = false;
        }
        Ok(outcome)
    }

    /// Run one shell command under the configured command bound.
    pub fn send_command(&mut self, command: &str) -> Result<String> {
        let timeout = self.config.command_timeout;
        self.send_command_with_timeout(command, Some(timeout))
    }

    /// Run one shell command under an explicit bound (`None` waits forever).
    ///
    /// An unechoed command yields an empty response.
    pub fn send_command_with_timeout(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<String> {
        let link = self.link_mut()?;
        let mut scope = CaptureScope::enter(link, timeout);
        let (port, rx) = scope.io();
        shell::send_command(port, rx, command)
    }

    /// Directory listing of `path` as a JSON array text.
    pub fn list_directory(&mut self, path: &str) -> Result<String> {
        let response = self.send_command(&shell::list_command(path))?;
        Ok(shell::format_listing(&response))
    }

    /// Directory listing of `path` as records.
    pub fn list_entries(&mut self, path: &str) -> Result<Vec<DirEntry>> {
        let response = self.send_command(&shell::list_command(path))?;
        Ok(shell::parse_listing(&response))
    }

    /// Read `path` from the board.
    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let timeout = self.config.transfer_timeout;
        let settle = self.config.flush_settle;
        let sink = Arc::clone(&self.sink);
        let link = self.link_mut()?;

        let mut scope = CaptureScope::enter(link, Some(timeout));
        let (port, rx) = scope.io();
        let data = chunk::receive_file(port, rx, path, &mut |p| {
            sink.notify(&Event::Progress(p));
        })?;
        rx.consume(settle);
        Ok(data)
    }

    /// Write `data` to `path` on the board.
    ///
    /// A failed upload may leave a truncated file behind.
    pub fn write_file(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let timeout = self.config.transfer_timeout;
        let settle = self.config.flush_settle;
        let chunk_size = self.config.chunk_size;
        let sink = Arc::clone(&self.sink);
        let link = self.link_mut()?;

        let mut scope = CaptureScope::enter(link, Some(timeout));
        let (port, rx) = scope.io();
        rx.consume(settle);
        chunk::send_file(port, rx, path, data, chunk_size, &mut |p| {
            sink.notify(&Event::Progress(p));
        })?;
        rx.consume(settle);
        Ok(())
    }

    /// Ask the board for its model and remember it.
    ///
    /// An empty model usually means corrupted or foreign firmware.
    pub fn identify(&mut self) -> Result<&BoardInfo> {
        let response = self.send_command(shell::BOARD_COMMAND)?;
        self.board = BoardInfo::from_board_response(&response);
        if self.board.is_known() {
            debug!("board model {}", self.board.model);
        } else {
            warn!("unknown board model");
        }
        Ok(&self.board)
    }

    /// Commit hash of the running firmware.
    pub fn firmware_commit(&mut self) -> Result<String> {
        let response = self.send_command(shell::COMMIT_COMMAND)?;
        Ok(response.trim().to_string())
    }

    /// Write console input straight to the board.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.link_mut()?
            .port
            .write_all_bytes(bytes)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.classifier.stop();
            let _ = link.port.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::CollectingSink;
    use crate::port::memory_pair;

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.chunk_size, 255);
        assert_eq!(config.queue_capacity, 10 * 1024);
        assert_eq!(config.command_timeout, Duration::from_millis(2000));
        assert_eq!(config.transfer_timeout, Duration::from_millis(2000));
        assert_eq!(config.boot_timeout, Duration::from_millis(4000));
        assert_eq!(config.reset_pulse, Duration::from_millis(10));
        assert_eq!(config.flush_settle, Duration::from_millis(200));
        assert_eq!(config.detach_settle, Duration::from_millis(1000));
    }

    #[test]
    fn test_chunk_size_is_clamped() {
        assert_eq!(SessionConfig::default().with_chunk_size(0).chunk_size, 1);
        assert_eq!(SessionConfig::default().with_chunk_size(128).chunk_size, 128);
        assert_eq!(SessionConfig::default().with_chunk_size(4096).chunk_size, 255);
    }

    #[test]
    fn test_validate_rejects_unusable_values() {
        assert!(SessionConfig::default().validate().is_ok());
        assert!(matches!(
            SessionConfig::default().with_baud_rate(0).validate(),
            Err(Error::Config(_))
        ));
        let err = SessionConfig::default()
            .with_boot_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: boot timeout must be positive");
    }

    #[test]
    fn test_attach_rejects_invalid_config_without_touching_the_board() {
        let config = SessionConfig::default()
            .with_command_timeout(Duration::ZERO)
            .with_detach_settle(Duration::ZERO);
        let mut session = Session::new(config, Arc::new(CollectingSink::new()));
        let (port, device) = memory_pair("mem0");

        assert!(matches!(session.attach(Box::new(port)), Err(Error::Config(_))));
        assert!(!session.is_attached());
        assert!(device.control_changes().is_empty());
    }

    #[test]
    fn test_board_info_from_response() {
        let info = BoardInfo::from_board_response("N1ESP32\tN1ESP32\tWHITECAT");
        assert_eq!(info.model, "N1ESP32");
        assert_eq!(info.firmware, "WHITECAT-N1ESP32-N1ESP32");

        let info = BoardInfo::from_board_response("ESP32THING");
        assert_eq!(info.subtype, "");
        assert_eq!(info.firmware, "ESP32THING");

        assert!(!BoardInfo::from_board_response("").is_known());
    }

    #[test]
    fn test_compose_firmware_id_skips_empty_parts() {
        assert_eq!(BoardInfo::compose_firmware_id("", "GENERIC", ""), "GENERIC");
        assert_eq!(BoardInfo::compose_firmware_id("ESPRESSIF", "ESP32COREBOARD", "RevB"), "ESPRESSIF-ESP32COREBOARD-RevB");
    }

    #[test]
    fn test_detached_session_rejects_operations() {
        let mut session = Session::new(SessionConfig::default(), Arc::new(CollectingSink::new()));
        assert!(!session.is_attached());
        assert!(matches!(session.send_command("x"), Err(Error::NotAttached)));
        assert!(matches!(session.read_file("/a"), Err(Error::NotAttached)));
        assert!(matches!(session.write_raw(b"x"), Err(Error::NotAttached)));
        session.detach();
        session.detach();
    }

    #[test]
    fn test_attach_failure_closes_port() {
        let config = SessionConfig::default()
            .with_boot_timeout(Duration::from_millis(100))
            .with_flush_settle(Duration::ZERO)
            .with_detach_settle(Duration::ZERO);
        let sink = Arc::new(CollectingSink::new());
        let mut session = Session::new(config, sink.clone());
        let (port, device) = memory_pair("mem0");

        let err = session.attach(Box::new(port)).unwrap_err();

        assert!(matches!(err, Error::Timeout(_)));
        assert!(!session.is_attached());
        assert!(sink.events_of("boardAttached").is_empty());
        // The host side is gone, so the device sees a closed pipe.
        let _ = device.drain();
        assert!(device.read_byte(Duration::from_millis(50)).is_none());
    }
}
