//! Hand-off between the background classifier and foreground protocol code.
//!
//! The classifier is the only producer of the delivery queue and the
//! foreground read primitives are its only consumer. Which of the two byte
//! destinations (console sink, delivery queue) is active is governed by
//! [`LinkFlags`], written by the foreground and read by the classifier.

use crate::error::{Error, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::trace;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Default delivery queue capacity in bytes.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10 * 1024;

/// Where the classifier sends incoming bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Every byte goes to the console sink.
    ConsoleRelay,
    /// Every byte goes to the delivery queue.
    ProtocolCapture,
}

/// Byte-forwarding switches shared between the classifier and the foreground.
///
/// Relay and capture are independent flags; [`LinkFlags::set_mode`] is the
/// usual way to flip both at once.
#[derive(Debug)]
pub struct LinkFlags {
    console_out: AtomicBool,
    capture_in: AtomicBool,
    boot_notify: AtomicBool,
}

impl Default for LinkFlags {
    fn default() -> Self {
        Self {
            console_out: AtomicBool::new(true),
            capture_in: AtomicBool::new(false),
            boot_notify: AtomicBool::new(true),
        }
    }
}

impl LinkFlags {
    /// Flags in their safe resting state: relay on, capture off, notify on.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether bytes are relayed to the console sink.
    pub fn console_out(&self) -> bool {
        self.console_out.load(Ordering::SeqCst)
    }

    /// Whether bytes are pushed to the delivery queue.
    pub fn capture_in(&self) -> bool {
        self.capture_in.load(Ordering::SeqCst)
    }

    /// Whether completed lines are classified into events.
    pub fn boot_notify(&self) -> bool {
        self.boot_notify.load(Ordering::SeqCst)
    }

    /// Enable or disable console relay alone.
    pub fn set_console_out(&self, enabled: bool) {
        self.console_out.store(enabled, Ordering::SeqCst);
    }

    /// Enable or disable protocol capture alone.
    pub fn set_capture_in(&self, enabled: bool) {
        self.capture_in.store(enabled, Ordering::SeqCst);
    }

    /// Enable or disable event classification.
    pub fn set_boot_notify(&self, enabled: bool) {
        self.boot_notify.store(enabled, Ordering::SeqCst);
    }

    /// Switch both forwarding flags to match `mode`.
    pub fn set_mode(&self, mode: Mode) {
        let capture = mode == Mode::ProtocolCapture;
        self.set_console_out(!capture);
        self.set_capture_in(capture);
    }

    /// Current mode, if the flags match one exactly.
    pub fn mode(&self) -> Option<Mode> {
        match (self.console_out(), self.capture_in()) {
            (true, false) => Some(Mode::ConsoleRelay),
            (false, true) => Some(Mode::ProtocolCapture),
            _ => None,
        }
    }
}

/// Create a bounded delivery queue.
pub fn delivery_queue(capacity: usize) -> (Sender<u8>, RxQueue) {
    let (tx, rx) = channel::bounded(capacity);
    (tx, RxQueue::new(rx))
}

/// Consumer end of the delivery queue with timeout-bounded read primitives.
#[derive(Debug)]
pub struct RxQueue {
    rx: Receiver<u8>,
    timeout: Option<Duration>,
}

impl RxQueue {
    /// Wrap a receiver. Reads block without bound until a timeout is set.
    pub fn new(rx: Receiver<u8>) -> Self {
        Self { rx, timeout: None }
    }

    /// Bound every following byte read, or `None` to block indefinitely.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Current per-byte bound.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Bytes waiting in the queue.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Read one byte.
    pub fn read_byte(&mut self) -> Result<u8> {
        match self.timeout {
            Some(timeout) => match self.rx.recv_timeout(timeout) {
                Ok(b) => Ok(b),
                Err(RecvTimeoutError::Timeout) => Err(Error::Timeout(format!(
                    "no data from board within {} ms",
                    timeout.as_millis()
                ))),
                Err(RecvTimeoutError::Disconnected) => Err(reader_stopped()),
            },
            None => self.rx.recv().map_err(|_| reader_stopped()),
        }
    }

    /// Read exactly `len` bytes.
    pub fn read_exact(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.read_byte()?);
        }
        Ok(out)
    }

    /// Read a line terminated by `\n`. Carriage returns are dropped.
    pub fn read_line_crlf(&mut self) -> Result<String> {
        let mut line = Vec::new();
        loop {
            match self.read_byte()? {
                b'\n' => break,
                b'\r' => {},
                b => line.push(b),
            }
        }
        let line = String::from_utf8_lossy(&line).into_owned();
        trace!("<< {line}");
        Ok(line)
    }

    /// Read a line terminated by `\r`. A `\n` is kept as part of the text.
    pub fn read_line_cr(&mut self) -> Result<String> {
        let mut line = Vec::new();
        loop {
            match self.read_byte()? {
                b'\r' => break,
                b => line.push(b),
            }
        }
        let line = String::from_utf8_lossy(&line).into_owned();
        trace!("<< {line}");
        Ok(line)
    }

    /// Wait `settle` for in-flight bytes, then drop everything queued.
    ///
    /// Returns the number of bytes discarded.
    pub fn consume(&mut self, settle: Duration) -> usize {
        if !settle.is_zero() {
            thread::sleep(settle);
        }
        let dropped = self.rx.try_iter().count();
        if dropped > 0 {
            trace!("discarded {dropped} stale bytes");
        }
        dropped
    }
}

fn reader_stopped() -> Error {
    Error::Disconnected("background reader stopped".into())
}
