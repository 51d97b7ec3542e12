//! In-process transport pair.
//!
//! [`memory_pair`] returns a [`MemoryPort`] for the host side and a
//! [`MemoryDevice`] for whoever plays the board: a test, or a simulator
//! driving the shell protocol.

use crate::error::{Error, Result};
use crate::port::Port;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::trace;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

/// How long a reader clone waits before reporting `TimedOut`.
const READ_POLL: Duration = Duration::from_millis(20);

/// A control line transition requested by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlChange {
    /// RTS was set to the given level.
    Rts(bool),
    /// DTR was set to the given level.
    Dtr(bool),
}

/// Create a connected host/device pair.
pub fn memory_pair(name: impl Into<String>) -> (MemoryPort, MemoryDevice) {
    let (host_tx, device_rx) = channel::unbounded();
    let (device_tx, host_rx) = channel::unbounded();
    let (control_tx, control_rx) = channel::unbounded();

    let port = MemoryPort {
        name: name.into(),
        tx: Some(host_tx),
        rx: Some(host_rx),
        control: Some(control_tx),
    };
    let device = MemoryDevice {
        rx: device_rx,
        tx: device_tx,
        control: control_rx,
    };
    (port, device)
}

/// Host end of an in-process transport.
#[derive(Debug)]
pub struct MemoryPort {
    name: String,
    tx: Option<Sender<u8>>,
    rx: Option<Receiver<u8>>,
    control: Option<Sender<ControlChange>>,
}

impl MemoryPort {
    fn closed(&self) -> Error {
        Error::Disconnected(format!("{} is closed", self.name))
    }

    fn signal(&self, change: ControlChange) -> Result<()> {
        trace!("{}: {change:?}", self.name);
        let control = self
            .control
            .as_ref()
            .ok_or_else(|| self.closed())?;
        // A device that stopped listening for control lines is not an error.
        let _ = control.send(change);
        Ok(())
    }
}

impl Port for MemoryPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.signal(ControlChange::Dtr(level))
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        self.signal(ControlChange::Rts(level))
    }

    fn clear_buffers(&mut self) -> Result<()> {
        let rx = self.rx.as_ref().ok_or_else(|| self.closed())?;
        let dropped = rx.try_iter().count();
        trace!("{}: cleared {dropped} pending bytes", self.name);
        Ok(())
    }

    fn try_clone_reader(&mut self) -> Result<Box<dyn Read + Send>> {
        let rx = self
            .rx
            .clone()
            .ok_or_else(|| self.closed())?;
        Ok(Box::new(MemoryReader { rx }))
    }

    fn close(&mut self) -> Result<()> {
        self.tx = None;
        self.rx = None;
        self.control = None;
        Ok(())
    }
}

impl Write for MemoryPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed"))?;
        for b in buf {
            tx.send(*b)
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "device gone"))?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Read half handed to the classifier.
struct MemoryReader {
    rx: Receiver<u8>,
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let first = match self.rx.recv_timeout(READ_POLL) {
            Ok(b) => b,
            Err(RecvTimeoutError::Timeout) => {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            },
            Err(RecvTimeoutError::Disconnected) => {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"));
            },
        };
        buf[0] = first;
        let mut n = 1;
        while n < buf.len() {
            match self.rx.try_recv() {
                Ok(b) => {
                    buf[n] = b;
                    n += 1;
                },
                Err(_) => break,
            }
        }
        Ok(n)
    }
}

/// Board end of an in-process transport.
///
/// Dropping the device simulates pulling the cable.
#[derive(Debug)]
pub struct MemoryDevice {
    rx: Receiver<u8>,
    tx: Sender<u8>,
    control: Receiver<ControlChange>,
}

impl MemoryDevice {
    /// Send bytes to the host. Ignored once the host has closed.
    pub fn write(&self, bytes: &[u8]) {
        for b in bytes {
            if self.tx.send(*b).is_err() {
                return;
            }
        }
    }

    /// Send text followed by CRLF.
    pub fn write_line(&self, line: &str) {
        self.write(line.as_bytes());
        self.write(b"\r\n");
    }

    /// Read one byte written by the host.
    pub fn read_byte(&self, timeout: Duration) -> Option<u8> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Read exactly `len` bytes, giving up after `timeout` overall.
    pub fn read_exact(&self, len: usize, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            let left = deadline.checked_duration_since(Instant::now())?;
            out.push(self.rx.recv_timeout(left).ok()?);
        }
        Some(out)
    }

    /// Read until `terminator`, returning the bytes before it.
    pub fn read_until(&self, terminator: u8, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::new();
        loop {
            let left = deadline.checked_duration_since(Instant::now())?;
            match self.rx.recv_timeout(left).ok()? {
                b if b == terminator => return Some(out),
                b => out.push(b),
            }
        }
    }

    /// Read a host line ended by `\r`; a following `\n` is left queued.
    pub fn read_line(&self, timeout: Duration) -> Option<String> {
        self.read_until(b'\r', timeout)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Drop everything the host has written so far.
    pub fn drain(&self) -> Vec<u8> {
        self.rx.try_iter().collect()
    }

    /// Wait for the next control line change.
    pub fn next_control(&self, timeout: Duration) -> Option<ControlChange> {
        self.control.recv_timeout(timeout).ok()
    }

    /// Control line changes seen so far that were not yet consumed.
    pub fn control_changes(&self) -> Vec<ControlChange> {
        self.control.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(500);

    #[test]
    fn test_host_to_device() {
        let (mut port, device) = memory_pair("mem0");
        port.write_all_bytes(b"os.ls(\"/\")\r\n").unwrap();
        assert_eq!(device.read_line(WAIT).unwrap(), "os.ls(\"/\")");
        assert_eq!(device.read_byte(WAIT), Some(b'\n'));
    }

    #[test]
    fn test_device_to_host_reader() {
        let (mut port, device) = memory_pair("mem0");
        let mut reader = port.try_clone_reader().unwrap();
        device.write_line("ok");
        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ok\r\n");
    }

    #[test]
    fn test_reader_times_out_without_data() {
        let (mut port, _device) = memory_pair("mem0");
        let mut reader = port.try_clone_reader().unwrap();
        let err = reader.read(&mut [0u8; 4]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_clear_buffers_discards_pending_input() {
        let (mut port, device) = memory_pair("mem0");
        let mut reader = port.try_clone_reader().unwrap();
        device.write_line("stale");
        port.clear_buffers().unwrap();
        let err = reader.read(&mut [0u8; 8]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        port.close().unwrap();
        assert!(matches!(port.clear_buffers(), Err(Error::Disconnected(_))));
    }

    #[test]
    fn test_reader_reports_dropped_device() {
        let (mut port, device) = memory_pair("mem0");
        let mut reader = port.try_clone_reader().unwrap();
        drop(device);
        let err = reader.read(&mut [0u8; 4]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_control_lines_are_observed() {
        let (mut port, device) = memory_pair("mem0");
        port.apply_control_state(true, false).unwrap();
        assert_eq!(
            device.control_changes(),
            vec![ControlChange::Rts(true), ControlChange::Dtr(false)]
        );
    }

    #[test]
    fn test_closed_port_rejects_io() {
        let (mut port, _device) = memory_pair("mem0");
        port.close().unwrap();
        assert!(port.write_all_bytes(b"x").is_err());
        assert!(matches!(port.set_rts(true), Err(Error::Disconnected(_))));
        assert!(port.try_clone_reader().is_err());
    }
}
