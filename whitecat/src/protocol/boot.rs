//! Hardware reset and boot console classification.
//!
//! After the EN line is pulsed the board prints its ROM and bootloader
//! banners, then Lua RTOS starts. Sending EOT when the Lua RTOS banner
//! appears aborts the boot scripts and drops the board into the shell.

use crate::error::{Error, Result};
use crate::event::{Event, EventSink};
use crate::link::RxQueue;
use crate::port::Port;
use log::{debug, info, trace, warn};
use regex::Regex;
use std::sync::LazyLock;
use std::thread;
use std::time::{Duration, Instant};

/// Control byte that interrupts the boot scripts.
pub const EOT: u8 = 0x04;

/// Fallback/flash-read failures tolerated before the flash is declared bad.
pub const MAX_FLASH_FAILURES: u32 = 4;

static BAD_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"boot: Failed to verify app image").expect("invalid regex"));
static NO_APP_PARTITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"boot: No bootable app partitions in the partition table").expect("invalid regex")
});
static FALLBACK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Falling back to built-in command interpreter.$").expect("invalid regex")
});
static FLASH_READ_ERR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^flash read err,.*$").expect("invalid regex"));
static BANNER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Booting Lua RTOS...").expect("invalid regex"));
static SCRIPTS_ABORTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Lua RTOS-boot-scripts-aborted-ESP32$").expect("invalid regex")
});

/// How a boot attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootOutcome {
    /// The shell is up.
    Ready,
    /// The bootloader rejected the application image.
    CorruptedFirmware,
    /// Repeated flash read failures.
    FlashError,
}

impl BootOutcome {
    /// Whether the shell is usable.
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }

    /// Text of the `boardUpdate` notification for a failed boot.
    pub fn update_message(self) -> Option<&'static str> {
        match self {
            Self::Ready => None,
            Self::CorruptedFirmware => Some("Corrupted firmware"),
            Self::FlashError => Some("Flash error"),
        }
    }
}

/// What to do after a boot line was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStep {
    /// Keep reading.
    Continue,
    /// Send [`EOT`], then keep reading.
    Interrupt,
    /// Boot classification is final.
    Done(BootOutcome),
}

/// Line-by-line boot output classifier.
#[derive(Debug, Default)]
pub struct BootWatcher {
    flash_failures: u32,
}

impl BootWatcher {
    /// Fresh watcher with no failures counted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flash failures counted so far.
    pub fn flash_failures(&self) -> u32 {
        self.flash_failures
    }

    /// Classify one boot console line.
    pub fn observe(&mut self, line: &str) -> BootStep {
        if BAD_IMAGE.is_match(line) || NO_APP_PARTITION.is_match(line) {
            return BootStep::Done(BootOutcome::CorruptedFirmware);
        }

        if FALLBACK.is_match(line) || FLASH_READ_ERR.is_match(line) {
            self.flash_failures += 1;
            trace!("flash failure {} on {line:?}", self.flash_failures);
            if self.flash_failures > MAX_FLASH_FAILURES {
                return BootStep::Done(BootOutcome::FlashError);
            }
            return BootStep::Continue;
        }

        if BANNER.is_match(line) {
            return BootStep::Interrupt;
        }

        if SCRIPTS_ABORTED.is_match(line) {
            return BootStep::Done(BootOutcome::Ready);
        }

        BootStep::Continue
    }
}

/// Pulse RTS: deassert, assert, hold, deassert, hold.
pub fn pulse_reset(port: &mut dyn Port, pulse: Duration) -> Result<()> {
    debug!("pulsing reset on {}", port.name());
    port.set_rts(false)?;
    port.set_rts(true)?;
    thread::sleep(pulse);
    port.set_rts(false)?;
    thread::sleep(pulse);
    Ok(())
}

/// Read one CRLF line, failing once `deadline` passes.
fn read_line_before(rx: &mut RxQueue, deadline: Instant, bound: Duration) -> Result<String> {
    let mut line = Vec::new();
    loop {
        let left = deadline
            .checked_duration_since(Instant::now())
            .filter(|left| !left.is_zero())
            .ok_or_else(|| not_ready(bound))?;
        rx.set_timeout(Some(left));
        match rx.read_byte() {
            Ok(b'\n') => break,
            Ok(b'\r') => {},
            Ok(b) => line.push(b),
            Err(Error::Timeout(_)) => return Err(not_ready(bound)),
            Err(e) => return Err(e),
        }
    }
    let line = String::from_utf8_lossy(&line).into_owned();
    trace!("boot << {line}");
    Ok(line)
}

fn not_ready(bound: Duration) -> Error {
    Error::Timeout(format!("board not ready within {} ms", bound.as_millis()))
}

/// Scan boot output until the board is ready or its firmware is known bad.
///
/// A bad firmware outcome is returned, not raised, after exactly one
/// `boardUpdate` notification. Running out of time is an error.
pub fn wait_for_ready(
    port: &mut dyn Port,
    rx: &mut RxQueue,
    bound: Duration,
    sink: &dyn EventSink,
) -> Result<BootOutcome> {
    info!("waiting for board ...");
    let deadline = Instant::now() + bound;
    let mut watcher = BootWatcher::new();

    loop {
        if crate::is_interrupted_requested() {
            return Err(Error::Interrupted);
        }
        let line = read_line_before(rx, deadline, bound)?;
        match watcher.observe(&line) {
            BootStep::Continue => {},
            BootStep::Interrupt => {
                debug!("boot banner seen, aborting boot scripts");
                port.write_all_bytes(&[EOT])?;
            },
            BootStep::Done(outcome) => {
                if let Some(message) = outcome.update_message() {
                    warn!("{message}");
                    sink.notify(&Event::BoardUpdate(message.to_string()));
                }
                return Ok(outcome);
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::CollectingSink;
    use crate::link::delivery_queue;
    use crate::port::{ControlChange, memory_pair};

    fn queue(board_output: &[u8]) -> RxQueue {
        let (tx, rx) = delivery_queue(4096);
        for b in board_output {
            tx.send(*b).unwrap();
        }
        std::mem::forget(tx);
        rx
    }

    #[test]
    fn test_watcher_ready_sequence() {
        let mut w = BootWatcher::new();
        assert_eq!(w.observe("ets Jun  8 2016 00:22:57"), BootStep::Continue);
        assert_eq!(w.observe("Booting Lua RTOS..."), BootStep::Interrupt);
        assert_eq!(
            w.observe("Lua RTOS-boot-scripts-aborted-ESP32"),
            BootStep::Done(BootOutcome::Ready)
        );
    }

    #[test]
    fn test_watcher_corrupted_firmware() {
        let mut w = BootWatcher::new();
        assert_eq!(
            w.observe("E (523) boot: Failed to verify app image @ 0x10000 (-1)"),
            BootStep::Done(BootOutcome::CorruptedFirmware)
        );
        assert_eq!(
            w.observe("E (60) boot: No bootable app partitions in the partition table"),
            BootStep::Done(BootOutcome::CorruptedFirmware)
        );
    }

    #[test]
    fn test_watcher_counts_flash_failures() {
        let mut w = BootWatcher::new();
        for _ in 0..MAX_FLASH_FAILURES {
            assert_eq!(w.observe("flash read err, 1000"), BootStep::Continue);
        }
        assert_eq!(w.flash_failures(), MAX_FLASH_FAILURES);
        assert_eq!(
            w.observe("Falling back to built-in command interpreter."),
            BootStep::Done(BootOutcome::FlashError)
        );
    }

    #[test]
    fn test_ready_marker_must_match_whole_line() {
        let mut w = BootWatcher::new();
        assert_eq!(w.observe("x Lua RTOS-boot-scripts-aborted-ESP32"), BootStep::Continue);
    }

    #[test]
    fn test_wait_for_ready_sends_eot() {
        let (mut port, device) = memory_pair("mem0");
        let mut rx = queue(b"rst:0x1 (POWERON_RESET),boot:0x13\r\nBooting Lua RTOS...\r\nLua RTOS-boot-scripts-aborted-ESP32\r\n");
        let sink = CollectingSink::new();

        let outcome = wait_for_ready(&mut port, &mut rx, Duration::from_secs(1), &sink).unwrap();

        assert_eq!(outcome, BootOutcome::Ready);
        assert_eq!(device.drain(), vec![EOT]);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_wait_for_ready_flash_error_notifies_once() {
        let (mut port, _device) = memory_pair("mem0");
        let mut rx = queue(&b"flash read err, 1000\r\n".repeat(5));
        let sink = CollectingSink::new();

        let outcome = wait_for_ready(&mut port, &mut rx, Duration::from_secs(1), &sink).unwrap();

        assert_eq!(outcome, BootOutcome::FlashError);
        assert_eq!(sink.events(), vec![Event::BoardUpdate("Flash error".into())]);
    }

    #[test]
    fn test_wait_for_ready_corrupted_firmware() {
        let (mut port, _device) = memory_pair("mem0");
        let mut rx = queue(b"E (523) boot: Failed to verify app image @ 0x10000 (-1)\r\n");
        let sink = CollectingSink::new();

        let outcome = wait_for_ready(&mut port, &mut rx, Duration::from_secs(1), &sink).unwrap();

        assert_eq!(outcome, BootOutcome::CorruptedFirmware);
        assert_eq!(sink.events_of("boardUpdate").len(), 1);
    }

    #[test]
    fn test_wait_for_ready_times_out_on_chatter() {
        let (mut port, _device) = memory_pair("mem0");
        let mut rx = queue(b"ets Jun  8 2016\r\npartial line without end");
        let sink = CollectingSink::new();
        let start = Instant::now();

        let err = wait_for_ready(&mut port, &mut rx, Duration::from_millis(100), &sink).unwrap_err();

        assert!(matches!(err, Error::Timeout(_)));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_pulse_reset_order() {
        let (mut port, device) = memory_pair("mem0");
        pulse_reset(&mut port, Duration::from_millis(1)).unwrap();
        assert_eq!(
            device.control_changes(),
            vec![
                ControlChange::Rts(false),
                ControlChange::Rts(true),
                ControlChange::Rts(false)
            ]
        );
    }
}
