//! Background stream classifier.
//!
//! One thread owns the read side of the transport for the whole life of a
//! session. It reassembles console lines, turns recognised lines into
//! [`Event`]s, and forwards every byte to the console sink and/or the
//! delivery queue according to [`LinkFlags`].
//!
//! ```text
//!  transport ──read──▶ classifier ──┬──▶ EventSink::notify   (per line)
//!                                   ├──▶ EventSink::console  (console_out)
//!                                   └──▶ delivery queue      (capture_in)
//! ```

use crate::error::{Error, Result};
use crate::event::{Event, EventSink, RuntimeFault, encode_text};
use crate::link::LinkFlags;
use crossbeam::channel::{SendTimeoutError, Sender};
use log::{debug, error, trace, warn};
use regex::Regex;
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Longest line kept in the accumulator; longer runs without `\n` are dropped.
const MAX_LINE_LEN: usize = 4096;

/// How often a blocked enqueue re-checks for shutdown.
const ENQUEUE_POLL: Duration = Duration::from_millis(100);

static POWER_ON_RESET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^rst:.*\(POWERON_RESET\),boot:").expect("invalid regex"));
static SOFTWARE_RESET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^rst:.*SW_CPU_RESET\),boot:").expect("invalid regex"));
static DEEP_SLEEP_RESET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^rst:.*DEEPSLEEP_RESET\),boot").expect("invalid regex"));
static BLOCK_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<blockStart,(?P<block>.*)>").expect("invalid regex"));
static BLOCK_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<blockEnd,(?P<block>.*)>").expect("invalid regex"));
static BLOCK_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<blockError,(?P<block>.*),(?P<error>.*)>").expect("invalid regex")
});
static PROMPT_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/.*>\s").expect("invalid regex"));
static CODED_FAULT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<where>[/._\-a-zA-Z]*):(?P<line>\d*):\s(?P<code>\d*):\s*(?P<message>.*)$")
        .expect("invalid regex")
});
static PLAIN_FAULT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<where>[/._\-a-zA-Z]*):(?P<line>\d*):\s*(?P<message>.*)$")
        .expect("invalid regex")
});
static WARNING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^WARNING\s").expect("invalid regex"));

/// Classify one completed console line.
///
/// Patterns are tried in a fixed order and the first match wins, so every
/// line maps to at most one event.
pub fn classify_line(line: &str) -> Option<Event> {
    if POWER_ON_RESET.is_match(line) {
        return Some(Event::PowerOnReset);
    }
    if SOFTWARE_RESET.is_match(line) {
        return Some(Event::SoftwareReset);
    }
    if DEEP_SLEEP_RESET.is_match(line) {
        return Some(Event::DeepSleepReset);
    }
    if let Some(caps) = BLOCK_START.captures(line) {
        return Some(Event::BlockStart {
            block: encode_text(&caps["block"]),
        });
    }
    if let Some(caps) = BLOCK_END.captures(line) {
        return Some(Event::BlockEnd {
            block: encode_text(&caps["block"]),
        });
    }
    if let Some(caps) = BLOCK_ERROR.captures(line) {
        return Some(Event::BlockError {
            block: encode_text(&caps["block"]),
            error: encode_text(&caps["error"]),
        });
    }

    let line = PROMPT_PREFIX.replace(line, "");

    if let Some(caps) = CODED_FAULT.captures(&line) {
        return Some(runtime_fault(
            &caps["where"],
            &caps["line"],
            &caps["code"],
            &caps["message"],
        ));
    }
    if let Some(caps) = PLAIN_FAULT.captures(&line) {
        return Some(runtime_fault(&caps["where"], &caps["line"], "0", &caps["message"]));
    }

    None
}

fn runtime_fault(location: &str, line: &str, exception: &str, message: &str) -> Event {
    let fault = RuntimeFault {
        location: location.to_string(),
        line: line.to_string(),
        exception: exception.to_string(),
        message: encode_text(message),
    };
    if WARNING.is_match(message) {
        Event::RuntimeWarning(fault)
    } else {
        Event::RuntimeError(fault)
    }
}

/// Handle to a running classifier thread.
///
/// Dropping the handle stops the thread and waits for it.
pub struct ClassifierHandle {
    running: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ClassifierHandle {
    /// Whether the thread is still reading the transport.
    pub fn is_running(&self) -> bool {
        self.join
            .as_ref()
            .is_some_and(|join| !join.is_finished())
    }

    /// Ask the thread to stop and wait for it to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("classifier thread panicked");
            }
        }
    }
}

impl Drop for ClassifierHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Line reassembly, classification and byte forwarding for one transport.
pub struct StreamClassifier {
    flags: Arc<LinkFlags>,
    sink: Arc<dyn EventSink>,
    queue: Sender<u8>,
    running: Arc<AtomicBool>,
    line: Vec<u8>,
    discarding: bool,
    console: Vec<u8>,
}

impl StreamClassifier {
    /// Create a classifier that feeds `queue` and `sink`.
    pub fn new(flags: Arc<LinkFlags>, sink: Arc<dyn EventSink>, queue: Sender<u8>) -> Self {
        Self {
            flags,
            sink,
            queue,
            running: Arc::new(AtomicBool::new(true)),
            line: Vec::new(),
            discarding: false,
            console: Vec::new(),
        }
    }

    /// Start reading `reader` on a dedicated thread.
    pub fn spawn(self, reader: Box<dyn Read + Send>) -> Result<ClassifierHandle> {
        let running = Arc::clone(&self.running);
        let join = thread::Builder::new()
            .name("whitecat-classifier".into())
            .spawn(move || self.run(reader))
            .map_err(Error::Io)?;
        Ok(ClassifierHandle {
            running,
            join: Some(join),
        })
    }

    fn run(mut self, mut reader: Box<dyn Read + Send>) {
        debug!("start classifier ...");
        let mut buf = [0u8; 256];

        while self.running.load(Ordering::SeqCst) {
            match reader.read(&mut buf) {
                Ok(0) => {
                    warn!("transport reached end of stream");
                    break;
                },
                Ok(n) => {
                    let keep_going = buf[..n].iter().all(|b| self.feed(*b));
                    self.flush_console();
                    if !keep_going {
                        break;
                    }
                },
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {},
                Err(e) => {
                    if self.running.load(Ordering::SeqCst) {
                        error!("board disconnected: {e}");
                    }
                    break;
                },
            }
        }

        debug!("stop classifier ...");
    }

    /// Process one incoming byte. Returns `false` once forwarding is impossible.
    pub fn feed(&mut self, byte: u8) -> bool {
        match byte {
            b'\n' => self.finish_line(),
            b'\r' => {},
            _ if self.discarding => {},
            _ => {
                // Overlong lines are never classified; drop the rest of them.
                if self.line.len() >= MAX_LINE_LEN {
                    self.line.clear();
                    self.discarding = true;
                } else {
                    self.line.push(byte);
                }
            },
        }

        if self.flags.console_out() {
            self.console.push(byte);
        }

        if self.flags.capture_in() {
            return self.enqueue(byte);
        }

        true
    }

    fn finish_line(&mut self) {
        if self.discarding {
            trace!("dropped line longer than {MAX_LINE_LEN} bytes");
            self.discarding = false;
        } else if self.flags.boot_notify() {
            let line = String::from_utf8_lossy(&self.line);
            if let Some(event) = classify_line(&line) {
                trace!("classified {line:?} as {}", event.kind());
                self.sink.notify(&event);
            }
        }
        self.line.clear();
    }

    fn flush_console(&mut self) {
        if !self.console.is_empty() {
            self.sink.console(&self.console);
            self.console.clear();
        }
    }

    fn enqueue(&mut self, byte: u8) -> bool {
        let mut pending = byte;
        loop {
            match self.queue.send_timeout(pending, ENQUEUE_POLL) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(b)) => {
                    if !self.running.load(Ordering::SeqCst) {
                        return false;
                    }
                    pending = b;
                },
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }
}
