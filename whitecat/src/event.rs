//! Structured board events and the sinks that receive them.
//!
//! Events are fire-and-forget: the engine hands each one to an [`EventSink`]
//! and never stores it. The sink also receives the raw console bytes while
//! console relay is enabled.
//!
//! ## Wire names
//!
//! ```text
//! boardPowerOnReset   boardSoftwareReset   boardDeepSleepReset
//! blockStart          blockEnd             blockError
//! boardRuntimeWarning boardRuntimeError    progress
//! boardUpdate         boardAttached
//! ```

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;
use std::sync::Mutex;

/// Encode arbitrary text for inclusion in an event payload.
pub fn encode_text(text: &str) -> String {
    STANDARD.encode(text.as_bytes())
}

/// Location and message of a runtime error or warning reported by a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeFault {
    /// Script path the fault was raised in.
    #[serde(rename = "where")]
    pub location: String,
    /// Line number, as printed by the board (may be empty).
    pub line: String,
    /// Exception code, `"0"` when the board printed none.
    pub exception: String,
    /// Base64-encoded message text.
    pub message: String,
}

/// Transfer progress for a file moving to or from the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    /// Board-side path, when known.
    pub path: String,
    /// Bytes moved so far.
    pub done: usize,
    /// Total bytes, when known (uploads only).
    pub total: Option<usize>,
}

/// One structured notification derived from the board's console or from
/// a session operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `rst:... (POWERON_RESET),boot:...`
    PowerOnReset,
    /// `rst:... (SW_CPU_RESET),boot:...`
    SoftwareReset,
    /// `rst:... (DEEPSLEEP_RESET),boot...`
    DeepSleepReset,
    /// `<blockStart,id>` marker; id is base64-encoded.
    BlockStart {
        /// Encoded block id.
        block: String,
    },
    /// `<blockEnd,id>` marker; id is base64-encoded.
    BlockEnd {
        /// Encoded block id.
        block: String,
    },
    /// `<blockError,id,error>` marker; both fields base64-encoded.
    BlockError {
        /// Encoded block id.
        block: String,
        /// Encoded error text.
        error: String,
    },
    /// Script printed a `WARNING ...` message.
    RuntimeWarning(RuntimeFault),
    /// Script raised an error.
    RuntimeError(RuntimeFault),
    /// File transfer progress.
    Progress(Progress),
    /// Firmware status change (corrupted image, flash error).
    BoardUpdate(String),
    /// A board finished attaching.
    BoardAttached,
}

#[derive(Serialize)]
struct BlockPayload<'a> {
    block: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

impl Event {
    /// Wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PowerOnReset => "boardPowerOnReset",
            Self::SoftwareReset => "boardSoftwareReset",
            Self::DeepSleepReset => "boardDeepSleepReset",
            Self::BlockStart { .. } => "blockStart",
            Self::BlockEnd { .. } => "blockEnd",
            Self::BlockError { .. } => "blockError",
            Self::RuntimeWarning(_) => "boardRuntimeWarning",
            Self::RuntimeError(_) => "boardRuntimeError",
            Self::Progress(_) => "progress",
            Self::BoardUpdate(_) => "boardUpdate",
            Self::BoardAttached => "boardAttached",
        }
    }

    /// Kind-specific payload text.
    ///
    /// Structured events render as a JSON object, progress and board updates
    /// as human text, and resets / attach as an empty string.
    pub fn payload(&self) -> String {
        match self {
            Self::PowerOnReset | Self::SoftwareReset | Self::DeepSleepReset | Self::BoardAttached => {
                String::new()
            },
            Self::BlockStart { block } | Self::BlockEnd { block } => to_json(&BlockPayload {
                block,
                error: None,
            }),
            Self::BlockError { block, error } => to_json(&BlockPayload {
                block,
                error: Some(error),
            }),
            Self::RuntimeWarning(fault) | Self::RuntimeError(fault) => to_json(fault),
            Self::Progress(progress) => progress.to_string(),
            Self::BoardUpdate(text) => text.clone(),
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.total {
            Some(total) => write!(f, "{} of {} bytes sent ({}) ...", self.done, total, self.path),
            None => write!(f, "{} bytes received ({}) ...", self.done, self.path),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let payload = self.payload();
        if payload.is_empty() {
            write!(f, "{}", self.kind())
        } else {
            write!(f, "{}: {}", self.kind(), payload)
        }
    }
}

/// Receiver of board events and relayed console output.
///
/// Calls come from both the background classifier thread and the
/// foreground caller, so implementations must be cheap and must not block.
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    fn notify(&self, event: &Event);

    /// Deliver console bytes while console relay is enabled.
    fn console(&self, _bytes: &[u8]) {}
}

/// Sink that writes events to the `log` facade and drops console output.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn notify(&self, event: &Event) {
        match event {
            Event::RuntimeError(_) | Event::BoardUpdate(_) => warn!("{event}"),
            Event::Progress(_) => debug!("{event}"),
            _ => info!("{event}"),
        }
    }
}

/// Sink that records everything it receives.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<Event>>,
    console: Mutex<Vec<u8>>,
}

impl CollectingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far.
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Events of the given wire kind.
    pub fn events_of(&self, kind: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind() == kind)
            .collect()
    }

    /// Snapshot of the console bytes received so far.
    pub fn console_bytes(&self) -> Vec<u8> {
        self.console
            .lock()
            .map(|bytes| bytes.clone())
            .unwrap_or_default()
    }
}

impl EventSink for CollectingSink {
    fn notify(&self, event: &Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }

    fn console(&self, bytes: &[u8]) {
        if let Ok(mut console) = self.console.lock() {
            console.extend_from_slice(bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_text_standard_alphabet() {
        assert_eq!(encode_text("attempt to call a nil value"), "YXR0ZW1wdCB0byBjYWxsIGEgbmlsIHZhbHVl");
        assert_eq!(encode_text(""), "");
    }

    #[test]
    fn test_reset_payload_is_empty() {
        assert_eq!(Event::PowerOnReset.kind(), "boardPowerOnReset");
        assert_eq!(Event::PowerOnReset.payload(), "");
        assert_eq!(Event::BoardAttached.to_string(), "boardAttached");
    }

    #[test]
    fn test_runtime_fault_payload_uses_where_key() {
        let event = Event::RuntimeError(RuntimeFault {
            location: "main.lua".into(),
            line: "12".into(),
            exception: "5".into(),
            message: encode_text("boom"),
        });
        let value: serde_json::Value = serde_json::from_str(&event.payload()).unwrap();
        assert_eq!(value["where"], "main.lua");
        assert_eq!(value["line"], "12");
        assert_eq!(value["exception"], "5");
        assert_eq!(value["message"], "Ym9vbQ==");
    }

    #[test]
    fn test_block_error_payload_has_both_fields() {
        let event = Event::BlockError {
            block: encode_text("b1"),
            error: encode_text("bad"),
        };
        let value: serde_json::Value = serde_json::from_str(&event.payload()).unwrap();
        assert_eq!(value["block"], "YjE=");
        assert_eq!(value["error"], "YmFk");

        let start = Event::BlockStart {
            block: encode_text("b1"),
        };
        assert_eq!(start.payload(), r#"{"block":"YjE="}"#);
    }

    #[test]
    fn test_progress_text() {
        let up = Progress {
            path: "/main.lua".into(),
            done: 255,
            total: Some(1000),
        };
        assert_eq!(up.to_string(), "255 of 1000 bytes sent (/main.lua) ...");

        let down = Progress {
            path: "/main.lua".into(),
            done: 10,
            total: None,
        };
        assert_eq!(down.to_string(), "10 bytes received (/main.lua) ...");
    }

    #[test]
    fn test_collecting_sink_records() {
        let sink = CollectingSink::new();
        sink.notify(&Event::SoftwareReset);
        sink.console(b"abc");
        sink.console(b"\n");
        assert_eq!(sink.events(), vec![Event::SoftwareReset]);
        assert_eq!(sink.events_of("boardSoftwareReset").len(), 1);
        assert_eq!(sink.console_bytes(), b"abc\n");
    }
}
