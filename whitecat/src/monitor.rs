//! Console text helpers for relayed board output.

use std::fmt::Write as _;

/// Drain buffered bytes into displayable UTF-8 text without stalling on invalid bytes.
///
/// - Valid UTF-8 is emitted as-is.
/// - Invalid byte sequences emit the replacement char `�` and continue.
/// - Incomplete UTF-8 suffix is kept in `buffer` for the next read.
pub fn drain_utf8_lossy(buffer: &mut Vec<u8>) -> String {
    let mut output = String::new();

    loop {
        match std::str::from_utf8(buffer) {
            Ok(valid) => {
                output.push_str(valid);
                buffer.clear();
                break;
            },
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                output.push_str(&String::from_utf8_lossy(&buffer[..valid_up_to]));

                match err.error_len() {
                    Some(invalid_len) => {
                        output.push('\u{FFFD}');
                        let drain_to = valid_up_to.saturating_add(invalid_len).min(buffer.len());
                        buffer.drain(..drain_to);
                    },
                    None => {
                        buffer.drain(..valid_up_to);
                        break;
                    },
                }
            },
        }
    }

    output
}

/// Wall-clock prefix for timestamped console lines (UTC).
fn timestamp_prefix() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let total_secs = now.as_secs();
    let millis = now.subsec_millis();
    let hours = (total_secs / 3600) % 24;
    let minutes = (total_secs / 60) % 60;
    let seconds = total_secs % 60;
    format!("\x1b[90m[{hours:02}:{minutes:02}:{seconds:02}.{millis:03}]\x1b[0m ")
}

/// Turns relayed console bytes into terminal text.
///
/// Line endings are normalised to `\r\n` even when a CRLF pair is split
/// across two reads. Control characters other than tab and ESC are dropped.
#[derive(Debug, Default)]
pub struct ConsoleDecoder {
    pending: Vec<u8>,
    at_line_start: bool,
    after_cr: bool,
    timestamp: bool,
}

impl ConsoleDecoder {
    /// Decoder that optionally prefixes every line with a timestamp.
    pub fn new(timestamp: bool) -> Self {
        Self {
            pending: Vec::new(),
            at_line_start: true,
            after_cr: false,
            timestamp,
        }
    }

    /// Whether the next character starts a new line.
    pub fn at_line_start(&self) -> bool {
        self.at_line_start
    }

    /// Decode `bytes` and return the text to print.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let text = drain_utf8_lossy(&mut self.pending);

        let mut out = String::with_capacity(text.len() + 16);
        for c in text.chars() {
            match c {
                '\r' => {
                    self.newline(&mut out);
                    self.after_cr = true;
                },
                '\n' => {
                    if !self.after_cr {
                        self.newline(&mut out);
                    }
                    self.after_cr = false;
                },
                _ => {
                    self.after_cr = false;
                    if c.is_control() && c != '\t' && c != '\x1b' {
                        continue;
                    }
                    if self.at_line_start && self.timestamp {
                        let _ = write!(out, "{}", timestamp_prefix());
                    }
                    self.at_line_start = false;
                    out.push(c);
                },
            }
        }
        out
    }

    fn newline(&mut self, out: &mut String) {
        out.push_str("\r\n");
        self.at_line_start = true;
    }
}
