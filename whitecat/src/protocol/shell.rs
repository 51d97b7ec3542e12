//! Request/response exchange with the Lua RTOS shell.
//!
//! ```text
//! host  ──▶  os.ls("/")\r\n
//! board ◀──  os.ls("/")\r\n          echo
//! board ◀──  f\t120\t...\tmain.lua\r\n
//! board ◀──  / > \r\n                prompt ends the response
//! ```

use crate::error::Result;
use crate::link::RxQueue;
use crate::port::Port;
use log::{debug, trace, warn};
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

static PROMPT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^/.*>.*$").expect("invalid regex"));

/// Board model query.
pub const BOARD_COMMAND: &str = "os.board()";

/// Firmware commit query.
pub const COMMIT_COMMAND: &str = "do local commit; _, _, _, commit = os.version();print(commit);end";

/// Turns the interactive line editor off so echoes come back verbatim.
pub const PLAIN_SHELL_COMMAND: &str = "os.shell(false)";

/// Whether `line` is a shell prompt (`/` ... `>`).
pub fn is_prompt(line: &str) -> bool {
    PROMPT.is_match(line)
}

/// Lua string literal for a board path.
pub fn quote_path(path: &str) -> String {
    let mut quoted = String::with_capacity(path.len() + 2);
    quoted.push('"');
    for c in path.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Directory listing command for `path`.
pub fn list_command(path: &str) -> String {
    format!("os.ls({})", quote_path(path))
}

/// Send one command line and collect the response up to the next prompt.
///
/// The caller owns mode and timeout. A command the shell did not echo back
/// yields an empty response, the same as a command that printed nothing.
pub fn send_command(port: &mut dyn Port, rx: &mut RxQueue, command: &str) -> Result<String> {
    debug!("send command {command:?}");
    port.write_all_bytes(format!("{command}\r\n").as_bytes())?;

    let echo = rx.read_line_crlf()?;
    if echo != command {
        warn!("command {command:?} not echoed, board sent {echo:?}");
        return Ok(String::new());
    }

    let mut response = String::new();
    loop {
        let line = rx.read_line_crlf()?;
        if is_prompt(&line) {
            trace!("prompt {line:?}");
            return Ok(response);
        }
        if !response.is_empty() {
            response.push_str("\r\n");
        }
        response.push_str(&line);
    }
}

/// One record of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    /// `f` for files, `d` for directories.
    #[serde(rename = "type")]
    pub kind: String,
    /// Size as printed by the board.
    pub size: String,
    /// Modification date as printed by the board.
    pub date: String,
    /// Entry name.
    pub name: String,
}

/// Parse `type\tsize\tdate\tname` records, skipping anything else.
pub fn parse_listing(response: &str) -> Vec<DirEntry> {
    response
        .split('\n')
        .filter_map(|line| {
            let line = line.replace('\r', "");
            let fields: Vec<&str> = line.split('\t').collect();
            match fields.as_slice() {
                [kind, size, date, name] => Some(DirEntry {
                    kind: (*kind).to_string(),
                    size: (*size).to_string(),
                    date: (*date).to_string(),
                    name: (*name).to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}

/// Render a listing response as a JSON array text.
pub fn format_listing(response: &str) -> String {
    serde_json::to_string(&parse_listing(response)).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::link::delivery_queue;
    use crate::port::{MemoryDevice, memory_pair};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_millis(500);

    fn rig(board_output: &[u8]) -> (crate::port::MemoryPort, MemoryDevice, RxQueue) {
        let (port, device) = memory_pair("mem0");
        let (tx, mut rx) = delivery_queue(1024);
        for b in board_output {
            tx.send(*b).unwrap();
        }
        std::mem::forget(tx);
        rx.set_timeout(Some(Duration::from_millis(100)));
        (port, device, rx)
    }

    #[test]
    fn test_is_prompt() {
        assert!(is_prompt("/ > "));
        assert!(is_prompt("/examples > "));
        assert!(!is_prompt("main.lua"));
        assert!(!is_prompt("> /"));
    }

    #[test]
    fn test_quote_path() {
        assert_eq!(quote_path("/main.lua"), "\"/main.lua\"");
        assert_eq!(quote_path("/a\"b"), "\"/a\\\"b\"");
        assert_eq!(list_command("/"), "os.ls(\"/\")");
    }

    #[test]
    fn test_send_command_collects_until_prompt() {
        let (mut port, device, mut rx) = rig(b"os.board()\r\nN1ESP32\r\nsecond\r\n/ > \r\n");
        let response = send_command(&mut port, &mut rx, BOARD_COMMAND).unwrap();
        assert_eq!(response, "N1ESP32\r\nsecond");
        assert_eq!(device.read_line(WAIT).unwrap(), "os.board()");
    }

    #[test]
    fn test_send_command_without_output() {
        let (mut port, _device, mut rx) = rig(b"x = 1\r\n/ > \r\n");
        assert_eq!(send_command(&mut port, &mut rx, "x = 1").unwrap(), "");
    }

    #[test]
    fn test_send_command_echo_mismatch_is_empty() {
        let (mut port, _device, mut rx) = rig(b"garbage\r\nmore\r\n/ > \r\n");
        assert_eq!(send_command(&mut port, &mut rx, "os.board()").unwrap(), "");
    }

    #[test]
    fn test_send_command_times_out_without_prompt() {
        let (mut port, _device, mut rx) = rig(b"os.board()\r\nN1ESP32\r\n");
        assert!(matches!(
            send_command(&mut port, &mut rx, "os.board()"),
            Err(Error::Timeout(_))
        ));
    }

    #[test]
    fn test_format_listing_single_entry() {
        assert_eq!(
            format_listing("f\t120\t2020-01-01\tmain.lua\n"),
            r#"[{"type":"f","size":"120","date":"2020-01-01","name":"main.lua"}]"#
        );
    }

    #[test]
    fn test_format_listing_drops_malformed_lines() {
        let response = "d\t0\t2020-01-01\tlib\r\nnot a record\r\nf\t1\t2\r\nf\t9\t2020-02-02\tboot.lua";
        let entries = parse_listing(response);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, "d");
        assert_eq!(entries[1].name, "boot.lua");
    }

    #[test]
    fn test_format_listing_empty() {
        assert_eq!(format_listing(""), "[]");
    }
}
