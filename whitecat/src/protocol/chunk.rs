//! Chunked file transfer riding on the shell's command channel.
//!
//! ## Framing
//!
//! ```text
//! +-----+------------------+
//! | LEN |   DATA (LEN)     |      LEN = 0 ends the transfer
//! +-----+------------------+
//! | 1   |   0..=255        |
//! +-----+------------------+
//! ```
//!
//! ## Upload (`io.receive`)
//!
//! ```text
//! host  ──▶ io.receive("/f")\r
//! board ◀── io.receive("/f")\r        echo
//! board ◀── C\r\n                     chunk request
//! host  ──▶ LEN DATA                  ... repeated, then LEN = 0
//! board ◀── true\r\n                  acknowledgment
//! ```
//!
//! ## Download (`io.send`)
//!
//! ```text
//! host  ──▶ io.send("/f")\r
//! board ◀── io.send("/f")\r\n         echo
//! host  ──▶ C\n                       chunk request
//! board ◀── LEN DATA                  ... repeated until LEN = 0
//! ```

use crate::error::{Error, Result};
use crate::event::Progress;
use crate::link::RxQueue;
use crate::port::Port;
use crate::protocol::shell::quote_path;
use log::{debug, trace};

/// Largest chunk a one-byte length prefix can describe.
pub const MAX_CHUNK_SIZE: u8 = u8::MAX;

/// Line the board sends to ask for the next upload chunk.
pub const CHUNK_REQUEST_LINE: &str = "C";

/// Bytes the host sends to ask for the next download chunk.
pub const CHUNK_REQUEST: &[u8] = b"C\n";

/// Line the board sends once an upload is stored.
pub const UPLOAD_ACK: &str = "true";

/// Length of the next chunk: `min(chunk_size, remaining)`, 0 once exhausted.
pub fn next_chunk_len(chunk_size: u8, remaining: usize) -> u8 {
    u8::try_from(remaining).map_or(chunk_size, |r| r.min(chunk_size))
}

/// Upload command for `path`.
pub fn receive_command(path: &str) -> String {
    format!("io.receive({})", quote_path(path))
}

/// Download command for `path`.
pub fn send_command(path: &str) -> String {
    format!("io.send({})", quote_path(path))
}

fn check_interrupted() -> Result<()> {
    if crate::is_interrupted_requested() {
        return Err(Error::Interrupted);
    }
    Ok(())
}

/// Write `data` to `path` on the board.
///
/// The caller owns mode and timeout. A failure part way through leaves a
/// truncated file on the board.
pub fn send_file(
    port: &mut dyn Port,
    rx: &mut RxQueue,
    path: &str,
    data: &[u8],
    chunk_size: u8,
    progress: &mut dyn FnMut(Progress),
) -> Result<()> {
    let chunk_size = chunk_size.max(1);
    let command = receive_command(path);
    let total = data.len();
    let mut sent = 0usize;

    debug!("upload {total} bytes to {path} in chunks of {chunk_size}");
    progress(Progress {
        path: path.to_string(),
        done: 0,
        total: Some(total),
    });

    port.write_all_bytes(format!("{command}\r").as_bytes())?;
    let echo = rx.read_line_cr()?;
    if echo != command {
        return Err(Error::mismatch(command, echo));
    }

    loop {
        let line = rx.read_line_crlf()?;
        if line != CHUNK_REQUEST_LINE {
            trace!("skipping {line:?} while waiting for chunk request");
            continue;
        }
        check_interrupted()?;

        let len = next_chunk_len(chunk_size, total - sent);
        port.write_all_bytes(&[len])?;
        if len == 0 {
            break;
        }

        let end = sent + usize::from(len);
        port.write_all_bytes(&data[sent..end])?;
        sent = end;
        trace!("sent chunk of {len} bytes ({sent}/{total})");
        progress(Progress {
            path: path.to_string(),
            done: sent,
            total: Some(total),
        });
    }

    let ack = rx.read_line_crlf()?;
    if ack != UPLOAD_ACK {
        return Err(Error::mismatch(UPLOAD_ACK, ack));
    }

    debug!("upload of {path} acknowledged");
    Ok(())
}

/// Read `path` from the board.
///
/// The caller owns mode and timeout.
pub fn receive_file(
    port: &mut dyn Port,
    rx: &mut RxQueue,
    path: &str,
    progress: &mut dyn FnMut(Progress),
) -> Result<Vec<u8>> {
    let command = send_command(path);
    let mut data = Vec::new();

    debug!("download {path}");
    progress(Progress {
        path: path.to_string(),
        done: 0,
        total: None,
    });

    port.write_all_bytes(format!("{command}\r").as_bytes())?;
    let echo = rx.read_line_crlf()?;
    if echo != command {
        return Err(Error::mismatch(command, echo));
    }

    loop {
        check_interrupted()?;
        port.write_all_bytes(CHUNK_REQUEST)?;

        let len = rx.read_byte()?;
        if len == 0 {
            break;
        }

        data.extend(rx.read_exact(usize::from(len))?);
        trace!("received chunk of {len} bytes ({} total)", data.len());
        progress(Progress {
            path: path.to_string(),
            done: data.len(),
            total: None,
        });
    }

    debug!("downloaded {} bytes from {path}", data.len());
    Ok(data)
}
