//! Board console command.
//!
//! The session's classifier relays console bytes through [`TerminalSink`];
//! this module forwards the keyboard the other way.
//!
//! - Ctrl+C: exit
//! - Ctrl+R: hardware reset, then back to the plain shell

use anyhow::{Context, Result};
use console::style;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::io::{self, IsTerminal, Write as _};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use whitecat::Session;
use whitecat::protocol::shell::PLAIN_SHELL_COMMAND;

use super::{TerminalSink, open_session};
use crate::config::Config;
use crate::{Cli, was_interrupted};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Status lines go to stderr on a fresh line so they never split board output.
fn print_status_line(message: &str, raw_mode: bool) {
    if raw_mode {
        eprint!("\r\x1b[2K{message}\r\n");
    } else {
        eprintln!("{message}");
    }
    io::stderr().flush().ok();
}

/// Bytes to send to the board for a key press, if any.
fn key_bytes(code: KeyCode, modifiers: KeyModifiers) -> Option<Vec<u8>> {
    match (code, modifiers) {
        (KeyCode::Enter, _) => Some(b"\r\n".to_vec()),
        (KeyCode::Char(c), KeyModifiers::NONE | KeyModifiers::SHIFT) => {
            let mut buf = [0u8; 4];
            Some(c.encode_utf8(&mut buf).as_bytes().to_vec())
        },
        (KeyCode::Backspace, _) => Some(vec![0x08]),
        (KeyCode::Tab, _) => Some(vec![0x09]),
        (KeyCode::Esc, _) => Some(vec![0x1B]),
        _ => None,
    }
}

fn ensure_link(session: &Session) -> Result<()> {
    if session.is_link_alive() {
        Ok(())
    } else {
        Err(whitecat::Error::Disconnected("board console closed".to_string()).into())
    }
}

fn reset_board(session: &mut Session, raw_mode: bool) -> Result<()> {
    print_status_line(&format!("{} Resetting board...", style("🔄").cyan()), raw_mode);
    let outcome = session.reset().context("Board did not come back after reset")?;
    match outcome.update_message() {
        None => {
            print_status_line(&format!("{} Board ready", style("✓").green()), raw_mode);
            session.write_raw(format!("{PLAIN_SHELL_COMMAND}\r\n").as_bytes())?;
        },
        Some(message) => {
            print_status_line(&format!("{} {message}", style("⚠").yellow()), raw_mode);
        },
    }
    Ok(())
}

/// Run the console until Ctrl+C or until the board goes away.
pub(crate) fn cmd_console(cli: &Cli, config: &mut Config, timestamp: bool) -> Result<()> {
    let sink = Arc::new(TerminalSink::with_console(cli.quiet, timestamp));
    let mut session = open_session(cli, config, sink)?;

    let interactive = io::stdin().is_terminal() && io::stdout().is_terminal();
    if !cli.quiet {
        let hint = if interactive {
            "Console open. Ctrl+C to exit, Ctrl+R to reset the board."
        } else {
            "Console open. Ctrl+C to exit."
        };
        print_status_line(&style(hint).dim().to_string(), false);
    }

    let result = if interactive {
        run_interactive(&mut session)
    } else {
        run_passive(&session)
    };

    session.detach();
    result
}

fn run_passive(session: &Session) -> Result<()> {
    while !was_interrupted() {
        ensure_link(session)?;
        thread::sleep(POLL_INTERVAL);
    }
    Ok(())
}

fn run_interactive(session: &mut Session) -> Result<()> {
    terminal::enable_raw_mode().context("Failed to enable raw terminal mode")?;
    let _raw_guard = RawModeGuard;

    loop {
        if was_interrupted() {
            break;
        }
        ensure_link(session)?;

        if !event::poll(POLL_INTERVAL)? {
            continue;
        }
        let Event::Key(KeyEvent {
            code,
            modifiers,
            kind,
            ..
        }) = event::read()?
        else {
            continue;
        };
        if kind == KeyEventKind::Release {
            continue;
        }

        match (code, modifiers) {
            (KeyCode::Char('c'), KeyModifiers::CONTROL) => break,
            (KeyCode::Char('r'), KeyModifiers::CONTROL) => reset_board(session, true)?,
            _ => {
                if let Some(bytes) = key_bytes(code, modifiers) {
                    session.write_raw(&bytes)?;
                }
            },
        }
    }

    print_status_line(&format!("{} Console closed", style("👋").cyan()), true);
    Ok(())
}

/// RAII guard to restore terminal mode on drop.
struct RawModeGuard;

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_bytes_printable_and_enter() {
        assert_eq!(key_bytes(KeyCode::Char('a'), KeyModifiers::NONE), Some(b"a".to_vec()));
        assert_eq!(key_bytes(KeyCode::Char('A'), KeyModifiers::SHIFT), Some(b"A".to_vec()));
        assert_eq!(key_bytes(KeyCode::Enter, KeyModifiers::NONE), Some(b"\r\n".to_vec()));
        assert_eq!(key_bytes(KeyCode::Char('é'), KeyModifiers::NONE), Some("é".as_bytes().to_vec()));
    }

    #[test]
    fn test_key_bytes_control_keys() {
        assert_eq!(key_bytes(KeyCode::Backspace, KeyModifiers::NONE), Some(vec![0x08]));
        assert_eq!(key_bytes(KeyCode::Tab, KeyModifiers::NONE), Some(vec![0x09]));
        assert_eq!(key_bytes(KeyCode::Esc, KeyModifiers::NONE), Some(vec![0x1B]));
        assert_eq!(key_bytes(KeyCode::Char('x'), KeyModifiers::CONTROL), None);
        assert_eq!(key_bytes(KeyCode::F(1), KeyModifiers::NONE), None);
    }
}
