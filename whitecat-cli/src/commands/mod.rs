//! Command implementations.
//!
//! Each subcommand family lives in its own module; this module holds the
//! terminal event sink and session setup they share.

pub(crate) mod completions;
pub(crate) mod console;
pub(crate) mod files;
pub(crate) mod ports;
pub(crate) mod shell;

use anyhow::{Context, Result};
use ::console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, warn};
use std::io::{self, Write as _};
use std::sync::{Arc, Mutex};
use whitecat::{ConsoleDecoder, Event, EventSink, NativePort, SerialConfig, Session};

use crate::config::Config;
use crate::{Cli, get_port, resolve_baud, use_fancy_output};

/// Renders session events on the terminal.
///
/// Transfer progress drives an `indicatif` bar; relayed console output is
/// printed only when the sink was built for the console command.
pub(crate) struct TerminalSink {
    progress: Mutex<Option<ProgressBar>>,
    quiet: bool,
    console: Option<Mutex<ConsoleDecoder>>,
}

impl TerminalSink {
    /// Sink for file and shell commands.
    pub(crate) fn new(quiet: bool) -> Self {
        Self {
            progress: Mutex::new(None),
            quiet,
            console: None,
        }
    }

    /// Sink that also prints relayed console output.
    pub(crate) fn with_console(quiet: bool, timestamp: bool) -> Self {
        Self {
            console: Some(Mutex::new(ConsoleDecoder::new(timestamp))),
            ..Self::new(quiet)
        }
    }

    fn progress_bar(&self, total: Option<usize>) -> Option<ProgressBar> {
        let mut slot = self.progress.lock().ok()?;
        if slot.is_none() {
            *slot = Some(new_progress_bar(self.quiet, total));
        }
        slot.clone()
    }

    /// Finish and drop the current progress bar.
    pub(crate) fn finish_progress(&self) {
        if let Ok(mut slot) = self.progress.lock() {
            if let Some(pb) = slot.take() {
                pb.finish_and_clear();
            }
        }
    }

    fn print_line(&self, line: &str) {
        let current = self.progress.lock().ok().and_then(|slot| slot.clone());
        match current {
            Some(pb) => pb.suspend(|| eprintln!("{line}")),
            None => eprintln!("{line}"),
        }
    }
}

fn to_u64(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

fn new_progress_bar(quiet: bool, total: Option<usize>) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let pb = match total {
        Some(total) => {
            let pb = ProgressBar::new(to_u64(total));
            #[allow(clippy::unwrap_used)] // Static template string
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                    .unwrap()
                    .progress_chars("#>-"),
            );
            pb
        },
        None => {
            let pb = ProgressBar::new_spinner();
            #[allow(clippy::unwrap_used)] // Static template string
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {bytes} {msg}")
                    .unwrap(),
            );
            pb
        },
    };
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb
}

impl EventSink for TerminalSink {
    fn notify(&self, event: &Event) {
        match event {
            Event::Progress(progress) => {
                if let Some(pb) = self.progress_bar(progress.total) {
                    pb.set_message(progress.path.clone());
                    pb.set_position(to_u64(progress.done));
                }
            },
            Event::BoardUpdate(text) => {
                self.print_line(&format!("{} {text}", style("⚠").yellow()));
            },
            Event::RuntimeError(_) | Event::BlockError { .. } => warn!("{event}"),
            _ => debug!("{event}"),
        }
    }

    fn console(&self, bytes: &[u8]) {
        let Some(decoder) = &self.console else {
            return;
        };
        if let Ok(mut decoder) = decoder.lock() {
            let text = decoder.push(bytes);
            if !text.is_empty() {
                let mut out = io::stdout().lock();
                let _ = out.write_all(text.as_bytes());
                let _ = out.flush();
            }
        }
    }
}

/// Select a port, open it and connect a session through `sink`.
pub(crate) fn open_session(
    cli: &Cli,
    config: &mut Config,
    sink: Arc<dyn EventSink>,
) -> Result<Session> {
    let port_name = get_port(cli, config)?;
    let baud = resolve_baud(cli, config)?;
    let session_config = config.session_config(baud)?;

    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            style(&port_name).green(),
            baud
        );
    }

    let port = NativePort::open(&SerialConfig::new(port_name.as_str(), baud))
        .with_context(|| format!("Failed to open serial port {port_name}"))?;

    let mut session = Session::new(session_config, sink);
    session
        .connect(Box::new(port))
        .with_context(|| format!("Failed to attach to the board on {port_name}"))?;

    if !session.firmware_valid() {
        warn!("Board firmware looks invalid; file and shell commands may fail");
    }
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use whitecat::Progress;

    #[test]
    fn test_quiet_sink_tracks_progress_without_drawing() {
        let sink = TerminalSink::new(true);
        sink.notify(&Event::Progress(Progress {
            path: "/main.lua".to_string(),
            done: 255,
            total: Some(600),
        }));
        let pb = sink.progress_bar(None).unwrap();
        assert!(pb.is_hidden());
        assert_eq!(pb.position(), 255);

        sink.finish_progress();
        assert!(sink.progress.lock().unwrap().is_none());
    }

    #[test]
    fn test_sink_without_console_ignores_bytes() {
        let sink = TerminalSink::new(true);
        sink.console(b"ignored\r\n");
        assert!(sink.console.is_none());
    }
}
