//! Directory listing and file transfer commands.

use anyhow::{Context, Result};
use console::style;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use whitecat::protocol::shell::list_command;

use super::{TerminalSink, open_session};
use crate::Cli;
use crate::config::Config;

/// `wcc ls`: print a board directory as JSON, or the shell's own text.
pub(crate) fn cmd_ls(cli: &Cli, config: &mut Config, path: &str, raw: bool) -> Result<()> {
    let sink = Arc::new(TerminalSink::new(cli.quiet));
    let mut session = open_session(cli, config, sink)?;

    let output = if raw {
        session.send_command(&list_command(path))
    } else {
        session.list_directory(path)
    }
    .with_context(|| format!("Failed to list {path}"))?;

    println!("{output}");
    session.detach();
    Ok(())
}

/// `wcc down`: copy a board file to the local filesystem.
pub(crate) fn cmd_down(cli: &Cli, config: &mut Config, src: &str, dst: &Path) -> Result<()> {
    let sink = Arc::new(TerminalSink::new(cli.quiet));
    let mut session = open_session(cli, config, sink.clone())?;

    let result = session.read_file(src);
    sink.finish_progress();
    let data = result.with_context(|| format!("Failed to read {src} from the board"))?;

    fs::write(dst, &data).with_context(|| format!("Failed to write {}", dst.display()))?;
    session.detach();

    if !cli.quiet {
        eprintln!(
            "{} {} -> {} ({} bytes)",
            style("✓").green(),
            src,
            dst.display(),
            data.len()
        );
    }
    Ok(())
}

/// `wcc up`: copy a local file to the board.
pub(crate) fn cmd_up(cli: &Cli, config: &mut Config, src: &Path, dst: &str) -> Result<()> {
    // Read before touching the port so a bad path costs no board reset.
    let data = fs::read(src).with_context(|| format!("Failed to read {}", src.display()))?;

    let sink = Arc::new(TerminalSink::new(cli.quiet));
    let mut session = open_session(cli, config, sink.clone())?;

    let result = session.write_file(dst, &data);
    sink.finish_progress();
    result.with_context(|| format!("Failed to write {dst} to the board"))?;
    session.detach();

    if !cli.quiet {
        eprintln!(
            "{} {} -> {} ({} bytes)",
            style("✓").green(),
            src.display(),
            dst,
            data.len()
        );
    }
    Ok(())
}
