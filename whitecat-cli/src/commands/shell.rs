//! Shell command execution, identification and reset.

use anyhow::{Context, Result};
use console::style;
use log::warn;
use serde_json::json;
use std::sync::Arc;

use super::{TerminalSink, open_session};
use crate::config::Config;
use crate::Cli;

/// `wcc exec`: run one statement and print the response.
pub(crate) fn cmd_exec(cli: &Cli, config: &mut Config, command: &str) -> Result<()> {
    let sink = Arc::new(TerminalSink::new(cli.quiet));
    let mut session = open_session(cli, config, sink)?;

    let response = session
        .send_command(command)
        .with_context(|| format!("Failed to run `{command}`"))?;
    if !response.is_empty() {
        println!("{response}");
    }
    session.detach();
    Ok(())
}

/// Older firmware has no commit query; report it as empty.
fn commit_or_empty(commit: whitecat::Result<String>) -> String {
    commit.unwrap_or_else(|e| {
        warn!("Could not read the firmware commit: {e}");
        String::new()
    })
}

/// `wcc info`: board identification.
pub(crate) fn cmd_info(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let sink = Arc::new(TerminalSink::new(cli.quiet || json));
    let mut session = open_session(cli, config, sink)?;

    let port = session.port_name().unwrap_or_default().to_string();
    let valid = session.firmware_valid();
    let info = session
        .identify()
        .context("Failed to identify the board")?
        .clone();
    let commit = if info.is_known() {
        commit_or_empty(session.firmware_commit())
    } else {
        String::new()
    };
    session.detach();

    if json {
        let value = json!({
            "port": port,
            "model": info.model,
            "subtype": info.subtype,
            "brand": info.brand,
            "firmware": info.firmware,
            "commit": commit,
            "firmware_valid": valid,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let or_unknown = |s: &str| {
        if s.is_empty() {
            style("unknown".to_string()).dim().to_string()
        } else {
            s.to_string()
        }
    };
    println!("{}", style("Board").bold().underlined());
    println!("  Port:     {port}");
    println!("  Model:    {}", or_unknown(&info.model));
    println!("  Subtype:  {}", or_unknown(&info.subtype));
    println!("  Brand:    {}", or_unknown(&info.brand));
    println!("  Firmware: {}", or_unknown(&info.firmware));
    println!("  Commit:   {}", or_unknown(&commit));
    if !valid {
        println!("  {} firmware did not boot cleanly", style("⚠").yellow());
    }
    Ok(())
}

/// `wcc reset`: hardware reset and boot report.
pub(crate) fn cmd_reset(cli: &Cli, config: &mut Config) -> Result<()> {
    let sink = Arc::new(TerminalSink::new(cli.quiet));
    let mut session = open_session(cli, config, sink)?;

    if !cli.quiet {
        eprintln!("{} Resetting board...", style("🔄").cyan());
    }
    let outcome = session.reset().context("Board did not come back after reset")?;
    session.detach();

    match outcome.update_message() {
        None => {
            if !cli.quiet {
                eprintln!("{} Board ready", style("✓").green());
            }
            Ok(())
        },
        Some(message) => Err(whitecat::Error::FirmwareInvalid(message.to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_falls_back_to_empty() {
        assert_eq!(commit_or_empty(Ok("5fbf4c5".to_string())), "5fbf4c5");
        assert_eq!(commit_or_empty(Err(whitecat::Error::Timeout("commit".into()))), "");
    }
}
