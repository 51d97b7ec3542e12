//! Interactive serial port selection.
//!
//! - Explicit `--port` / `WCC_PORT` or the configured port wins
//! - Otherwise ports behind a known (or configured) USB bridge are preferred
//! - Several candidates prompt via dialoguer, or fail in non-interactive mode

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, info},
    std::{cmp::Ordering, io::IsTerminal},
    whitecat::{DetectedPort, DeviceKind, PortInfo, detect_ports},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI or environment.
    pub port: Option<String>,
    /// Non-interactive mode (fail if the choice is ambiguous).
    pub non_interactive: bool,
}

/// Result of port selection including whether it was a known device.
pub struct SelectedPort {
    /// The selected port.
    pub port: DetectedPort,
    /// Whether this port matched a known/configured adapter.
    pub is_known: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

fn only_port(ports: Vec<DetectedPort>) -> Option<SelectedPort> {
    let port = ports.into_iter().next()?;
    Some(SelectedPort {
        is_known: port.is_likely_board(),
        port,
    })
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name, config));
    }

    if let Some(port_name) = &config.connection.serial {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name, config));
    }

    let ports = detect_ports(&config.extra_devices());
    if ports.is_empty() {
        return Err(usage_err("no serial ports found; connect a board or pass --port"));
    }

    let known: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| p.is_likely_board())
        .cloned()
        .collect();
    let candidates = if known.is_empty() { ports } else { known };

    match candidates.len().cmp(&1) {
        Ordering::Equal => {
            let Some(selected) = only_port(candidates) else {
                return Err(usage_err("no serial ports available"));
            };
            if selected.is_known || options.non_interactive {
                info!(
                    "Auto-selected port: {} [{}]",
                    selected.port.name(),
                    selected.port.device.name()
                );
                Ok(selected)
            } else {
                ensure_interactive_terminal()?;
                confirm_single_port(selected.port)
            }
        },
        Ordering::Greater if options.non_interactive => Err(usage_err(
            "multiple serial ports found; pass --port in non-interactive mode",
        )),
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_port_interactive(candidates)
        },
        Ordering::Less => Err(usage_err("no serial ports available")),
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err("port selection needs a terminal; pass --port"))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("port selection cancelled".to_string()).into()
            } else {
                usage_err("port selection prompt failed")
            }
        },
    }
}

/// Resolve a port name against the enumerated ports.
///
/// A name the system does not list is still used as given.
fn find_port_by_name(name: &str, config: &Config) -> SelectedPort {
    let ports = detect_ports(&config.extra_devices());

    let found = ports
        .iter()
        .find(|p| p.name() == name)
        .or_else(|| ports.iter().find(|p| p.name().eq_ignore_ascii_case(name)));

    if let Some(port) = found {
        return SelectedPort {
            port: port.clone(),
            is_known: port.is_likely_board(),
        };
    }

    SelectedPort {
        port: DetectedPort {
            info: PortInfo {
                name: name.to_string(),
                vid: None,
                pid: None,
                manufacturer: None,
                product: None,
                serial_number: None,
            },
            device: DeviceKind::Unknown,
        },
        is_known: false,
    }
}

fn port_label(port: &DetectedPort) -> String {
    let name = if port.is_likely_board() {
        style(port.name()).bold().to_string()
    } else {
        port.name().to_string()
    };

    let device_info = if port.device.is_known() {
        format!(" [{}]", style(port.device.name()).yellow())
    } else if let (Some(vid), Some(pid)) = (port.info.vid, port.info.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let product = port
        .info
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{name}{device_info}{product}")
}

fn select_port_interactive(ports: Vec<DetectedPort>) -> Result<SelectedPort> {
    eprintln!("{} Found {} serial ports", style("ℹ").blue(), ports.len());

    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|p| console::truncate_str(&port_label(p), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the board's serial port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => {
            let port = ports
                .into_iter()
                .nth(index)
                .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
            let is_known = port.is_likely_board();
            Ok(SelectedPort { port, is_known })
        },
        None => Err(CliError::Cancelled("port selection cancelled".to_string()).into()),
    }
}

fn confirm_single_port(port: DetectedPort) -> Result<SelectedPort> {
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use {}?", port_label(&port)))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort {
            port,
            is_known: false,
        })
    } else {
        Err(CliError::Cancelled("port selection cancelled".to_string()).into())
    }
}

/// Offer to remember an unrecognised adapter for future auto-detection.
pub fn ask_remember_port(port: &DetectedPort, config: &mut Config) -> Result<()> {
    let (Some(vid), Some(pid)) = (port.info.vid, port.info.pid) else {
        return Ok(());
    };
    if config.usb_device.iter().any(|d| d.matches(vid, pid)) {
        return Ok(());
    }
    if !(std::io::stdin().is_terminal() && std::io::stderr().is_terminal()) {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Remember adapter {vid:04X}:{pid:04X} as a board?"))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        config.remember_usb_device(vid, pid)?;
        eprintln!("{} Adapter saved", style("✓").green());
    }
    Ok(())
}
