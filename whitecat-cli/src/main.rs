//! wcc - command-line console and file tool for Lua RTOS boards.
//!
//! ## Features
//!
//! - Browse, download and upload files on the board's filesystem
//! - Run shell commands and read board identification
//! - Hardware reset with boot outcome reporting
//! - Interactive serial console with keyboard forwarding
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Failures with a dedicated process exit code.
#[derive(Debug, thiserror::Error)]
enum CliError {
    /// Bad invocation or environment (exit 2).
    #[error("{0}")]
    Usage(String),
    /// Unusable configuration (exit 3).
    #[error("{0}")]
    Config(String),
    /// The user stopped the operation (exit 130).
    #[error("{0}")]
    Cancelled(String),
}

const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_CONFIG: u8 = 3;
const EXIT_DEVICE: u8 = 4;
const EXIT_CANCELLED: u8 = 130;

/// Map an error chain to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return match cli_err {
                CliError::Usage(_) => EXIT_USAGE,
                CliError::Config(_) => EXIT_CONFIG,
                CliError::Cancelled(_) => EXIT_CANCELLED,
            };
        }
        if let Some(lib_err) = cause.downcast_ref::<whitecat::Error>() {
            return match lib_err {
                whitecat::Error::Interrupted => EXIT_CANCELLED,
                whitecat::Error::DeviceNotFound => EXIT_USAGE,
                whitecat::Error::Config(_) => EXIT_CONFIG,
                _ => EXIT_DEVICE,
            };
        }
    }
    EXIT_FAILURE
}

/// wcc - talk to Lua RTOS boards over their serial console.
///
/// Environment variables:
///   WCC_PORT              - Default serial port
///   WCC_BAUD              - Line rate (default: 115200)
///   WCC_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "wcc")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "WCC_PORT")]
    port: Option<String>,

    /// Line rate [default: 115200].
    #[arg(short, long, global = true, env = "WCC_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "WCC_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List a directory on the board.
    Ls {
        /// Board-side directory.
        path: String,

        /// Print the shell's listing text instead of JSON.
        #[arg(long)]
        raw: bool,
    },

    /// Download a file from the board.
    Down {
        /// Board-side source path.
        src: String,
        /// Local destination file.
        dst: PathBuf,
    },

    /// Upload a local file to the board.
    Up {
        /// Local source file.
        src: PathBuf,
        /// Board-side destination path.
        dst: String,
    },

    /// Run one shell command and print its response.
    Exec {
        /// Lua statement to run.
        command: String,
    },

    /// Show board identification.
    Info {
        /// Output as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Reset the board and report how it booted.
    Reset,

    /// Open the board console.
    Console {
        /// Prefix each line with a timestamp.
        #[arg(long)]
        timestamp: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // clap prints help/version to stdout and usage errors to stderr.
            let _ = err.print();
            return ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(EXIT_USAGE));
        },
    };

    init_logging(&cli);
    debug!("wcc v{} (verbose level: {})", env!("CARGO_PKG_VERSION"), cli.verbose);

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Ctrl-C handler not installed: {e}");
    }
    whitecat::set_interrupt_checker(was_interrupted);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Ls { path, raw } => commands::files::cmd_ls(cli, &mut config, path, *raw),
        Commands::Down { src, dst } => commands::files::cmd_down(cli, &mut config, src, dst),
        Commands::Up { src, dst } => commands::files::cmd_up(cli, &mut config, src, dst),
        Commands::Exec { command } => commands::shell::cmd_exec(cli, &mut config, command),
        Commands::Info { json } => commands::shell::cmd_info(cli, &mut config, *json),
        Commands::Reset => commands::shell::cmd_reset(cli, &mut config),
        Commands::Console { timestamp } => {
            commands::console::cmd_console(cli, &mut config, *timestamp)
        },
        Commands::ListPorts { json } => {
            commands::ports::cmd_list_ports(&config, *json);
            Ok(())
        },
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Get serial port from CLI args or interactive selection.
fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
    };

    let selected = select_serial_port(&options, config)?;

    if !selected.is_known && !cli.non_interactive {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name().to_string())
}

/// Line rate from flag/environment, then config, then the default.
fn resolve_baud(cli: &Cli, config: &Config) -> Result<u32> {
    let baud = cli
        .baud
        .or(config.connection.baud)
        .unwrap_or(whitecat::port::DEFAULT_BAUD_RATE);
    if baud == 0 {
        return Err(CliError::Config("baud rate must be positive".to_string()).into());
    }
    Ok(baud)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_parse_ls() {
        let cli = parse(&["wcc", "ls", "/examples", "--raw"]);
        match cli.command {
            Commands::Ls { path, raw } => {
                assert_eq!(path, "/examples");
                assert!(raw);
            },
            _ => panic!("expected ls"),
        }
    }

    #[test]
    fn test_parse_transfers() {
        let cli = parse(&["wcc", "-p", "/dev/ttyUSB0", "up", "main.lua", "/main.lua"]);
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB0"));
        assert!(matches!(cli.command, Commands::Up { ref dst, .. } if dst == "/main.lua"));

        let cli = parse(&["wcc", "down", "/autorun.lua", "out.lua"]);
        match cli.command {
            Commands::Down { src, dst } => {
                assert_eq!(src, "/autorun.lua");
                assert_eq!(dst, PathBuf::from("out.lua"));
            },
            _ => panic!("expected down"),
        }
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = parse(&["wcc", "info", "--json", "-vv", "-b", "230400", "--non-interactive"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.baud, Some(230400));
        assert!(cli.non_interactive);
        assert!(matches!(cli.command, Commands::Info { json: true }));
    }

    #[test]
    fn test_parse_console_and_reset() {
        assert!(matches!(
            parse(&["wcc", "console", "--timestamp"]).command,
            Commands::Console { timestamp: true }
        ));
        assert!(matches!(parse(&["wcc", "reset"]).command, Commands::Reset));
    }

    #[test]
    fn test_parse_rejects_missing_arguments() {
        assert!(Cli::try_parse_from(["wcc", "up", "only-one"]).is_err());
        assert!(Cli::try_parse_from(["wcc", "exec"]).is_err());
        assert!(Cli::try_parse_from(["wcc", "bogus"]).is_err());
    }

    #[test]
    fn test_resolve_baud_layers() {
        let mut config = Config::default();
        let cli = parse(&["wcc", "reset"]);
        assert_eq!(resolve_baud(&cli, &config).unwrap(), 115_200);

        config.connection.baud = Some(57600);
        assert_eq!(resolve_baud(&cli, &config).unwrap(), 57600);

        let cli = parse(&["wcc", "-b", "9600", "reset"]);
        assert_eq!(resolve_baud(&cli, &config).unwrap(), 9600);

        let cli = parse(&["wcc", "-b", "0", "reset"]);
        assert!(resolve_baud(&cli, &config).is_err());
    }

    #[test]
    fn test_exit_codes() {
        let usage: anyhow::Error = CliError::Usage("x".into()).into();
        assert_eq!(exit_code_for(&usage), EXIT_USAGE);

        let cancelled: anyhow::Error = CliError::Cancelled("x".into()).into();
        assert_eq!(exit_code_for(&cancelled), EXIT_CANCELLED);

        let timeout = anyhow::Error::new(whitecat::Error::Timeout("board".into()))
            .context("Failed to run command");
        assert_eq!(exit_code_for(&timeout), EXIT_DEVICE);

        let interrupted: anyhow::Error = whitecat::Error::Interrupted.into();
        assert_eq!(exit_code_for(&interrupted), EXIT_CANCELLED);

        let config: anyhow::Error = CliError::Config("bad".into()).into();
        assert_eq!(exit_code_for(&config), EXIT_CONFIG);

        let session_config: anyhow::Error =
            whitecat::Error::Config("boot timeout must be positive".into()).into();
        assert_eq!(exit_code_for(&session_config), EXIT_CONFIG);

        assert_eq!(exit_code_for(&anyhow::anyhow!("other")), EXIT_FAILURE);
    }
}
