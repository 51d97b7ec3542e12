//! Configuration file support for wcc.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (WCC_*)
//! 3. Local config file (./wcc.toml)
//! 4. Global config file (~/.config/wcc/config.toml)

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use whitecat::SessionConfig;

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "wcc.toml";

/// USB adapter identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Line rate.
    pub baud: Option<u32>,
}

/// Session tunables. Unset values keep the library defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSection {
    /// Upload chunk size in bytes (1..=255).
    pub chunk_size: Option<usize>,
    /// Shell command timeout.
    pub command_timeout_ms: Option<u64>,
    /// Per-read timeout during file transfers.
    pub transfer_timeout_ms: Option<u64>,
    /// Time allowed for the board to come up after a reset.
    pub boot_timeout_ms: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Session settings.
    #[serde(default)]
    pub session: SessionSection,
    /// Extra USB adapters treated as boards during auto-detection.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!("Could not load config from {}, using defaults", path.display());
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "wcc").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    fn merge(&mut self, other: Self) {
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }

        let session = other.session;
        if session.chunk_size.is_some() {
            self.session.chunk_size = session.chunk_size;
        }
        if session.command_timeout_ms.is_some() {
            self.session.command_timeout_ms = session.command_timeout_ms;
        }
        if session.transfer_timeout_ms.is_some() {
            self.session.transfer_timeout_ms = session.transfer_timeout_ms;
        }
        if session.boot_timeout_ms.is_some() {
            self.session.boot_timeout_ms = session.boot_timeout_ms;
        }

        for device in other.usb_device {
            if !self.usb_device.contains(&device) {
                self.usb_device.push(device);
            }
        }
    }

    /// Configured adapters as `(vid, pid)` pairs for port detection.
    pub fn extra_devices(&self) -> Vec<(u16, u16)> {
        self.usb_device
            .iter()
            .map(|d| (d.vid, d.pid))
            .collect()
    }

    /// Build the session configuration for a connection at `baud`.
    pub fn session_config(&self, baud: u32) -> whitecat::Result<SessionConfig> {
        let mut config = SessionConfig::default().with_baud_rate(baud);
        if let Some(size) = self.session.chunk_size {
            config = config.with_chunk_size(size);
        }
        if let Some(ms) = self.session.command_timeout_ms {
            config = config.with_command_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.session.transfer_timeout_ms {
            config = config.with_transfer_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.session.boot_timeout_ms {
            config = config.with_boot_timeout(Duration::from_millis(ms));
        }
        config.validate()?;
        Ok(config)
    }

    /// Save a USB adapter for future auto-detection.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<()> {
        let device = UsbDevice { vid, pid };
        if self.usb_device.contains(&device) {
            return Ok(());
        }

        let path = if Path::new(LOCAL_CONFIG_FILE).exists() {
            PathBuf::from(LOCAL_CONFIG_FILE)
        } else if let Some(global_path) = Self::global_config_path() {
            if let Some(dir) = global_path.parent() {
                fs::create_dir_all(dir)?;
            }
            global_path
        } else {
            PathBuf::from(LOCAL_CONFIG_FILE)
        };

        // Re-read the target so other settings in it survive the rewrite.
        let mut on_disk = Self::load_from_file(&path).unwrap_or_default();
        on_disk.usb_device.push(device.clone());
        fs::write(&path, toml::to_string_pretty(&on_disk)?)?;
        info!("Saved USB device {vid:04X}:{pid:04X} to {}", path.display());

        self.usb_device.push(device);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.connection.serial.is_none());
        assert!(config.connection.baud.is_none());
        assert!(config.session.chunk_size.is_none());
        assert!(config.usb_device.is_empty());
    }

    #[test]
    fn test_usb_device_matches() {
        let device = UsbDevice { vid: 0x10C4, pid: 0xEA60 };
        assert!(device.matches(0x10C4, 0xEA60));
        assert!(!device.matches(0x10C4, 0xEA70));
        assert!(!device.matches(0x1A86, 0xEA60));
    }

    #[test]
    fn test_config_merge_overrides_set_values() {
        let mut base = Config::default();
        base.connection.baud = Some(115200);
        base.session.command_timeout_ms = Some(2000);

        let mut other = Config::default();
        other.connection.serial = Some("/dev/ttyUSB0".to_string());
        other.connection.baud = Some(230400);
        other.session.chunk_size = Some(128);

        base.merge(other);

        assert_eq!(base.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.connection.baud, Some(230400));
        assert_eq!(base.session.chunk_size, Some(128));
        assert_eq!(base.session.command_timeout_ms, Some(2000));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.connection.serial = Some("COM3".to_string());
        base.session.boot_timeout_ms = Some(6000);

        base.merge(Config::default());

        assert_eq!(base.connection.serial.as_deref(), Some("COM3"));
        assert_eq!(base.session.boot_timeout_ms, Some(6000));
    }

    #[test]
    fn test_config_merge_usb_devices_dedup() {
        let mut base = Config::default();
        base.usb_device.push(UsbDevice { vid: 0x1A86, pid: 0x7523 });

        let mut other = Config::default();
        other.usb_device.push(UsbDevice { vid: 0x1A86, pid: 0x7523 });
        other.usb_device.push(UsbDevice { vid: 0x2341, pid: 0x0043 });

        base.merge(other);
        assert_eq!(base.usb_device.len(), 2);
        assert_eq!(base.extra_devices(), vec![(0x1A86, 0x7523), (0x2341, 0x0043)]);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[connection]
serial = "/dev/ttyUSB0"
baud = 115200

[session]
chunk_size = 64
command_timeout_ms = 3000
transfer_timeout_ms = 2500
boot_timeout_ms = 8000

[[usb_device]]
vid = 9025
pid = 67
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.connection.baud, Some(115200));
        assert_eq!(config.session.chunk_size, Some(64));
        assert_eq!(config.session.transfer_timeout_ms, Some(2500));
        assert_eq!(config.usb_device, vec![UsbDevice { vid: 9025, pid: 67 }]);
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.connection.serial.is_none());
        assert!(config.usb_device.is_empty());
    }

    #[test]
    fn test_session_config_applies_overrides() {
        let mut config = Config::default();
        config.session.chunk_size = Some(1000);
        config.session.command_timeout_ms = Some(750);
        config.session.boot_timeout_ms = Some(9000);

        let session = config.session_config(57600).unwrap();
        assert_eq!(session.baud_rate, 57600);
        assert_eq!(session.chunk_size, 255);
        assert_eq!(session.command_timeout, Duration::from_millis(750));
        assert_eq!(session.boot_timeout, Duration::from_millis(9000));
        assert_eq!(session.transfer_timeout, SessionConfig::default().transfer_timeout);
    }

    #[test]
    fn test_session_config_rejects_zero_timeout() {
        let mut config = Config::default();
        config.session.transfer_timeout_ms = Some(0);
        assert!(matches!(
            config.session_config(115_200),
            Err(whitecat::Error::Config(_))
        ));
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wcc.toml");
        fs::write(
            &path,
            r#"
[connection]
serial = "/dev/ttyUSB1"
[session]
chunk_size = 32
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.connection.serial.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.session.chunk_size, Some(32));
    }

    #[test]
    fn test_load_from_path_invalid_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[connection\nserial = ").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.connection.serial.is_none());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/wcc.toml"));
        assert!(config.connection.serial.is_none());
    }

    #[test]
    fn test_global_config_path_shape() {
        if let Some(p) = Config::global_config_path() {
            let text = p.to_string_lossy();
            assert!(text.contains("wcc"));
            assert!(text.ends_with("config.toml"));
        }
    }
}
