//! Serial port discovery for ESP32 boards.
//!
//! Lua RTOS boards are reached through a USB-to-UART bridge (or, on newer
//! chips, the Espressif USB-serial peripheral). Ports behind a known bridge
//! are preferred when no port is given explicitly.

use crate::error::{Error, Result};
use crate::port::PortInfo;
use log::{debug, info, trace};

/// Known USB bridge/device kinds found on ESP32 boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// CH9102/CH343 USB-to-Serial converter.
    Ch9102,
    /// FTDI FT232/FT2232/FT4232 USB-to-Serial converter.
    Ftdi,
    /// Espressif native USB serial/JTAG.
    Espressif,
    /// Adapter listed in the user's configuration.
    Configured,
    /// Unknown device.
    Unknown,
}

/// Known USB VID/PID pairs; an empty PID list matches any product.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71], DeviceKind::Cp210x),
    (0x1A86, &[0x7523, 0x7522, 0x5523], DeviceKind::Ch340),
    (0x1A86, &[0x55D4, 0x55D3], DeviceKind::Ch9102),
    (0x0403, &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015], DeviceKind::Ftdi),
    (0x303A, &[], DeviceKind::Espressif),
];

impl DeviceKind {
    /// Classify a VID/PID pair, consulting `extra` user-configured pairs first.
    #[must_use]
    pub fn classify(vid: u16, pid: u16, extra: &[(u16, u16)]) -> Self {
        if extra.contains(&(vid, pid)) {
            return Self::Configured;
        }
        KNOWN_USB_DEVICES
            .iter()
            .find(|(known_vid, pids, _)| vid == *known_vid && (pids.is_empty() || pids.contains(&pid)))
            .map_or(Self::Unknown, |(_, _, kind)| *kind)
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cp210x => "CP210x",
            Self::Ch340 => "CH340/CH341",
            Self::Ch9102 => "CH9102",
            Self::Ftdi => "FTDI",
            Self::Espressif => "Espressif USB",
            Self::Configured => "configured",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known/expected device kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Auto-selection order; lower is better.
    fn rank(self) -> u8 {
        match self {
            Self::Configured => 0,
            Self::Cp210x | Self::Ch340 | Self::Ch9102 | Self::Espressif => 1,
            Self::Ftdi => 2,
            Self::Unknown => 3,
        }
    }
}

/// Serial port plus its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedPort {
    /// Enumerated port.
    pub info: PortInfo,
    /// Classified device kind.
    pub device: DeviceKind,
}

impl DetectedPort {
    /// Classify an enumerated port.
    pub fn from_info(info: PortInfo, extra: &[(u16, u16)]) -> Self {
        let device = match (info.vid, info.pid) {
            (Some(vid), Some(pid)) => DeviceKind::classify(vid, pid, extra),
            _ => DeviceKind::Unknown,
        };
        trace!("{} classified as {device:?}", info.name);
        Self { info, device }
    }

    /// Port name/path.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Check if this port is likely an ESP32 board.
    pub fn is_likely_board(&self) -> bool {
        self.device.is_known()
    }
}

/// Enumerate serial ports and classify them.
#[cfg(feature = "native")]
pub fn detect_ports(extra: &[(u16, u16)]) -> Vec<DetectedPort> {
    use crate::port::{NativePortEnumerator, PortEnumerator};

    match NativePortEnumerator::list_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(|info| DetectedPort::from_info(info, extra))
            .collect(),
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            Vec::new()
        },
    }
}

/// Enumerate serial ports (no native backend: always empty).
#[cfg(not(feature = "native"))]
pub fn detect_ports(_extra: &[(u16, u16)]) -> Vec<DetectedPort> {
    debug!("serial enumeration needs the native feature");
    Vec::new()
}

/// Pick the best candidate among `ports`.
pub fn select_port(ports: &[DetectedPort]) -> Result<DetectedPort> {
    let best = ports
        .iter()
        .min_by_key(|p| p.device.rank())
        .ok_or(Error::DeviceNotFound)?;

    if best.device.is_known() {
        info!("Auto-detected {} bridge: {}", best.device.name(), best.name());
    } else {
        info!("Using first available port: {}", best.name());
    }
    Ok(best.clone())
}
