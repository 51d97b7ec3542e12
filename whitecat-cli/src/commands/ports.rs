//! Serial port listing.

use console::style;
use serde_json::{Value, json};
use whitecat::{DetectedPort, detect_ports, device::select_port};

use crate::config::Config;

fn port_json(port: &DetectedPort) -> Value {
    json!({
        "name": port.name(),
        "device": port.device.name(),
        "known": port.device.is_known(),
        "vid": port.info.vid,
        "pid": port.info.pid,
        "manufacturer": port.info.manufacturer,
        "product": port.info.product,
        "serial": port.info.serial_number,
    })
}

/// `wcc list-ports`: JSON to stdout, or a styled list on stderr.
pub(crate) fn cmd_list_ports(config: &Config, json: bool) {
    let detected = detect_ports(&config.extra_devices());

    if json {
        let ports: Vec<Value> = detected.iter().map(port_json).collect();
        println!("{}", serde_json::to_string_pretty(&ports).unwrap_or_else(|_| "[]".to_string()));
        return;
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return;
    }

    for port in &detected {
        let device_type = if port.device.is_known() {
            format!(" [{}]", style(port.device.name()).yellow())
        } else {
            String::new()
        };
        let vid_pid = match (port.info.vid, port.info.pid) {
            (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
            _ => String::new(),
        };
        let product = port
            .info
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{}{}{}",
            style("•").green(),
            style(port.name()).cyan(),
            device_type,
            vid_pid,
            product
        );
    }

    if let Ok(best) = select_port(&detected) {
        eprintln!();
        eprintln!("{} Auto-select would use {}", style("→").cyan(), style(best.name()).green());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whitecat::PortInfo;

    #[test]
    fn test_port_json_fields() {
        let port = DetectedPort::from_info(
            PortInfo {
                name: "/dev/ttyUSB0".to_string(),
                vid: Some(0x10C4),
                pid: Some(0xEA60),
                manufacturer: Some("Silicon Labs".to_string()),
                product: None,
                serial_number: Some("0001".to_string()),
            },
            &[],
        );
        let value = port_json(&port);
        assert_eq!(value["name"], "/dev/ttyUSB0");
        assert_eq!(value["device"], "CP210x");
        assert_eq!(value["known"], true);
        assert_eq!(value["vid"], 0x10C4);
        assert!(value["product"].is_null());
        assert_eq!(value["serial"], "0001");
    }
}
