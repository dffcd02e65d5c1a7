//! Serial port discovery (C10, ambient).
//!
//! The RA bootloader enumerates as a single CDC/ACM serial port (no
//! system/user split like the teacher's VEX devices), so this is a
//! much thinner layer than `connection/serial.rs::find_ports` — a
//! straight VID filter, no port-type inference heuristics needed.

use log::debug;
use serialport::{SerialPortInfo, SerialPortType};

/// USB vendor ID used by the RA bootloader's USB-CDC interface, from
/// `original_source/raflash/RAFlasher.py`'s `VENDOR_ID`.
pub const RA_USB_VID: u16 = 0x045B;
/// Default USB product ID for the RA bootloader, from the same source.
pub const RA_USB_PID: u16 = 0x0261;

/// Lists connected serial ports whose USB vendor ID matches
/// [`RA_USB_VID`].
pub fn discover_ports() -> Result<Vec<SerialPortInfo>, serialport::Error> {
    let ports = serialport::available_ports()?;

    let matches: Vec<_> = ports
        .into_iter()
        .filter(|port| {
            matches!(
                &port.port_type,
                SerialPortType::UsbPort(info) if info.vid == RA_USB_VID
            )
        })
        .collect();

    debug!("discover_ports(): found {} RA device(s)", matches.len());
    Ok(matches)
}
