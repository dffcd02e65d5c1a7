//! The device model (C5): parses `SIG` and `ARE` replies into a typed
//! chip-layout map used to parameterize alignment for every transfer.
//!
//! Grounded in the teacher's `packets/system.rs` decode style (typed
//! enums and `bitflags!` fields instead of raw integer bit-twiddling)
//! applied to the RA device-info/area-info payloads described in
//! spec.md §4.5 and `original_source/raflash/RAFlasher.py`'s
//! `get_dev_info`/`get_area_info`.

use std::collections::BTreeMap;
use std::time::Duration;

use bitflags::bitflags;
use log::debug;

use crate::command;
use crate::error::{FlashError, FrameError};
use crate::transport::{Transport, DEFAULT_TIMEOUT_MS};

/// `SIG_CMD`: query device signature/info.
pub const SIG_CMD: u8 = 0x3A;
/// `ARE_CMD`: query one area's layout.
pub const ARE_CMD: u8 = 0x3B;

bitflags! {
    /// `NOA` bitfield: which user areas the device reports as present.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UserAreaFlags: u8 {
        const CODE_FLASH_0 = 1 << 0;
        const CODE_FLASH_1 = 1 << 1;
        const DATA_FLASH    = 1 << 2;
        const CONFIG_AREA   = 1 << 3;
    }
}

/// `TYP`: the reported MCU sub-family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipFamily {
    Ra2Ra4,
    Ra6,
    Unknown(u8),
}

impl ChipFamily {
    fn from_code(code: u8) -> Self {
        match code {
            0x02 => Self::Ra2Ra4,
            0x03 => Self::Ra6,
            other => Self::Unknown(other),
        }
    }
}

/// The decoded `SIG_CMD` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Serial interface speed in Hz.
    pub sci_hz: u32,
    /// Recommended max UART baud rate in bps.
    pub recommended_max_uart_bps: u32,
    pub user_areas: UserAreaFlags,
    pub chip_family: ChipFamily,
    /// Boot firmware version: (major, minor).
    pub boot_firmware_version: (u8, u8),
}

/// One area's layout, as reported by `ARE_CMD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaInfo {
    pub kind: u8,
    pub start_addr: u32,
    pub end_addr: u32,
    pub erase_unit: u32,
    pub write_unit: u32,
}

/// `{area_index -> AreaInfo}`, as retained by the session after the
/// startup handshake.
pub type ChipLayout = BTreeMap<u8, AreaInfo>;

fn read_be_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

/// Guards against a device whose declared payload length (the frame's
/// own `LNH`/`LNL`, not the `recv_exact` byte count used only to size
/// the read) is shorter than this decoder's fixed field layout expects.
fn require_len(payload: &[u8], min_len: usize) -> Result<(), FlashError> {
    if payload.len() < min_len {
        return Err(FlashError::Frame(FrameError::ShortFrame));
    }
    Ok(())
}

/// Issues `SIG_CMD` with an empty payload and parses the 18-byte reply.
pub fn get_dev_info(transport: &mut dyn Transport) -> Result<DeviceInfo, FlashError> {
    let frame = command::request(
        transport,
        SIG_CMD,
        &[],
        18,
        Duration::from_millis(DEFAULT_TIMEOUT_MS),
    )?;
    let payload = &frame.payload;
    require_len(payload, 12)?;

    let sci_hz = read_be_u32(payload, 0);
    let recommended_max_uart_bps = read_be_u32(payload, 4);
    let noa = payload[8];
    let typ = payload[9];
    let bfv = u16::from_be_bytes([payload[10], payload[11]]);

    let info = DeviceInfo {
        sci_hz,
        recommended_max_uart_bps,
        user_areas: UserAreaFlags::from_bits_truncate(noa),
        chip_family: ChipFamily::from_code(typ),
        boot_firmware_version: ((bfv >> 8) as u8, (bfv & 0xFF) as u8),
    };

    if matches!(info.chip_family, ChipFamily::Unknown(_)) {
        debug!("get_dev_info(): unrecognized chip family code {:#04x}", typ);
    }

    Ok(info)
}

/// Issues `ARE_CMD` once per area index `{0, 1, 2}` and returns the
/// resulting [`ChipLayout`].
pub fn get_area_info(transport: &mut dyn Transport) -> Result<ChipLayout, FlashError> {
    let mut layout = ChipLayout::new();

    for area_index in 0u8..=2 {
        let frame = command::request(
            transport,
            ARE_CMD,
            &[area_index],
            23,
            Duration::from_millis(DEFAULT_TIMEOUT_MS),
        )?;
        let payload = &frame.payload;
        require_len(payload, 17)?;

        let area = AreaInfo {
            kind: payload[0],
            start_addr: read_be_u32(payload, 1),
            end_addr: read_be_u32(payload, 5),
            erase_unit: read_be_u32(payload, 9),
            write_unit: read_be_u32(payload, 13),
        };

        layout.insert(area_index, area);
    }

    Ok(layout)
}
