//! Host-side flashing core for the RA family MCU factory ROM
//! bootloader: a framed request/response protocol engine over a
//! blocking, byte-oriented serial transport.
//!
//! This crate is structured around the pipeline described in the
//! design: [`frame`] encodes/decodes the wire packets, [`transport`]
//! exposes a blocking byte channel, [`session`] drives the init
//! handshake, [`command`] sends one request and reads one response,
//! [`device`] parses the device's reported signature and memory
//! layout, and [`transfer`] layers chunked, acked streaming
//! erase/write/read on top of all of it. [`RaSession`] ties these
//! together into the single facade most callers want.

pub mod command;
pub mod device;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod session;
pub mod transfer;
pub mod transport;

use std::io::{Read, Write};

use crate::device::{AreaInfo, ChipLayout, DeviceInfo};
use crate::error::{AlignmentError, FlashError, SessionError};
use crate::transfer::Boundary;
use crate::transport::{SerialTransport, Transport};

/// The active area index used to parameterize alignment when none is
/// explicitly selected (spec.md §3: "default to 0").
pub const DEFAULT_AREA: u8 = 0;

/// A single open connection to an RA bootloader, bundling the
/// transport, session state, and chip layout behind the high-level
/// operations a CLI or embedding application actually wants.
///
/// Grounded in the teacher's `devices::device::Device` facade, which
/// similarly owns the transport and exposes `send_packet`/high-level
/// commands rather than making callers drive the protocol by hand.
pub struct RaSession<T: Transport> {
    transport: T,
    layout: Option<ChipLayout>,
    active_area: u8,
}

impl RaSession<SerialTransport> {
    /// Opens `path` and runs the startup handshake
    /// (`inquire()`/`confirm()` per spec.md §4.3).
    pub fn open(path: &str) -> Result<Self, FlashError> {
        let transport = SerialTransport::open(path)?;
        let mut session = Self {
            transport,
            layout: None,
            active_area: DEFAULT_AREA,
        };
        session.connect()?;
        Ok(session)
    }
}

impl<T: Transport> RaSession<T> {
    /// Wraps an already-constructed transport without opening a new
    /// one. Useful for tests with [`transport::MockTransport`].
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            layout: None,
            active_area: DEFAULT_AREA,
        }
    }

    /// Runs the startup handshake over the current transport.
    pub fn connect(&mut self) -> Result<(), FlashError> {
        session::open_session(&mut self.transport)?;
        Ok(())
    }

    /// Selects which area index parameterizes alignment for
    /// subsequent transfers. Must be one of `{0, 1, 2}`.
    pub fn set_active_area(&mut self, area: u8) {
        self.active_area = area;
    }

    fn area(&self) -> Result<&AreaInfo, FlashError> {
        self.layout
            .as_ref()
            .and_then(|layout| layout.get(&self.active_area))
            .ok_or(FlashError::Session(SessionError::NotConnected))
    }

    /// Returns the active area's layout, as retained from the last
    /// [`Self::area_info`] call. Lets callers (e.g. the CLI) compute an
    /// end-of-area default size without reaching into session internals.
    pub fn active_area_info(&self) -> Result<AreaInfo, FlashError> {
        self.area().copied()
    }

    /// Queries and returns the device's reported signature (`SIG_CMD`).
    pub fn device_info(&mut self) -> Result<DeviceInfo, FlashError> {
        device::get_dev_info(&mut self.transport)
    }

    /// Queries `ARE_CMD` for each of areas `{0, 1, 2}`, retains the
    /// resulting layout on this session, and returns it.
    pub fn area_info(&mut self) -> Result<ChipLayout, FlashError> {
        let layout = device::get_area_info(&mut self.transport)?;
        self.layout = Some(layout.clone());
        Ok(layout)
    }

    fn boundary(&self, start_addr: u32, size: u32) -> Result<Boundary, FlashError> {
        let area = self.area()?;
        transfer::compute_boundary(start_addr, size, area)
            .map_err(FlashError::from)
    }

    /// Narrows a `u64` transfer size to `u32` for boundary computation,
    /// failing with `OutOfRange` instead of silently truncating — every
    /// address/length on the wire is 32-bit (spec.md §4.6), so a request
    /// that doesn't fit can never be satisfiable against any area.
    fn boundary_u64(&self, start_addr: u32, size: u64) -> Result<Boundary, FlashError> {
        let area = self.area()?;
        let size: u32 = size.try_into().map_err(|_| {
            FlashError::Alignment(AlignmentError::OutOfRange {
                end: u32::MAX,
                area_end: area.end_addr,
            })
        })?;
        transfer::compute_boundary(start_addr, size, area).map_err(FlashError::from)
    }

    /// Erases `[start_addr, start_addr + size)`, aligned to the active
    /// area's erase unit (spec.md §4.6).
    pub fn erase(&mut self, start_addr: u32, size: u32) -> Result<(), FlashError> {
        let boundary = self.boundary(start_addr, size)?;
        transfer::erase(&mut self.transport, boundary)
    }

    /// Programs `size` bytes from `source` starting at `start_addr`,
    /// invoking `progress` once per 1024-byte chunk.
    pub fn write(
        &mut self,
        start_addr: u32,
        size: u64,
        source: &mut dyn Read,
        progress: Option<&mut dyn FnMut(u64, u64)>,
    ) -> Result<(), FlashError> {
        let boundary = self.boundary_u64(start_addr, size)?;
        transfer::write_stream(&mut self.transport, boundary, size, source, progress)
    }

    /// Reads `size` bytes starting at `start_addr` into `sink`,
    /// invoking `progress` once per 1024-byte chunk.
    pub fn read(
        &mut self,
        start_addr: u32,
        size: u64,
        sink: &mut dyn Write,
        progress: Option<&mut dyn FnMut(u64, u64)>,
    ) -> Result<(), FlashError> {
        let boundary = self.boundary_u64(start_addr, size)?;
        transfer::read_stream(&mut self.transport, boundary, size, sink, progress)
    }

    /// Writes `original`, then reads the same range back and compares
    /// it byte-for-byte. Takes the source bytes directly (rather than
    /// a `Read` the engine would have to rewind) so the "read it back
    /// from the start" requirement is explicit at the call site.
    pub fn write_and_verify(
        &mut self,
        start_addr: u32,
        original: &[u8],
        progress: Option<&mut dyn FnMut(u64, u64)>,
    ) -> Result<(), FlashError> {
        let boundary = self.boundary(start_addr, original.len() as u32)?;
        let mut source = original;
        transfer::write_stream(
            &mut self.transport,
            boundary,
            original.len() as u64,
            &mut source,
            progress,
        )?;
        transfer::verify(&mut self.transport, boundary, original)
    }

    /// Reserved authentication hook (spec.md §9): always returns
    /// `Unsupported`.
    pub fn authenticate_connection(&mut self) -> Result<(), FlashError> {
        session::authenticate_connection()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn ack(tag: u8) -> Vec<u8> {
        frame::encode_data(tag, &[0x00]).unwrap()
    }

    fn area_response(index: u8, erase_unit: u32, end: u32) -> Vec<u8> {
        let mut payload = vec![index];
        payload.extend_from_slice(&0u32.to_be_bytes());
        payload.extend_from_slice(&end.to_be_bytes());
        payload.extend_from_slice(&erase_unit.to_be_bytes());
        payload.extend_from_slice(&0x100u32.to_be_bytes());
        frame::encode_data(device::ARE_CMD, &payload).unwrap()
    }

    #[test]
    fn session_requires_area_info_before_transfers() {
        let t = MockTransport::new(vec![]);
        let mut session = RaSession::with_transport(t);
        let err = session.erase(0, 0x400).unwrap_err();
        assert!(matches!(
            err,
            FlashError::Session(SessionError::NotConnected)
        ));
    }

    #[test]
    fn full_handshake_then_erase_flow() {
        let t = MockTransport::new(vec![
            vec![0x00],                       // inquire(): lone NAK, cold boot
            vec![0xC3],                       // confirm(): handshake reply
            area_response(0, 0x400, 0xFFFF),  // ARE area 0
            area_response(1, 0x400, 0xFFFF),  // ARE area 1
            area_response(2, 0x400, 0xFFFF),  // ARE area 2
            ack(transfer::ERA_CMD),           // erase ack
        ]);
        let mut session = RaSession::with_transport(t);
        session.connect().unwrap();
        session.area_info().unwrap();
        session.erase(0, 0x400).unwrap();
    }
}
