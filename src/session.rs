//! The init handshake and session state machine (C3).
//!
//! Tolerates a boot session already left open from a previous run
//! (common when the chip was addressed without a power cycle) —
//! `inquire()` is tried first, and only on `NotOpen` does the cold-boot
//! `confirm()` handshake run. Grounded in the retry-loop style of the
//! teacher's `Connection::packet_handshake`.

use std::time::Duration;

use log::{debug, warn};

use crate::error::{FlashError, SessionError, TransportError};
use crate::frame::{self};
use crate::transport::{Transport, DEFAULT_TIMEOUT_MS};

/// Command code for the init inquiry.
pub const INQ_CMD: u8 = 0x00;

/// Byte sent to provoke the cold-boot `0xC3` handshake reply.
const HANDSHAKE_PROBE: u8 = 0x55;
/// Expected cold-boot handshake reply.
const HANDSHAKE_REPLY: u8 = 0xC3;
/// Number of `confirm()` retries before giving up (spec.md §4.3/§7).
const MAX_HANDSHAKE_RETRIES: usize = 20;

/// Session connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Inquired,
    Open,
}

/// Result of [`inquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InquireResult {
    /// No boot session was found; the caller should run [`confirm`].
    NotOpen,
    /// A boot session was already open and responded to the inquiry.
    AlreadyOpen,
}

/// Sends `INQ_CMD` with an empty payload and checks whether a boot
/// session is already open.
///
/// A lone `0x00` byte (or an empty read) is a NAK from a cold boot ROM:
/// returns [`InquireResult::NotOpen`]. Any other well-formed 7-byte
/// response means the session is already [`SessionState::Open`].
pub fn inquire(transport: &mut dyn Transport) -> Result<InquireResult, FlashError> {
    let encoded = frame::encode_command(INQ_CMD, &[])?;
    transport.send(&encoded)?;

    let first = match transport.recv_exact(1, Duration::from_millis(DEFAULT_TIMEOUT_MS)) {
        Ok(bytes) => bytes,
        Err(TransportError::Timeout { .. }) => {
            warn!("inquire(): no response, assuming cold boot");
            return Ok(InquireResult::NotOpen);
        }
        Err(e) => return Err(e.into()),
    };

    if first.is_empty() || first[0] == 0x00 {
        warn!("inquire(): lone NAK received, assuming cold boot");
        return Ok(InquireResult::NotOpen);
    }

    let rest = transport.recv_exact(6, Duration::from_millis(DEFAULT_TIMEOUT_MS))?;
    let mut full = first;
    full.extend(rest);

    // Any well-formed response (ack or otherwise) means a session was
    // already open; device errors here are not fatal to the handshake,
    // but a corrupted/garbled frame must still surface as a framing error.
    frame::decode_checked(&full)?;
    debug!("inquire(): session already open");
    Ok(InquireResult::AlreadyOpen)
}

/// Performs the cold-boot handshake: send `0x55`, expect `0xC3`, retry
/// up to [`MAX_HANDSHAKE_RETRIES`] times with a 100 ms timeout each.
pub fn confirm(transport: &mut dyn Transport) -> Result<SessionState, FlashError> {
    for attempt in 0..MAX_HANDSHAKE_RETRIES {
        transport.send(&[HANDSHAKE_PROBE])?;

        match transport.recv_exact(1, Duration::from_millis(DEFAULT_TIMEOUT_MS)) {
            Ok(reply) if reply.first() == Some(&HANDSHAKE_REPLY) => {
                debug!("confirm(): handshake succeeded on attempt {}", attempt + 1);
                return Ok(SessionState::Open);
            }
            Ok(reply) => debug!("confirm(): unexpected reply {:x?}, retrying", reply),
            Err(TransportError::Timeout { .. }) => {
                debug!("confirm(): retry #{attempt} timed out");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(FlashError::Session(SessionError::HandshakeFailed(
        MAX_HANDSHAKE_RETRIES,
    )))
}

/// Runs the full startup handshake: `inquire()`, falling back to
/// `confirm()` on [`InquireResult::NotOpen`]. Returns the resulting
/// [`SessionState`], always [`SessionState::Open`] on success.
pub fn open_session(transport: &mut dyn Transport) -> Result<SessionState, FlashError> {
    match inquire(transport)? {
        InquireResult::AlreadyOpen => Ok(SessionState::Open),
        InquireResult::NotOpen => confirm(transport),
    }
}

/// Reserved authentication hook. Not implemented by the device's boot
/// ROM; always returns [`SessionError::Unsupported`] (spec.md §9).
pub fn authenticate_connection() -> Result<(), FlashError> {
    Err(FlashError::Session(SessionError::Unsupported))
}
