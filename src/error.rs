//! Error taxonomy for every layer of the flasher core.
//!
//! Each layer gets its own `thiserror`-derived enum; [`FlashError`]
//! composes them with `#[from]` so a caller can `?` all the way up to
//! the CLI without manual conversion, mirroring how the teacher crate's
//! `ConnectionError` composes `EncodeError`/`DecodeError`/`io::Error`.

use thiserror::Error;

/// Errors from [`crate::frame`]'s encoder/decoder.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("start-of-data byte was {0:#04x}, expected 0x81")]
    BadSod(u8),
    #[error("frame is shorter than its declared length")]
    ShortFrame,
    #[error("checksum mismatch: frame said {expected:#04x}, computed {actual:#04x}")]
    BadChecksum { expected: u8, actual: u8 },
    #[error("end-of-text byte was {0:#04x}, expected 0x03")]
    BadEtx(u8),
    #[error("payload of {0} bytes exceeds the 1024 byte chunk limit")]
    EncodeOversize(usize),
}

/// Errors from the byte-level [`crate::transport::Transport`].
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out waiting for {expected} bytes (received {received})")]
    Timeout { expected: usize, received: usize },
}

/// One error code reported by the device in a response's `TAG & 0x80` payload.
///
/// Named per `original_source/flasher/flasher.py`'s `error_codes` table, upgraded
/// from a string lookup into a typed enum.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    #[error("ERR_UNSU: command not supported")]
    Unsupported,
    #[error("ERR_PCKT: packet error")]
    PacketError,
    #[error("ERR_CHKS: checksum error")]
    ChecksumError,
    #[error("ERR_FLOW: flow error")]
    FlowError,
    #[error("ERR_ADDR: address error")]
    AddressError,
    #[error("ERR_BAUD: baud rate error")]
    BaudError,
    #[error("ERR_PROT: protocol error")]
    ProtocolError,
    #[error("ERR_ID: id error")]
    IdError,
    #[error("ERR_SERI: serial programming disabled")]
    SerialProgrammingDisabled,
    #[error("ERR_ERA: erase error")]
    EraseError,
    #[error("ERR_WRI: write error")]
    WriteError,
    #[error("ERR_SEQ: sequence error")]
    SequenceError,
    #[error("unrecognized device error code {0:#04x}")]
    Unknown(u8),
}

impl DeviceError {
    /// Decodes the raw device error byte (the first payload byte of an
    /// error response) per the taxonomy in spec.md §3.
    pub fn from_code(code: u8) -> Self {
        match code {
            0xC0 => Self::Unsupported,
            0xC1 => Self::PacketError,
            0xC2 => Self::ChecksumError,
            0xC3 => Self::FlowError,
            0xD0 => Self::AddressError,
            0xD4 => Self::BaudError,
            0xDA => Self::ProtocolError,
            0xDB => Self::IdError,
            0xDC => Self::SerialProgrammingDisabled,
            0xE1 => Self::EraseError,
            0xE2 => Self::WriteError,
            0xE7 => Self::SequenceError,
            other => Self::Unknown(other),
        }
    }

    /// The raw wire code for this error, the inverse of [`Self::from_code`].
    pub fn code(self) -> u8 {
        match self {
            Self::Unsupported => 0xC0,
            Self::PacketError => 0xC1,
            Self::ChecksumError => 0xC2,
            Self::FlowError => 0xC3,
            Self::AddressError => 0xD0,
            Self::BaudError => 0xD4,
            Self::ProtocolError => 0xDA,
            Self::IdError => 0xDB,
            Self::SerialProgrammingDisabled => 0xDC,
            Self::EraseError => 0xE1,
            Self::WriteError => 0xE2,
            Self::SequenceError => 0xE7,
            Self::Unknown(code) => code,
        }
    }
}

/// Errors from [`crate::transfer`]'s boundary computation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentError {
    #[error("start address {start:#010x} is not a multiple of the erase unit {erase_unit:#x}")]
    UnalignedStart { start: u32, erase_unit: u32 },
    #[error("computed end address {end:#010x} does not exceed start address {start:#010x}")]
    EmptyRange { start: u32, end: u32 },
    #[error("end address {end:#010x} exceeds area end {area_end:#010x}")]
    OutOfRange { end: u32, area_end: u32 },
}

/// Errors from [`crate::session`]'s handshake.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("cold-boot handshake failed after {0} attempts")]
    HandshakeFailed(usize),
    #[error("no session is open; call inquire()/confirm() first")]
    NotConnected,
    #[error("authenticate_connection is reserved and not implemented")]
    Unsupported,
}

/// The top-level error type surfaced by every public operation in this crate.
#[derive(Error, Debug)]
pub enum FlashError {
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
    #[error("alignment error: {0}")]
    Alignment(#[from] AlignmentError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("verify mismatch: readback differs from source at offset {offset:#x}")]
    VerifyMismatch { offset: usize },
}

impl From<std::io::Error> for FlashError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(TransportError::Io(err))
    }
}
