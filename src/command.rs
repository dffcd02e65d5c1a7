//! The command engine (C4): one request, one response.
//!
//! Grounded in the teacher's `Connection::packet_handshake` /
//! `SerialConnection::receive_packet` pattern, collapsed to a single
//! synchronous primitive since the RA protocol has no concurrent
//! in-flight requests and no retry of framed commands (spec.md §7).

use std::time::Duration;

use log::trace;

use crate::error::{DeviceError, FlashError, FrameError};
use crate::frame::{self, Frame};
use crate::transport::Transport;

fn request_with(
    transport: &mut dyn Transport,
    encoded: Vec<u8>,
    label: &str,
    tag: u8,
    response_len: usize,
    timeout: Duration,
) -> Result<Frame, FlashError> {
    transport.send(&encoded)?;

    let response = transport.recv_exact(response_len, timeout)?;
    trace!("{label} {:#04x} response: {:x?}", tag, response);

    match frame::decode_checked(&response)? {
        Ok(frame) => Ok(frame),
        Err(device_err) => Err(FlashError::Device(device_err)),
    }
}

/// Sends a command frame and reads back exactly `response_len` bytes,
/// decoding them as a device response.
///
/// If the response's `TAG & 0x80` is set, the device error is surfaced
/// unchanged as `Err(FlashError::Device(..))`; framing/transport errors
/// propagate as-is. Higher layers (session, transfer) decide whether a
/// given device error is fatal for their operation.
pub fn request(
    transport: &mut dyn Transport,
    cmd: u8,
    payload: &[u8],
    response_len: usize,
    timeout: Duration,
) -> Result<Frame, FlashError> {
    let encoded = frame::encode_command(cmd, payload)?;
    request_with(transport, encoded, "command", cmd, response_len, timeout)
}

/// Sends a host-to-device *data* frame (used mid-transfer for write
/// chunks and read acks, both framed with `SOD = 0x81`) and reads back
/// exactly `response_len` bytes.
pub fn request_data(
    transport: &mut dyn Transport,
    tag: u8,
    payload: &[u8],
    response_len: usize,
    timeout: Duration,
) -> Result<Frame, FlashError> {
    let encoded = frame::encode_data(tag, payload)?;
    request_with(transport, encoded, "data", tag, response_len, timeout)
}

/// Decodes a raw response buffer without sending anything first, used
/// by the session layer which has its own framing around `inquire()`.
pub fn decode_response(data: &[u8]) -> Result<Result<Frame, DeviceError>, FrameError> {
    frame::decode_checked(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[test]
    fn request_surfaces_device_error() {
        let mut t = MockTransport::new(vec![vec![0x81, 0x00, 0x02, 0x93, 0xC3, 0x38, 0x03]]);
        let err = request(&mut t, 0x13, &[], 7, Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, FlashError::Device(DeviceError::FlowError)));
    }

    #[test]
    fn request_decodes_ok_response() {
        let mut t = MockTransport::new(vec![vec![0x81, 0x00, 0x02, 0x00, 0x00, 0xFE, 0x03]]);
        let frame = request(&mut t, 0x00, &[], 7, Duration::from_millis(50)).unwrap();
        assert_eq!(frame.tag, 0x00);
        assert_eq!(frame.payload, vec![0x00]);
    }
}
