//! The wire frame codec: `SOD | LNH | LNL | TAG | PAYLOAD | SUM | ETX`.
//!
//! There are exactly two frame shapes on this protocol (host command,
//! device response / host data-ack), both sharing this envelope and
//! differing only in `SOD`. Unlike the teacher's const-generic packet
//! types (one Rust type per VEX command), the RA bootloader's eight
//! commands share identical framing, so this module is one
//! parameterized codec rather than eight near-duplicate structs.

use crate::error::{DeviceError, FrameError};

/// `SOD` value used on every host-to-device command packet.
pub const SOD_COMMAND: u8 = 0x01;
/// `SOD` value used on every device-to-host response and every
/// host-to-device data/ack packet.
pub const SOD_DATA: u8 = 0x81;
/// Fixed trailing byte of every frame.
pub const ETX: u8 = 0x03;

/// Maximum payload size a data chunk may carry.
pub const MAX_PAYLOAD: usize = 1024;
/// Maximum whole-frame size (`MAX_PAYLOAD + 6` envelope bytes).
pub const MAX_FRAME: usize = MAX_PAYLOAD + 6;

/// A decoded frame: the command/response tag and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: u8,
    pub payload: Vec<u8>,
}

/// Computes `SUM` such that `(LNH + LNL + TAG + Σ PAYLOAD + SUM) mod 256 == 0`.
///
/// The sum is taken over the literal wire bytes — `lnh`, `lnl`, `tag`,
/// then raw payload bytes — never pre-folded. This is what makes
/// `decode(encode(x)) == x` hold; see spec.md §4.1's checksum note.
fn checksum(lnh: u8, lnl: u8, tag: u8, payload: &[u8]) -> u8 {
    let mut sum: u8 = lnh.wrapping_add(lnl).wrapping_add(tag);
    for &byte in payload {
        sum = sum.wrapping_add(byte);
    }
    sum.wrapping_neg()
}

fn length_bytes(payload_len: usize) -> (u8, u8) {
    let len = (payload_len as u16) + 1;
    ((len >> 8) as u8, (len & 0xFF) as u8)
}

/// Encodes a host-to-device command frame (`SOD = 0x01`).
pub fn encode_command(cmd: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    encode_with_sod(SOD_COMMAND, cmd, payload)
}

/// Encodes a device-to-host response, or host-to-device data/ack, frame
/// (`SOD = 0x81`).
pub fn encode_data(tag: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    encode_with_sod(SOD_DATA, tag, payload)
}

fn encode_with_sod(sod: u8, tag: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() >= MAX_PAYLOAD {
        return Err(FrameError::EncodeOversize(payload.len()));
    }

    let (lnh, lnl) = length_bytes(payload.len());
    let sum = checksum(lnh, lnl, tag, payload);

    let mut frame = Vec::with_capacity(payload.len() + 7);
    frame.push(sod);
    frame.push(lnh);
    frame.push(lnl);
    frame.push(tag);
    frame.extend_from_slice(payload);
    frame.push(sum);
    frame.push(ETX);
    Ok(frame)
}

/// Decodes a device-to-host frame. `data` may be longer than the frame;
/// only the leading `4 + pkt_len + 2` bytes are consumed.
///
/// Returns [`FrameError::BadSod`] if `SOD != 0x81`, [`FrameError::ShortFrame`]
/// if `data` doesn't hold a full frame, [`FrameError::BadChecksum`] if the
/// recomputed sum disagrees, [`FrameError::BadEtx`] if the trailing byte
/// isn't `0x03`. A `TAG & 0x80` response decodes successfully as a `Frame`;
/// callers that want the device error surfaced use [`decode_checked`].
pub fn decode(data: &[u8]) -> Result<Frame, FrameError> {
    if data.len() < 4 {
        return Err(FrameError::ShortFrame);
    }

    let sod = data[0];
    if sod != SOD_DATA {
        return Err(FrameError::BadSod(sod));
    }

    let lnh = data[1];
    let lnl = data[2];
    let tag = data[3];
    let pkt_len = (((lnh as u16) << 8) | (lnl as u16)).wrapping_sub(1) as usize;

    if data.len() < 4 + pkt_len + 2 {
        return Err(FrameError::ShortFrame);
    }

    let payload = &data[4..4 + pkt_len];
    let sum = data[4 + pkt_len];
    let etx = data[4 + pkt_len + 1];

    let expected_sum = checksum(lnh, lnl, tag, payload);
    if sum != expected_sum {
        return Err(FrameError::BadChecksum {
            expected: sum,
            actual: expected_sum,
        });
    }

    if etx != ETX {
        return Err(FrameError::BadEtx(etx));
    }

    Ok(Frame {
        tag,
        payload: payload.to_vec(),
    })
}

/// Decodes a device-to-host frame and surfaces `TAG & 0x80` responses as
/// [`DeviceError`] rather than as a plain [`Frame`].
pub fn decode_checked(data: &[u8]) -> Result<Result<Frame, DeviceError>, FrameError> {
    let frame = decode(data)?;
    if frame.tag & 0x80 != 0 {
        let code = *frame.payload.first().unwrap_or(&0);
        Ok(Err(DeviceError::from_code(code)))
    } else {
        Ok(Ok(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Scenario 1-3 from spec.md §8: calc_sum literal fixtures.
    #[test]
    fn checksum_fixtures() {
        let (lnh, lnl) = length_bytes(1);
        assert_eq!((lnh, lnl), (0x00, 0x02));
        assert_eq!(checksum(lnh, lnl, 0x12, &[0x00]), 0xEC);
        assert_eq!(checksum(lnh, lnl, 0x34, &[0x00]), 0xCA);
        assert_eq!(checksum(lnh, lnl, 0x00, &[0x00]), 0xFE);
    }

    // Scenario 4.
    #[test]
    fn decode_simple_ack() {
        let data = [0x81, 0x00, 0x02, 0x00, 0x00, 0xFE, 0x03];
        let frame = decode(&data).unwrap();
        assert_eq!(frame.tag, 0x00);
        assert_eq!(frame.payload, vec![0x00]);
    }

    // Scenario 5.
    #[test]
    fn decode_multi_byte_payload() {
        let data = [
            0x81, 0x00, 0x04, 0x15, 0xAA, 0xBB, 0xCC, 0xB6, 0x03,
        ];
        let frame = decode(&data).unwrap();
        assert_eq!(frame.tag, 0x15);
        assert_eq!(frame.payload, vec![0xAA, 0xBB, 0xCC]);
    }

    // Scenario 6.
    #[test]
    fn decode_device_error() {
        let data = [0x81, 0x00, 0x02, 0x93, 0xC3, 0x38, 0x03];
        let result = decode_checked(&data).unwrap();
        assert_eq!(result, Err(DeviceError::FlowError));
    }

    // Scenario 7: round trip through the command encoder.
    #[test]
    fn round_trip_command() {
        let encoded = encode_command(0x13, &[0x00, 0x01, 0x02]).unwrap();
        // Flip SOD to 0x81 to decode it as if it were a device frame,
        // since decode() only accepts SOD_DATA framed bytes.
        let mut as_data = encoded.clone();
        as_data[0] = SOD_DATA;
        let frame = decode(&as_data).unwrap();
        assert_eq!(frame.tag, 0x13);
        assert_eq!(frame.payload, vec![0x00, 0x01, 0x02]);
    }

    #[test]
    fn decoder_rejects_bad_sod() {
        let mut data = [0x81, 0x00, 0x02, 0x00, 0x00, 0xFE, 0x03];
        data[0] = 0x00;
        assert_eq!(decode(&data), Err(FrameError::BadSod(0x00)));
    }

    #[test]
    fn decoder_rejects_bad_etx() {
        let mut data = [0x81, 0x00, 0x02, 0x00, 0x00, 0xFE, 0x03];
        data[6] = 0x04;
        assert_eq!(decode(&data), Err(FrameError::BadEtx(0x04)));
    }

    #[test]
    fn decoder_rejects_flipped_payload_byte() {
        let mut data = [0x81, 0x00, 0x02, 0x00, 0x00, 0xFE, 0x03];
        data[4] ^= 0x01;
        assert!(matches!(decode(&data), Err(FrameError::BadChecksum { .. })));
    }

    #[test]
    fn encode_rejects_oversize_payload() {
        let payload = vec![0u8; MAX_PAYLOAD];
        assert_eq!(
            encode_command(0x13, &payload),
            Err(FrameError::EncodeOversize(MAX_PAYLOAD))
        );
    }

    #[test]
    fn round_trip_every_command_and_length() {
        for cmd in [0x00u8, 0x12, 0x13, 0x15, 0x30, 0x34, 0x3A, 0x3B] {
            for len in [0usize, 1, 8, 255, 1023] {
                let payload = vec![0xAB; len];
                let encoded = encode_command(cmd, &payload).unwrap();
                let mut as_data = encoded.clone();
                as_data[0] = SOD_DATA;
                let frame = decode(&as_data).unwrap();
                assert_eq!(frame.tag, cmd);
                assert_eq!(frame.payload, payload);
            }
        }
    }
}
