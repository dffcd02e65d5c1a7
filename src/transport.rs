//! The byte-oriented transport adapter: `send`/`recv_exact` over a
//! duplex serial channel, with no framing awareness whatsoever.
//!
//! Grounded in the teacher's `connection/serial.rs::SerialConnection`,
//! adapted from its `tokio`/`tokio-serial` async I/O to blocking
//! `serialport` reads, since the RA protocol's request/response
//! discipline is strictly synchronous (spec.md §5).

use std::io::{Read, Write};
use std::time::Duration;

use log::trace;

use crate::error::TransportError;

/// Default per-read timeout for most commands.
pub const DEFAULT_TIMEOUT_MS: u64 = 100;
/// Per-read timeout used for the slow `ERA_CMD` response.
pub const ERASE_TIMEOUT_MS: u64 = 1000;
/// Default serial baud rate for the RA bootloader.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// A blocking, duplex byte channel with no framing knowledge.
///
/// Implemented by [`SerialTransport`] for real hardware and by
/// [`MockTransport`] (test-only) for unit tests that don't need real
/// hardware.
pub trait Transport {
    /// Writes `bytes` in full.
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Reads exactly `n` bytes, accumulating partial reads, bounded by
    /// `timeout`. Returns [`TransportError::Timeout`] if `n` bytes do
    /// not arrive before the deadline.
    fn recv_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;
}

/// A [`Transport`] over a real OS serial device, opened via `serialport`.
///
/// Owns the underlying handle for its lifetime; the handle is released
/// on drop (scoped acquisition, guaranteed release on all exit paths —
/// `Box<dyn SerialPort>`'s own `Drop` closes the OS file descriptor).
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    /// Opens `path` at [`DEFAULT_BAUD_RATE`], 8N1, with an initial
    /// per-read timeout of [`DEFAULT_TIMEOUT_MS`].
    pub fn open(path: &str) -> Result<Self, TransportError> {
        let port = serialport::new(path, DEFAULT_BAUD_RATE)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()
            .map_err(|e| TransportError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        trace!("send: {:x?}", bytes);
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn recv_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.port
            .set_timeout(timeout)
            .map_err(|e| TransportError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        let mut buf = vec![0u8; n];
        let mut received = 0;
        let deadline = std::time::Instant::now() + timeout;

        while received < n {
            if std::time::Instant::now() >= deadline {
                return Err(TransportError::Timeout {
                    expected: n,
                    received,
                });
            }
            match self.port.read(&mut buf[received..]) {
                Ok(0) => continue,
                Ok(count) => received += count,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    return Err(TransportError::Timeout {
                        expected: n,
                        received,
                    })
                }
                Err(e) => return Err(TransportError::Io(e)),
            }
        }

        trace!("recv: {:x?}", buf);
        Ok(buf)
    }
}

/// An in-memory [`Transport`] that replays a queue of canned responses,
/// used by the session/command-engine/transfer-engine unit tests so
/// they don't need real hardware.
#[cfg(test)]
pub struct MockTransport {
    pub sent: Vec<Vec<u8>>,
    pub responses: std::collections::VecDeque<Vec<u8>>,
}

#[cfg(test)]
impl MockTransport {
    pub fn new(responses: Vec<Vec<u8>>) -> Self {
        Self {
            sent: Vec::new(),
            responses: responses.into_iter().collect(),
        }
    }
}

#[cfg(test)]
impl Transport for MockTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.sent.push(bytes.to_vec());
        Ok(())
    }

    fn recv_exact(&mut self, n: usize, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let next = self
            .responses
            .pop_front()
            .ok_or(TransportError::Timeout {
                expected: n,
                received: 0,
            })?;
        if next.len() != n {
            return Err(TransportError::Timeout {
                expected: n,
                received: next.len(),
            });
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_transport_replays_in_order() {
        let mut t = MockTransport::new(vec![vec![1, 2, 3], vec![4, 5]]);
        t.send(&[0xAA]).unwrap();
        assert_eq!(t.recv_exact(3, Duration::from_millis(10)).unwrap(), vec![1, 2, 3]);
        assert_eq!(t.recv_exact(2, Duration::from_millis(10)).unwrap(), vec![4, 5]);
        assert_eq!(t.sent, vec![vec![0xAA]]);
    }

    #[test]
    fn mock_transport_times_out_when_exhausted() {
        let mut t = MockTransport::new(vec![]);
        assert!(matches!(
            t.recv_exact(1, Duration::from_millis(10)),
            Err(TransportError::Timeout { .. })
        ));
    }
}
