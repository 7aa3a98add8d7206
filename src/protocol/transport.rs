//! Transport abstraction: any non-blocking byte channel to the cloud.
//!
//! Concrete implementations:
//! - TCP socket (host, see `adapters::tcp`)
//! - the device's own network stack on target
//!
//! The engine is generic over `Transport`, so adding a new link
//! requires no change to the protocol logic.

use crate::error::TransportError;
use crate::ports::Clock;
use log::warn;

/// Non-blocking byte-oriented transport channel.
pub trait Transport {
    /// Error type for this transport. Any error is fatal to the session.
    type Error: core::fmt::Debug;

    /// Write up to `data.len()` bytes. Returns the number accepted.
    fn send(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Read up to `buf.len()` bytes into `buf`.
    /// Returns 0 if no data is available yet.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Whether `error` means the peer closed the connection.
    fn is_closed(_error: &Self::Error) -> bool {
        false
    }
}

/// Classify a failed `send`.
pub fn send_error<T: Transport>(error: &T::Error) -> TransportError {
    warn!("transport: send failed: {:?}", error);
    if T::is_closed(error) {
        TransportError::Closed
    } else {
        TransportError::SendFailed
    }
}

/// Classify a failed `receive`.
pub fn receive_error<T: Transport>(error: &T::Error) -> TransportError {
    warn!("transport: receive failed: {:?}", error);
    if T::is_closed(error) {
        TransportError::Closed
    } else {
        TransportError::ReceiveFailed
    }
}

/// A null transport that discards all writes and never reads.
pub struct NullTransport;

impl Transport for NullTransport {
    type Error = ();

    fn send(&mut self, data: &[u8]) -> Result<usize, ()> {
        Ok(data.len())
    }

    fn receive(&mut self, _buf: &mut [u8]) -> Result<usize, ()> {
        Ok(0)
    }
}

/// Send all of `data`, polling until done. Fails with `Timeout` once the
/// transport stalls more than `timeout_ms` after the call started.
pub fn blocking_send<T: Transport, K: Clock>(
    transport: &mut T,
    clock: &K,
    data: &[u8],
    timeout_ms: u32,
) -> Result<(), TransportError> {
    let start = clock.millis();
    let mut sent = 0;
    while sent < data.len() {
        match transport.send(&data[sent..]) {
            Ok(0) => {
                if clock.millis().wrapping_sub(start) > timeout_ms {
                    warn!("transport: send timed out after {}/{} bytes", sent, data.len());
                    return Err(TransportError::Timeout);
                }
            }
            Ok(n) => sent += n,
            Err(e) => return Err(send_error::<T>(&e)),
        }
    }
    Ok(())
}

/// Fill `buf` completely, polling until done. Same timeout rule as
/// [`blocking_send`].
pub fn blocking_receive<T: Transport, K: Clock>(
    transport: &mut T,
    clock: &K,
    buf: &mut [u8],
    timeout_ms: u32,
) -> Result<(), TransportError> {
    let start = clock.millis();
    let mut received = 0;
    while received < buf.len() {
        match transport.receive(&mut buf[received..]) {
            Ok(0) => {
                if clock.millis().wrapping_sub(start) > timeout_ms {
                    warn!(
                        "transport: receive timed out after {}/{} bytes",
                        received,
                        buf.len()
                    );
                    return Err(TransportError::Timeout);
                }
            }
            Ok(n) => received += n,
            Err(e) => return Err(receive_error::<T>(&e)),
        }
    }
    Ok(())
}
