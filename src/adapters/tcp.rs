//! TCP transport adapter.
//!
//! Implements [`Transport`](crate::protocol::Transport) over a
//! non-blocking `std::net::TcpStream` connected to the cloud endpoint.
//!
//! ## Connection model
//!
//! 1. `connect()` opens the socket (blocking, with a timeout) and then
//!    switches it to non-blocking mode.
//! 2. `receive()` returns `Ok(0)` on `WouldBlock`; the protocol's
//!    blocking helpers poll it under their own timeout.
//! 3. EOF or any socket error drops the stream. The engine treats the
//!    error as fatal and the caller reconnects.

use core::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::{info, warn};

use crate::protocol::Transport;

/// Default cloud port.
pub const DEFAULT_PORT: u16 = 5683;

/// Errors originating from the TCP transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpTransportError {
    /// Address resolution, connect or socket I/O failure.
    Io,
    /// The peer closed the connection.
    Closed,
    /// Operation requires a connected stream but none is present.
    NotConnected,
}

impl fmt::Display for TcpTransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => write!(f, "TCP/socket I/O error"),
            Self::Closed => write!(f, "connection closed by peer"),
            Self::NotConnected => write!(f, "not connected"),
        }
    }
}

impl std::error::Error for TcpTransportError {}

/// Non-blocking client connection to the cloud.
pub struct TcpTransport {
    stream: Option<TcpStream>,
}

impl TcpTransport {
    /// Connect to the first address `addr` resolves to.
    pub fn connect(addr: impl ToSocketAddrs, timeout: Duration) -> Result<Self, TcpTransportError> {
        let addr = addr
            .to_socket_addrs()
            .map_err(|_| TcpTransportError::Io)?
            .next()
            .ok_or(TcpTransportError::Io)?;
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
            warn!("tcp: connect to {} failed: {}", addr, e);
            TcpTransportError::Io
        })?;
        info!("tcp: connected to {}", addr);
        Self::from_stream(stream)
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: TcpStream) -> Result<Self, TcpTransportError> {
        stream.set_nonblocking(true).map_err(|_| TcpTransportError::Io)?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("tcp: set_nodelay failed: {}", e);
        }
        Ok(Self { stream: Some(stream) })
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.peer_addr().ok())
    }

    /// Close the connection. Safe to call when already closed.
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            info!("tcp: disconnected");
        }
    }
}

impl Transport for TcpTransport {
    type Error = TcpTransportError;

    fn send(&mut self, data: &[u8]) -> Result<usize, TcpTransportError> {
        let stream = self.stream.as_mut().ok_or(TcpTransportError::NotConnected)?;
        match stream.write(data) {
            Ok(n) => Ok(n),
            Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(0),
            Err(e) => {
                warn!("tcp: write failed: {}", e);
                self.stream = None;
                Err(TcpTransportError::Io)
            }
        }
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TcpTransportError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let stream = self.stream.as_mut().ok_or(TcpTransportError::NotConnected)?;
        match stream.read(buf) {
            Ok(0) => {
                info!("tcp: peer closed the connection");
                self.stream = None;
                Err(TcpTransportError::Closed)
            }
            Ok(n) => Ok(n),
            Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(0),
            Err(e) => {
                warn!("tcp: read failed: {}", e);
                self.stream = None;
                Err(TcpTransportError::Io)
            }
        }
    }

    fn is_closed(error: &TcpTransportError) -> bool {
        matches!(error, TcpTransportError::Closed | TcpTransportError::NotConnected)
    }
}

// ───────────────────────────────────────────────────────────────
// Tests (loopback)
// ───────────────────────────────────────────────────────────────
