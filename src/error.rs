//! Unified error types for the protocol engine.
//!
//! A single `ProtocolError` enum that every subsystem converts into, so
//! the caller's reconnect logic only has to ask [`ProtocolError::is_fatal`].
//! All variants are `Copy`; nothing here allocates.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level protocol error
// ---------------------------------------------------------------------------

/// Every fallible engine operation funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte transport failed or timed out.
    Transport(TransportError),
    /// Session establishment failed.
    Handshake(HandshakeError),
    /// A symmetric crypto operation failed on an established session.
    Crypto(CryptoError),
    /// A frame could not be encoded or decoded.
    Codec(CodecError),
    /// An operation needing a session was called before `handshake()`.
    NoSession,
    /// A ping went unanswered for longer than the ack timeout.
    PingTimeout,
}

impl ProtocolError {
    /// Whether the current session must be torn down and re-established.
    ///
    /// Codec errors only affect the frame being processed.
    pub const fn is_fatal(self) -> bool {
        !matches!(self, Self::Codec(_))
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Handshake(e) => write!(f, "handshake: {e}"),
            Self::Crypto(e) => write!(f, "crypto: {e}"),
            Self::Codec(e) => write!(f, "codec: {e}"),
            Self::NoSession => write!(f, "no established session"),
            Self::PingTimeout => write!(f, "ping ACK not received"),
        }
    }
}

impl core::error::Error for ProtocolError {}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// `Transport::send` reported an error.
    SendFailed,
    /// `Transport::receive` reported an error.
    ReceiveFailed,
    /// The peer closed the connection.
    Closed,
    /// A blocking transfer made no progress within its timeout.
    Timeout,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SendFailed => write!(f, "send failed"),
            Self::ReceiveFailed => write!(f, "receive failed"),
            Self::Closed => write!(f, "connection closed"),
            Self::Timeout => write!(f, "blocking transfer timed out"),
        }
    }
}

impl From<TransportError> for ProtocolError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Handshake errors
// ---------------------------------------------------------------------------

/// Handshake failures. Decrypt and signature failures carry distinct
/// numeric codes for diagnostics (see [`HandshakeError::code`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    /// Nonce receive, key send, credential receive or hello send failed.
    Transport(TransportError),
    /// RSA encryption of the nonce + device id failed.
    RsaEncrypt,
    /// The credential blob could not be decrypted with the device key.
    DecryptFailed,
    /// The server signature over the credential HMAC did not verify.
    SignatureInvalid,
    /// Encrypting the hello frame with the fresh session failed.
    Crypto,
}

impl HandshakeError {
    pub const DECRYPTION_ERROR: i32 = 6;
    pub const AUTHENTICATION_ERROR: i32 = 7;

    /// Numeric diagnostic code, stable across firmware versions.
    pub const fn code(self) -> i32 {
        match self {
            Self::Transport(_) => 2,
            Self::RsaEncrypt | Self::Crypto => 3,
            Self::DecryptFailed => Self::DECRYPTION_ERROR,
            Self::SignatureInvalid => Self::AUTHENTICATION_ERROR,
        }
    }
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::RsaEncrypt => write!(f, "RSA encrypt failed"),
            Self::DecryptFailed => write!(f, "credential decrypt failed"),
            Self::SignatureInvalid => write!(f, "credential signature invalid"),
            Self::Crypto => write!(f, "hello encryption failed"),
        }
    }
}

impl From<HandshakeError> for ProtocolError {
    fn from(e: HandshakeError) -> Self {
        Self::Handshake(e)
    }
}

impl From<TransportError> for HandshakeError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Crypto errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// Buffer length is not a positive multiple of the AES block size,
    /// or a key/output buffer has the wrong size.
    InvalidLength,
    /// The underlying primitive reported failure.
    Backend,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLength => write!(f, "invalid buffer length"),
            Self::Backend => write!(f, "primitive failed"),
        }
    }
}

impl From<CryptoError> for ProtocolError {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e)
    }
}

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// The output buffer cannot hold the encoded frame.
    BufferTooSmall,
    /// The input ended before a complete field.
    Truncated,
    /// PKCS#7 padding byte is zero, above 16, or longer than the frame.
    InvalidPadding,
    /// An option header or value is malformed or exceeds its limit.
    InvalidOption,
    /// A firehose subscription was requested without an event name.
    FirehoseRequiresName,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooSmall => write!(f, "buffer too small"),
            Self::Truncated => write!(f, "frame truncated"),
            Self::InvalidPadding => write!(f, "invalid PKCS#7 padding"),
            Self::InvalidOption => write!(f, "malformed option"),
            Self::FirehoseRequiresName => write!(f, "firehose subscription requires an event name"),
        }
    }
}

impl From<CodecError> for ProtocolError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, ProtocolError>;
