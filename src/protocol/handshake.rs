//! Session handshake.
//!
//! ```text
//!  device                                   cloud
//!    │ ◀──────────── nonce (40 B) ─────────── │
//!    │ ── RSA(nonce ‖ device id) (256 B) ───▶ │
//!    │ ◀──── credentials blob (384 B) ──────── │
//!    │        [0..128)   RSA(creds) for device
//!    │        [128..384) sig(HMAC-SHA1(creds, [0..128)))
//!    │ ── AES hello (2 + 16 B) ─────────────▶ │
//! ```
//!
//! The first three exchanges are raw bytes; the hello is the first
//! encrypted frame. The session only becomes usable once the hello has
//! been sent.

use super::crypto::{Crypto, credential_hmac};
use super::message;
use super::session::{CREDENTIALS_SIZE, Session};
use super::transport::{Transport, blocking_receive, blocking_send};
use crate::config::ProtocolConfig;
use crate::error::HandshakeError;
use crate::ports::Clock;
use log::{debug, info, warn};

pub const NONCE_SIZE: usize = 40;
pub const DEVICE_ID_SIZE: usize = 12;
pub const ENCRYPTED_NONCE_SIZE: usize = 256;
pub const CREDENTIALS_BLOB_SIZE: usize = 384;
/// RSA ciphertext of the credentials at the front of the blob.
pub const CREDENTIALS_CIPHERTEXT_SIZE: usize = 128;

/// Everything the handshake borrows from the engine.
pub struct HandshakeContext<'a, T, C, K> {
    pub transport: &'a mut T,
    pub crypto: &'a mut C,
    pub clock: &'a K,
    pub config: &'a ProtocolConfig,
    pub device_id: &'a [u8; DEVICE_ID_SIZE],
    /// Scratch for the hello frame; needs at least 18 bytes.
    pub scratch: &'a mut [u8],
}

/// Run the handshake and return the established session.
pub fn handshake<T, C, K>(
    ctx: HandshakeContext<'_, T, C, K>,
    newly_upgraded: bool,
) -> Result<Session, HandshakeError>
where
    T: Transport,
    C: Crypto,
    K: Clock,
{
    let timeout = ctx.config.blocking_timeout_ms;

    let mut nonce_and_id = [0u8; NONCE_SIZE + DEVICE_ID_SIZE];
    blocking_receive(ctx.transport, ctx.clock, &mut nonce_and_id[..NONCE_SIZE], timeout)?;
    nonce_and_id[NONCE_SIZE..].copy_from_slice(ctx.device_id);
    debug!("handshake: nonce received");

    let mut encrypted = [0u8; ENCRYPTED_NONCE_SIZE];
    let n = ctx
        .crypto
        .rsa_encrypt(&nonce_and_id, &mut encrypted)
        .map_err(|_| HandshakeError::RsaEncrypt)?;
    if n != ENCRYPTED_NONCE_SIZE {
        warn!("handshake: RSA output was {} bytes", n);
        return Err(HandshakeError::RsaEncrypt);
    }
    blocking_send(ctx.transport, ctx.clock, &encrypted, timeout)?;

    let mut blob = [0u8; CREDENTIALS_BLOB_SIZE];
    blocking_receive(ctx.transport, ctx.clock, &mut blob, timeout)?;

    let credentials = verify_credentials(ctx.crypto, &blob)?;
    let mut session = Session::from_credentials(&credentials);

    let id = session.next_message_id();
    let scratch = ctx.scratch;
    let len = message::hello(
        scratch.get_mut(2..).ok_or(HandshakeError::Crypto)?,
        id,
        ctx.config.product_id,
        ctx.config.product_firmware_version,
        newly_upgraded,
    )
    .map_err(|_| HandshakeError::Crypto)?;
    session
        .encrypt(ctx.crypto, &mut scratch[2..2 + len])
        .map_err(|_| HandshakeError::Crypto)?;
    scratch[..2].copy_from_slice(&(len as u16).to_be_bytes());
    blocking_send(ctx.transport, ctx.clock, &scratch[..2 + len], timeout)?;

    info!("handshake: session established (newly_upgraded={})", newly_upgraded);
    Ok(session)
}

/// Decrypt the credentials and check the server signature over them.
pub fn verify_credentials<C: Crypto + ?Sized>(
    crypto: &mut C,
    blob: &[u8; CREDENTIALS_BLOB_SIZE],
) -> Result<[u8; CREDENTIALS_SIZE], HandshakeError> {
    let (ciphertext, signature) = blob.split_at(CREDENTIALS_CIPHERTEXT_SIZE);

    let mut plain = [0u8; CREDENTIALS_CIPHERTEXT_SIZE];
    let n = crypto.rsa_decrypt(ciphertext, &mut plain).map_err(|_| {
        warn!("handshake: credential decrypt failed");
        HandshakeError::DecryptFailed
    })?;
    if n != CREDENTIALS_SIZE {
        warn!("handshake: credentials were {} bytes", n);
        return Err(HandshakeError::DecryptFailed);
    }
    let mut credentials = [0u8; CREDENTIALS_SIZE];
    credentials.copy_from_slice(&plain[..CREDENTIALS_SIZE]);

    let digest = credential_hmac(&credentials, ciphertext).map_err(|_| HandshakeError::SignatureInvalid)?;
    crypto.rsa_verify(signature, &digest).map_err(|_| {
        warn!("handshake: credential signature invalid");
        HandshakeError::SignatureInvalid
    })?;
    Ok(credentials)
}
