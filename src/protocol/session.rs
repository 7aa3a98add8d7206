//! Established session state.
//!
//! ```text
//! credentials (40 B, RSA-decrypted during the handshake)
//! ┌───────────────┬────────────────┬─────────────┐
//! │ AES key 0..16 │ IV seed 16..32 │ salt 32..40 │
//! └───────────────┴────────────────┴─────────────┘
//!   salt[0..2] → message id counter seed
//!   salt[2]    → token counter seed
//! ```
//!
//! Both directions start from the same IV seed and then chain
//! independently:
//! - send: `iv_send` becomes the LAST ciphertext block just sent
//! - receive: `iv_receive` becomes the FIRST ciphertext block just received
//!
//! The receive rule is what the deployed cloud expects; it is not
//! standard CBC chaining and must not be "fixed".

use super::crypto::{AES_BLOCK_SIZE, AES_KEY_SIZE, Crypto};
use crate::error::CryptoError;

/// Size of the decrypted handshake credentials.
pub const CREDENTIALS_SIZE: usize = 40;

/// Symmetric session established by the handshake.
pub struct Session {
    key: [u8; AES_KEY_SIZE],
    iv_send: [u8; AES_BLOCK_SIZE],
    iv_receive: [u8; AES_BLOCK_SIZE],
    salt: [u8; 8],
    message_id: u16,
    token: u8,
}

impl Session {
    pub fn from_credentials(credentials: &[u8; CREDENTIALS_SIZE]) -> Self {
        let mut key = [0u8; AES_KEY_SIZE];
        let mut iv = [0u8; AES_BLOCK_SIZE];
        let mut salt = [0u8; 8];
        key.copy_from_slice(&credentials[0..16]);
        iv.copy_from_slice(&credentials[16..32]);
        salt.copy_from_slice(&credentials[32..40]);
        Self {
            key,
            iv_send: iv,
            iv_receive: iv,
            message_id: u16::from_be_bytes([salt[0], salt[1]]),
            token: salt[2],
            salt,
        }
    }

    /// Next outbound message id (pre-incremented, wraps).
    pub fn next_message_id(&mut self) -> u16 {
        self.message_id = self.message_id.wrapping_add(1);
        self.message_id
    }

    /// Next outbound token (pre-incremented, wraps).
    pub fn next_token(&mut self) -> u8 {
        self.token = self.token.wrapping_add(1);
        self.token
    }

    pub fn salt(&self) -> &[u8; 8] {
        &self.salt
    }

    pub fn iv_send(&self) -> &[u8; AES_BLOCK_SIZE] {
        &self.iv_send
    }

    pub fn iv_receive(&self) -> &[u8; AES_BLOCK_SIZE] {
        &self.iv_receive
    }

    /// Encrypt a padded frame in place and chain `iv_send`.
    pub fn encrypt<C: Crypto + ?Sized>(&mut self, crypto: &mut C, buf: &mut [u8]) -> Result<(), CryptoError> {
        crypto.aes_cbc_encrypt(&self.key, &self.iv_send, buf)?;
        let last = buf.len() - AES_BLOCK_SIZE;
        self.iv_send.copy_from_slice(&buf[last..]);
        Ok(())
    }

    /// Decrypt a received frame in place and chain `iv_receive`.
    pub fn decrypt<C: Crypto + ?Sized>(&mut self, crypto: &mut C, buf: &mut [u8]) -> Result<(), CryptoError> {
        if buf.len() < AES_BLOCK_SIZE {
            return Err(CryptoError::InvalidLength);
        }
        let mut next_iv = [0u8; AES_BLOCK_SIZE];
        next_iv.copy_from_slice(&buf[..AES_BLOCK_SIZE]);
        crypto.aes_cbc_decrypt(&self.key, &self.iv_receive, buf)?;
        self.iv_receive = next_iv;
        Ok(())
    }
}

impl core::fmt::Debug for Session {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Key material stays out of logs.
        f.debug_struct("Session")
            .field("message_id", &self.message_id)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}
