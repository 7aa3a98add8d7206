//! Crypto port and the software primitives behind it.
//!
//! RSA stays behind the [`Crypto`] trait: the device key lives in
//! protected storage and targets usually have a hardware engine for it.
//! AES-128-CBC has a portable default built on the `aes` and `cbc`
//! crates, which a target can override with its accelerator.
//!
//! No padding is applied here; frames are PKCS#7-padded by the codec
//! before they reach the cipher.

use crate::error::CryptoError;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha1::Sha1;

type AesCbcEnc = cbc::Encryptor<aes::Aes128>;
type AesCbcDec = cbc::Decryptor<aes::Aes128>;
type HmacSha1 = Hmac<Sha1>;

pub const AES_KEY_SIZE: usize = 16;
pub const AES_BLOCK_SIZE: usize = 16;
pub const HMAC_SHA1_SIZE: usize = 20;

/// Cryptographic primitives needed by the session.
///
/// Implementations own the RSA keys: the server public key for
/// `rsa_encrypt`/`rsa_verify` and the device private key for
/// `rsa_decrypt`.
pub trait Crypto {
    /// RSA-encrypt `input` with the server public key. Returns the
    /// ciphertext length written to `output`.
    fn rsa_encrypt(&mut self, input: &[u8], output: &mut [u8]) -> Result<usize, CryptoError>;

    /// RSA-decrypt `input` with the device private key. Returns the
    /// plaintext length written to `output`.
    fn rsa_decrypt(&mut self, input: &[u8], output: &mut [u8]) -> Result<usize, CryptoError>;

    /// Verify the server's signature over `digest`.
    fn rsa_verify(&mut self, signature: &[u8], digest: &[u8]) -> Result<(), CryptoError>;

    /// Encrypt `buf` in place. `buf.len()` must be a positive multiple of 16.
    fn aes_cbc_encrypt(
        &mut self,
        key: &[u8; AES_KEY_SIZE],
        iv: &[u8; AES_BLOCK_SIZE],
        buf: &mut [u8],
    ) -> Result<(), CryptoError> {
        aes_cbc_encrypt(key, iv, buf)
    }

    /// Decrypt `buf` in place. `buf.len()` must be a positive multiple of 16.
    fn aes_cbc_decrypt(
        &mut self,
        key: &[u8; AES_KEY_SIZE],
        iv: &[u8; AES_BLOCK_SIZE],
        buf: &mut [u8],
    ) -> Result<(), CryptoError> {
        aes_cbc_decrypt(key, iv, buf)
    }
}

fn check_blocks(buf: &[u8]) -> Result<(), CryptoError> {
    if buf.is_empty() || buf.len() % AES_BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidLength);
    }
    Ok(())
}

/// Software AES-128-CBC encryption.
pub fn aes_cbc_encrypt(
    key: &[u8; AES_KEY_SIZE],
    iv: &[u8; AES_BLOCK_SIZE],
    buf: &mut [u8],
) -> Result<(), CryptoError> {
    check_blocks(buf)?;
    let len = buf.len();
    AesCbcEnc::new_from_slices(key, iv)
        .map_err(|_| CryptoError::InvalidLength)?
        .encrypt_padded_mut::<NoPadding>(buf, len)
        .map_err(|_| CryptoError::Backend)?;
    Ok(())
}

/// Software AES-128-CBC decryption.
pub fn aes_cbc_decrypt(
    key: &[u8; AES_KEY_SIZE],
    iv: &[u8; AES_BLOCK_SIZE],
    buf: &mut [u8],
) -> Result<(), CryptoError> {
    check_blocks(buf)?;
    AesCbcDec::new_from_slices(key, iv)
        .map_err(|_| CryptoError::InvalidLength)?
        .decrypt_padded_mut::<NoPadding>(buf)
        .map_err(|_| CryptoError::Backend)?;
    Ok(())
}

/// HMAC-SHA1 keyed with the session credentials over the credential
/// ciphertext. The server signs this digest during the handshake.
pub fn credential_hmac(credentials: &[u8], ciphertext: &[u8]) -> Result<[u8; HMAC_SHA1_SIZE], CryptoError> {
    let mut mac = <HmacSha1 as Mac>::new_from_slice(credentials).map_err(|_| CryptoError::InvalidLength)?;
    mac.update(ciphertext);
    let mut digest = [0u8; HMAC_SHA1_SIZE];
    digest.copy_from_slice(&mac.finalize().into_bytes());
    Ok(digest)
}
