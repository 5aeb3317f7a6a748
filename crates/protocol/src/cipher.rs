//! Block cipher seam and the default AES-CBC implementation.
//!
//! The channel only needs `encrypt(key, iv, plaintext)` and
//! `decrypt(key, iv, ciphertext)` over block-aligned data. Padding is applied
//! by the caller (see [`crate::padding`]), so implementations run the mode
//! without any padding of their own.

use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::error::{ProtocolError, Result};
use crate::iv::Iv;
use crate::keys::SymmetricKey;

/// Cipher block size in bytes (AES).
pub const BLOCK_SIZE: usize = 16;

/// A symmetric block cipher operating on block-aligned buffers.
pub trait BlockCipher: Send + Sync {
    /// Encrypt `plaintext`, whose length must be a multiple of [`BLOCK_SIZE`].
    fn encrypt(&self, key: &SymmetricKey, iv: &Iv, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt `ciphertext`, whose length must be a multiple of [`BLOCK_SIZE`].
    fn decrypt(&self, key: &SymmetricKey, iv: &Iv, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// AES in CBC mode. The AES variant is picked from the key length.
#[derive(Debug, Clone, Copy, Default)]
pub struct AesCbc;

impl BlockCipher for AesCbc {
    fn encrypt(&self, key: &SymmetricKey, iv: &Iv, plaintext: &[u8]) -> Result<Vec<u8>> {
        check_aligned(plaintext.len())?;
        let key = key.as_bytes();
        match key.len() {
            16 => cbc_encrypt::<cbc::Encryptor<aes::Aes128>>(key, iv, plaintext),
            24 => cbc_encrypt::<cbc::Encryptor<aes::Aes192>>(key, iv, plaintext),
            32 => cbc_encrypt::<cbc::Encryptor<aes::Aes256>>(key, iv, plaintext),
            other => Err(ProtocolError::InvalidKeyLength(other)),
        }
    }

    fn decrypt(&self, key: &SymmetricKey, iv: &Iv, ciphertext: &[u8]) -> Result<Vec<u8>> {
        check_aligned(ciphertext.len())?;
        let key = key.as_bytes();
        match key.len() {
            16 => cbc_decrypt::<cbc::Decryptor<aes::Aes128>>(key, iv, ciphertext),
            24 => cbc_decrypt::<cbc::Decryptor<aes::Aes192>>(key, iv, ciphertext),
            32 => cbc_decrypt::<cbc::Decryptor<aes::Aes256>>(key, iv, ciphertext),
            other => Err(ProtocolError::InvalidKeyLength(other)),
        }
    }
}

fn check_aligned(len: usize) -> Result<()> {
    if len % BLOCK_SIZE != 0 {
        return Err(ProtocolError::Cipher(format!(
            "input length {} is not a multiple of {}",
            len, BLOCK_SIZE
        )));
    }
    Ok(())
}

fn cbc_encrypt<E: KeyIvInit + BlockEncryptMut>(key: &[u8], iv: &Iv, data: &[u8]) -> Result<Vec<u8>> {
    let mut buf = data.to_vec();
    let len = buf.len();
    E::new_from_slices(key, iv)
        .map_err(|_| ProtocolError::InvalidKeyLength(key.len()))?
        .encrypt_padded_mut::<NoPadding>(&mut buf, len)
        .map_err(|e| ProtocolError::Cipher(format!("encryption failed: {:?}", e)))?;
    Ok(buf)
}

fn cbc_decrypt<D: KeyIvInit + BlockDecryptMut>(key: &[u8], iv: &Iv, data: &[u8]) -> Result<Vec<u8>> {
    let mut buf = data.to_vec();
    D::new_from_slices(key, iv)
        .map_err(|_| ProtocolError::InvalidKeyLength(key.len()))?
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|e| ProtocolError::Cipher(format!("decryption failed: {:?}", e)))?;
    Ok(buf)
}
