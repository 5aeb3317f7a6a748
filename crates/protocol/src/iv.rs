//! Initialization vector generation.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::cipher::BLOCK_SIZE;
use crate::error::{ProtocolError, Result};

/// A one-block initialization vector.
pub type Iv = [u8; BLOCK_SIZE];

/// Generates a fresh IV from the operating system's CSPRNG.
///
/// Called once per encryption. An IV is never reused deliberately; with 128
/// random bits a collision under the same key is not a practical concern.
pub fn generate_iv() -> Result<Iv> {
    let mut iv = [0u8; BLOCK_SIZE];
    OsRng
        .try_fill_bytes(&mut iv)
        .map_err(|e| ProtocolError::Entropy(e.to_string()))?;
    Ok(iv)
}
