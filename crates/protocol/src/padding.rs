//! PKCS#7 padding to the cipher block size.
//!
//! Padding is always applied: a buffer that is already block aligned gains a
//! full block of padding, so [`unpad`] never needs out-of-band length
//! information. Every padding byte holds the padding length.

use crate::cipher::BLOCK_SIZE;
use crate::error::{ProtocolError, Result};

/// Length of `len` bytes of plaintext once padded.
#[inline]
pub fn padded_len(len: usize) -> usize {
    (len / BLOCK_SIZE + 1) * BLOCK_SIZE
}

/// Append padding so the result is a non-empty multiple of [`BLOCK_SIZE`].
pub fn pad(data: &[u8]) -> Vec<u8> {
    let pad_len = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut output = Vec::with_capacity(data.len() + pad_len);
    output.extend_from_slice(data);
    output.resize(data.len() + pad_len, pad_len as u8);
    output
}

/// Strip padding added by [`pad`], validating every padding byte.
pub fn unpad(data: &[u8]) -> Result<Vec<u8>> {
    let Some(&marker) = data.last() else {
        return Err(ProtocolError::Padding("empty buffer".to_string()));
    };

    if data.len() % BLOCK_SIZE != 0 {
        return Err(ProtocolError::Padding(format!(
            "buffer length {} is not a multiple of {}",
            data.len(),
            BLOCK_SIZE
        )));
    }

    let pad_len = marker as usize;
    if pad_len == 0 || pad_len > BLOCK_SIZE || pad_len > data.len() {
        return Err(ProtocolError::Padding(format!(
            "padding marker {} out of range",
            pad_len
        )));
    }

    let (content, padding) = data.split_at(data.len() - pad_len);
    if padding.iter().any(|&byte| byte != marker) {
        return Err(ProtocolError::Padding(
            "padding bytes do not match marker".to_string(),
        ));
    }

    Ok(content.to_vec())
}
