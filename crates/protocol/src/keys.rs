//! Symmetric keys and the sender key directory.
//!
//! The directory is the authentication gate of the protocol: a frame whose
//! claimed sender has no registered key is rejected before any decryption is
//! attempted. Directories are built by the caller at setup time and borrowed
//! immutably by every receive.

use std::collections::HashMap;

use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::{ProtocolError, Result};

/// Key lengths accepted for AES-128, AES-192 and AES-256.
pub const VALID_KEY_LENGTHS: [usize; 3] = [16, 24, 32];

/// A shared secret key. Zeroized on drop; never printed; compared in
/// constant time.
#[derive(Clone)]
pub struct SymmetricKey {
    bytes: Vec<u8>,
}

impl SymmetricKey {
    /// Wraps raw key bytes, checking the length.
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        if !VALID_KEY_LENGTHS.contains(&bytes.len()) {
            let len = bytes.len();
            let mut bytes = bytes;
            bytes.zeroize();
            return Err(ProtocolError::InvalidKeyLength(len));
        }
        Ok(Self { bytes })
    }

    /// Copies a key from a slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Self::new(bytes.to_vec())
    }

    /// Parses a hex-encoded key.
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded.trim())
            .map_err(|e| ProtocolError::InvalidKey(format!("bad hex: {}", e)))?;
        Self::new(bytes)
    }

    /// Generates a random key of `len` bytes using the OS CSPRNG.
    pub fn generate(len: usize) -> Result<Self> {
        if !VALID_KEY_LENGTHS.contains(&len) {
            return Err(ProtocolError::InvalidKeyLength(len));
        }
        let mut bytes = vec![0u8; len];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| ProtocolError::Entropy(e.to_string()))?;
        Ok(Self { bytes })
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Key length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false for a constructed key.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Hex encoding of the key, for writing config files.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        // Lengths are public; only the contents need constant time
        self.bytes.as_slice().ct_eq(other.bytes.as_slice()).into()
    }
}

impl Eq for SymmetricKey {}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Mapping from sender identifier to the key that sender encrypts with.
#[derive(Debug, Clone, Default)]
pub struct KeyDirectory {
    keys: HashMap<String, SymmetricKey>,
}

impl KeyDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `key` for `sender_id`, returning any key it replaces.
    pub fn insert(&mut self, sender_id: impl Into<String>, key: SymmetricKey) -> Option<SymmetricKey> {
        self.keys.insert(sender_id.into(), key)
    }

    /// Builder-style variant of [`insert`](Self::insert).
    pub fn with_key(mut self, sender_id: impl Into<String>, key: SymmetricKey) -> Self {
        self.insert(sender_id, key);
        self
    }

    /// Returns the key registered for `sender_id`.
    ///
    /// Fails with [`ProtocolError::UnknownSender`] if there is none.
    pub fn resolve(&self, sender_id: &str) -> Result<&SymmetricKey> {
        self.keys
            .get(sender_id)
            .ok_or_else(|| ProtocolError::UnknownSender {
                sender_id: sender_id.to_string(),
            })
    }

    /// Whether `sender_id` has a registered key.
    pub fn contains(&self, sender_id: &str) -> bool {
        self.keys.contains_key(sender_id)
    }

    /// Number of registered senders.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no sender is registered.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Registered sender identifiers, sorted.
    pub fn senders(&self) -> Vec<&str> {
        let mut senders: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        senders.sort_unstable();
        senders
    }
}

impl<S: Into<String>> FromIterator<(S, SymmetricKey)> for KeyDirectory {
    fn from_iter<I: IntoIterator<Item = (S, SymmetricKey)>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().map(|(id, key)| (id.into(), key)).collect(),
        }
    }
}
