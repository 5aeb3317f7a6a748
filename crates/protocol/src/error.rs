//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Send-side policy errors
    /// The encoded frame would exceed the configured maximum frame size.
    #[error("message too large: {size} bytes exceeds maximum frame size of {max} bytes")]
    MessageTooLarge {
        /// Size the frame body would have had.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Sender identifier does not fit the 16-bit length field.
    #[error("sender id too long: {len} bytes exceeds maximum of {max} bytes")]
    SenderTooLong {
        /// Encoded length of the sender id.
        len: usize,
        /// Maximum encodable length.
        max: usize,
    },

    // Authentication errors
    /// The claimed sender has no key in the directory.
    #[error("unknown sender: {sender_id}")]
    UnknownSender {
        /// The sender identifier carried by the frame.
        sender_id: String,
    },

    // Frame errors
    /// Header or length fields are inconsistent with the bytes available.
    #[error("malformed frame: {0}")]
    FrameFormat(String),

    /// The stream ended after part of a frame had been read.
    #[error("incomplete frame: expected {expected} bytes, received {received}")]
    IncompleteFrame {
        /// Bytes required to complete the current read phase.
        expected: usize,
        /// Bytes actually received before the stream ended.
        received: usize,
    },

    /// The stream ended cleanly before any byte of a new frame.
    #[error("end of stream")]
    EndOfStream,

    // Cryptographic errors
    /// Padding is missing or malformed after decryption.
    #[error("invalid padding: {0}")]
    Padding(String),

    /// Key length is not accepted by the cipher.
    #[error("invalid key length: {0} bytes (expected 16, 24 or 32)")]
    InvalidKeyLength(usize),

    /// Key material could not be parsed.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The cipher primitive rejected its input.
    #[error("cipher failure: {0}")]
    Cipher(String),

    /// The operating system entropy source failed.
    #[error("entropy source failure: {0}")]
    Entropy(String),

    // Payload errors
    /// Failed to encode the structured payload.
    #[error("payload encoding failed: {0}")]
    Encode(String),

    /// Decrypted bytes do not parse as the expected payload.
    #[error("payload decoding failed: {0}")]
    Decode(String),

    /// A status frame carried a token outside the known set.
    #[error("invalid status: {0}")]
    InvalidStatus(String),

    // Transport errors
    /// Underlying stream failure, propagated as-is.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns true if the peer closed the stream between frames.
    ///
    /// Callers looping on a connection can treat this as a normal shutdown
    /// rather than corruption.
    pub fn is_clean_close(&self) -> bool {
        matches!(self, ProtocolError::EndOfStream)
    }
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

// Conversions from underlying crate errors

impl From<rmp_serde::encode::Error> for ProtocolError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        ProtocolError::Encode(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ProtocolError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        ProtocolError::Decode(err.to_string())
    }
}
