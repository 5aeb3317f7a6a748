//! # SIMES Protocol Library
//!
//! Point-to-point encrypted message framing over a reliable byte stream.
//!
//! ## Overview
//!
//! A payload is encoded, padded, encrypted under a per-frame random IV and
//! wrapped in a self-delimiting frame that names its sender. The receiver
//! finds the frame boundary from the length prefix, looks the sender up in its
//! [`KeyDirectory`] (rejecting unknown senders before decrypting), then
//! decrypts, unpads and decodes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Application Payloads            │  JSON / MessagePack
//! ├─────────────────────────────────────────┤
//! │            PKCS#7 Padding               │  16-byte blocks
//! ├─────────────────────────────────────────┤
//! │           AES-CBC Encryption            │  random IV per frame
//! ├─────────────────────────────────────────┤
//! │              Framing                    │  length-prefixed, sender-tagged
//! ├─────────────────────────────────────────┤
//! │         Transport (TCP / any stream)    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use simes_protocol::{EncryptedChannel, KeyDirectory, SymmetricKey};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> simes_protocol::Result<()> {
//! let key = SymmetricKey::new(vec![0u8; 16])?;
//! let channel = EncryptedChannel::new();
//!
//! let mut wire = Vec::new();
//! channel.send_encrypted(&mut wire, "alice", &json!({"n": 1}), &key).await?;
//!
//! let keys = KeyDirectory::new().with_key("alice", key);
//! let mut stream = wire.as_slice();
//! let payload: serde_json::Value = channel.receive_encrypted(&mut stream, &keys).await?;
//! assert_eq!(payload, json!({"n": 1}));
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`channel`]: Send/receive orchestration
//! - [`framing`]: Wire format and frame codec
//! - [`keys`]: Symmetric keys and the sender key directory
//! - [`padding`]: PKCS#7 padding
//! - [`iv`]: IV generation
//! - [`cipher`]: Block cipher seam and AES-CBC
//! - [`codec`]: Payload codecs
//! - [`status`]: Status control messages
//! - [`error`]: Error types

pub mod channel;
pub mod cipher;
pub mod codec;
pub mod error;
pub mod framing;
pub mod iv;
pub mod keys;
pub mod padding;
pub mod status;

pub use channel::{EncryptedChannel, ReceiveStage, Received};
pub use cipher::{AesCbc, BlockCipher, BLOCK_SIZE};
pub use codec::{JsonCodec, MsgpackCodec, PayloadCodec};
pub use error::{ProtocolError, Result};
pub use framing::{Frame, FrameCodec, LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE, MAX_SENDER_ID_LEN};
pub use iv::{generate_iv, Iv};
pub use keys::{KeyDirectory, SymmetricKey, VALID_KEY_LENGTHS};
pub use padding::{pad, unpad};
pub use status::{Status, STATUS_MAX_LEN};
