//! Status control messages.
//!
//! A status is a short token from a closed set (`HANDSHAKE`, `OK`, `STOP`, ...)
//! used to drive a conversation. It travels as an ordinary encrypted frame
//! whose plaintext is the token's UTF-8 bytes.

use std::fmt;
use std::str::FromStr;

use tokio::io::{AsyncRead, AsyncWrite};
use zeroize::Zeroizing;

use crate::channel::{EncryptedChannel, Received};
use crate::cipher::BlockCipher;
use crate::codec::PayloadCodec;
use crate::error::{ProtocolError, Result};
use crate::keys::{KeyDirectory, SymmetricKey};

/// Longest status token in bytes.
pub const STATUS_MAX_LEN: usize = 16;

/// Conversation status tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Request handled.
    Ok,
    /// Request failed.
    Error,
    /// Opening a conversation.
    Handshake,
    /// Peer accepted.
    Accepted,
    /// Peer refused.
    NotAccepted,
    /// Start of a stream of work.
    Start,
    /// End of the conversation.
    Stop,
    /// Suspend.
    Pause,
    /// Resume after a pause.
    Resume,
}

impl Status {
    /// Every status, in wire-token order.
    pub const ALL: [Status; 9] = [
        Status::Ok,
        Status::Error,
        Status::Handshake,
        Status::Accepted,
        Status::NotAccepted,
        Status::Start,
        Status::Stop,
        Status::Pause,
        Status::Resume,
    ];

    /// The wire token.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Error => "ERROR",
            Status::Handshake => "HANDSHAKE",
            Status::Accepted => "ACCEPTED",
            Status::NotAccepted => "NOT_ACCEPTED",
            Status::Start => "START",
            Status::Stop => "STOP",
            Status::Pause => "PAUSE",
            Status::Resume => "RESUME",
        }
    }

    /// Parse a decrypted status plaintext.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let token = std::str::from_utf8(bytes)
            .map_err(|_| ProtocolError::InvalidStatus(format!("{} non-UTF-8 bytes", bytes.len())))?;
        token.parse()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ProtocolError::InvalidStatus(s.chars().take(STATUS_MAX_LEN).collect()))
    }
}

impl<P: PayloadCodec, C: BlockCipher> EncryptedChannel<P, C> {
    /// Send a status token as one encrypted frame.
    pub async fn send_status<W: AsyncWrite + Unpin>(
        &self,
        stream: &mut W,
        sender_id: &str,
        status: Status,
        key: &SymmetricKey,
    ) -> Result<()> {
        self.send_encrypted_raw(stream, sender_id, status.as_str().as_bytes(), key)
            .await
    }

    /// Receive one frame and parse it as a status token.
    pub async fn receive_status<R: AsyncRead + Unpin>(
        &self,
        stream: &mut R,
        keys: &KeyDirectory,
    ) -> Result<Received<Status>> {
        self.receive_with(stream, keys, |plaintext| {
            Status::from_bytes(&Zeroizing::new(plaintext))
        })
        .await
    }
}
