//! Request/reply conversations over an encrypted channel.
//!
//! Both roles speak the same fixed sequence:
//!
//! ```text
//! client                         server
//!   ── HANDSHAKE ──────────────────▶
//!   ◀──────────────── OK / NOT_ACCEPTED
//!   ── {json request} ─────────────▶
//!   ◀───────────────── {json reply}
//!   ── STOP ───────────────────────▶
//! ```
//!
//! Every frame is encrypted with the sender's own key and authenticated on
//! the other side by looking the sender up in the local [`KeyDirectory`].

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use simes_protocol::{
    EncryptedChannel, KeyDirectory, ProtocolError, Received, Status, SymmetricKey,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::{Config, ConfigError};

/// Request handler: `(sender_id, request) -> reply`.
pub type Handler = dyn Fn(&str, Value) -> Value + Send + Sync;

/// Errors that end a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Framing, crypto or codec failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The peer sent a valid status, but not the one this step needs.
    #[error("expected status {expected}, got {got}")]
    UnexpectedStatus { expected: Status, got: Status },

    /// The server answered the handshake with `NOT_ACCEPTED`.
    #[error("handshake refused by {0:?}")]
    Rejected(String),

    /// A later frame came from a different sender than the handshake.
    #[error("sender changed mid-session: expected {expected:?}, got {got:?}")]
    PeerChanged { expected: String, got: String },

    /// No frame arrived within the read timeout.
    #[error("timed out after {0:?} waiting for peer")]
    Timeout(Duration),

    /// Socket-level failure outside the protocol layer.
    #[error("connection error: {0}")]
    Io(#[from] io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// What a completed server session exchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    /// Authenticated sender of the conversation.
    pub peer: String,
    /// Request as received from the peer.
    pub request: Value,
    /// Reply produced by the handler and sent back.
    pub reply: Value,
}

/// Default handler: greet the sender and echo the request back.
pub fn echo_handler(sender_id: &str, request: Value) -> Value {
    json!({
        "message": format!("Hello {}!", sender_id),
        "echo": request,
    })
}

/// Everything one node needs to talk: its identity, its own key, the keys
/// of its peers and the channel settings.
#[derive(Debug, Clone)]
pub struct SessionContext {
    identity: String,
    key: SymmetricKey,
    keys: Arc<KeyDirectory>,
    channel: EncryptedChannel,
    read_timeout: Option<Duration>,
}

impl SessionContext {
    /// A context with the default channel and no read timeout.
    pub fn new(identity: impl Into<String>, key: SymmetricKey, keys: KeyDirectory) -> Self {
        Self {
            identity: identity.into(),
            key,
            keys: Arc::new(keys),
            channel: EncryptedChannel::new(),
            read_timeout: None,
        }
    }

    /// Build a context from a validated configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(
            Self::new(config.identity.name.clone(), config.own_key()?, config.key_directory()?)
                .with_read_timeout(config.read_timeout())
                .with_max_frame_size(config.limits.max_frame_size),
        )
    }

    /// Bound every read by `timeout`.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Limit frames in both directions to `max_frame_size` body bytes.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.channel = self.channel.with_max_frame_size(max_frame_size);
        self
    }

    /// Sender id written into outgoing frames.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Per-read timeout, if any.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Keys used to authenticate incoming frames.
    pub fn keys(&self) -> &KeyDirectory {
        &self.keys
    }

    /// Apply the read timeout to one receive.
    async fn bounded<T>(
        &self,
        receive: impl Future<Output = simes_protocol::Result<T>>,
    ) -> Result<T, SessionError> {
        match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, receive)
                .await
                .map_err(|_| SessionError::Timeout(limit))?
                .map_err(SessionError::from),
            None => receive.await.map_err(SessionError::from),
        }
    }

    async fn send_status<W: AsyncWrite + Unpin>(
        &self,
        stream: &mut W,
        status: Status,
    ) -> Result<(), SessionError> {
        self.channel
            .send_status(stream, &self.identity, status, &self.key)
            .await?;
        Ok(())
    }

    async fn receive_status<R: AsyncRead + Unpin>(
        &self,
        stream: &mut R,
    ) -> Result<Received<Status>, SessionError> {
        self.bounded(self.channel.receive_status(stream, &self.keys))
            .await
    }

    async fn receive_json<R: AsyncRead + Unpin>(
        &self,
        stream: &mut R,
    ) -> Result<Received<Value>, SessionError> {
        self.bounded(self.channel.receive_encrypted_from(stream, &self.keys))
            .await
    }

    /// Run the server side of one conversation.
    pub async fn serve<S, H>(&self, stream: &mut S, handler: &H) -> Result<SessionSummary, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        H: Fn(&str, Value) -> Value + ?Sized,
    {
        let hello = self.receive_status(stream).await?;
        let peer = hello.sender_id;
        if hello.payload != Status::Handshake {
            tracing::warn!("Refusing {}: opened with {}", peer, hello.payload);
            self.send_status(stream, Status::NotAccepted).await?;
            return Err(SessionError::UnexpectedStatus {
                expected: Status::Handshake,
                got: hello.payload,
            });
        }
        self.send_status(stream, Status::Ok).await?;
        tracing::debug!("Handshake accepted from {}", peer);

        let request = self.receive_json(stream).await?;
        same_peer(&peer, &request.sender_id)?;
        let reply = handler(&peer, request.payload.clone());
        self.channel
            .send_encrypted(stream, &self.identity, &reply, &self.key)
            .await?;

        let bye = self.receive_status(stream).await?;
        same_peer(&peer, &bye.sender_id)?;
        if bye.payload != Status::Stop {
            return Err(SessionError::UnexpectedStatus {
                expected: Status::Stop,
                got: bye.payload,
            });
        }

        Ok(SessionSummary {
            peer,
            request: request.payload,
            reply,
        })
    }

    /// Run the client side of one conversation and return the server's reply.
    pub async fn request<S>(&self, stream: &mut S, request: &Value) -> Result<Value, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.send_status(stream, Status::Handshake).await?;

        let answer = self.receive_status(stream).await?;
        match answer.payload {
            Status::Ok => {}
            Status::NotAccepted => return Err(SessionError::Rejected(answer.sender_id)),
            got => {
                return Err(SessionError::UnexpectedStatus {
                    expected: Status::Ok,
                    got,
                })
            }
        }
        let server = answer.sender_id;

        self.channel
            .send_encrypted(stream, &self.identity, request, &self.key)
            .await?;
        let reply = self.receive_json(stream).await?;
        same_peer(&server, &reply.sender_id)?;

        self.send_status(stream, Status::Stop).await?;
        Ok(reply.payload)
    }
}

fn same_peer(expected: &str, got: &str) -> Result<(), SessionError> {
    if expected == got {
        Ok(())
    } else {
        Err(SessionError::PeerChanged {
            expected: expected.to_string(),
            got: got.to_string(),
        })
    }
}
