//! TCP client for `simes send`.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::session::{SessionContext, SessionError};

/// Connect timeout used when the context has no read timeout.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// A connection to a SIMES server, good for one conversation.
pub struct Client {
    stream: TcpStream,
    context: SessionContext,
}

impl Client {
    /// Connect to `addr`.
    ///
    /// The connect is bounded by the context's read timeout, or by a
    /// 10 second default when it has none.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Timeout`] if the server does not answer in
    /// time, or [`SessionError::Io`] if the connection is refused.
    pub async fn connect(addr: &str, context: SessionContext) -> Result<Self, SessionError> {
        let limit = context
            .read_timeout()
            .unwrap_or(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS));

        let stream = tokio::time::timeout(limit, TcpStream::connect(addr))
            .await
            .map_err(|_| SessionError::Timeout(limit))??;
        stream.set_nodelay(true)?;
        tracing::debug!("Connected to {}", addr);

        Ok(Self { stream, context })
    }

    /// Address of the connected server.
    pub fn peer_addr(&self) -> Result<SocketAddr, io::Error> {
        self.stream.peer_addr()
    }

    /// Run a full conversation and return the server's reply.
    ///
    /// Consumes the client: the server closes the connection after `STOP`.
    pub async fn request(mut self, payload: &Value) -> Result<Value, SessionError> {
        let reply = self.context.request(&mut self.stream, payload).await?;
        self.stream.shutdown().await?;
        Ok(reply)
    }
}
