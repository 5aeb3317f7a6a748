//! TCP server for `simes serve`.
//!
//! Accepts connections and runs one [`SessionContext::serve`] conversation per
//! connection in its own tokio task. All tasks share the same context, so the
//! key directory is loaded once.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::session::{echo_handler, Handler, SessionContext, SessionError, SessionSummary};

/// Back-off after a failed `accept`, so a full fd table does not spin.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A listener that serves encrypted request/reply sessions.
pub struct Server {
    listener: TcpListener,
    context: Arc<SessionContext>,
    handler: Arc<Handler>,
}

impl Server {
    /// Bind the server to `addr` with the echo handler.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be resolved or bound.
    pub async fn bind(addr: &str, context: SessionContext) -> Result<Self, io::Error> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(
            "Listening on {} as {:?}",
            listener.local_addr()?,
            context.identity()
        );

        Ok(Self {
            listener,
            context: Arc::new(context),
            handler: Arc::new(echo_handler),
        })
    }

    /// Replace the request handler.
    pub fn with_handler<H>(mut self, handler: H) -> Self
    where
        H: Fn(&str, Value) -> Value + Send + Sync + 'static,
    {
        let handler: Arc<Handler> = Arc::new(handler);
        self.handler = handler;
        self
    }

    /// The bound address (useful after binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, io::Error> {
        self.listener.local_addr()
    }

    /// Accept a new incoming connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), io::Error> {
        self.listener.accept().await
    }

    /// Run one conversation on `stream` in a background task.
    pub fn spawn_session(
        &self,
        mut stream: TcpStream,
        addr: SocketAddr,
    ) -> JoinHandle<Result<SessionSummary, SessionError>> {
        let context = Arc::clone(&self.context);
        let handler = Arc::clone(&self.handler);

        tokio::spawn(async move {
            tracing::info!("Connection from {}", addr);
            let result = context.serve(&mut stream, handler.as_ref()).await;
            match &result {
                Ok(summary) => {
                    tracing::info!("Session with {} ({}) complete", summary.peer, addr)
                }
                Err(e) => tracing::warn!("Session from {} failed: {}", addr, e),
            }
            result
        })
    }

    /// Accept connections until the enclosing task is dropped or
    /// [`run_until`](Self::run_until) cancels it.
    ///
    /// Failed accepts are logged and retried, so this never returns `Err`.
    pub async fn run(&self) -> Result<(), io::Error> {
        loop {
            match self.accept().await {
                Ok((stream, addr)) => {
                    self.spawn_session(stream, addr);
                }
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Sessions already running are left to finish on their own.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), io::Error>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = self.run() => result,
            _ = shutdown => {
                tracing::info!("Server shutting down");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use simes_protocol::{KeyDirectory, SymmetricKey};

    fn context(name: &str, key: &SymmetricKey) -> SessionContext {
        let keys = KeyDirectory::new()
            .with_key("server", key.clone())
            .with_key("client", key.clone());
        SessionContext::new(name, key.clone(), keys)
    }

    #[tokio::test]
    async fn test_server_bind_ephemeral_port() {
        let key = SymmetricKey::generate(16).unwrap();
        let server = Server::bind("127.0.0.1:0", context("server", &key))
            .await
            .unwrap();

        let addr = server.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_server_accept_and_serve() {
        let key = SymmetricKey::generate(24).unwrap();
        let server = Server::bind("127.0.0.1:0", context("server", &key))
            .await
            .unwrap()
            .with_handler(|sender: &str, _request: Value| json!({"to": sender}));
        let addr = server.local_addr().unwrap();

        let client = context("client", &key);
        let client_handle = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            client.request(&mut stream, &json!({"ping": true})).await
        });

        let (stream, peer) = server.accept().await.unwrap();
        let summary = server.spawn_session(stream, peer).await.unwrap().unwrap();
        assert_eq!(summary.peer, "client");
        assert_eq!(summary.request, json!({"ping": true}));

        let reply = client_handle.await.unwrap().unwrap();
        assert_eq!(reply, json!({"to": "client"}));
    }

    #[tokio::test]
    async fn test_run_until_stops_on_shutdown() {
        let key = SymmetricKey::generate(32).unwrap();
        let server = Server::bind("127.0.0.1:0", context("server", &key))
            .await
            .unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let run = tokio::spawn(async move {
            server
                .run_until(async {
                    let _ = rx.await;
                })
                .await
        });

        tx.send(()).unwrap();
        run.await.unwrap().unwrap();
    }
}
