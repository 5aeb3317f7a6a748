//! # SIMES Daemon Library
//!
//! TCP server and client that exchange JSON requests over the SIMES encrypted
//! channel.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐          ┌──────────────────────┐
//! │   simes send         │          │   simes serve        │
//! │   Client             │   TCP    │   Server             │
//! │     │                │ ───────▶ │     │ task per conn  │
//! │   SessionContext     │          │   SessionContext     │
//! │     │                │          │     │                │
//! │   EncryptedChannel   │          │   EncryptedChannel   │
//! └──────────────────────┘          └──────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use simes_daemon::{Config, Server, SessionContext};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     config.validate()?;
//!
//!     let context = SessionContext::from_config(&config)?;
//!     let server = Server::bind(&config.network.listen_addr, context).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: The handshake/request/reply/stop conversation
//! - [`server`]: TCP listener, one task per connection
//! - [`client`]: TCP client for a single conversation

pub mod client;
pub mod config;
pub mod server;
pub mod session;

// Re-export protocol for convenience
pub use simes_protocol;

pub use client::Client;
pub use config::{Config, ConfigError};
pub use server::Server;
pub use session::{echo_handler, Handler, SessionContext, SessionError, SessionSummary};
