//! SIMES Daemon
//!
//! Encrypted request/reply server and client.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use simes_daemon::config::{default_config_path, Config};
use simes_daemon::{Client, Server, SessionContext};
use simes_protocol::SymmetricKey;
use tracing_subscriber::EnvFilter;

/// SIMES - encrypted message exchange over TCP.
#[derive(Parser, Debug)]
#[command(name = "simes")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Accept connections and answer requests
    Serve {
        /// Address to listen on (overrides config)
        #[arg(long, short)]
        listen: Option<String>,
    },

    /// Send one JSON request to a server and print the reply
    Send {
        /// Server address (overrides config)
        #[arg(long, short)]
        server: Option<String>,

        /// Request body as a JSON document
        #[arg(long, short)]
        message: String,
    },

    /// Print a freshly generated hex key
    Keygen {
        /// Key size in bits: 128, 192 or 256
        #[arg(long, default_value_t = 256, value_parser = parse_key_bits)]
        bits: usize,
    },

    /// Load, validate and print the effective configuration
    CheckConfig,
}

/// Accept only AES key sizes.
fn parse_key_bits(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(bits @ (128 | 192 | 256)) => Ok(bits),
        _ => Err(format!("expected 128, 192 or 256, got {}", value)),
    }
}

/// Copy of `config` with key material replaced by its size.
fn redacted(config: &Config) -> Config {
    let mut shown = config.clone();
    for value in shown.keys.values_mut() {
        *value = format!("<{} hex chars>", value.len());
    }
    shown
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Keygen { bits } = cli.command {
        let key = SymmetricKey::generate(bits / 8)?;
        println!("{}", key.to_hex());
        return Ok(());
    }

    // Load configuration
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Initialize tracing
    let level = if cli.verbose {
        "debug"
    } else {
        config.daemon.log_level.as_str()
    };
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Using config file: {:?}", config_path);

    match cli.command {
        Commands::Serve { listen } => {
            if let Some(addr) = listen {
                config.network.listen_addr = addr;
            }
            config.validate()?;

            let context = SessionContext::from_config(&config)?;
            let server = Server::bind(&config.network.listen_addr, context)
                .await
                .with_context(|| format!("Failed to bind {}", config.network.listen_addr))?;
            server.run_until(wait_for_shutdown_signal()).await?;
        }
        Commands::Send { server, message } => {
            if let Some(addr) = server {
                config.network.server_addr = addr;
            }
            config.validate()?;

            let request: serde_json::Value =
                serde_json::from_str(&message).context("--message must be a JSON document")?;
            let context = SessionContext::from_config(&config)?;
            let client = Client::connect(&config.network.server_addr, context)
                .await
                .with_context(|| format!("Failed to connect to {}", config.network.server_addr))?;
            let reply = client.request(&request).await?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
        Commands::CheckConfig => {
            config.validate()?;
            print!("{}", redacted(&config).to_toml()?);
            tracing::info!("Configuration is valid");
        }
        Commands::Keygen { .. } => {}
    }

    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM");
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Received SIGINT");
                    }
                }
                return;
            }
            Err(e) => tracing::warn!("Failed to register SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Received SIGINT");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        // Verify the CLI structure is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_command() {
        let cli = Cli::try_parse_from(["simes", "serve"]).unwrap();
        match cli.command {
            Commands::Serve { listen } => assert!(listen.is_none()),
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_serve_with_listen() {
        let cli = Cli::try_parse_from(["simes", "serve", "--listen", "0.0.0.0:9000"]).unwrap();
        match cli.command {
            Commands::Serve { listen } => assert_eq!(listen.as_deref(), Some("0.0.0.0:9000")),
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_send_command() {
        let cli = Cli::try_parse_from([
            "simes",
            "--verbose",
            "send",
            "--message",
            r#"{"message":"Hello server!"}"#,
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Send { server, message } => {
                assert!(server.is_none());
                assert!(message.contains("Hello server!"));
            }
            _ => panic!("Expected Send command"),
        }
    }

    #[test]
    fn test_send_requires_message() {
        assert!(Cli::try_parse_from(["simes", "send"]).is_err());
    }

    #[test]
    fn test_keygen_bits() {
        let cli = Cli::try_parse_from(["simes", "keygen"]).unwrap();
        assert!(matches!(cli.command, Commands::Keygen { bits: 256 }));

        let cli = Cli::try_parse_from(["simes", "keygen", "--bits", "128"]).unwrap();
        assert!(matches!(cli.command, Commands::Keygen { bits: 128 }));

        assert!(Cli::try_parse_from(["simes", "keygen", "--bits", "512"]).is_err());
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["simes", "check-config", "--config", "/tmp/simes.toml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/simes.toml")));
        assert!(matches!(cli.command, Commands::CheckConfig));
    }

    #[test]
    fn test_parse_key_bits() {
        assert_eq!(parse_key_bits("192"), Ok(192));
        assert!(parse_key_bits("64").is_err());
        assert!(parse_key_bits("abc").is_err());
    }

    #[test]
    fn test_redacted_hides_keys() {
        let mut config = Config::default();
        config
            .keys
            .insert("client".to_string(), "00".repeat(16));

        let shown = redacted(&config);
        assert_eq!(shown.keys["client"], "<32 hex chars>");
        assert_eq!(config.keys["client"], "00".repeat(16));
    }
}
