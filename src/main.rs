//! rwgate - A Readers-Writers Message Log Server
//!
//! This is the main entry point for the rwgate server.
//! It reads configuration, opens the message store, binds the TCP listener
//! and runs the accept loop until Ctrl+C.

use anyhow::Context;
use clap::Parser;
use rwgate::server::Server;
use rwgate::storage::open_store;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Server configuration
#[derive(Parser, Debug)]
#[command(name = "rwgate", version, about = "Readers-writers message log server")]
struct Config {
    /// Host to bind to
    #[arg(long, default_value = rwgate::DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = rwgate::DEFAULT_PORT)]
    port: u16,

    /// Message store connection string (memory:// or file://<path>)
    #[arg(long, env = rwgate::STORE_URI_ENV, default_value = rwgate::DEFAULT_STORE_URI)]
    store: String,

    /// Upper bound for a single store operation, in milliseconds
    #[arg(long, default_value_t = 5000)]
    store_timeout_ms: u64,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Config {
    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn print_banner(config: &Config, store: &str) {
    println!(
        r#"
rwgate v{} - Readers-Writers Message Log Server
──────────────────────────────────────────────────────────────
Listening on {}
Message store: {} ({})

Readers:  printf 'reader\n' | nc <host> {}
Writers:  send 'writer', then 'start', messages, 'stop', 'exit'

Use Ctrl+C to shutdown gracefully.
"#,
        rwgate::VERSION,
        config.bind_address(),
        config.store,
        store,
        config.port,
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(&config.log_level);

    // The store is opened before binding: a broken collaborator is fatal
    let store = open_store(&config.store, config.store_timeout())
        .await
        .with_context(|| format!("failed to open message store {}", config.store))?;
    info!(store = store.name(), uri = %config.store, "Message store ready");

    let server = Server::bind(config.bind_address(), store.clone())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!("Listening on {}", server.local_addr()?);

    print_banner(&config, store.name());

    // Set up graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            // Dropping the sender would stop the listener
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping server...");
        let _ = shutdown_tx.send(true);
    });

    server.run(shutdown_rx).await;

    info!("Server shutdown complete");
    Ok(())
}
