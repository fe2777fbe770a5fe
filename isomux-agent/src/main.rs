//! isomux agent daemon.
//!
//! Drives ISO 8583 exchanges against a switch/authorizer over one
//! persistent TCP connection: pseudo-mux correlation, bounded reconnect,
//! keep-alive.
//!
//! Usage:
//!   isomux-agent --host 10.0.0.5 --port 5000 run
//!   isomux-agent --host 10.0.0.5 --port 5000 probe

use std::sync::Arc;
use std::time::Duration;

// ---

use clap::Parser;
use tracing::info;

// ---

use isomux_domain::OutputKeySet;
use isomux_tcp::{FieldTextCodec, TcpConnector};

// ---

mod config;
mod keepalive;
mod listener;
mod status;
mod supervisor;

// ---

use config::{Config, Mode};

// Gateway re-exports — siblings import via super::Symbol.
pub use status::ConnectionStatus;
pub use supervisor::{ConnectionSupervisor, SwitchSettings};

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---

    let cfg = Config::parse();

    let no_color = std::env::var("NO_COLOR").is_ok()
        || std::env::var("CARGO_TERM_COLOR").as_deref() == Ok("never")
        || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    tracing_subscriber::fmt()
        .with_target(false)
        .with_ansi(!no_color)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %cfg.host,
        port = cfg.port,
        "isomux-agent starting",
    );

    let output_keys: OutputKeySet = cfg.output_keys.parse()?;

    let connector = Arc::new(TcpConnector::new(
        &cfg.host,
        cfg.port,
        cfg.connect_timeout(),
        Arc::new(FieldTextCodec),
    ));
    let sup = ConnectionSupervisor::new(connector, OutputKeySet::default(), cfg.settings());
    sup.configure_output_keys(output_keys).await;

    match cfg.mode {
        // -------------------------------------------------------------
        Mode::Probe => {
            // ---
            sup.connect().await?;
            let healthy = match sup.test_connection().await {
                Ok(healthy) => healthy,
                Err(e) => {
                    tracing::error!("connection test error: {e}");
                    false
                }
            };

            let status = sup.status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);

            sup.disconnect().await;
            if !healthy {
                anyhow::bail!("connection test failed");
            }
        }

        // -------------------------------------------------------------
        Mode::Run => {
            // ---
            sup.connect().await?;

            if cfg.no_keep_alive {
                sup.disable_keep_alive();
            } else {
                sup.enable_keep_alive(Duration::from_secs(cfg.keep_alive_secs))
                    .await;
            }

            let mut status_tick = tokio::time::interval(Duration::from_secs(30));
            status_tick.tick().await; // immediate first tick

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = status_tick.tick() => {
                        let connected = sup.is_connected().await;
                        let pending = sup.pending_count().await;
                        let status = sup.status().await;
                        info!(
                            connected,
                            pending,
                            state = %status.state,
                            last_error = ?status.last_error,
                            "status",
                        );
                    }
                }
            }

            info!("shutting down");
            sup.clear_pending().await;
            sup.disconnect().await;
        }
    }

    Ok(())
}
