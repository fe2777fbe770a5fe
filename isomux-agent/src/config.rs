//! CLI configuration for `isomux-agent`.
//!
//! Run modes:
//!   isomux-agent --host 10.0.0.5 --port 5000 run
//!   isomux-agent --host 10.0.0.5 --port 5000 probe

use std::time::Duration;

use clap::{Parser, Subcommand};

use super::supervisor::SwitchSettings;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "isomux-agent", about = "ISO 8583 switch driver agent")]
pub struct Config {
    // ---
    #[command(subcommand)]
    pub mode: Mode,

    /// Authorizer host.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Authorizer TCP port.
    #[arg(long, default_value_t = 5000)]
    pub port: u16,

    /// TCP connect timeout, milliseconds.
    #[arg(long, default_value_t = 5_000)]
    pub connect_timeout_ms: u64,

    /// Listener read timeout, milliseconds. This is the idle-recheck
    /// cadence, not an error threshold.
    #[arg(long, default_value_t = 500)]
    pub read_timeout_ms: u64,

    /// Per-request response timeout, milliseconds. Also the age at which
    /// the expiry sweep gives up on a pending request.
    #[arg(long, default_value_t = 5_000)]
    pub response_timeout_ms: u64,

    /// Automatic reconnect attempts after a link failure. 0 disables
    /// recovery entirely.
    #[arg(long, default_value_t = 3)]
    pub max_reconnect_attempts: u32,

    /// Delay before the first reconnect attempt, milliseconds. Doubles per
    /// attempt up to four times this value.
    #[arg(long, default_value_t = 5_000)]
    pub reconnect_delay_ms: u64,

    /// Keep-alive probe interval, seconds.
    #[arg(long, default_value_t = 900)]
    pub keep_alive_secs: u64,

    /// Keep-alive interval floor, seconds. Shorter configured intervals
    /// are clamped up so probes cannot crowd out live traffic.
    #[arg(long, default_value_t = 60)]
    pub keep_alive_floor_secs: u64,

    /// Disable the keep-alive probe. The expiry sweep keeps running.
    #[arg(long)]
    pub no_keep_alive: bool,

    /// Correlation output keys — comma-separated ISO field numbers used
    /// to build composite match keys.
    #[arg(long, default_value = "3,7,11,41")]
    pub output_keys: String,
}

// ---

#[derive(Debug, Subcommand)]
pub enum Mode {
    // ---
    /// Stay connected, keep-alive running, until ctrl-c.
    Run,

    /// Connect, run one connection test, print status as JSON, exit.
    /// Exit code 1 if the test fails.
    Probe,
}

// ---

impl Config {
    // ---
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Supervisor settings derived from the flags. Keep-alive starts
    /// disabled; `run` mode enables it explicitly after connecting.
    pub fn settings(&self) -> SwitchSettings {
        // ---
        SwitchSettings {
            response_timeout: Duration::from_millis(self.response_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            reconnect_max_delay: Duration::from_millis(self.reconnect_delay_ms.saturating_mul(4)),
            keep_alive_interval: Duration::from_secs(self.keep_alive_secs),
            keep_alive_floor: Duration::from_secs(self.keep_alive_floor_secs),
            keep_alive_enabled: false,
            auto_reconnect: true,
        }
    }
}
