//! Keep-alive / housekeeping tick — one task per connected channel.
//!
//! Each tick sweeps expired correlation entries; when the probe is enabled
//! it additionally sends a network-management echo through the ordinary
//! `send()` path, so a silently-dead connection shows up as a probe
//! timeout and a failed write shows up as a link failure.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::ConnectionSupervisor;

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

pub(crate) async fn run(
    sup: ConnectionSupervisor,
    mut shutdown_rx: watch::Receiver<bool>,
    interval: Duration,
    generation: u64,
) {
    // ---
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; a probe the instant the link
    // opens is noise, so consume it.
    ticker.tick().await;

    tracing::debug!(generation, interval_s = interval.as_secs(), "keep-alive scheduler started");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let swept = sup.table().sweep_expired(sup.response_timeout()).await;
                if swept > 0 {
                    tracing::warn!(swept, "expired pending requests swept");
                }

                if sup.keep_alive_probe_enabled() {
                    match sup.test_connection().await {
                        Ok(true) => tracing::debug!("keep-alive probe acknowledged"),
                        Ok(false) => tracing::warn!("keep-alive probe declined by switch"),
                        Err(e) => tracing::warn!("keep-alive probe failed: {e}"),
                    }
                }
            }
        }
    }

    tracing::debug!(generation, "keep-alive scheduler stopped");
}
