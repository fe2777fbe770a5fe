//! The response listener loop — one task per connected channel.
//!
//! Every inbound message on the shared socket lands here and is handed to
//! the correlation table. The handoff never blocks on a caller (completion
//! slots are oneshot sends), so a slow caller cannot stall the reader.
//!
//! Read timeouts are a non-event: they exist so the loop can recheck its
//! shutdown signal without busy-waiting. A malformed frame is logged and
//! skipped — one bad message must not tear down the shared connection.
//! Only a dead stream ends the loop, by reporting to the supervisor.

use tokio::sync::watch;
use uuid::Uuid;

use isomux_domain::{IsoChannelPtr, IsoMuxError};

use super::ConnectionSupervisor;

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

pub(crate) async fn run(
    sup: ConnectionSupervisor,
    channel: IsoChannelPtr,
    mut shutdown_rx: watch::Receiver<bool>,
    generation: u64,
    conn_id: Uuid,
) {
    // ---
    tracing::info!(%conn_id, peer = %channel.peer(), "response listener started");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                // Signal fired or supervisor dropped the sender — stop.
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            received = channel.receive(sup.read_timeout()) => match received {
                // Idle read timeout — loop to recheck the shutdown signal.
                Ok(None) => {}

                Ok(Some(response)) => {
                    tracing::debug!(
                        %conn_id,
                        mti = %response.mti(),
                        stan = ?response.stan(),
                        "inbound message",
                    );
                    sup.table().resolve(response).await;
                }

                Err(IsoMuxError::Format(reason)) => {
                    tracing::warn!(%conn_id, %reason, "malformed inbound frame ignored");
                }

                Err(e) => {
                    tracing::warn!(%conn_id, "listener read failed: {e}");
                    sup.on_link_failure(generation, e.to_string()).await;
                    break;
                }
            }
        }
    }

    tracing::info!(%conn_id, "response listener stopped");
}
