use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use isomux_domain::{IsoChannel, IsoMessage, IsoMuxError, Result};

// ---------------------------------------------------------------------------
// SimChannel
// ---------------------------------------------------------------------------

/// Client end of one simulated link: tokio channels instead of a socket.
///
/// The far end is an authorizer task spawned by
/// [`SimSwitch`](super::switch::SimSwitch); when that task exits (cut link
/// or switch dropped) both directions fail with `ConnectionLost`, exactly
/// like a dead socket.
pub struct SimChannel {
    // ---
    outbound: mpsc::Sender<IsoMessage>,
    inbound: Mutex<mpsc::Receiver<IsoMessage>>,
    closed: AtomicBool,
}

// ---

impl SimChannel {
    // ---
    pub(crate) fn new(
        outbound: mpsc::Sender<IsoMessage>,
        inbound: mpsc::Receiver<IsoMessage>,
    ) -> Self {
        Self {
            outbound,
            inbound: Mutex::new(inbound),
            closed: AtomicBool::new(false),
        }
    }
}

// ---

#[async_trait]
impl IsoChannel for SimChannel {
    // ---
    async fn send(&self, msg: &IsoMessage) -> Result<()> {
        // ---
        if self.closed.load(Ordering::Relaxed) {
            return Err(IsoMuxError::ConnectionLost("channel shut down".into()));
        }
        self.outbound
            .send(msg.clone())
            .await
            .map_err(|_| IsoMuxError::ConnectionLost("simulated link severed".into()))
    }

    // ---

    async fn receive(&self, read_timeout: Duration) -> Result<Option<IsoMessage>> {
        // ---
        if self.closed.load(Ordering::Relaxed) {
            return Err(IsoMuxError::ConnectionLost("channel shut down".into()));
        }
        let mut inbound = self.inbound.lock().await;
        match tokio::time::timeout(read_timeout, inbound.recv()).await {
            Err(_elapsed) => Ok(None), // idle — normal outcome
            Ok(Some(msg)) => Ok(Some(msg)),
            Ok(None) => Err(IsoMuxError::ConnectionLost(
                "simulated switch hung up".into(),
            )),
        }
    }

    // ---

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    // ---

    fn peer(&self) -> String {
        "sim:0".into()
    }
}
