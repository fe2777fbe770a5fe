//! [`SimSwitch`] — the scripted in-process authorizer.
//!
//! Each [`open_link`](SimSwitch::open_link) spawns one authorizer task that
//! plays the remote switch for that link: it reads requests, applies the
//! configured impairments, and answers through a pluggable [`Responder`].
//! Control hooks (`fail_next_connects`, `drop_links`) let tests script
//! connect failures and mid-session link loss.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, watch, Mutex};

use isomux_domain::{fields, IsoChannelPtr, IsoMessage, IsoMuxError, Result};

use super::channel::SimChannel;
use super::config::SimConfig;

// ---------------------------------------------------------------------------
// Responder
// ---------------------------------------------------------------------------

/// One scripted answer: the message plus extra per-reply latency on top of
/// the configured base delay. Distinct delays per reply are how tests
/// produce out-of-order deliveries.
pub struct SimReply {
    // ---
    pub message: IsoMessage,
    pub delay: Duration,
}

// ---

/// Scripted switch behaviour: request in, optional reply out.
/// `None` swallows the request (targeted response loss).
pub type Responder = Arc<dyn Fn(&IsoMessage) -> Option<SimReply> + Send + Sync>;

// ---

/// Default behaviour: echo the request, response MTI, approval code, and a
/// freshly stamped transmission timestamp — like a real switch, which makes
/// composite keys built over field 7 disagree and exercises the STAN
/// fallback path.
pub fn echo_approval(request: &IsoMessage) -> Option<SimReply> {
    // ---
    let mut response = request.clone();
    if let Some(mti) = request.response_mti() {
        response.set_mti(mti);
    }
    response.set(fields::RESPONSE_CODE, "00");
    if request.has(fields::TRANSMISSION_TIMESTAMP) {
        response.set(fields::TRANSMISSION_TIMESTAMP, "0000000000");
    }
    Some(SimReply {
        message: response,
        delay: Duration::ZERO,
    })
}

// ---------------------------------------------------------------------------
// SimSwitch
// ---------------------------------------------------------------------------

pub struct SimSwitch {
    // ---
    config: SimConfig,
    responder: Responder,

    /// Total requests that reached the authorizer, across all links.
    /// Shared with every authorizer task.
    requests_seen: Arc<AtomicU64>,

    /// Remaining scripted connect failures.
    fail_connects: AtomicU32,

    /// Cut signals for every live link, in open order.
    links: Mutex<Vec<watch::Sender<bool>>>,
}

// ---

impl SimSwitch {
    // ---
    pub fn new(config: SimConfig) -> Arc<Self> {
        Self::with_responder(config, Arc::new(echo_approval))
    }

    pub fn with_responder(config: SimConfig, responder: Responder) -> Arc<Self> {
        // ---
        Arc::new(Self {
            config,
            responder,
            requests_seen: Arc::new(AtomicU64::new(0)),
            fail_connects: AtomicU32::new(0),
            links: Mutex::new(Vec::new()),
        })
    }

    // ---

    pub fn requests_seen(&self) -> u64 {
        self.requests_seen.load(Ordering::Relaxed)
    }

    /// Make the next `n` connect attempts fail with a `Connect` error.
    pub fn fail_next_connects(&self, n: u32) {
        self.fail_connects.store(n, Ordering::Relaxed);
    }

    // ---

    /// Sever every live link. Clients observe `ConnectionLost` on their
    /// next read or write, exactly like a dropped socket.
    pub async fn drop_links(&self) {
        // ---
        let mut links = self.links.lock().await;
        let cut = links.len();
        for link in links.drain(..) {
            let _ = link.send(true);
        }
        tracing::info!(cut, "sim switch dropped all live links");
    }

    // ---

    /// Open one simulated link and spawn its authorizer task.
    pub async fn open_link(&self) -> Result<IsoChannelPtr> {
        // ---
        let remaining =
            self.fail_connects
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                    n.checked_sub(1)
                });
        if remaining.is_ok() {
            return Err(IsoMuxError::Connect {
                addr: "sim:0".into(),
                reason: "scripted connect failure".into(),
            });
        }

        let (outbound_tx, outbound_rx) = mpsc::channel::<IsoMessage>(64);
        let (inbound_tx, inbound_rx) = mpsc::channel::<IsoMessage>(64);
        let (cut_tx, cut_rx) = watch::channel(false);

        self.links.lock().await.push(cut_tx);

        tokio::spawn(authorize(
            self.config.clone(),
            Arc::clone(&self.responder),
            Arc::clone(&self.requests_seen),
            outbound_rx,
            inbound_tx,
            cut_rx,
        ));

        Ok(Arc::new(SimChannel::new(outbound_tx, inbound_rx)))
    }
}

// ---------------------------------------------------------------------------
// authorize
// ---------------------------------------------------------------------------

/// Per-link authorizer loop — plays the remote switch for one link.
async fn authorize(
    config: SimConfig,
    responder: Responder,
    requests_seen: Arc<AtomicU64>,
    mut requests: mpsc::Receiver<IsoMessage>,
    replies: mpsc::Sender<IsoMessage>,
    mut cut: watch::Receiver<bool>,
) {
    // ---
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    loop {
        tokio::select! {
            changed = cut.changed() => {
                if changed.is_err() || *cut.borrow() {
                    tracing::debug!("sim link cut");
                    break;
                }
            }
            request = requests.recv() => {
                let Some(request) = request else {
                    break; // client end dropped
                };
                requests_seen.fetch_add(1, Ordering::Relaxed);

                if config.mute {
                    tracing::debug!(stan = ?request.stan(), "mute switch swallowed request");
                    continue;
                }
                if rng.gen::<f64>() < config.drop_percent {
                    tracing::debug!(stan = ?request.stan(), "sim dropped response");
                    continue;
                }
                let Some(reply) = (responder)(&request) else {
                    continue;
                };

                let duplicate = rng.gen::<f64>() < config.dup_percent;
                let delay = config.response_delay + reply.delay;
                let replies = replies.clone();

                // Each reply sleeps on its own task so a slow answer never
                // delays the next request — that is also what lets replies
                // overtake each other.
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if duplicate {
                        let _ = replies.send(reply.message.clone()).await;
                    }
                    let _ = replies.send(reply.message).await;
                });
            }
        }
    }
    // Dropping `replies` here closes the client's inbound side once any
    // in-flight reply tasks finish.
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    // ---

    fn request(stan: &str) -> IsoMessage {
        IsoMessage::new("0200")
            .with(fields::PROCESSING_CODE, "301099")
            .with(fields::TRANSMISSION_TIMESTAMP, "0807100000")
            .with(fields::STAN, stan)
    }

    const READ: Duration = Duration::from_millis(300);

    // ---

    #[tokio::test]
    async fn default_responder_approves_with_fresh_timestamp() {
        // ---
        let switch = SimSwitch::new(SimConfig::perfect());
        let link = switch.open_link().await.expect("open link");

        link.send(&request("000001")).await.expect("send");
        let response = link.receive(READ).await.expect("receive").expect("reply");

        assert_eq!(response.mti(), "0210");
        assert_eq!(response.get(fields::RESPONSE_CODE), Some("00"));
        assert_eq!(response.stan(), Some("000001"));
        assert_ne!(
            response.get(fields::TRANSMISSION_TIMESTAMP),
            Some("0807100000"),
            "switch must restamp field 7"
        );
        assert_eq!(switch.requests_seen(), 1);
    }

    // ---

    #[tokio::test]
    async fn mute_switch_times_out_quietly() {
        // ---
        let switch = SimSwitch::new(SimConfig::mute());
        let link = switch.open_link().await.expect("open link");

        link.send(&request("000001")).await.expect("send");
        let got = link.receive(Duration::from_millis(50)).await.expect("receive");

        assert!(got.is_none(), "mute switch must never answer");
        assert_eq!(switch.requests_seen(), 1);
    }

    // ---

    #[tokio::test]
    async fn total_drop_withholds_every_response() {
        // ---
        let switch = SimSwitch::new(SimConfig {
            drop_percent: 1.0,
            seed: Some(7),
            ..SimConfig::perfect()
        });
        let link = switch.open_link().await.expect("open link");

        link.send(&request("000001")).await.expect("send");
        assert!(link
            .receive(Duration::from_millis(50))
            .await
            .expect("receive")
            .is_none());
    }

    // ---

    #[tokio::test]
    async fn total_duplication_delivers_twice() {
        // ---
        let switch = SimSwitch::new(SimConfig {
            dup_percent: 1.0,
            seed: Some(7),
            ..SimConfig::perfect()
        });
        let link = switch.open_link().await.expect("open link");

        link.send(&request("000001")).await.expect("send");
        let first = link.receive(READ).await.expect("receive").expect("first copy");
        let second = link.receive(READ).await.expect("receive").expect("second copy");

        assert_eq!(first.stan(), Some("000001"));
        assert_eq!(second.stan(), Some("000001"));
    }

    // ---

    #[tokio::test]
    async fn scripted_connect_failures_then_success() {
        // ---
        let switch = SimSwitch::new(SimConfig::perfect());
        switch.fail_next_connects(2);

        assert!(switch.open_link().await.is_err());
        assert!(switch.open_link().await.is_err());
        assert!(switch.open_link().await.is_ok(), "third attempt must succeed");
    }

    // ---

    #[tokio::test]
    async fn dropped_links_sever_live_channels() {
        // ---
        let switch = SimSwitch::new(SimConfig::perfect());
        let link = switch.open_link().await.expect("open link");

        switch.drop_links().await;

        match link.receive(READ).await {
            Err(IsoMuxError::ConnectionLost(_)) => {}
            other => panic!("expected ConnectionLost, got {:?}", other.map(|_| ())),
        }
    }

    // ---

    #[tokio::test]
    async fn per_reply_delay_reorders_responses() {
        // ---
        let responder: Responder = Arc::new(|request: &IsoMessage| {
            let mut reply = echo_approval(request)?;
            if request.stan() == Some("000001") {
                reply.delay = Duration::from_millis(80);
            }
            Some(reply)
        });
        let switch = SimSwitch::with_responder(SimConfig::perfect(), responder);
        let link = switch.open_link().await.expect("open link");

        link.send(&request("000001")).await.expect("send slow");
        link.send(&request("000002")).await.expect("send fast");

        let first = link.receive(READ).await.expect("receive").expect("reply");
        let second = link.receive(READ).await.expect("receive").expect("reply");

        assert_eq!(first.stan(), Some("000002"), "fast reply must overtake");
        assert_eq!(second.stan(), Some("000001"));
    }
}
