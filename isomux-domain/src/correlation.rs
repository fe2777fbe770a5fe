//! [`CorrelationTable`] — pseudo-mux matching of inbound responses to
//! in-flight requests sharing one physical connection.
//!
//! # Why pseudo-mux
//!
//! The wire protocol carries no transport-level request id: responses may
//! arrive reordered, delayed, lost, or duplicated. Each outbound request is
//! therefore registered here *before* its bytes hit the wire, and every
//! inbound message is matched back by content:
//!
//! 1. exact composite key (the configured [`OutputKeySet`]) — O(1);
//! 2. STAN fallback — linear scan comparing field 11, logged as a weaker
//!    match. Composite keys built from time-variant fields (the
//!    transmission timestamp is regenerated on the response side) rarely
//!    agree end-to-end; the STAN is what reliably survives;
//! 3. no match — an orphan (duplicate delivery, retransmission, or a
//!    response whose request already expired): logged and dropped.
//!
//! # Concurrency
//!
//! Many caller tasks register and cancel; exactly one listener task
//! resolves. All entry state sits behind one mutex that is never held
//! across an await, and completion slots are oneshot channels, so
//! resolution can never block on a slow caller and a slot can never be
//! completed twice.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex, RwLock};

use super::error::{IsoMuxError, Result};
use super::matchkey::OutputKeySet;
use super::message::IsoMessage;

// ---------------------------------------------------------------------------
// PendingTicket
// ---------------------------------------------------------------------------

/// What a registered caller holds while its request is in flight.
///
/// Dropping the ticket abandons the slot; the table entry is removed by the
/// caller's own timeout path, the sweep, or a disconnect.
#[derive(Debug)]
pub struct PendingTicket {
    // ---
    /// The composite key this request occupies in the table.
    pub match_key: String,

    /// Resolves with the matched response, or with the error the sweep /
    /// disconnect path assigned.
    pub slot: oneshot::Receiver<Result<IsoMessage>>,
}

// ---------------------------------------------------------------------------
// Internal types
// ---------------------------------------------------------------------------

struct PendingEntry {
    // ---
    request: IsoMessage,
    enqueued_at: Instant,
    tx: oneshot::Sender<Result<IsoMessage>>,
}

// ---

/// How an inbound message found its pending entry. Log-only.
enum MatchKind {
    Exact,
    StanFallback,
}

// ---------------------------------------------------------------------------
// CorrelationTable
// ---------------------------------------------------------------------------

pub struct CorrelationTable {
    // ---
    /// Field list composite keys are built from. Operator-reconfigurable;
    /// affects keys computed after the change only.
    keys: RwLock<OutputKeySet>,

    /// In-flight requests keyed by composite match key.
    entries: Mutex<HashMap<String, PendingEntry>>,
}

// ---

impl CorrelationTable {
    // ---
    pub fn new(keys: OutputKeySet) -> Self {
        Self {
            keys: RwLock::new(keys),
            entries: Mutex::new(HashMap::new()),
        }
    }

    // ---

    pub async fn output_keys(&self) -> OutputKeySet {
        self.keys.read().await.clone()
    }

    pub async fn set_output_keys(&self, keys: OutputKeySet) {
        tracing::info!(output_keys = %keys, "output key set reconfigured");
        *self.keys.write().await = keys;
    }

    /// Composite key for `msg` under the current key set.
    pub async fn match_key(&self, msg: &IsoMessage) -> String {
        self.keys.read().await.match_key(msg)
    }

    // ---

    /// Track a request that is about to be written to the wire.
    ///
    /// Must be called *before* the write so a fast response can never
    /// arrive untracked. A colliding key is rejected rather than
    /// overwriting the earlier entry — overwriting would orphan the first
    /// caller's slot forever.
    pub async fn register(&self, request: &IsoMessage) -> Result<PendingTicket> {
        // ---
        let match_key = self.match_key(request).await;
        let (tx, rx) = oneshot::channel();

        let mut entries = self.entries.lock().await;
        if entries.contains_key(&match_key) {
            return Err(IsoMuxError::DuplicateInFlight(match_key));
        }
        entries.insert(
            match_key.clone(),
            PendingEntry {
                request: request.clone(),
                enqueued_at: Instant::now(),
                tx,
            },
        );

        Ok(PendingTicket {
            match_key,
            slot: rx,
        })
    }

    // ---

    /// Match one inbound message against the pending set and complete the
    /// winning slot. Orphans are logged and dropped; the caller (the
    /// listener loop) keeps running regardless.
    pub async fn resolve(&self, response: IsoMessage) {
        // ---
        let response_key = self.match_key(&response).await;
        let mut entries = self.entries.lock().await;

        let matched = if entries.contains_key(&response_key) {
            Some((response_key.clone(), MatchKind::Exact))
        } else {
            // STAN fallback: the only field guaranteed stable end-to-end.
            response.stan().and_then(|stan| {
                entries
                    .iter()
                    .find(|(_, entry)| entry.request.stan() == Some(stan))
                    .map(|(key, _)| (key.clone(), MatchKind::StanFallback))
            })
        };

        let Some((key, kind)) = matched else {
            tracing::warn!(
                mti = %response.mti(),
                stan = ?response.stan(),
                match_key = %response_key,
                pending = entries.len(),
                "orphan response — no matching pending request",
            );
            return;
        };

        let Some(entry) = entries.remove(&key) else {
            return;
        };
        drop(entries);

        let elapsed = entry.enqueued_at.elapsed();
        match kind {
            MatchKind::Exact => tracing::info!(
                stan = ?response.stan(),
                elapsed_ms = elapsed.as_millis() as u64,
                "response matched by composite key",
            ),
            MatchKind::StanFallback => tracing::info!(
                stan = ?response.stan(),
                elapsed_ms = elapsed.as_millis() as u64,
                "response matched by STAN fallback — composite key differed",
            ),
        }

        if entry.tx.send(Ok(response)).is_err() {
            // Caller already gave up (local timeout); nothing to deliver to.
            tracing::debug!(match_key = %key, "caller gone before resolution");
        }
    }

    // ---

    /// Caller-local cancellation: remove this caller's own entry after its
    /// await timed out. Idempotent — the sweep may have beaten us to it.
    pub async fn remove(&self, match_key: &str) -> bool {
        self.entries.lock().await.remove(match_key).is_some()
    }

    // ---

    /// Complete every entry older than `max_age` with a timeout and drop
    /// it. Guarantees every `send()` eventually unblocks even under total
    /// response loss.
    pub async fn sweep_expired(&self, max_age: Duration) -> usize {
        // ---
        let mut entries = self.entries.lock().await;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.enqueued_at.elapsed() > max_age)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            if let Some(entry) = entries.remove(key) {
                tracing::warn!(
                    stan = ?entry.request.stan(),
                    waited_ms = entry.enqueued_at.elapsed().as_millis() as u64,
                    "expired pending request swept",
                );
                let _ = entry.tx.send(Err(IsoMuxError::Timeout(max_age)));
            }
        }
        expired.len()
    }

    // ---

    /// Complete every entry with `make_err` and empty the table. The
    /// disconnect path, with `ConnectionClosed` or `ConnectionLost`.
    pub async fn fail_all(&self, make_err: impl Fn() -> IsoMuxError) -> usize {
        // ---
        let drained: Vec<PendingEntry> = {
            let mut entries = self.entries.lock().await;
            entries.drain().map(|(_, entry)| entry).collect()
        };

        let count = drained.len();
        for entry in drained {
            let _ = entry.tx.send(Err(make_err()));
        }
        count
    }

    // ---

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
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
            .with(3, "301099")
            .with(7, "0807100000")
            .with(11, stan)
            .with(41, "TERM0001")
    }

    /// Response as a real switch produces it: same STAN, fresh timestamp,
    /// response MTI, approval code.
    fn response(stan: &str) -> IsoMessage {
        IsoMessage::new("0210")
            .with(3, "301099")
            .with(7, "0807100059")
            .with(11, stan)
            .with(39, "00")
            .with(41, "TERM0001")
    }

    fn table() -> CorrelationTable {
        CorrelationTable::new(OutputKeySet::default())
    }

    // ---

    #[tokio::test]
    async fn exact_key_match_resolves_caller() {
        // ---
        let table = table();
        let req = request("000123");
        let ticket = table.register(&req).await.expect("register");

        // Echo every keyed field back so the composite keys agree.
        let mut resp = req.clone();
        resp.set_mti("0210");
        resp.set(39, "00");
        table.resolve(resp).await;

        let got = ticket.slot.await.expect("slot").expect("matched");
        assert_eq!(got.get(39), Some("00"));
        assert!(table.is_empty().await, "entry must be removed on match");
    }

    // ---

    #[tokio::test]
    async fn stan_fallback_when_composite_key_differs() {
        // ---
        let table = table();
        let ticket = table.register(&request("000123")).await.expect("register");

        // Fresh field 7 on the response: composite keys cannot agree.
        table.resolve(response("000123")).await;

        let got = ticket.slot.await.expect("slot").expect("matched");
        assert_eq!(got.stan(), Some("000123"));
        assert!(table.is_empty().await);
    }

    // ---

    #[tokio::test]
    async fn reordered_responses_reach_their_own_callers() {
        // ---
        let table = table();
        let ticket_a = table.register(&request("000001")).await.expect("register a");
        let ticket_b = table.register(&request("000002")).await.expect("register b");

        // B's response lands first.
        table.resolve(response("000002")).await;
        table.resolve(response("000001")).await;

        let got_a = ticket_a.slot.await.expect("slot a").expect("match a");
        let got_b = ticket_b.slot.await.expect("slot b").expect("match b");
        assert_eq!(got_a.stan(), Some("000001"), "caller A got B's response");
        assert_eq!(got_b.stan(), Some("000002"), "caller B got A's response");
    }

    // ---

    #[tokio::test]
    async fn orphan_leaves_table_unchanged() {
        // ---
        let table = table();
        let _ticket = table.register(&request("000123")).await.expect("register");

        table.resolve(response("999999")).await;

        assert_eq!(table.len().await, 1, "orphan must not consume the entry");
    }

    // ---

    #[tokio::test]
    async fn colliding_registration_is_rejected() {
        // ---
        let table = table();
        let req = request("000123");
        let _first = table.register(&req).await.expect("first register");

        match table.register(&req).await {
            Err(IsoMuxError::DuplicateInFlight(key)) => {
                assert!(key.contains("11:000123"));
            }
            other => panic!("expected DuplicateInFlight, got {other:?}"),
        }
        assert_eq!(table.len().await, 1, "first entry must survive the collision");
    }

    // ---

    #[tokio::test]
    async fn sweep_expires_only_stale_entries() {
        // ---
        let table = table();
        let stale = table.register(&request("000001")).await.expect("register stale");
        tokio::time::sleep(Duration::from_millis(30)).await;
        let fresh = table.register(&request("000002")).await.expect("register fresh");

        let swept = table.sweep_expired(Duration::from_millis(15)).await;

        assert_eq!(swept, 1);
        assert_eq!(table.len().await, 1, "fresh entry must survive the sweep");
        match stale.slot.await.expect("slot") {
            Err(IsoMuxError::Timeout(_)) => {}
            other => panic!("stale entry must time out, got {other:?}"),
        }
        drop(fresh);
    }

    // ---

    #[tokio::test]
    async fn fail_all_empties_table_and_notifies_every_caller() {
        // ---
        let table = table();
        let a = table.register(&request("000001")).await.expect("register");
        let b = table.register(&request("000002")).await.expect("register");

        let failed = table.fail_all(|| IsoMuxError::ConnectionClosed).await;

        assert_eq!(failed, 2);
        assert!(table.is_empty().await);
        for ticket in [a, b] {
            match ticket.slot.await.expect("slot") {
                Err(IsoMuxError::ConnectionClosed) => {}
                other => panic!("expected ConnectionClosed, got {other:?}"),
            }
        }
    }

    // ---

    #[tokio::test]
    async fn remove_is_idempotent_with_the_sweep() {
        // ---
        let table = table();
        let ticket = table.register(&request("000123")).await.expect("register");

        assert!(table.remove(&ticket.match_key).await);
        assert!(!table.remove(&ticket.match_key).await, "second remove is a no-op");
        assert!(table.is_empty().await);
    }

    // ---

    #[tokio::test]
    async fn resolving_after_caller_gave_up_is_harmless() {
        // ---
        let table = table();
        let ticket = table.register(&request("000123")).await.expect("register");
        drop(ticket.slot); // caller's await timed out and it walked away

        // Must not panic, and must still clear the entry.
        table.resolve(response("000123")).await;
        assert!(table.is_empty().await);
    }

    // ---

    #[tokio::test]
    async fn reconfigured_keys_apply_to_new_registrations() {
        // ---
        let table = table();
        table
            .set_output_keys(OutputKeySet::new(vec![11]).expect("valid keys"))
            .await;

        let ticket = table.register(&request("000123")).await.expect("register");
        assert_eq!(ticket.match_key, "11:000123|");

        // STAN-only keys survive the response's fresh timestamp, so the
        // exact path now matches directly.
        table.resolve(response("000123")).await;
        let got = ticket.slot.await.expect("slot").expect("matched");
        assert_eq!(got.stan(), Some("000123"));
    }
}
