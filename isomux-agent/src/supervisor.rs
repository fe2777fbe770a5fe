//! [`ConnectionSupervisor`] — owns one physical switch connection and
//! drives the pseudo-mux send path over it.
//!
//! # State machine
//!
//! ```text
//! Disconnected --connect()--> Connecting --opened--> Connected
//! Connected --IO failure--> Reconnecting --success--> Connected
//!                                        --attempts exhausted--> Disconnected
//! Connected --disconnect()--> Disconnected
//! Disconnected --send(), auto-reconnect--> Connecting (inline attempt)
//! ```
//!
//! One supervisor per physical connection, with explicit construction and
//! shutdown — driving several switches just means several independent
//! instances. The supervisor itself is a cheap-clone handle over shared
//! state, so worker tasks and callers can hold it without lifetime
//! gymnastics.
//!
//! The listener and keep-alive workers are supervised tasks: started on
//! `connect()`, stopped via a watch shutdown signal, and the listener is
//! joined with a bounded wait on `disconnect()`.
//!
//! Every link carries a generation number. Failure handling compares
//! generations before tearing anything down, so a stale listener that dies
//! late can never destroy its successor's link.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---

use chrono::{DateTime, Local};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

// ---

use isomux_domain::{
    //
    fields,
    ConnectionState,
    CorrelationTable,
    IsoChannelPtr,
    IsoConnectorPtr,
    IsoMessage,
    IsoMuxError,
    OutputKeySet,
    Result,
    StanGenerator,
};

// ---

use super::status::ConnectionStatus;
use super::{keepalive, listener};

// ---------------------------------------------------------------------------
// SwitchSettings
// ---------------------------------------------------------------------------

/// Per-switch tuning for one supervised connection.
#[derive(Debug, Clone)]
pub struct SwitchSettings {
    // ---
    /// How long a `send()` caller waits for its correlated response. Also
    /// the age at which the expiry sweep abandons a pending request.
    pub response_timeout: Duration,

    /// Listener read timeout — the idle-recheck cadence, not an error
    /// threshold.
    pub read_timeout: Duration,

    /// Reconnect attempts after a link failure. 0 disables recovery.
    pub max_reconnect_attempts: u32,

    /// Delay before the first reconnect attempt; doubles per attempt.
    pub reconnect_delay: Duration,

    /// Cap for the doubling reconnect delay.
    pub reconnect_max_delay: Duration,

    /// Keep-alive probe interval, clamped to `keep_alive_floor`.
    pub keep_alive_interval: Duration,

    /// Probes may not fire more often than this.
    pub keep_alive_floor: Duration,

    /// Whether the network-management probe fires on keep-alive ticks.
    /// The expiry sweep runs either way.
    pub keep_alive_enabled: bool,

    /// Allow `send()` to attempt one inline reconnect when no link is up.
    pub auto_reconnect: bool,
}

// ---

impl Default for SwitchSettings {
    fn default() -> Self {
        // ---
        Self {
            response_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_millis(500),
            max_reconnect_attempts: 3,
            reconnect_delay: Duration::from_secs(5),
            reconnect_max_delay: Duration::from_secs(30),
            keep_alive_interval: Duration::from_secs(900),
            keep_alive_floor: Duration::from_secs(60),
            keep_alive_enabled: true,
            auto_reconnect: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// Everything tied to one live physical connection.
struct Link {
    // ---
    channel: IsoChannelPtr,

    /// Monotonic link counter. Failure handling ignores reports from any
    /// generation but the current one.
    generation: u64,

    conn_id: Uuid,

    /// Broadcast to both worker tasks on teardown.
    shutdown_tx: watch::Sender<bool>,

    listener: JoinHandle<()>,
    keepalive: JoinHandle<()>,
}

// ---

/// How long `disconnect()` waits for the listener to exit before aborting.
const LISTENER_JOIN_WAIT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// ConnectionSupervisor
// ---------------------------------------------------------------------------

/// Cheap-clone handle; all clones drive the same connection.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    // ---
    inner: Arc<Inner>,
}

// ---

struct Inner {
    // ---
    connector: IsoConnectorPtr,
    settings: SwitchSettings,

    table: CorrelationTable,
    stans: StanGenerator,

    /// Current link. `None` while Disconnected / Reconnecting.
    link: Mutex<Option<Link>>,

    state: Mutex<ConnectionState>,
    last_error: Mutex<Option<String>>,
    last_attempt: Mutex<Option<DateTime<Local>>>,

    keep_alive_enabled: AtomicBool,
    keep_alive_interval: Mutex<Duration>,

    generations: AtomicU64,
}

// ---

impl ConnectionSupervisor {
    // ---
    pub fn new(
        connector: IsoConnectorPtr,
        output_keys: OutputKeySet,
        settings: SwitchSettings,
    ) -> Self {
        // ---
        let interval = settings.keep_alive_interval.max(settings.keep_alive_floor);
        let keep_alive_enabled = settings.keep_alive_enabled;

        Self {
            inner: Arc::new(Inner {
                connector,
                table: CorrelationTable::new(output_keys),
                stans: StanGenerator::new(),
                link: Mutex::new(None),
                state: Mutex::new(ConnectionState::Disconnected),
                last_error: Mutex::new(None),
                last_attempt: Mutex::new(None),
                keep_alive_enabled: AtomicBool::new(keep_alive_enabled),
                keep_alive_interval: Mutex::new(interval),
                generations: AtomicU64::new(0),
                settings,
            }),
        }
    }

    // ---------------------------------------------------------------------
    // Connection lifecycle
    // ---------------------------------------------------------------------

    /// Open the physical channel and start the worker tasks.
    ///
    /// Any previous link is torn down first, failing its pending requests
    /// with `ConnectionClosed` — an explicit re-connect is a fresh start.
    pub async fn connect(&self) -> Result<()> {
        // ---
        *self.inner.last_attempt.lock().await = Some(Local::now());
        self.set_state(ConnectionState::Connecting).await;

        self.teardown_link().await;
        let failed = self
            .inner
            .table
            .fail_all(|| IsoMuxError::ConnectionClosed)
            .await;
        if failed > 0 {
            tracing::warn!(failed, "pending requests dropped by explicit reconnect");
        }

        match self.inner.connector.connect().await {
            Ok(channel) => {
                self.install_link(channel).await;
                *self.inner.last_error.lock().await = None;
                self.set_state(ConnectionState::Connected).await;
                tracing::info!(endpoint = %self.inner.connector.endpoint(), "connected to switch");
                Ok(())
            }
            Err(e) => {
                *self.inner.last_error.lock().await = Some(e.to_string());
                self.set_state(ConnectionState::Disconnected).await;
                tracing::error!("connect failed: {e}");
                Err(e)
            }
        }
    }

    // ---

    /// Tear everything down. Idempotent; the global cancellation point —
    /// every outstanding `send()` resolves with `ConnectionClosed`.
    pub async fn disconnect(&self) {
        // ---
        // State first: an in-flight reconnect loop checks for
        // `Reconnecting` before each attempt and stands down.
        self.set_state(ConnectionState::Disconnected).await;
        self.teardown_link().await;

        let failed = self
            .inner
            .table
            .fail_all(|| IsoMuxError::ConnectionClosed)
            .await;
        if failed > 0 {
            tracing::warn!(failed, "pending requests completed with ConnectionClosed");
        }
        tracing::info!("disconnected");
    }

    // ---

    // Returns a boxed future rather than being an `async fn` so this node
    // carries no opaque return type. `install_link` spawns both the listener
    // and the keep-alive task, and each of those can re-enter the supervisor
    // (listener -> on_link_failure; keepalive -> test_connection -> send ->
    // connect -> install_link). Either path would make `Send` inference cycle
    // through `install_link`'s own hidden type; a concrete, explicitly-`Send`
    // return type gives the cycle something resolvable to bottom out on.
    fn install_link<'a>(
        &'a self,
        channel: IsoChannelPtr,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            // ---
            let generation = self.inner.generations.fetch_add(1, Ordering::SeqCst) + 1;
            let conn_id = Uuid::new_v4();
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let interval = *self.inner.keep_alive_interval.lock().await;

            // Hold the link slot across spawn + store: a listener that fails
            // instantly blocks on this lock in its failure path, so its report
            // can never race the installation and be dropped as stale.
            let mut slot = self.inner.link.lock().await;

            let listener = tokio::spawn(listener::run(
                self.clone(),
                channel.clone(),
                shutdown_rx,
                generation,
                conn_id,
            ));
            let keepalive = tokio::spawn(keepalive::run(
                self.clone(),
                shutdown_tx.subscribe(),
                interval,
                generation,
            ));

            *slot = Some(Link {
                channel,
                generation,
                conn_id,
                shutdown_tx,
                listener,
                keepalive,
            });
        })
    }

    // ---

    /// Orderly teardown: signal, close, join the listener with a bounded
    /// wait, abort it if it overstays.
    async fn teardown_link(&self) {
        // ---
        let link = self.inner.link.lock().await.take();
        let Some(link) = link else { return };

        let _ = link.shutdown_tx.send(true);
        link.channel.shutdown().await;
        link.keepalive.abort();

        let abort = link.listener.abort_handle();
        if tokio::time::timeout(LISTENER_JOIN_WAIT, link.listener)
            .await
            .is_err()
        {
            tracing::warn!(conn_id = %link.conn_id, "listener did not stop in time — aborting");
            abort.abort();
        }
    }

    // ---

    /// Failure-path teardown. Runs *on* the listener task, so it must not
    /// join the listener. Returns false when the report is stale.
    async fn teardown_link_from_failure(&self, generation: u64) -> bool {
        // ---
        let link = {
            let mut guard = self.inner.link.lock().await;
            match guard.as_ref() {
                Some(live) if live.generation == generation => guard.take(),
                _ => None,
            }
        };
        let Some(link) = link else { return false };

        let _ = link.shutdown_tx.send(true);
        link.channel.shutdown().await;
        link.keepalive.abort();
        drop(link.listener); // detached — it is the task reporting to us
        true
    }

    // ---

    /// Entry point for listener / failed-write failure reports.
    ///
    /// Returns a boxed future rather than being an `async fn` so this node
    /// carries no opaque return type: the supervisor's failure path is
    /// recursive (on_link_failure -> reconnect_loop -> install_link -> spawns
    /// the listener, which calls on_link_failure), and an opaque future here
    /// would make `Send` inference cycle through its own hidden type. Boxing
    /// gives the cycle a concrete, explicitly-`Send` type to resolve against.
    pub(crate) fn on_link_failure<'a>(
        &'a self,
        generation: u64,
        reason: String,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            // ---
            if !self.teardown_link_from_failure(generation).await {
                tracing::debug!(generation, "stale link failure report ignored");
                return;
            }

            tracing::warn!(%reason, "link failed");
            *self.inner.last_error.lock().await = Some(reason.clone());

            let failed = self
                .inner
                .table
                .fail_all(|| IsoMuxError::ConnectionLost(reason.clone()))
                .await;
            if failed > 0 {
                tracing::warn!(failed, "pending requests completed with ConnectionLost");
            }

            if self.inner.settings.max_reconnect_attempts == 0 {
                self.set_state(ConnectionState::Disconnected).await;
                return;
            }
            self.set_state(ConnectionState::Reconnecting).await;
            self.reconnect_loop().await;
        })
    }

    // ---

    /// Bounded redial: `max_reconnect_attempts` tries with a doubling delay
    /// capped at `reconnect_max_delay`. On exhaustion the connection stays
    /// Disconnected with the last error surfaced via status.
    async fn reconnect_loop(&self) {
        // ---
        let max = self.inner.settings.max_reconnect_attempts;
        let mut delay = self.inner.settings.reconnect_delay;

        for attempt in 1..=max {
            tokio::time::sleep(delay).await;

            // An operator disconnect() during the backoff wins.
            if *self.inner.state.lock().await != ConnectionState::Reconnecting {
                tracing::info!("reconnect cancelled");
                return;
            }

            *self.inner.last_attempt.lock().await = Some(Local::now());
            tracing::info!(attempt, max, "reconnect attempt");

            match self.inner.connector.connect().await {
                Ok(channel) => {
                    self.install_link(channel).await;
                    *self.inner.last_error.lock().await = None;
                    self.set_state(ConnectionState::Connected).await;
                    tracing::info!(attempt, "reconnect succeeded");
                    return;
                }
                Err(e) => {
                    tracing::warn!(attempt, max, "reconnect failed: {e}");
                    *self.inner.last_error.lock().await = Some(e.to_string());
                    delay = (delay * 2).min(self.inner.settings.reconnect_max_delay);
                }
            }
        }

        tracing::error!(attempts = max, "reconnect attempts exhausted — staying disconnected");
        self.set_state(ConnectionState::Disconnected).await;
    }

    // ---------------------------------------------------------------------
    // Send path
    // ---------------------------------------------------------------------

    /// Send one request and wait for its correlated response.
    ///
    /// Registration happens before the wire write, closing the race where
    /// a response could arrive before its request is tracked. The await on
    /// the completion slot is the caller's only suspension point; a local
    /// timeout removes only this caller's entry.
    pub async fn send(&self, request: IsoMessage) -> Result<IsoMessage> {
        // ---
        let (channel, generation) = match self.current_link().await {
            Some(live) => live,
            None => {
                if !self.inner.settings.auto_reconnect {
                    return Err(IsoMuxError::NotConnected);
                }
                tracing::warn!("not connected — attempting inline reconnect");
                self.connect().await?;
                self.current_link().await.ok_or(IsoMuxError::NotConnected)?
            }
        };

        let ticket = self.inner.table.register(&request).await?;
        tracing::info!(
            mti = %request.mti(),
            stan = ?request.stan(),
            match_key = %ticket.match_key,
            "request dispatched",
        );

        if let Err(e) = channel.send(&request).await {
            // The entry must not outlive a request that never hit the wire.
            self.inner.table.remove(&ticket.match_key).await;

            let this = self.clone();
            let reason = e.to_string();
            tokio::spawn(async move { this.on_link_failure(generation, reason).await });
            return Err(e);
        }

        match tokio::time::timeout(self.inner.settings.response_timeout, ticket.slot).await {
            Ok(Ok(outcome)) => outcome,
            // Slot sender vanished without an outcome: the table was
            // cleared under us.
            Ok(Err(_)) => Err(IsoMuxError::ConnectionClosed),
            Err(_elapsed) => {
                // Idempotent with the sweep, which may have won the race.
                self.inner.table.remove(&ticket.match_key).await;
                tracing::error!(
                    stan = ?request.stan(),
                    timeout_ms = self.inner.settings.response_timeout.as_millis() as u64,
                    "request timed out",
                );
                Err(IsoMuxError::Timeout(self.inner.settings.response_timeout))
            }
        }
    }

    // ---

    /// Network-management echo test through the ordinary send/correlation
    /// path. True iff the switch answered 0810 with a clean response code.
    pub async fn test_connection(&self) -> Result<bool> {
        // ---
        let probe = self.network_probe();
        tracing::info!(stan = ?probe.stan(), "connection test probe");

        let response = self.send(probe).await?;
        let approved = matches!(response.get(fields::RESPONSE_CODE), None | Some("00"));
        Ok(response.mti() == "0810" && approved)
    }

    // ---

    /// 0800 echo probe. An ordinary logical request — it flows through the
    /// same registration and matching as any transaction.
    fn network_probe(&self) -> IsoMessage {
        // ---
        let now = Local::now().naive_local();
        IsoMessage::new("0800")
            .with(
                fields::TRANSMISSION_TIMESTAMP,
                now.format("%m%d%H%M%S").to_string(),
            )
            .with(fields::STAN, self.inner.stans.next_formatted())
            .with(fields::NETWORK_MGMT_CODE, "301")
    }

    // ---------------------------------------------------------------------
    // Administrative operations
    // ---------------------------------------------------------------------

    /// Fail every pending request with `ConnectionClosed` and empty the
    /// table. Mapped 1:1 by the administrative surface's clear-buffer op.
    pub async fn clear_pending(&self) -> usize {
        // ---
        let cleared = self
            .inner
            .table
            .fail_all(|| IsoMuxError::ConnectionClosed)
            .await;
        tracing::info!(cleared, "pending buffer cleared");
        cleared
    }

    // ---

    /// Swap the composite-key field set. Applies to requests registered
    /// after the change.
    pub async fn configure_output_keys(&self, keys: OutputKeySet) {
        self.inner.table.set_output_keys(keys).await;
    }

    // ---

    /// Turn the probe on at `interval` (clamped to the floor) and restart
    /// the scheduler on the live link so the new interval applies now.
    pub async fn enable_keep_alive(&self, interval: Duration) {
        // ---
        let effective = interval.max(self.inner.settings.keep_alive_floor);
        if effective > interval {
            tracing::warn!(
                requested_s = interval.as_secs(),
                floor_s = self.inner.settings.keep_alive_floor.as_secs(),
                "keep-alive interval clamped to floor",
            );
        }
        *self.inner.keep_alive_interval.lock().await = effective;
        self.inner.keep_alive_enabled.store(true, Ordering::Relaxed);

        let mut guard = self.inner.link.lock().await;
        if let Some(link) = guard.as_mut() {
            link.keepalive.abort();
            link.keepalive = tokio::spawn(keepalive::run(
                self.clone(),
                link.shutdown_tx.subscribe(),
                effective,
                link.generation,
            ));
        }
        tracing::info!(interval_s = effective.as_secs(), "keep-alive enabled");
    }

    // ---

    /// Stop probing. The expiry sweep keeps running — the unblock
    /// guarantee for `send()` never depends on the probe setting.
    pub fn disable_keep_alive(&self) {
        self.inner.keep_alive_enabled.store(false, Ordering::Relaxed);
        tracing::info!("keep-alive probe disabled — expiry sweep continues");
    }

    // ---

    pub async fn status(&self) -> ConnectionStatus {
        // ---
        let endpoint = self.inner.connector.endpoint();
        let (host, port) = split_endpoint(&endpoint);
        let state = self.state().await;

        ConnectionStatus {
            connected: state == ConnectionState::Connected,
            state: state.to_string(),
            host,
            port,
            last_error: self.inner.last_error.lock().await.clone(),
            last_connection_attempt: *self.inner.last_attempt.lock().await,
            pending_requests: self.inner.table.len().await,
            keep_alive_enabled: self.keep_alive_probe_enabled(),
        }
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    pub async fn state(&self) -> ConnectionState {
        *self.inner.state.lock().await
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.table.len().await
    }

    // ---

    pub(crate) fn table(&self) -> &CorrelationTable {
        &self.inner.table
    }

    pub(crate) fn read_timeout(&self) -> Duration {
        self.inner.settings.read_timeout
    }

    pub(crate) fn response_timeout(&self) -> Duration {
        self.inner.settings.response_timeout
    }

    pub(crate) fn keep_alive_probe_enabled(&self) -> bool {
        self.inner.keep_alive_enabled.load(Ordering::Relaxed)
    }

    // ---

    async fn set_state(&self, state: ConnectionState) {
        let mut current = self.inner.state.lock().await;
        if *current != state {
            tracing::info!(from = %current, to = %state, "connection state");
            *current = state;
        }
    }

    async fn current_link(&self) -> Option<(IsoChannelPtr, u64)> {
        self.inner
            .link
            .lock()
            .await
            .as_ref()
            .map(|l| (l.channel.clone(), l.generation))
    }
}

// ---

/// Split a `host:port` endpoint label for the status snapshot.
fn split_endpoint(endpoint: &str) -> (String, u16) {
    match endpoint.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.parse().unwrap_or(0)),
        None => (endpoint.to_string(), 0),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
