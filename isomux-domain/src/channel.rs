use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::error::Result;
use super::message::IsoMessage;

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// Observable state of one physical connection to the switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    // ---
    /// No socket. The initial state, and the terminal state after
    /// `disconnect()` or reconnect exhaustion.
    Disconnected,

    /// An explicit `connect()` is dialing.
    Connecting,

    /// Socket up, listener and keep-alive tasks running.
    Connected,

    /// A live link failed; the bounded reconnect policy is running.
    Reconnecting,
}

// ---

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// IsoChannel
// ---------------------------------------------------------------------------

/// One physical channel to the switch.
///
/// `#[async_trait]` keeps the trait dyn-compatible so the supervisor can
/// hold `IsoChannelPtr` regardless of transport.
#[async_trait]
pub trait IsoChannel: Send + Sync {
    // ---
    /// Write one message. Implementations serialize concurrent callers
    /// internally (mutex around encode + write) so two logical requests'
    /// bytes are never interleaved on the wire.
    async fn send(&self, msg: &IsoMessage) -> Result<()>;

    /// Read the next inbound message.
    ///
    /// `Ok(None)` is the *normal* read-timeout outcome — the listener loop
    /// uses it to recheck its shutdown signal without busy-waiting.
    /// `Err(Format)` is a recoverable decode failure (frame boundary
    /// intact); `Err(ConnectionLost)` means the stream is dead or
    /// desynchronized and the channel must be abandoned.
    async fn receive(&self, read_timeout: Duration) -> Result<Option<IsoMessage>>;

    /// Close the channel. Idempotent.
    async fn shutdown(&self);

    /// Remote endpoint label for status and log fields.
    fn peer(&self) -> String;
}

// ---

/// Convenience type alias for a shared [`IsoChannel`].
pub type IsoChannelPtr = Arc<dyn IsoChannel>;

// ---------------------------------------------------------------------------
// IsoConnector
// ---------------------------------------------------------------------------

/// Factory for [`IsoChannel`]s.
///
/// The supervisor keeps the connector so it can redial during reconnects
/// without involving the caller. Implementations: `isomux_tcp::TcpConnector`,
/// `isomux_link_sim::SimConnector`.
#[async_trait]
pub trait IsoConnector: Send + Sync {
    // ---
    /// Dial the switch and return a live channel.
    async fn connect(&self) -> Result<IsoChannelPtr>;

    /// `host:port` form of the configured endpoint.
    fn endpoint(&self) -> String;
}

// ---

/// Convenience type alias for a shared [`IsoConnector`].
pub type IsoConnectorPtr = Arc<dyn IsoConnector>;
