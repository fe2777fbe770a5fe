use std::time::Duration;

use thiserror::Error;

// ---

#[derive(Debug, Error)]
pub enum IsoMuxError {
    // ---
    #[error("connect to {addr} failed: {reason}")]
    Connect { addr: String, reason: String },

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("message format error: {0}")]
    Format(String),

    #[error("no matched response within {0:?}")]
    Timeout(Duration),

    #[error("not connected to the switch")]
    NotConnected,

    #[error("a request with match key {0:?} is already in flight")]
    DuplicateInFlight(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ---

pub type Result<T> = std::result::Result<T, IsoMuxError>;
