//! [`TcpConnector`] — dials the switch and produces [`TcpChannel`]s.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use isomux_domain::{IsoChannelPtr, IsoConnector, IsoMuxError, MessageCodecPtr, Result};

use super::channel::TcpChannel;

// ---------------------------------------------------------------------------
// TcpConnector
// ---------------------------------------------------------------------------

pub struct TcpConnector {
    // ---
    addr: String,
    connect_timeout: Duration,
    codec: MessageCodecPtr,
}

// ---

impl TcpConnector {
    // ---
    pub fn new(host: &str, port: u16, connect_timeout: Duration, codec: MessageCodecPtr) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            connect_timeout,
            codec,
        }
    }
}

// ---

#[async_trait]
impl IsoConnector for TcpConnector {
    // ---
    async fn connect(&self) -> Result<IsoChannelPtr> {
        // ---
        let dial = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| IsoMuxError::Connect {
                addr: self.addr.clone(),
                reason: format!("no answer within {:?}", self.connect_timeout),
            })?;

        let stream = dial.map_err(|e| IsoMuxError::Connect {
            addr: self.addr.clone(),
            reason: e.to_string(),
        })?;

        // Request/response traffic is latency-bound; never let Nagle hold
        // a frame back.
        stream.set_nodelay(true).map_err(|e| IsoMuxError::Connect {
            addr: self.addr.clone(),
            reason: format!("set_nodelay: {e}"),
        })?;

        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| self.addr.clone());

        tracing::info!(%peer, "switch connection established");
        Ok(Arc::new(TcpChannel::new(stream, self.codec.clone(), peer)))
    }

    // ---

    fn endpoint(&self) -> String {
        self.addr.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
