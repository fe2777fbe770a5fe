//! [`TcpChannel`] — the one physical socket to the switch.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use isomux_domain::{IsoChannel, IsoMessage, IsoMuxError, MessageCodecPtr, Result};

use super::framing::{read_frame_after, write_frame};

// ---------------------------------------------------------------------------
// TcpChannel
// ---------------------------------------------------------------------------

/// TCP stream split into owned halves, each behind its own mutex.
///
/// The write mutex is the single-writer discipline: encode happens outside
/// the lock, the frame write inside it, so two logical requests' bytes can
/// never interleave. Only the listener loop calls `receive`, but the read
/// half is locked anyway so the contract does not depend on that.
pub struct TcpChannel {
    // ---
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    codec: MessageCodecPtr,
    peer: String,
}

// ---

impl TcpChannel {
    // ---
    pub fn new(stream: TcpStream, codec: MessageCodecPtr, peer: String) -> Self {
        // ---
        let (reader, writer) = stream.into_split();
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            codec,
            peer,
        }
    }
}

// ---

#[async_trait]
impl IsoChannel for TcpChannel {
    // ---
    async fn send(&self, msg: &IsoMessage) -> Result<()> {
        // ---
        let bytes = self.codec.encode(msg)?;

        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, &bytes).await?;
        writer
            .flush()
            .await
            .map_err(|e| IsoMuxError::ConnectionLost(format!("frame flush: {e}")))?;
        Ok(())
    }

    // ---

    async fn receive(&self, read_timeout: Duration) -> Result<Option<IsoMessage>> {
        // ---
        let mut reader = self.reader.lock().await;

        // The timeout covers frame *arrival* only. Once the first header
        // byte lands, the rest of the frame is read without a deadline —
        // abandoning a partially read frame would desynchronize the stream.
        let mut first = [0u8; 1];
        let arrival =
            tokio::time::timeout(read_timeout, tokio::io::AsyncReadExt::read(&mut *reader, &mut first))
                .await;

        let bytes = match arrival {
            Err(_elapsed) => return Ok(None), // idle — normal outcome
            Ok(Ok(0)) => {
                return Err(IsoMuxError::ConnectionLost(
                    "connection closed by peer".into(),
                ))
            }
            Ok(Ok(_)) => read_frame_after(first[0], &mut *reader).await?,
            Ok(Err(e)) => {
                return Err(IsoMuxError::ConnectionLost(format!("socket read: {e}")))
            }
        };
        drop(reader);

        // Decode failures are recoverable: the frame boundary held.
        self.codec.decode(&bytes).map(Some)
    }

    // ---

    async fn shutdown(&self) {
        // ---
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(peer = %self.peer, "socket shutdown: {e}");
        }
    }

    // ---

    fn peer(&self) -> String {
        self.peer.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use isomux_domain::fields;

    use super::super::text::FieldTextCodec;
    use super::*;

    // ---

    async fn channel_pair() -> (TcpChannel, TcpStream) {
        // ---
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let (client, accepted) =
            tokio::join!(TcpStream::connect(addr), listener.accept());
        let client = client.expect("connect");
        let (server, _) = accepted.expect("accept");

        let channel = TcpChannel::new(
            client,
            Arc::new(FieldTextCodec),
            addr.to_string(),
        );
        (channel, server)
    }

    // ---

    #[tokio::test]
    async fn send_and_receive_round_trip() {
        // ---
        let (channel, mut server) = channel_pair().await;

        let request = IsoMessage::new("0800")
            .with(fields::STAN, "000001")
            .with(fields::NETWORK_MGMT_CODE, "301");
        channel.send(&request).await.expect("send");

        // The server sees one framed request and answers in kind.
        let mut header = [0u8; 4];
        server.read_exact(&mut header).await.expect("server read header");
        assert_eq!(&header, b"0021", "length header for 21-byte payload");
        let mut payload = vec![0u8; 21];
        server
            .read_exact(&mut payload)
            .await
            .expect("server read payload");

        server
            .write_all(b"0027\x30\x38\x31\x30\x1c11=000001\x1c39=00\x1c70=301")
            .await
            .expect("server write");

        let response = channel
            .receive(Duration::from_millis(500))
            .await
            .expect("receive")
            .expect("message");
        assert_eq!(response.mti(), "0810");
        assert_eq!(response.get(fields::RESPONSE_CODE), Some("00"));
    }

    // ---

    #[tokio::test]
    async fn idle_read_times_out_as_none() {
        // ---
        let (channel, _server) = channel_pair().await;

        let got = channel
            .receive(Duration::from_millis(20))
            .await
            .expect("receive");
        assert!(got.is_none(), "idle timeout must be a normal outcome");
    }

    // ---

    #[tokio::test]
    async fn peer_close_is_connection_lost() {
        // ---
        let (channel, server) = channel_pair().await;
        drop(server);

        let err = channel
            .receive(Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, IsoMuxError::ConnectionLost(_)));
    }

    // ---

    #[tokio::test]
    async fn decode_failure_is_recoverable() {
        // ---
        let (channel, mut server) = channel_pair().await;

        // A correctly framed but undecodable payload, then a valid frame.
        server.write_all(b"0004junk").await.expect("garbage frame");
        server
            .write_all(b"0014\x30\x38\x31\x30\x1c11=000002")
            .await
            .expect("valid frame");

        let err = channel
            .receive(Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, IsoMuxError::Format(_)));

        // The stream must still be readable after the bad payload.
        let next = channel
            .receive(Duration::from_millis(200))
            .await
            .expect("receive")
            .expect("message");
        assert_eq!(next.stan(), Some("000002"));
    }
}
