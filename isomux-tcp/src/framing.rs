//! Wire framing for switch messages.
//!
//! Every message on the TCP stream is one frame: a 4-character ASCII
//! decimal length header followed by exactly that many payload bytes
//! (the classic ASCII-channel discipline).
//!
//! ```text
//! +------+------+------+------+---------------------------+
//! | d1   | d2   | d3   | d4   | payload (len bytes)       |
//! +------+------+------+------+---------------------------+
//!   '0'..='9' ASCII digits      codec-encoded message
//!  ← length header, 4 bytes →
//! ```
//!
//! A non-digit in the length header means the stream is desynchronized;
//! there is no way to find the next frame boundary, so that is fatal for
//! the channel. A payload that fails to *decode* is not — the boundary
//! held, the next frame is still readable.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use isomux_domain::{IsoMuxError, Result};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Length header width in bytes.
pub const LEN_DIGITS: usize = 4;

/// Largest payload expressible in a 4-digit header.
pub const MAX_FRAME: usize = 9_999;

// ---------------------------------------------------------------------------
// write_frame
// ---------------------------------------------------------------------------

/// Write one frame: length header + payload.
///
/// The caller serializes access to `w`; this function performs no locking.
pub async fn write_frame<W>(w: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME {
        return Err(IsoMuxError::Format(format!(
            "encoded message is {} bytes, frame limit is {MAX_FRAME}",
            payload.len()
        )));
    }

    let header = format!("{:04}", payload.len());

    w.write_all(header.as_bytes())
        .await
        .map_err(|e| IsoMuxError::ConnectionLost(format!("frame write header: {e}")))?;

    w.write_all(payload)
        .await
        .map_err(|e| IsoMuxError::ConnectionLost(format!("frame write payload: {e}")))?;

    Ok(())
}

// ---------------------------------------------------------------------------
// read_frame
// ---------------------------------------------------------------------------

/// Read one frame.
///
/// Returns `None` on clean EOF at a frame boundary (zero-length read of
/// the first header byte), which signals that the peer closed the
/// connection.
pub async fn read_frame<R>(r: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut first = [0u8; 1];
    match r.read(&mut first).await {
        Ok(0) => return Ok(None), // clean EOF
        Ok(_) => {}
        Err(e) => {
            return Err(IsoMuxError::ConnectionLost(format!(
                "frame read header[0]: {e}"
            )))
        }
    }

    read_frame_after(first[0], r).await.map(Some)
}

// ---

/// Finish reading a frame whose first header byte has already been
/// consumed. Lets the channel apply its read timeout to frame *arrival*
/// only — once a frame has started, it is read to completion so a slow
/// sender cannot desynchronize the stream.
pub async fn read_frame_after<R>(first: u8, r: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; LEN_DIGITS];
    header[0] = first;

    r.read_exact(&mut header[1..])
        .await
        .map_err(|e| IsoMuxError::ConnectionLost(format!("frame read header[1..]: {e}")))?;

    let len = parse_len(&header)?;

    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .await
        .map_err(|e| IsoMuxError::ConnectionLost(format!("frame read payload: {e}")))?;

    Ok(payload)
}

// ---

fn parse_len(header: &[u8; LEN_DIGITS]) -> Result<usize> {
    let mut len = 0usize;
    for &b in header {
        if !b.is_ascii_digit() {
            // The boundary is gone; nothing after this point can be trusted.
            return Err(IsoMuxError::ConnectionLost(format!(
                "frame desync: non-numeric length header {header:?}"
            )));
        }
        len = len * 10 + usize::from(b - b'0');
    }
    Ok(len)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::io::Cursor;

    use super::*;

    // ---

    #[tokio::test]
    async fn round_trip() {
        // ---
        let mut buf: Vec<u8> = Vec::new();
        write_frame(&mut buf, b"0800\x1c11=000001").await.unwrap();
        write_frame(&mut buf, b"second").await.unwrap();

        let mut reader = Cursor::new(buf);
        let one = read_frame(&mut reader).await.unwrap().expect("frame one");
        let two = read_frame(&mut reader).await.unwrap().expect("frame two");

        assert_eq!(one, b"0800\x1c11=000001");
        assert_eq!(two, b"second");
        assert!(
            read_frame(&mut reader).await.unwrap().is_none(),
            "clean EOF must read as None"
        );
    }

    // ---

    #[tokio::test]
    async fn header_is_zero_padded() {
        // ---
        let mut buf: Vec<u8> = Vec::new();
        write_frame(&mut buf, b"ab").await.unwrap();
        assert_eq!(&buf[..LEN_DIGITS], b"0002");
    }

    // ---

    #[tokio::test]
    async fn oversize_payload_rejected_before_write() {
        // ---
        let mut buf: Vec<u8> = Vec::new();
        let err = write_frame(&mut buf, &vec![0u8; MAX_FRAME + 1])
            .await
            .unwrap_err();
        assert!(matches!(err, IsoMuxError::Format(_)));
        assert!(buf.is_empty(), "nothing may reach the wire");
    }

    // ---

    #[tokio::test]
    async fn non_numeric_length_is_fatal() {
        // ---
        let mut reader = Cursor::new(b"00x4oops".to_vec());
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, IsoMuxError::ConnectionLost(_)));
    }

    // ---

    #[tokio::test]
    async fn truncated_frame_is_connection_lost() {
        // ---
        let mut reader = Cursor::new(b"0010short".to_vec());
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, IsoMuxError::ConnectionLost(_)));
    }
}
