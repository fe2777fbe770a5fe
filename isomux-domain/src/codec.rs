//! The codec seam between logical messages and wire bytes.
//!
//! Bitmap packing and unpacking live outside this workspace; the core only
//! depends on this abstraction. Implementations must be cheap to share —
//! every channel holds a [`MessageCodecPtr`].

use std::sync::Arc;

use super::error::Result;
use super::message::IsoMessage;

// ---------------------------------------------------------------------------
// MessageCodec
// ---------------------------------------------------------------------------

/// Encode/decode a logical message to/from a wire payload (framing
/// excluded — the channel owns frame boundaries).
///
/// Decode failures must come back as [`IsoMuxError::Format`] so the
/// listener loop can skip the frame without tearing down the connection.
///
/// [`IsoMuxError::Format`]: super::error::IsoMuxError::Format
pub trait MessageCodec: Send + Sync {
    // ---
    fn encode(&self, msg: &IsoMessage) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<IsoMessage>;
}

// ---

/// Convenience type alias for a shared [`MessageCodec`].
pub type MessageCodecPtr = Arc<dyn MessageCodec>;
