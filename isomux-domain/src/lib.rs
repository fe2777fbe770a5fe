//! Core types, traits, and the pseudo-mux correlation table for the isomux
//! ISO 8583 switch driver.
//!
//! This crate defines the vocabulary of the system. All other crates depend
//! on `isomux-domain` and speak its types.
//!
//! # Structure
//!
//! - [`error`]       — [`IsoMuxError`] and [`Result<T>`] alias
//! - [`message`]     — [`IsoMessage`] and well-known field numbers
//! - [`stan`]        — [`StanGenerator`] and RRN derivation
//! - [`matchkey`]    — [`OutputKeySet`] composite match keys
//! - [`codec`]       — [`MessageCodec`] seam (bitmap packing stays external)
//! - [`channel`]     — [`IsoChannel`], [`IsoConnector`] traits, [`ConnectionState`]
//! - [`correlation`] — [`CorrelationTable`], the core matching algorithm

mod channel;
mod codec;
mod correlation;
mod error;
mod matchkey;
mod message;
mod stan;

// --- error
pub use error::{IsoMuxError, Result};

// --- message
pub use message::{fields, IsoMessage, MAX_FIELD};

// --- stan
pub use stan::{rrn, StanGenerator, RRN_LEN, STAN_MAX};

// --- matchkey
pub use matchkey::OutputKeySet;

// --- codec
pub use codec::{MessageCodec, MessageCodecPtr};

// --- channel
pub use channel::{
    // ---
    ConnectionState,
    IsoChannel,
    IsoChannelPtr,
    IsoConnector,
    IsoConnectorPtr,
};

// --- correlation
pub use correlation::{CorrelationTable, PendingTicket};
