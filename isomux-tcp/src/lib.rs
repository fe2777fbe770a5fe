//! TCP physical channel for the isomux switch driver.
//!
//! Implements [`isomux_domain::IsoChannel`] / [`isomux_domain::IsoConnector`]
//! over a plain TCP stream with 4-digit ASCII length framing, plus the
//! bundled [`FieldTextCodec`].
//!
//! # Structure
//!
//! - [`framing`]  — length-prefixed frame read/write
//! - `text`       — [`FieldTextCodec`]
//! - `channel`    — [`TcpChannel`]
//! - `connector`  — [`TcpConnector`]

mod channel;
mod connector;
pub mod framing;
mod text;

// --- public API
pub use channel::TcpChannel;
pub use connector::TcpConnector;
pub use text::{FieldTextCodec, FIELD_SEPARATOR};
