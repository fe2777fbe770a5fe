//! In-process mock switch for isomux unit and integration testing.
//!
//! [`SimSwitch`] plays the remote authorizer over tokio channels instead of
//! real sockets. [`SimConfig`] controls injected impairments:
//!
//! - Response withholding probability (lost responses)
//! - Response duplication probability
//! - Base response delay, plus per-reply delay from the [`Responder`]
//!   (out-of-order delivery)
//! - A mute mode that never answers
//! - Deterministic RNG seed for reproducible runs
//!
//! Control hooks script connect failures and mid-session link loss:
//!
//! ```rust,no_run
//! use isomux_link_sim::{SimConfig, SimSwitch};
//!
//! let switch = SimSwitch::new(SimConfig::perfect());
//! switch.fail_next_connects(2);
//! ```

mod channel;
mod config;
mod connector;
mod switch;

// --- public API
pub use config::SimConfig;
pub use connector::SimConnector;
pub use switch::{echo_approval, Responder, SimReply, SimSwitch};
