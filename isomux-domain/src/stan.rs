//! STAN generation and the RRN derived from it.
//!
//! The system trace audit number (field 11) is the one value guaranteed
//! stable between a request and its response, which makes it the reliable
//! correlation anchor. The generator hands out values `1..=999999` and
//! wraps back to 1, never repeating within a wrap cycle even under
//! concurrent callers — the whole advance is a single atomic update.

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::NaiveDateTime;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Largest STAN value; the generator wraps to 1 past this.
pub const STAN_MAX: u32 = 999_999;

/// Exact width of a retrieval reference number.
pub const RRN_LEN: usize = 12;

// ---------------------------------------------------------------------------
// StanGenerator
// ---------------------------------------------------------------------------

/// Atomically-incremented STAN source, seeded at 1.
#[derive(Debug)]
pub struct StanGenerator {
    // ---
    /// The value the next call to [`next`](Self::next) will return.
    next: AtomicU32,
}

// ---

impl Default for StanGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ---

impl StanGenerator {
    // ---
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Start the sequence at `value` (clamped into `1..=STAN_MAX`).
    /// Exists so wrap behaviour can be exercised without 10^6 calls.
    pub fn starting_at(value: u32) -> Self {
        Self {
            next: AtomicU32::new(value.clamp(1, STAN_MAX)),
        }
    }

    // ---

    /// Return the current value and advance, wrapping `STAN_MAX` → 1.
    ///
    /// One `fetch_update` covers both the increment and the wrap, so two
    /// racing callers can never observe the same value within a cycle.
    pub fn next(&self) -> u32 {
        let update = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(if v >= STAN_MAX { 1 } else { v + 1 })
            });
        match update {
            Ok(prev) => prev,
            // Unreachable: the closure never returns None.
            Err(prev) => prev,
        }
    }

    /// [`next`](Self::next) already zero-padded to field-11 width.
    pub fn next_formatted(&self) -> String {
        Self::format(self.next())
    }

    // ---

    /// Zero-pad a STAN to the 6 digits field 11 carries on the wire.
    pub fn format(stan: u32) -> String {
        format!("{stan:06}")
    }
}

// ---------------------------------------------------------------------------
// RRN
// ---------------------------------------------------------------------------

/// Build a retrieval reference number: Julian date (`yyDDD`) + 6-digit STAN,
/// right-padded with '0' or truncated to exactly [`RRN_LEN`] characters.
pub fn rrn(stan: u32, now: NaiveDateTime) -> String {
    // ---
    let julian = now.format("%y%j").to_string();
    let mut rrn = format!("{julian}{:06}", stan.min(STAN_MAX));

    if rrn.len() > RRN_LEN {
        rrn.truncate(RRN_LEN);
    } else {
        while rrn.len() < RRN_LEN {
            rrn.push('0');
        }
    }
    rrn
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
