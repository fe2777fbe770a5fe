//! [`IsoMessage`] — the logical unit exchanged with the switch.
//!
//! An ISO 8583 message is a 4-digit message type indicator (MTI) plus an
//! ordered mapping from field number (2–128) to a string value. Field 1 is
//! the bitmap and belongs to the wire codec, never to the logical message.
//!
//! Messages are built by the external message-builder collaborator and are
//! treated as immutable once handed to `send()` — the core only reads them.

use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Field numbers
// ---------------------------------------------------------------------------

/// Well-known ISO 8583 field numbers used by the core.
pub mod fields {
    // ---
    /// Primary account number.
    pub const PAN: u8 = 2;
    /// Processing code.
    pub const PROCESSING_CODE: u8 = 3;
    /// Transmission date and time, `MMDDhhmmss`. Regenerated at send time,
    /// so it is time-variant and unreliable for correlation.
    pub const TRANSMISSION_TIMESTAMP: u8 = 7;
    /// System trace audit number — the correlation anchor.
    pub const STAN: u8 = 11;
    /// Retrieval reference number.
    pub const RRN: u8 = 37;
    /// Response code ("00" = approved).
    pub const RESPONSE_CODE: u8 = 39;
    /// Card acceptor terminal id.
    pub const TERMINAL_ID: u8 = 41;
    /// Network management information code ("301" = echo test).
    pub const NETWORK_MGMT_CODE: u8 = 70;
}

/// Highest addressable field number.
pub const MAX_FIELD: u8 = 128;

// ---------------------------------------------------------------------------
// IsoMessage
// ---------------------------------------------------------------------------

/// A logical ISO 8583 message: MTI plus ordered field values.
///
/// `BTreeMap` keeps fields in numeric order so iteration, display, and
/// encoded output are deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoMessage {
    // ---
    mti: String,
    fields: BTreeMap<u8, String>,
}

// ---

impl IsoMessage {
    // ---
    pub fn new(mti: impl Into<String>) -> Self {
        Self {
            mti: mti.into(),
            fields: BTreeMap::new(),
        }
    }

    // ---

    pub fn mti(&self) -> &str {
        &self.mti
    }

    pub fn set_mti(&mut self, mti: impl Into<String>) {
        self.mti = mti.into();
    }

    // ---

    /// Set a field value. Field numbers outside 2–128 are a caller bug.
    pub fn set(&mut self, field: u8, value: impl Into<String>) {
        debug_assert!(
            (2..=MAX_FIELD).contains(&field),
            "field {field} outside 2..=128"
        );
        self.fields.insert(field, value.into());
    }

    /// Builder-style variant of [`set`](Self::set).
    pub fn with(mut self, field: u8, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    pub fn get(&self, field: u8) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    pub fn has(&self, field: u8) -> bool {
        self.fields.contains_key(&field)
    }

    /// STAN (field 11), if present.
    pub fn stan(&self) -> Option<&str> {
        self.get(fields::STAN)
    }

    /// Iterate fields in numeric order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &str)> {
        self.fields.iter().map(|(f, v)| (*f, v.as_str()))
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    // ---

    /// MTI of the response that answers this message: numeric MTI + 10
    /// (0200 → 0210, 0800 → 0810). `None` if the MTI is not numeric.
    pub fn response_mti(&self) -> Option<String> {
        self.mti
            .parse::<u16>()
            .ok()
            .map(|mti| format!("{:04}", mti + 10))
    }

    /// True for response-class MTIs (third digit 1 or 3).
    pub fn is_response(&self) -> bool {
        matches!(self.mti.as_bytes().get(2), Some(b'1') | Some(b'3'))
    }

    /// True for network-management messages (08xx).
    pub fn is_network_management(&self) -> bool {
        self.mti.starts_with("08")
    }
}

// ---

impl fmt::Display for IsoMessage {
    /// Compact log form: MTI plus `field=value` pairs, PAN masked.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mti)?;
        for (field, value) in self.fields.iter() {
            if *field == fields::PAN {
                write!(f, " {field}={}", mask_pan(value))?;
            } else {
                write!(f, " {field}={value}")?;
            }
        }
        Ok(())
    }
}

// ---

/// First six and last four digits visible, the rest starred out.
/// Char-based so a garbage value from the wire cannot split a code point.
fn mask_pan(pan: &str) -> String {
    let chars: Vec<char> = pan.chars().collect();
    if chars.len() <= 10 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(chars.len() - 10))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    // ---

    #[test]
    fn set_get_has() {
        // ---
        let mut msg = IsoMessage::new("0200");
        msg.set(fields::STAN, "000123");
        msg.set(fields::PROCESSING_CODE, "301099");

        assert_eq!(msg.mti(), "0200");
        assert_eq!(msg.get(fields::STAN), Some("000123"));
        assert!(msg.has(fields::PROCESSING_CODE));
        assert!(!msg.has(fields::RRN));
        assert_eq!(msg.stan(), Some("000123"));
    }

    // ---

    #[test]
    fn fields_iterate_in_numeric_order() {
        // ---
        let msg = IsoMessage::new("0200")
            .with(41, "TERM0001")
            .with(3, "301099")
            .with(11, "000001");

        let order: Vec<u8> = msg.iter().map(|(f, _)| f).collect();
        assert_eq!(order, vec![3, 11, 41], "BTreeMap must order fields");
    }

    // ---

    #[test]
    fn response_mti_adds_ten() {
        // ---
        assert_eq!(IsoMessage::new("0200").response_mti().as_deref(), Some("0210"));
        assert_eq!(IsoMessage::new("0800").response_mti().as_deref(), Some("0810"));
        assert_eq!(IsoMessage::new("junk").response_mti(), None);
    }

    // ---

    #[test]
    fn response_classification() {
        // ---
        assert!(IsoMessage::new("0210").is_response());
        assert!(!IsoMessage::new("0200").is_response());
        assert!(IsoMessage::new("0810").is_network_management());
        assert!(IsoMessage::new("0800").is_network_management());
        assert!(!IsoMessage::new("0200").is_network_management());
    }

    // ---

    #[test]
    fn display_masks_pan() {
        // ---
        let msg = IsoMessage::new("0200")
            .with(fields::PAN, "4111111111111111")
            .with(fields::STAN, "000007");

        let rendered = msg.to_string();
        assert!(
            rendered.contains("2=411111******1111"),
            "PAN must be masked, got: {rendered}"
        );
        assert!(rendered.contains("11=000007"));
    }
}
