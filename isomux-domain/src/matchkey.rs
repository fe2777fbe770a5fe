//! [`OutputKeySet`] — the configured field list composite match keys are
//! built from.
//!
//! The composite key is a best-effort fast path only: the default set
//! includes the transmission timestamp (field 7), which the switch
//! regenerates on the response, so request and response keys rarely agree.
//! STAN fallback in the correlation table is what reliably matches; the
//! key set exists so operators can tighten matching when their switch
//! echoes fields verbatim.

use std::fmt;
use std::str::FromStr;

use super::error::IsoMuxError;
use super::message::{IsoMessage, MAX_FIELD};

// ---------------------------------------------------------------------------
// OutputKeySet
// ---------------------------------------------------------------------------

/// Ordered list of ISO field numbers used to build composite match keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputKeySet {
    // ---
    fields: Vec<u8>,
}

// ---

impl Default for OutputKeySet {
    /// Processing code, transmission timestamp, STAN, terminal id.
    fn default() -> Self {
        Self {
            fields: vec![3, 7, 11, 41],
        }
    }
}

// ---

impl OutputKeySet {
    // ---
    /// An empty key set would make every message collide on `""`; reject it.
    pub fn new(fields: Vec<u8>) -> Result<Self, IsoMuxError> {
        if fields.is_empty() {
            return Err(IsoMuxError::Format(
                "output key set must name at least one field".into(),
            ));
        }
        if let Some(bad) = fields.iter().find(|f| !(2..=MAX_FIELD).contains(f)) {
            return Err(IsoMuxError::Format(format!(
                "output key field {bad} outside 2..=128"
            )));
        }
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[u8] {
        &self.fields
    }

    // ---

    /// Deterministic composite key: `"<field>:<value>|"` for every
    /// configured field the message carries, in configured order.
    /// A pure function of the message's values at those fields.
    pub fn match_key(&self, msg: &IsoMessage) -> String {
        // ---
        let mut key = String::new();
        for &field in &self.fields {
            if let Some(value) = msg.get(field) {
                key.push_str(&field.to_string());
                key.push(':');
                key.push_str(value);
                key.push('|');
            }
        }
        key
    }
}

// ---

impl fmt::Display for OutputKeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.fields.iter().map(u8::to_string).collect();
        write!(f, "{}", parts.join(","))
    }
}

// ---

impl FromStr for OutputKeySet {
    type Err = IsoMuxError;

    /// Parse the operator form `"3,7,11,41"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        let fields = s
            .split(',')
            .map(|part| {
                part.trim().parse::<u8>().map_err(|_| {
                    IsoMuxError::Format(format!("invalid output key field {part:?}"))
                })
            })
            .collect::<Result<Vec<u8>, _>>()?;
        Self::new(fields)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    // ---

    fn sample() -> IsoMessage {
        IsoMessage::new("0200")
            .with(3, "301099")
            .with(7, "0807103000")
            .with(11, "000123")
            .with(41, "TERM0001")
    }

    // ---

    #[test]
    fn key_is_pure_function_of_configured_fields() {
        // ---
        let keys = OutputKeySet::default();
        let a = keys.match_key(&sample());
        let b = keys.match_key(&sample());

        assert_eq!(a, b, "identical field values must give identical keys");
        assert_eq!(a, "3:301099|7:0807103000|11:000123|41:TERM0001|");
    }

    // ---

    #[test]
    fn missing_fields_are_skipped() {
        // ---
        let keys = OutputKeySet::default();
        let msg = IsoMessage::new("0800").with(11, "000001");

        assert_eq!(keys.match_key(&msg), "11:000001|");
    }

    // ---

    #[test]
    fn differing_values_give_differing_keys() {
        // ---
        let keys = OutputKeySet::default();
        let other = sample().with(11, "000124");

        assert_ne!(keys.match_key(&sample()), keys.match_key(&other));
    }

    // ---

    #[test]
    fn parses_operator_form_and_round_trips() {
        // ---
        let keys: OutputKeySet = "3, 7,11,41".parse().expect("valid key list");
        assert_eq!(keys.fields(), &[3, 7, 11, 41]);
        assert_eq!(keys.to_string(), "3,7,11,41");
    }

    // ---

    #[test]
    fn rejects_empty_and_junk() {
        // ---
        assert!(OutputKeySet::new(vec![]).is_err());
        assert!("".parse::<OutputKeySet>().is_err());
        assert!("3,x".parse::<OutputKeySet>().is_err());
        assert!("1,11".parse::<OutputKeySet>().is_err(), "field 1 is the bitmap");
    }
}
