//! [`FieldTextCodec`] — the bundled plain-text message codec.
//!
//! Payload layout: the 4-digit MTI, then one `field=value` unit per set
//! field, separated by ASCII FS (0x1C). Bitmap-packed binary codecs plug in
//! through the same [`MessageCodec`] seam; this one exists so the agent
//! binary and the test suites have a concrete collaborator.

use isomux_domain::{IsoMessage, IsoMuxError, MessageCodec, Result, MAX_FIELD};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// ASCII FS — separates the MTI and each `field=value` unit.
pub const FIELD_SEPARATOR: char = '\u{1c}';

// ---------------------------------------------------------------------------
// FieldTextCodec
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FieldTextCodec;

// ---

impl MessageCodec for FieldTextCodec {
    // ---
    fn encode(&self, msg: &IsoMessage) -> Result<Vec<u8>> {
        // ---
        validate_mti(msg.mti())?;

        let mut out = String::from(msg.mti());
        for (field, value) in msg.iter() {
            if value.contains(FIELD_SEPARATOR) {
                return Err(IsoMuxError::Format(format!(
                    "field {field} value contains the separator byte"
                )));
            }
            out.push(FIELD_SEPARATOR);
            out.push_str(&field.to_string());
            out.push('=');
            out.push_str(value);
        }
        Ok(out.into_bytes())
    }

    // ---

    fn decode(&self, bytes: &[u8]) -> Result<IsoMessage> {
        // ---
        let text = std::str::from_utf8(bytes)
            .map_err(|e| IsoMuxError::Format(format!("payload is not UTF-8: {e}")))?;

        let mut units = text.split(FIELD_SEPARATOR);
        let mti = units
            .next()
            .ok_or_else(|| IsoMuxError::Format("empty payload".into()))?;
        validate_mti(mti)?;

        let mut msg = IsoMessage::new(mti);
        for unit in units {
            let (field, value) = unit.split_once('=').ok_or_else(|| {
                IsoMuxError::Format(format!("field unit {unit:?} missing '='"))
            })?;
            let field: u8 = field
                .parse()
                .ok()
                .filter(|f| (2..=MAX_FIELD).contains(f))
                .ok_or_else(|| {
                    IsoMuxError::Format(format!("invalid field number {field:?}"))
                })?;
            msg.set(field, value);
        }
        Ok(msg)
    }
}

// ---

fn validate_mti(mti: &str) -> Result<()> {
    if mti.len() == 4 && mti.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(IsoMuxError::Format(format!("bad MTI {mti:?}")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use isomux_domain::fields;

    use super::*;

    // ---

    #[test]
    fn round_trip_preserves_mti_and_fields() {
        // ---
        let codec = FieldTextCodec;
        let original = IsoMessage::new("0200")
            .with(fields::PROCESSING_CODE, "301099")
            .with(fields::STAN, "000123")
            .with(fields::TERMINAL_ID, "TERM0001");

        let bytes = codec.encode(&original).expect("encode");
        let recovered = codec.decode(&bytes).expect("decode");

        assert_eq!(recovered, original);
    }

    // ---

    #[test]
    fn message_with_no_fields_is_just_the_mti() {
        // ---
        let codec = FieldTextCodec;
        let bytes = codec.encode(&IsoMessage::new("0800")).expect("encode");
        assert_eq!(bytes, b"0800");

        let recovered = codec.decode(&bytes).expect("decode");
        assert_eq!(recovered.mti(), "0800");
        assert_eq!(recovered.field_count(), 0);
    }

    // ---

    #[test]
    fn bad_mti_rejected_both_ways() {
        // ---
        let codec = FieldTextCodec;
        assert!(codec.encode(&IsoMessage::new("20")).is_err());
        assert!(codec.decode(b"20xx\x1c11=1").is_err());
    }

    // ---

    #[test]
    fn malformed_unit_rejected() {
        // ---
        let codec = FieldTextCodec;
        let err = codec.decode(b"0210\x1cno-equals").unwrap_err();
        assert!(matches!(err, IsoMuxError::Format(_)));

        let err = codec.decode(b"0210\x1c999=v").unwrap_err();
        assert!(matches!(err, IsoMuxError::Format(_)));
    }

    // ---

    #[test]
    fn separator_inside_a_value_rejected_on_encode() {
        // ---
        let codec = FieldTextCodec;
        let msg = IsoMessage::new("0200").with(43, format!("A{FIELD_SEPARATOR}B"));
        assert!(codec.encode(&msg).is_err());
    }
}
