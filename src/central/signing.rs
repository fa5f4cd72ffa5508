use std::io;

use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::{ser::Formatter, Value};
use sha2::Sha256;

/// Hex-encoded HMAC-SHA256 of `payload`. An empty secret disables signing and
/// yields an empty string.
pub fn generate_signature(secret: &str, payload: &str) -> String {
    if secret.is_empty() {
        return String::new();
    }

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// key: signing-canonical-form -> key-sorted JSON the central service verifies
///
/// Object keys are sorted at every depth; otherwise identical to [`spaced_json`].
pub fn canonical_json(value: &Value) -> String {
    let sorted = sort_keys(value);
    spaced_json(&sorted).unwrap_or_else(|_| sorted.to_string())
}

/// Serializes with `", "` between items, `": "` between keys and values, and
/// non-ASCII characters escaped as `\uXXXX`. Field order is preserved.
pub fn spaced_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, SpacedFormatter);
    value.serialize(&mut serializer)?;
    // Every non-ASCII character was escaped above.
    Ok(String::from_utf8_lossy(&out).into_owned())
}

// Rebuilt in sorted order so the output is stable with or without `preserve_order`.
fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries = map.iter().collect::<Vec<_>>();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.clone(), sort_keys(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        for ch in fragment.chars() {
            if ch.is_ascii() {
                writer.write_all(&[ch as u8])?;
            } else {
                let mut units = [0u16; 2];
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{unit:04x}")?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_secret_disables_signing() {
        assert_eq!(generate_signature("", "{\"a\": 1}"), "");
    }

    #[test]
    fn signature_is_deterministic_hex() {
        let first = generate_signature("shh", "{\"license_key\": \"LIC-1\"}");
        let second = generate_signature("shh", "{\"license_key\": \"LIC-1\"}");
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(first, second);
        assert_ne!(
            first,
            generate_signature("other", "{\"license_key\": \"LIC-1\"}")
        );
    }

    #[test]
    fn matches_known_hmac_vector() {
        // RFC 4231 test case 2
        assert_eq!(
            generate_signature("Jefe", "what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let value = json!({"b": 1, "a": {"d": 2, "c": [{"z": 1, "y": 2}]}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a": {"c": [{"y": 2, "z": 1}], "d": 2}, "b": 1}"#
        );
    }

    #[test]
    fn spaced_json_keeps_field_order() {
        #[derive(Serialize)]
        struct Row {
            resource: &'static str,
            quantity: f64,
        }
        let rows = vec![Row { resource: "emails", quantity: 2.0 }];
        assert_eq!(
            spaced_json(&rows).unwrap(),
            r#"[{"resource": "emails", "quantity": 2.0}]"#
        );
    }

    #[test]
    fn canonical_json_escapes_non_ascii() {
        let value = json!({"customer": "Café"});
        assert_eq!(canonical_json(&value), r#"{"customer": "Caf\u00e9"}"#);
    }
}
