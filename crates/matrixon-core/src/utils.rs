//! Utility functions for Matrixon streams
//!
//! Byte codecs for database keys, hashing and canonical JSON.

use std::{
    fmt::Write as _,
    time::{SystemTime, UNIX_EPOCH},
};

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Returns the current time in milliseconds since Unix epoch
///
/// # Examples
/// ```
/// use matrixon_core::utils::millis_since_unix_epoch;
///
/// let timestamp = millis_since_unix_epoch();
/// assert!(timestamp > 1640995200000); // After 2022-01-01
/// ```
pub fn millis_since_unix_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Parses a big-endian u64 from exactly 8 bytes
///
/// Database keys store every integer big-endian so that byte order equals
/// numeric order.
///
/// # Examples
/// ```
/// use matrixon_core::utils::u64_from_bytes;
///
/// let bytes = [0, 0, 0, 0, 0, 0, 0, 42];
/// assert_eq!(u64_from_bytes(&bytes).unwrap(), 42);
/// assert!(u64_from_bytes(&bytes[1..]).is_err());
/// ```
pub fn u64_from_bytes(bytes: &[u8]) -> Result<u64> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::bad_database("Integer in database has invalid length."))?;
    Ok(u64::from_be_bytes(array))
}

/// Parses bytes into a UTF-8 string
pub fn string_from_bytes(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| Error::bad_database("String in database is invalid unicode."))
}

/// Calculates the SHA256 hash of several byte slices joined by `0xff`
///
/// # Examples
/// ```
/// use matrixon_core::utils::calculate_hash;
///
/// let data: &[&[u8]] = &[b"hello", b"world"];
/// let hash = calculate_hash(data);
/// assert_eq!(hash.len(), 32);
/// ```
pub fn calculate_hash(keys: &[&[u8]]) -> Vec<u8> {
    let bytes = keys.join(&0xff);
    Sha256::digest(&bytes).to_vec()
}

/// Serializes a JSON value with object keys sorted and no insignificant
/// whitespace.
///
/// Two values that are equal as JSON always produce the same string, which
/// is what content hashing of events relies on.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::String(s) => write_string(s, out),
        other => {
            let _ = write!(out, "{other}");
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    // serde_json's string escaping is already minimal
    out.push_str(&Value::String(s.to_owned()).to_string());
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_canonical_json_sorts_keys_recursively() {
        let value = json!({
            "b": 1,
            "a": { "z": [3, {"y": true, "x": null}], "m": "s" },
        });
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"m":"s","z":[3,{"x":null,"y":true}]},"b":1}"#
        );
    }

    #[test]
    fn test_canonical_json_escapes_strings() {
        let value = json!({ "k": "line\n\"quoted\"" });
        assert_eq!(canonical_json(&value), r#"{"k":"line\n\"quoted\""}"#);
    }

    #[test]
    fn test_hash_separates_parts() {
        assert_ne!(
            calculate_hash(&[b"ab", b"c"]),
            calculate_hash(&[b"a", b"bc"])
        );
    }

    #[test]
    fn test_string_from_bytes_rejects_invalid_utf8() {
        assert_eq!(string_from_bytes(b"room").unwrap(), "room");
        assert!(string_from_bytes(&[0xff, 0xfe]).is_err());
    }
}
