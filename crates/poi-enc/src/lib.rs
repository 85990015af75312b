//! Canonical encoding library for POI traces.
//!
//! Every commitment in the trace format is a SHA-256 over a canonical byte
//! string: object keys sorted by code point, shortest round-tripping decimal
//! numbers, minimal JSON escaping, no insignificant whitespace. Two
//! semantically equal values always canonicalize to the same bytes, so the
//! hashes computed downstream are reproducible across machines and runs.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors produced by canonical encoding and decoding
#[derive(Error, Debug)]
pub enum EncodingError {
    /// Serialization failed
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Deserialization failed
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// NaN and infinities have no canonical decimal form
    #[error("Non-finite number cannot be canonically encoded")]
    NonFiniteNumber,

    /// Invalid hex digest
    #[error("Invalid hex digest: {0}")]
    InvalidHex(String),
}

/// Result type for encoding operations
pub type EncResult<T> = Result<T, EncodingError>;

/// A lowercase hex-encoded SHA-256 digest (64 characters, no prefix)
pub type HexHash = String;

/// Domain prefixes for every hashed structure in the trace format.
///
/// The prefixes are part of the commitment format and must stay bit-exact:
/// changing one changes every downstream hash.
pub mod domains {
    /// Per-event hash domain
    pub const EVENT: &str = "poi-trace:event:v1|";
    /// Rolling hash chain-link domain
    pub const ROLL: &str = "poi-trace:roll:v1|";
    /// Root commitment domain
    pub const ROOT: &str = "poi-trace:root:v1|";
    /// Merkle leaf domain
    pub const LEAF: &str = "poi-trace:leaf:v1|";
    /// Merkle internal-node domain
    pub const NODE: &str = "poi-trace:node:v1|";
    /// Per-span hash domain
    pub const SPAN: &str = "poi-trace:span:v1|";
    /// Storage manifest domain
    pub const MANIFEST: &str = "poi-trace:manifest:v1|";
    /// Seed literal for the rolling hash genesis state
    pub const GENESIS_SEED: &str = "genesis";
}

/// Convert any serializable value into a `serde_json::Value` tree
pub fn to_canonical_value<T: Serialize>(value: &T) -> EncResult<Value> {
    serde_json::to_value(value).map_err(|e| EncodingError::SerializationFailed(e.to_string()))
}

/// Canonically encode a serializable value to bytes
pub fn to_canonical_json<T: Serialize>(value: &T) -> EncResult<Vec<u8>> {
    let tree = to_canonical_value(value)?;
    Ok(canonical_json(&tree))
}

/// Canonically encode a serializable value to a UTF-8 string
pub fn to_canonical_string<T: Serialize>(value: &T) -> EncResult<String> {
    let bytes = to_canonical_json(value)?;
    // canonical_json only emits valid UTF-8
    String::from_utf8(bytes).map_err(|e| EncodingError::SerializationFailed(e.to_string()))
}

/// Decode canonical JSON bytes back into a typed value
pub fn decode_canonical<T: DeserializeOwned>(bytes: &[u8]) -> EncResult<T> {
    serde_json::from_slice(bytes).map_err(|e| EncodingError::DeserializationFailed(e.to_string()))
}

/// Write a `Value` tree in canonical form: sorted keys, no whitespace,
/// shortest round-tripping numbers, minimal escapes.
pub fn canonical_json(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        // serde_json renders integers via itoa and floats via ryu, which is
        // the shortest decimal representation that round-trips
        Value::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::String(s) => write_escaped_string(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out);
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_escaped_string(key, out);
                out.push(b':');
                write_value(&map[key.as_str()], out);
            }
            out.push(b'}');
        }
    }
}

fn write_escaped_string(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    let mut buf = [0u8; 4];
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\u{08}' => out.extend_from_slice(b"\\b"),
            '\u{0c}' => out.extend_from_slice(b"\\f"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 => {
                out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes()),
        }
    }
    out.push(b'"');
}

/// Checked conversion of an `f64` into a canonical JSON number.
///
/// `serde_json` silently maps non-finite floats to `null`; every float that
/// enters a hashed structure must pass through here instead.
pub fn number_from_f64(value: f64) -> EncResult<Number> {
    Number::from_f64(value).ok_or(EncodingError::NonFiniteNumber)
}

/// SHA-256 of raw bytes
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 of a UTF-8 string, as a lowercase hex digest
pub fn sha256_hex(input: &str) -> HexHash {
    hex::encode(sha256(input.as_bytes()))
}

/// SHA-256 of raw bytes, as a lowercase hex digest
pub fn sha256_hex_bytes(data: &[u8]) -> HexHash {
    hex::encode(sha256(data))
}

/// Constant-time equality of two hex digests.
///
/// Length mismatch returns false without leaking a position.
pub fn constant_time_eq_hex(a: &str, b: &str) -> bool {
    ring::constant_time::verify_slices_are_equal(a.as_bytes(), b.as_bytes()).is_ok()
}
