//! Deterministic fingerprints for parameter sets.
//!
//! A fingerprint is the SHA-256 digest of the canonical JSON serialization
//! of a parameter object (object keys sorted, no whitespace), truncated to
//! 128 bits and hex-encoded. Semantically equal parameter sets produce the
//! same fingerprint regardless of key order.
//!
//! Fingerprints name cached artifacts (`<fingerprint>.zip`,
//! `<fingerprint>.png`). A digest collision would serve another parameter
//! set's cached artifact — an accepted cache-staleness risk, not a security
//! boundary.

use std::fmt;

use sha2::{Digest, Sha256};

/// Hex length of a fingerprint: 128 bits.
const FINGERPRINT_LEN: usize = 32;

/// Deterministic digest of a canonicalized parameter object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint any serializable value.
    pub fn of<T: serde::Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::of_value(&serde_json::to_value(value)?))
    }

    /// Fingerprint an already-parsed JSON value.
    pub fn of_value(value: &serde_json::Value) -> Self {
        let canonical = canonical_json(value);
        let digest = Sha256::digest(canonical.as_bytes());
        let hex = format!("{:x}", digest);
        Fingerprint(hex[..FINGERPRINT_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the model archive artifact for this parameter set.
    pub fn zip_name(&self) -> String {
        format!("{}.zip", self.0)
    }

    /// Name of the screenshot artifact for this parameter set.
    pub fn png_name(&self) -> String {
        format!("{}.png", self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialize a JSON value with object keys sorted and no whitespace.
///
/// Arrays keep their order; only object key order is normalized. Leaf nodes
/// use `serde_json`'s compact `Display`, which is stable for a given value.
fn canonical_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Display on Value::String produces the quoted, escaped form.
                out.push_str(&serde_json::Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        leaf => out.push_str(&leaf.to_string()),
    }
}
