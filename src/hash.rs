use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Lowercase hex SHA-256 of the UTF-8 bytes of `input` (64 characters).
pub fn digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Fingerprint stored next to a snapshot so a swapped tenant id is detected.
pub fn tenant_fingerprint(tenant_id: &str) -> String {
    digest(tenant_id)
}

/// Deterministic bucket in [0, 99] for a subject within an experiment.
///
/// The digest input is `experiment_id || subject_id || tenant_id || salt` with no
/// separators, and the bucket is the first 8 hex characters of the digest read as
/// an unsigned integer, modulo 100. Snapshots generated elsewhere depend on this
/// exact layout, so neither the field order nor the window width may change.
pub fn bucket_of(experiment_id: &str, subject_id: &str, tenant_id: &str, salt: &str) -> i32 {
    let mut hasher = Sha256::new();
    hasher.update(experiment_id.as_bytes());
    hasher.update(subject_id.as_bytes());
    hasher.update(tenant_id.as_bytes());
    hasher.update(salt.as_bytes());
    let result = hasher.finalize();

    // 8 hex characters == the first 4 bytes, big-endian
    let prefix = u32::from_be_bytes([result[0], result[1], result[2], result[3]]);
    (prefix % 100) as i32
}

/// Digest of the canonical JSON form of `value`.
///
/// Structurally equal values hash equally no matter in which order their
/// mapping keys were inserted.
pub fn canonical_checksum<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let text = canonical_json(value)?;
    Ok(digest(&text))
}

/// Compact JSON text of `value` with mapping keys sorted at every depth.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let tree = CanonicalValue::from_value(serde_json::to_value(value)?);
    Ok(serde_json::to_string(&tree)?)
}

/// Ordered intermediate tree used for canonical serialization.
///
/// Mappings are stored as key-sorted pairs so the output never depends on the
/// ordering behaviour of any map type. Sequences keep their original order.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalValue {
    Leaf(Value),
    Seq(Vec<CanonicalValue>),
    Map(Vec<(String, CanonicalValue)>),
}

impl CanonicalValue {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<(String, CanonicalValue)> = map
                    .into_iter()
                    .map(|(key, val)| (key, CanonicalValue::from_value(val)))
                    .collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                CanonicalValue::Map(entries)
            }
            Value::Array(items) => {
                CanonicalValue::Seq(items.into_iter().map(CanonicalValue::from_value).collect())
            }
            leaf => CanonicalValue::Leaf(leaf),
        }
    }
}

impl Serialize for CanonicalValue {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            CanonicalValue::Leaf(value) => value.serialize(serializer),
            CanonicalValue::Seq(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            CanonicalValue::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, val) in entries {
                    map.serialize_entry(key, val)?;
                }
                map.end()
            }
        }
    }
}
