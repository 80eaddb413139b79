use serde_json::{Map, Value};

use crate::api::RelayError;

/// Ordered list of field names locating the deduplication key inside a
/// record. Configured as a JSON array literal, e.g. `["user","id"]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    pub fn parse(raw: &str) -> anyhow::Result<KeyPath> {
        let fields: Vec<String> = serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("key path is not a JSON array of strings: {}", e))?;
        Ok(KeyPath(fields))
    }

    pub fn fields(&self) -> &[String] {
        &self.0
    }
}

/// String form of a JSON value: strings are used as-is, everything else
/// renders as compact JSON.
pub(crate) fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Walk the field names in order and return the string form of the deepest
/// value reached. Descent stops at the first absent field, or at a value
/// that cannot be descended into while names remain. A path that resolves
/// nothing yields the whole record's string form. Never an error.
pub fn extract_key(record: &Map<String, Value>, path: &KeyPath) -> String {
    let mut object = record;
    let mut reached: Option<&Value> = None;

    for (depth, field) in path.fields().iter().enumerate() {
        let Some(value) = object.get(field) else {
            break;
        };
        reached = Some(value);
        match value.as_object() {
            Some(next) => object = next,
            None => {
                if depth + 1 < path.fields().len() {
                    tracing::warn!(field = %field, "key path continues past a non-object value");
                }
                break;
            }
        }
    }

    match reached {
        Some(value) => value_to_string(value),
        None => canonical_json(record).unwrap_or_else(|e| {
            tracing::error!("failed to serialize record for key extraction: {}", e);
            String::new()
        }),
    }
}

/// Canonical serialization of a record. serde_json object maps are keyed
/// by a sorted map, so two records with the same fields serialize
/// identically regardless of insertion order, at every nesting level.
pub fn canonical_json(record: &Map<String, Value>) -> Result<String, RelayError> {
    serde_json::to_string(record).map_err(|e| RelayError::FingerprintError(e.to_string()))
}

/// Derive the deduplication fingerprint for a record: a 128-bit digest,
/// hex-encoded, over either the configured key's value or the record's
/// canonical form. This is a dedup hint, not a security boundary.
pub fn fingerprint(
    key_path: Option<&KeyPath>,
    record: &Map<String, Value>,
) -> Result<String, RelayError> {
    let input = match key_path {
        Some(path) => extract_key(record, path),
        None => canonical_json(record)?,
    };
    Ok(format!("{:x}", md5::compute(input.as_bytes())))
}
