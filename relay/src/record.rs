use std::io::prelude::*;

use base64::Engine;
use bytes::{Buf, Bytes};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::RelayError;

/// A decoded record: the JSON object carried by one stream entry.
pub type Record = Map<String, Value>;

#[derive(Deserialize, Default)]
pub enum Compression {
    #[default]
    Unsupported,

    #[serde(rename = "gzip", alias = "gzip-js")]
    Gzip,
}

#[derive(Deserialize, Default)]
pub struct BatchQuery {
    pub compression: Option<Compression>,
}

/// One entry from the upstream stream: the record payload exactly as the
/// source delivered it, base64-encoded JSON. The encoded string doubles as
/// the outbound deduplication token, so it is kept verbatim.
#[derive(Debug, Deserialize, Serialize)]
pub struct StreamRecord {
    pub data: String,
}

#[derive(Deserialize, Serialize)]
pub struct RecordBatch {
    pub records: Vec<StreamRecord>,
}

impl RecordBatch {
    pub fn from_bytes(query: &BatchQuery, bytes: Bytes) -> Result<RecordBatch, RelayError> {
        tracing::debug!(len = bytes.len(), "decoding new batch");

        let payload = match query.compression {
            Some(Compression::Gzip) => {
                let mut d = GzDecoder::new(bytes.reader());
                let mut s = String::new();
                d.read_to_string(&mut s).map_err(|e| {
                    tracing::error!("failed to decode gzip: {}", e);
                    RelayError::RequestDecodingError(String::from("invalid gzip data"))
                })?;
                s
            }
            Some(_) => {
                return Err(RelayError::RequestDecodingError(String::from(
                    "unsupported compression format",
                )))
            }

            None => String::from_utf8(bytes.into()).map_err(|e| {
                tracing::error!("failed to decode body: {}", e);
                RelayError::RequestDecodingError(String::from("invalid body encoding"))
            })?,
        };
        Ok(serde_json::from_str::<RecordBatch>(&payload)?)
    }
}

impl StreamRecord {
    /// Decode the wire payload: base64 to bytes to a JSON object.
    pub fn decode(&self) -> Result<Record, RelayError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&self.data)
            .map_err(|e| RelayError::RecordDecodingError(format!("invalid base64: {}", e)))?;

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(record)) => Ok(record),
            Ok(_) => Err(RelayError::RecordDecodingError(String::from(
                "payload is not a JSON object",
            ))),
            Err(e) => Err(RelayError::RecordDecodingError(format!(
                "invalid JSON: {}",
                e
            ))),
        }
    }
}

/// The cache representation cannot store nulls. Returns a copy with
/// top-level null values replaced by empty strings; the original record
/// is left untouched for the no-cache forwarding path.
pub fn normalize_nulls(record: &Record) -> Record {
    record
        .iter()
        .map(|(k, v)| match v {
            Value::Null => (k.clone(), Value::String(String::new())),
            other => (k.clone(), other.clone()),
        })
        .collect()
}
