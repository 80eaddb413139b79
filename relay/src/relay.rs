use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use bytes::Bytes;
use metrics::{counter, histogram};
use tracing::instrument;

use crate::api::{RelayError, RelayResponse, RelayResponseCode};
use crate::dedup::DedupStore;
use crate::fingerprint::{fingerprint, value_to_string, KeyPath};
use crate::prometheus::report_dropped_records;
use crate::record::{normalize_nulls, BatchQuery, Record, RecordBatch, StreamRecord};
use crate::router;
use crate::sinks::{OutboundMessage, QueueSink};

/// Per-process dispatch settings, resolved from configuration at startup.
#[derive(Clone, Default)]
pub struct DispatchContext {
    pub key_path: Option<KeyPath>,
    pub group_field: Option<String>,
}

#[instrument(skip_all, fields(batch_size))]
pub async fn batch(
    state: State<router::State>,
    meta: Query<BatchQuery>,
    body: Bytes,
) -> Result<Json<RelayResponse>, RelayError> {
    let batch = RecordBatch::from_bytes(&meta, body)?;

    tracing::Span::current().record("batch_size", batch.records.len());

    if batch.records.is_empty() {
        return Err(RelayError::EmptyBatch);
    }

    counter!("relay_records_received_total").increment(batch.records.len() as u64);
    histogram!("relay_record_batch_size").record(batch.records.len() as f64);

    process_batch(
        state.sink.clone(),
        state.dedup.clone(),
        &state.context,
        &batch.records,
    )
    .await;

    Ok(Json(RelayResponse {
        status: RelayResponseCode::Ok,
    }))
}

/// Walk the batch in order. Records are independent: a failure to decode,
/// fingerprint, check or submit one record is logged and counted, and
/// processing moves on to the next.
#[instrument(skip_all, fields(records = records.len()))]
pub async fn process_batch(
    sink: Arc<dyn QueueSink + Send + Sync>,
    dedup: Option<DedupStore>,
    context: &DispatchContext,
    records: &[StreamRecord],
) {
    for record in records {
        if let Err(err) = process_record(sink.as_ref(), dedup.as_ref(), context, record).await {
            tracing::warn!("record dropped: {}", err);
        }
    }
}

/// Decode one stream record and decide its fate: first-seen records are
/// forwarded, known fingerprints are suppressed, and with no cache
/// configured every record goes out.
async fn process_record(
    sink: &(dyn QueueSink + Send + Sync),
    dedup: Option<&DedupStore>,
    context: &DispatchContext,
    record: &StreamRecord,
) -> Result<(), RelayError> {
    let decoded = record.decode().map_err(|e| {
        report_dropped_records("decode_error", 1);
        e
    })?;

    let Some(store) = dedup else {
        // No cache configured: forward unconditionally.
        return sink.send(outbound(&decoded, &record.data, context)?).await;
    };

    // The cache cannot represent nulls; hash and store a normalized copy.
    let normalized = normalize_nulls(&decoded);
    let message = outbound(&normalized, &record.data, context)?;

    let fingerprint = match fingerprint(context.key_path.as_ref(), &normalized) {
        Ok(fingerprint) => fingerprint,
        Err(err) => {
            // A fingerprint fault forwards the record un-deduplicated
            // rather than dropping it.
            tracing::error!("fingerprinting failed, forwarding without dedup: {}", err);
            counter!("relay_fingerprint_errors_total").increment(1);
            return sink.send(message).await;
        }
    };

    match store.insert_if_absent(&fingerprint, &message.body).await {
        Ok(true) => {
            tracing::debug!(fingerprint = %fingerprint, "new record admitted");
            sink.send(message).await
        }
        Ok(false) => {
            tracing::debug!(fingerprint = %fingerprint, "duplicate record suppressed");
            counter!("relay_records_duplicate_total").increment(1);
            Ok(())
        }
        Err(err) => {
            report_dropped_records("store_error", 1);
            Err(err)
        }
    }
}

/// Build the outbound message for a record. The deduplication token is the
/// raw wire string; the group id is the configured field's value when the
/// record carries it, else the token itself.
fn outbound(
    record: &Record,
    wire_data: &str,
    context: &DispatchContext,
) -> Result<OutboundMessage, RelayError> {
    let body = serde_json::to_string(record).map_err(|e| {
        tracing::error!("failed to serialize record: {}", e);
        RelayError::NonRetryableSinkError
    })?;

    let group_id = context
        .group_field
        .as_deref()
        .and_then(|field| record.get(field))
        .map(value_to_string)
        .unwrap_or_else(|| wire_data.to_string());

    Ok(OutboundMessage {
        body,
        deduplication_token: wire_data.to_string(),
        group_id,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use base64::Engine;
    use serde_json::{json, Value};

    use crate::dedup::DedupStore;
    use crate::fingerprint::KeyPath;
    use crate::record::StreamRecord;
    use crate::redis::MockRedisClient;
    use crate::sinks::MemorySink;

    use super::{process_batch, DispatchContext};

    fn wire(value: Value) -> StreamRecord {
        StreamRecord {
            data: base64::engine::general_purpose::STANDARD.encode(value.to_string()),
        }
    }

    fn store(redis: Arc<MockRedisClient>) -> DedupStore {
        DedupStore::new(redis, "records".to_string())
    }

    #[tokio::test]
    async fn no_cache_forwards_identical_records_twice() {
        let sink = MemorySink::new();
        let records = vec![wire(json!({"a": 1})), wire(json!({"a": 1}))];

        process_batch(
            Arc::new(sink.clone()),
            None,
            &DispatchContext::default(),
            &records,
        )
        .await;

        assert_eq!(sink.messages().len(), 2);
    }

    #[tokio::test]
    async fn cache_suppresses_repeats_across_batches() {
        let sink = MemorySink::new();
        let redis = Arc::new(MockRedisClient::new());
        let record = json!({"id": "a1", "status": "active"});

        process_batch(
            Arc::new(sink.clone()),
            Some(store(redis.clone())),
            &DispatchContext::default(),
            &[wire(record.clone())],
        )
        .await;
        process_batch(
            Arc::new(sink.clone()),
            Some(store(redis)),
            &DispatchContext::default(),
            &[wire(record)],
        )
        .await;

        assert_eq!(sink.messages().len(), 1);
    }

    #[tokio::test]
    async fn cache_body_normalizes_nulls_no_cache_body_keeps_them() {
        let record = json!({"id": "a1", "status": null});

        let cached = MemorySink::new();
        process_batch(
            Arc::new(cached.clone()),
            Some(store(Arc::new(MockRedisClient::new()))),
            &DispatchContext::default(),
            &[wire(record.clone())],
        )
        .await;

        let plain = MemorySink::new();
        process_batch(
            Arc::new(plain.clone()),
            None,
            &DispatchContext::default(),
            &[wire(record)],
        )
        .await;

        let cached_body: Value = serde_json::from_str(&cached.messages()[0].body).unwrap();
        let plain_body: Value = serde_json::from_str(&plain.messages()[0].body).unwrap();
        assert_eq!(cached_body["status"], json!(""));
        assert_eq!(plain_body["status"], Value::Null);
    }

    #[tokio::test]
    async fn stored_cache_value_matches_forwarded_body() {
        let sink = MemorySink::new();
        let redis = Arc::new(MockRedisClient::new());
        let records = vec![wire(json!({"id": "a1", "status": null}))];

        process_batch(
            Arc::new(sink.clone()),
            Some(store(redis.clone())),
            &DispatchContext::default(),
            &records,
        )
        .await;

        let fingerprint = crate::fingerprint::fingerprint(
            None,
            &serde_json::from_str(&sink.messages()[0].body).unwrap(),
        )
        .unwrap();
        assert_eq!(
            redis.stored("records", &fingerprint),
            Some(sink.messages()[0].body.clone())
        );
    }

    #[tokio::test]
    async fn undecodable_record_skipped_rest_of_batch_continues() {
        let sink = MemorySink::new();
        let records = vec![
            StreamRecord {
                data: String::from("!!not-base64!!"),
            },
            wire(json!({"a": 1})),
        ];

        process_batch(
            Arc::new(sink.clone()),
            None,
            &DispatchContext::default(),
            &records,
        )
        .await;

        assert_eq!(sink.messages().len(), 1);
    }

    #[tokio::test]
    async fn store_fault_drops_record_without_forwarding() {
        let sink = MemorySink::new();
        let records = vec![wire(json!({"a": 1}))];

        process_batch(
            Arc::new(sink.clone()),
            Some(store(Arc::new(MockRedisClient::new().broken()))),
            &DispatchContext::default(),
            &records,
        )
        .await;

        assert!(sink.messages().is_empty());
    }

    #[tokio::test]
    async fn queue_fault_does_not_abort_the_batch() {
        let sink = MemorySink::new().failing();
        let records = vec![wire(json!({"a": 1})), wire(json!({"b": 2}))];

        process_batch(
            Arc::new(sink.clone()),
            None,
            &DispatchContext::default(),
            &records,
        )
        .await;

        assert!(sink.messages().is_empty());
    }

    #[tokio::test]
    async fn dedup_token_is_the_raw_wire_string() {
        let sink = MemorySink::new();
        let record = wire(json!({"a": 1}));
        let token = record.data.clone();

        process_batch(
            Arc::new(sink.clone()),
            None,
            &DispatchContext::default(),
            &[record],
        )
        .await;

        let messages = sink.messages();
        assert_eq!(messages[0].deduplication_token, token);
        // no group field configured: the token doubles as the group id
        assert_eq!(messages[0].group_id, token);
    }

    #[tokio::test]
    async fn group_id_uses_configured_field_when_present() {
        let sink = MemorySink::new();
        let context = DispatchContext {
            key_path: None,
            group_field: Some(String::from("tenant")),
        };
        let records = vec![
            wire(json!({"tenant": "acme", "a": 1})),
            wire(json!({"a": 2})),
        ];
        let fallback = records[1].data.clone();

        process_batch(Arc::new(sink.clone()), None, &context, &records).await;

        let messages = sink.messages();
        assert_eq!(messages[0].group_id, "acme");
        assert_eq!(messages[1].group_id, fallback);
    }

    #[tokio::test]
    async fn keyed_dedup_collapses_records_sharing_the_key() {
        let sink = MemorySink::new();
        let redis = Arc::new(MockRedisClient::new());
        let context = DispatchContext {
            key_path: Some(KeyPath::parse(r#"["user","id"]"#).unwrap()),
            group_field: None,
        };
        // same user, different payloads: one forward expected
        let records = vec![
            wire(json!({"user": {"id": "U1"}, "seq": 1})),
            wire(json!({"user": {"id": "U1"}, "seq": 2})),
            wire(json!({"user": {"id": "U2"}, "seq": 3})),
        ];

        process_batch(Arc::new(sink.clone()), Some(store(redis)), &context, &records).await;

        assert_eq!(sink.messages().len(), 2);
    }
}
