use std::sync::Arc;

use tracing::instrument;

use crate::api::RelayError;
use crate::redis::Client;

/// Insert-if-absent facade over the shared cache namespace.
///
/// First writer wins: exactly one caller per fingerprint observes `true`,
/// every later caller gets `false` and the stored value is never
/// overwritten. Atomicity is delegated to redis HSETNX, so the guarantee
/// holds across concurrent batches and processes sharing the namespace.
#[derive(Clone)]
pub struct DedupStore {
    redis: Arc<dyn Client + Send + Sync>,
    namespace: String,
}

impl DedupStore {
    pub fn new(redis: Arc<dyn Client + Send + Sync>, namespace: String) -> DedupStore {
        DedupStore { redis, namespace }
    }

    /// Returns true exactly once per fingerprint: on the call that created
    /// the entry. Transport faults surface as errors, never as "duplicate".
    #[instrument(skip_all, fields(fingerprint = fingerprint))]
    pub async fn insert_if_absent(
        &self,
        fingerprint: &str,
        record_json: &str,
    ) -> Result<bool, RelayError> {
        self.redis
            .hsetnx(
                self.namespace.clone(),
                fingerprint.to_string(),
                record_json.to_string(),
            )
            .await
            .map_err(|e| RelayError::StoreError(e.to_string()))
    }
}
