use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::time::timeout;

// dedup round-trips are single-digit millis in the common case
const REDIS_TIMEOUT_MILLISECS: u64 = 100;

/// A simple redis wrapper exposing the one command we use.
/// Allows for testing + injecting failures.

#[async_trait]
pub trait Client {
    async fn hsetnx(&self, k: String, field: String, v: String) -> Result<bool>;
}

pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub fn new(addr: String) -> Result<RedisClient> {
        let client = redis::Client::open(addr)?;

        Ok(RedisClient { client })
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn hsetnx(&self, k: String, field: String, v: String) -> Result<bool> {
        let mut conn = self.client.get_async_connection().await?;

        let results = conn.hset_nx(k, field, v);
        let fut = timeout(Duration::from_millis(REDIS_TIMEOUT_MILLISECS), results).await?;

        Ok(fut?)
    }
}

/// In-memory stand-in with real HSETNX semantics, plus failure injection.
/// mockall got awkward with async traits, a hand-rolled mock is simpler.
#[derive(Clone, Default)]
pub struct MockRedisClient {
    hashes: Arc<Mutex<HashMap<String, HashMap<String, String>>>>,
    broken: bool,
}

impl MockRedisClient {
    pub fn new() -> MockRedisClient {
        Self::default()
    }

    /// Every call fails with a transport error, as if the cluster was down.
    pub fn broken(mut self) -> Self {
        self.broken = true;
        self
    }

    pub fn stored(&self, k: &str, field: &str) -> Option<String> {
        self.lock_hashes().get(k).and_then(|h| h.get(field)).cloned()
    }

    fn lock_hashes(&self) -> MutexGuard<'_, HashMap<String, HashMap<String, String>>> {
        match self.hashes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl Client for MockRedisClient {
    async fn hsetnx(&self, k: String, field: String, v: String) -> Result<bool> {
        if self.broken {
            return Err(anyhow!("connection refused"));
        }

        let mut hashes = self.lock_hashes();
        match hashes.entry(k).or_default().entry(field) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(v);
                Ok(true)
            }
        }
    }
}
