use std::net::SocketAddr;

use envconfig::Envconfig;

use crate::fingerprint::KeyPath;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(default = "127.0.0.1:3000")]
    pub address: SocketAddr,

    #[envconfig(from = "QUEUE_ENDPOINT")]
    pub queue_endpoint: String,

    #[envconfig(from = "QUEUE_IS_ORDERED", default = "true")]
    pub queue_is_ordered: bool,

    #[envconfig(from = "DEDUP_KEY_PATH", default = "")]
    pub dedup_key_path: String,

    #[envconfig(from = "DEDUP_CACHE_HASH_NAMESPACE", default = "records")]
    pub dedup_cache_hash_namespace: String,

    #[envconfig(from = "CACHE_HOST", default = "")]
    pub cache_host: String,

    #[envconfig(from = "GROUP_FIELD", default = "")]
    pub group_field: String,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,
}

impl Config {
    /// Parse and validate `DEDUP_KEY_PATH` once, at startup. Record
    /// processing never re-parses the configuration string.
    pub fn key_path(&self) -> anyhow::Result<Option<KeyPath>> {
        if self.dedup_key_path.is_empty() {
            return Ok(None);
        }
        Ok(Some(KeyPath::parse(&self.dedup_key_path)?))
    }

    /// Redis connection string when dedup is enabled, None otherwise.
    /// A bare hostname gets the default scheme and port.
    pub fn cache_url(&self) -> Option<String> {
        if self.cache_host.is_empty() {
            return None;
        }
        if self.cache_host.starts_with("redis://") || self.cache_host.starts_with("rediss://") {
            Some(self.cache_host.clone())
        } else {
            Some(format!("redis://{}:6379", self.cache_host))
        }
    }

    pub fn group_field(&self) -> Option<&str> {
        if self.group_field.is_empty() {
            None
        } else {
            Some(&self.group_field)
        }
    }
}
