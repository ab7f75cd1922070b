//! Explicit RPC client cache.
//!
//! Owned by the caller and passed in; nothing here is global. Clients are
//! keyed by endpoint plus a fingerprint of the options used to build them, so
//! two callers asking for the same endpoint with different timeouts get
//! different clients.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::client::RpcClient;
use crate::error::RpcError;
use crate::http::{HttpRpcClient, DEFAULT_REQUEST_TIMEOUT};

/// Options that shape a client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub request_timeout: Duration,
    pub headers: BTreeMap<String, String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            headers: BTreeMap::new(),
        }
    }
}

impl ClientOptions {
    /// Stable string identifying these options. Header values are not
    /// included verbatim since they often carry API keys.
    pub fn fingerprint(&self) -> String {
        let header_names: Vec<&str> = self.headers.keys().map(String::as_str).collect();
        let mut hasher = Sha256::new();
        for (name, value) in &self.headers {
            hasher.update(name.as_bytes());
            hasher.update([0]);
            hasher.update(value.as_bytes());
            hasher.update([0]);
        }
        let digest = hex::encode(&hasher.finalize()[..8]);
        format!(
            "timeout_ms={};headers={};h={digest}",
            self.request_timeout.as_millis(),
            header_names.join(",")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    endpoint: String,
    fingerprint: String,
}

#[derive(Default)]
pub struct ClientCache {
    clients: DashMap<CacheKey, Arc<dyn RpcClient>>,
}

impl ClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached client for `endpoint` and `options`, building an
    /// HTTP client on first use.
    pub fn get_or_connect(
        &self,
        endpoint: &str,
        options: &ClientOptions,
    ) -> Result<Arc<dyn RpcClient>, RpcError> {
        let key = CacheKey {
            endpoint: endpoint.to_string(),
            fingerprint: options.fingerprint(),
        };
        let entry = self.clients.entry(key).or_try_insert_with(|| {
            debug!(endpoint, "creating rpc client");
            HttpRpcClient::with_options(endpoint, options.request_timeout, &options.headers)
                .map(|client| Arc::new(client) as Arc<dyn RpcClient>)
        })?;
        Ok(Arc::clone(entry.value()))
    }

    /// Drop every client for `endpoint`, whatever its options. Returns how
    /// many were removed.
    pub fn evict(&self, endpoint: &str) -> usize {
        let mut removed = 0;
        self.clients.retain(|key, _| {
            let keep = key.endpoint != endpoint;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_options_share_a_client() {
        let cache = ClientCache::new();
        let options = ClientOptions::default();
        let a = cache.get_or_connect("http://127.0.0.1:8899", &options).unwrap();
        let b = cache.get_or_connect("http://127.0.0.1:8899", &options).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn different_options_get_separate_clients() {
        let cache = ClientCache::new();
        let fast = ClientOptions {
            request_timeout: Duration::from_secs(2),
            ..ClientOptions::default()
        };
        let a = cache.get_or_connect("http://127.0.0.1:8899", &ClientOptions::default()).unwrap();
        let b = cache.get_or_connect("http://127.0.0.1:8899", &fast).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn fingerprint_hides_header_values() {
        let mut options = ClientOptions::default();
        options.headers.insert("x-api-key".into(), "super-secret".into());
        let fp = options.fingerprint();
        assert!(fp.contains("x-api-key"));
        assert!(!fp.contains("super-secret"));
    }

    #[test]
    fn evict_removes_all_variants() {
        let cache = ClientCache::new();
        let fast = ClientOptions {
            request_timeout: Duration::from_secs(2),
            ..ClientOptions::default()
        };
        cache.get_or_connect("http://127.0.0.1:8899", &ClientOptions::default()).unwrap();
        cache.get_or_connect("http://127.0.0.1:8899", &fast).unwrap();
        cache.get_or_connect("http://127.0.0.1:9999", &fast).unwrap();

        assert_eq!(cache.evict("http://127.0.0.1:8899"), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.evict("http://127.0.0.1:8899"), 0);
    }

    #[test]
    fn evict_counts_only_its_own_removals_under_concurrent_inserts() {
        let cache = Arc::new(ClientCache::new());
        let options = ClientOptions::default();
        cache.get_or_connect("http://127.0.0.1:8899", &options).unwrap();

        let writer = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for port in 9000..9064 {
                    let endpoint = format!("http://127.0.0.1:{port}");
                    cache.get_or_connect(&endpoint, &ClientOptions::default()).unwrap();
                }
            })
        };
        let removed = cache.evict("http://127.0.0.1:8899");
        writer.join().unwrap();

        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 64);
    }
}
