use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{CacheBackend, CacheConfig};
use crate::data_models::{AggregateSearchResult, SearchQuery};
use crate::error::{Result, SearchError};

pub const CACHE_NAMESPACE: &str = "search:";

/// Minimal Redis-like command surface the cache needs.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Keys matching a glob pattern (only `*` is special).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Remaining TTL in seconds. `-2` when the key is missing, `-1` when it
    /// has no expiry.
    async fn ttl(&self, key: &str) -> Result<i64>;

    async fn del(&self, key: &str) -> Result<bool>;
}

// =============================================================================
// In-process store
// =============================================================================

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process store. Expired entries stay in the map until they are read or
/// swept.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of physically stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Store an entry without expiry.
    pub fn set(&self, key: &str, value: String) {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: None,
            },
        );
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        match self.entries.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .filter(|entry| glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        let now = Instant::now();
        Ok(match self.entries.get(key) {
            None => -2,
            Some(entry) => match entry.expires_at {
                None => -1,
                Some(at) if at <= now => -2,
                Some(at) => at.duration_since(now).as_secs() as i64,
            },
        })
    }

    async fn del(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }
}

/// Glob match supporting `*` wildcards only.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return key.is_empty();
    };
    let Some(mut rest) = key.strip_prefix(first) else {
        return false;
    };
    let remaining: Vec<&str> = parts.collect();
    let Some((last, middle)) = remaining.split_last() else {
        // no wildcard at all
        return rest.is_empty();
    };
    for part in middle {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

// =============================================================================
// Managed REST store (Upstash Redis REST protocol)
// =============================================================================

#[derive(Debug, Deserialize)]
struct RestReply {
    result: Option<Value>,
    error: Option<String>,
}

/// Redis over HTTPS: each command is POSTed as a JSON array and answered with
/// `{"result": ...}` or `{"error": "..."}`.
#[derive(Debug, Clone)]
pub struct UpstashStore {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl UpstashStore {
    pub fn new(client: reqwest::Client, url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    async fn command(&self, args: &[&str]) -> Result<Value> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&args)
            .send()
            .await?;
        let status = response.status();
        let reply: RestReply = response
            .json()
            .await
            .map_err(|e| SearchError::Cache(format!("unreadable reply (status {status}): {e}")))?;
        if let Some(error) = reply.error {
            return Err(SearchError::Cache(format!("{} failed: {error}", args[0])));
        }
        Ok(reply.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl KvStore for UpstashStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.command(&["GET", key]).await? {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            other => Ok(Some(other.to_string())),
        }
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let secs = ttl.as_secs().max(1).to_string();
        self.command(&["SET", key, value.as_str(), "EX", secs.as_str()]).await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        match self.command(&["KEYS", pattern]).await? {
            Value::Array(items) => Ok(items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()),
            Value::Null => Ok(Vec::new()),
            other => Err(SearchError::Cache(format!("unexpected KEYS reply: {other}"))),
        }
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        self.command(&["TTL", key])
            .await?
            .as_i64()
            .ok_or_else(|| SearchError::Cache("TTL reply is not an integer".into()))
    }

    async fn del(&self, key: &str) -> Result<bool> {
        Ok(self.command(&["DEL", key]).await?.as_i64().unwrap_or(0) > 0)
    }
}

// =============================================================================
// Local Redis server (RESP protocol)
// =============================================================================

/// Redis over its native protocol. The connection is opened on first use and
/// shared afterwards; the manager reconnects on its own after a failure.
pub struct RedisStore {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
}

impl RedisStore {
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| SearchError::Config(format!("invalid redis url {url:?}: {e}")))?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                tracing::info!("connecting to redis");
                ConnectionManager::new(self.client.clone())
                    .await
                    .map_err(redis_error)
            })
            .await?;
        Ok(manager.clone())
    }
}

fn redis_error(e: redis::RedisError) -> SearchError {
    SearchError::Cache(format!("redis: {e}"))
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(key).await.map_err(redis_error)?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await
            .map_err(redis_error)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        let keys: Vec<String> = conn.keys(pattern).await.map_err(redis_error)?;
        Ok(keys)
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        let mut conn = self.connection().await?;
        let ttl: i64 = conn.ttl(key).await.map_err(redis_error)?;
        Ok(ttl)
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let removed: i64 = conn.del(key).await.map_err(redis_error)?;
        Ok(removed > 0)
    }
}

// =============================================================================
// Search cache
// =============================================================================

pub struct SearchCache {
    store: Option<Arc<dyn KvStore>>,
    ttl: Duration,
}

impl SearchCache {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self {
            store: Some(store),
            ttl,
        }
    }

    /// A cache that never hits and never stores.
    pub fn disabled() -> Self {
        Self {
            store: None,
            ttl: Duration::ZERO,
        }
    }

    pub fn from_config(config: &CacheConfig, client: reqwest::Client) -> Result<Self> {
        Ok(match &config.backend {
            CacheBackend::Disabled => Self::disabled(),
            CacheBackend::Memory => Self::new(Arc::new(MemoryStore::new()), config.ttl),
            CacheBackend::Redis { url } => Self::new(Arc::new(RedisStore::new(url)?), config.ttl),
            CacheBackend::Upstash { url, token } => Self::new(
                Arc::new(UpstashStore::new(client, url.clone(), token.clone())),
                config.ttl,
            ),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Deterministic key for a query. Domain lists are sorted and
    /// deduplicated so their order never splits the cache.
    pub fn key(query: &SearchQuery) -> String {
        format!(
            "{CACHE_NAMESPACE}{}:{}:{}:{}:{}",
            query.query(),
            query.max_results(),
            query.search_depth(),
            sorted_join(query.include_domains()),
            sorted_join(query.exclude_domains()),
        )
    }

    pub async fn get(&self, key: &str) -> Option<AggregateSearchResult> {
        let store = self.store.as_ref()?;
        let raw = match store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::debug!(key, "cache miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "cache read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(result) => {
                tracing::debug!(key, "cache hit");
                Some(result)
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "cached value is not a search result");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &AggregateSearchResult) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to serialize search result");
                return;
            }
        };
        match store.set_ex(key, serialized, self.ttl).await {
            Ok(()) => tracing::debug!(key, ttl_secs = self.ttl.as_secs(), "cached search result"),
            Err(e) => tracing::warn!(key, error = %e, "cache write failed"),
        }
    }

    /// Delete every namespaced key whose remaining TTL is not positive.
    /// Returns the number of removed entries.
    pub async fn sweep(&self) -> usize {
        let Some(store) = self.store.as_ref() else {
            return 0;
        };
        let pattern = format!("{CACHE_NAMESPACE}*");
        let keys = match store.keys(&pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, "cache sweep could not list keys");
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys {
            match store.ttl(&key).await {
                Ok(ttl) if ttl <= 0 => match store.del(&key).await {
                    Ok(true) => {
                        tracing::debug!(key, "removed expired cache entry");
                        removed += 1;
                    }
                    Ok(false) => {}
                    Err(e) => tracing::warn!(key, error = %e, "cache sweep delete failed"),
                },
                Ok(_) => {}
                Err(e) => tracing::warn!(key, error = %e, "cache sweep TTL lookup failed"),
            }
        }
        if removed > 0 {
            tracing::info!(removed, "cache sweep finished");
        }
        removed
    }

    /// Run [`SearchCache::sweep`] every `interval` until `cancel` fires. The
    /// first sweep happens one full interval after start.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("cache sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                }
            }
        })
    }
}

fn sorted_join(domains: &[String]) -> String {
    let mut sorted: Vec<&str> = domains.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_models::SearchDepth;

    fn query(include: &[&str], exclude: &[&str]) -> SearchQuery {
        SearchQuery::new(
            "climate policy",
            5,
            SearchDepth::Basic,
            include.iter().map(|s| s.to_string()).collect(),
            exclude.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_key_layout() {
        let key = SearchCache::key(&query(&["b.com", "a.com"], &["c.com"]));
        assert_eq!(key, "search:climate policy:5:basic:a.com,b.com:c.com");
    }

    #[test]
    fn test_key_ignores_domain_order() {
        let k1 = SearchCache::key(&query(&["a.com", "b.com"], &["x.com", "y.com"]));
        let k2 = SearchCache::key(&query(&["b.com", "a.com"], &["y.com", "x.com"]));
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_key_changes_with_every_parameter() {
        let base = SearchCache::key(&query(&[], &[]));
        assert_ne!(base, SearchCache::key(&query(&[], &["b.com"])));
        assert_ne!(base, SearchCache::key(&query(&["b.com"], &[])));

        let deeper = SearchQuery::new("climate policy", 5, SearchDepth::Advanced, vec![], vec![])
            .unwrap();
        assert_ne!(base, SearchCache::key(&deeper));
        let more = SearchQuery::new("climate policy", 6, SearchDepth::Basic, vec![], vec![])
            .unwrap();
        assert_ne!(base, SearchCache::key(&more));
        let other = SearchQuery::new("climate", 5, SearchDepth::Basic, vec![], vec![]).unwrap();
        assert_ne!(base, SearchCache::key(&other));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("search:*", "search:rust:5"));
        assert!(!glob_match("search:*", "other:rust"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a*c*e", "abcde"));
        assert!(!glob_match("a*c*e", "abcdf"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }

    #[tokio::test]
    async fn test_memory_store_expiry_is_lazy() {
        let store = MemoryStore::new();
        store
            .set_ex("search:a", "1".into(), Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(store.get("search:a").await.unwrap().as_deref(), Some("1"));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.ttl("search:a").await.unwrap(), -2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("search:a").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_ttl_semantics() {
        let store = MemoryStore::new();
        store.set("search:forever", "x".into());
        store
            .set_ex("search:hour", "x".into(), Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(store.ttl("search:missing").await.unwrap(), -2);
        assert_eq!(store.ttl("search:forever").await.unwrap(), -1);
        let ttl = store.ttl("search:hour").await.unwrap();
        assert!(ttl > 3500 && ttl <= 3600);
        assert!(store.del("search:hour").await.unwrap());
        assert!(!store.del("search:hour").await.unwrap());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired_namespaced_entries() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_ex("search:old", "{}".into(), Duration::from_millis(10))
            .await
            .unwrap();
        store
            .set_ex("search:fresh", "{}".into(), Duration::from_secs(600))
            .await
            .unwrap();
        store
            .set_ex("other:old", "{}".into(), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let cache = SearchCache::new(store.clone(), Duration::from_secs(60));
        assert_eq!(cache.sweep().await, 1);
        assert_eq!(store.len(), 2);
        assert!(store.get("search:fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_round_trip_through_cache() {
        let cache = SearchCache::new(Arc::new(MemoryStore::new()), Duration::from_secs(60));
        let value = AggregateSearchResult::new("rust".into(), vec![], vec!["https://img".into()]);
        cache.set("search:rust", &value).await;
        assert_eq!(cache.get("search:rust").await, Some(value));
    }

    #[tokio::test]
    async fn test_corrupt_entry_reads_as_miss() {
        let store = Arc::new(MemoryStore::new());
        store.set("search:bad", "not json".into());
        let cache = SearchCache::new(store, Duration::from_secs(60));
        assert!(cache.get("search:bad").await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_cache_never_hits() {
        let cache = SearchCache::disabled();
        let value = AggregateSearchResult::new("rust".into(), vec![], vec![]);
        cache.set("search:rust", &value).await;
        assert!(cache.get("search:rust").await.is_none());
        assert_eq!(cache.sweep().await, 0);
    }

    #[tokio::test]
    async fn test_upstash_rest_commands() {
        use serde_json::json;
        use wiremock::matchers::{body_json, header, method};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let replies = [
            (json!(["GET", "search:a"]), json!({"result": "cached"})),
            (json!(["GET", "search:none"]), json!({"result": null})),
            (json!(["SET", "search:b", "v", "EX", "60"]), json!({"result": "OK"})),
            (json!(["KEYS", "search:*"]), json!({"result": ["search:a", "search:b"]})),
            (json!(["TTL", "search:a"]), json!({"result": -2})),
            (json!(["DEL", "search:a"]), json!({"result": 1})),
            (json!(["GET", "search:bad"]), json!({"error": "WRONGTYPE"})),
        ];
        for (command, reply) in replies {
            Mock::given(method("POST"))
                .and(header("authorization", "Bearer secret"))
                .and(body_json(command))
                .respond_with(ResponseTemplate::new(200).set_body_json(reply))
                .mount(&server)
                .await;
        }

        let store = UpstashStore::new(reqwest::Client::new(), server.uri(), "secret");
        assert_eq!(store.get("search:a").await.unwrap().as_deref(), Some("cached"));
        assert_eq!(store.get("search:none").await.unwrap(), None);
        store
            .set_ex("search:b", "v".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            store.keys("search:*").await.unwrap(),
            vec!["search:a".to_string(), "search:b".to_string()]
        );
        assert_eq!(store.ttl("search:a").await.unwrap(), -2);
        assert!(store.del("search:a").await.unwrap());
        let err = store.get("search:bad").await.unwrap_err();
        assert!(err.to_string().contains("WRONGTYPE"));
    }

    #[test]
    fn test_redis_store_validates_url_without_connecting() {
        assert!(matches!(
            RedisStore::new("not a redis url"),
            Err(SearchError::Config(_))
        ));
        assert!(RedisStore::new("redis://127.0.0.1:1").is_ok());

        let config = CacheConfig {
            backend: CacheBackend::Redis {
                url: "redis://localhost:6379".into(),
            },
            ..CacheConfig::default()
        };
        let cache = SearchCache::from_config(&config, reqwest::Client::new()).unwrap();
        assert!(cache.is_enabled());
    }

    #[tokio::test]
    async fn test_sweeper_runs_until_cancelled() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_ex("search:old", "{}".into(), Duration::from_millis(1))
            .await
            .unwrap();
        let cache = Arc::new(SearchCache::new(store.clone(), Duration::from_secs(60)));
        let cancel = CancellationToken::new();
        let handle = cache.spawn_sweeper(Duration::from_millis(20), cancel.clone());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(store.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }
}
