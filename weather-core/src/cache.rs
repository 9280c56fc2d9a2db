//! Cache-aside storage for resolved weather records.
//!
//! Backends store the serialized record and own the expiry. A read always
//! deserializes a fresh copy, so callers can never alias a cached entry.

use std::{
    collections::HashMap,
    fmt::Debug,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use redis::{Client, aio::ConnectionManager};
use tokio::sync::RwLock;

use crate::{error::CacheError, model::WeatherRecord};

#[async_trait]
pub trait WeatherCache: Send + Sync + Debug {
    /// `Ok(None)` is a clean miss; `Err` is reserved for backend faults.
    /// Hits come back with `cached` forced to `true`.
    async fn get(&self, city: &str) -> Result<Option<WeatherRecord>, CacheError>;

    /// Store `record` under `city` for the backend's configured TTL.
    async fn set(&self, city: &str, record: &WeatherRecord) -> Result<(), CacheError>;
}

fn decode_hit(payload: &str) -> Result<WeatherRecord, CacheError> {
    let mut record: WeatherRecord = serde_json::from_str(payload)?;
    record.cached = true;
    Ok(record)
}

/// Redis-backed cache. Expiry is delegated to Redis via `SET .. EX`.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    ttl: Duration,
}

impl Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl RedisCache {
    const KEY_PREFIX: &'static str = "weather:";

    /// Connect to `url` and verify the server answers `PING`.
    pub async fn connect(url: &str, ttl: Duration) -> Result<Self, CacheError> {
        let client = Client::open(url)?;
        let mut conn = ConnectionManager::new(client).await?;

        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        tracing::info!(ttl_secs = ttl.as_secs(), "connected to redis cache");

        Ok(Self { conn, ttl })
    }

    fn key(city: &str) -> String {
        format!("{}{city}", Self::KEY_PREFIX)
    }
}

#[async_trait]
impl WeatherCache for RedisCache {
    async fn get(&self, city: &str) -> Result<Option<WeatherRecord>, CacheError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> =
            redis::cmd("GET").arg(Self::key(city)).query_async(&mut conn).await?;

        payload.as_deref().map(decode_hit).transpose()
    }

    async fn set(&self, city: &str, record: &WeatherRecord) -> Result<(), CacheError> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();

        redis::cmd("SET")
            .arg(Self::key(city))
            .arg(payload)
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await?;

        Ok(())
    }
}

#[derive(Debug)]
struct MemoryEntry {
    payload: String,
    expires_at: Instant,
}

/// Process-local cache. Expired entries are dropped on read and swept on
/// every write, so keys that are never read again do not accumulate.
#[derive(Debug)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    ttl: Duration,
}

impl InMemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: RwLock::new(HashMap::new()), ttl }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl WeatherCache for InMemoryCache {
    async fn get(&self, city: &str) -> Result<Option<WeatherRecord>, CacheError> {
        {
            let entries = self.entries.read().await;
            match entries.get(city) {
                None => return Ok(None),
                Some(entry) if entry.expires_at > Instant::now() => {
                    return decode_hit(&entry.payload).map(Some);
                }
                Some(_) => {}
            }
        }

        // Expired: drop it unless a concurrent writer refreshed it meanwhile.
        let mut entries = self.entries.write().await;
        if entries.get(city).is_some_and(|e| e.expires_at <= Instant::now()) {
            entries.remove(city);
        }
        Ok(None)
    }

    async fn set(&self, city: &str, record: &WeatherRecord) -> Result<(), CacheError> {
        let payload = serde_json::to_string(record)?;
        let now = Instant::now();
        let entry = MemoryEntry { payload, expires_at: now + self.ttl };

        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(city.to_string(), entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WeatherRecord {
        WeatherRecord::observed_now("Jakarta", 30.25, 80, "scattered clouds", "weatherapi")
    }

    #[tokio::test]
    async fn miss_on_empty_cache() {
        let cache = InMemoryCache::new(Duration::from_secs(60));
        assert!(cache.get("Jakarta").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_then_get_returns_cached_copy() {
        let cache = InMemoryCache::new(Duration::from_secs(60));
        let original = sample();

        cache.set("Jakarta", &original).await.unwrap();
        let hit = cache.get("Jakarta").await.unwrap().expect("entry should be present");

        assert!(hit.cached);
        assert_eq!(WeatherRecord { cached: false, ..hit }, original);
    }

    #[tokio::test]
    async fn mutating_a_hit_does_not_touch_the_entry() {
        let cache = InMemoryCache::new(Duration::from_secs(60));
        cache.set("Jakarta", &sample()).await.unwrap();

        let mut first = cache.get("Jakarta").await.unwrap().unwrap();
        first.condition = "tampered".into();

        let second = cache.get("Jakarta").await.unwrap().unwrap();
        assert_eq!(second.condition, "scattered clouds");
    }

    #[tokio::test]
    async fn expired_entries_are_misses_and_pruned() {
        let cache = InMemoryCache::new(Duration::from_millis(10));
        cache.set("Jakarta", &sample()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(cache.get("Jakarta").await.unwrap().is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn writes_sweep_expired_entries_never_read_again() {
        let cache = InMemoryCache::new(Duration::from_millis(500));
        for i in 0..1000 {
            cache.set(&format!("city-{i}"), &sample()).await.unwrap();
        }
        assert_eq!(cache.len().await, 1000);

        tokio::time::sleep(Duration::from_millis(600)).await;
        cache.set("fresh", &sample()).await.unwrap();

        assert_eq!(cache.len().await, 1);
        assert!(cache.get("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn keys_are_exact() {
        let cache = InMemoryCache::new(Duration::from_secs(60));
        cache.set("Jakarta", &sample()).await.unwrap();

        assert!(cache.get("Bandung").await.unwrap().is_none());
        assert_eq!(cache.len().await, 1);
    }

    #[test]
    fn redis_keys_are_namespaced() {
        assert_eq!(RedisCache::key("Jakarta"), "weather:Jakarta");
    }

    #[test]
    fn corrupt_payload_is_a_serialization_error() {
        let err = decode_hit("{not json").unwrap_err();
        assert!(matches!(err, CacheError::Serialization(_)));
    }
}
