/*
 * Namespaced TTL cache over Redis with a pluggable backend and cache-through metadata reads.
 * I'm keeping the cache strictly non-authoritative: every failure degrades to the metadata store with a warning, never to a user-visible error.
 */

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::database::meta_store::SharedMetaStore;
use crate::models::ImageRecord;
use crate::models::Verse;
use crate::utils::error::{AppError, Result};

/// Time-to-live per namespace
pub const METADATA_TTL_SECS: u64 = 3_600;
pub const VERSE_TTL_SECS: u64 = 3_600;
pub const DAILY_VERSE_TTL_SECS: u64 = 86_400;
pub const CONFIG_TTL_SECS: u64 = 604_800;

/// Raw string-level cache operations behind the service
/// I'm shaping this as a trait so tests run against the in-memory backend while production uses Redis
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;
    async fn set_raw(&self, key: &str, value: String, ttl_seconds: u64) -> Result<()>;
    async fn delete_raw(&self, key: &str) -> Result<bool>;
}

/// Redis-backed cache with automatic connection management
#[derive(Clone)]
pub struct RedisCache {
    client: redis::Client,
    connection: Arc<RwLock<Option<redis::aio::ConnectionManager>>>,
    op_timeout: Duration,
}

impl RedisCache {
    pub fn new(client: redis::Client, op_timeout: Duration) -> Self {
        Self {
            client,
            connection: Arc::new(RwLock::new(None)),
            op_timeout,
        }
    }

    /// Get a connection with automatic pool management
    async fn get_connection(&self) -> Result<redis::aio::ConnectionManager> {
        {
            let guard = self.connection.read().await;
            if let Some(manager) = guard.as_ref() {
                return Ok(manager.clone());
            }
        }

        let mut guard = self.connection.write().await;
        if let Some(manager) = guard.as_ref() {
            return Ok(manager.clone());
        }

        let manager = redis::aio::ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| {
                AppError::CacheError(format!("failed to create Redis connection manager: {}", e))
            })?;

        debug!("Created new Redis connection manager");
        *guard = Some(manager.clone());
        Ok(manager)
    }

    async fn bounded<F, T>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| AppError::CacheError("cache deadline exceeded".to_string()))?
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        self.bounded(async {
            let mut conn = self.get_connection().await?;
            let value: Option<String> = conn.get(key).await?;
            Ok(value)
        })
        .await
    }

    async fn set_raw(&self, key: &str, value: String, ttl_seconds: u64) -> Result<()> {
        self.bounded(async {
            let mut conn = self.get_connection().await?;
            conn.set_ex::<_, _, ()>(key, value, ttl_seconds)
                .await?;
            Ok(())
        })
        .await
    }

    async fn delete_raw(&self, key: &str) -> Result<bool> {
        self.bounded(async {
            let mut conn = self.get_connection().await?;
            let deleted: i32 = conn.del(key).await?;
            Ok(deleted > 0)
        })
        .await
    }
}

/// In-memory cache backend for the test-suite and local development
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Ok(Some(value.clone())),
            _ => Ok(None),
        }
    }

    async fn set_raw(&self, key: &str, value: String, ttl_seconds: u64) -> Result<()> {
        let expires_at = Instant::now() + Duration::from_secs(ttl_seconds);
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    async fn delete_raw(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }
}

/// Normalise a verse reference for use as a cache key (trim + lowercase)
pub fn normalize_verse_reference(reference: &str) -> String {
    reference.trim().to_lowercase()
}

/// Namespaced cache facade used by every component that touches derived data
/// MetaStore stays authoritative; everything here may be evicted at any time.
#[derive(Clone)]
pub struct CacheService {
    backend: Arc<dyn CacheBackend>,
    meta_store: SharedMetaStore,
    key_prefix: String,
}

impl CacheService {
    pub fn new(backend: Arc<dyn CacheBackend>, meta_store: SharedMetaStore) -> Self {
        Self {
            backend,
            meta_store,
            key_prefix: "verse_canvas:".to_string(),
        }
    }

    fn build_key(&self, namespace: &str, key: &str) -> String {
        format!("{}{}:{}", self.key_prefix, namespace, key)
    }

    /// Fetch and deserialize, degrading every failure to a miss
    async fn get_json<T: DeserializeOwned>(&self, full_key: &str) -> Option<T> {
        match self.backend.get_raw(full_key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    debug!("Cache HIT: {}", full_key);
                    Some(value)
                }
                Err(e) => {
                    warn!("Discarding corrupt cache entry {}: {}", full_key, e);
                    let _ = self.backend.delete_raw(full_key).await;
                    None
                }
            },
            Ok(None) => {
                debug!("Cache MISS: {}", full_key);
                None
            }
            Err(e) => {
                warn!("Cache read failed for {}: {}", full_key, e);
                None
            }
        }
    }

    /// Serialize and store, logging failures instead of surfacing them
    async fn set_json<T: Serialize>(&self, full_key: &str, value: &T, ttl_seconds: u64) {
        match serde_json::to_string(value) {
            Ok(raw) => {
                if let Err(e) = self.backend.set_raw(full_key, raw, ttl_seconds).await {
                    warn!("Cache write failed for {}: {}", full_key, e);
                }
            }
            Err(e) => warn!("Cache serialization failed for {}: {}", full_key, e),
        }
    }

    async fn delete(&self, full_key: &str) {
        if let Err(e) = self.backend.delete_raw(full_key).await {
            warn!("Cache delete failed for {}: {}", full_key, e);
        }
    }

    // ---- metadata namespace ----

    /// Cache-through metadata read: hit returns the cached row, miss falls
    /// back to the MetaStore and hydrates the cache.
    pub async fn get_metadata(&self, image_id: &str) -> Result<Option<ImageRecord>> {
        let full_key = self.build_key("metadata", image_id);

        if let Some(record) = self.get_json::<ImageRecord>(&full_key).await {
            return Ok(Some(record));
        }

        let record = self.meta_store.get_image(image_id).await?;
        if let Some(ref record) = record {
            self.set_json(&full_key, record, METADATA_TTL_SECS).await;
        }

        Ok(record)
    }

    /// Cache-only metadata read, used by the idempotency check where a miss
    /// must not consult the authoritative store.
    pub async fn peek_metadata(&self, image_id: &str) -> Option<ImageRecord> {
        let full_key = self.build_key("metadata", image_id);
        self.get_json(&full_key).await
    }

    pub async fn set_metadata(&self, record: &ImageRecord) {
        let full_key = self.build_key("metadata", &record.id);
        self.set_json(&full_key, record, METADATA_TTL_SECS).await;
    }

    pub async fn invalidate_metadata(&self, image_id: &str) {
        let full_key = self.build_key("metadata", image_id);
        self.delete(&full_key).await;
    }

    /// Drop every derived entry for an image
    pub async fn invalidate_image(&self, image_id: &str) {
        self.invalidate_metadata(image_id).await;

        if let Some(current) = self.get_daily_verse_image_id().await {
            if current == image_id {
                self.delete(&self.build_key("daily-verse", "current")).await;
            }
        }
    }

    // ---- verse namespace ----

    pub async fn get_verse(&self, reference: &str) -> Option<Verse> {
        let full_key = self.build_key("verse", &normalize_verse_reference(reference));
        self.get_json(&full_key).await
    }

    pub async fn set_verse(&self, reference: &str, verse: &Verse) {
        let full_key = self.build_key("verse", &normalize_verse_reference(reference));
        self.set_json(&full_key, verse, VERSE_TTL_SECS).await;
    }

    // ---- daily-verse namespace ----

    pub async fn get_daily_verse_image_id(&self) -> Option<String> {
        let full_key = self.build_key("daily-verse", "current");
        self.get_json(&full_key).await
    }

    pub async fn set_daily_verse_image_id(&self, image_id: &str) {
        let full_key = self.build_key("daily-verse", "current");
        self.set_json(&full_key, &image_id.to_string(), DAILY_VERSE_TTL_SECS)
            .await;
    }

    /// Set-then-get probe verifying the backend round-trips data
    pub async fn health_check(&self) -> bool {
        let probe_key = self.build_key("health", "probe");
        let probe_value = "ok".to_string();

        if self
            .backend
            .set_raw(&probe_key, probe_value.clone(), 10)
            .await
            .is_err()
        {
            return false;
        }

        matches!(
            self.backend.get_raw(&probe_key).await,
            Ok(Some(value)) if value == probe_value
        )
    }

    // ---- config namespace ----

    pub async fn get_config_value(&self, key: &str) -> Option<serde_json::Value> {
        let full_key = self.build_key("config", key);
        self.get_json(&full_key).await
    }

    pub async fn set_config_value(&self, key: &str, value: &serde_json::Value) {
        let full_key = self.build_key("config", key);
        self.set_json(&full_key, value, CONFIG_TTL_SECS).await;
    }

    pub async fn clear_config_value(&self, key: &str) {
        let full_key = self.build_key("config", key);
        self.delete(&full_key).await;
    }
}
