//! Last-known-good snapshots of remote reads.
//!
//! Entries are advisory: any successful remote read overwrites them and an
//! expired entry is treated as absent.

use std::{future::Future, sync::Arc};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    clock::Clock,
    models::Profile,
    store::{DurableStore, CACHE_PREFIX},
};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "fastnow_sync::cache";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry<T> {
    data: T,
    cached_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Only the timestamps, for sweeping entries without knowing their type.
#[derive(Deserialize)]
struct CacheHeader {
    expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SnapshotCache {
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    request_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SnapshotCache {
    pub fn new(store: Arc<dyn DurableStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            request_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn full_key(key: &str) -> String {
        format!("{CACHE_PREFIX}{key}")
    }

    pub async fn put<T: Serialize>(&self, key: &str, data: &T, ttl: Duration) -> Result<()> {
        let now = self.clock.now();
        let entry = CacheEntry {
            data,
            cached_at: now,
            expires_at: now + ttl,
        };
        let serialized = serde_json::to_string(&entry)?;
        self.store.write(&Self::full_key(key), serialized).await
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let full_key = Self::full_key(key);
        let Some(raw) = self.store.read(&full_key).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<CacheEntry<T>>(&raw) {
            Ok(entry) if entry.expires_at > self.clock.now() => Ok(Some(entry.data)),
            Ok(_) => {
                crate::log_debug!("Cache entry {full_key} expired");
                self.store.delete(&full_key).await?;
                Ok(None)
            }
            Err(err) => {
                crate::log_warn!("Dropping undecodable cache entry {full_key}: {err}");
                self.store.delete(&full_key).await?;
                Ok(None)
            }
        }
    }

    pub async fn cache_profile(&self, profile: &Profile, ttl_hours: i64) -> Result<()> {
        self.put(
            &format!("profile.{}", profile.user_id),
            profile,
            Duration::hours(ttl_hours),
        )
        .await
    }

    pub async fn cached_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        self.get(&format!("profile.{user_id}")).await
    }

    /// Answer a repeated read from a short-lived `request.*` entry instead of
    /// calling `fetch` again. Deduplicated reads run one at a time, so a caller
    /// arriving while the first fetch is in flight gets its result.
    pub async fn deduplicate<T, E, F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _in_flight = self.request_lock.lock().await;
        let request_key = format!("request.{key}");
        match self.get::<T>(&request_key).await {
            Ok(Some(hit)) => {
                crate::log_debug!("Served {key} from the request cache");
                return Ok(hit);
            }
            Ok(None) => {}
            Err(err) => crate::log_warn!("Request cache unreadable for {key}: {err:#}"),
        }

        let fresh = fetch().await?;
        if let Err(err) = self.put(&request_key, &fresh, ttl).await {
            crate::log_warn!("Could not remember {key} response: {err:#}");
        }
        Ok(fresh)
    }

    /// Remove every expired or unreadable entry; returns how many were removed.
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut removed = 0;
        for key in self.store.keys(CACHE_PREFIX).await? {
            let Some(raw) = self.store.read(&key).await? else {
                continue;
            };
            let stale = match serde_json::from_str::<CacheHeader>(&raw) {
                Ok(header) => header.expires_at <= now,
                Err(_) => true,
            };
            if stale {
                self.store.delete(&key).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            crate::log_info!("Removed {removed} expired cache entries");
        }
        Ok(removed)
    }

    pub async fn clear(&self) -> Result<usize> {
        self.store.delete_prefix(CACHE_PREFIX).await
    }
}
