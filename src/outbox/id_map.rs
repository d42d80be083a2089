use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{DurableStore, ID_MAPPINGS_KEY};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "fastnow_sync::outbox";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdMapping {
    pub local_id: String,
    pub server_id: String,
    pub created_at: DateTime<Utc>,
}

/// Translation table from provisional ids to the ids the server assigned.
///
/// Consulted before every remote call that targets an existing session, so a
/// queued operation keeps the id it was enqueued with.
pub struct IdMap {
    store: Arc<dyn DurableStore>,
    provisional_prefix: String,
    mappings: Mutex<HashMap<String, IdMapping>>,
    persist_lock: tokio::sync::Mutex<()>,
}

impl IdMap {
    pub async fn load(store: Arc<dyn DurableStore>, provisional_prefix: &str) -> Result<Self> {
        let mappings = match store.read(ID_MAPPINGS_KEY).await? {
            Some(raw) => serde_json::from_str::<Vec<IdMapping>>(&raw)
                .context("failed to decode id mappings")?
                .into_iter()
                .map(|mapping| (mapping.local_id.clone(), mapping))
                .collect(),
            None => HashMap::new(),
        };

        Ok(Self {
            store,
            provisional_prefix: provisional_prefix.to_string(),
            mappings: Mutex::new(mappings),
            persist_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, IdMapping>> {
        match self.mappings.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn is_provisional(&self, id: &str) -> bool {
        id.starts_with(&self.provisional_prefix)
    }

    /// Server id for a mapped provisional id, otherwise `id` unchanged.
    pub fn resolve(&self, id: &str) -> String {
        if !self.is_provisional(id) {
            return id.to_string();
        }
        self.lock()
            .get(id)
            .map(|mapping| mapping.server_id.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Record a mapping. It is kept in memory even if persisting fails.
    pub async fn record(&self, local_id: &str, server_id: &str, at: DateTime<Utc>) {
        self.lock().insert(
            local_id.to_string(),
            IdMapping {
                local_id: local_id.to_string(),
                server_id: server_id.to_string(),
                created_at: at,
            },
        );
        crate::log_info!("Mapped provisional id {local_id} -> {server_id}");

        if let Err(err) = self.persist().await {
            crate::log_warn!("Id mapping {local_id} held in memory only: {err:#}");
        }
    }

    /// Drop every mapping whose provisional id is not in `referenced`;
    /// returns how many were dropped.
    pub async fn retain_referenced(&self, referenced: &HashSet<String>) -> usize {
        let dropped = {
            let mut mappings = self.lock();
            let before = mappings.len();
            mappings.retain(|local_id, _| referenced.contains(local_id));
            before - mappings.len()
        };
        if dropped > 0 {
            crate::log_debug!("Pruned {dropped} settled id mappings");
            if let Err(err) = self.persist().await {
                crate::log_warn!("Pruned id mappings not persisted: {err:#}");
            }
        }
        dropped
    }

    pub async fn clear(&self) -> Result<()> {
        self.lock().clear();
        self.persist().await
    }

    async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let snapshot: Vec<IdMapping> = {
            let mut mappings: Vec<IdMapping> = self.lock().values().cloned().collect();
            mappings.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            mappings
        };
        let serialized = serde_json::to_string(&snapshot)?;
        self.store.write(ID_MAPPINGS_KEY, serialized).await
    }
}
