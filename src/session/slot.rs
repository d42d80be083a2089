use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    models::{FastingSession, WalkingSession},
    store::DurableStore,
};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "fastnow_sync::session";

/// A record that can sit in an [`ActiveSlot`] and be re-keyed once the
/// server assigns its id.
pub trait SlotRecord: Clone + Serialize + DeserializeOwned + Send + Sync {
    fn record_id(&self) -> &str;

    fn set_record_id(&mut self, id: String);
}

impl SlotRecord for WalkingSession {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn set_record_id(&mut self, id: String) {
        self.id = id;
    }
}

impl SlotRecord for FastingSession {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn set_record_id(&mut self, id: String) {
        self.id = id;
    }
}

pub type ActiveSessionSlot = ActiveSlot<WalkingSession>;
pub type ActiveFastSlot = ActiveSlot<FastingSession>;

/// The current user's open record, mirrored to the durable store under `key`
/// so it can be shown after a restart without the server.
pub struct ActiveSlot<T> {
    store: Arc<dyn DurableStore>,
    key: &'static str,
    current: Mutex<Option<T>>,
    persist_lock: tokio::sync::Mutex<()>,
}

impl<T: SlotRecord> ActiveSlot<T> {
    pub async fn load(store: Arc<dyn DurableStore>, key: &'static str) -> Result<Self> {
        let current = match store.read(key).await? {
            Some(raw) => match serde_json::from_str::<T>(&raw) {
                Ok(record) => Some(record),
                Err(err) => {
                    crate::log_warn!("Discarding unreadable {key} snapshot: {err}");
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            store,
            key,
            current: Mutex::new(current),
            persist_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<T>> {
        match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn get(&self) -> Option<T> {
        self.lock().clone()
    }

    pub fn current_id(&self) -> Option<String> {
        self.lock().as_ref().map(|record| record.record_id().to_string())
    }

    /// Replace the snapshot. Returns false if only the in-memory copy changed.
    pub async fn set(&self, record: Option<T>) -> bool {
        *self.lock() = record;
        self.persist().await
    }

    /// Mutate whatever is currently held, so a concurrent re-key is not lost.
    pub async fn modify<F>(&self, mutate: F) -> bool
    where
        F: FnOnce(&mut Option<T>),
    {
        {
            let mut guard = self.lock();
            mutate(&mut *guard);
        }
        self.persist().await
    }

    /// Swap a provisional id for the server id if the held record still uses it.
    pub async fn reassign_id(&self, local_id: &str, server_id: &str) -> bool {
        let changed = {
            let mut guard = self.lock();
            match guard.as_mut() {
                Some(record) if record.record_id() == local_id => {
                    record.set_record_id(server_id.to_string());
                    true
                }
                _ => false,
            }
        };
        if changed {
            crate::log_debug!("{} re-keyed {local_id} -> {server_id}", self.key);
            self.persist().await;
        }
        changed
    }

    async fn persist(&self) -> bool {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.get();
        let result = match snapshot {
            Some(record) => match serde_json::to_string(&record) {
                Ok(serialized) => self.store.write(self.key, serialized).await,
                Err(err) => Err(err.into()),
            },
            None => self.store.delete(self.key).await,
        };

        match result {
            Ok(()) => true,
            Err(err) => {
                crate::log_warn!("{} snapshot kept in memory only: {err:#}", self.key);
                false
            }
        }
    }
}
