use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::sync::watch;

use crate::{
    models::QueuedOperation,
    store::{DurableStore, CORRUPT_QUEUE_KEY, QUEUE_KEY},
};

use super::IdMap;

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "fastnow_sync::outbox";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueReceipt {
    pub operation_id: String,
    /// False when the operation is only held in memory because the durable
    /// store refused the write.
    pub persisted: bool,
}

/// Ordered outbox of mutations awaiting remote confirmation.
///
/// The only mutation surface is `enqueue`, `remove`, `record_failure` and
/// `clear`; each one rewrites the persisted list before returning.
pub struct OperationQueue {
    store: Arc<dyn DurableStore>,
    operations: Mutex<Vec<QueuedOperation>>,
    persist_lock: tokio::sync::Mutex<()>,
    degraded: Mutex<bool>,
    pending_tx: watch::Sender<usize>,
}

impl OperationQueue {
    pub async fn load(store: Arc<dyn DurableStore>) -> Result<Self> {
        let operations = match store.read(QUEUE_KEY).await? {
            Some(raw) => match serde_json::from_str::<Vec<QueuedOperation>>(&raw) {
                Ok(operations) => operations,
                Err(err) => {
                    crate::log_error!(
                        "Persisted outbox is unreadable ({err}); preserving it under {CORRUPT_QUEUE_KEY}"
                    );
                    store.write(CORRUPT_QUEUE_KEY, raw).await?;
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        if !operations.is_empty() {
            crate::log_info!("Loaded {} pending outbox operations", operations.len());
        }

        let (pending_tx, _) = watch::channel(operations.len());
        Ok(Self {
            store,
            operations: Mutex::new(operations),
            persist_lock: tokio::sync::Mutex::new(()),
            degraded: Mutex::new(false),
            pending_tx,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<QueuedOperation>> {
        match self.operations.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set_degraded(&self, value: bool) {
        let mut guard = match self.degraded.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = value;
    }

    /// True while the in-memory queue holds operations the durable store
    /// could not record.
    pub fn is_degraded(&self) -> bool {
        match self.degraded.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Append `op` and persist the queue before returning.
    pub async fn enqueue(&self, op: QueuedOperation) -> EnqueueReceipt {
        let operation_id = op.id.clone();
        crate::log_info!(
            "Enqueue {} {} for session {} ({})",
            op.entity.as_str(),
            op.action().as_str(),
            op.session_ref(),
            operation_id
        );
        self.lock().push(op);
        self.publish_count();

        let persisted = self.persist_or_degrade().await;
        EnqueueReceipt {
            operation_id,
            persisted,
        }
    }

    /// All pending operations in enqueue order.
    pub fn peek_all(&self) -> Vec<QueuedOperation> {
        self.lock().clone()
    }

    pub fn get(&self, operation_id: &str) -> Option<QueuedOperation> {
        self.lock().iter().find(|op| op.id == operation_id).cloned()
    }

    /// Remove the operation with this id. Returns false if it was not queued.
    pub async fn remove(&self, operation_id: &str) -> bool {
        let removed = {
            let mut operations = self.lock();
            let before = operations.len();
            operations.retain(|op| op.id != operation_id);
            before != operations.len()
        };

        if removed {
            crate::log_debug!("Removed outbox operation {operation_id}");
            self.publish_count();
            self.persist_or_degrade().await;
        }
        removed
    }

    /// Bump the attempt counter and remember the last failure of an operation
    /// that stays queued.
    pub async fn record_failure(&self, operation_id: &str, message: &str) {
        let updated = {
            let mut operations = self.lock();
            match operations.iter_mut().find(|op| op.id == operation_id) {
                Some(op) => {
                    op.attempts = op.attempts.saturating_add(1);
                    op.last_error = Some(message.to_string());
                    true
                }
                None => false,
            }
        };

        if updated {
            self.persist_or_degrade().await;
        }
    }

    /// Whether any queued operation targets the same session lineage as
    /// `session_id`.
    pub fn has_pending_for(&self, session_id: &str, ids: &IdMap) -> bool {
        let target = ids.resolve(session_id);
        self.lock()
            .iter()
            .any(|op| ids.resolve(op.session_ref()) == target)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Pending-count updates, for badges and banners.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.pending_tx.subscribe()
    }

    pub async fn clear(&self) -> Result<()> {
        self.lock().clear();
        self.publish_count();
        self.persist().await?;
        self.set_degraded(false);
        Ok(())
    }

    fn publish_count(&self) {
        let count = self.pending_count();
        self.pending_tx.send_if_modified(|current| {
            if *current == count {
                false
            } else {
                *current = count;
                true
            }
        });
    }

    async fn persist_or_degrade(&self) -> bool {
        match self.persist().await {
            Ok(()) => {
                if self.is_degraded() {
                    crate::log_info!("Outbox persisted again after degraded period");
                }
                self.set_degraded(false);
                true
            }
            Err(err) => {
                crate::log_warn!(
                    "Outbox kept in memory only, durable write failed: {err:#}"
                );
                self.set_degraded(true);
                false
            }
        }
    }

    async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let serialized = {
            let operations = self.lock();
            serde_json::to_string(&*operations)?
        };
        self.store.write(QUEUE_KEY, serialized).await
    }
}
