use std::collections::HashSet;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::{
    context::SyncServices,
    error::RemoteError,
    models::{EntityKind, FastingUpdate, OperationPayload, QueuedOperation, SessionUpdate},
};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "fastnow_sync::sync";

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    pub failed: usize,
    /// Left untouched because an earlier operation of the same session failed.
    pub blocked: usize,
    pub remaining: usize,
    /// Another drain was already running.
    pub skipped: bool,
    /// The server was not reachable, nothing was attempted.
    pub offline: bool,
}

/// Replays the outbox against the remote store in enqueue order.
pub struct SyncReconciler {
    services: SyncServices,
    running: Mutex<()>,
}

impl SyncReconciler {
    pub fn new(services: SyncServices) -> Self {
        Self {
            services,
            running: Mutex::new(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Apply every queued operation that can be applied now.
    ///
    /// An operation leaves the queue only after the server confirmed it. A
    /// failure keeps it queued and holds back later operations of the same
    /// session; other sessions continue. A network failure ends the drain.
    pub async fn drain(&self) -> DrainReport {
        let services = &self.services;
        let Ok(_running) = self.running.try_lock() else {
            crate::log_debug!("Drain already in progress");
            return DrainReport {
                skipped: true,
                remaining: services.queue.pending_count(),
                ..DrainReport::default()
            };
        };

        let mut report = DrainReport::default();
        if !services.monitor.is_connected() {
            report.offline = true;
            report.remaining = services.queue.pending_count();
            return report;
        }

        self.prune_mappings().await;
        crate::log_debug!("Draining {} queued operations", services.queue.pending_count());
        let mut attempted: HashSet<String> = HashSet::new();
        let mut blocked_lineages: HashSet<String> = HashSet::new();

        'passes: loop {
            // Operations enqueued while this drain runs are picked up by the
            // next pass.
            let batch: Vec<QueuedOperation> = services
                .queue
                .peek_all()
                .into_iter()
                .filter(|op| !attempted.contains(&op.id))
                .collect();
            if batch.is_empty() {
                break;
            }

            for op in batch {
                attempted.insert(op.id.clone());
                let lineage = services.ids.resolve(op.session_ref());
                if blocked_lineages.contains(&lineage) {
                    report.blocked += 1;
                    continue;
                }

                match self.apply(&op).await {
                    Ok(()) => {
                        services.queue.remove(&op.id).await;
                        report.applied += 1;
                        crate::log_debug!(
                            "Applied queued {} for {}",
                            op.action().as_str(),
                            lineage
                        );
                    }
                    Err(err) => {
                        crate::log_warn!(
                            "Queued {} for {} failed (attempt {}): {err}",
                            op.action().as_str(),
                            lineage,
                            op.attempts + 1
                        );
                        services.queue.record_failure(&op.id, &err.to_string()).await;
                        report.failed += 1;
                        blocked_lineages.insert(lineage);

                        if err.is_network() {
                            services.monitor.mark_unreachable();
                            break 'passes;
                        }
                    }
                }
            }
        }

        report.remaining = services.queue.pending_count();
        if report.applied > 0 || report.failed > 0 {
            crate::log_info!(
                "Drain finished: {} applied, {} failed, {} blocked, {} remaining",
                report.applied,
                report.failed,
                report.blocked,
                report.remaining
            );
        }
        report
    }

    /// Forget id mappings that no queued operation and no open record still
    /// refers to. Runs before replaying, so mappings recorded by this drain
    /// stay until the next one.
    async fn prune_mappings(&self) {
        let services = &self.services;
        let mut referenced: HashSet<String> = services
            .queue
            .peek_all()
            .iter()
            .map(|op| op.session_ref().to_string())
            .collect();
        referenced.extend(services.slot.current_id());
        referenced.extend(services.fasts.current_id());
        services.ids.retain_referenced(&referenced).await;
    }

    /// Server id for a queued reference. A reference that still resolves to a
    /// provisional id belongs to a session whose `start` has not landed.
    fn target(&self, session_ref: &str) -> Result<String, RemoteError> {
        let resolved = self.services.ids.resolve(session_ref);
        if self.services.ids.is_provisional(&resolved) {
            return Err(RemoteError::NotFound(format!(
                "session {session_ref} has not been created remotely yet"
            )));
        }
        Ok(resolved)
    }

    async fn update(
        &self,
        op: &QueuedOperation,
        session_ref: &str,
        update: SessionUpdate,
    ) -> Result<(), RemoteError> {
        let id = self.target(session_ref)?;
        self.services
            .remote
            .update_session(&id, &op.user_id, &update)
            .await?;
        Ok(())
    }

    async fn apply(&self, op: &QueuedOperation) -> Result<(), RemoteError> {
        match op.entity {
            EntityKind::WalkingSession => self.apply_walking(op).await,
            EntityKind::FastingSession => self.apply_fasting(op).await,
        }
    }

    fn mismatched(op: &QueuedOperation) -> RemoteError {
        RemoteError::Decode(format!(
            "{} operation {} has no {} handler",
            op.entity.as_str(),
            op.id,
            op.action().as_str()
        ))
    }

    async fn apply_walking(&self, op: &QueuedOperation) -> Result<(), RemoteError> {
        let services = &self.services;
        match &op.payload {
            OperationPayload::Start { local_id, session } => {
                let created = services.remote.insert_session(&op.user_id, session).await?;
                services
                    .ids
                    .record(local_id, &created.id, services.clock.now())
                    .await;
                services.slot.reassign_id(local_id, &created.id).await;
                Ok(())
            }
            OperationPayload::Pause {
                session_id,
                pause_start_time,
            } => {
                self.update(
                    op,
                    session_id,
                    SessionUpdate::Pause {
                        pause_start_time: *pause_start_time,
                    },
                )
                .await
            }
            OperationPayload::Resume {
                session_id,
                total_pause_duration,
                ..
            } => {
                self.update(
                    op,
                    session_id,
                    SessionUpdate::Resume {
                        total_pause_duration: *total_pause_duration,
                    },
                )
                .await
            }
            OperationPayload::End {
                session_id,
                completion,
            } => {
                self.update(op, session_id, SessionUpdate::Complete(completion.clone()))
                    .await
            }
            OperationPayload::UpdateSpeed {
                session_id,
                speed_mph,
            } => {
                self.update(
                    op,
                    session_id,
                    SessionUpdate::Speed {
                        speed_mph: *speed_mph,
                    },
                )
                .await
            }
            OperationPayload::Cancel { session_id, .. } => {
                let id = self.target(session_id)?;
                services.remote.delete_session(&id, &op.user_id).await
            }
            _ => Err(Self::mismatched(op)),
        }
    }

    async fn apply_fasting(&self, op: &QueuedOperation) -> Result<(), RemoteError> {
        let services = &self.services;
        let (fast_ref, update) = match &op.payload {
            OperationPayload::StartFast { local_id, fast } => {
                let created = services.remote.insert_fast(&op.user_id, fast).await?;
                services
                    .ids
                    .record(local_id, &created.id, services.clock.now())
                    .await;
                services.fasts.reassign_id(local_id, &created.id).await;
                return Ok(());
            }
            OperationPayload::EndFast {
                fast_id,
                end_time,
                duration_seconds,
            } => (
                fast_id,
                FastingUpdate::End {
                    end_time: *end_time,
                    duration_seconds: *duration_seconds,
                },
            ),
            OperationPayload::CancelFast {
                fast_id,
                cancelled_at,
            } => (
                fast_id,
                FastingUpdate::Cancel {
                    end_time: *cancelled_at,
                },
            ),
            _ => return Err(Self::mismatched(op)),
        };

        let id = self.target(fast_ref)?;
        services
            .remote
            .update_fast(&id, &op.user_id, &update)
            .await?;
        Ok(())
    }
}
