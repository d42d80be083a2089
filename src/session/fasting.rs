use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{
    context::SyncServices,
    error::{SessionError, SessionResult},
    models::{FastingSession, FastingStatus, FastingUpdate, OperationPayload},
};

use super::{
    controller::{refresh_slot, Applied},
    state,
};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "fastnow_sync::fasting";

/// Fasting session lifecycle for one signed-in user. Shares the outbox, the
/// id table and the live-or-queue rule with walking sessions.
pub struct FastingController {
    services: SyncServices,
    transition_lock: Mutex<()>,
}

impl FastingController {
    pub fn new(services: SyncServices) -> Self {
        Self {
            services,
            transition_lock: Mutex::new(()),
        }
    }

    pub fn current(&self) -> Option<FastingSession> {
        self.services.fasts.get()
    }

    pub fn elapsed_seconds(&self) -> u64 {
        let now = self.services.clock.now();
        self.current()
            .map(|fast| fast.elapsed_seconds(now))
            .unwrap_or(0)
    }

    pub async fn load_active_fast(&self) -> SessionResult<Option<FastingSession>> {
        let _transition = self.transition_lock.lock().await;
        let services = &self.services;
        refresh_slot(services, &services.fasts, || {
            services.remote.fetch_active_fast(&services.user_id)
        })
        .await
    }

    /// Start a fast now, or backdated to `started_at`.
    pub async fn start(
        &self,
        goal_duration_seconds: Option<u64>,
        started_at: Option<DateTime<Utc>>,
    ) -> SessionResult<Applied<FastingSession>> {
        let _transition = self.transition_lock.lock().await;
        let services = &self.services;

        if goal_duration_seconds == Some(0) {
            return Err(SessionError::InvalidGoal(0));
        }
        let now = services.clock.now();
        let start_time = started_at.unwrap_or(now);
        if start_time > now {
            return Err(SessionError::InvalidStartTime(start_time));
        }
        if let Some(existing) = services.fasts.get() {
            return Err(SessionError::AlreadyActive(existing.id));
        }

        let local_id = state::provisional_id(&services.settings.provisional_id_prefix, now);
        let fast = FastingSession {
            id: local_id.clone(),
            user_id: services.user_id.clone(),
            start_time,
            end_time: None,
            duration_seconds: None,
            goal_duration_seconds,
            status: FastingStatus::Active,
            created_at: now,
            updated_at: now,
        };
        let draft = fast.to_draft();
        services.fasts.set(Some(fast.clone())).await;
        crate::log_info!("Started fast {local_id}");

        if services.monitor.is_connected() {
            match services.remote.insert_fast(&services.user_id, &draft).await {
                Ok(created) => {
                    services.fasts.set(Some(created.clone())).await;
                    return Ok(Applied::Confirmed(created));
                }
                Err(err) if err.is_network() => {
                    services.monitor.mark_unreachable();
                }
                Err(err) => {
                    services.fasts.set(None).await;
                    return Err(err.into());
                }
            }
        }

        let receipt = services
            .enqueue(OperationPayload::StartFast {
                local_id,
                fast: draft,
            })
            .await;
        Ok(Applied::pending(fast, receipt))
    }

    pub async fn end(&self) -> SessionResult<Applied<FastingSession>> {
        let _transition = self.transition_lock.lock().await;
        let fast = self.require_fast()?;
        let now = self.services.clock.now();
        let duration_seconds = fast.elapsed_seconds(now);
        crate::log_info!("Ending fast {} after {duration_seconds}s", fast.id);
        let payload = OperationPayload::EndFast {
            fast_id: fast.id.clone(),
            end_time: now,
            duration_seconds,
        };
        let update = FastingUpdate::End {
            end_time: now,
            duration_seconds,
        };
        self.close(fast, update, payload).await
    }

    /// The row is kept with a `cancelled` status.
    pub async fn cancel(&self) -> SessionResult<Applied<FastingSession>> {
        let _transition = self.transition_lock.lock().await;
        let fast = self.require_fast()?;
        let now = self.services.clock.now();
        crate::log_info!("Cancelling fast {}", fast.id);
        let payload = OperationPayload::CancelFast {
            fast_id: fast.id.clone(),
            cancelled_at: now,
        };
        self.close(fast, FastingUpdate::Cancel { end_time: now }, payload)
            .await
    }

    fn require_fast(&self) -> SessionResult<FastingSession> {
        self.current().ok_or(SessionError::NoActiveSession)
    }

    async fn close(
        &self,
        before: FastingSession,
        update: FastingUpdate,
        payload: OperationPayload,
    ) -> SessionResult<Applied<FastingSession>> {
        let services = &self.services;
        let now = services.clock.now();
        let mut closed = before.clone();
        update.apply_to(&mut closed, now);
        services.fasts.set(None).await;

        if services.can_go_live(&before.id) {
            match services
                .remote
                .update_fast(&before.id, &services.user_id, &update)
                .await
            {
                Ok(row) => return Ok(Applied::Confirmed(row)),
                Err(err) if err.is_network() => {
                    services.monitor.mark_unreachable();
                }
                Err(err) => {
                    crate::log_warn!("Server rejected update to fast {}: {err}", before.id);
                    services.fasts.set(Some(before)).await;
                    return Err(err.into());
                }
            }
        }

        let receipt = services.enqueue(payload).await;
        Ok(Applied::pending(closed, receipt))
    }
}
