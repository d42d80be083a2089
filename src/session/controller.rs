use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        RwLock,
    },
};

use tokio::sync::Mutex;

use crate::{
    context::SyncServices,
    error::{SessionError, SessionResult},
    models::{OperationPayload, Profile, SessionUpdate, WalkingSession},
    outbox::EnqueueReceipt,
    remote::RemoteResult,
};

use super::{
    slot::{ActiveSlot, SlotRecord},
    state::{self, BodyMetrics, EndRequest},
};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "fastnow_sync::session";

/// Where a mutation ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied<T> {
    /// The server accepted the write.
    Confirmed(T),
    /// Applied locally and queued; the server has not seen it yet.
    Pending {
        value: T,
        operation_id: String,
        /// False if the outbox could only hold the operation in memory.
        persisted: bool,
    },
}

impl<T> Applied<T> {
    pub(crate) fn pending(value: T, receipt: EnqueueReceipt) -> Self {
        Applied::Pending {
            value,
            operation_id: receipt.operation_id,
            persisted: receipt.persisted,
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Applied::Confirmed(value) | Applied::Pending { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Applied::Confirmed(value) | Applied::Pending { value, .. } => value,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Applied::Pending { .. })
    }

    pub fn operation_id(&self) -> Option<&str> {
        match self {
            Applied::Confirmed(_) => None,
            Applied::Pending { operation_id, .. } => Some(operation_id),
        }
    }
}

/// Replace `slot` with the server's open record unless local state must win.
///
/// Local state wins while the held record has queued operations, and also
/// while the fetched row does: after an `end` or `cancel` that has not reached
/// the server yet, the row still looks open there.
pub(crate) async fn refresh_slot<T, F, Fut>(
    services: &SyncServices,
    slot: &ActiveSlot<T>,
    fetch: F,
) -> SessionResult<Option<T>>
where
    T: SlotRecord,
    F: FnOnce() -> Fut,
    Fut: Future<Output = RemoteResult<Option<T>>>,
{
    let local = slot.get();

    if let Some(record) = &local {
        if services.has_unsynced(record.record_id()) {
            crate::log_debug!("Keeping local {} with unsynced changes", record.record_id());
            return Ok(local);
        }
    }

    if !services.monitor.is_connected() {
        return Ok(local);
    }

    match fetch().await {
        Ok(Some(row)) if services.has_unsynced(row.record_id()) => {
            crate::log_info!(
                "Server copy of {} is behind queued changes, keeping local state",
                row.record_id()
            );
            Ok(local)
        }
        Ok(remote) => {
            slot.set(remote.clone()).await;
            Ok(remote)
        }
        Err(err) if err.is_network() => {
            services.monitor.mark_unreachable();
            Ok(local)
        }
        Err(err) => {
            crate::log_warn!("Could not load open record, using snapshot: {err}");
            Ok(local)
        }
    }
}

struct LoadingGuard<'a>(&'a AtomicBool);

impl<'a> LoadingGuard<'a> {
    fn new(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Walking session lifecycle for one signed-in user.
///
/// Every transition is applied to the local snapshot first. It then goes to
/// the server directly when that is safe, and into the outbox otherwise.
pub struct SessionController {
    services: SyncServices,
    profile: RwLock<Option<Profile>>,
    loading: AtomicBool,
    transition_lock: Mutex<()>,
}

impl SessionController {
    pub fn new(services: SyncServices) -> Self {
        Self {
            services,
            profile: RwLock::new(None),
            loading: AtomicBool::new(false),
            transition_lock: Mutex::new(()),
        }
    }

    pub fn services(&self) -> &SyncServices {
        &self.services
    }

    pub fn current(&self) -> Option<WalkingSession> {
        self.services.slot.get()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// Active seconds of the open session, excluding pauses.
    pub fn elapsed_seconds(&self) -> u64 {
        let now = self.services.clock.now();
        self.current()
            .map(|session| state::active_seconds(&session, now))
            .unwrap_or(0)
    }

    pub fn set_profile(&self, profile: Option<Profile>) {
        let mut guard = match self.profile.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = profile;
    }

    pub fn profile(&self) -> Option<Profile> {
        match self.profile.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn body_metrics(&self) -> BodyMetrics {
        let profile = self.profile();
        BodyMetrics {
            weight_kg: profile
                .as_ref()
                .and_then(|p| p.weight_kg)
                .filter(|weight| *weight > 0.0)
                .unwrap_or(self.services.settings.default_weight_kg),
            height_cm: profile.as_ref().and_then(|p| p.height_cm),
        }
    }

    fn default_speed(&self) -> f64 {
        self.profile()
            .and_then(|p| p.default_walking_speed)
            .unwrap_or(self.services.settings.default_speed_mph)
    }

    fn require_session(&self) -> SessionResult<WalkingSession> {
        self.current().ok_or(SessionError::NoActiveSession)
    }

    /// Refresh the open session from the server, falling back to the local
    /// snapshot. Unsynced local changes win over the server.
    pub async fn load_active_session(&self) -> SessionResult<Option<WalkingSession>> {
        let _loading = LoadingGuard::new(&self.loading);
        let _transition = self.transition_lock.lock().await;
        let services = &self.services;
        refresh_slot(services, &services.slot, || {
            services.remote.fetch_active_session(&services.user_id)
        })
        .await
    }

    pub async fn start(&self, speed_mph: Option<f64>) -> SessionResult<Applied<WalkingSession>> {
        let _transition = self.transition_lock.lock().await;
        let services = &self.services;

        let speed = state::validate_speed(speed_mph.unwrap_or_else(|| self.default_speed()))?;
        if let Some(existing) = services.slot.get() {
            return Err(SessionError::AlreadyActive(existing.id));
        }

        let now = services.clock.now();
        let local_id = state::provisional_id(&services.settings.provisional_id_prefix, now);
        let session = state::new_session(local_id.clone(), &services.user_id, speed, now);
        let draft = session.to_draft();
        services.slot.set(Some(session.clone())).await;
        crate::log_info!("Started walking session {local_id} at {speed} mph");

        if services.monitor.is_connected() {
            match services.remote.insert_session(&services.user_id, &draft).await {
                Ok(created) => {
                    services.slot.set(Some(created.clone())).await;
                    return Ok(Applied::Confirmed(created));
                }
                Err(err) if err.is_network() => {
                    services.monitor.mark_unreachable();
                }
                Err(err) => {
                    services.slot.set(None).await;
                    return Err(err.into());
                }
            }
        }

        let receipt = services
            .enqueue(OperationPayload::Start {
                local_id,
                session: draft,
            })
            .await;
        Ok(Applied::pending(session, receipt))
    }

    pub async fn pause(&self) -> SessionResult<Applied<WalkingSession>> {
        let _transition = self.transition_lock.lock().await;
        let session = self.require_session()?;
        let now = self.services.clock.now();
        let update = state::pause(&session, now)?;
        let payload = OperationPayload::Pause {
            session_id: session.id.clone(),
            pause_start_time: now,
        };
        crate::log_info!("Pausing walking session {}", session.id);
        self.commit_update(session, update, payload, false).await
    }

    pub async fn resume(&self) -> SessionResult<Applied<WalkingSession>> {
        let _transition = self.transition_lock.lock().await;
        let session = self.require_session()?;
        let now = self.services.clock.now();
        let (update, paused_for) = state::resume(&session, now)?;
        let total_pause_duration = match &update {
            SessionUpdate::Resume {
                total_pause_duration,
            } => *total_pause_duration,
            _ => session.total_pause_duration,
        };
        let payload = OperationPayload::Resume {
            session_id: session.id.clone(),
            pause_duration_seconds: paused_for,
            total_pause_duration,
        };
        crate::log_info!(
            "Resuming walking session {} after {paused_for}s paused",
            session.id
        );
        self.commit_update(session, update, payload, false).await
    }

    pub async fn update_speed(&self, speed_mph: f64) -> SessionResult<Applied<WalkingSession>> {
        let _transition = self.transition_lock.lock().await;
        let session = self.require_session()?;
        let update = state::change_speed(&session, speed_mph)?;
        let payload = OperationPayload::UpdateSpeed {
            session_id: session.id.clone(),
            speed_mph,
        };
        self.commit_update(session, update, payload, false).await
    }

    pub async fn end(&self, request: EndRequest) -> SessionResult<Applied<WalkingSession>> {
        let _transition = self.transition_lock.lock().await;
        let session = self.require_session()?;
        let now = self.services.clock.now();
        let completion = state::complete(&session, now, &request, self.body_metrics())?;
        crate::log_info!(
            "Ending walking session {} after {} min{}",
            session.id,
            completion.duration_minutes,
            if completion.is_edited { " (edited)" } else { "" }
        );
        let payload = OperationPayload::End {
            session_id: session.id.clone(),
            completion: completion.clone(),
        };
        self.commit_update(session, SessionUpdate::Complete(completion), payload, true)
            .await
    }

    /// Discard the open session. No completed record remains.
    pub async fn cancel(&self, reason: Option<String>) -> SessionResult<Applied<()>> {
        let _transition = self.transition_lock.lock().await;
        let services = &self.services;
        let session = self.require_session()?;
        crate::log_info!(
            "Cancelling walking session {} ({})",
            session.id,
            reason.as_deref().unwrap_or("no reason given")
        );

        services.slot.set(None).await;

        if services.can_go_live(&session.id) {
            match services
                .remote
                .delete_session(&session.id, &services.user_id)
                .await
            {
                Ok(()) => return Ok(Applied::Confirmed(())),
                Err(err) if err.is_network() => {
                    services.monitor.mark_unreachable();
                }
                Err(err) => {
                    services.slot.set(Some(session)).await;
                    return Err(err.into());
                }
            }
        }

        let receipt = services
            .enqueue(OperationPayload::Cancel {
                session_id: session.id,
                reason,
            })
            .await;
        Ok(Applied::pending((), receipt))
    }

    async fn commit_update(
        &self,
        before: WalkingSession,
        update: SessionUpdate,
        payload: OperationPayload,
        closes_session: bool,
    ) -> SessionResult<Applied<WalkingSession>> {
        let services = &self.services;
        let now = services.clock.now();

        let mut optimistic = before.clone();
        update.apply_to(&mut optimistic, now);
        services
            .slot
            .modify(|current| {
                if closes_session {
                    *current = None;
                } else if let Some(held) = current.as_mut() {
                    update.apply_to(held, now);
                }
            })
            .await;

        if services.can_go_live(&before.id) {
            match services
                .remote
                .update_session(&before.id, &services.user_id, &update)
                .await
            {
                Ok(row) => {
                    if !closes_session {
                        services.slot.set(Some(row.clone())).await;
                    }
                    return Ok(Applied::Confirmed(row));
                }
                Err(err) if err.is_network() => {
                    services.monitor.mark_unreachable();
                }
                Err(err) => {
                    crate::log_warn!("Server rejected update to {}: {err}", before.id);
                    services.slot.set(Some(before)).await;
                    return Err(err.into());
                }
            }
        }

        let receipt = services.enqueue(payload).await;
        Ok(Applied::pending(optimistic, receipt))
    }
}
