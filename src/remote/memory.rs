use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    clock::Clock,
    error::RemoteError,
    models::{
        FastingSession, FastingStatus, FastingUpdate, NewFast, NewSession, Profile,
        SessionUpdate, WalkingSession,
    },
};

use super::{RemoteResult, RemoteStore};

#[derive(Default)]
struct RemoteTables {
    sessions: BTreeMap<String, WalkingSession>,
    fasts: BTreeMap<String, FastingSession>,
    profiles: HashMap<String, Profile>,
    /// Rows whose writes are refused.
    rejected_rows: HashSet<String>,
}

/// In-process remote with server-assigned ids, used by tests and demos.
///
/// Clones share the same tables and switches.
#[derive(Clone)]
pub struct MemoryRemote {
    tables: Arc<Mutex<RemoteTables>>,
    clock: Arc<dyn Clock>,
    reachable: Arc<AtomicBool>,
    reject_writes: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU64>,
    next_id: Arc<AtomicU64>,
    writes: Arc<AtomicUsize>,
}

impl MemoryRemote {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Arc::new(Mutex::new(RemoteTables::default())),
            clock,
            reachable: Arc::new(AtomicBool::new(true)),
            reject_writes: Arc::new(AtomicBool::new(false)),
            latency_ms: Arc::new(AtomicU64::new(0)),
            next_id: Arc::new(AtomicU64::new(1)),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, RemoteTables> {
        match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// While unreachable every call fails with a network error.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// While set, writes reach the server and are refused.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Refuse writes to one existing row, leaving every other row writable.
    pub fn reject_writes_to(&self, id: &str) {
        self.tables().rejected_rows.insert(id.to_string());
    }

    pub fn accept_writes_to(&self, id: &str) {
        self.tables().rejected_rows.remove(id);
    }

    /// Delay every call, so concurrent callers overlap.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of writes the server accepted.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Ids handed out by the inserts are `srv-1`, `srv-2`, ... across both
    /// session kinds.
    pub fn session(&self, id: &str) -> Option<WalkingSession> {
        self.tables().sessions.get(id).cloned()
    }

    pub fn sessions_for(&self, user_id: &str) -> Vec<WalkingSession> {
        self.tables()
            .sessions
            .values()
            .filter(|session| session.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn fast(&self, id: &str) -> Option<FastingSession> {
        self.tables().fasts.get(id).cloned()
    }

    pub fn fasts_for(&self, user_id: &str) -> Vec<FastingSession> {
        self.tables()
            .fasts
            .values()
            .filter(|fast| fast.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn put_profile(&self, profile: Profile) {
        self.tables()
            .profiles
            .insert(profile.user_id.clone(), profile);
    }

    async fn delay(&self) {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
    }

    fn next_id(&self) -> String {
        format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn ensure_reachable(&self) -> RemoteResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Network("connection refused".into()))
        }
    }

    fn ensure_writable(&self, row: Option<&str>) -> RemoteResult<()> {
        self.ensure_reachable()?;
        let refused = self.reject_writes.load(Ordering::SeqCst)
            || row
                .map(|id| self.tables().rejected_rows.contains(id))
                .unwrap_or(false);
        if refused {
            return Err(RemoteError::Rejected {
                status: Some(403),
                message: "permission denied by row level security".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn insert_session(
        &self,
        user_id: &str,
        session: &NewSession,
    ) -> RemoteResult<WalkingSession> {
        self.delay().await;
        self.ensure_writable(None)?;
        let id = self.next_id();
        let now = self.clock.now();
        let created = WalkingSession {
            id: id.clone(),
            user_id: user_id.to_string(),
            start_time: session.start_time,
            end_time: None,
            status: session.status,
            session_state: session.session_state,
            pause_start_time: session.pause_start_time,
            total_pause_duration: session.total_pause_duration,
            speed_mph: session.speed_mph,
            duration_minutes: None,
            distance: None,
            calories_burned: None,
            estimated_steps: None,
            is_edited: false,
            original_duration_minutes: None,
            edit_reason: None,
            created_at: now,
            updated_at: now,
        };
        self.tables().sessions.insert(id, created.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn update_session(
        &self,
        id: &str,
        user_id: &str,
        update: &SessionUpdate,
    ) -> RemoteResult<WalkingSession> {
        self.delay().await;
        self.ensure_writable(Some(id))?;
        let now = self.clock.now();
        let mut tables = self.tables();
        let session = tables
            .sessions
            .get_mut(id)
            .filter(|session| session.user_id == user_id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;

        update.apply_to(session, now);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(session.clone())
    }

    async fn delete_session(&self, id: &str, user_id: &str) -> RemoteResult<()> {
        self.delay().await;
        self.ensure_writable(Some(id))?;
        let mut tables = self.tables();
        let owned = tables
            .sessions
            .get(id)
            .map(|session| session.user_id == user_id)
            .unwrap_or(false);
        if owned {
            tables.sessions.remove(id);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_active_session(&self, user_id: &str) -> RemoteResult<Option<WalkingSession>> {
        self.delay().await;
        self.ensure_reachable()?;
        Ok(self
            .tables()
            .sessions
            .values()
            .filter(|session| session.user_id == user_id && session.is_active())
            .max_by_key(|session| session.start_time)
            .cloned())
    }

    async fn insert_fast(&self, user_id: &str, fast: &NewFast) -> RemoteResult<FastingSession> {
        self.delay().await;
        self.ensure_writable(None)?;
        let id = self.next_id();
        let now = self.clock.now();
        let mut tables = self.tables();

        for open in tables
            .fasts
            .values_mut()
            .filter(|open| open.user_id == user_id && open.is_active())
        {
            FastingUpdate::Cancel {
                end_time: fast.start_time,
            }
            .apply_to(open, now);
        }

        let created = FastingSession {
            id: id.clone(),
            user_id: user_id.to_string(),
            start_time: fast.start_time,
            end_time: None,
            duration_seconds: None,
            goal_duration_seconds: fast.goal_duration_seconds,
            status: FastingStatus::Active,
            created_at: now,
            updated_at: now,
        };
        tables.fasts.insert(id, created.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn update_fast(
        &self,
        id: &str,
        user_id: &str,
        update: &FastingUpdate,
    ) -> RemoteResult<FastingSession> {
        self.delay().await;
        self.ensure_writable(Some(id))?;
        let now = self.clock.now();
        let mut tables = self.tables();
        let fast = tables
            .fasts
            .get_mut(id)
            .filter(|fast| fast.user_id == user_id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;

        update.apply_to(fast, now);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(fast.clone())
    }

    async fn fetch_active_fast(&self, user_id: &str) -> RemoteResult<Option<FastingSession>> {
        self.delay().await;
        self.ensure_reachable()?;
        Ok(self
            .tables()
            .fasts
            .values()
            .filter(|fast| fast.user_id == user_id && fast.is_active())
            .max_by_key(|fast| fast.start_time)
            .cloned())
    }

    async fn fetch_profile(&self, user_id: &str) -> RemoteResult<Option<Profile>> {
        self.delay().await;
        self.ensure_reachable()?;
        Ok(self.tables().profiles.get(user_id).cloned())
    }

    async fn ping(&self) -> RemoteResult<()> {
        self.delay().await;
        self.ensure_reachable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        models::{SessionState, SessionStatus},
    };
    use chrono::{TimeZone, Utc};

    fn draft() -> NewSession {
        NewSession {
            start_time: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
            status: SessionStatus::Active,
            session_state: SessionState::Active,
            pause_start_time: None,
            total_pause_duration: 0,
            speed_mph: 3.0,
        }
    }

    fn remote() -> MemoryRemote {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap());
        MemoryRemote::new(Arc::new(clock))
    }

    #[tokio::test]
    async fn assigns_server_ids_and_counts_writes() {
        let remote = remote();
        let created = remote.insert_session("user-1", &draft()).await.expect("insert");
        assert_eq!(created.id, "srv-1");

        remote
            .update_session(
                "srv-1",
                "user-1",
                &SessionUpdate::Speed { speed_mph: 3.5 },
            )
            .await
            .expect("update");

        assert_eq!(remote.write_count(), 2);
        assert_eq!(remote.session("srv-1").expect("row").speed_mph, 3.5);
    }

    #[tokio::test]
    async fn unreachable_and_rejecting_modes() {
        let remote = remote();

        remote.set_reachable(false);
        let err = remote.insert_session("user-1", &draft()).await.expect_err("offline");
        assert!(err.is_network());

        remote.set_reachable(true);
        remote.set_reject_writes(true);
        let err = remote.insert_session("user-1", &draft()).await.expect_err("rejected");
        assert!(matches!(err, RemoteError::Rejected { .. }));
        assert_eq!(remote.write_count(), 0);
    }

    #[tokio::test]
    async fn rejected_row_leaves_other_rows_writable() {
        let remote = remote();
        remote.insert_session("user-1", &draft()).await.expect("first");
        remote.insert_session("user-1", &draft()).await.expect("second");
        remote.reject_writes_to("srv-1");

        let speed = SessionUpdate::Speed { speed_mph: 4.0 };
        let err = remote
            .update_session("srv-1", "user-1", &speed)
            .await
            .expect_err("refused row");
        assert!(matches!(err, RemoteError::Rejected { status: Some(403), .. }));
        remote
            .update_session("srv-2", "user-1", &speed)
            .await
            .expect("other row");

        remote.accept_writes_to("srv-1");
        remote
            .update_session("srv-1", "user-1", &speed)
            .await
            .expect("accepted again");
    }

    #[tokio::test]
    async fn new_fast_cancels_the_open_one() {
        let remote = remote();
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap();
        let first = remote
            .insert_fast(
                "user-1",
                &NewFast {
                    start_time: start,
                    goal_duration_seconds: Some(16 * 3600),
                    status: FastingStatus::Active,
                },
            )
            .await
            .expect("first fast");
        let later = start + chrono::Duration::hours(20);
        let second = remote
            .insert_fast(
                "user-1",
                &NewFast {
                    start_time: later,
                    goal_duration_seconds: None,
                    status: FastingStatus::Active,
                },
            )
            .await
            .expect("second fast");

        let closed = remote.fast(&first.id).expect("first row");
        assert_eq!(closed.status, FastingStatus::Cancelled);
        assert_eq!(closed.end_time, Some(later));
        assert_eq!(
            remote.fetch_active_fast("user-1").await.expect("fetch").map(|f| f.id),
            Some(second.id)
        );
    }
}
