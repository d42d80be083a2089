//! Remote persistence collaborator.

pub mod memory;
pub mod supabase;

use async_trait::async_trait;

use crate::{
    error::RemoteError,
    models::{
        FastingSession, FastingUpdate, NewFast, NewSession, Profile, SessionUpdate,
        WalkingSession,
    },
};

pub use memory::MemoryRemote;
pub use supabase::SupabaseRemote;

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Operations the sync core issues against the `walking_sessions`,
/// `fasting_sessions` and `profiles` collections. Every call is scoped to
/// `user_id`.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create a session and return the stored row with its server id.
    async fn insert_session(&self, user_id: &str, session: &NewSession)
        -> RemoteResult<WalkingSession>;

    async fn update_session(
        &self,
        id: &str,
        user_id: &str,
        update: &SessionUpdate,
    ) -> RemoteResult<WalkingSession>;

    /// Deleting a row that no longer exists succeeds.
    async fn delete_session(&self, id: &str, user_id: &str) -> RemoteResult<()>;

    async fn fetch_active_session(&self, user_id: &str) -> RemoteResult<Option<WalkingSession>>;

    /// Cancel any fast still active for the user as of `fast.start_time`, then
    /// create the new one.
    async fn insert_fast(&self, user_id: &str, fast: &NewFast) -> RemoteResult<FastingSession>;

    async fn update_fast(
        &self,
        id: &str,
        user_id: &str,
        update: &FastingUpdate,
    ) -> RemoteResult<FastingSession>;

    async fn fetch_active_fast(&self, user_id: &str) -> RemoteResult<Option<FastingSession>>;

    async fn fetch_profile(&self, user_id: &str) -> RemoteResult<Option<Profile>>;

    /// Lightweight reachability check.
    async fn ping(&self) -> RemoteResult<()>;
}
