use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    fasting::NewFast,
    session::{Completion, NewSession},
};

/// Record type an operation writes to. Each kind is replayed by its own
/// handler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    WalkingSession,
    FastingSession,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::WalkingSession => "walking_session",
            EntityKind::FastingSession => "fasting_session",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationAction {
    Start,
    Pause,
    Resume,
    End,
    Cancel,
    UpdateSpeed,
}

impl OperationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationAction::Start => "start",
            OperationAction::Pause => "pause",
            OperationAction::Resume => "resume",
            OperationAction::End => "end",
            OperationAction::Cancel => "cancel",
            OperationAction::UpdateSpeed => "update_speed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OperationPayload {
    Start {
        local_id: String,
        session: NewSession,
    },
    Pause {
        session_id: String,
        pause_start_time: DateTime<Utc>,
    },
    Resume {
        session_id: String,
        pause_duration_seconds: u64,
        total_pause_duration: u64,
    },
    End {
        session_id: String,
        completion: Completion,
    },
    Cancel {
        session_id: String,
        reason: Option<String>,
    },
    UpdateSpeed {
        session_id: String,
        speed_mph: f64,
    },
    StartFast {
        local_id: String,
        fast: NewFast,
    },
    EndFast {
        fast_id: String,
        end_time: DateTime<Utc>,
        duration_seconds: u64,
    },
    CancelFast {
        fast_id: String,
        cancelled_at: DateTime<Utc>,
    },
}

impl OperationPayload {
    pub fn action(&self) -> OperationAction {
        match self {
            OperationPayload::Start { .. } => OperationAction::Start,
            OperationPayload::Pause { .. } => OperationAction::Pause,
            OperationPayload::Resume { .. } => OperationAction::Resume,
            OperationPayload::End { .. } => OperationAction::End,
            OperationPayload::Cancel { .. } => OperationAction::Cancel,
            OperationPayload::UpdateSpeed { .. } => OperationAction::UpdateSpeed,
            OperationPayload::StartFast { .. } => OperationAction::Start,
            OperationPayload::EndFast { .. } => OperationAction::End,
            OperationPayload::CancelFast { .. } => OperationAction::Cancel,
        }
    }

    pub fn entity(&self) -> EntityKind {
        match self {
            OperationPayload::StartFast { .. }
            | OperationPayload::EndFast { .. }
            | OperationPayload::CancelFast { .. } => EntityKind::FastingSession,
            OperationPayload::Start { .. }
            | OperationPayload::Pause { .. }
            | OperationPayload::Resume { .. }
            | OperationPayload::End { .. }
            | OperationPayload::Cancel { .. }
            | OperationPayload::UpdateSpeed { .. } => EntityKind::WalkingSession,
        }
    }

    /// The record this operation belongs to, as it was known at enqueue time
    /// (possibly provisional).
    pub fn session_ref(&self) -> &str {
        match self {
            OperationPayload::Start { local_id, .. }
            | OperationPayload::StartFast { local_id, .. } => local_id,
            OperationPayload::Pause { session_id, .. }
            | OperationPayload::Resume { session_id, .. }
            | OperationPayload::End { session_id, .. }
            | OperationPayload::Cancel { session_id, .. }
            | OperationPayload::UpdateSpeed { session_id, .. } => session_id,
            OperationPayload::EndFast { fast_id, .. }
            | OperationPayload::CancelFast { fast_id, .. } => fast_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedOperation {
    pub id: String,
    pub entity: EntityKind,
    pub user_id: String,
    pub payload: OperationPayload,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl QueuedOperation {
    pub fn new(
        user_id: impl Into<String>,
        payload: OperationPayload,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            entity: payload.entity(),
            user_id: user_id.into(),
            payload,
            created_at,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn action(&self) -> OperationAction {
        self.payload.action()
    }

    pub fn session_ref(&self) -> &str {
        self.payload.session_ref()
    }
}
