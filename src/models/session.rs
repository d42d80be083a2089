//! Walking session records as stored locally and remotely.
//!
//! Field names follow the `walking_sessions` table columns so the same serde
//! representation is used for the remote REST payloads, the local snapshot and
//! queued operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Paused,
    Completed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Paused => "paused",
            SessionState::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalkingSession {
    pub id: String,
    pub user_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub session_state: SessionState,
    #[serde(default)]
    pub pause_start_time: Option<DateTime<Utc>>,
    /// Accumulated paused seconds from finished pauses.
    #[serde(default)]
    pub total_pause_duration: u64,
    pub speed_mph: f64,
    #[serde(default)]
    pub duration_minutes: Option<u64>,
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub calories_burned: Option<u32>,
    #[serde(default)]
    pub estimated_steps: Option<u32>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub original_duration_minutes: Option<u64>,
    #[serde(default)]
    pub edit_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WalkingSession {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn is_paused(&self) -> bool {
        self.session_state == SessionState::Paused
    }

    /// Presentation policy: completed walks shorter than a minute are shown as
    /// cancelled. The record itself is still a completed session.
    pub fn is_too_short(&self) -> bool {
        self.status == SessionStatus::Completed
            && self.duration_minutes.map(|minutes| minutes < 1).unwrap_or(true)
    }

    /// Columns needed to create this session remotely.
    pub fn to_draft(&self) -> NewSession {
        NewSession {
            start_time: self.start_time,
            status: self.status,
            session_state: self.session_state,
            pause_start_time: self.pause_start_time,
            total_pause_duration: self.total_pause_duration,
            speed_mph: self.speed_mph,
        }
    }
}

/// Insert payload for a new session; the server assigns `id` and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewSession {
    pub start_time: DateTime<Utc>,
    pub status: SessionStatus,
    pub session_state: SessionState,
    #[serde(default)]
    pub pause_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_pause_duration: u64,
    pub speed_mph: f64,
}

/// Terminal columns written by `end`. Always written as a whole so replaying
/// it reproduces exactly what was computed locally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Completion {
    pub end_time: DateTime<Utc>,
    pub total_pause_duration: u64,
    pub duration_minutes: u64,
    pub distance: Option<f64>,
    pub calories_burned: Option<u32>,
    pub estimated_steps: Option<u32>,
    pub is_edited: bool,
    pub original_duration_minutes: Option<u64>,
    pub edit_reason: Option<String>,
}

/// A single remote update against an existing session row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionUpdate {
    Pause {
        pause_start_time: DateTime<Utc>,
    },
    /// Absolute total, not an increment, so replays are idempotent.
    Resume {
        total_pause_duration: u64,
    },
    Complete(Completion),
    Speed {
        speed_mph: f64,
    },
}

impl SessionUpdate {
    /// Apply this update to an in-memory record.
    pub fn apply_to(&self, session: &mut WalkingSession, updated_at: DateTime<Utc>) {
        match self {
            SessionUpdate::Pause { pause_start_time } => {
                session.session_state = SessionState::Paused;
                session.pause_start_time = Some(*pause_start_time);
            }
            SessionUpdate::Resume {
                total_pause_duration,
            } => {
                session.session_state = SessionState::Active;
                session.pause_start_time = None;
                session.total_pause_duration = *total_pause_duration;
            }
            SessionUpdate::Complete(completion) => {
                session.status = SessionStatus::Completed;
                session.session_state = SessionState::Completed;
                session.pause_start_time = None;
                session.end_time = Some(completion.end_time);
                session.total_pause_duration = completion.total_pause_duration;
                session.duration_minutes = Some(completion.duration_minutes);
                session.distance = completion.distance;
                session.calories_burned = completion.calories_burned;
                session.estimated_steps = completion.estimated_steps;
                session.is_edited = completion.is_edited;
                session.original_duration_minutes = completion.original_duration_minutes;
                session.edit_reason = completion.edit_reason.clone();
            }
            SessionUpdate::Speed { speed_mph } => {
                session.speed_mph = *speed_mph;
            }
        }
        session.updated_at = updated_at;
    }

    /// Column values for the REST `PATCH` body.
    pub fn to_columns(&self) -> serde_json::Value {
        match self {
            SessionUpdate::Pause { pause_start_time } => serde_json::json!({
                "session_state": SessionState::Paused.as_str(),
                "pause_start_time": pause_start_time,
            }),
            SessionUpdate::Resume {
                total_pause_duration,
            } => serde_json::json!({
                "session_state": SessionState::Active.as_str(),
                "pause_start_time": serde_json::Value::Null,
                "total_pause_duration": total_pause_duration,
            }),
            SessionUpdate::Complete(completion) => serde_json::json!({
                "status": SessionStatus::Completed.as_str(),
                "session_state": SessionState::Completed.as_str(),
                "pause_start_time": serde_json::Value::Null,
                "end_time": completion.end_time,
                "total_pause_duration": completion.total_pause_duration,
                "duration_minutes": completion.duration_minutes,
                "distance": completion.distance,
                "calories_burned": completion.calories_burned,
                "estimated_steps": completion.estimated_steps,
                "is_edited": completion.is_edited,
                "original_duration_minutes": completion.original_duration_minutes,
                "edit_reason": completion.edit_reason,
            }),
            SessionUpdate::Speed { speed_mph } => serde_json::json!({
                "speed_mph": speed_mph,
            }),
        }
    }
}
