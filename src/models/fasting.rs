//! Fasting session records, mirroring the `fasting_sessions` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FastingStatus {
    Active,
    Completed,
    Cancelled,
}

impl FastingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FastingStatus::Active => "active",
            FastingStatus::Completed => "completed",
            FastingStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FastingSession {
    pub id: String,
    pub user_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: Option<u64>,
    #[serde(default)]
    pub goal_duration_seconds: Option<u64>,
    pub status: FastingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FastingSession {
    pub fn is_active(&self) -> bool {
        self.status == FastingStatus::Active
    }

    /// Seconds since the fast started, or its recorded length once it ended.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> u64 {
        if let Some(duration) = self.duration_seconds {
            return duration;
        }
        let until = self.end_time.unwrap_or(now);
        until
            .signed_duration_since(self.start_time)
            .num_seconds()
            .max(0) as u64
    }

    pub fn goal_reached(&self, now: DateTime<Utc>) -> bool {
        self.goal_duration_seconds
            .map(|goal| self.elapsed_seconds(now) >= goal)
            .unwrap_or(false)
    }

    pub fn to_draft(&self) -> NewFast {
        NewFast {
            start_time: self.start_time,
            goal_duration_seconds: self.goal_duration_seconds,
            status: self.status,
        }
    }
}

/// Insert payload for a new fast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewFast {
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub goal_duration_seconds: Option<u64>,
    pub status: FastingStatus,
}

/// Terminal write against an existing fast. Both carry the local end time so
/// a replay writes the same row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FastingUpdate {
    End {
        end_time: DateTime<Utc>,
        duration_seconds: u64,
    },
    Cancel {
        end_time: DateTime<Utc>,
    },
}

impl FastingUpdate {
    pub fn apply_to(&self, fast: &mut FastingSession, updated_at: DateTime<Utc>) {
        match self {
            FastingUpdate::End {
                end_time,
                duration_seconds,
            } => {
                fast.status = FastingStatus::Completed;
                fast.end_time = Some(*end_time);
                fast.duration_seconds = Some(*duration_seconds);
            }
            FastingUpdate::Cancel { end_time } => {
                fast.status = FastingStatus::Cancelled;
                fast.end_time = Some(*end_time);
            }
        }
        fast.updated_at = updated_at;
    }

    pub fn to_columns(&self) -> serde_json::Value {
        match self {
            FastingUpdate::End {
                end_time,
                duration_seconds,
            } => serde_json::json!({
                "status": FastingStatus::Completed.as_str(),
                "end_time": end_time,
                "duration_seconds": duration_seconds,
            }),
            FastingUpdate::Cancel { end_time } => serde_json::json!({
                "status": FastingStatus::Cancelled.as_str(),
                "end_time": end_time,
            }),
        }
    }
}
