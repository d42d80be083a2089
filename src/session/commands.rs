//! Boundary the UI talks to: serializable intents in, serializable results out.

use serde::{Deserialize, Serialize};

use crate::{
    error::SessionError,
    models::WalkingSession,
};

use super::{
    controller::{Applied, SessionController},
    state::EndRequest,
};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum SessionIntent {
    Load,
    Start {
        #[serde(default)]
        speed_mph: Option<f64>,
    },
    Pause,
    Resume,
    End {
        #[serde(default)]
        manual_duration_minutes: Option<u64>,
        #[serde(default)]
        edit_reason: Option<String>,
    },
    Cancel {
        #[serde(default)]
        reason: Option<String>,
    },
    UpdateSpeed {
        speed_mph: f64,
    },
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Confirmed,
    Pending,
    /// Nothing was written, e.g. a load.
    Local,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IntentOutcome {
    pub session: Option<WalkingSession>,
    pub sync: SyncStatus,
    pub operation_id: Option<String>,
    pub persisted: bool,
    pub pending_operations: usize,
    /// Completed too quickly to count; shown as cancelled.
    pub too_short: bool,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandErrorKind {
    Validation,
    Rejected,
    Storage,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CommandError {
    pub kind: CommandErrorKind,
    pub message: String,
    /// Retrying the same intent later may succeed.
    pub recoverable: bool,
}

impl From<SessionError> for CommandError {
    fn from(err: SessionError) -> Self {
        let (kind, recoverable) = if err.is_validation() {
            (CommandErrorKind::Validation, false)
        } else if matches!(err, SessionError::Remote(_)) {
            (CommandErrorKind::Rejected, true)
        } else {
            (CommandErrorKind::Storage, true)
        };
        Self {
            kind,
            message: err.to_string(),
            recoverable,
        }
    }
}

/// What the UI renders: the session, the loading flag and the sync banner.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionView {
    pub session: Option<WalkingSession>,
    pub loading: bool,
    pub pending_operations: usize,
    pub is_online: bool,
    pub is_connected: bool,
    pub elapsed_seconds: u64,
}

pub fn view(controller: &SessionController) -> SessionView {
    let services = controller.services();
    let connection = services.monitor.state();
    SessionView {
        session: controller.current(),
        loading: controller.is_loading(),
        pending_operations: services.queue.pending_count(),
        is_online: connection.is_online,
        is_connected: connection.is_connected,
        elapsed_seconds: controller.elapsed_seconds(),
    }
}

fn outcome(controller: &SessionController, applied: Applied<Option<WalkingSession>>) -> IntentOutcome {
    let pending_operations = controller.services().queue.pending_count();
    let (session, sync, operation_id, persisted) = match applied {
        Applied::Confirmed(session) => (session, SyncStatus::Confirmed, None, true),
        Applied::Pending {
            value,
            operation_id,
            persisted,
        } => (value, SyncStatus::Pending, Some(operation_id), persisted),
    };
    IntentOutcome {
        too_short: session.as_ref().map(|s| s.is_too_short()).unwrap_or(false),
        session,
        sync,
        operation_id,
        persisted,
        pending_operations,
    }
}

fn some(applied: Applied<WalkingSession>) -> Applied<Option<WalkingSession>> {
    match applied {
        Applied::Confirmed(session) => Applied::Confirmed(Some(session)),
        Applied::Pending {
            value,
            operation_id,
            persisted,
        } => Applied::Pending {
            value: Some(value),
            operation_id,
            persisted,
        },
    }
}

pub async fn dispatch(
    controller: &SessionController,
    intent: SessionIntent,
) -> Result<IntentOutcome, CommandError> {
    let applied = match intent {
        SessionIntent::Load => {
            let session = controller.load_active_session().await?;
            return Ok(IntentOutcome {
                too_short: false,
                session,
                sync: SyncStatus::Local,
                operation_id: None,
                persisted: true,
                pending_operations: controller.services().queue.pending_count(),
            });
        }
        SessionIntent::Start { speed_mph } => some(controller.start(speed_mph).await?),
        SessionIntent::Pause => some(controller.pause().await?),
        SessionIntent::Resume => some(controller.resume().await?),
        SessionIntent::End {
            manual_duration_minutes,
            edit_reason,
        } => some(
            controller
                .end(EndRequest {
                    manual_duration_minutes,
                    edit_reason,
                })
                .await?,
        ),
        SessionIntent::Cancel { reason } => match controller.cancel(reason).await? {
            Applied::Confirmed(()) => Applied::Confirmed(None),
            Applied::Pending {
                operation_id,
                persisted,
                ..
            } => Applied::Pending {
                value: None,
                operation_id,
                persisted,
            },
        },
        SessionIntent::UpdateSpeed { speed_mph } => {
            some(controller.update_speed(speed_mph).await?)
        }
    };
    Ok(outcome(controller, applied))
}
