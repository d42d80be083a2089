use thiserror::Error;

/// Failure reported by the remote persistence collaborator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RemoteError {
    /// The request never reached the server (DNS, connect, timeout, reset).
    #[error("network error: {0}")]
    Network(String),

    /// The server answered but refused the write.
    #[error("remote rejected request ({status:?}): {message}")]
    Rejected {
        status: Option<u16>,
        message: String,
    },

    #[error("remote record not found: {0}")]
    NotFound(String),

    #[error("failed to decode remote response: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn is_network(&self) -> bool {
        matches!(self, RemoteError::Network(_))
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a session is already active ({0})")]
    AlreadyActive(String),

    #[error("no active session")]
    NoActiveSession,

    #[error("session {0} is not active")]
    NotActive(String),

    #[error("session {0} is not paused")]
    NotPaused(String),

    #[error("session {0} is already completed")]
    AlreadyCompleted(String),

    #[error("invalid walking speed {0}")]
    InvalidSpeed(f64),

    #[error("invalid manual duration: {0} minutes")]
    InvalidDuration(u64),

    #[error("invalid fasting goal: {0} seconds")]
    InvalidGoal(u64),

    #[error("start time {0} is in the future")]
    InvalidStartTime(chrono::DateTime<chrono::Utc>),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl SessionError {
    /// Errors caused by calling an operation in the wrong state or with bad input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SessionError::AlreadyActive(_)
                | SessionError::NoActiveSession
                | SessionError::NotActive(_)
                | SessionError::NotPaused(_)
                | SessionError::AlreadyCompleted(_)
                | SessionError::InvalidSpeed(_)
                | SessionError::InvalidDuration(_)
                | SessionError::InvalidGoal(_)
                | SessionError::InvalidStartTime(_)
        )
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_validation_and_network_errors() {
        assert!(SessionError::NoActiveSession.is_validation());
        assert!(!SessionError::Remote(RemoteError::Network("reset".into())).is_validation());
        assert!(RemoteError::Network("timeout".into()).is_network());
        assert!(!RemoteError::Rejected {
            status: Some(403),
            message: "denied".into()
        }
        .is_network());
    }
}
