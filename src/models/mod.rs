pub mod fasting;
pub mod operation;
pub mod profile;
pub mod session;

pub use fasting::{FastingSession, FastingStatus, FastingUpdate, NewFast};
pub use operation::{EntityKind, OperationAction, OperationPayload, QueuedOperation};
pub use profile::Profile;
pub use session::{
    Completion, NewSession, SessionState, SessionStatus, SessionUpdate, WalkingSession,
};
