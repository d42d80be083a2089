//! Offline-tolerant sync core for walking and fasting sessions.
//!
//! Session transitions are applied locally first, sent to the server when it
//! is reachable and queued in a durable outbox when it is not. The outbox is
//! replayed in order once connectivity returns.

pub mod cache;
pub mod clock;
pub mod connectivity;
pub mod context;
pub mod error;
pub mod models;
pub mod outbox;
pub mod remote;
pub mod session;
pub mod settings;
pub mod store;
pub mod sync;
pub mod utils;

pub use clock::{Clock, ManualClock, SystemClock};
pub use connectivity::{ConnectionState, ConnectivityMonitor, Transition};
pub use context::{SyncContext, SyncServices, SyncTrigger};
pub use error::{RemoteError, SessionError, SessionResult};
pub use models::{FastingSession, QueuedOperation, WalkingSession};
pub use outbox::{IdMap, OperationQueue};
pub use remote::{MemoryRemote, RemoteStore, SupabaseRemote};
pub use session::{
    Applied, EndRequest, FastingController, SessionController, SessionIntent, SessionView,
};
pub use settings::{SettingsStore, SyncSettings};
pub use store::{Database, DurableStore, MemoryStore};
pub use sync::{DrainReport, SyncReconciler};
pub use utils::init_logging;
