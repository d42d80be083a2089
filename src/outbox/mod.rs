pub mod id_map;
pub mod queue;

pub use id_map::{IdMap, IdMapping};
pub use queue::{EnqueueReceipt, OperationQueue};
