pub mod reconciler;

pub use reconciler::{DrainReport, SyncReconciler};
