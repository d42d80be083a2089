pub mod commands;
pub mod controller;
pub mod fasting;
pub mod slot;
pub mod state;

pub use commands::{dispatch, view, CommandError, IntentOutcome, SessionIntent, SessionView};
pub use controller::{Applied, SessionController};
pub use fasting::FastingController;
pub use slot::{ActiveFastSlot, ActiveSessionSlot, ActiveSlot, SlotRecord};
pub use state::{BodyMetrics, EndRequest};
