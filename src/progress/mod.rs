pub mod error;
pub mod event_bus;
pub mod state;
pub mod tracker;

pub use error::ProgressError;
pub use event_bus::{EventBus, Subscription};
pub use state::{Event, SourceProgress, SourceState};
pub use tracker::{ProgressDelta, ProgressTracker};
