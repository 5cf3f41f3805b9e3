//! Buffer lifecycle and pacing: tracker, session, driver and the sink
//! notification channel.

pub mod driver;
pub mod events;
pub mod runner;
pub mod session;
pub mod tracker;

pub use driver::{DriverState, PacingConfig, PlaybackDriver, RunStats};
pub use events::{EventCounts, RenderEvent};
pub use session::AudioSession;
pub use tracker::{BufferTracker, Rejected};
