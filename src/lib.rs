pub mod analysis;
pub mod config;
pub mod error;
pub mod events;
pub mod form;
pub mod logging;
pub mod pose;
pub mod profile;
pub mod protocol;
pub mod runtime;
pub mod session;
pub mod tracker;

pub use error::{PipelineError, Result};
pub use events::{FeedbackEvent, TrackingLossReason};
pub use profile::ExerciseProfile;
pub use session::Session;
