//! Domain types for auto-brancher.

pub mod branch;
pub mod error;
pub mod event;
pub mod outcome;
pub mod version;

pub use branch::{BaseRef, BranchSpec};
pub use error::ValidationError;
pub use event::PublishEvent;
pub use outcome::{FailureKind, Outcome, Stage};
pub use version::Version;
