//! Auto-Brancher core
//!
//! Reacts to "package published" notifications by creating a branch named
//! after the package and version in a downstream repository, exactly once.
//!
//! ```text
//! envelope ─► resolver ─► credentials ─► workspace ─► git ─► Outcome
//! ```
//!
//! The [`NotificationHandler`] drives one event through that pipeline under
//! a wall-clock budget. Repeated or concurrent deliveries of the same event
//! converge on one branch: names are deterministic and the remote is
//! checked before any push.

pub mod config;
pub mod credentials;
pub mod domain;
pub mod envelope;
pub mod fakes;
pub mod git;
pub mod handler;
pub mod metrics;
pub mod obs;
pub mod resolver;
pub mod telemetry;
pub mod workspace;

pub use config::{BrancherConfig, ConfigError, RepositoryTarget, DEFAULT_SECRET_ID, DEFAULT_TIMEOUT};
pub use credentials::{CredentialError, CredentialProvider, DeployKey, KeyFile};
pub use domain::{
    BaseRef, BranchSpec, FailureKind, Outcome, PublishEvent, Stage, ValidationError, Version,
};
pub use envelope::{parse_envelope, Notification};
pub use git::{GitCli, GitError, GitOperator, GitResult, PushStatus};
pub use handler::{requires_redelivery, NotificationHandler};
pub use resolver::{branch_name, slugify, BranchResolver, MAX_PACKAGE_SLUG};
pub use telemetry::{init_tracing, LogFormat};
pub use workspace::{Workspace, WorkspaceError, WorkspaceManager};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
