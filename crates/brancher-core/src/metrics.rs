//! Process-wide counters for invocation outcomes.
//!
//! Incremented silently by the handler; [`Metrics::flush`] emits the current
//! values as one `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::Outcome;

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    events_received: AtomicU64,
    branches_created: AtomicU64,
    already_satisfied: AtomicU64,
    failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            events_received: AtomicU64::new(0),
            branches_created: AtomicU64::new(0),
            already_satisfied: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn inc_events_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "events_received", "counter incremented");
    }

    /// Count a finished invocation under its outcome.
    pub fn record(&self, outcome: &Outcome) {
        let (counter, name) = match outcome {
            Outcome::Success { .. } => (&self.branches_created, "branches_created"),
            Outcome::AlreadySatisfied { .. } => (&self.already_satisfied, "already_satisfied"),
            Outcome::Failed { .. } => (&self.failures, "failures"),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = name, "counter incremented");
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            events_received = self.events_received(),
            branches_created = self.branches_created(),
            already_satisfied = self.already_satisfied(),
            failures = self.failures(),
        );
    }

    pub fn events_received(&self) -> u64 {
        self.events_received.load(Ordering::Relaxed)
    }

    pub fn branches_created(&self) -> u64 {
        self.branches_created.load(Ordering::Relaxed)
    }

    pub fn already_satisfied(&self) -> u64 {
        self.already_satisfied.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}
