//! Liveness signalling
//!
//! The engine reports through a [`HealthSink`] whenever its liveness changes.
//! Problems are tracked per partition so that one recovering partition does not
//! hide another that is still failing.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

use crate::partition::PartitionKey;

/// Liveness of the checkpoint engine
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LivenessStatus {
    #[default]
    Healthy,

    /// Not making durable progress; contains a description of why
    Unhealthy(String),
}

impl LivenessStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, LivenessStatus::Healthy)
    }
}

impl fmt::Display for LivenessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LivenessStatus::Healthy => write!(f, "Healthy"),
            LivenessStatus::Unhealthy(reason) => write!(f, "Unhealthy: {}", reason),
        }
    }
}

/// Receiver of liveness changes, typically a health endpoint
pub trait HealthSink: Send + Sync {
    fn report(&self, status: &LivenessStatus);
}

/// Sink that keeps the latest status and every transition for inspection
#[derive(Clone, Default)]
pub struct SharedHealth {
    inner: Arc<Mutex<Vec<LivenessStatus>>>,
}

impl SharedHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest reported status; healthy before the first report
    pub fn status(&self) -> LivenessStatus {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_healthy(&self) -> bool {
        self.status().is_healthy()
    }

    /// Every status reported so far, oldest first
    pub fn history(&self) -> Vec<LivenessStatus> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl HealthSink for SharedHealth {
    fn report(&self, status: &LivenessStatus) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(status.clone());
    }
}

/// Why a partition currently keeps the engine unhealthy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivenessProblem {
    /// Prior checkpoint could not be loaded on assignment
    AssignmentFailed(String),

    /// Unsynced state outlived the configured maximum age
    Stale { age: Duration, error: String },
}

impl fmt::Display for LivenessProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LivenessProblem::AssignmentFailed(error) => write!(f, "assignment failed: {}", error),
            LivenessProblem::Stale { age, error } => write!(
                f,
                "state unsynced for {} ({})",
                humantime_serde::re::humantime::format_duration(*age),
                error
            ),
        }
    }
}

struct TrackerState {
    problems: BTreeMap<PartitionKey, LivenessProblem>,
    reported: LivenessStatus,
}

/// Aggregates per-partition problems into one status and forwards changes
pub(crate) struct LivenessTracker {
    sink: Arc<dyn HealthSink>,
    state: Mutex<TrackerState>,
}

impl LivenessTracker {
    pub(crate) fn new(sink: Arc<dyn HealthSink>) -> Self {
        Self {
            sink,
            state: Mutex::new(TrackerState {
                problems: BTreeMap::new(),
                reported: LivenessStatus::Healthy,
            }),
        }
    }

    /// Record a problem for `key`; the first one sticks until cleared
    pub(crate) fn raise(&self, key: &PartitionKey, problem: LivenessProblem) {
        self.update(|problems| {
            problems.entry(key.clone()).or_insert(problem);
        });
    }

    pub(crate) fn clear(&self, key: &PartitionKey) {
        self.update(|problems| {
            problems.remove(key);
        });
    }

    pub(crate) fn status(&self) -> LivenessStatus {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reported
            .clone()
    }

    fn update<F>(&self, change: F)
    where
        F: FnOnce(&mut BTreeMap<PartitionKey, LivenessProblem>),
    {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        change(&mut state.problems);

        let status = if state.problems.is_empty() {
            LivenessStatus::Healthy
        } else {
            let reasons: Vec<String> = state
                .problems
                .iter()
                .map(|(key, problem)| format!("{}: {}", key, problem))
                .collect();
            LivenessStatus::Unhealthy(reasons.join("; "))
        };

        if status != state.reported {
            match &status {
                LivenessStatus::Healthy => info!("Checkpoint liveness restored"),
                LivenessStatus::Unhealthy(reason) => warn!("Checkpoint liveness lost: {}", reason),
            }
            self.sink.report(&status);
            state.reported = status;
        }
    }
}
