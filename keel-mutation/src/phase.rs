//! Mutation phases.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use keel_cache::CacheKey;
use serde::{Deserialize, Serialize};

/// Where the active mutation on a key currently is.
///
/// `Idle -> Snapshotting -> OptimisticallyApplied -> (Committing | RollingBack) -> Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationPhase {
    #[default]
    Idle,
    Snapshotting,
    OptimisticallyApplied,
    Committing,
    RollingBack,
}

impl MutationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationPhase::Idle => "idle",
            MutationPhase::Snapshotting => "snapshotting",
            MutationPhase::OptimisticallyApplied => "optimistically_applied",
            MutationPhase::Committing => "committing",
            MutationPhase::RollingBack => "rolling_back",
        }
    }
}

impl fmt::Display for MutationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Current phase of every key with an active mutation.
#[derive(Debug, Default)]
pub struct PhaseTracker {
    phases: DashMap<CacheKey, MutationPhase>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self, key: &CacheKey) -> MutationPhase {
        self.phases.get(key).map(|p| *p).unwrap_or_default()
    }

    /// Start tracking `key`; the key returns to `Idle` when the guard drops.
    pub fn track(self: &Arc<Self>, key: CacheKey) -> PhaseGuard {
        PhaseGuard {
            tracker: Arc::clone(self),
            key,
        }
    }
}

/// Moves one key through its phases and resets it on drop.
#[derive(Debug)]
pub struct PhaseGuard {
    tracker: Arc<PhaseTracker>,
    key: CacheKey,
}

impl PhaseGuard {
    pub fn enter(&self, phase: MutationPhase) {
        tracing::trace!(key = %self.key, phase = %phase, "Mutation phase");
        self.tracker.phases.insert(self.key.clone(), phase);
    }
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        self.tracker.phases.remove(&self.key);
    }
}
