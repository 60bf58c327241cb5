//! KEEL Mutation - Optimistic Mutation Coordination
//!
//! Applies a change to the local cache before the remote store confirms it,
//! then either commits the confirmed value or restores the snapshot and
//! hands the failure to the recovery pipeline.
//!
//! ```text
//! mutate(key) ──► lock(key) ──► snapshot ──► optimistic write ──► remote call
//!                                                                   │
//!                      ┌────────────── ok ──────────────────────────┤
//!                      ▼                                            ▼ err
//!                 commit + broadcast                 rollback + classify
//!                                                                   │
//!                                             background recovery ◄─┘
//! ```
//!
//! [`Keel`] wires one store, broadcaster, executor and coordinator together.

pub mod coordinator;
pub mod keel;
pub mod locks;
pub mod operation;
pub mod outcome;
pub mod phase;
pub mod telemetry;

pub use coordinator::{MutationCoordinator, MutationRequest};
pub use keel::Keel;
pub use locks::{KeyGuard, KeyLocks};
pub use operation::RemoteOperation;
pub use outcome::{MutationOutcome, PendingRecovery};
pub use phase::{MutationPhase, PhaseGuard, PhaseTracker};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
