//! KEEL Recovery - Error Classification and Recovery Execution
//!
//! Turns a failed remote operation into a recovery outcome:
//!
//! 1. [`ErrorClassifier`] maps the raw failure to an [`ErrorKind`](keel_core::ErrorKind)
//! 2. [`StrategyResolver`] picks the [`RecoveryAction`](keel_core::RecoveryAction)
//! 3. [`RecoveryExecutor`] retries with [`Backoff`], or escalates to the
//!    [`RecoveryBoundary`], or hands the failure to an
//!    [`InterventionNotifier`]
//!
//! The executor never panics and never returns an error; every outcome,
//! including an unreachable boundary, is a [`RecoveryResult`](keel_core::RecoveryResult).

pub mod backoff;
pub mod boundary;
pub mod classifier;
pub mod executor;
pub mod ledger;
pub mod metrics;
pub mod notifier;
pub mod service;
pub mod strategy;

pub use backoff::Backoff;
pub use boundary::RecoveryBoundary;
pub use classifier::ErrorClassifier;
pub use executor::{RecoveryExecutor, RetryOperation};
pub use ledger::{idempotency_key, CompensationLedger, LedgerEntry};
pub use metrics::{RecoveryMetrics, RecoveryMetricsSnapshot};
pub use notifier::{InterventionNotifier, TracingNotifier};
pub use service::RecoveryService;
pub use strategy::{default_action, RecoveryEvent, RecoveryState, StrategyResolver};
