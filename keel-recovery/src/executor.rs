//! Recovery executor.
//!
//! Drives one failure through the recovery state machine:
//!
//! ```text
//! Attempting --Retry--> Retrying --exhausted--> Escalating --> Recovered | Failed
//!     |                    '--success--> Recovered
//!     |--Compensate/Rollback--> Escalating
//!     |--ManualIntervention--> Failed
//!     '--Ignore--> Recovered
//! ```
//!
//! Escalation calls the recovery boundary exactly once, guarded by the
//! compensation ledger so a redelivered failure is never compensated twice.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use keel_core::{
    ErrorContext, RecoveryAction, RecoveryConfig, RecoveryRequest, RecoveryResult, RemoteError,
};
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::boundary::RecoveryBoundary;
use crate::ledger::CompensationLedger;
use crate::metrics::RecoveryMetrics;
use crate::notifier::InterventionNotifier;
use crate::strategy::{RecoveryEvent, RecoveryState, StrategyResolver};

/// Re-runs the operation that failed.
///
/// `attempt` is 1 for the first retry.
#[async_trait]
pub trait RetryOperation: Send + Sync {
    async fn attempt(&self, attempt: u32) -> Result<(), RemoteError>;
}

#[async_trait]
impl<F, Fut> RetryOperation for F
where
    F: Fn(u32) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), RemoteError>> + Send + 'static,
{
    async fn attempt(&self, attempt: u32) -> Result<(), RemoteError> {
        (self)(attempt).await
    }
}

/// Executes recovery actions for classified failures.
pub struct RecoveryExecutor {
    config: RecoveryConfig,
    resolver: StrategyResolver,
    backoff: Backoff,
    boundary: Arc<dyn RecoveryBoundary>,
    notifier: Arc<dyn InterventionNotifier>,
    ledger: CompensationLedger,
    metrics: Arc<RecoveryMetrics>,
}

impl RecoveryExecutor {
    pub fn new(
        config: RecoveryConfig,
        boundary: Arc<dyn RecoveryBoundary>,
        notifier: Arc<dyn InterventionNotifier>,
    ) -> Self {
        Self {
            resolver: StrategyResolver::new(&config),
            backoff: Backoff::from_config(&config),
            ledger: CompensationLedger::with_limits(config.ledger_ttl, config.ledger_capacity),
            config,
            boundary,
            notifier,
            metrics: Arc::new(RecoveryMetrics::new()),
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn resolve(&self, context: &ErrorContext) -> RecoveryAction {
        self.resolver.resolve(context.error_kind)
    }

    pub fn ledger(&self) -> &CompensationLedger {
        &self.ledger
    }

    pub fn metrics(&self) -> &Arc<RecoveryMetrics> {
        &self.metrics
    }

    /// Run the recovery chain for `context`.
    ///
    /// `retry` re-runs the original operation; without it a `Retry` action
    /// escalates straight to compensation. Never returns an error: every
    /// failure of the chain itself is reported in the result.
    pub async fn execute(
        &self,
        context: ErrorContext,
        retry: Option<&dyn RetryOperation>,
    ) -> RecoveryResult {
        RecoveryMetrics::bump(&self.metrics.recoveries_started);
        let action = self.resolve(&context);
        info!(
            error_kind = %context.error_kind,
            operation = %context.operation,
            action = %action,
            retry_count = context.retry_count,
            "Starting recovery"
        );

        let mut state = RecoveryState::Attempting;
        advance(&mut state, RecoveryEvent::Resolved(action), &context);

        let result = match action {
            RecoveryAction::Ignore => RecoveryResult::ignored(format!(
                "Ignored {} failure in {}",
                context.error_kind, context.operation
            )),
            RecoveryAction::ManualIntervention => {
                RecoveryMetrics::bump(&self.metrics.manual_interventions);
                self.alert(&context, "no automatic recovery for this failure")
                    .await;
                RecoveryResult::manual_intervention(
                    context.error_kind.user_message(),
                    Some(context.original_message.clone()),
                )
            }
            RecoveryAction::Retry => {
                let attempts = match retry {
                    Some(op) => self.retry(&context, op, &mut state).await,
                    None => Err(0),
                };
                match attempts {
                    Ok(attempt) => RecoveryResult::retried(attempt),
                    Err(attempts) => {
                        advance(&mut state, RecoveryEvent::RetriesExhausted, &context);
                        self.escalate(&context, RecoveryAction::Compensate, attempts, &mut state)
                            .await
                    }
                }
            }
            RecoveryAction::Compensate | RecoveryAction::Rollback => {
                self.escalate(&context, action, 0, &mut state).await
            }
        };

        if result.recovered {
            RecoveryMetrics::bump(&self.metrics.recovered);
        } else {
            RecoveryMetrics::bump(&self.metrics.failed);
        }
        info!(
            error_kind = %context.error_kind,
            operation = %context.operation,
            state = %state,
            success = result.success,
            recovered = result.recovered,
            compensation_applied = result.compensation_applied,
            attempts = result.attempts,
            "Recovery finished"
        );
        result
    }

    /// Retry with backoff. `Ok(n)` when attempt `n` succeeded, `Err(n)`
    /// after `n` failed attempts.
    async fn retry(
        &self,
        context: &ErrorContext,
        op: &dyn RetryOperation,
        state: &mut RecoveryState,
    ) -> Result<u32, u32> {
        let max = self.config.max_retry_attempts;
        for attempt in 1..=max {
            let delay = self.backoff.delay_for_attempt(attempt);
            debug!(
                operation = %context.operation,
                attempt,
                max_attempts = max,
                delay_ms = delay.as_millis() as u64,
                "Retrying after delay"
            );
            tokio::time::sleep(delay).await;
            RecoveryMetrics::bump(&self.metrics.retries);

            match op.attempt(attempt).await {
                Ok(()) => {
                    advance(state, RecoveryEvent::AttemptSucceeded, context);
                    return Ok(attempt);
                }
                Err(e) => {
                    warn!(
                        operation = %context.operation,
                        attempt,
                        error = %e,
                        "Retry attempt failed"
                    );
                    if attempt < max {
                        advance(state, RecoveryEvent::AttemptFailed, context);
                    }
                }
            }
        }
        Err(max)
    }

    /// One boundary call for `action`, unless the ledger already holds a
    /// successful compensation for this failure.
    async fn escalate(
        &self,
        context: &ErrorContext,
        action: RecoveryAction,
        prior_attempts: u32,
        state: &mut RecoveryState,
    ) -> RecoveryResult {
        let mut entry = self.ledger.entry(context).await;
        if let Some(recorded) = entry.recorded() {
            RecoveryMetrics::bump(&self.metrics.compensations_deduplicated);
            info!(
                operation = %context.operation,
                idempotency_key = entry.key(),
                "Compensation already applied, skipping boundary call"
            );
            advance(state, RecoveryEvent::BoundarySucceeded, context);
            return recorded.clone();
        }

        let mut request = RecoveryRequest::from_context(context, action);
        request.retry_count = context.retry_count + prior_attempts;
        debug!(
            operation = %context.operation,
            action = %action,
            idempotency_key = entry.key(),
            "Calling recovery boundary"
        );

        match self.boundary.recover(request).await {
            Ok(response) => {
                let result = RecoveryResult {
                    success: response.success,
                    action: response.action,
                    attempts: prior_attempts + response.attempts,
                    recovered: response.success && response.recovered,
                    compensation_applied: response.success,
                    message: response.message,
                    error: response.error,
                };
                if result.compensation_applied {
                    RecoveryMetrics::bump(&self.metrics.compensations_applied);
                    entry.record(&result);
                    advance(state, RecoveryEvent::BoundarySucceeded, context);
                } else {
                    advance(state, RecoveryEvent::BoundaryFailed, context);
                    warn!(
                        operation = %context.operation,
                        action = %action,
                        error = ?result.error,
                        "Recovery boundary declined"
                    );
                    self.alert(context, "recovery boundary declined").await;
                }
                result
            }
            Err(e) => {
                RecoveryMetrics::bump(&self.metrics.boundary_errors);
                RecoveryMetrics::bump(&self.metrics.manual_interventions);
                advance(state, RecoveryEvent::BoundaryFailed, context);
                error!(
                    operation = %context.operation,
                    action = %action,
                    error = %e,
                    "Recovery boundary unavailable"
                );
                self.alert(context, "recovery boundary unavailable").await;
                RecoveryResult {
                    attempts: prior_attempts,
                    ..RecoveryResult::manual_intervention(
                        "Automatic recovery failed; manual intervention required",
                        Some(e.to_string()),
                    )
                }
            }
        }
    }

    async fn alert(&self, context: &ErrorContext, reason: &str) {
        if !self.config.notify_on_manual_intervention {
            return;
        }
        if let Err(e) = self.notifier.notify(context, reason).await {
            warn!(operation = %context.operation, error = %e, "Failed to notify operator");
        }
    }
}

fn advance(state: &mut RecoveryState, event: RecoveryEvent, context: &ErrorContext) {
    match state.on(event) {
        Ok(next) => {
            debug!(
                operation = %context.operation,
                from = %state,
                to = %next,
                "Recovery transition"
            );
            *state = next;
        }
        Err(e) => {
            error!(operation = %context.operation, error = %e, "Recovery state machine violated");
            *state = RecoveryState::Failed;
        }
    }
}
