//! Compensation ledger.
//!
//! Records every successful compensation or rollback under an idempotency
//! key derived from the failure it answered. A redelivery of the same
//! failure returns the recorded result instead of calling the boundary
//! again; a new failure of the same operation on the same entity carries a
//! new `failure_id` and is compensated on its own. Each key has its own
//! async lock, so concurrent escalations for one failure are serialized
//! and only the first reaches the boundary.
//!
//! Recorded results expire after the configured TTL. Once the ledger holds
//! `capacity` entries, expired and unused ones are evicted on the next
//! lookup.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use keel_core::constants::{DEFAULT_LEDGER_CAPACITY, DEFAULT_LEDGER_TTL_SECS};
use keel_core::{ErrorContext, RecoveryResult};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct Recorded {
    result: RecoveryResult,
    recorded_at: Instant,
}

impl Recorded {
    fn is_live(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.recorded_at) < ttl
    }
}

type Slot = Arc<Mutex<Option<Recorded>>>;

/// Idempotency key for a failure: SHA-256 over failure id, kind, operation,
/// entity and user, hex encoded.
pub fn idempotency_key(context: &ErrorContext) -> String {
    let mut hasher = Sha256::new();
    hasher.update(context.failure_id.as_bytes());
    hasher.update(b"|");
    hasher.update(context.error_kind.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(context.operation.as_bytes());
    hasher.update(b"|");
    hasher.update(context.related_entity_id.as_deref().unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(context.related_user_id.as_deref().unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}

/// Exclusive access to one ledger entry.
pub struct LedgerEntry {
    key: String,
    ttl: Duration,
    guard: OwnedMutexGuard<Option<Recorded>>,
}

impl LedgerEntry {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Result of an earlier successful compensation that has not expired.
    pub fn recorded(&self) -> Option<&RecoveryResult> {
        self.guard
            .as_ref()
            .filter(|recorded| recorded.is_live(self.ttl, Instant::now()))
            .map(|recorded| &recorded.result)
    }

    /// Record a result. Only results with `compensation_applied` are kept.
    pub fn record(&mut self, result: &RecoveryResult) {
        if result.compensation_applied {
            *self.guard = Some(Recorded {
                result: result.clone(),
                recorded_at: Instant::now(),
            });
        }
    }
}

#[derive(Debug)]
pub struct CompensationLedger {
    slots: DashMap<String, Slot>,
    ttl: Duration,
    capacity: usize,
}

impl Default for CompensationLedger {
    fn default() -> Self {
        Self::with_limits(
            Duration::from_secs(DEFAULT_LEDGER_TTL_SECS),
            DEFAULT_LEDGER_CAPACITY,
        )
    }
}

impl CompensationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(ttl: Duration, capacity: usize) -> Self {
        Self {
            slots: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Lock the entry for `context`, waiting for any escalation in flight.
    pub async fn entry(&self, context: &ErrorContext) -> LedgerEntry {
        if self.slots.len() >= self.capacity {
            self.evict();
        }
        let key = idempotency_key(context);
        let slot = Arc::clone(self.slots.entry(key.clone()).or_default().value());
        LedgerEntry {
            key,
            ttl: self.ttl,
            guard: slot.lock_owned().await,
        }
    }

    /// Recorded result for `context`, without waiting on in-flight work.
    pub fn lookup(&self, context: &ErrorContext) -> Option<RecoveryResult> {
        let slot = self.slots.get(&idempotency_key(context))?;
        let guard = slot.try_lock().ok()?;
        let result = guard
            .as_ref()
            .filter(|recorded| recorded.is_live(self.ttl, Instant::now()))
            .map(|recorded| recorded.result.clone());
        result
    }

    /// Drop entries that are expired or empty and that no escalation holds.
    pub fn evict(&self) {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            let keep = match slot.try_lock() {
                Ok(guard) => guard.as_ref().is_some_and(|recorded| recorded.is_live(self.ttl, now)),
                Err(_) => true,
            };
            keep
        });
        debug!(
            evicted = before.saturating_sub(self.slots.len()),
            remaining = self.slots.len(),
            "Compensation ledger evicted stale entries"
        );
    }

    /// Number of failures with a live recorded compensation. Entries locked
    /// by an escalation in flight are not counted.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots
            .iter()
            .filter(|slot| {
                slot.try_lock()
                    .map(|g| g.as_ref().is_some_and(|r| r.is_live(self.ttl, now)))
                    .unwrap_or(false)
            })
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots currently tracked, recorded or not.
    pub fn tracked(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{ErrorKind, RecoveryAction};

    fn context() -> ErrorContext {
        ErrorContext::new(ErrorKind::PaymentFailed, "process_payment", "card declined")
            .with_entity("order-1")
            .with_user("user-1")
    }

    fn applied() -> RecoveryResult {
        RecoveryResult {
            success: true,
            action: RecoveryAction::Compensate,
            attempts: 1,
            recovered: true,
            compensation_applied: true,
            message: "refunded".to_string(),
            error: None,
        }
    }

    #[test]
    fn test_key_ignores_message_and_retry_count() {
        let first = context();
        let second = ErrorContext {
            original_message: "different text".to_string(),
            retry_count: 3,
            ..first.clone()
        };
        assert_eq!(idempotency_key(&first), idempotency_key(&second));
        assert_eq!(idempotency_key(&first).len(), 64);

        let other_user = first.clone().with_user("user-2");
        assert_ne!(idempotency_key(&first), idempotency_key(&other_user));
    }

    #[test]
    fn test_new_failure_of_same_operation_gets_new_key() {
        assert_ne!(idempotency_key(&context()), idempotency_key(&context()));
    }

    #[tokio::test]
    async fn test_records_only_applied_compensations() {
        let ledger = CompensationLedger::new();
        let ctx = context();
        {
            let mut entry = ledger.entry(&ctx).await;
            assert!(entry.recorded().is_none());
            entry.record(&RecoveryResult {
                compensation_applied: false,
                ..applied()
            });
        }
        assert!(ledger.lookup(&ctx).is_none());
        assert!(ledger.is_empty());

        {
            let mut entry = ledger.entry(&ctx).await;
            entry.record(&applied());
        }
        assert_eq!(ledger.lookup(&ctx), Some(applied()));
        assert_eq!(ledger.len(), 1);
        assert!(ledger.lookup(&context()).is_none());
    }

    #[tokio::test]
    async fn test_entry_waits_for_holder() {
        let ledger = Arc::new(CompensationLedger::new());
        let ctx = context();
        let mut first = ledger.entry(&ctx).await;

        let waiter = {
            let ledger = Arc::clone(&ledger);
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let entry = ledger.entry(&ctx).await;
                let recorded = entry.recorded().cloned();
                recorded
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        first.record(&applied());
        drop(first);
        assert_eq!(waiter.await.unwrap(), Some(applied()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recorded_result_expires() {
        let ledger = CompensationLedger::with_limits(Duration::from_secs(60), 16);
        let ctx = context();
        ledger.entry(&ctx).await.record(&applied());
        assert_eq!(ledger.lookup(&ctx), Some(applied()));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(ledger.lookup(&ctx).is_none());
        assert!(ledger.entry(&ctx).await.recorded().is_none());
        assert!(ledger.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_ledger_evicts_expired_and_empty_entries() {
        let ledger = CompensationLedger::with_limits(Duration::from_secs(60), 4);
        let old = context();
        ledger.entry(&old).await.record(&applied());
        for _ in 0..3 {
            // Declined compensations leave empty slots behind.
            let _ = ledger.entry(&context()).await;
        }
        assert_eq!(ledger.tracked(), 4);

        tokio::time::advance(Duration::from_secs(61)).await;
        let fresh = context();
        ledger.entry(&fresh).await.record(&applied());

        assert_eq!(ledger.tracked(), 1);
        assert_eq!(ledger.lookup(&fresh), Some(applied()));
        assert!(ledger.lookup(&old).is_none());
    }
}
