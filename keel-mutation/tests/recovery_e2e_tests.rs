//! End-to-end recovery scenarios for optimistic mutations.
//!
//! Each test wires a full [`Keel`] holder against the in-memory commerce
//! backend, runs a mutation whose remote call fails, and checks both the
//! synchronous local rollback and the asynchronously reported recovery.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use keel_cache::RollbackStatus;
use keel_core::{
    ErrorContext, ErrorKind, KeelResult, Metadata, RecoveryAction, RecoveryResponse, RemoteError,
};
use keel_mutation::{Keel, MutationOutcome, MutationRequest, RemoteOperation};
use keel_test_utils::assertions::assert_entry;
use keel_test_utils::fixtures::{cart_key, order_key, stocked_backend, test_config};
use keel_test_utils::{
    Cart, MockCommerceBackend, Order, OrderStatus, Payment, RecordingNotifier, ScriptedBoundary,
};

// ============================================================================
// HELPERS
// ============================================================================

fn holder<T>(backend: &MockCommerceBackend, notifier: &Arc<RecordingNotifier>) -> KeelResult<Keel<T>>
where
    T: Clone + Send + Sync + 'static,
{
    Keel::new(test_config(), Arc::new(backend.clone()), notifier.clone())
}

/// Remote op adding `quantity` of `product` to `user`'s cart, counting calls.
fn add_to_cart(
    backend: &MockCommerceBackend,
    calls: &Arc<AtomicU32>,
    user: &'static str,
    product: &'static str,
    quantity: u32,
) -> impl RemoteOperation<Cart> + 'static {
    let backend = backend.clone();
    let calls = Arc::clone(calls);
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        let backend = backend.clone();
        async move { backend.add_to_cart(user, product, quantity).await }
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn stock_insufficient_add_rolls_back_and_fails_compensation() -> KeelResult<()> {
    let backend = stocked_backend();
    let notifier = Arc::new(RecordingNotifier::new());
    let keel = holder::<Cart>(&backend, &notifier)?;
    let store = keel.store();
    store.set(cart_key("u-1"), Cart::new("u-1"))?;

    let calls = Arc::new(AtomicU32::new(0));
    let outcome = keel
        .coordinator()
        .mutate(
            MutationRequest::new(cart_key("u-1"), "add_to_cart")
                .with_entity("p-2")
                .with_user("u-1"),
            |cart| cart.cloned().unwrap_or_else(|| Cart::new("u-1")).with_line("p-2", 5),
            add_to_cart(&backend, &calls, "u-1", "p-2", 5),
        )
        .await?;

    // The local rollback is visible as soon as mutate returns.
    assert_entry(&store, &cart_key("u-1"), Some(&Cart::new("u-1")), 1);

    let MutationOutcome::RolledBack {
        error_kind,
        rollback,
        recovery,
        ..
    } = outcome
    else {
        panic!("expected a rollback");
    };
    assert_eq!(error_kind, ErrorKind::StockUpdateFailed);
    assert_eq!(rollback, RollbackStatus::Restored);

    let result = recovery.wait().await;
    assert!(!result.success);
    assert!(!result.recovered);
    assert!(!result.compensation_applied);
    assert_eq!(result.action, RecoveryAction::Compensate);

    // Domain failures are never retried.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let requests = backend.recovery_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].error_kind, ErrorKind::StockUpdateFailed);
    assert_eq!(requests[0].related_entity_id.as_deref(), Some("p-2"));
    assert_eq!(requests[0].retry_count, 0);
    assert_eq!(notifier.count(), 1);
    assert_eq!(backend.stock("p-2").map(|s| s.available), Some(2));
    Ok(())
}

#[tokio::test]
async fn payment_failure_is_compensated() -> KeelResult<()> {
    let backend = MockCommerceBackend::new();
    backend.fail_next(RemoteError::new("payment confirmation failed"));
    let notifier = Arc::new(RecordingNotifier::new());
    let keel = holder::<Payment>(&backend, &notifier)?;

    let remote = {
        let backend = backend.clone();
        move || {
            let backend = backend.clone();
            async move { backend.charge("o-1", 1999).await }
        }
    };
    let outcome = keel
        .coordinator()
        .mutate(
            MutationRequest::new(order_key("o-1"), "process_payment")
                .with_entity("o-1")
                .with_user("u-1")
                .with_related_key(order_key("o-1").child("summary")),
            |_| Payment {
                order_id: "o-1".to_string(),
                amount_cents: 1999,
                refunded: false,
            },
            remote,
        )
        .await?;

    assert!(!outcome.is_committed());
    assert_eq!(keel.store().get_current(&order_key("o-1"))?, None);

    let result = outcome.recovery().await.expect("rolled back");
    assert!(result.success);
    assert!(result.recovered);
    assert!(result.compensation_applied);
    assert_eq!(result.action, RecoveryAction::Compensate);
    assert!(backend.payment("o-1").map(|p| p.refunded).unwrap_or(false));
    assert_eq!(notifier.count(), 0);
    assert_eq!(keel.broadcaster().sent_count(), 1);
    Ok(())
}

#[tokio::test]
async fn boundary_reported_compensation_sets_flag() -> KeelResult<()> {
    let response: RecoveryResponse = serde_json::from_value(serde_json::json!({
        "success": true,
        "action": "compensate",
        "recovered": true,
    }))
    .expect("valid response");
    let boundary = Arc::new(ScriptedBoundary::new().with_response(response));
    let keel = Keel::<Payment>::new(test_config(), boundary.clone(), Arc::new(RecordingNotifier::new()))?;

    let result = keel
        .recovery()
        .handle_payment_failure("o-9", "u-9", "card declined", Metadata::new())
        .await;

    assert!(result.success);
    assert!(result.recovered);
    assert!(result.compensation_applied);
    assert_eq!(result.action, RecoveryAction::Compensate);
    let requests = boundary.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].retry_count, 0);
    assert_eq!(requests[0].error_kind, ErrorKind::PaymentFailed);
    Ok(())
}

#[tokio::test]
async fn unreachable_boundary_needs_manual_intervention() -> KeelResult<()> {
    let backend = MockCommerceBackend::new();
    backend.set_unreachable("function not found");
    let notifier = Arc::new(RecordingNotifier::new());
    let keel = holder::<Payment>(&backend, &notifier)?;

    let result = keel
        .recovery()
        .handle_payment_failure("o-2", "u-2", "card declined", Metadata::new())
        .await;

    assert!(!result.success);
    assert!(!result.recovered);
    assert_eq!(result.action, RecoveryAction::ManualIntervention);
    assert_eq!(result.error.as_deref(), Some("function not found"));
    assert_eq!(notifier.count(), 1);
    assert_eq!(keel.coordinator().executor().metrics().snapshot().boundary_errors, 1);
    Ok(())
}

#[tokio::test]
async fn compensation_is_idempotent_per_failure() -> KeelResult<()> {
    let backend = MockCommerceBackend::new();
    backend.fail_next(RemoteError::new("payment confirmation failed"));
    assert!(backend.charge("o-3", 500).await.is_err());
    let keel = holder::<Payment>(&backend, &Arc::new(RecordingNotifier::new()))?;
    let recovery = keel.recovery().clone();
    let failure = ErrorContext::new(ErrorKind::PaymentFailed, "process_payment", "payment confirmation failed")
        .with_entity("o-3")
        .with_user("u-3");

    // One failure delivered three times, twice concurrently.
    let (first, second) = tokio::join!(
        recovery.recover_from_error(failure.clone()),
        recovery.recover_from_error(failure.clone()),
    );
    let third = recovery.recover_from_error(failure).await;

    assert!(first.compensation_applied);
    assert_eq!(first, second);
    assert_eq!(first, third);
    assert_eq!(backend.recovery_requests().len(), 1);
    assert_eq!(backend.state_changes(), 1);

    let metrics = recovery.executor().metrics().snapshot();
    assert_eq!(metrics.compensations_applied, 1);
    assert_eq!(metrics.compensations_deduplicated, 2);
    Ok(())
}

#[tokio::test]
async fn repeated_payment_failure_is_compensated_each_time() -> KeelResult<()> {
    let backend = MockCommerceBackend::new();
    let keel = holder::<Payment>(&backend, &Arc::new(RecordingNotifier::new()))?;
    let recovery = keel.recovery();

    backend.fail_next(RemoteError::new("payment confirmation failed"));
    assert!(backend.charge("o-1", 700).await.is_err());
    let first = recovery
        .handle_payment_failure("o-1", "u-1", "payment confirmation failed", Metadata::new())
        .await;
    assert!(first.compensation_applied);
    assert_eq!(backend.payment("o-1").map(|p| p.refunded), Some(true));

    // The customer retries checkout and the charge fails again.
    backend.fail_next(RemoteError::new("payment confirmation failed"));
    assert!(backend.charge("o-1", 700).await.is_err());
    assert_eq!(backend.payment("o-1").map(|p| p.refunded), Some(false));
    let second = recovery
        .handle_payment_failure("o-1", "u-1", "payment confirmation failed", Metadata::new())
        .await;

    assert!(second.compensation_applied);
    assert_eq!(backend.payment("o-1").map(|p| p.refunded), Some(true));
    assert_eq!(backend.recovery_requests().len(), 2);
    assert_eq!(backend.state_changes(), 2);
    assert_eq!(
        recovery.executor().metrics().snapshot().compensations_deduplicated,
        0
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn transient_failure_is_retried_and_committed() -> KeelResult<()> {
    let backend = stocked_backend();
    backend.fail_next(RemoteError::new("connection reset by peer"));
    let keel = holder::<Cart>(&backend, &Arc::new(RecordingNotifier::new()))?;
    let calls = Arc::new(AtomicU32::new(0));

    let outcome = keel
        .coordinator()
        .mutate(
            MutationRequest::new(cart_key("u-4"), "add_to_cart")
                .with_entity("p-1")
                .with_user("u-4"),
            |_| Cart::new("u-4").with_line("p-1", 1),
            add_to_cart(&backend, &calls, "u-4", "p-1", 1),
        )
        .await?;

    let MutationOutcome::RolledBack { error_kind, recovery, .. } = outcome else {
        panic!("expected a rollback");
    };
    assert_eq!(error_kind, ErrorKind::NetworkError);

    let result = recovery.wait().await;
    assert!(result.success);
    assert_eq!(result.action, RecoveryAction::Retry);
    assert_eq!(result.attempts, 1);
    assert!(!result.compensation_applied);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_entry(
        &keel.store(),
        &cart_key("u-4"),
        Some(&Cart::new("u-4").with_line("p-1", 1)),
        1,
    );
    assert!(backend.recovery_requests().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_escalate_to_compensation() -> KeelResult<()> {
    let backend = stocked_backend();
    for _ in 0..4 {
        backend.fail_next(RemoteError::new("network unreachable"));
    }
    let notifier = Arc::new(RecordingNotifier::new());
    let keel = holder::<Cart>(&backend, &notifier)?;
    let calls = Arc::new(AtomicU32::new(0));

    let outcome = keel
        .coordinator()
        .mutate(
            MutationRequest::new(cart_key("u-5"), "add_to_cart").with_user("u-5"),
            |_| Cart::new("u-5").with_line("p-1", 1),
            add_to_cart(&backend, &calls, "u-5", "p-1", 1),
        )
        .await?;
    let result = outcome.recovery().await.expect("rolled back");

    assert!(!result.success);
    assert_eq!(result.action, RecoveryAction::Compensate);
    assert_eq!(result.attempts, 4);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    let requests = backend.recovery_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].action, RecoveryAction::Compensate);
    assert_eq!(requests[0].retry_count, 3);
    assert_eq!(notifier.count(), 1);
    assert_eq!(keel.store().get_current(&cart_key("u-5"))?, None);
    Ok(())
}

#[tokio::test]
async fn partial_order_is_rolled_back() -> KeelResult<()> {
    let backend = stocked_backend();
    backend.add_to_cart("u-6", "p-1", 2).await.expect("seed cart");
    backend.fail_next(RemoteError::new("failed to create order"));
    let keel = holder::<Order>(&backend, &Arc::new(RecordingNotifier::new()))?;

    let remote = {
        let backend = backend.clone();
        move || {
            let backend = backend.clone();
            async move { backend.place_order("o-6", "u-6", 2400).await }
        }
    };
    let outcome = keel
        .coordinator()
        .mutate(
            MutationRequest::new(order_key("o-6"), "create_order")
                .with_entity("o-6")
                .with_user("u-6"),
            |_| Order {
                order_id: "o-6".to_string(),
                user_id: "u-6".to_string(),
                lines: Default::default(),
                amount_cents: 2400,
                status: OrderStatus::Confirmed,
            },
            remote,
        )
        .await?;

    let MutationOutcome::RolledBack { error_kind, recovery, .. } = outcome else {
        panic!("expected a rollback");
    };
    assert_eq!(error_kind, ErrorKind::OrderCreationFailed);
    let result = recovery.wait().await;
    assert!(result.success);
    assert!(result.compensation_applied);
    assert_eq!(result.action, RecoveryAction::Rollback);
    assert!(backend.order("o-6").is_none());
    Ok(())
}

#[tokio::test]
async fn authentication_failure_fails_fast() -> KeelResult<()> {
    let backend = stocked_backend();
    backend.fail_next(RemoteError::with_code("401", "JWT expired"));
    let notifier = Arc::new(RecordingNotifier::new());
    let keel = holder::<Cart>(&backend, &notifier)?;
    let calls = Arc::new(AtomicU32::new(0));

    let outcome = keel
        .coordinator()
        .mutate(
            MutationRequest::new(cart_key("u-7"), "add_to_cart").with_user("u-7"),
            |_| Cart::new("u-7").with_line("p-1", 1),
            add_to_cart(&backend, &calls, "u-7", "p-1", 1),
        )
        .await?;
    let result = outcome.recovery().await.expect("rolled back");

    assert_eq!(result.action, RecoveryAction::ManualIntervention);
    assert_eq!(result.attempts, 0);
    assert_eq!(result.message, ErrorKind::AuthenticationRequired.user_message());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(backend.recovery_requests().is_empty());
    assert_eq!(notifier.count(), 1);
    let (context, _) = &notifier.alerts()[0];
    assert_eq!(context.metadata.get("error_code"), Some(&serde_json::json!("401")));
    Ok(())
}
