//! KEEL Test Utilities
//!
//! Shared test infrastructure for the KEEL workspace:
//! - A small commerce domain (carts, stock, orders, payments)
//! - `MockCommerceBackend`, an in-memory remote store whose recovery
//!   boundary compensates idempotently
//! - Scripted boundaries and recording notifiers
//! - Proptest generators and fixtures

pub use keel_cache::{CacheKey, CacheStore};
pub use keel_core::{
    ErrorContext, ErrorKind, KeelConfig, RecoveryAction, RecoveryConfig, RecoveryError,
    RecoveryRequest, RecoveryResponse, RecoveryResult, RemoteError,
};

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use keel_recovery::{InterventionNotifier, RecoveryBoundary};
use serde::{Deserialize, Serialize};

// ============================================================================
// COMMERCE DOMAIN
// ============================================================================

/// A user's shopping cart: product id to quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub user_id: String,
    pub lines: BTreeMap<String, u32>,
}

impl Cart {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            lines: BTreeMap::new(),
        }
    }

    pub fn with_line(mut self, product_id: impl Into<String>, quantity: u32) -> Self {
        *self.lines.entry(product_id.into()).or_insert(0) += quantity;
        self
    }

    pub fn quantity_of(&self, product_id: &str) -> u32 {
        self.lines.get(product_id).copied().unwrap_or(0)
    }

    pub fn total_items(&self) -> u32 {
        self.lines.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: String,
    pub available: u32,
    pub reserved: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub user_id: String,
    pub lines: BTreeMap<String, u32>,
    pub amount_cents: u64,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub order_id: String,
    pub amount_cents: u64,
    pub refunded: bool,
}

// ============================================================================
// MOCK COMMERCE BACKEND
// ============================================================================

#[derive(Debug, Default)]
struct CommerceState {
    stock: HashMap<String, StockLevel>,
    carts: HashMap<String, Cart>,
    /// Quantity held per (product, user).
    reservations: HashMap<(String, String), u32>,
    orders: HashMap<String, Order>,
    payments: HashMap<String, Payment>,
    failures: VecDeque<RemoteError>,
    unreachable: Option<String>,
    requests: Vec<RecoveryRequest>,
    state_changes: u32,
}

impl CommerceState {
    fn refund(&mut self, action: RecoveryAction, order_id: &str) -> RecoveryResponse {
        match self.payments.get_mut(order_id) {
            Some(payment) if payment.refunded => {
                RecoveryResponse::succeeded(action, format!("Payment for {} already refunded", order_id))
            }
            Some(payment) => {
                payment.refunded = true;
                self.state_changes += 1;
                RecoveryResponse::succeeded(action, format!("Refunded payment for {}", order_id))
            }
            None => RecoveryResponse::failed(action, format!("No payment recorded for {}", order_id)),
        }
    }

    fn release_reservation(&mut self, action: RecoveryAction, product_id: &str, user_id: &str) -> RecoveryResponse {
        let key = (product_id.to_string(), user_id.to_string());
        let Some(quantity) = self.reservations.remove(&key) else {
            return RecoveryResponse::failed(
                action,
                format!("No stock reservation for {} to release", product_id),
            );
        };
        if let Some(level) = self.stock.get_mut(product_id) {
            level.available += quantity;
            level.reserved = level.reserved.saturating_sub(quantity);
        }
        if let Some(cart) = self.carts.get_mut(user_id) {
            cart.lines.remove(product_id);
        }
        self.state_changes += 1;
        RecoveryResponse::succeeded(action, format!("Released {} of {}", quantity, product_id))
    }

    fn discard_order(&mut self, action: RecoveryAction, order_id: &str) -> RecoveryResponse {
        match self.orders.get(order_id).map(|o| o.status) {
            Some(OrderStatus::Pending) => {
                self.orders.remove(order_id);
                self.state_changes += 1;
                RecoveryResponse::succeeded(action, format!("Discarded partial order {}", order_id))
            }
            Some(OrderStatus::Confirmed) => {
                RecoveryResponse::failed(action, format!("Order {} is already confirmed", order_id))
            }
            None => RecoveryResponse::succeeded(action, format!("Order {} already discarded", order_id)),
        }
    }
}

/// In-memory remote store for a small shop.
///
/// Remote operations reserve stock, capture payments and create orders.
/// Its [`RecoveryBoundary`] implementation compensates them: refunds
/// payments, releases reservations and discards partial orders. Each
/// compensation changes state at most once per entity.
#[derive(Debug, Clone, Default)]
pub struct MockCommerceBackend {
    state: Arc<Mutex<CommerceState>>,
}

impl MockCommerceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stock(self, product_id: impl Into<String>, available: u32) -> Self {
        self.set_stock(product_id, available);
        self
    }

    fn state(&self) -> MutexGuard<'_, CommerceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_stock(&self, product_id: impl Into<String>, available: u32) {
        let product_id = product_id.into();
        self.state().stock.insert(
            product_id.clone(),
            StockLevel {
                product_id,
                available,
                reserved: 0,
            },
        );
    }

    /// Fail the next remote operation with `error`.
    pub fn fail_next(&self, error: RemoteError) {
        self.state().failures.push_back(error);
    }

    /// Make every boundary call fail as if the procedure did not exist.
    pub fn set_unreachable(&self, message: impl Into<String>) {
        self.state().unreachable = Some(message.into());
    }

    // === Remote operations ===

    /// Reserve `quantity` of a product and add it to the user's cart.
    pub async fn add_to_cart(&self, user_id: &str, product_id: &str, quantity: u32) -> Result<Cart, RemoteError> {
        let mut state = self.state();
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        let Some(level) = state.stock.get_mut(product_id) else {
            return Err(RemoteError::with_kind(
                ErrorKind::ValidationFailed,
                format!("Product not found: {}", product_id),
            ));
        };
        if level.available < quantity {
            return Err(RemoteError::with_kind(
                ErrorKind::StockUpdateFailed,
                format!("Insufficient stock for {}: {} available", product_id, level.available),
            ));
        }
        level.available -= quantity;
        level.reserved += quantity;
        *state
            .reservations
            .entry((product_id.to_string(), user_id.to_string()))
            .or_insert(0) += quantity;
        let cart = state
            .carts
            .entry(user_id.to_string())
            .or_insert_with(|| Cart::new(user_id));
        *cart.lines.entry(product_id.to_string()).or_insert(0) += quantity;
        Ok(cart.clone())
    }

    /// Capture a payment for an order. A scripted failure is reported after
    /// the capture, leaving a payment that needs refunding.
    pub async fn charge(&self, order_id: &str, amount_cents: u64) -> Result<Payment, RemoteError> {
        let mut state = self.state();
        let payment = Payment {
            order_id: order_id.to_string(),
            amount_cents,
            refunded: false,
        };
        state.payments.insert(order_id.to_string(), payment.clone());
        match state.failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(payment),
        }
    }

    /// Create an order from the user's cart. A scripted failure leaves the
    /// order pending.
    pub async fn place_order(&self, order_id: &str, user_id: &str, amount_cents: u64) -> Result<Order, RemoteError> {
        let mut state = self.state();
        let lines = state
            .carts
            .get(user_id)
            .map(|cart| cart.lines.clone())
            .unwrap_or_default();
        state.orders.insert(
            order_id.to_string(),
            Order {
                order_id: order_id.to_string(),
                user_id: user_id.to_string(),
                lines,
                amount_cents,
                status: OrderStatus::Pending,
            },
        );
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        let order = state.orders.get_mut(order_id).map(|order| {
            order.status = OrderStatus::Confirmed;
            order.clone()
        });
        state.carts.remove(user_id);
        order.ok_or_else(|| RemoteError::new(format!("order {} vanished", order_id)))
    }

    // === Inspection ===

    pub fn stock(&self, product_id: &str) -> Option<StockLevel> {
        self.state().stock.get(product_id).cloned()
    }

    pub fn cart(&self, user_id: &str) -> Option<Cart> {
        self.state().carts.get(user_id).cloned()
    }

    pub fn order(&self, order_id: &str) -> Option<Order> {
        self.state().orders.get(order_id).cloned()
    }

    pub fn payment(&self, order_id: &str) -> Option<Payment> {
        self.state().payments.get(order_id).cloned()
    }

    pub fn reservation(&self, product_id: &str, user_id: &str) -> u32 {
        self.state()
            .reservations
            .get(&(product_id.to_string(), user_id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Every request the boundary received.
    pub fn recovery_requests(&self) -> Vec<RecoveryRequest> {
        self.state().requests.clone()
    }

    /// Compensations that actually changed state.
    pub fn state_changes(&self) -> u32 {
        self.state().state_changes
    }
}

#[async_trait]
impl RecoveryBoundary for MockCommerceBackend {
    async fn recover(&self, request: RecoveryRequest) -> Result<RecoveryResponse, RecoveryError> {
        let mut state = self.state();
        if let Some(message) = &state.unreachable {
            return Err(RecoveryError::BoundaryUnavailable {
                message: message.clone(),
            });
        }
        state.requests.push(request.clone());

        let entity = request.related_entity_id.as_deref().unwrap_or("");
        let user = request.related_user_id.as_deref().unwrap_or("");
        let response = match request.error_kind {
            ErrorKind::PaymentFailed => state.refund(request.action, entity),
            ErrorKind::StockUpdateFailed => state.release_reservation(request.action, entity, user),
            ErrorKind::OrderCreationFailed => state.discard_order(request.action, entity),
            kind => RecoveryResponse::failed(request.action, format!("No compensation defined for {}", kind)),
        };
        Ok(response)
    }
}

// ============================================================================
// SCRIPTED BOUNDARY
// ============================================================================

/// Boundary that replays queued responses in order and records requests.
///
/// With nothing queued it fails like an unreachable procedure.
#[derive(Debug, Default)]
pub struct ScriptedBoundary {
    script: Mutex<VecDeque<Result<RecoveryResponse, RecoveryError>>>,
    requests: Mutex<Vec<RecoveryRequest>>,
}

impl ScriptedBoundary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, response: RecoveryResponse) -> Self {
        self.push(Ok(response));
        self
    }

    pub fn with_error(self, message: impl Into<String>) -> Self {
        self.push(Err(RecoveryError::BoundaryUnavailable {
            message: message.into(),
        }));
        self
    }

    pub fn push(&self, outcome: Result<RecoveryResponse, RecoveryError>) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
    }

    pub fn requests(&self) -> Vec<RecoveryRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl RecoveryBoundary for ScriptedBoundary {
    async fn recover(&self, request: RecoveryRequest) -> Result<RecoveryResponse, RecoveryError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| {
                Err(RecoveryError::BoundaryUnavailable {
                    message: "no scripted response".to_string(),
                })
            })
    }
}

// ============================================================================
// RECORDING NOTIFIER
// ============================================================================

/// Notifier that keeps every alert for inspection.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<(ErrorContext, String)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records alerts but reports every delivery as failed.
    pub fn failing() -> Self {
        Self {
            alerts: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn alerts(&self) -> Vec<(ErrorContext, String)> {
        self.alerts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn count(&self) -> usize {
        self.alerts.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl InterventionNotifier for RecordingNotifier {
    async fn notify(&self, context: &ErrorContext, reason: &str) -> Result<(), RecoveryError> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((context.clone(), reason.to_string()));
        if self.fail {
            return Err(RecoveryError::NotifierFailed {
                reason: "pager offline".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for KEEL types.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_error_kind() -> impl Strategy<Value = ErrorKind> {
        proptest::sample::select(ErrorKind::ALL.to_vec())
    }

    pub fn arb_recovery_action() -> impl Strategy<Value = RecoveryAction> {
        prop_oneof![
            Just(RecoveryAction::Retry),
            Just(RecoveryAction::Compensate),
            Just(RecoveryAction::Rollback),
            Just(RecoveryAction::ManualIntervention),
            Just(RecoveryAction::Ignore),
        ]
    }

    pub fn arb_remote_error() -> impl Strategy<Value = RemoteError> {
        (
            proptest::option::of(arb_error_kind()),
            proptest::option::of("[0-9A-Z]{3,5}"),
            "[a-zA-Z ]{0,40}",
        )
            .prop_map(|(kind, code, message)| RemoteError { kind, code, message })
    }

    pub fn arb_cache_key() -> impl Strategy<Value = CacheKey> {
        prop::collection::vec("[a-z0-9]{1,8}", 1..4).prop_map(CacheKey::new)
    }

    pub fn arb_product_id() -> impl Strategy<Value = String> {
        "p-[0-9]{1,3}"
    }

    pub fn arb_quantity() -> impl Strategy<Value = u32> {
        1u32..20
    }

    pub fn arb_cart() -> impl Strategy<Value = Cart> {
        (
            "u-[0-9]{1,3}",
            prop::collection::btree_map(arb_product_id(), arb_quantity(), 0..6),
        )
            .prop_map(|(user_id, lines)| Cart { user_id, lines })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;
    use std::time::Duration;

    pub fn cart_key(user_id: &str) -> CacheKey {
        CacheKey::new(["cart", user_id])
    }

    pub fn stock_key(product_id: &str) -> CacheKey {
        CacheKey::new(["stock", product_id])
    }

    pub fn order_key(order_id: &str) -> CacheKey {
        CacheKey::new(["order", order_id])
    }

    /// Recovery settings with millisecond delays.
    pub fn fast_recovery_config() -> RecoveryConfig {
        RecoveryConfig {
            max_retry_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(8),
            ..RecoveryConfig::default()
        }
    }

    /// A valid config whose recovery delays are short.
    pub fn test_config() -> KeelConfig {
        KeelConfig {
            recovery: fast_recovery_config(),
            ..KeelConfig::default()
        }
    }

    /// Backend with three products in stock.
    pub fn stocked_backend() -> MockCommerceBackend {
        MockCommerceBackend::new()
            .with_stock("p-1", 10)
            .with_stock("p-2", 2)
            .with_stock("p-3", 0)
    }

    pub fn sample_cart(user_id: &str) -> Cart {
        Cart::new(user_id).with_line("p-1", 2).with_line("p-2", 1)
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for cache state.

    use super::*;
    use std::fmt::Debug;

    /// Assert the committed value and version of `key`, and that no
    /// optimistic write is outstanding.
    pub fn assert_entry<T>(store: &CacheStore<T>, key: &CacheKey, value: Option<&T>, version: u64)
    where
        T: Clone + PartialEq + Debug + Send + Sync + 'static,
    {
        let entry = store.get(key).expect("cache lock poisoned");
        assert_eq!(entry.as_ref().map(|e| &e.value), value, "value of {}", key);
        assert_eq!(entry.as_ref().map(|e| e.version).unwrap_or(0), version, "version of {}", key);
        assert!(!entry.map(|e| e.dirty).unwrap_or(false), "{} is still dirty", key);
    }
}
