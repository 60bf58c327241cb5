//! Convenience entry points for common failures.

use std::sync::Arc;

use keel_core::{ErrorContext, ErrorKind, Metadata, RecoveryResult, RemoteError};
use serde_json::json;

use crate::classifier::ErrorClassifier;
use crate::executor::{RecoveryExecutor, RetryOperation};

/// Classifier and executor behind one handle.
#[derive(Clone)]
pub struct RecoveryService {
    classifier: ErrorClassifier,
    executor: Arc<RecoveryExecutor>,
}

impl RecoveryService {
    pub fn new(classifier: ErrorClassifier, executor: Arc<RecoveryExecutor>) -> Self {
        Self {
            classifier,
            executor,
        }
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub fn executor(&self) -> &Arc<RecoveryExecutor> {
        &self.executor
    }

    /// Run recovery for an already classified failure.
    pub async fn recover_from_error(&self, context: ErrorContext) -> RecoveryResult {
        self.executor.execute(context, None).await
    }

    /// Classify a raw failure of `operation` and run recovery for it.
    pub async fn classify_and_recover(
        &self,
        error: &RemoteError,
        operation: &str,
        related_entity_id: Option<String>,
        related_user_id: Option<String>,
        retry: Option<&dyn RetryOperation>,
    ) -> RecoveryResult {
        let kind = self.classifier.classify(error, Some(operation));
        let mut context = ErrorContext::new(kind, operation, error.message.clone());
        context.related_entity_id = related_entity_id;
        context.related_user_id = related_user_id;
        if let Some(code) = &error.code {
            context = context.with_metadata("error_code", json!(code));
        }
        self.executor.execute(context, retry).await
    }

    /// A payment for `order_id` failed; refund or void it.
    pub async fn handle_payment_failure(
        &self,
        order_id: &str,
        user_id: &str,
        message: &str,
        metadata: Metadata,
    ) -> RecoveryResult {
        let context = ErrorContext::new(ErrorKind::PaymentFailed, "process_payment", message)
            .with_entity(order_id)
            .with_user(user_id)
            .with_metadata_map(metadata);
        self.recover_from_error(context).await
    }

    /// A stock update for `product_id` failed; release what was reserved.
    pub async fn handle_stock_failure(
        &self,
        product_id: &str,
        user_id: &str,
        message: &str,
        requested_quantity: u32,
    ) -> RecoveryResult {
        let context = ErrorContext::new(ErrorKind::StockUpdateFailed, "update_stock", message)
            .with_entity(product_id)
            .with_user(user_id)
            .with_metadata("requested_quantity", json!(requested_quantity));
        self.recover_from_error(context).await
    }

    /// Creating `order_id` failed part way; discard the partial order.
    pub async fn handle_order_creation_failure(
        &self,
        order_id: &str,
        user_id: &str,
        message: &str,
    ) -> RecoveryResult {
        let context = ErrorContext::new(ErrorKind::OrderCreationFailed, "create_order", message)
            .with_entity(order_id)
            .with_user(user_id);
        self.recover_from_error(context).await
    }
}
