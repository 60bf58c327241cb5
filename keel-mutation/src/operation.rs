//! Remote mutation operations.

use std::future::Future;

use async_trait::async_trait;
use keel_core::RemoteError;

/// The remote write behind a mutation.
///
/// Returns the authoritative value the remote store now holds for the
/// mutated key. The operation may be called again if recovery retries it,
/// so it must be safe to repeat.
#[async_trait]
pub trait RemoteOperation<T>: Send + Sync {
    async fn call(&self) -> Result<T, RemoteError>;
}

#[async_trait]
impl<T, F, Fut> RemoteOperation<T> for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, RemoteError>> + Send + 'static,
    T: Send + 'static,
{
    async fn call(&self) -> Result<T, RemoteError> {
        (self)().await
    }
}
