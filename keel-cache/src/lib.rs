//! KEEL Cache - Versioned Cache Store
//!
//! In-memory keyed store of entity values with the primitives optimistic
//! mutation needs: snapshots, exact rollback, prefix invalidation,
//! synchronous change notification and cancellable background refetch.
//!
//! # Versions
//!
//! Every authoritative commit bumps an entry's `version`. Optimistic writes
//! mark the entry `dirty` and leave the version alone, so a rollback can
//! tell whether a newer commit landed after its snapshot was taken and
//! refuse to overwrite it.
//!
//! # Example
//!
//! ```
//! use keel_cache::{cache_key, CacheStore};
//!
//! let store = CacheStore::<u32>::new();
//! store.set(cache_key!["stock", "p-1"], 10).unwrap();
//!
//! let snapshot = store.snapshot(&cache_key!["stock", "p-1"]).unwrap();
//! store.apply_optimistic(cache_key!["stock", "p-1"], 9).unwrap();
//! store.rollback(snapshot).unwrap();
//!
//! assert_eq!(store.get_current(&cache_key!["stock", "p-1"]).unwrap(), Some(10));
//! ```

pub mod entry;
pub mod key;
pub mod refetch;
pub mod stats;
pub mod store;

pub use entry::{CacheEntry, CacheNotification, RollbackStatus, Snapshot};
pub use key::{CacheKey, KEY_SEPARATOR};
pub use refetch::{Fetcher, RefetchHandle, RefetchOutcome};
pub use stats::CacheStats;
pub use store::{CacheStore, SubscriptionId};

use keel_core::CacheError;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
