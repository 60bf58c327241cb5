//! Constants for KEEL
//!
//! Centralized default values. Configuration types fall back to these when
//! neither code nor environment overrides them.

// ============================================================================
// RECOVERY
// ============================================================================

/// Default number of retry attempts for transient failures
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;

/// Upper bound accepted for `max_retry_attempts`
pub const MAX_RETRY_ATTEMPTS_LIMIT: u32 = 20;

/// Delay before the first retry, in milliseconds
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;

/// Cap on any single retry delay, in milliseconds
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// How long a recorded compensation suppresses redelivery, in seconds
pub const DEFAULT_LEDGER_TTL_SECS: u64 = 3_600;

/// Recorded compensations kept before expired entries are evicted
pub const DEFAULT_LEDGER_CAPACITY: usize = 10_000;

// ============================================================================
// BROADCAST
// ============================================================================

/// Default capacity of the local broadcast channel
pub const DEFAULT_BROADCAST_CAPACITY: usize = 1_024;

// ============================================================================
// BROADCAST EVENT NAMES
// ============================================================================

/// Emitted after a mutation commits
pub const EVENT_MUTATION_COMMITTED: &str = "mutation_committed";

/// Emitted after a background recovery changed remote state
pub const EVENT_MUTATION_RECOVERED: &str = "mutation_recovered";

// ============================================================================
// ENVIRONMENT VARIABLES
// ============================================================================

pub const ENV_MAX_RETRY_ATTEMPTS: &str = "KEEL_RECOVERY_MAX_RETRY_ATTEMPTS";
pub const ENV_BASE_DELAY_MS: &str = "KEEL_RECOVERY_BASE_DELAY_MS";
pub const ENV_MAX_DELAY_MS: &str = "KEEL_RECOVERY_MAX_DELAY_MS";
pub const ENV_NOTIFY_MANUAL: &str = "KEEL_RECOVERY_NOTIFY_MANUAL";
pub const ENV_LEDGER_TTL_SECS: &str = "KEEL_RECOVERY_LEDGER_TTL_SECS";
pub const ENV_BROADCAST_CAPACITY: &str = "KEEL_BROADCAST_CAPACITY";
pub const ENV_INVALIDATE_MUTATED_KEY: &str = "KEEL_INVALIDATE_MUTATED_KEY";
