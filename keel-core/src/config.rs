//! Configuration types

use crate::constants::*;
use crate::enums::{ErrorKind, RecoveryAction};
use crate::error::{ConfigError, KeelResult};
use crate::{new_entity_id, EntityId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

// ============================================================================
// RECOVERY CONFIG
// ============================================================================

/// Retry and escalation settings for the recovery executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Attempts of the original operation before escalating.
    pub max_retry_attempts: u32,
    /// Delay before the first retry; doubles on every further attempt.
    pub base_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
    /// Whether manual-intervention outcomes notify an operator.
    pub notify_on_manual_intervention: bool,
    /// Per-kind replacement for the default action table.
    #[serde(default)]
    pub action_overrides: HashMap<ErrorKind, RecoveryAction>,
    /// How long a recorded compensation answers redeliveries of its failure.
    #[serde(default = "default_ledger_ttl")]
    pub ledger_ttl: Duration,
    /// Soft bound on recorded compensations; expired entries are evicted
    /// once it is reached.
    #[serde(default = "default_ledger_capacity")]
    pub ledger_capacity: usize,
}

fn default_ledger_ttl() -> Duration {
    Duration::from_secs(DEFAULT_LEDGER_TTL_SECS)
}

fn default_ledger_capacity() -> usize {
    DEFAULT_LEDGER_CAPACITY
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            notify_on_manual_intervention: true,
            action_overrides: HashMap::new(),
            ledger_ttl: default_ledger_ttl(),
            ledger_capacity: default_ledger_capacity(),
        }
    }
}

impl RecoveryConfig {
    /// Create RecoveryConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `KEEL_RECOVERY_MAX_RETRY_ATTEMPTS` (default: 3)
    /// - `KEEL_RECOVERY_BASE_DELAY_MS` (default: 1000)
    /// - `KEEL_RECOVERY_MAX_DELAY_MS` (default: 30000)
    /// - `KEEL_RECOVERY_NOTIFY_MANUAL` (default: true)
    /// - `KEEL_RECOVERY_LEDGER_TTL_SECS` (default: 3600)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_retry_attempts = std::env::var(ENV_MAX_RETRY_ATTEMPTS)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_retry_attempts);

        let base_delay = std::env::var(ENV_BASE_DELAY_MS)
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.base_delay);

        let max_delay = std::env::var(ENV_MAX_DELAY_MS)
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.max_delay);

        let notify_on_manual_intervention = std::env::var(ENV_NOTIFY_MANUAL)
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(defaults.notify_on_manual_intervention);

        let ledger_ttl = std::env::var(ENV_LEDGER_TTL_SECS)
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.ledger_ttl);

        Self {
            max_retry_attempts,
            base_delay,
            max_delay,
            notify_on_manual_intervention,
            ledger_ttl,
            ..defaults
        }
    }

    /// Short delays for local development and tests.
    pub fn development() -> Self {
        Self {
            max_retry_attempts: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            ..Self::default()
        }
    }

    /// Replace the default action for one kind.
    pub fn with_override(mut self, kind: ErrorKind, action: RecoveryAction) -> Self {
        self.action_overrides.insert(kind, action);
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - max_retry_attempts within the accepted limit
    /// - base_delay positive and not above max_delay
    /// - fail-fast kinds are only overridden to ManualIntervention or Ignore
    /// - ledger_ttl and ledger_capacity positive
    pub fn validate(&self) -> KeelResult<()> {
        if self.max_retry_attempts > MAX_RETRY_ATTEMPTS_LIMIT {
            return Err(ConfigError::InvalidValue {
                field: "max_retry_attempts".to_string(),
                value: self.max_retry_attempts.to_string(),
                reason: format!("max_retry_attempts must be at most {}", MAX_RETRY_ATTEMPTS_LIMIT),
            }
            .into());
        }

        if self.base_delay.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "base_delay".to_string(),
                value: format!("{:?}", self.base_delay),
                reason: "base_delay must be positive".to_string(),
            }
            .into());
        }

        if self.max_delay < self.base_delay {
            return Err(ConfigError::InvalidValue {
                field: "max_delay".to_string(),
                value: format!("{:?}", self.max_delay),
                reason: "max_delay must not be below base_delay".to_string(),
            }
            .into());
        }

        if self.ledger_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "ledger_ttl".to_string(),
                value: format!("{:?}", self.ledger_ttl),
                reason: "ledger_ttl must be positive".to_string(),
            }
            .into());
        }

        if self.ledger_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ledger_capacity".to_string(),
                value: "0".to_string(),
                reason: "ledger_capacity must be greater than 0".to_string(),
            }
            .into());
        }

        for (kind, action) in &self.action_overrides {
            let allowed = matches!(
                action,
                RecoveryAction::ManualIntervention | RecoveryAction::Ignore
            );
            if kind.is_fail_fast() && !allowed {
                return Err(ConfigError::InvalidValue {
                    field: format!("action_overrides.{}", kind),
                    value: action.to_string(),
                    reason: "authentication and validation failures are never retried or compensated"
                        .to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}

// ============================================================================
// COORDINATOR CONFIG
// ============================================================================

/// Settings for the optimistic mutation coordinator and its broadcaster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Buffered events before slow listeners start lagging.
    pub broadcast_capacity: usize,
    /// Identifies this cache holder on the broadcast channel.
    pub holder_id: EntityId,
    /// Also invalidate the mutated key itself after settling.
    pub invalidate_mutated_key: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
            holder_id: new_entity_id(),
            invalidate_mutated_key: false,
        }
    }
}

impl CoordinatorConfig {
    /// Create CoordinatorConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `KEEL_BROADCAST_CAPACITY` (default: 1024)
    /// - `KEEL_INVALIDATE_MUTATED_KEY` (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let broadcast_capacity = std::env::var(ENV_BROADCAST_CAPACITY)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.broadcast_capacity);

        let invalidate_mutated_key = std::env::var(ENV_INVALIDATE_MUTATED_KEY)
            .ok()
            .map(|s| s == "true" || s == "1")
            .unwrap_or(defaults.invalidate_mutated_key);

        Self {
            broadcast_capacity,
            invalidate_mutated_key,
            ..defaults
        }
    }

    pub fn validate(&self) -> KeelResult<()> {
        if self.broadcast_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "broadcast_capacity".to_string(),
                value: "0".to_string(),
                reason: "broadcast_capacity must be greater than 0".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

// ============================================================================
// MASTER CONFIG
// ============================================================================

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KeelConfig {
    pub recovery: RecoveryConfig,
    pub coordinator: CoordinatorConfig,
}

impl KeelConfig {
    pub fn from_env() -> Self {
        Self {
            recovery: RecoveryConfig::from_env(),
            coordinator: CoordinatorConfig::from_env(),
        }
    }

    pub fn validate(&self) -> KeelResult<()> {
        self.recovery.validate()?;
        self.coordinator.validate()
    }
}

// =============================================================================
// TESTS
// =============================================================================
