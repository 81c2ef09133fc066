use crate::core::{Actor, MONEY_EPSILON, Result, StoreError};
use crate::transaction::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Engine configuration
///
/// Every field has a default, so a config file only needs the keys it
/// overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Retry budget of every unit of work
    pub retry: RetryPolicy,

    /// Tolerance when comparing stored and recomputed money totals
    pub money_epsilon: f64,

    /// Decimal places kept on stored average ratings
    pub rating_decimals: u32,

    /// Identity recorded on writes when the caller supplies none
    pub default_actor: String,

    /// Snapshot file loaded at startup and written by the admin tool
    pub snapshot_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            money_epsilon: MONEY_EPSILON,
            rating_decimals: 2,
            default_actor: Actor::system().as_str().to_string(),
            snapshot_path: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry policy
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the money comparison tolerance
    pub fn money_epsilon(mut self, epsilon: f64) -> Self {
        self.money_epsilon = epsilon;
        self
    }

    /// Set the rating precision
    pub fn rating_decimals(mut self, decimals: u32) -> Self {
        self.rating_decimals = decimals;
        self
    }

    /// Set the default actor
    pub fn default_actor(mut self, actor: impl Into<String>) -> Self {
        self.default_actor = actor.into();
        self
    }

    /// Set the snapshot path
    pub fn snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    pub fn actor(&self) -> Actor {
        Actor::new(self.default_actor.clone())
    }

    /// Reads a JSON config file, filling missing keys with defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.money_epsilon.is_finite() || self.money_epsilon < 0.0 {
            return Err(StoreError::Serialization(format!(
                "moneyEpsilon must be a non-negative number, got {}",
                self.money_epsilon
            )));
        }
        if self.default_actor.trim().is_empty() {
            return Err(StoreError::Serialization(
                "defaultActor must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
