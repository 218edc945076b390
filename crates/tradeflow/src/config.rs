use anyhow::{Context, Result};
use coordination::signals::{SignalBusConfig, DEFAULT_HISTORY_CAPACITY};
use coordination::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::types::AnalysisDepth;

/// Retry budgets. Each `max_*_retries` counts retries after the first try.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Market data fetch.
    pub max_data_retries: u32,
    /// Trader, risk, decision and reflection roles.
    pub max_llm_retries: u32,
    /// Analysts and debate roles.
    pub max_agent_retries: u32,
    /// First backoff delay; doubles on every retry.
    pub base_delay_ms: u64,
    /// Per-attempt limit. 0 disables it.
    pub attempt_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_data_retries: 3,
            max_llm_retries: 2,
            max_agent_retries: 2,
            base_delay_ms: 1000,
            attempt_timeout_secs: 120,
        }
    }
}

impl RetryConfig {
    fn policy(&self, retries: u32) -> RetryPolicy {
        let policy = RetryPolicy::new(
            retries.saturating_add(1),
            Duration::from_millis(self.base_delay_ms),
        );
        if self.attempt_timeout_secs > 0 {
            policy.with_attempt_timeout(Duration::from_secs(self.attempt_timeout_secs))
        } else {
            policy
        }
    }

    pub fn data_policy(&self) -> RetryPolicy {
        self.policy(self.max_data_retries)
    }

    pub fn llm_policy(&self) -> RetryPolicy {
        self.policy(self.max_llm_retries)
    }

    pub fn agent_policy(&self) -> RetryPolicy {
        self.policy(self.max_agent_retries)
    }
}

/// Debate length, derived from the request depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebatePolicy {
    pub rounds: u32,
}

impl DebatePolicy {
    pub fn for_depth(depth: AnalysisDepth) -> Self {
        Self {
            rounds: coordination::debate::state::clamp_rounds(depth.debate_rounds()),
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub retry: RetryConfig,
    pub signal_history_capacity: usize,
    /// Run analyst calls concurrently instead of one after another.
    pub parallel_analysts: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            signal_history_capacity: DEFAULT_HISTORY_CAPACITY,
            parallel_analysts: false,
        }
    }
}

fn env_override<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("Invalid value for {key}: '{raw}'")),
        Err(_) => Ok(None),
    }
}

impl PipelineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Failed to parse pipeline config")
    }

    /// Load from a TOML file, then apply `TRADEFLOW_*` overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_toml_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults plus `TRADEFLOW_*` overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_override("TRADEFLOW_MAX_DATA_RETRIES")? {
            self.retry.max_data_retries = v;
        }
        if let Some(v) = env_override("TRADEFLOW_MAX_LLM_RETRIES")? {
            self.retry.max_llm_retries = v;
        }
        if let Some(v) = env_override("TRADEFLOW_MAX_AGENT_RETRIES")? {
            self.retry.max_agent_retries = v;
        }
        if let Some(v) = env_override("TRADEFLOW_RETRY_DELAY_MS")? {
            self.retry.base_delay_ms = v;
        }
        if let Some(v) = env_override("TRADEFLOW_ATTEMPT_TIMEOUT_SECS")? {
            self.retry.attempt_timeout_secs = v;
        }
        if let Some(v) = env_override("TRADEFLOW_SIGNAL_HISTORY")? {
            self.signal_history_capacity = v;
        }
        if let Some(v) = env_override("TRADEFLOW_PARALLEL_ANALYSTS")? {
            self.parallel_analysts = v;
        }
        Ok(())
    }

    /// Bus settings matching this config.
    pub fn signal_bus_config(&self) -> SignalBusConfig {
        SignalBusConfig {
            history_capacity: self.signal_history_capacity,
            ..SignalBusConfig::default()
        }
    }
}
