use crate::executor::retry_span;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use teamserver_core::{TeamserverError, TeamserverResult};

/// Agent admission and check-in policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPolicy {
    /// Register unknown agents on their first check-in instead of rejecting them.
    #[serde(default)]
    pub auto_register: bool,
    #[serde(default = "default_interval")]
    pub default_interval_secs: u64,
    #[serde(default = "default_interval_delta")]
    pub default_interval_delta_secs: u64,
    /// Upper bound on tasks handed out by a single check-in.
    #[serde(default = "default_max_batch")]
    pub max_batch_size: usize,
}

impl Default for AgentPolicy {
    fn default() -> Self {
        Self {
            auto_register: false,
            default_interval_secs: default_interval(),
            default_interval_delta_secs: default_interval_delta(),
            max_batch_size: default_max_batch(),
        }
    }
}

/// Trigger evaluation worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Attempts per deferred job before it is dropped.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long (event, rule) firings are remembered, counted from the event.
    #[serde(default = "default_ledger_retention")]
    pub ledger_retention_secs: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            queue_capacity: default_queue_capacity(),
            ledger_retention_secs: default_ledger_retention(),
        }
    }
}

/// Shortest accepted ledger retention.
pub const MIN_LEDGER_RETENTION_SECS: u64 = 60;

/// Orchestrator configuration, the `[agents]` and `[triggers]` sections of
/// `teamserver.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub agents: AgentPolicy,
    #[serde(default)]
    pub triggers: TriggerConfig,
}

impl OrchestratorConfig {
    pub fn validate(&self) -> TeamserverResult<()> {
        if self.agents.default_interval_secs == 0 {
            return Err(TeamserverError::Config(
                "agents.default_interval_secs must be greater than 0".into(),
            ));
        }
        if self.agents.max_batch_size == 0 {
            return Err(TeamserverError::Config(
                "agents.max_batch_size must be greater than 0".into(),
            ));
        }
        if self.triggers.workers == 0 || self.triggers.queue_capacity == 0 {
            return Err(TeamserverError::Config(
                "triggers.workers and triggers.queue_capacity must be greater than 0".into(),
            ));
        }
        if self.triggers.max_attempts == 0 {
            return Err(TeamserverError::Config(
                "triggers.max_attempts must be at least 1".into(),
            ));
        }
        let retention = Duration::from_secs(self.triggers.ledger_retention_secs);
        if self.triggers.ledger_retention_secs < MIN_LEDGER_RETENTION_SECS
            || retention <= retry_span(self.triggers.max_attempts) * 10
        {
            return Err(TeamserverError::Config(format!(
                "triggers.ledger_retention_secs must be at least {MIN_LEDGER_RETENTION_SECS} \
                 and well beyond the retry window of {} attempts",
                self.triggers.max_attempts
            )));
        }
        Ok(())
    }
}

fn default_interval() -> u64 {
    60
}
fn default_interval_delta() -> u64 {
    30
}
fn default_max_batch() -> usize {
    25
}
fn default_workers() -> usize {
    4
}
fn default_max_attempts() -> u32 {
    3
}
fn default_queue_capacity() -> usize {
    1024
}
fn default_ledger_retention() -> u64 {
    86_400
}
