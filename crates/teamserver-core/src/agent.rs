use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Liveness classification derived from check-in recency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Checked in within the last `interval` seconds.
    Active,
    /// Overdue, but still within the `interval_delta` grace window.
    Missing,
    /// Overdue beyond the grace window.
    Inactive,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Active => write!(f, "active"),
            AgentStatus::Missing => write!(f, "missing"),
            AgentStatus::Inactive => write!(f, "inactive"),
        }
    }
}

/// Derive an agent's liveness status.
///
/// Pure function of its inputs: `Active` while `now - last_checkin < interval`,
/// `Missing` while it is below `interval + interval_delta`, `Inactive` after.
/// A `last_checkin` in the future (clock skew) counts as `Active`.
pub fn liveness(
    last_checkin: DateTime<Utc>,
    interval_secs: u64,
    interval_delta_secs: u64,
    now: DateTime<Utc>,
) -> AgentStatus {
    let elapsed_ms = (now - last_checkin).num_milliseconds();
    if elapsed_ms < 0 {
        return AgentStatus::Active;
    }
    let elapsed_ms = elapsed_ms as u128;
    let interval_ms = u128::from(interval_secs) * 1000;
    let grace_ms = interval_ms + u128::from(interval_delta_secs) * 1000;

    if elapsed_ms < interval_ms {
        AgentStatus::Active
    } else if elapsed_ms < grace_ms {
        AgentStatus::Missing
    } else {
        AgentStatus::Inactive
    }
}

/// A remote agent known to the control plane.
///
/// Agents are never deleted; an agent that stops checking in simply decays
/// to [`AgentStatus::Inactive`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    /// Hostname, OS, user and other free-form facts reported by the agent.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub registered_at: DateTime<Utc>,
    pub last_checkin: DateTime<Utc>,
    /// Expected seconds between check-ins.
    pub interval: u64,
    /// Extra seconds of tolerance before a missing agent becomes inactive.
    pub interval_delta: u64,
    #[serde(default)]
    pub checkin_count: u64,
    /// Next creation-order sequence number handed to a task of this agent.
    #[serde(default)]
    pub task_sequence: u64,
}

impl Agent {
    pub fn new(
        id: impl Into<String>,
        metadata: HashMap<String, String>,
        interval: u64,
        interval_delta: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            metadata,
            registered_at: now,
            last_checkin: now,
            interval,
            interval_delta,
            checkin_count: 0,
            task_sequence: 0,
        }
    }

    /// Stamp a check-in. Reported metadata keys overwrite stored ones.
    pub fn record_checkin(&mut self, metadata: HashMap<String, String>, now: DateTime<Utc>) {
        self.last_checkin = now;
        self.checkin_count += 1;
        self.metadata.extend(metadata);
    }

    pub fn status(&self, now: DateTime<Utc>) -> AgentStatus {
        liveness(self.last_checkin, self.interval, self.interval_delta, now)
    }

    /// Reserve the next task sequence number.
    pub fn next_task_sequence(&mut self) -> u64 {
        let seq = self.task_sequence;
        self.task_sequence += 1;
        seq
    }
}

/// An agent together with its status as of the moment it was read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentView {
    #[serde(flatten)]
    pub agent: Agent,
    pub status: AgentStatus,
}

impl AgentView {
    pub fn at(agent: Agent, now: DateTime<Utc>) -> Self {
        let status = agent.status(now);
        Self { agent, status }
    }
}
