use crate::{TeamserverError, TeamserverResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a task in an agent's queue.
///
/// ```text
/// Queued --next_batch--> Sent --success--> Complete
///   |                     `---failure--> Error
///   `--cancel--> Canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Sent,
    Error,
    Complete,
    Canceled,
}

impl TaskStatus {
    /// Complete, Error and Canceled admit no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Complete | TaskStatus::Error | TaskStatus::Canceled
        )
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Queued, TaskStatus::Sent)
                | (TaskStatus::Queued, TaskStatus::Canceled)
                | (TaskStatus::Sent, TaskStatus::Complete)
                | (TaskStatus::Sent, TaskStatus::Error)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Sent => write!(f, "sent"),
            TaskStatus::Error => write!(f, "error"),
            TaskStatus::Complete => write!(f, "complete"),
            TaskStatus::Canceled => write!(f, "canceled"),
        }
    }
}

/// What the agent is asked to do. Opaque to the control plane apart from
/// shape validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAction {
    /// Action identifier understood by the agent (e.g. `exec`, `upload`).
    pub name: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl TaskAction {
    pub fn new(name: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Check the action's shape and normalise `null` params to `{}`.
    pub fn validate(mut self) -> TeamserverResult<Self> {
        if self.name.is_empty() {
            return Err(TeamserverError::Validation(
                "action name must not be empty".to_string(),
            ));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'))
        {
            return Err(TeamserverError::Validation(format!(
                "action name '{}' contains invalid characters",
                self.name
            )));
        }
        match self.params {
            serde_json::Value::Null => {
                self.params = serde_json::Value::Object(serde_json::Map::new());
            }
            serde_json::Value::Object(_) => {}
            _ => {
                return Err(TeamserverError::Validation(format!(
                    "params of action '{}' must be a JSON object",
                    self.name
                )));
            }
        }
        Ok(self)
    }
}

/// The result an agent reports for a sent task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Success {
        #[serde(default)]
        output: serde_json::Value,
    },
    Failure {
        error: String,
        #[serde(default)]
        output: serde_json::Value,
    },
}

impl TaskOutcome {
    pub fn success(output: serde_json::Value) -> Self {
        Self::Success { output }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
            output: serde_json::Value::Null,
        }
    }

    pub fn validate(&self) -> TeamserverResult<()> {
        match self {
            TaskOutcome::Failure { error, .. } if error.trim().is_empty() => Err(
                TeamserverError::Validation("failure outcome requires an error message".into()),
            ),
            _ => Ok(()),
        }
    }
}

/// Who asked for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskOrigin {
    Operator,
    Rule { rule_id: Uuid, event_id: Uuid },
}

/// A unit of work assigned to exactly one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub agent_id: String,
    /// Creation order within the owning agent's task set.
    pub sequence: u64,
    pub action: TaskAction,
    pub status: TaskStatus,
    pub origin: TaskOrigin,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Task {
    pub fn new(
        agent_id: impl Into<String>,
        sequence: u64,
        action: TaskAction,
        origin: TaskOrigin,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            sequence,
            action,
            status: TaskStatus::Queued,
            origin,
            created_at: now,
            sent_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    fn transition(&mut self, next: TaskStatus) -> TeamserverResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(TeamserverError::InvalidState(format!(
                "task {} is {}, cannot move to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_sent(&mut self, now: DateTime<Utc>) -> TeamserverResult<()> {
        self.transition(TaskStatus::Sent)?;
        self.sent_at = Some(now);
        Ok(())
    }

    pub fn mark_canceled(&mut self) -> TeamserverResult<()> {
        self.transition(TaskStatus::Canceled)
    }

    /// Record an agent's outcome. Leaves the task untouched on error.
    pub fn apply_outcome(
        &mut self,
        outcome: TaskOutcome,
        now: DateTime<Utc>,
    ) -> TeamserverResult<()> {
        let (next, output, error) = match outcome {
            TaskOutcome::Success { output } => (TaskStatus::Complete, output, None),
            TaskOutcome::Failure { error, output } => (TaskStatus::Error, output, Some(error)),
        };
        self.transition(next)?;
        self.completed_at = Some(now);
        self.result = (!output.is_null()).then_some(output);
        self.error = error;
        Ok(())
    }
}
