use crate::agent::Agent;
use crate::task::{Task, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of a domain [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AgentRegistered,
    AgentCheckin,
    TaskComplete,
    TaskError,
    Custom,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::AgentRegistered => write!(f, "agent_registered"),
            EventKind::AgentCheckin => write!(f, "agent_checkin"),
            EventKind::TaskComplete => write!(f, "task_complete"),
            EventKind::TaskError => write!(f, "task_error"),
            EventKind::Custom => write!(f, "custom"),
        }
    }
}

/// Something the control plane observed.
///
/// Events are ephemeral: produced once, handed to the trigger engine, and not
/// retained. The `id` is what makes trigger evaluation idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub kind: EventKind,
    pub agent_id: String,
    #[serde(default)]
    pub task_id: Option<Uuid>,
    /// Operator-chosen name, only set for [`EventKind::Custom`].
    #[serde(default)]
    pub name: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(
        kind: EventKind,
        agent_id: impl Into<String>,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            agent_id: agent_id.into(),
            task_id: None,
            name: None,
            timestamp,
            payload,
        }
    }

    pub fn agent_registered(agent: &Agent) -> Self {
        Self::new(
            EventKind::AgentRegistered,
            agent.id.clone(),
            serde_json::json!({ "metadata": agent.metadata }),
            agent.registered_at,
        )
    }

    pub fn agent_checkin(agent: &Agent) -> Self {
        Self::new(
            EventKind::AgentCheckin,
            agent.id.clone(),
            serde_json::json!({
                "metadata": agent.metadata,
                "checkin_count": agent.checkin_count,
            }),
            agent.last_checkin,
        )
    }

    /// Build the completion event for a task that just reached Complete or
    /// Error. Returns `None` for any other status.
    pub fn task_finished(task: &Task) -> Option<Self> {
        let kind = match task.status {
            TaskStatus::Complete => EventKind::TaskComplete,
            TaskStatus::Error => EventKind::TaskError,
            _ => return None,
        };
        let mut event = Self::new(
            kind,
            task.agent_id.clone(),
            serde_json::json!({
                "action": task.action.name,
                "result": task.result,
                "error": task.error,
            }),
            task.completed_at.unwrap_or(task.created_at),
        );
        event.task_id = Some(task.id);
        Some(event)
    }

    pub fn custom(
        agent_id: impl Into<String>,
        name: impl Into<String>,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut event = Self::new(EventKind::Custom, agent_id, payload, timestamp);
        event.name = Some(name.into());
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskAction, TaskOrigin, TaskOutcome};
    use std::collections::HashMap;

    #[test]
    fn test_task_finished_maps_status() {
        let now = Utc::now();
        let mut task = Task::new(
            "A1",
            0,
            TaskAction::new("exec", serde_json::json!({})),
            TaskOrigin::Operator,
            now,
        );
        assert!(Event::task_finished(&task).is_none());

        task.mark_sent(now).unwrap();
        task.apply_outcome(TaskOutcome::failure("denied"), now)
            .unwrap();
        let event = Event::task_finished(&task).unwrap();
        assert_eq!(event.kind, EventKind::TaskError);
        assert_eq!(event.task_id, Some(task.id));
        assert_eq!(event.payload["error"], "denied");
    }

    #[test]
    fn test_checkin_event_carries_agent() {
        let mut agent = Agent::new("A1", HashMap::new(), 60, 30, Utc::now());
        agent.record_checkin(HashMap::new(), Utc::now());
        let event = Event::agent_checkin(&agent);
        assert_eq!(event.kind, EventKind::AgentCheckin);
        assert_eq!(event.agent_id, "A1");
        assert_eq!(event.payload["checkin_count"], 1);
    }

    #[test]
    fn test_custom_event_has_name() {
        let event = Event::custom("A1", "beacon", serde_json::json!({"x": 1}), Utc::now());
        assert_eq!(event.kind, EventKind::Custom);
        assert_eq!(event.name.as_deref(), Some("beacon"));
    }

    #[test]
    fn test_event_ids_are_unique() {
        let now = Utc::now();
        let a = Event::new(EventKind::Custom, "A1", serde_json::Value::Null, now);
        let b = Event::new(EventKind::Custom, "A1", serde_json::Value::Null, now);
        assert_ne!(a.id, b.id);
    }
}
