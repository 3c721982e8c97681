use crate::event::{Event, EventKind};
use crate::task::TaskAction;
use crate::{TeamserverError, TeamserverResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Which agents an `EnqueueTask` action targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TaskTarget {
    /// The agent the event is about.
    #[default]
    Subject,
    /// A fixed list of agents.
    Agents(Vec<String>),
    /// Every registered agent.
    AllAgents,
}

/// What a rule does when it matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    EnqueueTask {
        #[serde(default)]
        target: TaskTarget,
        action: TaskAction,
    },
    Notify {
        channel: String,
        message: String,
    },
}

/// Matching conditions over an [`Event`]. Empty lists match anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPredicate {
    #[serde(default)]
    pub kinds: Vec<EventKind>,
    #[serde(default)]
    pub agent_ids: Vec<String>,
    /// Only meaningful for custom events.
    #[serde(default)]
    pub custom_name: Option<String>,
    /// Top-level keys that must be present in the event payload with equal values.
    #[serde(default)]
    pub payload: HashMap<String, serde_json::Value>,
}

impl EventPredicate {
    pub fn on(kind: EventKind) -> Self {
        Self {
            kinds: vec![kind],
            ..Self::default()
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if !self.agent_ids.is_empty() && !self.agent_ids.contains(&event.agent_id) {
            return false;
        }
        if let Some(name) = &self.custom_name {
            if event.name.as_deref() != Some(name.as_str()) {
                return false;
            }
        }
        self.payload
            .iter()
            .all(|(key, expected)| event.payload.get(key) == Some(expected))
    }
}

/// A standing rule that reacts to events by enqueueing tasks or notifying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRule {
    pub id: Uuid,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub predicate: EventPredicate,
    pub actions: Vec<RuleAction>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl TriggerRule {
    pub fn new(
        name: impl Into<String>,
        predicate: EventPredicate,
        actions: Vec<RuleAction>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            enabled: true,
            predicate,
            actions,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.enabled && self.predicate.matches(event)
    }

    /// Reject rules that could never do anything useful.
    pub fn validate(&self) -> TeamserverResult<()> {
        if self.name.trim().is_empty() {
            return Err(TeamserverError::Validation(
                "rule name must not be empty".to_string(),
            ));
        }
        if self.actions.is_empty() {
            return Err(TeamserverError::Validation(format!(
                "rule '{}' has no actions",
                self.name
            )));
        }
        for action in &self.actions {
            match action {
                RuleAction::EnqueueTask { target, action } => {
                    action.clone().validate()?;
                    if matches!(target, TaskTarget::Agents(ids) if ids.is_empty()) {
                        return Err(TeamserverError::Validation(format!(
                            "rule '{}' targets an empty agent list",
                            self.name
                        )));
                    }
                }
                RuleAction::Notify { channel, .. } if channel.trim().is_empty() => {
                    return Err(TeamserverError::Validation(format!(
                        "rule '{}' notifies an unnamed channel",
                        self.name
                    )));
                }
                RuleAction::Notify { .. } => {}
            }
        }
        Ok(())
    }
}

/// Replace `{agent_id}`, `{task_id}`, `{event_id}` and `{kind}` with values
/// from `event`. An absent task id renders as an empty string.
pub fn render_template(template: &str, event: &Event) -> String {
    let task_id = event.task_id.map(|id| id.to_string()).unwrap_or_default();
    template
        .replace("{agent_id}", &event.agent_id)
        .replace("{task_id}", &task_id)
        .replace("{event_id}", &event.id.to_string())
        .replace("{kind}", &event.kind.to_string())
}

/// Apply [`render_template`] to every string inside a JSON value.
pub fn render_value(value: &serde_json::Value, event: &Event) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(render_template(s, event)),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|v| render_value(v, event)).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, event)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(kind: EventKind) -> Event {
        Event::new(kind, "A1", json!({"action": "exec", "exit": 0}), Utc::now())
    }

    #[test]
    fn test_empty_predicate_matches_all() {
        let predicate = EventPredicate::default();
        assert!(predicate.matches(&event(EventKind::AgentCheckin)));
        assert!(predicate.matches(&event(EventKind::TaskError)));
    }

    #[test]
    fn test_predicate_kind_and_agent() {
        let mut predicate = EventPredicate::on(EventKind::TaskComplete);
        assert!(predicate.matches(&event(EventKind::TaskComplete)));
        assert!(!predicate.matches(&event(EventKind::TaskError)));

        predicate.agent_ids = vec!["A2".into()];
        assert!(!predicate.matches(&event(EventKind::TaskComplete)));
    }

    #[test]
    fn test_predicate_payload_subset() {
        let mut predicate = EventPredicate::default();
        predicate.payload.insert("action".into(), json!("exec"));
        assert!(predicate.matches(&event(EventKind::TaskComplete)));

        predicate.payload.insert("exit".into(), json!(1));
        assert!(!predicate.matches(&event(EventKind::TaskComplete)));
    }

    #[test]
    fn test_predicate_custom_name() {
        let predicate = EventPredicate {
            custom_name: Some("beacon".into()),
            ..EventPredicate::default()
        };
        let named = Event::custom("A1", "beacon", json!({}), Utc::now());
        let other = Event::custom("A1", "other", json!({}), Utc::now());
        assert!(predicate.matches(&named));
        assert!(!predicate.matches(&other));
    }

    #[test]
    fn test_disabled_rule_never_matches() {
        let mut rule = TriggerRule::new(
            "noop",
            EventPredicate::default(),
            vec![RuleAction::Notify {
                channel: "ops".into(),
                message: "hi".into(),
            }],
        );
        assert!(rule.matches(&event(EventKind::AgentCheckin)));
        rule.enabled = false;
        assert!(!rule.matches(&event(EventKind::AgentCheckin)));
    }

    #[test]
    fn test_rule_validation() {
        let empty = TriggerRule::new("empty", EventPredicate::default(), vec![]);
        assert!(empty.validate().is_err());

        let bad_action = TriggerRule::new(
            "bad",
            EventPredicate::default(),
            vec![RuleAction::EnqueueTask {
                target: TaskTarget::Subject,
                action: TaskAction::new("", json!({})),
            }],
        );
        assert!(bad_action.validate().is_err());

        let no_agents = TriggerRule::new(
            "nobody",
            EventPredicate::default(),
            vec![RuleAction::EnqueueTask {
                target: TaskTarget::Agents(vec![]),
                action: TaskAction::new("exec", json!({})),
            }],
        );
        assert!(no_agents.validate().is_err());
    }

    #[test]
    fn test_enqueue_target_defaults_to_subject() {
        assert_eq!(TaskTarget::default(), TaskTarget::Subject);
        let action: RuleAction = serde_json::from_value(json!({
            "type": "enqueue_task",
            "action": {"name": "collect"}
        }))
        .unwrap();
        assert!(matches!(
            action,
            RuleAction::EnqueueTask {
                target: TaskTarget::Subject,
                ..
            }
        ));
    }

    #[test]
    fn test_render_template() {
        let mut event = event(EventKind::TaskComplete);
        let task_id = Uuid::new_v4();
        event.task_id = Some(task_id);
        let rendered = render_template("{kind} from {agent_id} ({task_id})", &event);
        assert_eq!(rendered, format!("task_complete from A1 ({task_id})"));
    }

    #[test]
    fn test_render_value_recurses() {
        let event = event(EventKind::AgentCheckin);
        let rendered = render_value(&json!({"args": ["--id", "{agent_id}"], "n": 3}), &event);
        assert_eq!(rendered, json!({"args": ["--id", "A1"], "n": 3}));
    }

    #[test]
    fn test_rule_deserializes_from_toml_shape() {
        let rule: TriggerRule = serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "name": "follow-up",
            "predicate": {"kinds": ["task_complete"]},
            "actions": [{
                "type": "enqueue_task",
                "action": {"name": "exec", "params": {"cmd": "id"}}
            }],
            "created_at": Utc::now(),
            "updated_at": Utc::now(),
        }))
        .unwrap();
        assert!(rule.enabled);
        assert!(matches!(
            &rule.actions[0],
            RuleAction::EnqueueTask { target: TaskTarget::Subject, .. }
        ));
    }
}
