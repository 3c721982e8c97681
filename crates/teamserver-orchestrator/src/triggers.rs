use crate::queue::TaskQueueManager;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use teamserver_core::{
    render_template, render_value, Event, RuleAction, TaskAction, TaskOrigin, TaskTarget,
    TeamserverResult, TriggerRule,
};
use teamserver_store::Store;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A rendered `Notify` action, ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub channel: String,
    pub message: String,
    pub rule_id: Uuid,
    pub event_id: Uuid,
    pub agent_id: String,
}

/// Delivers notifications raised by trigger rules.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, notification: Notification) -> TeamserverResult<()>;
}

/// Writes notifications to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, notification: Notification) -> TeamserverResult<()> {
        info!(
            channel = %notification.channel,
            rule_id = %notification.rule_id,
            event_id = %notification.event_id,
            agent_id = %notification.agent_id,
            "{}",
            notification.message
        );
        Ok(())
    }
}

/// Evaluates trigger rules against events.
///
/// Each (event, rule) pair fires at most once: the firing is claimed in the
/// store before any action runs, so a redelivered event is a no-op for rules
/// that already fired on it.
pub struct TriggerEngine {
    store: Arc<dyn Store>,
    queue: Arc<TaskQueueManager>,
    notifier: Arc<dyn Notifier>,
}

impl TriggerEngine {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<TaskQueueManager>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            queue,
            notifier,
        }
    }

    /// Fire every matching rule that has not fired for this event yet.
    ///
    /// Returns the IDs of tasks created. Store failures while reading rules or
    /// claiming a firing are returned so the caller can retry; failures of
    /// individual actions are logged and do not affect other rules.
    pub async fn on_event(&self, event: &Event) -> TeamserverResult<Vec<Uuid>> {
        let rules = self.store.list_rules().await?;
        let mut created = Vec::new();

        for rule in rules.iter().filter(|r| r.matches(event)) {
            if !self
                .store
                .claim_firing(event.id, rule.id, event.timestamp)
                .await?
            {
                debug!(rule_id = %rule.id, event_id = %event.id, "Rule already fired for event");
                continue;
            }
            info!(
                rule = %rule.name,
                rule_id = %rule.id,
                event_id = %event.id,
                kind = %event.kind,
                "Trigger rule fired"
            );
            for action in &rule.actions {
                self.apply(rule, action, event, &mut created).await;
            }
        }
        Ok(created)
    }

    async fn apply(
        &self,
        rule: &TriggerRule,
        action: &RuleAction,
        event: &Event,
        created: &mut Vec<Uuid>,
    ) {
        match action {
            RuleAction::EnqueueTask { target, action } => {
                let targets = match self.resolve(target, event).await {
                    Ok(targets) => targets,
                    Err(e) => {
                        warn!(rule_id = %rule.id, error = %e, "Could not resolve rule targets");
                        return;
                    }
                };
                let rendered = TaskAction {
                    name: render_template(&action.name, event),
                    params: render_value(&action.params, event),
                };
                let origin = TaskOrigin::Rule {
                    rule_id: rule.id,
                    event_id: event.id,
                };
                for agent_id in targets {
                    match self
                        .queue
                        .enqueue_from(&agent_id, rendered.clone(), origin.clone())
                        .await
                    {
                        Ok(task) => created.push(task.id),
                        Err(e) => warn!(
                            rule_id = %rule.id,
                            agent_id = %agent_id,
                            error = %e,
                            "Rule could not enqueue task"
                        ),
                    }
                }
            }
            RuleAction::Notify { channel, message } => {
                let notification = Notification {
                    channel: channel.clone(),
                    message: render_template(message, event),
                    rule_id: rule.id,
                    event_id: event.id,
                    agent_id: event.agent_id.clone(),
                };
                if let Err(e) = self.notifier.send(notification).await {
                    warn!(
                        rule_id = %rule.id,
                        notifier = self.notifier.name(),
                        error = %e,
                        "Rule notification failed"
                    );
                }
            }
        }
    }

    async fn resolve(&self, target: &TaskTarget, event: &Event) -> TeamserverResult<Vec<String>> {
        Ok(match target {
            TaskTarget::Subject => vec![event.agent_id.clone()],
            TaskTarget::Agents(ids) => ids.clone(),
            TaskTarget::AllAgents => self
                .store
                .list_agents()
                .await?
                .into_iter()
                .map(|a| a.id)
                .collect(),
        })
    }
}
