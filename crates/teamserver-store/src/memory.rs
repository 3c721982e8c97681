use crate::store::{AgentStore, FiringLedger, RuleStore, TaskStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use teamserver_core::{Agent, Task, TeamserverError, TeamserverResult, TriggerRule};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    agents: HashMap<String, Agent>,
    tasks: HashMap<Uuid, Task>,
    /// agent ID -> task IDs in insertion order
    tasks_by_agent: HashMap<String, Vec<Uuid>>,
    rules: HashMap<Uuid, TriggerRule>,
    /// (event ID, rule ID) -> when the event occurred
    firings: HashMap<(Uuid, Uuid), DateTime<Utc>>,
}

/// In-process store. Constructed once per server and shared behind an `Arc`.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn create_agent(&self, agent: &Agent) -> TeamserverResult<()> {
        let mut inner = self.inner.write().await;
        if inner.agents.contains_key(&agent.id) {
            return Err(TeamserverError::AlreadyExists {
                kind: "agent",
                id: agent.id.clone(),
            });
        }
        inner.agents.insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn get_agent(&self, id: &str) -> TeamserverResult<Option<Agent>> {
        Ok(self.inner.read().await.agents.get(id).cloned())
    }

    async fn update_agent(&self, agent: &Agent) -> TeamserverResult<()> {
        let mut inner = self.inner.write().await;
        match inner.agents.get_mut(&agent.id) {
            Some(slot) => {
                *slot = agent.clone();
                Ok(())
            }
            None => Err(TeamserverError::agent_not_found(&agent.id)),
        }
    }

    async fn list_agents(&self) -> TeamserverResult<Vec<Agent>> {
        let inner = self.inner.read().await;
        let mut agents: Vec<Agent> = inner.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn create_task(&self, task: &Task) -> TeamserverResult<()> {
        let mut inner = self.inner.write().await;
        if inner.tasks.contains_key(&task.id) {
            return Err(TeamserverError::AlreadyExists {
                kind: "task",
                id: task.id.to_string(),
            });
        }
        inner.tasks.insert(task.id, task.clone());
        inner
            .tasks_by_agent
            .entry(task.agent_id.clone())
            .or_default()
            .push(task.id);
        Ok(())
    }

    async fn get_task(&self, agent_id: &str, task_id: Uuid) -> TeamserverResult<Option<Task>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tasks
            .get(&task_id)
            .filter(|t| t.agent_id == agent_id)
            .cloned())
    }

    async fn find_task(&self, task_id: Uuid) -> TeamserverResult<Option<Task>> {
        Ok(self.inner.read().await.tasks.get(&task_id).cloned())
    }

    async fn update_task(&self, task: &Task) -> TeamserverResult<()> {
        let mut inner = self.inner.write().await;
        match inner.tasks.get_mut(&task.id) {
            Some(slot) if slot.agent_id == task.agent_id => {
                *slot = task.clone();
                Ok(())
            }
            _ => Err(TeamserverError::task_not_found(task.id)),
        }
    }

    async fn list_tasks(&self, agent_id: &str) -> TeamserverResult<Vec<Task>> {
        let inner = self.inner.read().await;
        let mut tasks: Vec<Task> = inner
            .tasks_by_agent
            .get(agent_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.tasks.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        tasks.sort_by_key(|t| t.sequence);
        Ok(tasks)
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn create_rule(&self, rule: &TriggerRule) -> TeamserverResult<()> {
        let mut inner = self.inner.write().await;
        if inner.rules.contains_key(&rule.id) {
            return Err(TeamserverError::AlreadyExists {
                kind: "rule",
                id: rule.id.to_string(),
            });
        }
        inner.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn get_rule(&self, id: Uuid) -> TeamserverResult<Option<TriggerRule>> {
        Ok(self.inner.read().await.rules.get(&id).cloned())
    }

    async fn update_rule(&self, rule: &TriggerRule) -> TeamserverResult<()> {
        let mut inner = self.inner.write().await;
        match inner.rules.get_mut(&rule.id) {
            Some(slot) => {
                *slot = rule.clone();
                Ok(())
            }
            None => Err(TeamserverError::rule_not_found(rule.id)),
        }
    }

    async fn delete_rule(&self, id: Uuid) -> TeamserverResult<()> {
        match self.inner.write().await.rules.remove(&id) {
            Some(_) => Ok(()),
            None => Err(TeamserverError::rule_not_found(id)),
        }
    }

    async fn list_rules(&self) -> TeamserverResult<Vec<TriggerRule>> {
        let inner = self.inner.read().await;
        let mut rules: Vec<TriggerRule> = inner.rules.values().cloned().collect();
        rules.sort_by_key(|r| r.created_at);
        Ok(rules)
    }
}

#[async_trait]
impl FiringLedger for MemoryStore {
    async fn claim_firing(
        &self,
        event_id: Uuid,
        rule_id: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> TeamserverResult<bool> {
        let mut inner = self.inner.write().await;
        if inner.firings.contains_key(&(event_id, rule_id)) {
            return Ok(false);
        }
        inner.firings.insert((event_id, rule_id), occurred_at);
        Ok(true)
    }

    async fn prune_firings(&self, before: DateTime<Utc>) -> TeamserverResult<usize> {
        let mut inner = self.inner.write().await;
        let count = inner.firings.len();
        inner.firings.retain(|_, occurred_at| *occurred_at >= before);
        Ok(count - inner.firings.len())
    }
}
