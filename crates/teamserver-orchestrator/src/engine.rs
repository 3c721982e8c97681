use crate::config::OrchestratorConfig;
use crate::correlator::ResultCorrelator;
use crate::events::{EventSink, TriggerDispatcher};
use crate::executor::WorkerPool;
use crate::locks::AgentLocks;
use crate::queue::TaskQueueManager;
use crate::registry::{AgentRegistry, Intervals};
use crate::triggers::{LogNotifier, Notifier, TriggerEngine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use teamserver_core::{
    AgentStatus, AgentView, Clock, Event, EventPredicate, RuleAction, SystemClock, Task,
    TaskAction, TaskOutcome, TaskStatus, TeamserverError, TeamserverResult, TriggerRule,
};
use teamserver_store::Store;
use tracing::{info, warn};
use uuid::Uuid;

/// Operator input for creating or replacing a trigger rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub predicate: EventPredicate,
    pub actions: Vec<RuleAction>,
}

fn default_enabled() -> bool {
    true
}

/// Acknowledgment returned to an agent after a result submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultAck {
    pub task_id: Uuid,
    pub status: TaskStatus,
}

/// The orchestration facade.
///
/// Owns the shared store, clock and per-agent locks, and wires the registry,
/// queue manager, result correlator and trigger engine together. Events from
/// the agent-facing path go to a worker pool; callers never wait for trigger
/// evaluation.
pub struct Orchestrator {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    registry: AgentRegistry,
    queue: Arc<TaskQueueManager>,
    correlator: ResultCorrelator,
    events: Arc<dyn EventSink>,
    pool: Arc<WorkerPool>,
}

impl Orchestrator {
    /// Build with the system clock and log-based notifications.
    ///
    /// Must be called inside a tokio runtime: the trigger workers are spawned
    /// immediately.
    pub fn new(store: Arc<dyn Store>, config: OrchestratorConfig) -> TeamserverResult<Self> {
        Self::with_parts(store, config, Arc::new(SystemClock), Arc::new(LogNotifier))
    }

    pub fn with_parts(
        store: Arc<dyn Store>,
        config: OrchestratorConfig,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> TeamserverResult<Self> {
        config.validate()?;
        let defaults = Intervals::new(
            config.agents.default_interval_secs,
            config.agents.default_interval_delta_secs,
        )?;

        let locks = Arc::new(AgentLocks::new());
        let queue = Arc::new(TaskQueueManager::new(
            store.clone(),
            locks.clone(),
            clock.clone(),
        ));
        let engine = Arc::new(TriggerEngine::new(store.clone(), queue.clone(), notifier));
        let pool = WorkerPool::start(
            config.triggers.workers,
            config.triggers.max_attempts,
            config.triggers.queue_capacity,
        );
        let events: Arc<dyn EventSink> = Arc::new(TriggerDispatcher::new(engine, pool.clone()));

        let registry = AgentRegistry::new(
            store.clone(),
            locks.clone(),
            clock.clone(),
            events.clone(),
            defaults,
        );
        let correlator = ResultCorrelator::new(store.clone(), locks, clock.clone(), events.clone());

        info!(
            auto_register = config.agents.auto_register,
            workers = config.triggers.workers,
            "Orchestrator ready"
        );
        Ok(Self {
            store,
            clock,
            config,
            registry,
            queue,
            correlator,
            events,
            pool,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // --- agent-facing protocol ---

    /// Record a check-in and hand out up to `max_tasks` queued tasks.
    ///
    /// `max_tasks` is capped at the configured batch size; zero makes the
    /// call a pure heartbeat.
    pub async fn checkin(
        &self,
        agent_id: &str,
        metadata: HashMap<String, String>,
        max_tasks: usize,
    ) -> TeamserverResult<Vec<Task>> {
        if self.config.agents.auto_register {
            match self.registry.register(agent_id, metadata.clone(), None).await {
                Ok(_) => info!(agent_id = %agent_id, "Agent auto-registered on check-in"),
                Err(TeamserverError::AlreadyExists { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        if let Err(e) = self.registry.record_checkin(agent_id, metadata).await {
            warn!(agent_id = %agent_id, error = %e, "Check-in rejected");
            return Err(e);
        }

        let max = max_tasks.min(self.config.agents.max_batch_size);
        self.queue.next_batch(agent_id, max).await
    }

    /// Accept an agent's result for a sent task.
    pub async fn submit_result(
        &self,
        agent_id: &str,
        task_id: Uuid,
        outcome: TaskOutcome,
    ) -> TeamserverResult<ResultAck> {
        match self.correlator.submit_result(agent_id, task_id, outcome).await {
            Ok(task) => Ok(ResultAck {
                task_id: task.id,
                status: task.status,
            }),
            Err(e) => {
                warn!(agent_id = %agent_id, task_id = %task_id, error = %e, "Result rejected");
                Err(e)
            }
        }
    }

    // --- operator-facing protocol: agents ---

    pub async fn register_agent(
        &self,
        agent_id: &str,
        metadata: HashMap<String, String>,
        intervals: Option<Intervals>,
    ) -> TeamserverResult<AgentView> {
        let agent = self.registry.register(agent_id, metadata, intervals).await?;
        Ok(AgentView::at(agent, self.clock.now()))
    }

    pub async fn get_agent(&self, agent_id: &str) -> TeamserverResult<AgentView> {
        self.registry.get(agent_id).await
    }

    pub async fn list_agents(&self) -> TeamserverResult<Vec<AgentView>> {
        self.registry.list().await
    }

    /// Liveness at `now`, or at the orchestrator's clock if `None`.
    pub async fn agent_status(
        &self,
        agent_id: &str,
        now: Option<DateTime<Utc>>,
    ) -> TeamserverResult<AgentStatus> {
        let now = now.unwrap_or_else(|| self.clock.now());
        self.registry.get_status(agent_id, now).await
    }

    pub async fn update_agent_config(
        &self,
        agent_id: &str,
        interval: u64,
        interval_delta: u64,
    ) -> TeamserverResult<AgentView> {
        let intervals = Intervals::new(interval, interval_delta)?;
        self.registry.update_intervals(agent_id, intervals).await
    }

    // --- operator-facing protocol: tasks ---

    pub async fn enqueue_task(&self, agent_id: &str, action: TaskAction) -> TeamserverResult<Task> {
        self.queue.enqueue(agent_id, action).await
    }

    /// Cancel a queued task. The task must belong to `agent_id`.
    pub async fn cancel_task(&self, agent_id: &str, task_id: Uuid) -> TeamserverResult<Task> {
        self.queue.get_task(agent_id, task_id).await?;
        self.queue.cancel(task_id).await
    }

    pub async fn get_task(&self, agent_id: &str, task_id: Uuid) -> TeamserverResult<Task> {
        self.queue.get_task(agent_id, task_id).await
    }

    pub async fn list_tasks(
        &self,
        agent_id: &str,
        status: Option<TaskStatus>,
    ) -> TeamserverResult<Vec<Task>> {
        self.queue.list_tasks(agent_id, status).await
    }

    // --- operator-facing protocol: rules ---

    pub async fn create_rule(&self, definition: RuleDefinition) -> TeamserverResult<TriggerRule> {
        let now = self.clock.now();
        let mut rule = TriggerRule::new(definition.name, definition.predicate, definition.actions);
        rule.enabled = definition.enabled;
        rule.created_at = now;
        rule.updated_at = now;
        rule.validate()?;

        self.store.create_rule(&rule).await?;
        info!(rule_id = %rule.id, rule = %rule.name, "Trigger rule created");
        Ok(rule)
    }

    /// Replace a rule's definition, keeping its ID and creation time.
    pub async fn update_rule(
        &self,
        rule_id: Uuid,
        definition: RuleDefinition,
    ) -> TeamserverResult<TriggerRule> {
        let mut rule = self.get_rule(rule_id).await?;
        rule.name = definition.name;
        rule.enabled = definition.enabled;
        rule.predicate = definition.predicate;
        rule.actions = definition.actions;
        rule.updated_at = self.clock.now();
        rule.validate()?;

        self.store.update_rule(&rule).await?;
        info!(rule_id = %rule.id, rule = %rule.name, enabled = rule.enabled, "Trigger rule updated");
        Ok(rule)
    }

    pub async fn delete_rule(&self, rule_id: Uuid) -> TeamserverResult<()> {
        self.store.delete_rule(rule_id).await?;
        info!(rule_id = %rule_id, "Trigger rule deleted");
        Ok(())
    }

    pub async fn get_rule(&self, rule_id: Uuid) -> TeamserverResult<TriggerRule> {
        self.store
            .get_rule(rule_id)
            .await?
            .ok_or_else(|| TeamserverError::rule_not_found(rule_id))
    }

    pub async fn list_rules(&self) -> TeamserverResult<Vec<TriggerRule>> {
        self.store.list_rules().await
    }

    // --- events ---

    /// Raise a custom event about an existing agent.
    pub async fn publish_event(
        &self,
        agent_id: &str,
        name: &str,
        payload: serde_json::Value,
    ) -> TeamserverResult<Event> {
        if name.trim().is_empty() {
            return Err(TeamserverError::Validation(
                "event name must not be empty".into(),
            ));
        }
        if self.store.get_agent(agent_id).await?.is_none() {
            return Err(TeamserverError::agent_not_found(agent_id));
        }
        let event = Event::custom(agent_id, name, payload, self.clock.now());
        info!(agent_id = %agent_id, event_id = %event.id, name = %name, "Custom event published");
        self.events.emit(event.clone());
        Ok(event)
    }

    /// Wait for all pending trigger evaluations to finish.
    pub async fn flush(&self) {
        self.pool.flush().await;
    }

    /// Trigger evaluations submitted but not yet finished.
    pub fn pending_triggers(&self) -> usize {
        self.pool.pending()
    }

    /// Forget rule firings for events older than the ledger retention.
    pub async fn prune_firings(&self) -> TeamserverResult<usize> {
        let retention = std::time::Duration::from_secs(self.config.triggers.ledger_retention_secs);
        let retention = chrono::Duration::from_std(retention).map_err(|e| {
            TeamserverError::Config(format!("triggers.ledger_retention_secs out of range: {e}"))
        })?;
        let cutoff = self.clock.now() - retention;
        let removed = self.store.prune_firings(cutoff).await?;
        if removed > 0 {
            info!(removed, %cutoff, "Pruned rule firing ledger");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use teamserver_core::{EventKind, ManualClock, TaskTarget};
    use teamserver_store::MemoryStore;

    fn orchestrator(config: OrchestratorConfig) -> (Orchestrator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_epoch());
        let orch = Orchestrator::with_parts(
            Arc::new(MemoryStore::new()),
            config,
            clock.clone(),
            Arc::new(LogNotifier),
        )
        .unwrap();
        (orch, clock)
    }

    #[tokio::test]
    async fn test_checkin_unknown_agent_without_auto_register() {
        let (orch, _) = orchestrator(OrchestratorConfig::default());
        let err = orch.checkin("A1", HashMap::new(), 5).await.unwrap_err();
        assert!(matches!(err, TeamserverError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_auto_register_on_checkin() {
        let mut config = OrchestratorConfig::default();
        config.agents.auto_register = true;
        let (orch, _) = orchestrator(config);

        let tasks = orch.checkin("A1", HashMap::new(), 5).await.unwrap();
        assert!(tasks.is_empty());
        let view = orch.get_agent("A1").await.unwrap();
        assert_eq!(view.agent.checkin_count, 1);
        assert_eq!(view.agent.interval, 60);
    }

    #[tokio::test]
    async fn test_batch_is_capped() {
        let mut config = OrchestratorConfig::default();
        config.agents.max_batch_size = 2;
        let (orch, _) = orchestrator(config);
        orch.register_agent("A1", HashMap::new(), None).await.unwrap();
        for i in 0..3 {
            orch.enqueue_task("A1", TaskAction::new(format!("step{i}"), json!({})))
                .await
                .unwrap();
        }
        assert_eq!(orch.checkin("A1", HashMap::new(), 10).await.unwrap().len(), 2);
        assert!(orch.checkin("A1", HashMap::new(), 0).await.unwrap().is_empty());
        assert_eq!(orch.checkin("A1", HashMap::new(), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_checks_owner() {
        let (orch, _) = orchestrator(OrchestratorConfig::default());
        orch.register_agent("A1", HashMap::new(), None).await.unwrap();
        orch.register_agent("A2", HashMap::new(), None).await.unwrap();
        let task = orch
            .enqueue_task("A1", TaskAction::new("exec", json!({})))
            .await
            .unwrap();

        let err = orch.cancel_task("A2", task.id).await.unwrap_err();
        assert!(matches!(err, TeamserverError::NotFound { .. }));
        let canceled = orch.cancel_task("A1", task.id).await.unwrap();
        assert_eq!(canceled.status, TaskStatus::Canceled);
    }

    #[tokio::test]
    async fn test_rule_crud() {
        let (orch, clock) = orchestrator(OrchestratorConfig::default());
        let rule = orch
            .create_rule(RuleDefinition {
                name: "ping back".into(),
                enabled: true,
                predicate: EventPredicate::on(EventKind::AgentCheckin),
                actions: vec![RuleAction::EnqueueTask {
                    target: TaskTarget::Subject,
                    action: TaskAction::new("ping", json!({})),
                }],
            })
            .await
            .unwrap();

        clock.advance_secs(10);
        let updated = orch
            .update_rule(
                rule.id,
                RuleDefinition {
                    name: "ping back".into(),
                    enabled: false,
                    predicate: EventPredicate::on(EventKind::AgentCheckin),
                    actions: rule.actions.clone(),
                },
            )
            .await
            .unwrap();
        assert!(!updated.enabled);
        assert_eq!(updated.created_at, rule.created_at);
        assert!(updated.updated_at > rule.updated_at);

        orch.delete_rule(rule.id).await.unwrap();
        let err = orch.get_rule(rule.id).await.unwrap_err();
        assert!(matches!(err, TeamserverError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_invalid_rule_rejected() {
        let (orch, _) = orchestrator(OrchestratorConfig::default());
        let err = orch
            .create_rule(RuleDefinition {
                name: "empty".into(),
                enabled: true,
                predicate: EventPredicate::default(),
                actions: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TeamserverError::Validation(_)));
        assert!(orch.list_rules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prune_firings_after_retention() {
        let (orch, clock) = orchestrator(OrchestratorConfig::default());
        orch.register_agent("A1", HashMap::new(), None).await.unwrap();
        orch.create_rule(RuleDefinition {
            name: "on checkin".into(),
            enabled: true,
            predicate: EventPredicate::on(EventKind::AgentCheckin),
            actions: vec![RuleAction::Notify {
                channel: "ops".into(),
                message: "{agent_id} is alive".into(),
            }],
        })
        .await
        .unwrap();

        orch.checkin("A1", HashMap::new(), 0).await.unwrap();
        orch.checkin("A1", HashMap::new(), 0).await.unwrap();
        orch.flush().await;
        assert_eq!(orch.prune_firings().await.unwrap(), 0);

        let retention = i64::try_from(orch.config().triggers.ledger_retention_secs).unwrap();
        clock.advance_secs(retention + 1);
        assert_eq!(orch.prune_firings().await.unwrap(), 2);
        assert_eq!(orch.prune_firings().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_publish_event_requires_agent() {
        let (orch, _) = orchestrator(OrchestratorConfig::default());
        let err = orch
            .publish_event("ghost", "beacon", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, TeamserverError::NotFound { .. }));
    }
}
