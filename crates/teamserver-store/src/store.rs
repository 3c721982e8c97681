use async_trait::async_trait;
use chrono::{DateTime, Utc};
use teamserver_core::{Agent, Task, TeamserverResult, TriggerRule};
use uuid::Uuid;

/// Durable storage for [`Agent`] records keyed by agent ID.
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Fails with `AlreadyExists` if the ID is taken.
    async fn create_agent(&self, agent: &Agent) -> TeamserverResult<()>;
    async fn get_agent(&self, id: &str) -> TeamserverResult<Option<Agent>>;
    /// Fails with `NotFound` if the agent was never created.
    async fn update_agent(&self, agent: &Agent) -> TeamserverResult<()>;
    async fn list_agents(&self) -> TeamserverResult<Vec<Agent>>;
}

/// Durable storage for [`Task`] records, scoped by owning agent.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Fails with `AlreadyExists` if the task ID is taken.
    async fn create_task(&self, task: &Task) -> TeamserverResult<()>;
    /// Returns `None` if the task does not exist or belongs to another agent.
    async fn get_task(&self, agent_id: &str, task_id: Uuid) -> TeamserverResult<Option<Task>>;
    /// Look a task up without knowing its owner.
    async fn find_task(&self, task_id: Uuid) -> TeamserverResult<Option<Task>>;
    /// Fails with `NotFound` if the task is unknown under `task.agent_id`.
    async fn update_task(&self, task: &Task) -> TeamserverResult<()>;
    /// All tasks of one agent, in creation (`sequence`) order.
    async fn list_tasks(&self, agent_id: &str) -> TeamserverResult<Vec<Task>>;
}

/// Durable storage for operator-managed [`TriggerRule`]s.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn create_rule(&self, rule: &TriggerRule) -> TeamserverResult<()>;
    async fn get_rule(&self, id: Uuid) -> TeamserverResult<Option<TriggerRule>>;
    async fn update_rule(&self, rule: &TriggerRule) -> TeamserverResult<()>;
    async fn delete_rule(&self, id: Uuid) -> TeamserverResult<()>;
    async fn list_rules(&self) -> TeamserverResult<Vec<TriggerRule>>;
}

/// Record of which (event, rule) pairs have already fired.
///
/// Entries carry the time of the event they belong to so the ledger can be
/// pruned once redelivery of that event is no longer possible.
#[async_trait]
pub trait FiringLedger: Send + Sync {
    /// Atomically claim the pair. Returns `true` for the first caller only.
    async fn claim_firing(
        &self,
        event_id: Uuid,
        rule_id: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> TeamserverResult<bool>;

    /// Forget claims for events that occurred before `before`. Returns the
    /// number of entries removed.
    async fn prune_firings(&self, before: DateTime<Utc>) -> TeamserverResult<usize>;
}

/// Everything the orchestrator needs from persistence.
pub trait Store: AgentStore + TaskStore + RuleStore + FiringLedger {}

impl<T> Store for T where T: AgentStore + TaskStore + RuleStore + FiringLedger {}
