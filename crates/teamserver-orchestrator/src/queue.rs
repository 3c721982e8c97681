use crate::locks::AgentLocks;
use std::sync::Arc;
use teamserver_core::{
    Clock, Task, TaskAction, TaskOrigin, TaskStatus, TeamserverError, TeamserverResult,
};
use teamserver_store::Store;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Per-agent FIFO task queues on top of the store.
///
/// Order comes from the agent's `task_sequence` counter, assigned under the
/// agent lock. Handing tasks out flips them to `Sent` under the same lock, so
/// two concurrent check-ins for one agent never see the same task.
pub struct TaskQueueManager {
    store: Arc<dyn Store>,
    locks: Arc<AgentLocks>,
    clock: Arc<dyn Clock>,
}

impl TaskQueueManager {
    pub fn new(store: Arc<dyn Store>, locks: Arc<AgentLocks>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            locks,
            clock,
        }
    }

    /// Queue an operator-issued task.
    pub async fn enqueue(&self, agent_id: &str, action: TaskAction) -> TeamserverResult<Task> {
        self.enqueue_from(agent_id, action, TaskOrigin::Operator)
            .await
    }

    /// Queue a task, recording where it came from.
    pub async fn enqueue_from(
        &self,
        agent_id: &str,
        action: TaskAction,
        origin: TaskOrigin,
    ) -> TeamserverResult<Task> {
        let action = action.validate()?;

        let _guard = self.locks.lock(agent_id).await;
        let mut agent = self
            .store
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| TeamserverError::agent_not_found(agent_id))?;

        let sequence = agent.next_task_sequence();
        self.store.update_agent(&agent).await?;

        let task = Task::new(agent_id, sequence, action, origin, self.clock.now());
        self.store.create_task(&task).await?;

        info!(
            agent_id = %agent_id,
            task_id = %task.id,
            action = %task.action.name,
            sequence,
            "Task queued"
        );
        Ok(task)
    }

    /// Take up to `max` queued tasks, oldest first, and mark them sent.
    pub async fn next_batch(&self, agent_id: &str, max: usize) -> TeamserverResult<Vec<Task>> {
        let _guard = self.locks.lock(agent_id).await;
        if self.store.get_agent(agent_id).await?.is_none() {
            return Err(TeamserverError::agent_not_found(agent_id));
        }
        if max == 0 {
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let mut batch = Vec::new();
        let mut originals = Vec::new();
        for task in self.store.list_tasks(agent_id).await? {
            if batch.len() >= max {
                break;
            }
            if task.status != TaskStatus::Queued {
                continue;
            }
            let mut sent = task.clone();
            let written = match sent.mark_sent(now) {
                Ok(()) => self.store.update_task(&sent).await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                // The batch is never delivered, so nothing in it may stay sent.
                self.restore_queued(agent_id, &originals).await;
                return Err(e);
            }
            originals.push(task);
            batch.push(sent);
        }

        if !batch.is_empty() {
            debug!(agent_id = %agent_id, count = batch.len(), "Tasks sent");
        }
        Ok(batch)
    }

    async fn restore_queued(&self, agent_id: &str, tasks: &[Task]) {
        for task in tasks {
            if let Err(e) = self.store.update_task(task).await {
                error!(
                    agent_id = %agent_id,
                    task_id = %task.id,
                    error = %e,
                    "Could not return task to the queue"
                );
            }
        }
    }

    /// Cancel a task that has not been handed out yet.
    pub async fn cancel(&self, task_id: Uuid) -> TeamserverResult<Task> {
        let owner = self
            .store
            .find_task(task_id)
            .await?
            .ok_or_else(|| TeamserverError::task_not_found(task_id))?
            .agent_id;

        let _guard = self.locks.lock(&owner).await;
        // Re-read under the lock: a check-in may have sent it meanwhile.
        let mut task = self
            .store
            .get_task(&owner, task_id)
            .await?
            .ok_or_else(|| TeamserverError::task_not_found(task_id))?;
        task.mark_canceled()?;
        self.store.update_task(&task).await?;

        info!(agent_id = %owner, task_id = %task_id, "Task canceled");
        Ok(task)
    }

    pub async fn get_task(&self, agent_id: &str, task_id: Uuid) -> TeamserverResult<Task> {
        self.store
            .get_task(agent_id, task_id)
            .await?
            .ok_or_else(|| TeamserverError::task_not_found(task_id))
    }

    /// All of an agent's tasks in queue order, optionally narrowed to one status.
    pub async fn list_tasks(
        &self,
        agent_id: &str,
        status: Option<TaskStatus>,
    ) -> TeamserverResult<Vec<Task>> {
        if self.store.get_agent(agent_id).await?.is_none() {
            return Err(TeamserverError::agent_not_found(agent_id));
        }
        let tasks = self.store.list_tasks(agent_id).await?;
        Ok(match status {
            Some(status) => tasks.into_iter().filter(|t| t.status == status).collect(),
            None => tasks,
        })
    }
}
