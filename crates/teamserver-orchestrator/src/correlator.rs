use crate::events::EventSink;
use crate::locks::AgentLocks;
use std::sync::Arc;
use teamserver_core::{
    Clock, Event, Task, TaskOutcome, TaskStatus, TeamserverError, TeamserverResult,
};
use teamserver_store::Store;
use tracing::info;
use uuid::Uuid;

/// Matches agent-reported results to the tasks that were sent out.
pub struct ResultCorrelator {
    store: Arc<dyn Store>,
    locks: Arc<AgentLocks>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl ResultCorrelator {
    pub fn new(
        store: Arc<dyn Store>,
        locks: Arc<AgentLocks>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            locks,
            clock,
            events,
        }
    }

    /// Record the outcome of a sent task and emit its completion event.
    ///
    /// Only the first result for a task is accepted; later submissions fail
    /// with `InvalidState` and change nothing.
    pub async fn submit_result(
        &self,
        agent_id: &str,
        task_id: Uuid,
        outcome: TaskOutcome,
    ) -> TeamserverResult<Task> {
        let _guard = self.locks.lock(agent_id).await;
        let mut task = self
            .store
            .get_task(agent_id, task_id)
            .await?
            .ok_or_else(|| TeamserverError::task_not_found(task_id))?;

        if task.status != TaskStatus::Sent {
            return Err(TeamserverError::InvalidState(format!(
                "task {} is {}, results are only accepted for sent tasks",
                task.id, task.status
            )));
        }
        outcome.validate()?;
        task.apply_outcome(outcome, self.clock.now())?;
        self.store.update_task(&task).await?;

        info!(
            agent_id = %agent_id,
            task_id = %task.id,
            status = %task.status,
            "Task result recorded"
        );
        if let Some(event) = Event::task_finished(&task) {
            self.events.emit(event);
        }
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TaskQueueManager;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;
    use teamserver_core::{Agent, EventKind, ManualClock, TaskAction};
    use teamserver_store::MemoryStore;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Event>>);

    impl EventSink for Recorder {
        fn emit(&self, event: Event) {
            self.0.lock().push(event);
        }
    }

    async fn setup() -> (TaskQueueManager, ResultCorrelator, Arc<Recorder>) {
        let clock = Arc::new(ManualClock::at_epoch());
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let locks = Arc::new(AgentLocks::new());
        for id in ["A1", "A2"] {
            store
                .create_agent(&Agent::new(id, HashMap::new(), 60, 30, clock.now()))
                .await
                .unwrap();
        }
        let events = Arc::new(Recorder::default());
        let queue = TaskQueueManager::new(store.clone(), locks.clone(), clock.clone());
        let correlator = ResultCorrelator::new(store, locks, clock, events.clone());
        (queue, correlator, events)
    }

    #[tokio::test]
    async fn test_result_completes_sent_task_once() {
        let (queue, correlator, events) = setup().await;
        let task = queue
            .enqueue("A1", TaskAction::new("exec", json!({"cmd": "id"})))
            .await
            .unwrap();
        queue.next_batch("A1", 1).await.unwrap();

        let done = correlator
            .submit_result("A1", task.id, TaskOutcome::success(json!("uid=0")))
            .await
            .unwrap();
        assert_eq!(done.status, TaskStatus::Complete);
        assert_eq!(done.result, Some(json!("uid=0")));

        let err = correlator
            .submit_result("A1", task.id, TaskOutcome::failure("late"))
            .await
            .unwrap_err();
        assert!(matches!(err, TeamserverError::InvalidState(_)));

        let recorded = events.0.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].kind, EventKind::TaskComplete);
        assert_eq!(recorded[0].task_id, Some(task.id));
    }

    #[tokio::test]
    async fn test_result_for_queued_task_rejected() {
        let (queue, correlator, events) = setup().await;
        let task = queue
            .enqueue("A1", TaskAction::new("exec", json!({})))
            .await
            .unwrap();
        let err = correlator
            .submit_result("A1", task.id, TaskOutcome::success(json!(null)))
            .await
            .unwrap_err();
        assert!(matches!(err, TeamserverError::InvalidState(_)));
        assert!(events.0.lock().is_empty());
    }

    #[tokio::test]
    async fn test_result_from_wrong_agent_is_not_found() {
        let (queue, correlator, _) = setup().await;
        let task = queue
            .enqueue("A1", TaskAction::new("exec", json!({})))
            .await
            .unwrap();
        queue.next_batch("A1", 1).await.unwrap();

        let err = correlator
            .submit_result("A2", task.id, TaskOutcome::success(json!(null)))
            .await
            .unwrap_err();
        assert!(matches!(err, TeamserverError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_result_is_invalid_state_even_if_malformed() {
        let (queue, correlator, events) = setup().await;
        let task = queue
            .enqueue("A1", TaskAction::new("exec", json!({})))
            .await
            .unwrap();
        queue.next_batch("A1", 1).await.unwrap();
        correlator
            .submit_result("A1", task.id, TaskOutcome::success(json!("ok")))
            .await
            .unwrap();

        let err = correlator
            .submit_result("A1", task.id, TaskOutcome::failure(""))
            .await
            .unwrap_err();
        assert!(matches!(err, TeamserverError::InvalidState(_)));
        assert_eq!(events.0.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_failure_message_rejected_for_sent_task() {
        let (queue, correlator, events) = setup().await;
        let task = queue
            .enqueue("A1", TaskAction::new("exec", json!({})))
            .await
            .unwrap();
        queue.next_batch("A1", 1).await.unwrap();

        let err = correlator
            .submit_result("A1", task.id, TaskOutcome::failure("  "))
            .await
            .unwrap_err();
        assert!(matches!(err, TeamserverError::Validation(_)));
        assert!(events.0.lock().is_empty());

        let still_sent = queue.get_task("A1", task.id).await.unwrap();
        assert_eq!(still_sent.status, TaskStatus::Sent);
    }

    #[tokio::test]
    async fn test_failure_emits_task_error() {
        let (queue, correlator, events) = setup().await;
        let task = queue
            .enqueue("A1", TaskAction::new("exec", json!({})))
            .await
            .unwrap();
        queue.next_batch("A1", 1).await.unwrap();

        let failed = correlator
            .submit_result("A1", task.id, TaskOutcome::failure("permission denied"))
            .await
            .unwrap();
        assert_eq!(failed.status, TaskStatus::Error);
        assert_eq!(failed.error.as_deref(), Some("permission denied"));
        assert_eq!(events.0.lock()[0].kind, EventKind::TaskError);
    }
}
