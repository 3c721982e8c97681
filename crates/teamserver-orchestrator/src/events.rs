use crate::executor::{DeferredJob, JobExecutor};
use crate::triggers::TriggerEngine;
use async_trait::async_trait;
use std::sync::Arc;
use teamserver_core::{Event, TeamserverResult};
use tracing::{debug, warn};

/// Where components hand off the events they produce.
///
/// `emit` must not block: it is called from the agent-facing path.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Discards every event. For components used without triggers.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, event: Event) {
        debug!(event_id = %event.id, kind = %event.kind, "Event discarded");
    }
}

/// One event's trigger evaluation, as a re-runnable unit of work.
pub struct TriggerJob {
    event: Event,
    engine: Arc<TriggerEngine>,
}

impl TriggerJob {
    pub fn new(event: Event, engine: Arc<TriggerEngine>) -> Self {
        Self { event, engine }
    }
}

#[async_trait]
impl DeferredJob for TriggerJob {
    fn describe(&self) -> String {
        format!("triggers for {} event {}", self.event.kind, self.event.id)
    }

    async fn run(&self) -> TeamserverResult<()> {
        self.engine.on_event(&self.event).await.map(|_| ())
    }
}

/// Routes events to the trigger engine through the deferred-job executor.
pub struct TriggerDispatcher {
    engine: Arc<TriggerEngine>,
    executor: Arc<dyn JobExecutor>,
}

impl TriggerDispatcher {
    pub fn new(engine: Arc<TriggerEngine>, executor: Arc<dyn JobExecutor>) -> Self {
        Self { engine, executor }
    }
}

impl EventSink for TriggerDispatcher {
    fn emit(&self, event: Event) {
        let event_id = event.id;
        let kind = event.kind;
        let job = Arc::new(TriggerJob::new(event, self.engine.clone()));
        if let Err(e) = self.executor.submit(job) {
            warn!(event_id = %event_id, kind = %kind, error = %e, "Dropped event: trigger dispatch failed");
        }
    }
}
