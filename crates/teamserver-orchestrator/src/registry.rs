use crate::events::EventSink;
use crate::locks::AgentLocks;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use teamserver_core::{
    Agent, AgentStatus, AgentView, Clock, Event, TeamserverError, TeamserverResult,
};
use teamserver_store::Store;
use tracing::{debug, info};

/// Check-in cadence for one agent, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    pub interval: u64,
    pub interval_delta: u64,
}

impl Intervals {
    pub fn new(interval: u64, interval_delta: u64) -> TeamserverResult<Self> {
        if interval == 0 {
            return Err(TeamserverError::Validation(
                "interval must be greater than 0".into(),
            ));
        }
        Ok(Self {
            interval,
            interval_delta,
        })
    }
}

/// Owns agent identity, metadata and check-in bookkeeping.
///
/// Status is never stored: it is derived from `last_checkin` on every read.
pub struct AgentRegistry {
    store: Arc<dyn Store>,
    locks: Arc<AgentLocks>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    defaults: Intervals,
}

impl AgentRegistry {
    pub fn new(
        store: Arc<dyn Store>,
        locks: Arc<AgentLocks>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        defaults: Intervals,
    ) -> Self {
        Self {
            store,
            locks,
            clock,
            events,
            defaults,
        }
    }

    /// Create an agent. Fails with `AlreadyExists` if the ID is taken.
    pub async fn register(
        &self,
        agent_id: &str,
        metadata: HashMap<String, String>,
        intervals: Option<Intervals>,
    ) -> TeamserverResult<Agent> {
        validate_agent_id(agent_id)?;
        let intervals = intervals.unwrap_or(self.defaults);

        let _guard = self.locks.lock(agent_id).await;
        let agent = Agent::new(
            agent_id,
            metadata,
            intervals.interval,
            intervals.interval_delta,
            self.clock.now(),
        );
        self.store.create_agent(&agent).await?;

        info!(
            agent_id = %agent.id,
            interval = agent.interval,
            interval_delta = agent.interval_delta,
            "Agent registered"
        );
        self.events.emit(Event::agent_registered(&agent));
        Ok(agent)
    }

    /// Stamp a check-in. Fails with `NotFound` for unknown agents.
    pub async fn record_checkin(
        &self,
        agent_id: &str,
        metadata: HashMap<String, String>,
    ) -> TeamserverResult<Agent> {
        let _guard = self.locks.lock(agent_id).await;
        let mut agent = self
            .store
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| TeamserverError::agent_not_found(agent_id))?;

        agent.record_checkin(metadata, self.clock.now());
        self.store.update_agent(&agent).await?;

        debug!(agent_id = %agent.id, checkins = agent.checkin_count, "Agent checked in");
        self.events.emit(Event::agent_checkin(&agent));
        Ok(agent)
    }

    /// Liveness of an agent as of `now`.
    pub async fn get_status(
        &self,
        agent_id: &str,
        now: DateTime<Utc>,
    ) -> TeamserverResult<AgentStatus> {
        Ok(self.require(agent_id).await?.status(now))
    }

    pub async fn get(&self, agent_id: &str) -> TeamserverResult<AgentView> {
        let agent = self.require(agent_id).await?;
        Ok(AgentView::at(agent, self.clock.now()))
    }

    pub async fn list(&self) -> TeamserverResult<Vec<AgentView>> {
        let now = self.clock.now();
        Ok(self
            .store
            .list_agents()
            .await?
            .into_iter()
            .map(|agent| AgentView::at(agent, now))
            .collect())
    }

    /// Change an agent's check-in cadence.
    pub async fn update_intervals(
        &self,
        agent_id: &str,
        intervals: Intervals,
    ) -> TeamserverResult<AgentView> {
        let _guard = self.locks.lock(agent_id).await;
        let mut agent = self.require(agent_id).await?;
        agent.interval = intervals.interval;
        agent.interval_delta = intervals.interval_delta;
        self.store.update_agent(&agent).await?;

        info!(
            agent_id = %agent.id,
            interval = agent.interval,
            interval_delta = agent.interval_delta,
            "Agent intervals updated"
        );
        Ok(AgentView::at(agent, self.clock.now()))
    }

    pub fn defaults(&self) -> Intervals {
        self.defaults
    }

    async fn require(&self, agent_id: &str) -> TeamserverResult<Agent> {
        self.store
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| TeamserverError::agent_not_found(agent_id))
    }
}

fn validate_agent_id(agent_id: &str) -> TeamserverResult<()> {
    if agent_id.trim().is_empty() {
        return Err(TeamserverError::Validation(
            "agent id must not be empty".into(),
        ));
    }
    if agent_id.len() > 256 || agent_id.chars().any(char::is_control) {
        return Err(TeamserverError::Validation(format!(
            "agent id '{}' is not acceptable",
            agent_id.escape_debug()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use teamserver_core::{EventKind, ManualClock};
    use teamserver_store::MemoryStore;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Event>>);

    impl EventSink for Recorder {
        fn emit(&self, event: Event) {
            self.0.lock().push(event);
        }
    }

    fn registry() -> (AgentRegistry, Arc<ManualClock>, Arc<Recorder>) {
        let clock = Arc::new(ManualClock::at_epoch());
        let events = Arc::new(Recorder::default());
        let registry = AgentRegistry::new(
            Arc::new(MemoryStore::new()),
            Arc::new(AgentLocks::new()),
            clock.clone(),
            events.clone(),
            Intervals::new(60, 30).unwrap(),
        );
        (registry, clock, events)
    }

    #[tokio::test]
    async fn test_register_then_duplicate() {
        let (registry, _, events) = registry();
        let agent = registry.register("A1", HashMap::new(), None).await.unwrap();
        assert_eq!(agent.interval, 60);

        let err = registry
            .register("A1", HashMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TeamserverError::AlreadyExists { .. }));

        let recorded = events.0.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].kind, EventKind::AgentRegistered);
    }

    #[tokio::test]
    async fn test_checkin_unknown_agent() {
        let (registry, _, events) = registry();
        let err = registry
            .record_checkin("ghost", HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TeamserverError::NotFound { .. }));
        assert!(events.0.lock().is_empty());
    }

    #[tokio::test]
    async fn test_status_scenario() {
        let (registry, clock, events) = registry();
        registry.register("A1", HashMap::new(), None).await.unwrap();
        registry.record_checkin("A1", HashMap::new()).await.unwrap();
        assert_eq!(events.0.lock().last().unwrap().kind, EventKind::AgentCheckin);

        let t0 = clock.now();
        assert_eq!(
            registry.get_status("A1", t0).await.unwrap(),
            AgentStatus::Active
        );
        assert_eq!(
            registry
                .get_status("A1", t0 + chrono::Duration::seconds(65))
                .await
                .unwrap(),
            AgentStatus::Missing
        );
        assert_eq!(
            registry
                .get_status("A1", t0 + chrono::Duration::seconds(100))
                .await
                .unwrap(),
            AgentStatus::Inactive
        );
    }

    #[tokio::test]
    async fn test_checkin_revives_inactive_agent() {
        let (registry, clock, _) = registry();
        registry.register("A1", HashMap::new(), None).await.unwrap();
        clock.advance_secs(500);
        assert_eq!(registry.get("A1").await.unwrap().status, AgentStatus::Inactive);

        registry.record_checkin("A1", HashMap::new()).await.unwrap();
        assert_eq!(registry.get("A1").await.unwrap().status, AgentStatus::Active);
    }

    #[tokio::test]
    async fn test_update_intervals() {
        let (registry, clock, _) = registry();
        registry.register("A1", HashMap::new(), None).await.unwrap();
        clock.advance_secs(100);
        let view = registry
            .update_intervals("A1", Intervals::new(300, 60).unwrap())
            .await
            .unwrap();
        assert_eq!(view.status, AgentStatus::Active);
        assert!(Intervals::new(0, 10).is_err());
    }

    #[tokio::test]
    async fn test_rejects_empty_id() {
        let (registry, _, _) = registry();
        let err = registry.register("  ", HashMap::new(), None).await.unwrap_err();
        assert!(matches!(err, TeamserverError::Validation(_)));
    }
}
