use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Mutual exclusion per agent ID.
///
/// Every operation that reads-then-writes one agent's record or task set runs
/// under that agent's lock; different agents never contend. Entries are
/// dropped once no holder or waiter remains, so unknown IDs do not pile up.
#[derive(Default)]
pub struct AgentLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl AgentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, agent_id: &str) -> AgentGuard<'_> {
        let mutex = {
            let mut locks = self.locks.lock();
            locks.entry(agent_id.to_string()).or_default().clone()
        };
        let guard = mutex.clone().lock_owned().await;
        AgentGuard {
            locks: self,
            agent_id: agent_id.to_string(),
            mutex,
            guard: Some(guard),
        }
    }

    /// Number of agents with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held while one agent's state is being mutated.
pub struct AgentGuard<'a> {
    locks: &'a AgentLocks,
    agent_id: String,
    mutex: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for AgentGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.locks.lock();
        // map + self.mutex: nobody else holds or waits on this lock
        if Arc::strong_count(&self.mutex) == 2 {
            locks.remove(&self.agent_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_agent_is_serialized() {
        let locks = Arc::new(AgentLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("A1").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_agents_do_not_block() {
        let locks = AgentLocks::new();
        let _a = locks.lock("A1").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("A2")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_entries_are_pruned() {
        let locks = AgentLocks::new();
        {
            let _g = locks.lock("A1").await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }
}
