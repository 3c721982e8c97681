use crate::store::{AgentStore, FiringLedger, RuleStore, TaskStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use teamserver_core::{Agent, Task, TeamserverError, TeamserverResult, TriggerRule};
use tracing::warn;
use uuid::Uuid;

/// File-based store (one JSON document per record).
///
/// ```text
/// <dir>/agents/<sha256(agent_id)>.json
/// <dir>/tasks/<sha256(agent_id)>/<task_id>.json
/// <dir>/rules/<rule_id>.json
/// <dir>/ledger/<event_id>_<rule_id>.json
/// ```
///
/// Agent directories and files are named by the hex SHA-256 of the ID, so
/// every agent ID maps to a fixed-length, path-safe name. The ID itself is
/// only stored inside the document.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub async fn new(dir: PathBuf) -> TeamserverResult<Self> {
        for sub in ["agents", "tasks", "rules", "ledger"] {
            tokio::fs::create_dir_all(dir.join(sub)).await?;
        }
        Ok(Self { dir })
    }

    fn agent_path(&self, id: &str) -> PathBuf {
        self.dir
            .join("agents")
            .join(format!("{}.json", agent_file_stem(id)))
    }

    fn task_dir(&self, agent_id: &str) -> PathBuf {
        self.dir.join("tasks").join(agent_file_stem(agent_id))
    }

    fn task_path(&self, agent_id: &str, task_id: Uuid) -> PathBuf {
        self.task_dir(agent_id).join(format!("{task_id}.json"))
    }

    fn rule_path(&self, id: Uuid) -> PathBuf {
        self.dir.join("rules").join(format!("{id}.json"))
    }

    fn firing_path(&self, event_id: Uuid, rule_id: Uuid) -> PathBuf {
        self.dir
            .join("ledger")
            .join(format!("{event_id}_{rule_id}.json"))
    }
}

/// 64 hex characters regardless of the ID's length or content.
fn agent_file_stem(agent_id: &str) -> String {
    hex::encode(Sha256::digest(agent_id.as_bytes()))
}

#[derive(Serialize, Deserialize)]
struct FiringRecord {
    event_id: Uuid,
    rule_id: Uuid,
    occurred_at: DateTime<Utc>,
}

fn tmp_path(path: &Path) -> PathBuf {
    path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()))
}

/// Write a new document; fails with `AlreadyExists` if `path` is taken.
/// The document appears fully written or not at all.
async fn write_new<T: Serialize>(
    path: &Path,
    value: &T,
    kind: &'static str,
    id: String,
) -> TeamserverResult<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, json).await?;
    let linked = tokio::fs::hard_link(&tmp, path).await;
    let _ = tokio::fs::remove_file(&tmp).await;
    match linked {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            Err(TeamserverError::AlreadyExists { kind, id })
        }
        Err(e) => Err(e.into()),
    }
}

/// Replace an existing document atomically.
async fn write_replace<T: Serialize>(path: &Path, value: &T) -> TeamserverResult<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_doc<T: DeserializeOwned>(path: &Path) -> TeamserverResult<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(data) => serde_json::from_slice(&data).map(Some).map_err(|e| {
            TeamserverError::Store(format!("Failed to parse {}: {e}", path.display()))
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Read every `*.json` document in `dir`. Unparseable files are skipped.
async fn read_all<T: DeserializeOwned>(dir: &Path) -> TeamserverResult<Vec<T>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut docs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match read_doc(&path).await {
            Ok(Some(doc)) => docs.push(doc),
            Ok(None) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable record"),
        }
    }
    Ok(docs)
}

#[async_trait]
impl AgentStore for FileStore {
    async fn create_agent(&self, agent: &Agent) -> TeamserverResult<()> {
        write_new(&self.agent_path(&agent.id), agent, "agent", agent.id.clone()).await
    }

    async fn get_agent(&self, id: &str) -> TeamserverResult<Option<Agent>> {
        read_doc(&self.agent_path(id)).await
    }

    async fn update_agent(&self, agent: &Agent) -> TeamserverResult<()> {
        let path = self.agent_path(&agent.id);
        if !tokio::fs::try_exists(&path).await? {
            return Err(TeamserverError::agent_not_found(&agent.id));
        }
        write_replace(&path, agent).await
    }

    async fn list_agents(&self) -> TeamserverResult<Vec<Agent>> {
        let mut agents: Vec<Agent> = read_all(&self.dir.join("agents")).await?;
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }
}

#[async_trait]
impl TaskStore for FileStore {
    async fn create_task(&self, task: &Task) -> TeamserverResult<()> {
        tokio::fs::create_dir_all(self.task_dir(&task.agent_id)).await?;
        write_new(
            &self.task_path(&task.agent_id, task.id),
            task,
            "task",
            task.id.to_string(),
        )
        .await
    }

    async fn get_task(&self, agent_id: &str, task_id: Uuid) -> TeamserverResult<Option<Task>> {
        read_doc(&self.task_path(agent_id, task_id)).await
    }

    async fn find_task(&self, task_id: Uuid) -> TeamserverResult<Option<Task>> {
        let mut owners = tokio::fs::read_dir(self.dir.join("tasks")).await?;
        let file_name = format!("{task_id}.json");
        while let Some(owner) = owners.next_entry().await? {
            if let Some(task) = read_doc(&owner.path().join(&file_name)).await? {
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    async fn update_task(&self, task: &Task) -> TeamserverResult<()> {
        let path = self.task_path(&task.agent_id, task.id);
        if !tokio::fs::try_exists(&path).await? {
            return Err(TeamserverError::task_not_found(task.id));
        }
        write_replace(&path, task).await
    }

    async fn list_tasks(&self, agent_id: &str) -> TeamserverResult<Vec<Task>> {
        let mut tasks: Vec<Task> = read_all(&self.task_dir(agent_id)).await?;
        tasks.sort_by_key(|t| t.sequence);
        Ok(tasks)
    }
}

#[async_trait]
impl RuleStore for FileStore {
    async fn create_rule(&self, rule: &TriggerRule) -> TeamserverResult<()> {
        write_new(&self.rule_path(rule.id), rule, "rule", rule.id.to_string()).await
    }

    async fn get_rule(&self, id: Uuid) -> TeamserverResult<Option<TriggerRule>> {
        read_doc(&self.rule_path(id)).await
    }

    async fn update_rule(&self, rule: &TriggerRule) -> TeamserverResult<()> {
        let path = self.rule_path(rule.id);
        if !tokio::fs::try_exists(&path).await? {
            return Err(TeamserverError::rule_not_found(rule.id));
        }
        write_replace(&path, rule).await
    }

    async fn delete_rule(&self, id: Uuid) -> TeamserverResult<()> {
        match tokio::fs::remove_file(self.rule_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(TeamserverError::rule_not_found(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_rules(&self) -> TeamserverResult<Vec<TriggerRule>> {
        let mut rules: Vec<TriggerRule> = read_all(&self.dir.join("rules")).await?;
        rules.sort_by_key(|r| r.created_at);
        Ok(rules)
    }
}

#[async_trait]
impl FiringLedger for FileStore {
    async fn claim_firing(
        &self,
        event_id: Uuid,
        rule_id: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> TeamserverResult<bool> {
        let record = FiringRecord {
            event_id,
            rule_id,
            occurred_at,
        };
        let path = self.firing_path(event_id, rule_id);
        match write_new(&path, &record, "firing", format!("{event_id}_{rule_id}")).await {
            Ok(()) => Ok(true),
            Err(TeamserverError::AlreadyExists { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn prune_firings(&self, before: DateTime<Utc>) -> TeamserverResult<usize> {
        let records: Vec<FiringRecord> = read_all(&self.dir.join("ledger")).await?;
        let mut removed = 0;
        for record in records.iter().filter(|r| r.occurred_at < before) {
            match tokio::fs::remove_file(self.firing_path(record.event_id, record.rule_id)).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }
}
