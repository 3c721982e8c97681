use serde::Deserialize;
use std::path::{Path, PathBuf};
use teamserver_core::{TeamserverError, TeamserverResult};
use teamserver_gateway::Quota;
use teamserver_orchestrator::{AgentPolicy, OrchestratorConfig, RuleDefinition, TriggerConfig};

/// Contents of `teamserver.toml`. Every section is optional.
#[derive(Debug, Default, Deserialize)]
pub struct TeamserverConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub agents: AgentPolicy,
    #[serde(default)]
    pub triggers: TriggerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Trigger rules created at startup unless a rule with the same name exists.
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: default_data_dir(),
        }
    }
}

/// Request quotas: `[security.agents]` applies to each agent separately,
/// `[security.operators]` is shared by all operator requests.
#[derive(Debug, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_agent_quota")]
    pub agents: Quota,
    #[serde(default = "default_operator_quota")]
    pub operators: Quota,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            agents: default_agent_quota(),
            operators: default_operator_quota(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

impl TeamserverConfig {
    pub fn parse(text: &str) -> TeamserverResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| TeamserverError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> TeamserverResult<Self> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            TeamserverError::Config(format!(
                "failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::parse(&text)
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            agents: self.agents.clone(),
            triggers: self.triggers.clone(),
        }
    }

    fn validate(&self) -> TeamserverResult<()> {
        self.orchestrator().validate()?;
        self.security.agents.validate("security.agents")?;
        self.security.operators.validate("security.operators")?;
        Ok(())
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8443
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_agent_quota() -> Quota {
    Quota::new(10.0, 50)
}
fn default_operator_quota() -> Quota {
    Quota::new(20.0, 100)
}
