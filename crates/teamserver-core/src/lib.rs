//! Core types and error definitions for the Teamserver control plane.
//!
//! This crate provides the foundational records shared across all Teamserver
//! crates: the error taxonomy, agent and task records, domain events, trigger
//! rules, and the clock used to derive agent liveness.
//!
//! # Main types
//!
//! - [`TeamserverError`]: Unified error enum for all Teamserver subsystems.
//! - [`TeamserverResult`]: Convenience alias for `Result<T, TeamserverError>`.
//! - [`Agent`]: A registered remote agent and its check-in bookkeeping.
//! - [`Task`]: One unit of work owned by exactly one agent.
//! - [`Event`]: A fact observed by the control plane, consumed by triggers.
//! - [`TriggerRule`]: A standing rule that reacts to events.
//! - [`Clock`]: Source of the current time, injectable for tests.

/// Agent records and liveness derivation.
pub mod agent;
/// Time sources.
pub mod clock;
/// Domain events.
pub mod event;
/// Trigger rules, predicates and actions.
pub mod rule;
/// Task records, actions, outcomes and the status state machine.
pub mod task;

pub use agent::{liveness, Agent, AgentStatus, AgentView};
pub use clock::{Clock, ManualClock, SystemClock};
pub use event::{Event, EventKind};
pub use rule::{
    render_template, render_value, EventPredicate, RuleAction, TaskTarget, TriggerRule,
};
pub use task::{Task, TaskAction, TaskOrigin, TaskOutcome, TaskStatus};

// --- Error types ---

/// Top-level error type for the Teamserver control plane.
///
/// The first four variants are the operational taxonomy surfaced to agents
/// and operators; the rest come from collaborators.
#[derive(Debug, thiserror::Error)]
pub enum TeamserverError {
    /// A referenced agent, task or rule does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Record kind (`agent`, `task`, `rule`).
        kind: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// A record with the same identity already exists.
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Record kind (`agent`, `task`, `rule`).
        kind: &'static str,
        /// The conflicting identifier.
        id: String,
    },

    /// The operation is illegal for the record's current status.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A malformed action payload, outcome or rule definition.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An error from the persistence collaborator.
    #[error("Store error: {0}")]
    Store(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// The deferred-job executor refused or lost a unit of work.
    #[error("Executor error: {0}")]
    Executor(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TeamserverError {
    /// Shorthand for an unknown agent.
    pub fn agent_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "agent",
            id: id.into(),
        }
    }

    /// Shorthand for an unknown task.
    pub fn task_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: "task",
            id: id.to_string(),
        }
    }

    /// Shorthand for an unknown trigger rule.
    pub fn rule_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: "rule",
            id: id.to_string(),
        }
    }

    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::InvalidState(_) => "invalid_state",
            Self::Validation(_) => "validation_error",
            Self::Store(_) => "store_error",
            Self::Config(_) => "config_error",
            Self::Executor(_) => "executor_error",
            Self::Json(_) => "json_error",
            Self::Io(_) => "io_error",
        }
    }
}

/// A convenience `Result` alias using [`TeamserverError`].
pub type TeamserverResult<T> = Result<T, TeamserverError>;
