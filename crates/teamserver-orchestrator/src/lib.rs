//! Control-plane components for the teamserver.
//!
//! Agents pull work by checking in; operators queue tasks and define trigger
//! rules that react to what agents report. Everything here is transport
//! agnostic and works against any [`teamserver_store::Store`].
//!
//! # Main types
//!
//! - [`Orchestrator`]: Facade exposing the agent-facing and operator-facing operations.
//! - [`AgentRegistry`]: Agent identity, check-ins and derived liveness.
//! - [`TaskQueueManager`]: Per-agent FIFO queues with at-most-once delivery.
//! - [`ResultCorrelator`]: Applies agent results to sent tasks.
//! - [`TriggerEngine`]: Evaluates trigger rules against events, once per (event, rule).
//! - [`WorkerPool`]: Background executor for trigger evaluation.

/// Orchestrator settings.
pub mod config;
/// Result submission handling.
pub mod correlator;
/// The orchestration facade.
pub mod engine;
/// Event sink seam and trigger dispatch.
pub mod events;
/// Deferred-job worker pool.
pub mod executor;
/// Per-agent mutual exclusion.
pub mod locks;
/// Task queue manager.
pub mod queue;
/// Agent registry.
pub mod registry;
/// Trigger rule evaluation and notifications.
pub mod triggers;

pub use config::{AgentPolicy, OrchestratorConfig, TriggerConfig};
pub use correlator::ResultCorrelator;
pub use engine::{Orchestrator, ResultAck, RuleDefinition};
pub use events::{EventSink, NullSink, TriggerDispatcher, TriggerJob};
pub use executor::{DeferredJob, JobExecutor, WorkerPool};
pub use locks::{AgentGuard, AgentLocks};
pub use queue::TaskQueueManager;
pub use registry::{AgentRegistry, Intervals};
pub use triggers::{LogNotifier, Notification, Notifier, TriggerEngine};
