//! Persistence collaborator for the Teamserver control plane.
//!
//! The orchestrator only talks to storage through the traits in [`store`];
//! two implementations ship here: [`MemoryStore`] for tests and ephemeral
//! servers, and [`FileStore`] which keeps JSON documents on disk.

pub mod file;
pub mod memory;
pub mod store;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::{AgentStore, FiringLedger, RuleStore, Store, TaskStore};
