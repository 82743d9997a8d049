pub mod boxes;
pub mod buffer;
pub mod classifier;
pub mod extraction;
pub mod identity;
pub mod index;
pub mod integrity;
pub mod llm_client;
pub mod namespace;
pub mod orchestrator;
pub mod profile;
pub mod retrieval;
pub mod schema;
pub mod scorer;
pub mod signal;
pub mod store;
pub mod turn;

pub use orchestrator::{MemoryStats, Orchestrator, RecallOutcome};
pub use schema::truncate_str;
