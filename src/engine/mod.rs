// Engine orchestration: request coalescing, bounded fetching and result caching.

pub mod cache;
pub mod compensation;
pub mod delivery;
pub mod inflight;
pub mod integrity;
pub mod limiter;
pub mod locks;
pub mod orchestrator;
pub mod stats;

pub use orchestrator::{Collaborators, Delivered, Orchestrator};
