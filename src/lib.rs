// Library module for depot-sync
// Re-exports modules for use in integration tests and embedding tools

pub mod config;
pub mod depot;
pub mod sync;

pub use config::SyncConfig;
pub use depot::{DepotBackend, DepotError, MemoryDepot};
pub use sync::{ExclusionFilter, ParallelExecutor, Rota, SyncPlanner, SyncReport};
