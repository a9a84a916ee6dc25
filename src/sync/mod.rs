//! Parallel depot synchronization.
//!
//! Planning turns a target revision into a [`Rota`]; the executor runs the
//! rota's workers in parallel, then a single-threaded finalization pass
//! catches files the backend only describes in prose.

pub mod exclude;
pub mod executor;
pub mod finalize;
pub mod planner;
pub mod progress;
pub mod rota;
pub mod session;

pub use exclude::{CompiledQuery, ExclusionFilter, PathPattern};
pub use executor::ParallelExecutor;
pub use finalize::{FinalizeOutcome, Finalizer, InfoClass};
pub use planner::SyncPlanner;
pub use progress::{EchoSink, ProgressBoard, ProgressSnapshot, WorkerProgress};
pub use rota::{Rota, RotaTotals, WorkItem, Worker};
pub use session::{SessionState, SyncReport, SyncSession, WorkerFailure};
