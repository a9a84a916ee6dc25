//! Boundary to the version-control backend.
//!
//! The sync engine only sees the [`DepotBackend`] trait; `MemoryDepot`
//! implements it in-process.

pub mod backend;
pub mod error;
pub mod memory;
pub mod types;

pub use backend::{DepotBackend, FetchStream};
pub use error::{DepotError, Result};
pub use memory::{FetchCall, MemoryDepot};
pub use types::*;
