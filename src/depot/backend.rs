use crate::depot::error::Result;
use crate::depot::types::{DepotSpec, FetchEvent, FetchOptions, FetchTarget, PlanReport};

/// Lazy per-item stream returned by [`DepotBackend::fetch`].
///
/// Items are produced as the backend applies them; dropping the stream
/// stops the transfer of every target not yet yielded.
pub type FetchStream<'a> = Box<dyn Iterator<Item = FetchEvent> + Send + 'a>;

/// The version-control client the sync engine drives.
///
/// Calls block on backend I/O, so implementations must be usable from
/// several worker threads at once. Retry and timeout policy belong to the
/// implementation, not to the engine.
pub trait DepotBackend: Send + Sync {
    /// Short name for log output.
    fn name(&self) -> &str;

    /// Dry-run query: what would syncing `specs` do to the workspace?
    ///
    /// Paths the backend can only describe in prose (files opened for edit,
    /// files needing resolve) are reported through `PlanReport::events`.
    fn plan(&self, specs: &[DepotSpec]) -> Result<PlanReport>;

    /// Transfer an explicit list of `path#revision` targets.
    fn fetch<'a>(&'a self, targets: &'a [FetchTarget], options: FetchOptions) -> Result<FetchStream<'a>>;
}
