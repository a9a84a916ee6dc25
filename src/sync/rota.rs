//! Work items and their assignment to workers.

use serde::Serialize;
use std::sync::Arc;

use crate::depot::{Action, DepotError, DepotSpec, FetchTarget, RevisionSpec};
use crate::sync::exclude::CompiledQuery;

/// One file to transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub path: String,
    /// Revision to fetch; 0 removes the file from the workspace.
    pub revision: u32,
    /// Bytes to transfer.
    pub cost: u64,
    pub action: Action,
}

impl WorkItem {
    pub fn new(path: impl Into<String>, revision: u32, cost: u64, action: Action) -> Self {
        Self {
            path: path.into(),
            revision,
            cost,
            action,
        }
    }

    /// `path#revision` for a fetch call.
    pub fn target(&self) -> FetchTarget {
        DepotSpec::new(self.path.clone(), RevisionSpec::Number(self.revision))
    }
}

/// A worker's share of the transfer and the progress it has made.
///
/// Progress fields are written only by the task running this worker.
#[derive(Debug, Default)]
pub struct Worker {
    pub id: usize,
    pub items: Vec<WorkItem>,
    pub burden: u64,
    pub done_size: u64,
    pub done_items: usize,
    pub error: Option<DepotError>,
}

impl Worker {
    pub fn new(id: usize) -> Self {
        Self { id, ..Self::default() }
    }

    pub fn push(&mut self, item: WorkItem) {
        self.burden += item.cost;
        self.items.push(item);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn sort_by_cost(&mut self, ascending: bool) {
        if ascending {
            self.items.sort_by(|a, b| a.cost.cmp(&b.cost));
        } else {
            self.items.sort_by(|a, b| b.cost.cmp(&a.cost));
        }
    }
}

/// Aggregate size of a rota.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RotaTotals {
    pub items: usize,
    pub bytes: u64,
}

/// Planned assignment of work items to workers.
///
/// Worker 0 only ever holds revision-0 items (removals), so a removal and
/// an add for the same path never collapse on one worker.
#[derive(Debug)]
pub struct Rota {
    pub target: RevisionSpec,
    /// Sync roots the rota was planned from.
    pub roots: Vec<String>,
    /// Exclusions in force when the rota was planned.
    pub query: Arc<CompiledQuery>,
    pub workers: Vec<Worker>,
}

impl Rota {
    /// An empty rota with `worker_count` transfer workers plus worker 0.
    pub fn new(target: RevisionSpec, roots: Vec<String>, query: Arc<CompiledQuery>, worker_count: usize) -> Self {
        let workers = (0..=worker_count.max(1)).map(Worker::new).collect();
        Self {
            target,
            roots,
            query,
            workers,
        }
    }

    /// Place an item: removals on worker 0, everything else on the least
    /// burdened of the remaining workers.
    pub fn assign(&mut self, item: WorkItem) {
        let index = if item.revision == 0 {
            0
        } else {
            self.least_burdened()
        };
        self.workers[index].push(item);
    }

    fn least_burdened(&self) -> usize {
        self.workers
            .iter()
            .enumerate()
            .skip(1)
            .min_by_key(|(index, worker)| (worker.burden, *index))
            .map_or(1, |(index, _)| index)
    }

    /// Sort each worker's items by cost, alternating direction so that
    /// workers do not all reach their largest items at the same time.
    pub fn sort_workers(&mut self) {
        for worker in &mut self.workers {
            let ascending = worker.id % 2 == 0;
            worker.sort_by_cost(ascending);
        }
    }

    pub fn totals(&self) -> RotaTotals {
        self.workers.iter().fold(RotaTotals::default(), |totals, worker| RotaTotals {
            items: totals.items + worker.items.len(),
            bytes: totals.bytes + worker.burden,
        })
    }

    /// Workers with something to do.
    pub fn active_workers(&self) -> usize {
        self.workers.iter().filter(|worker| !worker.is_empty()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.active_workers() == 0
    }

    /// One spec per root at the rota's target.
    pub fn root_specs(&self) -> Vec<DepotSpec> {
        self.roots
            .iter()
            .map(|root| DepotSpec::new(root.clone(), self.target.clone()))
            .collect()
    }

    pub fn items(&self) -> impl Iterator<Item = &WorkItem> + '_ {
        self.workers.iter().flat_map(|worker| worker.items.iter())
    }
}
