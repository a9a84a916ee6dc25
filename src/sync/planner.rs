//! Sync planning: ask the backend what a sync would do and split the
//! answer across a fixed set of workers.

use humansize::{format_size, DECIMAL};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::depot::{Action, DepotBackend, DepotSpec, PlannedFile, Result, RevisionSpec};
use crate::sync::exclude::{CompiledQuery, ExclusionFilter, PathPattern};
use crate::sync::finalize::{parse_info_target, InfoClass};
use crate::sync::rota::{Rota, WorkItem};

/// Nominal cost of items the backend only reports in prose.
const SYNTHETIC_COST: u64 = 1;

/// Builds a [`Rota`] for a target revision.
pub struct SyncPlanner {
    backend: Arc<dyn DepotBackend>,
    roots: Vec<String>,
    filter: ExclusionFilter,
}

impl SyncPlanner {
    pub fn new(backend: Arc<dyn DepotBackend>) -> Self {
        Self {
            backend,
            roots: Vec::new(),
            filter: ExclusionFilter::new(),
        }
    }

    /// Create a planner with the roots and exclusions from `config`.
    pub fn from_config(backend: Arc<dyn DepotBackend>, config: &SyncConfig) -> Self {
        let mut planner = Self::new(backend);
        for root in &config.roots {
            planner.add_sync_root(root);
        }
        planner.filter = config.exclusion_filter();
        planner
    }

    /// Add a depot directory (or wildcard spec) to sync.
    ///
    /// A plain directory becomes `<dir>/...`.
    pub fn add_sync_root(&mut self, path: &str) {
        let path = path.trim();
        if path.is_empty() {
            return;
        }

        let root = if path.ends_with("...") || path.contains('*') {
            path.to_string()
        } else {
            format!("{}/...", path.trim_end_matches('/'))
        };

        if !self.roots.contains(&root) {
            self.roots.push(root);
        }
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn filter(&self) -> &ExclusionFilter {
        &self.filter
    }

    pub fn add_exclude(&mut self, pattern: &str) -> bool {
        self.filter.add_exclude(pattern)
    }

    pub fn remove_exclude(&mut self, pattern: &str) -> bool {
        self.filter.remove_exclude(pattern)
    }

    /// Specs for the plan query: every root at `target`, then every
    /// exclusion at revision 0 so excluded content still on disk is removed.
    pub fn plan_specs(&self, target: &RevisionSpec) -> Vec<DepotSpec> {
        let mut specs: Vec<DepotSpec> = self
            .roots
            .iter()
            .map(|root| DepotSpec::new(root.clone(), target.clone()))
            .collect();

        if target.is_removal() {
            return specs;
        }

        let mut excludes: Vec<PathPattern> = self.filter.read_excludes().map(PathPattern::new).collect();
        excludes.sort();

        for pattern in &excludes {
            if pattern.is_anchored() {
                specs.push(DepotSpec::new(pattern.as_str(), RevisionSpec::NONE));
                continue;
            }
            for root in &self.roots {
                let dir = root_dir(root);
                let path = if pattern.as_str().starts_with("...") {
                    format!("{}/{}", dir, pattern)
                } else {
                    format!("{}/.../{}", dir, pattern)
                };
                specs.push(DepotSpec::new(path, RevisionSpec::NONE));
            }
        }

        specs
    }

    /// Plan a sync to `target` across `worker_count` transfer workers.
    pub fn schedule(&self, target: &str, worker_count: usize) -> Result<Rota> {
        let target = RevisionSpec::parse(target)?;
        if self.roots.is_empty() {
            warn!("No sync roots configured; nothing to plan");
        }
        if worker_count == 0 {
            warn!("Worker count of 0 requested, using 1");
        }

        let query = self.filter.get_query()?;
        let specs = self.plan_specs(&target);
        debug!("Planning {} specs against {}", specs.len(), self.backend.name());

        let mut report = self.backend.plan(&specs)?;
        let mut rota = Rota::new(target, self.roots.clone(), Arc::clone(&query), worker_count);

        let items = std::mem::take(&mut report.items);
        let mut seen: HashSet<String> = HashSet::with_capacity(items.len());
        for file in items {
            seen.insert(file.path.clone());
            if let Some(item) = normalize(file, &query) {
                rota.assign(item);
            }
        }

        // Paths reported only in prose still need a transfer
        for line in report.info() {
            match InfoClass::classify(line) {
                InfoClass::OpenedNotChanged | InfoClass::MustResolve => {
                    let Some((path, Some(revision))) = parse_info_target(line) else {
                        debug!("No revision in '{}', skipping", line);
                        continue;
                    };
                    if !seen.insert(path.clone()) {
                        continue;
                    }
                    let file = PlannedFile {
                        path,
                        revision,
                        size: SYNTHETIC_COST,
                        action: Action::Edit,
                    };
                    if let Some(item) = normalize(file, &query) {
                        rota.assign(item);
                    }
                }
                _ => debug!("{}", line),
            }
        }
        for line in report.errors() {
            warn!("{}", line);
        }

        rota.sort_workers();

        let totals = rota.totals();
        info!(
            "Planned {} files ({}) across {} workers",
            totals.items,
            format_size(totals.bytes, DECIMAL),
            rota.active_workers()
        );

        Ok(rota)
    }
}

/// Apply exclusions and smooth over backend reporting quirks.
fn normalize(file: PlannedFile, query: &CompiledQuery) -> Option<WorkItem> {
    let mut item = WorkItem::new(file.path, file.revision, file.size, file.action);

    if let Some(pattern) = query.is_excluded(&item.path) {
        if !item.action.is_delete() {
            debug!("{} excluded by {}", item.path, pattern);
            return None;
        }
        // Content synced before the exclusion existed is still removed
        item.revision = 0;
    }

    if item.action.is_delete() {
        item.revision = 0;
    }
    if item.action == Action::Replace {
        item.cost = 0;
    }

    Some(item)
}

/// Directory part of a root spec.
fn root_dir(root: &str) -> &str {
    if let Some(dir) = root.strip_suffix("/...") {
        return dir;
    }
    root.rsplit_once('/').map_or(root, |(dir, _)| dir)
}
