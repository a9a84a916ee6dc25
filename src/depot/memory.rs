//! In-process depot and client workspace.
//!
//! Models enough of a version-control server to drive the sync engine
//! end to end: per-file revision histories, the client's have-table,
//! files opened for edit, and a local disk budget.

use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::depot::backend::{DepotBackend, FetchStream};
use crate::depot::error::{DepotError, Result};
use crate::depot::types::{
    Action, BackendEvent, DepotSpec, FetchEvent, FetchOptions, FetchRecord, FetchTarget, PlanReport,
    PlannedFile, RevisionSpec,
};
use crate::sync::exclude::PathPattern;

#[derive(Debug, Clone)]
struct FileRevision {
    change: u64,
    size: u64,
    action: Action,
}

impl FileRevision {
    fn is_deleted(&self) -> bool {
        self.action == Action::Delete
    }
}

/// A fetch call as seen by the depot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub dry_run: bool,
    pub batch_size: usize,
    pub targets: Vec<String>,
}

#[derive(Debug, Default)]
struct DepotState {
    files: BTreeMap<String, Vec<FileRevision>>,
    have: HashMap<String, u32>,
    opened: HashSet<String>,
    failing: HashSet<String>,
    capacity: Option<u64>,
    last_change: u64,
    fetch_log: Vec<FetchCall>,
}

impl DepotState {
    /// Revision number selected by `spec` for a file's history.
    fn resolve(revisions: &[FileRevision], spec: &RevisionSpec) -> Option<u32> {
        let head = revisions.len() as u32;
        match spec {
            RevisionSpec::Head => Some(head),
            RevisionSpec::Number(rev) => Some((*rev).min(head)),
            RevisionSpec::Change(change) => {
                Some(revisions.iter().take_while(|rev| rev.change <= *change).count() as u32)
            }
            RevisionSpec::Label(_) => None,
        }
    }

    fn is_present(revisions: &[FileRevision], rev: u32) -> bool {
        rev > 0 && revisions.get(rev as usize - 1).is_some_and(|r| !r.is_deleted())
    }

    /// Action needed to move a file from `have` to `wanted`, if any.
    fn transition(revisions: &[FileRevision], have: u32, wanted: u32) -> Option<Action> {
        let had = Self::is_present(revisions, have);
        let wants = Self::is_present(revisions, wanted);

        match (had, wants) {
            (false, false) => None,
            (true, false) => Some(Action::Delete),
            (false, true) => Some(Action::Add),
            (true, true) if have == wanted => None,
            (true, true) => {
                let metadata_only = wanted > have
                    && revisions[have as usize..wanted as usize]
                        .iter()
                        .all(|rev| rev.action == Action::Replace);
                Some(if metadata_only { Action::Replace } else { Action::Edit })
            }
        }
    }
}

/// In-memory [`DepotBackend`].
#[derive(Debug)]
pub struct MemoryDepot {
    name: String,
    state: Mutex<DepotState>,
}

impl Default for MemoryDepot {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDepot {
    pub fn new() -> Self {
        Self::with_name("memory")
    }

    pub fn with_name(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(DepotState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, DepotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push_revision(&self, path: &str, size: u64, action: Action) -> (u64, u32) {
        let mut state = self.state();
        state.last_change += 1;
        let change = state.last_change;
        let revisions = state.files.entry(path.to_string()).or_default();
        revisions.push(FileRevision { change, size, action });
        (change, revisions.len() as u32)
    }

    /// Submit new content for `path`. Returns `(changelist, revision)`.
    pub fn submit(&self, path: &str, size: u64) -> (u64, u32) {
        let action = {
            let state = self.state();
            match state.files.get(path).and_then(|revs| revs.last()) {
                Some(rev) if !rev.is_deleted() => Action::Edit,
                _ => Action::Add,
            }
        };
        self.push_revision(path, size, action)
    }

    /// Submit a deletion of `path`.
    pub fn delete(&self, path: &str) -> (u64, u32) {
        self.push_revision(path, 0, Action::Delete)
    }

    /// Submit a metadata-only change (file type, permissions) to `path`.
    pub fn change_metadata(&self, path: &str) -> (u64, u32) {
        let size = {
            let state = self.state();
            state
                .files
                .get(path)
                .and_then(|revs| revs.last())
                .map_or(0, |rev| rev.size)
        };
        self.push_revision(path, size, Action::Replace)
    }

    pub fn last_change(&self) -> u64 {
        self.state().last_change
    }

    /// Pretend the workspace already holds `path#rev` (0 removes it).
    pub fn set_have(&self, path: &str, rev: u32) {
        let mut state = self.state();
        if rev == 0 {
            state.have.remove(path);
        } else {
            state.have.insert(path.to_string(), rev);
        }
    }

    pub fn have(&self, path: &str) -> Option<u32> {
        self.state().have.get(path).copied()
    }

    /// Every file the workspace holds, with its revision.
    pub fn have_list(&self) -> BTreeMap<String, u32> {
        self.state().have.iter().map(|(path, rev)| (path.clone(), *rev)).collect()
    }

    pub fn open_for_edit(&self, path: &str) {
        self.state().opened.insert(path.to_string());
    }

    /// Remaining local disk budget in bytes. `None` is unlimited.
    pub fn set_capacity(&self, bytes: Option<u64>) {
        self.state().capacity = bytes;
    }

    /// Make every transfer of `path` fail with a transient error.
    pub fn fail_path(&self, path: &str) {
        self.state().failing.insert(path.to_string());
    }

    pub fn fetch_calls(&self) -> Vec<FetchCall> {
        self.state().fetch_log.clone()
    }

    /// Apply (or preview) a single fetch target.
    fn apply(&self, target: &FetchTarget, dry_run: bool) -> FetchEvent {
        let mut state = self.state();
        let path = target.path.as_str();

        if state.failing.contains(path) {
            return FetchEvent::Error(DepotError::Backend(format!("{} - transfer failed", target)));
        }

        let Some(revisions) = state.files.get(path) else {
            return FetchEvent::Error(DepotError::Backend(format!("{} - no such file(s).", target)));
        };
        let Some(wanted) = DepotState::resolve(revisions, &target.revision) else {
            return FetchEvent::Error(DepotError::Backend(format!("{} - no such label", target)));
        };

        let have = state.have.get(path).copied().unwrap_or(0);
        let Some(action) = DepotState::transition(revisions, have, wanted) else {
            return FetchEvent::Info(format!("{} - file(s) up-to-date.", target));
        };
        let size = if action == Action::Add || action == Action::Edit {
            revisions[wanted as usize - 1].size
        } else {
            0
        };

        if !dry_run {
            if let Some(remaining) = state.capacity {
                if size > remaining {
                    return FetchEvent::Error(DepotError::Capacity(format!(
                        "{} - out of disk space",
                        target
                    )));
                }
                state.capacity = Some(remaining - size);
            }
            if action == Action::Delete {
                state.have.remove(path);
            } else {
                state.have.insert(path.to_string(), wanted);
            }
        }

        FetchEvent::Synced(FetchRecord {
            path: path.to_string(),
            revision: wanted,
            action,
        })
    }
}

/// Lazily applies targets as the consumer pulls them.
struct MemoryFetch<'a> {
    depot: &'a MemoryDepot,
    targets: std::slice::Iter<'a, FetchTarget>,
    dry_run: bool,
}

impl Iterator for MemoryFetch<'_> {
    type Item = FetchEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let target = self.targets.next()?;
        Some(self.depot.apply(target, self.dry_run))
    }
}

impl DepotBackend for MemoryDepot {
    fn name(&self) -> &str {
        &self.name
    }

    fn plan(&self, specs: &[DepotSpec]) -> Result<PlanReport> {
        let mut report = PlanReport::default();

        let mut matchers: Vec<(usize, Regex)> = Vec::with_capacity(specs.len());
        for (index, spec) in specs.iter().enumerate() {
            if let RevisionSpec::Label(label) = &spec.revision {
                report
                    .events
                    .push(BackendEvent::Error(format!("{} - label '{}' does not exist.", spec, label)));
                continue;
            }
            matchers.push((index, PathPattern::new(&spec.path).compile()?));
        }

        let state = self.state();
        let mut productive = vec![false; specs.len()];

        for (path, revisions) in &state.files {
            // Later arguments override earlier ones for the same file
            let Some(index) = matchers
                .iter()
                .rev()
                .find(|(_, regex)| regex.is_match(path))
                .map(|(index, _)| *index)
            else {
                continue;
            };
            let Some(wanted) = DepotState::resolve(revisions, &specs[index].revision) else {
                continue;
            };

            let have = state.have.get(path).copied().unwrap_or(0);
            let Some(action) = DepotState::transition(revisions, have, wanted) else {
                continue;
            };
            productive[index] = true;

            if state.opened.contains(path) {
                report.events.push(BackendEvent::Info(format!(
                    "{}#{} - is opened and not being changed",
                    path, wanted
                )));
                continue;
            }

            let size = match action {
                Action::Add | Action::Edit | Action::Replace => revisions[wanted as usize - 1].size,
                _ => 0,
            };
            report.items.push(PlannedFile {
                path: path.clone(),
                revision: wanted,
                size,
                action,
            });
        }

        for (index, spec) in specs.iter().enumerate() {
            if !productive[index] && !matches!(spec.revision, RevisionSpec::Label(_)) {
                report
                    .events
                    .push(BackendEvent::Info(format!("{} - file(s) up-to-date.", spec)));
            }
        }

        Ok(report)
    }

    fn fetch<'a>(&'a self, targets: &'a [FetchTarget], options: FetchOptions) -> Result<FetchStream<'a>> {
        self.state().fetch_log.push(FetchCall {
            dry_run: options.dry_run,
            batch_size: options.batch_size,
            targets: targets.iter().map(ToString::to_string).collect(),
        });

        Ok(Box::new(MemoryFetch {
            depot: self,
            targets: targets.iter(),
            dry_run: options.dry_run,
        }))
    }
}
