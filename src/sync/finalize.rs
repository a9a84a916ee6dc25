//! Second reconciliation pass after the parallel transfer.
//!
//! Some files are only ever described by the backend in informational
//! prose (files opened for edit, files awaiting resolve). This pass plans
//! the roots again, classifies that prose, and fetches whatever is left.

use tracing::{debug, info, warn};

use crate::depot::{
    BackendEvent, DepotBackend, DepotSpec, FetchEvent, FetchOptions, FetchTarget, RevisionSpec,
};
use crate::sync::progress;
use crate::sync::rota::Rota;

/// Classification of an informational line from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoClass {
    UpToDate,
    NotInView,
    AccessDenied,
    MustResolve,
    OpenedNotChanged,
    Unknown,
}

impl InfoClass {
    pub fn classify(line: &str) -> Self {
        let line = line.trim();
        if line.contains("up-to-date") {
            InfoClass::UpToDate
        } else if line.contains("not in client view") {
            InfoClass::NotInView
        } else if line.contains("protected namespace") && line.contains("access denied") {
            InfoClass::AccessDenied
        } else if line.contains("must resolve") {
            InfoClass::MustResolve
        } else if line.contains("is opened and not being changed") {
            InfoClass::OpenedNotChanged
        } else {
            InfoClass::Unknown
        }
    }

    /// Lines that need no action at all.
    pub fn is_benign(self) -> bool {
        matches!(self, InfoClass::UpToDate | InfoClass::NotInView | InfoClass::AccessDenied)
    }
}

/// Extract the path and revision an informational line is about.
///
/// Handles `//a/b#3 - is opened and not being changed` as well as
/// `//a/b - must resolve #3 before submitting`.
pub fn parse_info_target(line: &str) -> Option<(String, Option<u32>)> {
    let (subject, rest) = line.trim().split_once(" - ")?;
    let subject = subject.trim();

    let (path, revision) = match subject.rsplit_once('#') {
        Some((path, rev)) => (path, rev.parse::<u32>().ok()),
        None => (subject, None),
    };
    if path.is_empty() {
        return None;
    }

    let revision = revision.or_else(|| {
        let (_, tail) = rest.split_once("must resolve #")?;
        tail.split_whitespace().next()?.parse().ok()
    });

    Some((path.to_string(), revision))
}

/// What the finalization pass found and did.
#[derive(Debug, Clone, Default)]
pub struct FinalizeOutcome {
    /// Unrecognised backend lines. Any entry fails the session.
    pub errors: Vec<String>,
    /// Files the caller must resolve by hand.
    pub must_resolve: Vec<String>,
    /// Targets recovered from informational lines.
    pub secondary: Vec<FetchTarget>,
    /// Items confirmed by the catch-up fetch.
    pub fetched: usize,
    /// Per-item fetch errors. Logged only.
    pub fetch_errors: usize,
}

impl FinalizeOutcome {
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Single-threaded catch-up pass.
pub struct Finalizer<'a> {
    backend: &'a dyn DepotBackend,
    batch_size: usize,
    show_progress: bool,
}

impl<'a> Finalizer<'a> {
    pub fn new(backend: &'a dyn DepotBackend, batch_size: usize) -> Self {
        Self {
            backend,
            batch_size: batch_size.max(1),
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn run(&self, rota: &Rota) -> FinalizeOutcome {
        let mut outcome = FinalizeOutcome::default();

        // Roots only; exclusion specs were for the removal pass
        let specs = rota.root_specs();
        let report = match self.backend.plan(&specs) {
            Ok(report) => report,
            Err(e) => {
                warn!("Finalize plan failed: {}", e);
                outcome.errors.push(e.to_string());
                return outcome;
            }
        };

        for event in &report.events {
            self.classify_event(event, &rota.target, &mut outcome);
        }

        let mut targets: Vec<FetchTarget> = report
            .items
            .iter()
            .filter(|file| rota.query.is_excluded(&file.path).is_none())
            .map(|file| {
                let revision = if file.action.is_delete() { 0 } else { file.revision };
                DepotSpec::new(file.path.clone(), RevisionSpec::Number(revision))
            })
            .collect();
        targets.extend(outcome.secondary.iter().cloned());

        if targets.is_empty() {
            debug!("Nothing left to finalize");
            return outcome;
        }

        info!("Finalizing {} files", targets.len());
        let pb = progress::count_bar(targets.len() as u64, self.show_progress);
        pb.set_message("finalizing");

        let options = FetchOptions {
            dry_run: false,
            batch_size: self.batch_size,
        };
        match self.backend.fetch(&targets, options) {
            Ok(stream) => {
                for event in stream {
                    match event {
                        FetchEvent::Synced(record) => {
                            debug!("{}", record);
                            outcome.fetched += 1;
                            pb.inc(1);
                        }
                        FetchEvent::Info(line) => debug!("{}", line),
                        FetchEvent::Error(e) => {
                            warn!("Finalize fetch: {}", e);
                            outcome.fetch_errors += 1;
                        }
                    }
                }
            }
            Err(e) => warn!("Finalize fetch failed: {}", e),
        }

        pb.finish_and_clear();
        outcome
    }

    fn classify_event(&self, event: &BackendEvent, target: &RevisionSpec, outcome: &mut FinalizeOutcome) {
        let line = event.message();
        match InfoClass::classify(line) {
            class if class.is_benign() => debug!("{}", line),
            InfoClass::MustResolve => outcome.must_resolve.push(line.to_string()),
            InfoClass::OpenedNotChanged => match parse_info_target(line) {
                Some((path, revision)) => {
                    let revision = revision.map_or_else(|| target.clone(), RevisionSpec::Number);
                    outcome.secondary.push(DepotSpec::new(path, revision));
                }
                None => {
                    warn!("Unparseable backend line: {}", line);
                    outcome.errors.push(line.to_string());
                }
            },
            _ => {
                warn!("{}", line);
                outcome.errors.push(line.to_string());
            }
        }
    }
}
