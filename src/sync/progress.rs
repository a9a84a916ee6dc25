//! Shared progress aggregation for parallel transfers.
//!
//! Each worker task owns its progress and publishes a copy into its own
//! slot here. The coordinator only ever reads the board.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// Destination for per-item echo lines.
pub type EchoSink = Arc<Mutex<dyn Write + Send>>;

/// Echo lines go to stdout unless the caller supplies a sink.
pub fn stdout_sink() -> EchoSink {
    Arc::new(Mutex::new(io::stdout()))
}

/// Published progress of one worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerProgress {
    pub done_size: u64,
    pub done_items: usize,
    pub failed: bool,
}

/// Aggregated view taken under the board lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub done_size: u64,
    pub done_items: usize,
    pub total_burden: u64,
    pub total_items: usize,
    pub failed_workers: usize,
}

impl ProgressSnapshot {
    /// Completed fraction of the burden. Rotas carrying no bytes (only
    /// removals) report by item count instead.
    pub fn fraction(&self) -> f64 {
        if self.total_burden > 0 {
            (self.done_size as f64 / self.total_burden as f64).min(1.0)
        } else if self.total_items > 0 {
            (self.done_items as f64 / self.total_items as f64).min(1.0)
        } else {
            1.0
        }
    }

    pub fn permille(&self) -> u64 {
        (self.fraction() * 1000.0).round() as u64
    }
}

/// The session's shared progress lock.
pub struct ProgressBoard {
    slots: Mutex<Vec<WorkerProgress>>,
    echo: EchoSink,
    total_burden: u64,
    total_items: usize,
}

impl fmt::Debug for ProgressBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressBoard")
            .field("slots", &self.slots)
            .field("total_burden", &self.total_burden)
            .field("total_items", &self.total_items)
            .finish_non_exhaustive()
    }
}

impl ProgressBoard {
    pub fn new(workers: usize, total_burden: u64, total_items: usize) -> Self {
        Self {
            slots: Mutex::new(vec![WorkerProgress::default(); workers]),
            echo: stdout_sink(),
            total_burden,
            total_items,
        }
    }

    pub fn with_echo_sink(mut self, sink: EchoSink) -> Self {
        self.echo = sink;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Vec<WorkerProgress>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrite a worker's slot.
    pub fn publish(&self, worker: usize, progress: WorkerProgress) {
        if let Some(slot) = self.lock().get_mut(worker) {
            *slot = progress;
        }
    }

    /// Publish and print a confirmation line without interleaving with other workers.
    pub fn publish_and_echo(&self, worker: usize, progress: WorkerProgress, line: &str) {
        let mut slots = self.lock();
        if let Some(slot) = slots.get_mut(worker) {
            *slot = progress;
        }
        // Sink is only locked under the board lock
        let mut sink = self.echo.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(sink, "{}", line).and_then(|_| sink.flush()) {
            warn!("Failed to echo '{}': {}", line, e);
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let slots = self.lock();
        let mut snapshot = ProgressSnapshot {
            total_burden: self.total_burden,
            total_items: self.total_items,
            ..ProgressSnapshot::default()
        };
        for slot in slots.iter() {
            snapshot.done_size += slot.done_size;
            snapshot.done_items += slot.done_items;
            if slot.failed {
                snapshot.failed_workers += 1;
            }
        }
        snapshot
    }
}

/// Bar tracking transferred burden in permille.
pub fn transfer_bar(visible: bool) -> ProgressBar {
    let pb = ProgressBar::with_draw_target(Some(1000), draw_target(visible));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% | {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb
}

/// Bar tracking a running file count.
pub fn count_bar(len: u64, visible: bool) -> ProgressBar {
    let pb = ProgressBar::with_draw_target(Some(len), draw_target(visible));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {pos}/{len} files | {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb
}

fn draw_target(visible: bool) -> ProgressDrawTarget {
    if visible {
        ProgressDrawTarget::stderr()
    } else {
        ProgressDrawTarget::hidden()
    }
}
