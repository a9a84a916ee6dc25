//! Parallel execution of a [`Rota`].
//!
//! One pool thread runs each non-empty worker; one more runs the
//! coordinator that watches progress. After the workers join, the
//! finalization pass runs on the calling thread.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use humansize::{format_size, DECIMAL};
use indicatif::ProgressBar;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::depot::{Action, DepotBackend, FetchEvent, FetchOptions, FetchTarget, Result};
use crate::sync::finalize::Finalizer;
use crate::sync::progress::{self, EchoSink, ProgressBoard, WorkerProgress};
use crate::sync::rota::{Rota, WorkItem, Worker};
use crate::sync::session::{SessionState, SyncReport, SyncSession, WorkerFailure};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(300);
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Runs a rota's workers in parallel and finalizes the result.
pub struct ParallelExecutor {
    backend: Arc<dyn DepotBackend>,
    batch_size: usize,
    poll_interval: Duration,
    show_progress: bool,
    echo_sink: EchoSink,
}

impl ParallelExecutor {
    pub fn new(backend: Arc<dyn DepotBackend>) -> Self {
        Self {
            backend,
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            show_progress: true,
            echo_sink: progress::stdout_sink(),
        }
    }

    pub fn from_config(backend: Arc<dyn DepotBackend>, config: &SyncConfig) -> Self {
        Self::new(backend)
            .with_batch_size(config.batch_size)
            .with_poll_interval(config.poll_interval())
            .with_progress(config.show_progress)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Where echo lines are written. Defaults to stdout.
    pub fn with_echo_sink(mut self, sink: EchoSink) -> Self {
        self.echo_sink = sink;
        self
    }

    /// Execute `rota` and report overall success.
    pub fn sync(&self, mut rota: Rota, dry_run: bool, echo: bool) -> bool {
        self.execute(&mut rota, dry_run, echo).succeeded()
    }

    /// Execute `rota`, leaving per-worker progress in place for inspection.
    pub fn execute(&self, rota: &mut Rota, dry_run: bool, echo: bool) -> SyncReport {
        let start_time = Instant::now();
        let mut session = SyncSession::new(rota).with_echo_sink(Arc::clone(&self.echo_sink));
        session.enter(SessionState::Executing);

        info!(
            "Syncing {} files ({}) with {} workers{}",
            session.totals.items,
            format_size(session.totals.bytes, DECIMAL),
            rota.active_workers(),
            if dry_run { " (dry run)" } else { "" }
        );

        let mut report = SyncReport {
            state: SessionState::Executing,
            dry_run,
            totals: session.totals,
            done_items: 0,
            done_bytes: 0,
            failures: Vec::new(),
            error: None,
            finalize: None,
            duration: Duration::ZERO,
        };

        if let Err(e) = self.run_workers(rota, &session.progress, dry_run, echo) {
            error!("Sync aborted: {}", e);
            report.error = Some(e.to_string());
            session.enter(SessionState::Failed);
            return finish(report, &session, start_time);
        }

        let snapshot = session.progress.snapshot();
        report.done_items = snapshot.done_items;
        report.done_bytes = snapshot.done_size;
        report.failures = rota
            .workers
            .iter()
            .filter_map(|worker| {
                worker.error.as_ref().map(|e| WorkerFailure {
                    worker: worker.id,
                    error: e.to_string(),
                })
            })
            .collect();

        if !report.failures.is_empty() {
            error!("{} workers failed; skipping finalization", report.failures.len());
            session.enter(SessionState::Failed);
            return finish(report, &session, start_time);
        }

        if dry_run {
            session.enter(SessionState::Succeeded);
            return finish(report, &session, start_time);
        }

        session.enter(SessionState::Finalizing);
        let outcome = Finalizer::new(self.backend.as_ref(), self.batch_size)
            .with_progress(self.show_progress && !echo)
            .run(rota);
        if outcome.succeeded() {
            session.enter(SessionState::Succeeded);
        } else {
            error!("Finalization reported {} errors", outcome.errors.len());
            session.enter(SessionState::Failed);
        }
        report.finalize = Some(outcome);

        finish(report, &session, start_time)
    }

    fn run_workers(&self, rota: &mut Rota, board: &ProgressBoard, dry_run: bool, echo: bool) -> Result<()> {
        let active = rota.active_workers();
        if active == 0 {
            debug!("Rota is empty, no workers to start");
            return Ok(());
        }

        // One thread per populated worker plus the coordinator
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(active + 1)
            .thread_name(|index| format!("depot-sync-{}", index))
            .build()?;

        let pb = if echo {
            ProgressBar::hidden()
        } else {
            progress::transfer_bar(self.show_progress)
        };

        let (done_tx, done_rx) = crossbeam_channel::unbounded::<usize>();
        let backend: &dyn DepotBackend = self.backend.as_ref();
        let options = FetchOptions {
            dry_run,
            batch_size: self.batch_size,
        };
        let poll_interval = self.poll_interval;
        let workers = &mut rota.workers;
        let pb_ref = &pb;

        pool.scope(move |scope| {
            for worker in workers.iter_mut().filter(|worker| !worker.is_empty()) {
                let done_tx = done_tx.clone();
                scope.spawn(move |_| {
                    run_worker(worker, backend, board, options, echo);
                    let _ = done_tx.send(worker.id);
                });
            }
            drop(done_tx);

            coordinate(&done_rx, board, pb_ref, active, poll_interval, echo);
        });

        pb.finish_and_clear();
        Ok(())
    }
}

/// Watch the workers until every one has reported completion.
fn coordinate(
    done_rx: &Receiver<usize>,
    board: &ProgressBoard,
    pb: &ProgressBar,
    active: usize,
    poll_interval: Duration,
    echo: bool,
) {
    if echo {
        // Block without drawing so progress never interleaves with echo lines
        for worker in done_rx.iter() {
            debug!("Worker {} finished", worker);
        }
        return;
    }

    let mut remaining = active;
    while remaining > 0 {
        match done_rx.recv_timeout(poll_interval) {
            Ok(worker) => {
                debug!("Worker {} finished", worker);
                remaining -= 1;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let snapshot = board.snapshot();
        pb.set_position(snapshot.permille());
        pb.set_message(format!(
            "{}/{} files, {}",
            snapshot.done_items,
            snapshot.total_items,
            format_size(snapshot.done_size, DECIMAL)
        ));
    }
}

/// Transfer one worker's items. Only a fatal error stops it early.
fn run_worker(worker: &mut Worker, backend: &dyn DepotBackend, board: &ProgressBoard, options: FetchOptions, echo: bool) {
    let targets: Vec<FetchTarget> = worker.items.iter().map(WorkItem::target).collect();
    let costs: HashMap<&str, u64> = worker
        .items
        .iter()
        .map(|item| (item.path.as_str(), item.cost))
        .collect();

    debug!(
        "Worker {} starting: {} items, {}",
        worker.id,
        targets.len(),
        format_size(worker.burden, DECIMAL)
    );

    let stream = match backend.fetch(&targets, options) {
        Ok(stream) => stream,
        Err(e) => {
            if e.is_fatal() {
                error!("Worker {}: {}", worker.id, e);
                worker.error = Some(e);
            } else {
                warn!("Worker {}: {}", worker.id, e);
            }
            publish(board, worker.id, worker.done_size, worker.done_items, worker.error.is_some());
            return;
        }
    };

    for event in stream {
        match event {
            FetchEvent::Synced(record) => {
                let cost = if record.action == Action::Replace {
                    0
                } else {
                    costs.get(record.path.as_str()).copied().unwrap_or(0)
                };
                worker.done_size += cost;
                worker.done_items += 1;

                let progress = WorkerProgress {
                    done_size: worker.done_size,
                    done_items: worker.done_items,
                    failed: false,
                };
                if echo {
                    board.publish_and_echo(worker.id, progress, &record.to_string());
                } else {
                    board.publish(worker.id, progress);
                }
            }
            FetchEvent::Info(line) => debug!("Worker {}: {}", worker.id, line),
            FetchEvent::Error(e) if e.is_fatal() => {
                error!("Worker {} aborting: {}", worker.id, e);
                worker.error = Some(e);
                break;
            }
            FetchEvent::Error(e) => warn!("Worker {}: {}", worker.id, e),
        }
    }

    publish(board, worker.id, worker.done_size, worker.done_items, worker.error.is_some());
}

fn publish(board: &ProgressBoard, worker: usize, done_size: u64, done_items: usize, failed: bool) {
    board.publish(
        worker,
        WorkerProgress {
            done_size,
            done_items,
            failed,
        },
    );
}

fn finish(mut report: SyncReport, session: &SyncSession, start_time: Instant) -> SyncReport {
    report.state = session.state();
    report.duration = start_time.elapsed();
    info!(
        "Sync {:?} in {:.1}s: {} files, {}",
        report.state,
        report.duration.as_secs_f64(),
        report.done_items,
        format_size(report.done_bytes, DECIMAL)
    );
    report
}
