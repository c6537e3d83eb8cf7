use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::sleep;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use indicatif::ProgressBar;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

use crate::flac::io::directory::prune_empty_upward_unless;
use crate::flac::processor::{ItemOutcome, ItemProcessor, ProcessingTask};

/// Destinations and directories currently owned by workers. Lives for one page.
///
/// Tracks of one album share a directory, so every claim also holds a count on its destination
/// directory and each ancestor below the base. Pruning skips any directory another claim holds,
/// and directory creation and pruning are serialized on `layout`.
#[derive(Debug, Default)]
pub(crate) struct PathClaims {
    claimed: DashSet<PathBuf>,
    dirs: DashMap<PathBuf, usize>,
    layout: Mutex<()>,
}

impl PathClaims {
    /// Claims `key`, or returns `None` when another worker already holds it.
    ///
    /// # Arguments
    ///
    /// * `key`: Identifies the destination file regardless of extension.
    /// * `dir`: The directory the file is written into.
    /// * `root`: The base directory. It and anything above it are never counted.
    pub(crate) fn claim(&self, key: &Path, dir: &Path, root: &Path) -> Option<Claim<'_>> {
        if !self.claimed.insert(key.to_path_buf()) {
            return None;
        }

        let dirs: Vec<PathBuf> = dir
            .ancestors()
            .take_while(|ancestor| *ancestor != root && ancestor.starts_with(root))
            .map(Path::to_path_buf)
            .collect();
        for held in &dirs {
            *self.dirs.entry(held.clone()).or_insert(0) += 1;
        }

        Some(Claim {
            claims: self,
            key: key.to_path_buf(),
            dir: dir.to_path_buf(),
            root: root.to_path_buf(),
            dirs,
            released: false,
        })
    }

    /// Whether any live claim writes into `dir` or below it.
    pub(crate) fn is_held(&self, dir: &Path) -> bool {
        self.dirs.get(dir).is_some_and(|count| *count > 0)
    }

    fn lock_layout(&self) -> MutexGuard<'_, ()> {
        self.layout.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A worker's hold on one destination. Released on drop.
pub(crate) struct Claim<'a> {
    claims: &'a PathClaims,
    key: PathBuf,
    dir: PathBuf,
    root: PathBuf,
    dirs: Vec<PathBuf>,
    released: bool,
}

impl Claim<'_> {
    /// Creates the destination directory.
    pub(crate) fn create_dir(&self) -> io::Result<()> {
        let _layout = self.claims.lock_layout();
        fs::create_dir_all(&self.dir)
    }

    /// Releases the claim, then prunes the destination directory upward while it is empty and no
    /// other claim holds it.
    pub(crate) fn release_and_prune(mut self, cover_file_name: &str) -> io::Result<Vec<PathBuf>> {
        let claims = self.claims;
        let _layout = claims.lock_layout();
        self.release();
        prune_empty_upward_unless(&self.dir, &self.root, cover_file_name, |dir| claims.is_held(dir))
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        self.claims.claimed.remove(&self.key);
        for held in &self.dirs {
            if let Entry::Occupied(mut entry) = self.claims.dirs.entry(held.clone()) {
                *entry.get_mut() -= 1;
                if *entry.get() == 0 {
                    entry.remove();
                }
            }
        }
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Per-page tallies of task outcomes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PageReport {
    pub kept: usize,
    pub rejected: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub failed: usize,
}

#[derive(Default)]
struct PageCounters {
    kept: AtomicUsize,
    rejected: AtomicUsize,
    skipped: AtomicUsize,
    duplicates: AtomicUsize,
    failed: AtomicUsize,
}

impl PageCounters {
    fn record(&self, outcome: &ItemOutcome) {
        let counter = match outcome {
            ItemOutcome::Kept { .. } => &self.kept,
            ItemOutcome::Rejected { .. } => &self.rejected,
            ItemOutcome::Skipped { .. } => &self.skipped,
            ItemOutcome::Duplicate { .. } => &self.duplicates,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn report(&self) -> PageReport {
        PageReport {
            kept: self.kept.load(Ordering::SeqCst),
            rejected: self.rejected.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            duplicates: self.duplicates.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// A fixed set of download workers that drain one page of tasks at a time.
pub(crate) struct WorkerPool {
    pool: ThreadPool,
    worker_count: usize,
    failure_penalty: Duration,
}

impl WorkerPool {
    /// # Arguments
    ///
    /// * `worker_count`: Number of workers draining each page.
    /// * `failure_penalty`: Pause a worker takes after a failed task, before reporting it.
    pub(crate) fn new(worker_count: usize, failure_penalty: Duration) -> Result<Self, ThreadPoolBuildError> {
        let worker_count = worker_count.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(worker_count)
            .thread_name(|i| format!("download-worker-{}", i))
            .build()?;

        Ok(WorkerPool {
            pool,
            worker_count,
            failure_penalty,
        })
    }

    /// Processes every task of a page and returns once all workers are done.
    ///
    /// Tasks go through a closed FIFO queue, so each one is taken by exactly one worker. A failed
    /// task never stops its worker.
    pub(crate) fn run_page(
        &self,
        processor: &ItemProcessor,
        tasks: Vec<ProcessingTask>,
        progress: &ProgressBar,
    ) -> PageReport {
        let (sender, receiver) = flume::unbounded();
        for task in tasks {
            if let Err(err) = sender.send(task) {
                error!("Failed to queue task: {}", err);
            }
        }
        drop(sender);

        let claims = PathClaims::default();
        let counters = PageCounters::default();

        self.pool.scope(|scope| {
            for worker in 0..self.worker_count {
                let receiver = receiver.clone();
                let claims = &claims;
                let counters = &counters;

                scope.spawn(move |_| {
                    while let Ok(task) = receiver.recv() {
                        match processor.process(&task, claims) {
                            Ok(outcome) => counters.record(&outcome),
                            Err(err) => {
                                counters.failed.fetch_add(1, Ordering::Relaxed);
                                sleep(self.failure_penalty);
                                error!("Worker {} failed \"{}\": {}", worker, task.entry.name, err);
                            }
                        }
                        progress.inc(1);
                    }
                    trace!("Worker {} drained its queue", worker);
                });
            }
        });

        counters.report()
    }
}
