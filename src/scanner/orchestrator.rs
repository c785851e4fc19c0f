//! Scan orchestration.
//!
//! One blocking producer walks the target into a bounded queue; a pool of
//! async workers drains it, running each file's pipeline on the blocking
//! pool; a single aggregator loop owns the outcome list and statistics.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use walkdir::{DirEntry, WalkDir};

use super::cancel::CancellationToken;
use super::job::{FileOutcome, JobState, ScanJob, ScanReport, ScanTarget, SkipReason};
use super::progress::ProgressTracker;
use crate::core::config::{Config, ScanConfig, ScanOptions};
use crate::core::error::{Error, Result};
use crate::core::types::{QuarantineDisposition, ScanResult, Verdict};
use crate::detection::DetectionPipeline;
use crate::quarantine::{IsolateOutcome, QuarantineStore};

/// Queue item handed from the producer to the workers.
#[derive(Debug)]
enum Work {
    /// Run the pipeline on this file
    Scan(PathBuf),
    /// Already decided during discovery; forwarded as-is
    Resolved(FileOutcome),
}

/// Runs scan jobs.
pub struct Scanner {
    config: Arc<Config>,
    options: ScanOptions,
    pipeline: Arc<DetectionPipeline>,
    quarantine: Option<Arc<QuarantineStore>>,
    sink: Option<mpsc::Sender<FileOutcome>>,
    cancel: CancellationToken,
    progress: Arc<ProgressTracker>,
}

impl Scanner {
    /// Create a scanner, building the detection pipeline from `config`.
    pub fn new(config: Arc<Config>, options: ScanOptions) -> Self {
        let pipeline = DetectionPipeline::build(&config, &options);
        Self::with_pipeline(config, options, pipeline)
    }

    /// Create a scanner around an already built pipeline.
    pub fn with_pipeline(
        config: Arc<Config>,
        options: ScanOptions,
        pipeline: DetectionPipeline,
    ) -> Self {
        Self {
            config,
            options,
            pipeline: Arc::new(pipeline),
            quarantine: None,
            sink: None,
            cancel: CancellationToken::new(),
            progress: Arc::new(ProgressTracker::new()),
        }
    }

    /// Store used when `quarantine_on_malicious` is set.
    pub fn with_quarantine(mut self, store: Arc<QuarantineStore>) -> Self {
        self.quarantine = Some(store);
        self
    }

    /// Stream every outcome to `sink` as it is produced.
    pub fn with_sink(mut self, sink: mpsc::Sender<FileOutcome>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the running job. Files already started finish normally.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    /// Run one job to a terminal state.
    ///
    /// A missing root, a closed sink or an exceeded deadline end the job as
    /// Failed; per-file problems never do. The report always holds every
    /// outcome produced so far. A deadline or cancellation that arrives
    /// after every file has finished does not change the result.
    pub async fn run(&self, target: ScanTarget) -> Result<ScanReport> {
        let mut job = ScanJob::new(target.clone());
        job.warnings.extend(self.pipeline.warnings().iter().cloned());
        log::info!("Starting scan job {} of {}", job.id, target);

        job.transition(JobState::Discovering)?;

        let target = match resolve_target(target) {
            Ok(target) => target,
            Err(reason) => {
                log::error!("Scan job {} failed: {}", job.id, reason);
                job.fail(reason)?;
                self.progress.finish(job.state);
                return Ok(ScanReport {
                    job,
                    outcomes: Vec::new(),
                });
            }
        };

        let capacity = self.config.scan.queue_capacity.max(1);
        let (work_tx, work_rx) = mpsc::channel::<Work>(capacity);
        let (result_tx, mut result_rx) = mpsc::channel::<FileOutcome>(capacity);

        let producer = {
            let scan_config = self.config.scan.clone();
            let cancel = self.cancel.clone();
            let progress = Arc::clone(&self.progress);
            tokio::task::spawn_blocking(move || {
                discover(target, &scan_config, &cancel, &progress, &work_tx)
            })
        };

        let work_rx = Arc::new(Mutex::new(work_rx));
        let workers: Vec<JoinHandle<()>> = (0..self.options.threads.max(1))
            .map(|_| {
                let worker = Worker {
                    pipeline: Arc::clone(&self.pipeline),
                    quarantine: if self.options.quarantine_on_malicious {
                        self.quarantine.clone()
                    } else {
                        None
                    },
                    cancel: self.cancel.clone(),
                    per_file_timeout: self.options.per_file_timeout,
                };
                let rx = Arc::clone(&work_rx);
                let tx = result_tx.clone();
                tokio::spawn(worker.run(rx, tx))
            })
            .collect();
        drop(result_tx);

        job.transition(JobState::Scanning)?;

        let deadline_hit = Arc::new(AtomicBool::new(false));
        let timer = self.options.job_deadline.map(|deadline| {
            let cancel = self.cancel.clone();
            let hit = Arc::clone(&deadline_hit);
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                log::warn!("Job deadline of {:?} exceeded, cancelling", deadline);
                hit.store(true, Ordering::SeqCst);
                cancel.cancel();
            })
        });

        let mut outcomes = Vec::new();
        let mut sink_closed = false;
        let mut cut_short = false;
        while let Some(outcome) = result_rx.recv().await {
            cut_short |= matches!(
                outcome,
                FileOutcome::Skipped {
                    reason: SkipReason::Cancelled,
                    ..
                }
            );
            job.statistics.record(&outcome);
            self.mirror_progress(&outcome);

            if let Some(sink) = self.sink.as_ref().filter(|_| !sink_closed) {
                if sink.send(outcome.clone()).await.is_err() {
                    log::error!("Output sink closed, cancelling job {}", job.id);
                    sink_closed = true;
                    self.cancel.cancel();
                }
            }

            outcomes.push(outcome);
        }

        if let Some(timer) = timer {
            timer.abort();
        }

        match producer.await {
            Ok(discovery) => {
                job.statistics.files_discovered = discovery.queued;
                cut_short |= discovery.interrupted;
            }
            Err(e) => log::error!("Discovery task failed: {}", e),
        }
        for worker in workers {
            if let Err(e) = worker.await {
                log::error!("Scan worker failed: {}", e);
            }
        }

        if sink_closed {
            job.fail("output sink closed")?;
        } else if cut_short && deadline_hit.load(Ordering::SeqCst) {
            job.fail("deadline exceeded")?;
        } else if cut_short && self.cancel.is_cancelled() {
            job.transition(JobState::Cancelled)?;
        } else {
            job.transition(JobState::Aggregating)?;
            job.transition(JobState::Completed)?;
        }

        self.progress.finish(job.state);

        let stats = &job.statistics;
        log::info!(
            "Scan job {} {}: {} scanned, {} skipped, {} errors, {} suspicious, {} malicious",
            job.id,
            job.state,
            stats.files_scanned,
            stats.files_skipped,
            stats.files_errored,
            stats.suspicious,
            stats.malicious
        );

        Ok(ScanReport { job, outcomes })
    }

    fn mirror_progress(&self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Scanned(result) => self.progress.record_scanned(
                result.record.path.clone(),
                result.record.size,
                result.verdict.is_flagged(),
            ),
            FileOutcome::Skipped { .. } => self.progress.increment_skipped(),
            FileOutcome::Errored { path, error } => {
                log::debug!("Error scanning {}: {}", path.display(), error);
                self.progress.increment_errors();
            }
        }
    }
}

/// Canonicalize the target; a missing root fails the job.
fn resolve_target(target: ScanTarget) -> std::result::Result<ScanTarget, String> {
    match target {
        ScanTarget::Root(root) => root
            .canonicalize()
            .map(ScanTarget::Root)
            .map_err(|e| format!("root not found: {} ({})", root.display(), e)),
        files => Ok(files),
    }
}

struct Worker {
    pipeline: Arc<DetectionPipeline>,
    quarantine: Option<Arc<QuarantineStore>>,
    cancel: CancellationToken,
    per_file_timeout: Option<Duration>,
}

impl Worker {
    async fn run(self, rx: Arc<Mutex<mpsc::Receiver<Work>>>, tx: mpsc::Sender<FileOutcome>) {
        loop {
            let work = { rx.lock().await.recv().await };
            let Some(work) = work else { break };

            let outcome = match work {
                Work::Resolved(outcome) => outcome,
                Work::Scan(path) if self.cancel.is_cancelled() => FileOutcome::Skipped {
                    path,
                    reason: SkipReason::Cancelled,
                },
                Work::Scan(path) => self.scan(path).await,
            };

            if tx.send(outcome).await.is_err() {
                break;
            }
        }
    }

    async fn scan(&self, path: PathBuf) -> FileOutcome {
        let pipeline = Arc::clone(&self.pipeline);
        let task_path = path.clone();
        let task = tokio::task::spawn_blocking(move || pipeline.scan_file(&task_path));

        let joined = match self.per_file_timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    log::warn!("Timed out after {:?}: {}", limit, path.display());
                    return FileOutcome::Skipped {
                        path,
                        reason: SkipReason::Timeout,
                    };
                }
            },
            None => task.await,
        };

        match joined {
            Ok(Ok(mut result)) => {
                if result.verdict == Verdict::Malicious {
                    if let Some(store) = &self.quarantine {
                        result.quarantine = Some(isolate(Arc::clone(store), &result).await);
                    }
                }
                FileOutcome::Scanned(result)
            }
            Ok(Err(e)) => FileOutcome::Errored {
                path,
                error: e.to_string(),
            },
            Err(e) => {
                let error = Error::scan_error(path.clone(), format!("scan task failed: {}", e));
                log::warn!("{}", error);
                FileOutcome::Errored {
                    path,
                    error: error.to_string(),
                }
            }
        }
    }
}

async fn isolate(store: Arc<QuarantineStore>, result: &ScanResult) -> QuarantineDisposition {
    let result = result.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        store.try_isolate(&result.record.path, &result)
    })
    .await;

    match outcome {
        Ok(Ok(IsolateOutcome::Created(entry))) => QuarantineDisposition::Quarantined {
            entry_id: entry.id,
        },
        Ok(Ok(IsolateOutcome::Existing(entry))) => QuarantineDisposition::AlreadyQuarantined {
            entry_id: entry.id,
        },
        Ok(Err(e)) => {
            log::error!("Quarantine failed: {}", e);
            QuarantineDisposition::Failed {
                reason: e.to_string(),
            }
        }
        Err(e) => QuarantineDisposition::Failed {
            reason: format!("quarantine task failed: {}", e),
        },
    }
}

/// What the producer did before it stopped.
#[derive(Debug, Clone, Copy, Default)]
struct Discovery {
    queued: u64,
    /// Stopped by cancellation before the walk was exhausted
    interrupted: bool,
}

/// Walk the target into the work queue.
fn discover(
    target: ScanTarget,
    config: &ScanConfig,
    cancel: &CancellationToken,
    progress: &ProgressTracker,
    tx: &mpsc::Sender<Work>,
) -> Discovery {
    let mut discovered = 0u64;
    let mut interrupted = false;
    let size_limit = config.skip_large_files_mb.saturating_mul(1024 * 1024);

    let mut queue = |work: Work| -> bool {
        if tx.blocking_send(work).is_err() {
            return false;
        }
        discovered += 1;
        progress.increment_discovered();
        true
    };

    match target {
        ScanTarget::Root(root) => {
            let walker = WalkDir::new(&root)
                .follow_links(config.follow_symlinks)
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !is_excluded(e, config));

            for entry in walker {
                if cancel.is_cancelled() {
                    interrupted = true;
                    break;
                }

                let work = match entry {
                    Ok(entry) => match classify(&entry, size_limit) {
                        Some(work) => work,
                        None => continue,
                    },
                    Err(e) => {
                        let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                        log::debug!("Traversal error at {}: {}", path.display(), e);
                        Work::Resolved(FileOutcome::Skipped {
                            path,
                            reason: SkipReason::Traversal(e.to_string()),
                        })
                    }
                };

                if !queue(work) {
                    break;
                }
            }
        }
        ScanTarget::Files(files) => {
            for path in files {
                if cancel.is_cancelled() {
                    interrupted = true;
                    break;
                }

                let work = match std::fs::metadata(&path) {
                    Ok(meta) if !meta.is_file() => Work::Resolved(FileOutcome::Skipped {
                        path,
                        reason: SkipReason::NotRegularFile,
                    }),
                    Ok(meta) if meta.len() > size_limit => Work::Resolved(FileOutcome::Skipped {
                        path,
                        reason: SkipReason::TooLarge { size: meta.len() },
                    }),
                    Ok(_) => Work::Scan(path),
                    Err(e) => Work::Resolved(FileOutcome::Errored {
                        error: format!("cannot stat {}: {}", path.display(), e),
                        path,
                    }),
                };

                if !queue(work) {
                    break;
                }
            }
        }
    }

    log::debug!("Discovery finished: {} paths queued", discovered);
    Discovery {
        queued: discovered,
        interrupted,
    }
}

/// Map a walked entry to work; directories and unfollowed links yield nothing.
fn classify(entry: &DirEntry, size_limit: u64) -> Option<Work> {
    let file_type = entry.file_type();
    if file_type.is_dir() || file_type.is_symlink() {
        return None;
    }

    let path = entry.path().to_path_buf();
    if !file_type.is_file() {
        return Some(Work::Resolved(FileOutcome::Skipped {
            path,
            reason: SkipReason::NotRegularFile,
        }));
    }

    match entry.metadata() {
        Ok(meta) if meta.len() > size_limit => Some(Work::Resolved(FileOutcome::Skipped {
            path,
            reason: SkipReason::TooLarge { size: meta.len() },
        })),
        Ok(_) => Some(Work::Scan(path)),
        Err(e) => Some(Work::Resolved(FileOutcome::Skipped {
            path,
            reason: SkipReason::Traversal(e.to_string()),
        })),
    }
}

/// Whether the walker should prune this entry.
fn is_excluded(entry: &DirEntry, config: &ScanConfig) -> bool {
    let path = entry.path();

    if config.skip_hidden
        && entry
            .file_name()
            .to_str()
            .map_or(false, |name| name.starts_with('.'))
    {
        return true;
    }

    if config.exclude_paths.iter().any(|p| path.starts_with(p)) {
        return true;
    }

    if entry.file_type().is_file() {
        if let Some(ext) = path.extension() {
            let ext = ext.to_string_lossy().to_lowercase();
            if config.exclude_extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
                return true;
            }
        }
    }

    false
}
