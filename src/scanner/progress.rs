//! Scan progress tracking and reporting.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use super::job::JobState;

/// Scan progress information.
#[derive(Debug, Clone)]
pub struct ScanProgress {
    pub files_discovered: u64,
    pub files_scanned: u64,
    pub files_skipped: u64,
    pub files_errored: u64,
    pub bytes_scanned: u64,
    /// Suspicious plus malicious results
    pub threats_found: u64,
    /// Most recently finished path
    pub current_path: Option<PathBuf>,
    pub start_time: Instant,
}

impl ScanProgress {
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Calculate scan rate (files per second).
    pub fn files_per_second(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.files_scanned as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn files_finished(&self) -> u64 {
        self.files_scanned + self.files_skipped + self.files_errored
    }

    /// Share of discovered files that are finished, in percent.
    pub fn percentage(&self) -> Option<f64> {
        if self.files_discovered == 0 {
            return None;
        }
        Some((self.files_finished() as f64 / self.files_discovered as f64 * 100.0).min(100.0))
    }
}

type ProgressCallback = Box<dyn Fn(ScanProgress) + Send + Sync>;

/// Lock-free progress counters mirrored from the job's aggregator loop.
pub struct ProgressTracker {
    files_discovered: AtomicU64,
    files_scanned: AtomicU64,
    files_skipped: AtomicU64,
    files_errored: AtomicU64,
    bytes_scanned: AtomicU64,
    threats_found: AtomicU64,
    current_path: RwLock<Option<PathBuf>>,
    start_time: Instant,
    callback: RwLock<Option<ProgressCallback>>,
    callback_interval: Duration,
    last_callback: RwLock<Instant>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            files_discovered: AtomicU64::new(0),
            files_scanned: AtomicU64::new(0),
            files_skipped: AtomicU64::new(0),
            files_errored: AtomicU64::new(0),
            bytes_scanned: AtomicU64::new(0),
            threats_found: AtomicU64::new(0),
            current_path: RwLock::new(None),
            start_time: now,
            callback: RwLock::new(None),
            callback_interval: Duration::from_millis(100),
            last_callback: RwLock::new(now),
        }
    }

    /// Set a progress callback function.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(ScanProgress) + Send + Sync + 'static,
    {
        match self.callback.write() {
            Ok(mut cb) => *cb = Some(Box::new(callback)),
            Err(_) => log::warn!("Progress callback lock poisoned; callback not installed"),
        }
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.callback_interval = interval;
    }

    pub fn increment_discovered(&self) {
        self.files_discovered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scanned(&self, path: PathBuf, bytes: u64, flagged: bool) {
        self.files_scanned.fetch_add(1, Ordering::Relaxed);
        self.bytes_scanned.fetch_add(bytes, Ordering::Relaxed);
        if flagged {
            self.threats_found.fetch_add(1, Ordering::Relaxed);
        }
        if let Ok(mut current) = self.current_path.write() {
            *current = Some(path);
        }
        self.maybe_callback();
    }

    pub fn increment_skipped(&self) {
        self.files_skipped.fetch_add(1, Ordering::Relaxed);
        self.maybe_callback();
    }

    pub fn increment_errors(&self) {
        self.files_errored.fetch_add(1, Ordering::Relaxed);
        self.maybe_callback();
    }

    /// Notify the callback once the job is over.
    pub fn finish(&self, state: JobState) {
        log::debug!("Progress finished in state {}", state);
        self.force_callback();
    }

    /// Get current progress snapshot.
    pub fn snapshot(&self) -> ScanProgress {
        ScanProgress {
            files_discovered: self.files_discovered.load(Ordering::Relaxed),
            files_scanned: self.files_scanned.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            files_errored: self.files_errored.load(Ordering::Relaxed),
            bytes_scanned: self.bytes_scanned.load(Ordering::Relaxed),
            threats_found: self.threats_found.load(Ordering::Relaxed),
            current_path: self
                .current_path
                .read()
                .map(|p| p.clone())
                .unwrap_or_default(),
            start_time: self.start_time,
        }
    }

    fn maybe_callback(&self) {
        let due = self
            .last_callback
            .read()
            .map(|last| last.elapsed() >= self.callback_interval)
            .unwrap_or(false);

        if due {
            self.force_callback();
        }
    }

    fn force_callback(&self) {
        if let Ok(mut last) = self.last_callback.write() {
            *last = Instant::now();
        }

        if let Ok(callback) = self.callback.read() {
            if let Some(ref cb) = *callback {
                cb(self.snapshot());
            }
        }
    }
}

/// Single-line console progress display on stderr.
pub struct ConsoleProgressReporter {
    last_line_length: AtomicUsize,
}

impl Default for ConsoleProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleProgressReporter {
    pub fn new() -> Self {
        Self {
            last_line_length: AtomicUsize::new(0),
        }
    }

    pub fn report(&self, progress: &ScanProgress) {
        let message = match progress.percentage() {
            Some(pct) => format!(
                "\r[Scanning] {:.1}% | Files: {} | Threats: {} | Rate: {:.0}/s | Time: {}s",
                pct,
                progress.files_scanned,
                progress.threats_found,
                progress.files_per_second(),
                progress.elapsed().as_secs()
            ),
            None => format!(
                "\r[Scanning] Files: {} | Threats: {} | Time: {}s",
                progress.files_scanned,
                progress.threats_found,
                progress.elapsed().as_secs()
            ),
        };

        let last_len = self.last_line_length.load(Ordering::Relaxed);
        let padding = " ".repeat(last_len.saturating_sub(message.len()));

        eprint!("{}{}", message, padding);
        self.last_line_length.store(message.len(), Ordering::Relaxed);
    }

    /// Terminate the progress line.
    pub fn finish(&self) {
        if self.last_line_length.swap(0, Ordering::Relaxed) > 0 {
            eprintln!();
        }
    }
}

/// Create a shared progress tracker.
pub fn shared_tracker() -> Arc<ProgressTracker> {
    Arc::new(ProgressTracker::new())
}
