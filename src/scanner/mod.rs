//! File system scanning.
//!
//! This module provides:
//! - Scan jobs and their lifecycle
//! - The concurrent scan orchestrator (discovery, workers, aggregation)
//! - File type detection via magic bytes
//! - Progress tracking and reporting
//! - Cooperative cancellation

pub mod cancel;
pub mod filetype;
pub mod job;
pub mod orchestrator;
pub mod progress;

pub use cancel::CancellationToken;
pub use filetype::{FileType, FileTypeDetector};
pub use job::{FileOutcome, JobState, JobStatistics, ScanJob, ScanReport, ScanTarget, SkipReason};
pub use orchestrator::Scanner;
pub use progress::{ConsoleProgressReporter, ProgressTracker, ScanProgress};
