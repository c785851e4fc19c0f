//! Scan jobs: lifecycle state, per-file outcomes and statistics.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::error::{Error, Result};
use crate::core::types::{QuarantineDisposition, ScanResult, Verdict};

/// Lifecycle of a scan job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Discovering,
    Scanning,
    Aggregating,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Discovering)
                | (Discovering, Scanning)
                | (Scanning, Aggregating)
                | (Aggregating, Completed)
                | (Discovering, Cancelled)
                | (Discovering, Failed)
                | (Scanning, Cancelled)
                | (Scanning, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Discovering => "discovering",
            JobState::Scanning => "scanning",
            JobState::Aggregating => "aggregating",
            JobState::Completed => "completed",
            JobState::Cancelled => "cancelled",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanTarget {
    /// Walk a directory tree (or a single file)
    Root(PathBuf),
    /// An explicit list of files
    Files(Vec<PathBuf>),
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanTarget::Root(path) => write!(f, "{}", path.display()),
            ScanTarget::Files(files) => write!(f, "{} files", files.len()),
        }
    }
}

/// Why a discovered path was not scanned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The job was cancelled before the file started
    Cancelled,
    /// The per-file timeout elapsed
    Timeout,
    /// Larger than `scan.skip_large_files_mb`
    TooLarge { size: u64 },
    /// Not a regular file (socket, fifo, device)
    NotRegularFile,
    /// The walker could not read this entry
    Traversal(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Cancelled => write!(f, "cancelled"),
            SkipReason::Timeout => write!(f, "timed out"),
            SkipReason::TooLarge { size } => write!(f, "too large ({} bytes)", size),
            SkipReason::NotRegularFile => write!(f, "not a regular file"),
            SkipReason::Traversal(msg) => write!(f, "traversal error: {}", msg),
        }
    }
}

/// Final outcome for one discovered path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FileOutcome {
    Scanned(ScanResult),
    Skipped { path: PathBuf, reason: SkipReason },
    Errored { path: PathBuf, error: String },
}

impl FileOutcome {
    pub fn path(&self) -> &Path {
        match self {
            FileOutcome::Scanned(result) => &result.record.path,
            FileOutcome::Skipped { path, .. } | FileOutcome::Errored { path, .. } => path,
        }
    }

    pub fn result(&self) -> Option<&ScanResult> {
        match self {
            FileOutcome::Scanned(result) => Some(result),
            _ => None,
        }
    }
}

/// Counters for a job. Only ever increase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatistics {
    pub files_discovered: u64,
    pub files_scanned: u64,
    pub files_skipped: u64,
    pub files_errored: u64,
    pub bytes_scanned: u64,
    pub clean: u64,
    pub suspicious: u64,
    pub malicious: u64,
    pub quarantined: u64,
}

impl JobStatistics {
    /// Fold one outcome into the counters.
    pub fn record(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Scanned(result) => {
                self.files_scanned += 1;
                self.bytes_scanned += result.record.size;
                match result.verdict {
                    Verdict::Clean => self.clean += 1,
                    Verdict::Suspicious => self.suspicious += 1,
                    Verdict::Malicious => self.malicious += 1,
                }
                if matches!(
                    result.quarantine,
                    Some(QuarantineDisposition::Quarantined { .. })
                ) {
                    self.quarantined += 1;
                }
            }
            FileOutcome::Skipped { .. } => self.files_skipped += 1,
            FileOutcome::Errored { .. } => self.files_errored += 1,
        }
    }

    /// Outcomes accounted for so far.
    pub fn files_finished(&self) -> u64 {
        self.files_scanned + self.files_skipped + self.files_errored
    }

    pub fn threats(&self) -> u64 {
        self.suspicious + self.malicious
    }
}

/// A scan job and its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: Uuid,
    pub target: ScanTarget,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Reason for a Failed job
    pub failure: Option<String>,
    /// Job-level warnings (unavailable detectors and the like)
    pub warnings: Vec<String>,
    pub statistics: JobStatistics,
}

impl ScanJob {
    pub fn new(target: ScanTarget) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            state: JobState::Pending,
            created_at: Utc::now(),
            finished_at: None,
            failure: None,
            warnings: Vec::new(),
            statistics: JobStatistics::default(),
        }
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        log::debug!("Job {}: {} -> {}", self.id, self.state, next);
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Transition to Failed with a reason.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(JobState::Failed)?;
        self.failure = Some(reason.into());
        Ok(())
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.created_at)
    }
}

/// Everything a finished job produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub job: ScanJob,
    pub outcomes: Vec<FileOutcome>,
}

impl ScanReport {
    /// Results flagged suspicious or malicious.
    pub fn flagged(&self) -> impl Iterator<Item = &ScanResult> {
        self.outcomes
            .iter()
            .filter_map(FileOutcome::result)
            .filter(|r| r.verdict.is_flagged())
    }

    pub fn is_clean(&self) -> bool {
        self.flagged().next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut job = ScanJob::new(ScanTarget::Root(PathBuf::from("/tmp")));
        for state in [
            JobState::Discovering,
            JobState::Scanning,
            JobState::Aggregating,
            JobState::Completed,
        ] {
            job.transition(state).unwrap();
        }
        assert_eq!(job.state, JobState::Completed);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut job = ScanJob::new(ScanTarget::Files(vec![]));
        assert!(matches!(
            job.transition(JobState::Scanning),
            Err(Error::InvalidTransition {
                from: JobState::Pending,
                to: JobState::Scanning
            })
        ));

        job.transition(JobState::Discovering).unwrap();
        job.transition(JobState::Cancelled).unwrap();
        assert!(job.transition(JobState::Scanning).is_err());
        assert!(job.transition(JobState::Failed).is_err());
        assert_eq!(job.state, JobState::Cancelled);
    }

    #[test]
    fn test_cancel_and_fail_only_while_running() {
        assert!(!JobState::Pending.can_transition_to(JobState::Cancelled));
        assert!(!JobState::Aggregating.can_transition_to(JobState::Failed));
        assert!(JobState::Scanning.can_transition_to(JobState::Failed));
        assert!(JobState::Discovering.can_transition_to(JobState::Cancelled));
    }

    #[test]
    fn test_fail_records_reason() {
        let mut job = ScanJob::new(ScanTarget::Root(PathBuf::from("/missing")));
        job.transition(JobState::Discovering).unwrap();
        job.fail("root not found").unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.failure.as_deref(), Some("root not found"));
    }

    #[test]
    fn test_statistics_record() {
        let mut stats = JobStatistics::default();
        stats.record(&FileOutcome::Skipped {
            path: PathBuf::from("a"),
            reason: SkipReason::Timeout,
        });
        stats.record(&FileOutcome::Errored {
            path: PathBuf::from("b"),
            error: "denied".to_string(),
        });
        assert_eq!(stats.files_finished(), 2);
        assert_eq!(stats.files_skipped, 1);
        assert_eq!(stats.files_errored, 1);
    }
}
