//! Per-folder lifecycle.
//!
//! ```text
//! Pending -> Scanning -> Skipped -> Completed
//!                     -> CopyingPhase1 -> Completed
//!                                      -> Paused -> CopyingPhase2 -> Completed
//!                                                       ^      |
//!                                                       +------+ (pause again)
//! any non-terminal state -> Failed
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::control::PauseFlag;
use crate::copy::{copy_batch, BatchOutcome, BatchReport, CopyOptions};
use crate::errors::{BackupError, BackupResult};
use crate::execution::{execute_unit, UnitOptions};
use crate::orchestrator::OrchestrationRun;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::scan::{scan_folder, FilePair};

/// Identifier of a configured source folder (the path as given).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FolderId(String);

impl FolderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn from_path(path: &Path) -> Self {
        Self(path.display().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderState {
    Pending,
    Scanning,
    CopyingPhase1,
    Paused,
    CopyingPhase2,
    Skipped,
    Completed,
    Failed,
}

impl FolderState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FolderState::Skipped | FolderState::Completed | FolderState::Failed
        )
    }

    /// Forward-only lifecycle; `Paused <-> CopyingPhase2` is the only cycle.
    pub fn can_transition_to(self, next: FolderState) -> bool {
        use FolderState::*;
        match (self, next) {
            (Pending, Scanning)
            | (Scanning, Skipped)
            | (Scanning, CopyingPhase1)
            | (Skipped, Completed)
            | (CopyingPhase1, Completed)
            | (CopyingPhase1, Paused)
            | (Paused, CopyingPhase2)
            | (CopyingPhase2, Paused)
            | (CopyingPhase2, Completed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FolderState::Pending => "pending",
            FolderState::Scanning => "scanning",
            FolderState::CopyingPhase1 => "copying",
            FolderState::Paused => "paused",
            FolderState::CopyingPhase2 => "copying (resumed)",
            FolderState::Skipped => "skipped",
            FolderState::Completed => "completed",
            FolderState::Failed => "failed",
        }
    }
}

impl fmt::Display for FolderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position in a folder's pending file list. Everything before `processed`
/// has been attempted; a resumed segment starts exactly at `processed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeCursor {
    total: usize,
    processed: usize,
}

impl ResumeCursor {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            processed: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn remaining(&self) -> usize {
        self.total - self.processed
    }

    pub fn advance(&mut self, by: usize) {
        self.processed = (self.processed + by).min(self.total);
    }
}

/// A source folder and the backup folder it mirrors into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderSpec {
    pub folder: FolderId,
    pub source: PathBuf,
    pub backup: PathBuf,
}

/// Live progress record for one folder. Owned and mutated by its
/// [`FolderMachine`]; the run keeps published snapshots for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderTask {
    pub folder: FolderId,
    pub source: PathBuf,
    pub backup: PathBuf,
    pub state: FolderState,
    pub copied: usize,
    pub cursor: ResumeCursor,
    pub failed_files: usize,
    pub last_error: Option<String>,
}

impl FolderTask {
    pub fn new(spec: FolderSpec) -> Self {
        Self {
            folder: spec.folder,
            source: spec.source,
            backup: spec.backup,
            state: FolderState::Pending,
            copied: 0,
            cursor: ResumeCursor::default(),
            failed_files: 0,
            last_error: None,
        }
    }

    pub fn total(&self) -> usize {
        self.cursor.total()
    }

    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    fn advance_to(&mut self, next: FolderState) -> BackupResult<FolderState> {
        if !self.state.can_transition_to(next) {
            return Err(BackupError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        let from = self.state;
        self.state = next;
        Ok(from)
    }

    fn record_batch(&mut self, report: &BatchReport) {
        self.cursor.advance(report.processed);
        self.copied += report.copied;
        self.failed_files += report.errors.len();
        debug_assert!(self.copied <= self.cursor.total());
    }

    pub fn outcome(&self) -> FolderOutcome {
        FolderOutcome {
            success: matches!(self.state, FolderState::Completed | FolderState::Skipped),
            state: self.state,
            copied: self.copied,
            total: self.total(),
            failed_files: self.failed_files,
            error: self.last_error.clone(),
        }
    }
}

/// Final per-folder entry of a run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderOutcome {
    pub success: bool,
    pub state: FolderState,
    pub copied: usize,
    pub total: usize,
    pub failed_files: usize,
    pub error: Option<String>,
}

/// Drives one folder from `Pending` to a terminal state.
pub struct FolderMachine {
    task: FolderTask,
    pairs: Arc<[FilePair]>,
    run: Arc<OrchestrationRun>,
    events: Arc<dyn ProgressSink>,
}

impl FolderMachine {
    pub fn new(spec: FolderSpec, run: Arc<OrchestrationRun>) -> Self {
        let task = FolderTask::new(spec);
        run.publish(&task);
        let events: Arc<dyn ProgressSink> = run.clone();
        Self {
            task,
            pairs: Arc::from(Vec::new()),
            run,
            events,
        }
    }

    pub fn task(&self) -> &FolderTask {
        &self.task
    }

    /// Run the folder to completion. Errors never escape; they are folded
    /// into the returned outcome.
    pub async fn drive(mut self) -> FolderOutcome {
        if let Err(err) = self.execute().await {
            self.fail(err);
        }
        let outcome = self.task.outcome();
        log::info!(
            "[{}] {}: {}/{} file(s) copied",
            self.task.folder,
            outcome.state,
            outcome.copied,
            outcome.total
        );
        outcome
    }

    async fn execute(&mut self) -> BackupResult<()> {
        self.transition(FolderState::Scanning)?;
        let pairs = self.scan().await?;
        self.events.on_event(&ProgressEvent::ScanComplete {
            folder: self.task.folder.clone(),
            pending: pairs.len(),
        });

        if pairs.is_empty() {
            return self.skip().await;
        }

        self.task.cursor = ResumeCursor::new(pairs.len());
        self.pairs = Arc::from(pairs);
        self.transition(FolderState::CopyingPhase1)?;

        let direct = self.run.is_direct(&self.task.folder);
        let run = Arc::clone(&self.run);
        let options = run.options();
        let mut segment = ("copy", &options.copy);
        loop {
            let report = match self.copy_segment(segment.0, segment.1, direct).await {
                Ok(report) => report,
                Err(err) => {
                    // Keep what the interrupted segment already copied.
                    if let Some(copied) = self.run.copied_so_far(&self.task.folder) {
                        self.task.copied = self.task.copied.max(copied);
                    }
                    return Err(err);
                }
            };
            self.task.record_batch(&report);
            self.run.publish(&self.task);

            match report.outcome {
                BatchOutcome::Done => return self.transition(FolderState::Completed),
                BatchOutcome::Paused => {
                    self.transition(FolderState::Paused)?;
                    log::info!(
                        "[{}] paused with {} of {} file(s) remaining",
                        self.task.folder,
                        self.task.remaining(),
                        self.task.total()
                    );
                    self.run.control().wait_until_resumed().await?;
                    self.transition(FolderState::CopyingPhase2)?;
                    segment = ("resume_copy", &options.resume_copy);
                }
            }
        }
    }

    async fn scan(&self) -> BackupResult<Vec<FilePair>> {
        let source = self.task.source.clone();
        let backup = self.task.backup.clone();
        execute_unit(
            "scan",
            &self.task.folder,
            &self.run.options().scan,
            self.run.control().cancellation_token(),
            &self.events,
            move |_ctx| scan_folder(&source, &backup),
        )
        .await
    }

    async fn skip(&mut self) -> BackupResult<()> {
        self.transition(FolderState::Skipped)?;
        let marker = execute_unit(
            "skip",
            &self.task.folder,
            &self.run.options().skip,
            self.run.control().cancellation_token(),
            &self.events,
            |ctx| {
                ctx.report(ProgressEvent::SkipMarker {
                    folder: ctx.folder().clone(),
                });
                Ok(())
            },
        )
        .await;

        match marker {
            Ok(()) => self.transition(FolderState::Completed),
            Err(err) => {
                // Nothing needed copying, so the folder still succeeded.
                log::warn!("[{}] skip marker failed: {}", self.task.folder, err);
                Ok(())
            }
        }
    }

    async fn copy_segment(
        &self,
        unit: &'static str,
        options: &UnitOptions,
        direct: bool,
    ) -> BackupResult<BatchReport> {
        let pairs = Arc::clone(&self.pairs);
        let start = self.task.cursor.processed();
        let copied_before = self.task.copied;
        let copy_options = CopyOptions {
            preserve_times: self.run.options().preserve_times,
        };
        let pause = (!direct).then(|| self.run.control().pause_flag());

        log::debug!(
            "[{}] {} starting at file {} of {}",
            self.task.folder,
            unit,
            start,
            pairs.len()
        );
        execute_unit(
            unit,
            &self.task.folder,
            options,
            self.run.control().cancellation_token(),
            &self.events,
            move |ctx| {
                let should_pause = || pause.as_ref().is_some_and(PauseFlag::is_set);
                copy_batch(&pairs[start..], copied_before, &copy_options, ctx, &should_pause)
            },
        )
        .await
    }

    fn transition(&mut self, next: FolderState) -> BackupResult<()> {
        let from = self.task.advance_to(next)?;
        log::debug!("[{}] {} -> {}", self.task.folder, from, next);
        self.events.on_event(&ProgressEvent::StateChanged {
            folder: self.task.folder.clone(),
            from,
            to: next,
        });
        self.run.publish(&self.task);
        Ok(())
    }

    fn fail(&mut self, err: BackupError) {
        log::warn!("[{}] failed: {}", self.task.folder, err);
        self.task.last_error = Some(err.to_string());
        if self.task.state.is_terminal() {
            self.run.publish(&self.task);
            return;
        }
        let from = self.task.state;
        self.task.state = FolderState::Failed;
        self.events.on_event(&ProgressEvent::StateChanged {
            folder: self.task.folder.clone(),
            from,
            to: FolderState::Failed,
        });
        self.run.publish(&self.task);
    }
}
