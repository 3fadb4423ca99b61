use crate::errors::{BackupError, BackupResult};
use crate::execution::UnitContext;
use crate::progress::ProgressEvent;
use crate::scan::FilePair;

use super::file_copy::copy_file;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every pair in the batch was processed.
    Done,
    /// The pause flag was observed; unprocessed pairs were left untouched.
    Paused,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub outcome: BatchOutcome,
    /// Pairs attempted, copied or not. The resume cursor advances by this.
    pub processed: usize,
    pub copied: usize,
    pub bytes: u64,
    pub errors: Vec<String>,
}

impl BatchReport {
    fn new() -> Self {
        Self {
            outcome: BatchOutcome::Done,
            processed: 0,
            copied: 0,
            bytes: 0,
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CopyOptions {
    pub preserve_times: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            preserve_times: true,
        }
    }
}

/// Copy `pairs` in order, one file at a time.
///
/// After each file the engine emits a liveness report and then evaluates
/// `should_pause`; a `true` answer stops the batch with
/// [`BatchOutcome::Paused`] unless nothing remains. Per-file failures are
/// logged and skipped; they are never retried within the batch.
/// `copied_before` offsets the running count published in progress events.
pub fn copy_batch(
    pairs: &[FilePair],
    copied_before: usize,
    options: &CopyOptions,
    ctx: &UnitContext,
    should_pause: &dyn Fn() -> bool,
) -> BackupResult<BatchReport> {
    let mut report = BatchReport::new();

    for (idx, pair) in pairs.iter().enumerate() {
        ctx.check_cancelled()?;

        match copy_file(&pair.source, &pair.backup, options.preserve_times, ctx) {
            Ok(bytes) => {
                report.copied += 1;
                report.bytes += bytes;
                ctx.report(ProgressEvent::FileCopied {
                    folder: ctx.folder().clone(),
                    copied: copied_before + report.copied,
                    path: pair.source.clone(),
                });
            }
            Err(BackupError::Cancelled) => return Err(BackupError::Cancelled),
            Err(err) => {
                log::warn!("[{}] {}", ctx.folder(), err);
                ctx.report(ProgressEvent::FileFailed {
                    folder: ctx.folder().clone(),
                    path: pair.source.clone(),
                    error: err.to_string(),
                });
                report.errors.push(err.to_string());
            }
        }
        report.processed += 1;

        let remaining = pairs.len() - (idx + 1);
        if remaining > 0 && should_pause() {
            report.outcome = BatchOutcome::Paused;
            log::info!(
                "[{}] pausing with {} file(s) left in batch",
                ctx.folder(),
                remaining
            );
            return Ok(report);
        }
    }

    Ok(report)
}
