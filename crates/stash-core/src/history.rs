//! Local run history.
//!
//! Each finished run is summarized as one line of a capped JSONL file under
//! the user's config directory. Disable with `STASH_DISABLE_HISTORY=1`.

use std::collections::VecDeque;
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};

use crate::config::config_dir;
use crate::folder::FolderState;
use crate::orchestrator::RunReport;

const DEFAULT_MAX_BYTES: u64 = 1_000_000;
const DISABLE_ENV: &str = "STASH_DISABLE_HISTORY";
const HISTORY_FILE: &str = "runs.jsonl";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRecord {
    pub folder: String,
    pub success: bool,
    pub state: FolderState,
    pub copied: usize,
    pub total: usize,
    pub failed_files: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub cancelled: bool,
    pub folders: Vec<FolderRecord>,
}

impl RunRecord {
    pub fn from_report(report: &RunReport) -> Self {
        Self {
            run_id: report.run_id.to_string(),
            started_at: report.started_at,
            duration_ms: u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
            cancelled: report.cancelled,
            folders: report
                .outcomes
                .iter()
                .map(|(folder, outcome)| FolderRecord {
                    folder: folder.to_string(),
                    success: outcome.success,
                    state: outcome.state,
                    copied: outcome.copied,
                    total: outcome.total,
                    failed_files: outcome.failed_files,
                    error: outcome.error.clone(),
                })
                .collect(),
        }
    }

    pub fn succeeded(&self) -> bool {
        !self.cancelled && self.folders.iter().all(|f| f.success)
    }

    pub fn copied_files(&self) -> usize {
        self.folders.iter().map(|f| f.copied).sum()
    }
}

/// Append a record to the history file.
///
/// Errors are returned so callers can decide whether to log or ignore them.
pub fn append_run_record(record: &RunRecord) -> Result<()> {
    if history_disabled() {
        return Ok(());
    }

    let path = history_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).wrap_err_with(|| {
            format!("failed to create history directory {}", parent.display())
        })?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .wrap_err_with(|| format!("failed to open history file {}", path.display()))?;

    let line = serde_json::to_string(record).wrap_err("serialize run record")?;
    writeln!(file, "{line}").wrap_err("write run record")?;
    drop(file);

    enforce_size_cap(&path, DEFAULT_MAX_BYTES)?;
    Ok(())
}

/// Most recent `limit` records, oldest first. `0` returns everything.
/// Lines that fail to parse are skipped.
pub fn read_recent_runs(limit: usize) -> Result<Vec<RunRecord>> {
    let path = history_path()?;
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(&path)
        .wrap_err_with(|| format!("failed to open history file {}", path.display()))?;
    let mut records: Vec<RunRecord> = BufReader::new(file)
        .lines()
        .map_while(|line| line.ok())
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(&line).ok())
        .collect();

    if limit > 0 && records.len() > limit {
        records.drain(..records.len() - limit);
    }
    Ok(records)
}

/// Delete the history file. Returns `false` when there was nothing to delete.
pub fn clear_history() -> Result<bool> {
    let path = history_path()?;
    match fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => {
            Err(err).wrap_err_with(|| format!("failed to remove history file {}", path.display()))
        }
    }
}

pub fn history_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(HISTORY_FILE))
}

fn history_disabled() -> bool {
    env::var(DISABLE_ENV)
        .map(|val| val == "1" || val.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Drop the oldest lines until the file fits under `max_bytes`. The newest
/// record is always kept. Rotation is skipped if the file grew while we were
/// reading it; the next append tries again.
fn enforce_size_cap(path: &Path, max_bytes: u64) -> Result<()> {
    let metadata = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    if metadata.len() <= max_bytes {
        return Ok(());
    }
    let observed_len = metadata.len();

    let file = File::open(path)?;
    let mut lines: VecDeque<String> = BufReader::new(file)
        .lines()
        .collect::<std::io::Result<Vec<String>>>()
        .wrap_err("read run history for rotation")?
        .into_iter()
        .filter(|line| !line.trim().is_empty())
        .collect();

    let mut total_size: u64 = lines.iter().map(|l| l.len() as u64 + 1).sum();
    let mut trimmed = false;
    while lines.len() > 1 && total_size > max_bytes {
        if let Some(front) = lines.pop_front() {
            total_size -= front.len() as u64 + 1;
            trimmed = true;
        }
    }
    if !trimmed {
        return Ok(());
    }

    if fs::metadata(path)?.len() > observed_len {
        return Ok(());
    }

    let mut file = OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .wrap_err("truncate run history during rotation")?;
    for line in lines {
        writeln!(file, "{line}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(id: &str) -> RunRecord {
        RunRecord {
            run_id: id.to_string(),
            started_at: Utc::now(),
            duration_ms: 12,
            cancelled: false,
            folders: vec![FolderRecord {
                folder: "/data/docs".into(),
                success: true,
                state: FolderState::Completed,
                copied: 3,
                total: 3,
                failed_files: 0,
                error: None,
            }],
        }
    }

    #[test]
    fn size_cap_keeps_newest_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("runs.jsonl");
        let lines: Vec<String> = (0..20)
            .map(|i| serde_json::to_string(&record(&format!("run-{i}"))).unwrap())
            .collect();
        fs::write(&path, lines.join("\n") + "\n").unwrap();

        let line_len = lines[0].len() as u64 + 1;
        enforce_size_cap(&path, line_len * 5).unwrap();

        let kept: Vec<String> = fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        assert!(kept.len() <= 5);
        assert_eq!(kept.last(), lines.last());
    }

    #[test]
    fn oversized_single_record_is_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("runs.jsonl");
        let line = serde_json::to_string(&record("only")).unwrap();
        fs::write(&path, format!("{line}\n")).unwrap();

        enforce_size_cap(&path, 4).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), line);
    }

    #[test]
    fn record_summaries() {
        let mut rec = record("r");
        assert!(rec.succeeded());
        assert_eq!(rec.copied_files(), 3);
        rec.folders[0].success = false;
        assert!(!rec.succeeded());
    }
}
