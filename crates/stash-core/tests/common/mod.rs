#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::Mutex;
use stash_core::control::RunControl;
use stash_core::folder::{FolderId, FolderState, FolderTask};
use stash_core::orchestrator::RunOptions;
use stash_core::progress::{ProgressEvent, ProgressSink};
use stash_core::service::BackupService;
use stash_core::RunId;

/// Create `count` small files, a few of them nested.
pub fn populate(dir: &Path, count: usize) -> Vec<PathBuf> {
    fs::create_dir_all(dir).unwrap();
    (0..count)
        .map(|idx| {
            let rel = if idx % 10 == 0 {
                PathBuf::from(format!("nested/file-{idx:03}.txt"))
            } else {
                PathBuf::from(format!("file-{idx:03}.txt"))
            };
            let path = dir.join(&rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, format!("contents of {idx}")).unwrap();
            rel
        })
        .collect()
}

pub fn count_files(dir: &Path) -> usize {
    if !dir.exists() {
        return 0;
    }
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .count()
}

pub fn assert_mirrored(source: &Path, backup: &Path, rels: &[PathBuf]) {
    for rel in rels {
        let expected = fs::read(source.join(rel)).unwrap();
        let actual = fs::read(backup.join(rel))
            .unwrap_or_else(|err| panic!("missing backup of {}: {err}", rel.display()));
        assert_eq!(expected, actual, "contents differ for {}", rel.display());
    }
}

/// Options with short timeouts and history disabled.
pub fn test_options() -> RunOptions {
    let mut options = RunOptions {
        activation_timeout: Some(Duration::from_secs(10)),
        history: false,
        ..RunOptions::default()
    };
    for unit in [
        &mut options.scan,
        &mut options.copy,
        &mut options.resume_copy,
        &mut options.skip,
    ] {
        unit.retry.initial_interval = Duration::from_millis(5);
    }
    options
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Pause,
    Cancel,
}

/// Records every event and can pause or cancel the run once a folder
/// reaches given copied counts.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
    triggers: Vec<(FolderId, usize, Trigger)>,
    control: OnceLock<RunControl>,
}

impl RecordingSink {
    pub fn pausing_at(folder: FolderId, copied: usize) -> Self {
        Self::default().pause_at(&folder, copied)
    }

    pub fn pause_at(mut self, folder: &FolderId, copied: usize) -> Self {
        self.triggers.push((folder.clone(), copied, Trigger::Pause));
        self
    }

    pub fn cancel_at(mut self, folder: &FolderId, copied: usize) -> Self {
        self.triggers.push((folder.clone(), copied, Trigger::Cancel));
        self
    }

    pub fn attach(&self, control: RunControl) {
        let _ = self.control.set(control);
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    pub fn skip_markers(&self, folder: &FolderId) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, ProgressEvent::SkipMarker { folder: f } if f == folder))
            .count()
    }

    /// Running counts reported by `FileCopied` for `folder`, in order.
    pub fn copied_counts(&self, folder: &FolderId) -> Vec<usize> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::FileCopied { folder: f, copied, .. } if f == folder => Some(*copied),
                _ => None,
            })
            .collect()
    }

    pub fn states(&self, folder: &FolderId) -> Vec<FolderState> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::StateChanged { folder: f, to, .. } if f == folder => Some(*to),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn on_event(&self, event: &ProgressEvent) {
        if let ProgressEvent::FileCopied { folder, copied, .. } = event {
            let fired = self
                .triggers
                .iter()
                .filter(|(target, at, _)| target == folder && at == copied);
            for (_, _, trigger) in fired {
                if let Some(control) = self.control.get() {
                    match trigger {
                        Trigger::Pause => {
                            control.pause();
                        }
                        Trigger::Cancel => control.cancel(),
                    }
                }
            }
        }
        self.events.lock().push(event.clone());
    }
}

/// Poll the run's status until `folder` satisfies `ready`.
pub async fn wait_for(
    service: &BackupService,
    run: &RunId,
    folder: &FolderId,
    ready: impl Fn(&FolderTask) -> bool,
) -> FolderTask {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let status = service.get_status(run).unwrap();
        if let Some(task) = status.get(folder) {
            if ready(task) {
                return task.clone();
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "{folder} never reached the expected state: {status:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll the run's status until `folder` reaches `state`.
pub async fn wait_for_state(
    service: &BackupService,
    run: &RunId,
    folder: &FolderId,
    state: FolderState,
) -> FolderTask {
    wait_for(service, run, folder, |task| task.state == state).await
}
