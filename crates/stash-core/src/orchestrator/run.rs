use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::control::{ActivationConfig, RunControl};
use crate::folder::{FolderId, FolderTask};
use crate::progress::{ProgressEvent, ProgressSink};

use super::RunOptions;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn generate() -> Self {
        Self(format!("file-backup-{}", Uuid::new_v4()))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State shared by every folder machine of one run. Created when the run
/// starts and dropped with it.
pub struct OrchestrationRun {
    id: RunId,
    control: RunControl,
    options: RunOptions,
    sink: Arc<dyn ProgressSink>,
    folders: RwLock<BTreeMap<FolderId, FolderTask>>,
    activation: OnceCell<ActivationConfig>,
    started_at: DateTime<Utc>,
}

impl OrchestrationRun {
    pub fn new(id: RunId, options: RunOptions, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            id,
            control: RunControl::new(),
            options,
            sink,
            folders: RwLock::new(BTreeMap::new()),
            activation: OnceCell::new(),
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &RunId {
        &self.id
    }

    pub fn control(&self) -> &RunControl {
        &self.control
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn sink(&self) -> &Arc<dyn ProgressSink> {
        &self.sink
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    pub(crate) fn set_activation(&self, config: ActivationConfig) {
        let _ = self.activation.set(config);
    }

    pub fn activation(&self) -> Option<&ActivationConfig> {
        self.activation.get()
    }

    pub fn is_direct(&self, folder: &FolderId) -> bool {
        self.activation.get().is_some_and(|c| c.is_direct(folder))
    }

    /// Store the latest snapshot of a folder for status queries.
    pub(crate) fn publish(&self, task: &FolderTask) {
        self.folders.write().insert(task.folder.clone(), task.clone());
    }

    pub fn folder_tasks(&self) -> BTreeMap<FolderId, FolderTask> {
        self.folders.read().clone()
    }

    /// Copied count last seen for `folder`, including files reported by a
    /// segment that has not returned yet.
    pub(crate) fn copied_so_far(&self, folder: &FolderId) -> Option<usize> {
        self.folders.read().get(folder).map(|task| task.copied)
    }
}

/// Folder machines report through the run so status queries see the copied
/// count advance file by file, not only when a segment ends.
impl ProgressSink for OrchestrationRun {
    fn on_event(&self, event: &ProgressEvent) {
        if let ProgressEvent::FileCopied { folder, copied, .. } = event {
            if let Some(task) = self.folders.write().get_mut(folder) {
                task.copied = task.copied.max((*copied).min(task.total()));
            }
        }
        self.sink.on_event(event);
    }
}
