use std::path::PathBuf;

use tokio::sync::mpsc::UnboundedSender;

use crate::folder::{FolderId, FolderState};

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    StateChanged {
        folder: FolderId,
        from: FolderState,
        to: FolderState,
    },
    ScanComplete {
        folder: FolderId,
        pending: usize,
    },
    SkipMarker {
        folder: FolderId,
    },
    FileCopied {
        folder: FolderId,
        copied: usize,
        path: PathBuf,
    },
    FileFailed {
        folder: FolderId,
        path: PathBuf,
        error: String,
    },
    UnitRetry {
        folder: FolderId,
        unit: &'static str,
        attempt: u32,
        error: String,
    },
}

/// Receives progress events synchronously on the thread that emitted them.
///
/// `FileCopied` is delivered before the copy engine evaluates its pause
/// predicate, so a sink may pause the run at an exact file count.
pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

impl ProgressSink for UnboundedSender<ProgressEvent> {
    fn on_event(&self, event: &ProgressEvent) {
        let _ = self.send(event.clone());
    }
}

/// Discards every event.
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn on_event(&self, _event: &ProgressEvent) {}
}
