//! Resumable multi-folder backup runs.
//!
//! A run scans each configured folder for files that are new or newer than
//! their backup copy, then copies them in order. Copying can be paused
//! between files and resumed exactly where it stopped.

pub mod config;
pub mod control;
pub mod copy;
pub mod errors;
pub mod execution;
pub mod folder;
pub mod history;
pub mod orchestrator;
pub mod progress;
pub mod scan;
pub mod service;

pub use control::{ActivationConfig, RunControl};
pub use errors::{BackupError, BackupResult};
pub use folder::{FolderId, FolderOutcome, FolderState, FolderTask};
pub use orchestrator::{BackupOrchestrator, RunId, RunOptions, RunReport};
pub use progress::{NoopSink, ProgressEvent, ProgressSink};
pub use service::BackupService;
