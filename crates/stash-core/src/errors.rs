//! Error taxonomy for backup runs.
//!
//! Errors are categorized so the execution substrate can decide whether a
//! unit of work is worth another attempt:
//! - Retryable: transient failures that may succeed on retry (I/O hiccups, timeouts)
//! - Fatal: permanent failures that will never succeed (missing source folder)
//! - NoRetry: not a failure of the unit itself, but it must not be retried (cancellation)

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::folder::FolderState;

/// Category of a backup error for retry decision-making.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient error - retry may succeed.
    Retryable,
    /// Permanent error - retry will never succeed.
    Fatal,
    /// Not an error of the unit, but the unit should not be retried.
    NoRetry,
}

/// Failures raised by the backup orchestration core.
#[derive(Debug)]
pub enum BackupError {
    /// The configured source folder does not exist. Fatal for that folder only.
    SourceNotFound { path: PathBuf },
    /// The configured source exists but is not a directory. Fatal for that folder only.
    NotADirectory { path: PathBuf },
    /// A single file failed to copy. Swallowed by the batch copy engine.
    CopyIo {
        source: PathBuf,
        backup: PathBuf,
        error: io::Error,
    },
    /// Any other filesystem failure raised while scanning or copying.
    Io { context: String, error: io::Error },
    /// The activation signal never arrived. Fatal for the whole run.
    ActivationTimeout { waited: Duration },
    /// A unit of work exceeded its start-to-close timeout.
    UnitTimedOut { unit: String, timeout: Duration },
    /// A unit of work stopped reporting liveness.
    HeartbeatTimedOut { unit: String, timeout: Duration },
    /// A unit of work exhausted its retry policy.
    UnitFailed {
        unit: String,
        attempts: u32,
        last_error: Box<BackupError>,
    },
    /// The run was cancelled while this work was in flight.
    Cancelled,
    /// The run was terminated and produced no report.
    Terminated,
    /// A folder attempted a lifecycle transition that is not permitted.
    InvalidTransition { from: FolderState, to: FolderState },
}

impl BackupError {
    pub fn io(context: impl Into<String>, error: io::Error) -> Self {
        BackupError::Io {
            context: context.into(),
            error,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            BackupError::SourceNotFound { .. } | BackupError::NotADirectory { .. } => {
                ErrorCategory::Fatal
            }
            BackupError::CopyIo { error, .. } | BackupError::Io { error, .. } => {
                categorize_io_error(error)
            }
            BackupError::UnitTimedOut { .. } | BackupError::HeartbeatTimedOut { .. } => {
                ErrorCategory::Retryable
            }
            BackupError::Cancelled | BackupError::Terminated => ErrorCategory::NoRetry,
            BackupError::ActivationTimeout { .. }
            | BackupError::UnitFailed { .. }
            | BackupError::InvalidTransition { .. } => ErrorCategory::Fatal,
        }
    }

    /// Check if another attempt is allowed after `attempts` have been made.
    pub fn should_retry(&self, attempts: u32, max_attempts: u32) -> bool {
        self.category() == ErrorCategory::Retryable && attempts < max_attempts
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BackupError::Cancelled | BackupError::Terminated)
    }
}

impl std::fmt::Display for BackupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupError::SourceNotFound { path } => {
                write!(f, "source folder '{}' does not exist", path.display())
            }
            BackupError::NotADirectory { path } => {
                write!(f, "source '{}' is not a directory", path.display())
            }
            BackupError::CopyIo {
                source,
                backup,
                error,
            } => write!(
                f,
                "failed to copy {} to {}: {}",
                source.display(),
                backup.display(),
                error
            ),
            BackupError::Io { context, error } => write!(f, "{context}: {error}"),
            BackupError::ActivationTimeout { waited } => {
                write!(f, "activation signal not received within {waited:?}")
            }
            BackupError::UnitTimedOut { unit, timeout } => {
                write!(f, "unit '{unit}' exceeded its {timeout:?} timeout")
            }
            BackupError::HeartbeatTimedOut { unit, timeout } => {
                write!(f, "unit '{unit}' missed its {timeout:?} heartbeat window")
            }
            BackupError::UnitFailed {
                unit,
                attempts,
                last_error,
            } => write!(
                f,
                "unit '{unit}' failed after {attempts} attempt(s): {last_error}"
            ),
            BackupError::Cancelled => write!(f, "cancelled"),
            BackupError::Terminated => write!(f, "terminated"),
            BackupError::InvalidTransition { from, to } => {
                write!(f, "invalid folder transition {from} -> {to}")
            }
        }
    }
}

impl std::error::Error for BackupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BackupError::CopyIo { error, .. } | BackupError::Io { error, .. } => Some(error),
            BackupError::UnitFailed { last_error, .. } => Some(last_error.as_ref()),
            _ => None,
        }
    }
}

/// Categorize an IO error for retry decisions.
pub fn categorize_io_error(err: &io::Error) -> ErrorCategory {
    match err.kind() {
        io::ErrorKind::TimedOut
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => ErrorCategory::Retryable,

        io::ErrorKind::PermissionDenied
        | io::ErrorKind::NotFound
        | io::ErrorKind::InvalidData
        | io::ErrorKind::InvalidInput
        | io::ErrorKind::AlreadyExists => ErrorCategory::Fatal,

        // Unknown errors get another attempt; the retry policy bounds the loop.
        _ => ErrorCategory::Retryable,
    }
}

pub type BackupResult<T> = std::result::Result<T, BackupError>;
