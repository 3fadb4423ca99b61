//! In-process execution substrate for units of work.
//!
//! A unit (scan, copy segment, skip marker) runs on the blocking thread pool
//! with a start-to-close timeout, an optional heartbeat window and a retry
//! policy. Run-wide cancellation reaches the unit through its
//! [`UnitContext`], which the unit polls between files and chunks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::errors::{BackupError, BackupResult, ErrorCategory};
use crate::folder::FolderId;
use crate::progress::{ProgressEvent, ProgressSink};

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub maximum_interval: Duration,
}

impl RetryPolicy {
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let scaled = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        Duration::from_secs_f64(scaled).min(self.maximum_interval)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(100),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Debug)]
pub struct UnitOptions {
    pub start_to_close_timeout: Duration,
    pub heartbeat_timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl UnitOptions {
    pub fn new(start_to_close_timeout: Duration) -> Self {
        Self {
            start_to_close_timeout,
            heartbeat_timeout: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_heartbeat(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }

    pub fn with_attempts(mut self, max_attempts: u32) -> Self {
        self.retry.max_attempts = max_attempts;
        self
    }
}

/// Handle given to a running unit attempt.
pub struct UnitContext {
    unit: &'static str,
    folder: FolderId,
    attempt: u32,
    cancel: CancellationToken,
    last_beat: Arc<Mutex<Instant>>,
    sink: Arc<dyn ProgressSink>,
}

impl UnitContext {
    pub fn unit(&self) -> &'static str {
        self.unit
    }

    pub fn folder(&self) -> &FolderId {
        &self.folder
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Report liveness without publishing an event.
    pub fn heartbeat(&self) {
        *self.last_beat.lock() = Instant::now();
    }

    /// Report liveness and publish `event` to the run's progress sink.
    pub fn report(&self, event: ProgressEvent) {
        self.heartbeat();
        self.sink.on_event(&event);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Return `Cancelled` once the attempt has been cancelled.
    pub fn check_cancelled(&self) -> BackupResult<()> {
        if self.is_cancelled() {
            Err(BackupError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
impl UnitContext {
    pub(crate) fn detached(
        unit: &'static str,
        folder: &str,
        sink: Arc<dyn ProgressSink>,
    ) -> (Self, CancellationToken) {
        let cancel = CancellationToken::new();
        let ctx = UnitContext {
            unit,
            folder: FolderId::new(folder),
            attempt: 1,
            cancel: cancel.clone(),
            last_beat: Arc::new(Mutex::new(Instant::now())),
            sink,
        };
        (ctx, cancel)
    }
}

/// Run `work` until it succeeds, fails permanently, or the retry policy is
/// exhausted. Retryable failures that run out of attempts surface as
/// [`BackupError::UnitFailed`]; fatal failures are returned as-is.
pub async fn execute_unit<T, F>(
    unit: &'static str,
    folder: &FolderId,
    options: &UnitOptions,
    cancel: &CancellationToken,
    sink: &Arc<dyn ProgressSink>,
    work: F,
) -> BackupResult<T>
where
    T: Send + 'static,
    F: Fn(&UnitContext) -> BackupResult<T> + Send + Sync + 'static,
{
    let work = Arc::new(work);
    let max_attempts = options.retry.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }
        attempt += 1;

        let result = run_attempt(
            unit,
            folder,
            attempt,
            options,
            cancel,
            Arc::clone(sink),
            Arc::clone(&work),
        )
        .await;

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if err.should_retry(attempt, max_attempts) {
            log::warn!("[{folder}] {unit} attempt {attempt}/{max_attempts} failed: {err}");
            sink.on_event(&ProgressEvent::UnitRetry {
                folder: folder.clone(),
                unit,
                attempt,
                error: err.to_string(),
            });
            let delay = options.retry.backoff(attempt);
            tokio::select! {
                _ = cancel.cancelled() => return Err(BackupError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            continue;
        }

        if err.category() == ErrorCategory::Retryable {
            return Err(BackupError::UnitFailed {
                unit: unit.to_string(),
                attempts: attempt,
                last_error: Box::new(err),
            });
        }
        return Err(err);
    }
}

async fn run_attempt<T, F>(
    unit: &'static str,
    folder: &FolderId,
    attempt: u32,
    options: &UnitOptions,
    cancel: &CancellationToken,
    sink: Arc<dyn ProgressSink>,
    work: Arc<F>,
) -> BackupResult<T>
where
    T: Send + 'static,
    F: Fn(&UnitContext) -> BackupResult<T> + Send + Sync + 'static,
{
    let attempt_token = cancel.child_token();
    let last_beat = Arc::new(Mutex::new(Instant::now()));
    let ctx = UnitContext {
        unit,
        folder: folder.clone(),
        attempt,
        cancel: attempt_token.clone(),
        last_beat: Arc::clone(&last_beat),
        sink,
    };

    log::debug!("[{folder}] starting {unit} attempt {attempt}");
    let mut handle = tokio::task::spawn_blocking(move || work(&ctx));

    let deadline = tokio::time::sleep(options.start_to_close_timeout);
    tokio::pin!(deadline);

    let heartbeat_timeout = options.heartbeat_timeout;
    let check_every = heartbeat_timeout
        .map(|t| (t / 4).max(Duration::from_millis(10)))
        .unwrap_or(Duration::from_secs(3600));
    let mut watchdog = tokio::time::interval(check_every);

    let interrupted = loop {
        tokio::select! {
            joined = &mut handle => {
                return match joined {
                    Ok(result) => result,
                    Err(join_err) => Err(BackupError::io(
                        format!("unit '{unit}' aborted"),
                        std::io::Error::other(join_err.to_string()),
                    )),
                };
            }
            _ = &mut deadline => {
                break BackupError::UnitTimedOut {
                    unit: unit.to_string(),
                    timeout: options.start_to_close_timeout,
                };
            }
            _ = watchdog.tick(), if heartbeat_timeout.is_some() => {
                if let Some(timeout) = heartbeat_timeout {
                    if last_beat.lock().elapsed() > timeout {
                        break BackupError::HeartbeatTimedOut {
                            unit: unit.to_string(),
                            timeout,
                        };
                    }
                }
            }
            _ = cancel.cancelled() => {
                break BackupError::Cancelled;
            }
        }
    };

    // Let the abandoned attempt observe cancellation and clean up before a
    // retry touches the same files.
    attempt_token.cancel();
    let _ = handle.await;
    Err(interrupted)
}
