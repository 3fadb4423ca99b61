use std::time::Duration;

use crate::execution::UnitOptions;

/// Per-run policy: unit timeouts and retries plus copy behaviour.
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub scan: UnitOptions,
    /// First copy segment of each folder.
    pub copy: UnitOptions,
    /// Copy segments started after a resume.
    pub resume_copy: UnitOptions,
    pub skip: UnitOptions,
    /// `None` waits for activation indefinitely.
    pub activation_timeout: Option<Duration>,
    pub preserve_times: bool,
    pub history: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            scan: UnitOptions::new(Duration::from_secs(5 * 60)).with_attempts(3),
            copy: UnitOptions::new(Duration::from_secs(10 * 60))
                .with_heartbeat(Duration::from_secs(10))
                .with_attempts(3),
            resume_copy: UnitOptions::new(Duration::from_secs(30 * 60))
                .with_heartbeat(Duration::from_secs(10))
                .with_attempts(3),
            skip: UnitOptions::new(Duration::from_secs(60)).with_attempts(1),
            activation_timeout: Some(Duration::from_secs(5 * 60)),
            preserve_times: true,
            history: true,
        }
    }
}
