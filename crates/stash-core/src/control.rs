//! Control plane for a single run: pause/resume, activation and
//! cancellation.
//!
//! The pause flag and the activation slot are `watch` channels, so every
//! waiter re-checks the predicate whenever the value changes and a value set
//! while nobody is waiting is still observed by the next reader.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::errors::{BackupError, BackupResult};
use crate::folder::FolderId;

/// Late-bound configuration delivered by the activation signal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationConfig {
    /// Folders copied in one segment that ignores pause requests.
    #[serde(default)]
    pub direct_folders: BTreeSet<FolderId>,
}

impl ActivationConfig {
    pub fn with_direct<I>(folders: I) -> Self
    where
        I: IntoIterator<Item = FolderId>,
    {
        Self {
            direct_folders: folders.into_iter().collect(),
        }
    }

    pub fn is_direct(&self, folder: &FolderId) -> bool {
        self.direct_folders.contains(folder)
    }
}

/// Cloneable handle used by operators and folder machines alike.
#[derive(Clone)]
pub struct RunControl {
    paused: Arc<watch::Sender<bool>>,
    activation: Arc<watch::Sender<Option<ActivationConfig>>>,
    cancel: CancellationToken,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        let (activation, _) = watch::channel(None);
        Self {
            paused: Arc::new(paused),
            activation: Arc::new(activation),
            cancel: CancellationToken::new(),
        }
    }

    /// Request a pause. Returns `false` when the run was already paused.
    pub fn pause(&self) -> bool {
        let changed = self.paused.send_if_modified(|paused| {
            if *paused {
                false
            } else {
                *paused = true;
                true
            }
        });
        if changed {
            log::info!("pause requested");
        }
        changed
    }

    /// Clear the pause flag. Returns `false` when the run was not paused.
    pub fn resume(&self) -> bool {
        let changed = self.paused.send_if_modified(|paused| {
            if *paused {
                *paused = false;
                true
            } else {
                false
            }
        });
        if changed {
            log::info!("resume requested");
        }
        changed
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Read-only view of the pause flag for copy loops.
    pub fn pause_flag(&self) -> PauseFlag {
        PauseFlag {
            rx: self.paused.subscribe(),
        }
    }

    /// Suspend until the pause flag clears or the run is cancelled.
    pub async fn wait_until_resumed(&self) -> BackupResult<()> {
        let mut rx = self.paused.subscribe();
        tokio::select! {
            _ = self.cancel.cancelled() => Err(BackupError::Cancelled),
            res = rx.wait_for(|paused| !*paused) => {
                res.map(|_| ()).map_err(|_| BackupError::Cancelled)
            }
        }
    }

    /// Deliver the one-time activation signal. Later deliveries are ignored
    /// and return `false`.
    pub fn activate(&self, config: ActivationConfig) -> bool {
        let accepted = self.activation.send_if_modified(|slot| {
            if slot.is_some() {
                false
            } else {
                *slot = Some(config);
                true
            }
        });
        if accepted {
            log::info!("run activated");
        } else {
            log::debug!("ignoring duplicate activation");
        }
        accepted
    }

    pub fn is_activated(&self) -> bool {
        self.activation.borrow().is_some()
    }

    pub fn activation(&self) -> Option<ActivationConfig> {
        self.activation.borrow().clone()
    }

    /// Suspend until activation arrives, the timeout elapses, or the run is
    /// cancelled.
    pub async fn wait_for_activation(
        &self,
        timeout: Option<Duration>,
    ) -> BackupResult<ActivationConfig> {
        let mut rx = self.activation.subscribe();
        let wait = async {
            rx.wait_for(Option::is_some)
                .await
                .map(|slot| slot.clone().unwrap_or_default())
                .map_err(|_| BackupError::Cancelled)
        };

        let activation = async {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, wait).await {
                    Ok(res) => res,
                    Err(_) => Err(BackupError::ActivationTimeout { waited: limit }),
                },
                None => wait.await,
            }
        };

        tokio::select! {
            _ = self.cancel.cancelled() => Err(BackupError::Cancelled),
            res = activation => res,
        }
    }

    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            log::info!("cancellation requested");
        }
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Non-blocking reader of the shared pause flag.
#[derive(Clone)]
pub struct PauseFlag {
    rx: watch::Receiver<bool>,
}

impl PauseFlag {
    pub fn is_set(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_and_resume_are_idempotent() {
        let control = RunControl::new();
        assert!(!control.is_paused());
        assert!(control.pause());
        assert!(!control.pause());
        assert!(control.is_paused());
        assert!(control.resume());
        assert!(!control.resume());
        assert!(!control.is_paused());
    }

    #[test]
    fn pause_flag_tracks_control() {
        let control = RunControl::new();
        let flag = control.pause_flag();
        assert!(!flag.is_set());
        control.pause();
        assert!(flag.is_set());
        control.resume();
        assert!(!flag.is_set());
    }

    #[test]
    fn second_activation_is_ignored() {
        let control = RunControl::new();
        let first = ActivationConfig::with_direct([FolderId::new("a")]);
        assert!(control.activate(first.clone()));
        assert!(!control.activate(ActivationConfig::default()));
        assert_eq!(control.activation(), Some(first));
    }

    #[tokio::test]
    async fn activation_delivered_before_wait_is_observed() {
        let control = RunControl::new();
        control.activate(ActivationConfig::default());
        let config = control.wait_for_activation(None).await.unwrap();
        assert!(config.direct_folders.is_empty());
    }

    #[tokio::test]
    async fn activation_timeout_is_reported() {
        let control = RunControl::new();
        let err = control
            .wait_for_activation(Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::ActivationTimeout { .. }));
    }

    #[tokio::test]
    async fn resume_releases_waiters() {
        let control = RunControl::new();
        control.pause();

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_until_resumed().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        control.resume();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancel_releases_paused_waiters() {
        let control = RunControl::new();
        control.pause();

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_until_resumed().await })
        };
        control.cancel();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, BackupError::Cancelled));
    }
}
