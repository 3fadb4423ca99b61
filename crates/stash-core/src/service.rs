//! In-process registry of backup runs addressed by [`RunId`].
//!
//! Every run is spawned onto the current tokio runtime. Control operations
//! are forwarded to the run's [`RunControl`](crate::control::RunControl).

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eyre::{eyre, Result};
use parking_lot::Mutex;
use tokio::task::{AbortHandle, JoinHandle};

use crate::control::{ActivationConfig, RunControl};
use crate::errors::{BackupError, BackupResult};
use crate::folder::{FolderId, FolderTask};
use crate::orchestrator::{BackupOrchestrator, OrchestrationRun, RunId, RunReport};

struct RunEntry {
    run: Arc<OrchestrationRun>,
    /// Taken by the first `wait`.
    handle: Option<JoinHandle<BackupResult<RunReport>>>,
    abort: AbortHandle,
    terminated: Arc<AtomicBool>,
}

pub struct BackupService {
    orchestrator: Arc<BackupOrchestrator>,
    runs: Mutex<HashMap<RunId, RunEntry>>,
}

impl BackupService {
    pub fn new(orchestrator: BackupOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn a new run. Its folders sit in `Pending` until the run is
    /// activated.
    pub fn start_run(&self, sources: Vec<PathBuf>, backup_root: PathBuf) -> RunId {
        let run = self.orchestrator.prepare();
        let id = run.id().clone();

        let orchestrator = Arc::clone(&self.orchestrator);
        let task_run = Arc::clone(&run);
        let handle =
            tokio::spawn(async move { orchestrator.run(task_run, &sources, &backup_root).await });

        self.runs.lock().insert(
            id.clone(),
            RunEntry {
                run,
                abort: handle.abort_handle(),
                handle: Some(handle),
                terminated: Arc::new(AtomicBool::new(false)),
            },
        );
        log::debug!("registered run {id}");
        id
    }

    fn with_run<R>(&self, id: &RunId, f: impl FnOnce(&RunEntry) -> R) -> Result<R> {
        let runs = self.runs.lock();
        let entry = runs.get(id).ok_or_else(|| eyre!("unknown run {id}"))?;
        Ok(f(entry))
    }

    /// Control handle for the run, usable without going through the registry.
    pub fn control(&self, id: &RunId) -> Result<RunControl> {
        self.with_run(id, |entry| entry.run.control().clone())
    }

    /// Returns `false` if the run had already been activated.
    pub fn activate_run(&self, id: &RunId, config: ActivationConfig) -> Result<bool> {
        self.with_run(id, |entry| entry.run.control().activate(config))
    }

    pub fn pause_run(&self, id: &RunId) -> Result<bool> {
        self.with_run(id, |entry| entry.run.control().pause())
    }

    pub fn resume_run(&self, id: &RunId) -> Result<bool> {
        self.with_run(id, |entry| entry.run.control().resume())
    }

    pub fn is_paused(&self, id: &RunId) -> Result<bool> {
        self.with_run(id, |entry| entry.run.is_paused())
    }

    /// Graceful: in-flight units stop at the next file or chunk and the run
    /// still produces a report.
    pub fn cancel_run(&self, id: &RunId) -> Result<()> {
        self.with_run(id, |entry| entry.run.control().cancel())
    }

    /// Cancel and abort the run's task. [`BackupService::wait`] then reports
    /// [`BackupError::Terminated`], also when it was already waiting.
    /// Returns `false` if the run had already finished.
    pub fn terminate_run(&self, id: &RunId) -> Result<bool> {
        let terminated = self.with_run(id, |entry| {
            if entry.abort.is_finished() {
                return false;
            }
            entry.terminated.store(true, Ordering::SeqCst);
            entry.run.control().cancel();
            entry.abort.abort();
            true
        })?;
        if terminated {
            log::info!("run {id} terminated");
        }
        Ok(terminated)
    }

    pub fn get_status(&self, id: &RunId) -> Result<BTreeMap<FolderId, FolderTask>> {
        self.with_run(id, |entry| entry.run.folder_tasks())
    }

    pub fn is_finished(&self, id: &RunId) -> Result<bool> {
        self.with_run(id, |entry| entry.abort.is_finished())
    }

    pub fn run_ids(&self) -> Vec<RunId> {
        let mut ids: Vec<RunId> = self.runs.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Wait for the run to finish and return its report. A run can be
    /// awaited once; it stays queryable afterwards.
    pub async fn wait(&self, id: &RunId) -> Result<RunReport> {
        let (handle, terminated) = {
            let mut runs = self.runs.lock();
            let entry = runs.get_mut(id).ok_or_else(|| eyre!("unknown run {id}"))?;
            let handle = entry
                .handle
                .take()
                .ok_or_else(|| eyre!("run {id} has already been awaited"))?;
            (handle, Arc::clone(&entry.terminated))
        };

        let joined = handle.await;
        if terminated.load(Ordering::SeqCst) {
            return Err(BackupError::Terminated.into());
        }
        match joined {
            Ok(result) => Ok(result?),
            Err(err) if err.is_cancelled() => Err(BackupError::Terminated.into()),
            Err(err) => Err(eyre!("run {id} panicked: {err}")),
        }
    }

    /// Drop a finished run from the registry.
    pub fn forget(&self, id: &RunId) -> bool {
        self.runs.lock().remove(id).is_some()
    }
}
