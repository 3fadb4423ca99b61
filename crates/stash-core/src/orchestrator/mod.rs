//! Fan-out/fan-in over the configured folders of one run.

mod history;
mod options;
mod run;
mod summary;

pub use options::RunOptions;
pub use run::{OrchestrationRun, RunId};
pub use summary::RunReport;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;

use crate::control::ActivationConfig;
use crate::errors::BackupResult;
use crate::folder::{FolderId, FolderMachine, FolderSpec};
use crate::progress::{NoopSink, ProgressSink};

use self::history::record_run_history;

pub struct BackupOrchestrator {
    options: RunOptions,
    sink: Arc<dyn ProgressSink>,
}

impl Default for BackupOrchestrator {
    fn default() -> Self {
        Self::new(RunOptions::default())
    }
}

impl BackupOrchestrator {
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            sink: Arc::new(NoopSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Allocate the shared state for a new run. Control operations can be
    /// issued against it before [`BackupOrchestrator::run`] is called.
    pub fn prepare(&self) -> Arc<OrchestrationRun> {
        Arc::new(OrchestrationRun::new(
            RunId::generate(),
            self.options.clone(),
            Arc::clone(&self.sink),
        ))
    }

    /// Activate and run in one call.
    pub async fn execute(
        &self,
        sources: &[PathBuf],
        backup_root: &Path,
        activation: ActivationConfig,
    ) -> BackupResult<RunReport> {
        let run = self.prepare();
        run.control().activate(activation);
        self.run(run, sources, backup_root).await
    }

    /// Register every folder as `Pending`, wait for activation, then drive all
    /// folders concurrently and collect one outcome per folder.
    ///
    /// A failing folder never affects its siblings. Cancellation after
    /// activation still yields a report, with interrupted folders `Failed`.
    pub async fn run(
        &self,
        run: Arc<OrchestrationRun>,
        sources: &[PathBuf],
        backup_root: &Path,
    ) -> BackupResult<RunReport> {
        let started = Instant::now();
        let specs = plan_folders(sources, backup_root);
        log::info!(
            "run {} started with {} folder(s) into {}",
            run.id(),
            specs.len(),
            backup_root.display()
        );

        let machines: Vec<FolderMachine> = specs
            .into_iter()
            .map(|spec| FolderMachine::new(spec, Arc::clone(&run)))
            .collect();

        let activation = run
            .control()
            .wait_for_activation(run.options().activation_timeout)
            .await
            .inspect_err(|err| log::warn!("run {} not started: {}", run.id(), err))?;
        if !activation.direct_folders.is_empty() {
            log::info!(
                "run {}: {} folder(s) copied without pause checks",
                run.id(),
                activation.direct_folders.len()
            );
        }
        run.set_activation(activation);

        let outcomes = join_all(machines.into_iter().map(|machine| {
            let folder = machine.task().folder.clone();
            async move { (folder, machine.drive().await) }
        }))
        .await;

        let report = RunReport {
            run_id: run.id().clone(),
            started_at: run.started_at(),
            duration: started.elapsed(),
            cancelled: run.control().is_cancelled(),
            outcomes: outcomes.into_iter().collect::<BTreeMap<_, _>>(),
        };
        log::info!(
            "run {} finished: {} of {} folder(s) succeeded, {} file(s) copied",
            report.run_id,
            report.outcomes.values().filter(|o| o.success).count(),
            report.outcomes.len(),
            report.copied_files()
        );
        record_run_history(&report, run.options()).await;
        Ok(report)
    }
}

/// Map each source folder to `backup_root/<folder name>`. Repeated names get
/// a numeric suffix in input order; repeated sources are planned once.
pub fn plan_folders(sources: &[PathBuf], backup_root: &Path) -> Vec<FolderSpec> {
    let mut seen = HashSet::new();
    let mut taken = HashSet::new();
    let mut specs = Vec::with_capacity(sources.len());

    for source in sources {
        let folder = FolderId::from_path(source);
        if !seen.insert(folder.clone()) {
            log::warn!("folder {} listed more than once; ignoring duplicate", folder);
            continue;
        }

        let base = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());
        let mut name = base.clone();
        let mut n = 2;
        while !taken.insert(name.clone()) {
            name = format!("{base}-{n}");
            n += 1;
        }

        specs.push(FolderSpec {
            folder,
            source: source.clone(),
            backup: backup_root.join(name),
        });
    }
    specs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_folder_uses_source_name() {
        let specs = plan_folders(
            &[PathBuf::from("/data/photos"), PathBuf::from("/data/docs")],
            Path::new("/backup"),
        );
        assert_eq!(specs[0].backup, PathBuf::from("/backup/photos"));
        assert_eq!(specs[1].backup, PathBuf::from("/backup/docs"));
        assert_eq!(specs[0].folder, FolderId::new("/data/photos"));
    }

    #[test]
    fn colliding_names_get_suffixes_in_order() {
        let specs = plan_folders(
            &[
                PathBuf::from("/a/docs"),
                PathBuf::from("/b/docs"),
                PathBuf::from("/c/docs-2"),
                PathBuf::from("/d/docs"),
            ],
            Path::new("/backup"),
        );
        let names: Vec<_> = specs
            .iter()
            .map(|s| s.backup.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["docs", "docs-2", "docs-2-2", "docs-3"]);
    }

    #[test]
    fn duplicate_sources_are_planned_once() {
        let specs = plan_folders(
            &[PathBuf::from("/a/docs"), PathBuf::from("/a/docs")],
            Path::new("/backup"),
        );
        assert_eq!(specs.len(), 1);
    }

    #[test]
    fn run_ids_are_prefixed() {
        let id = RunId::generate();
        assert!(id.as_str().starts_with("file-backup-"));
        assert_ne!(id, RunId::generate());
    }
}
