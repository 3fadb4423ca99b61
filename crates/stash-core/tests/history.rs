mod common;

use eyre::Result;
use stash_core::config::{clear_config_dir_override, set_config_dir};
use stash_core::folder::FolderState;
use stash_core::history::{clear_history, history_path, read_recent_runs};
use stash_core::orchestrator::{BackupOrchestrator, RunOptions};
use stash_core::ActivationConfig;

use common::{populate, test_options};

// Single test: the config dir override is process-wide.
#[tokio::test]
async fn finished_runs_are_appended_to_history() -> Result<()> {
    let temp = tempfile::tempdir()?;
    set_config_dir(temp.path().join("config"));

    let source = temp.path().join("docs");
    populate(&source, 3);
    let orchestrator = BackupOrchestrator::new(RunOptions {
        history: true,
        ..test_options()
    });

    let first = orchestrator
        .execute(&[source.clone()], &temp.path().join("backup"), ActivationConfig::default())
        .await?;
    orchestrator
        .execute(&[source.clone()], &temp.path().join("backup"), ActivationConfig::default())
        .await?;

    assert!(history_path()?.starts_with(temp.path()));
    let records = read_recent_runs(0)?;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].run_id, first.run_id.to_string());
    assert_eq!(records[0].copied_files(), 3);
    assert_eq!(records[1].copied_files(), 0);
    assert_eq!(records[1].folders[0].state, FolderState::Completed);
    assert!(records.iter().all(|r| r.succeeded()));

    assert_eq!(read_recent_runs(1)?.len(), 1);
    assert!(clear_history()?);
    assert!(read_recent_runs(0)?.is_empty());
    assert!(!clear_history()?);

    clear_config_dir_override();
    Ok(())
}
