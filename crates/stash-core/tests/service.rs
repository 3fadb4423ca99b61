mod common;

use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use stash_core::folder::{FolderId, FolderState};
use stash_core::orchestrator::BackupOrchestrator;
use stash_core::service::BackupService;
use stash_core::{ActivationConfig, BackupError, RunId};

use common::{populate, test_options, wait_for_state, RecordingSink};

fn service() -> BackupService {
    BackupService::new(BackupOrchestrator::new(test_options()))
}

#[tokio::test]
async fn folders_stay_pending_until_activated() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let source = temp.path().join("docs");
    populate(&source, 4);
    let folder = FolderId::from_path(&source);

    let service = service();
    let run = service.start_run(vec![source.clone()], temp.path().join("backup"));

    tokio::time::sleep(Duration::from_millis(30)).await;
    let status = service.get_status(&run)?;
    assert_eq!(status[&folder].state, FolderState::Pending);
    assert!(!service.is_finished(&run)?);

    assert!(service.activate_run(&run, ActivationConfig::default())?);
    assert!(!service.activate_run(&run, ActivationConfig::default())?);
    let report = service.wait(&run).await?;
    assert_eq!(report.outcomes[&folder].copied, 4);
    Ok(())
}

#[tokio::test]
async fn is_paused_follows_signals() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let service = service();
    let run = service.start_run(Vec::new(), temp.path().join("backup"));

    assert!(!service.is_paused(&run)?);
    assert!(service.pause_run(&run)?);
    assert!(!service.pause_run(&run)?);
    assert!(service.is_paused(&run)?);
    assert!(service.resume_run(&run)?);
    assert!(!service.is_paused(&run)?);
    assert!(!service.resume_run(&run)?);

    service.activate_run(&run, ActivationConfig::default())?;
    let report = service.wait(&run).await?;
    assert!(report.outcomes.is_empty());
    Ok(())
}

#[tokio::test]
async fn status_is_queryable_after_completion() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let source = temp.path().join("docs");
    populate(&source, 6);
    let folder = FolderId::from_path(&source);

    let service = service();
    let run = service.start_run(vec![source], temp.path().join("backup"));
    service.activate_run(&run, ActivationConfig::default())?;

    let task = wait_for_state(&service, &run, &folder, FolderState::Completed).await;
    assert_eq!(task.copied, 6);
    assert_eq!(task.remaining(), 0);

    service.wait(&run).await?;
    assert_eq!(service.get_status(&run)?[&folder].state, FolderState::Completed);
    assert!(service.wait(&run).await.is_err());
    Ok(())
}

#[tokio::test]
async fn terminate_aborts_the_run() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let source = temp.path().join("docs");
    populate(&source, 3);

    let service = service();
    let run = service.start_run(vec![source], temp.path().join("backup"));
    assert!(service.terminate_run(&run)?);

    let err = service.wait(&run).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<BackupError>(), Some(BackupError::Terminated)));
    assert!(service.is_finished(&run)?);
    assert!(!service.terminate_run(&run)?);
    Ok(())
}

#[tokio::test]
async fn terminate_reaches_a_run_someone_is_waiting_on() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let source = temp.path().join("docs");
    populate(&source, 40);
    let folder = FolderId::from_path(&source);

    let sink = Arc::new(RecordingSink::pausing_at(folder.clone(), 10));
    let service = Arc::new(BackupService::new(
        BackupOrchestrator::new(test_options()).with_sink(sink.clone()),
    ));
    let run = service.start_run(vec![source], temp.path().join("backup"));
    sink.attach(service.control(&run)?);

    let waiter = {
        let service = Arc::clone(&service);
        let run = run.clone();
        tokio::spawn(async move { service.wait(&run).await })
    };
    service.activate_run(&run, ActivationConfig::default())?;
    wait_for_state(&service, &run, &folder, FolderState::Paused).await;
    assert!(!service.is_finished(&run)?);

    assert!(service.terminate_run(&run)?);
    let err = tokio::time::timeout(Duration::from_secs(10), waiter)
        .await??
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<BackupError>(), Some(BackupError::Terminated)));
    assert!(service.is_finished(&run)?);
    Ok(())
}

#[tokio::test]
async fn unknown_runs_are_rejected() {
    let service = service();
    let ghost = RunId::new("file-backup-ghost");
    assert!(service.pause_run(&ghost).is_err());
    assert!(service.get_status(&ghost).is_err());
    assert!(!service.forget(&ghost));
}
