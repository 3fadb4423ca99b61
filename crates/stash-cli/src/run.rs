use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use eyre::{bail, eyre, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use stash_core::config::RunFile;
use stash_core::orchestrator::{BackupOrchestrator, RunOptions, RunReport};
use stash_core::progress::ProgressEvent;
use stash_core::service::BackupService;
use stash_core::{ActivationConfig, FolderId, RunId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cli::RunArgs;

struct RunPlan {
    folders: Vec<PathBuf>,
    backup_root: PathBuf,
    activation: ActivationConfig,
    options: RunOptions,
}

/// Merge the run file with command-line arguments. Arguments win.
fn plan_run(args: &RunArgs) -> Result<RunPlan> {
    let file = match &args.config {
        Some(path) => {
            log::debug!("loading run file {}", path.display());
            RunFile::load(path)?
        }
        None => RunFile::load_default()?.unwrap_or_else(|| {
            log::debug!("no default run file; using built-in settings");
            RunFile::default()
        }),
    };

    let mut options = file.run_options();
    if let Some(secs) = args.activation_timeout {
        options.activation_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    if args.no_preserve_times {
        options.preserve_times = false;
    }
    if args.no_history {
        options.history = false;
    }

    let mut folders = file.folders.clone();
    folders.extend(args.folders.iter().cloned());
    if folders.is_empty() {
        bail!("no folders to back up (pass them as arguments or list them in the run file)");
    }

    let backup_root = args
        .backup_root
        .clone()
        .or_else(|| file.backup_root.clone())
        .ok_or_else(|| {
            eyre!("no backup root given (use --backup-root or set backup_root in the run file)")
        })?;

    let direct = file
        .direct_folders
        .iter()
        .chain(&args.direct)
        .map(|path| FolderId::from_path(path));

    Ok(RunPlan {
        folders,
        backup_root,
        activation: ActivationConfig::with_direct(direct),
        options,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Pause,
    Resume,
    Status,
    Activate,
    Cancel,
    Terminate,
    Quit,
    Help,
}

fn parse_command(line: &str) -> Option<Command> {
    let command = match line.trim().to_ascii_lowercase().as_str() {
        "pause" | "p" => Command::Pause,
        "resume" | "r" => Command::Resume,
        "status" | "s" => Command::Status,
        "activate" | "a" => Command::Activate,
        "cancel" => Command::Cancel,
        "terminate" => Command::Terminate,
        "q" | "quit" => Command::Quit,
        "help" | "?" => Command::Help,
        _ => return None,
    };
    Some(command)
}

/// Prints above the spinner when one is shown.
#[derive(Clone)]
struct Console {
    bar: Option<ProgressBar>,
}

impl Console {
    fn new(progress: bool) -> Self {
        let bar = progress.then(|| {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
                pb.set_style(style.tick_strings(&["-", "\\", "|", "/"]));
            }
            pb.enable_steady_tick(Duration::from_millis(120));
            pb
        });
        Self { bar }
    }

    fn line(&self, msg: impl AsRef<str>) {
        match &self.bar {
            Some(bar) => bar.println(msg.as_ref()),
            None => println!("{}", msg.as_ref()),
        }
    }

    fn status(&self, msg: String) {
        if let Some(bar) = &self.bar {
            bar.set_message(msg);
        }
    }

    fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

fn spawn_progress(
    mut events: mpsc::UnboundedReceiver<ProgressEvent>,
    console: Console,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ProgressEvent::StateChanged { folder, to, .. } => {
                    console.line(format!("{folder}: {to}"));
                }
                ProgressEvent::ScanComplete { folder, pending } => {
                    console.line(format!("{folder}: {pending} file(s) to copy"));
                }
                ProgressEvent::FileCopied { folder, copied, path } => {
                    console.status(format!("{folder}: {copied} copied ({})", path.display()));
                }
                ProgressEvent::FileFailed { path, error, .. } => {
                    console.line(format!("  failed {}: {error}", path.display()));
                }
                ProgressEvent::UnitRetry {
                    folder,
                    unit,
                    attempt,
                    error,
                } => {
                    console.line(format!("{folder}: retrying {unit} after attempt {attempt}: {error}"));
                }
                ProgressEvent::SkipMarker { .. } => {}
            }
        }
    })
}

/// Read stdin on a plain thread; a pending blocking read would otherwise
/// hold up runtime shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    log::warn!("stopped reading commands: {err}");
                    break;
                }
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

pub async fn run_backup(args: &RunArgs) -> Result<()> {
    let plan = plan_run(args)?;
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let service = Arc::new(BackupService::new(
        BackupOrchestrator::new(plan.options).with_sink(Arc::new(events_tx)),
    ));

    let console = Console::new(args.progress);
    let progress = spawn_progress(events_rx, console.clone());

    let id = service.start_run(plan.folders, plan.backup_root);
    console.line(format!("Started run {id}"));
    if args.hold {
        console.line("Type 'activate' to start copying.");
    } else {
        service.activate_run(&id, plan.activation.clone())?;
    }
    console.line("Commands: pause, resume, status, cancel, terminate, q");

    let mut waiter = {
        let service = Arc::clone(&service);
        let id = id.clone();
        tokio::spawn(async move { service.wait(&id).await })
    };
    let mut commands = spawn_stdin_reader();
    let mut reading = true;

    let result = loop {
        tokio::select! {
            joined = &mut waiter => break joined.context("run task panicked")?,
            line = commands.recv(), if reading => {
                let Some(line) = line else {
                    reading = false;
                    continue;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Some(command) => {
                        reading = handle_command(&service, &id, command, &plan.activation, &console)?;
                    }
                    None => {
                        log::debug!("ignoring unknown command {:?}", line.trim());
                        console.line(format!("unknown command '{}' (try 'help')", line.trim()));
                    }
                }
            }
        }
    };

    progress.abort();
    console.finish();

    let report = result?;
    print_report(&report);
    let failed = report.failed_folders().count();
    if failed > 0 {
        bail!("{} of {} folder(s) failed", failed, report.outcomes.len());
    }
    Ok(())
}

/// Returns `false` once the user stops issuing commands.
fn handle_command(
    service: &BackupService,
    id: &RunId,
    command: Command,
    activation: &ActivationConfig,
    console: &Console,
) -> Result<bool> {
    match command {
        Command::Pause => {
            if service.pause_run(id)? {
                console.line("Pausing after the file in progress.");
            } else {
                console.line("Already paused.");
            }
        }
        Command::Resume => {
            if service.resume_run(id)? {
                console.line("Resuming.");
            } else {
                console.line("Not paused.");
            }
        }
        Command::Status => print_status(service, id, console)?,
        Command::Activate => {
            if service.activate_run(id, activation.clone())? {
                console.line("Activated.");
            } else {
                console.line("Already activated.");
            }
        }
        Command::Cancel => {
            service.cancel_run(id)?;
            console.line("Cancelling; folders stop after the current file.");
        }
        Command::Terminate => {
            if !service.terminate_run(id)? {
                console.line("Run already finished.");
            }
        }
        Command::Quit => {
            console.line("No longer reading commands; waiting for the run to finish.");
            return Ok(false);
        }
        Command::Help => {
            console.line("pause      stop copying after the file in progress");
            console.line("resume     continue from where copying stopped");
            console.line("status     show per-folder progress");
            console.line("activate   start a run begun with --hold");
            console.line("cancel     stop all folders and report");
            console.line("terminate  abort the run immediately");
            console.line("q          stop reading commands");
        }
    }
    Ok(true)
}

fn print_status(service: &BackupService, id: &RunId, console: &Console) -> Result<()> {
    let paused = service.is_paused(id)?;
    console.line(format!("Run {id}{}", if paused { " (paused)" } else { "" }));
    for (folder, task) in service.get_status(id)? {
        console.line(format!(
            "  {folder}: {} - {}/{} copied, {} remaining",
            task.state,
            task.copied,
            task.total(),
            task.remaining()
        ));
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!(
        "Run {} finished in {:.2?}{}",
        report.run_id,
        report.duration,
        if report.cancelled { " (cancelled)" } else { "" }
    );
    for (folder, outcome) in &report.outcomes {
        let mark = if outcome.success { "ok" } else { "FAILED" };
        println!(
            "  [{mark}] {folder}: {}/{} file(s) copied",
            outcome.copied, outcome.total
        );
        if outcome.failed_files > 0 {
            println!("         {} file(s) could not be copied", outcome.failed_files);
        }
        if let Some(error) = &outcome.error {
            println!("         {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    use crate::cli::{Cli, Commands};

    fn run_args(argv: &[&str]) -> RunArgs {
        let cli = Cli::parse_from(argv);
        match cli.command {
            Commands::Run(args) => args,
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn commands_are_case_insensitive() {
        assert_eq!(parse_command("PAUSE"), Some(Command::Pause));
        assert_eq!(parse_command(" resume \n"), Some(Command::Resume));
        assert_eq!(parse_command("q"), Some(Command::Quit));
        assert_eq!(parse_command("terminate"), Some(Command::Terminate));
        assert_eq!(parse_command("dance"), None);
    }

    #[test]
    fn arguments_override_run_file() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let file = temp.path().join("run.toml");
        std::fs::write(
            &file,
            "backup_root = \"/from/file\"\nfolders = [\"/data/a\"]\nactivation_timeout_secs = 30\n",
        )?;
        let config = file.to_string_lossy().into_owned();

        let args = run_args(&[
            "stash",
            "run",
            "/data/b",
            "--config",
            &config,
            "--backup-root",
            "/from/cli",
            "--direct",
            "/data/b",
            "--activation-timeout",
            "0",
            "--no-history",
        ]);
        let plan = plan_run(&args)?;

        assert_eq!(plan.folders, [PathBuf::from("/data/a"), PathBuf::from("/data/b")]);
        assert_eq!(plan.backup_root, PathBuf::from("/from/cli"));
        assert!(plan.activation.is_direct(&FolderId::new("/data/b")));
        assert_eq!(plan.options.activation_timeout, None);
        assert!(!plan.options.history);
        Ok(())
    }

    #[test]
    fn missing_backup_root_is_reported() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let file = temp.path().join("run.toml");
        std::fs::write(&file, "folders = [\"/data/a\"]\n")?;
        let config = file.to_string_lossy().into_owned();

        let args = run_args(&["stash", "run", "--config", &config]);
        let err = plan_run(&args).err().ok_or_else(|| eyre!("expected an error"))?;
        assert!(err.to_string().contains("backup root"));
        Ok(())
    }
}
