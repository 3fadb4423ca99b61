use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stash")]
#[command(about = "Resumable multi-folder backups you can pause and pick up later")]
#[command(after_help = "Run '<command> --help' for detailed options on each command.")]
pub struct Cli {
    /// Override the configuration directory for this invocation
    #[arg(long, global = true, value_name = "PATH")]
    pub config_dir: Option<PathBuf>,
    /// Log debug output (RUST_LOG takes precedence)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Back up folders, accepting pause/resume/status commands on stdin
    Run(RunArgs),
    /// Show which files a run would copy without copying anything
    Scan(ScanArgs),
    /// Show recently finished runs
    History(HistoryArgs),
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Source folders to back up (added to those in the run file)
    pub folders: Vec<PathBuf>,
    /// Directory that receives one backup folder per source folder
    #[arg(long, short = 'b', value_name = "PATH")]
    pub backup_root: Option<PathBuf>,
    /// Copy this folder in one pass, ignoring pause requests (repeatable)
    #[arg(long = "direct", value_name = "FOLDER")]
    pub direct: Vec<PathBuf>,
    /// Run file to load instead of <config dir>/stash.toml
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Seconds to wait for activation (0 = forever)
    #[arg(long, value_name = "SECS")]
    pub activation_timeout: Option<u64>,
    /// Do not activate automatically; type 'activate' to start copying
    #[arg(long)]
    pub hold: bool,
    /// Leave backup modification times at the time of copy
    #[arg(long)]
    pub no_preserve_times: bool,
    /// Do not record this run in the local history
    #[arg(long)]
    pub no_history: bool,
    /// Show an interactive progress indicator
    #[arg(long, short = 'p')]
    pub progress: bool,
}

#[derive(Args, Clone, Debug)]
pub struct ScanArgs {
    /// Source folders to inspect
    #[arg(required = true)]
    pub folders: Vec<PathBuf>,
    /// Directory the backups live in
    #[arg(long, short = 'b', value_name = "PATH")]
    pub backup_root: PathBuf,
    /// List every pending file instead of only the counts
    #[arg(long, short = 'l')]
    pub list: bool,
}

#[derive(Args, Clone, Debug)]
pub struct HistoryArgs {
    /// Number of recent runs to display (0 = all)
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
    /// Remove the stored history file
    #[arg(long)]
    pub clear: bool,
}
