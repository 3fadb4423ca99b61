mod cli;
mod history;
mod run;
mod scan;

use clap::Parser;
use eyre::Result;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(dir) = &cli.config_dir {
        stash_core::config::set_config_dir(dir);
        log::debug!("using configuration directory {}", dir.display());
    }

    match &cli.command {
        Commands::Run(args) => run::run_backup(args).await?,
        Commands::Scan(args) => scan::run_scan(args).await?,
        Commands::History(args) => history::run_history(args)?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_target(false)
        .init();
}
