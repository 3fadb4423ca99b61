use crate::cli::ScanArgs;
use eyre::{Context, Result};
use stash_core::orchestrator::plan_folders;
use stash_core::scan::scan_folder;

pub async fn run_scan(args: &ScanArgs) -> Result<()> {
    let specs = plan_folders(&args.folders, &args.backup_root);
    let list = args.list;

    let results = tokio::task::spawn_blocking(move || {
        specs
            .into_iter()
            .map(|spec| {
                let pending = scan_folder(&spec.source, &spec.backup);
                (spec, pending)
            })
            .collect::<Vec<_>>()
    })
    .await
    .context("scan task panicked")?;

    let mut total = 0usize;
    for (spec, pending) in results {
        match pending {
            Ok(pairs) => {
                total += pairs.len();
                println!(
                    "{} -> {}: {} file(s) to copy",
                    spec.source.display(),
                    spec.backup.display(),
                    pairs.len()
                );
                if list {
                    for pair in &pairs {
                        println!("  {}", pair.source.display());
                    }
                }
            }
            Err(err) => println!("{}: {}", spec.source.display(), err),
        }
    }
    println!("Total: {} file(s) pending", total);
    Ok(())
}
