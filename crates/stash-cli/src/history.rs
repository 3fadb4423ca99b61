use crate::cli::HistoryArgs;
use eyre::Result;
use stash_core::history;

pub fn run_history(args: &HistoryArgs) -> Result<()> {
    if args.clear {
        match history::clear_history()? {
            true => println!("Cleared run history."),
            false => println!("No run history to clear."),
        }
        return Ok(());
    }

    let records = history::read_recent_runs(args.limit)?;
    println!("History file: {}", history::history_path()?.display());
    if records.is_empty() {
        println!("No runs recorded yet.");
        return Ok(());
    }

    for record in &records {
        let status = if record.cancelled {
            "cancelled"
        } else if record.succeeded() {
            "ok"
        } else {
            "failed"
        };
        println!(
            "{}  {}  {:>9}  {} folder(s), {} file(s) copied in {:.1}s",
            record.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            record.run_id,
            status,
            record.folders.len(),
            record.copied_files(),
            record.duration_ms as f64 / 1000.0
        );
        for folder in record.folders.iter().filter(|f| !f.success) {
            println!(
                "    {} [{}] {}",
                folder.folder,
                folder.state,
                folder.error.as_deref().unwrap_or("")
            );
        }
    }
    Ok(())
}
