use crate::history::{append_run_record, RunRecord};

use super::{RunOptions, RunReport};

/// Append the finished run to the history file. The append and the size-cap
/// rewrite run on the blocking pool.
pub(super) async fn record_run_history(report: &RunReport, options: &RunOptions) {
    if !options.history {
        return;
    }

    let record = RunRecord::from_report(report);
    match tokio::task::spawn_blocking(move || append_run_record(&record)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => log::warn!("failed to update run history: {err:?}"),
        Err(err) => log::warn!("run history task failed: {err}"),
    }
}
