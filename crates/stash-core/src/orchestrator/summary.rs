use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::folder::{FolderId, FolderOutcome};

use super::RunId;

/// Aggregated result of a finished run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub cancelled: bool,
    pub outcomes: BTreeMap<FolderId, FolderOutcome>,
}

impl RunReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.values().all(|o| o.success)
    }

    pub fn copied_files(&self) -> usize {
        self.outcomes.values().map(|o| o.copied).sum()
    }

    pub fn failed_folders(&self) -> impl Iterator<Item = (&FolderId, &FolderOutcome)> {
        self.outcomes.iter().filter(|(_, o)| !o.success)
    }
}
