mod batch;
mod file_copy;

pub use batch::{copy_batch, BatchOutcome, BatchReport, CopyOptions};
pub use file_copy::{copy_file, PARTIAL_FILE_SUFFIX};
