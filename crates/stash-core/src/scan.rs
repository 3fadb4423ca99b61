//! Diff scanner: decides which source files need a fresh backup copy.
//!
//! A file is pending when its backup counterpart is missing or when the
//! source modification time is strictly newer than the backup's. Contents
//! are never compared.

use std::fs;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use walkdir::WalkDir;

use crate::errors::{BackupError, BackupResult};

/// A source file and the backup path it mirrors to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePair {
    pub source: PathBuf,
    pub backup: PathBuf,
}

/// Walk `source_folder` recursively and return every file whose backup under
/// `backup_folder` is absent or stale, in traversal order.
///
/// Stateless: repeated calls over an unchanged tree yield the same set.
pub fn scan_folder(source_folder: &Path, backup_folder: &Path) -> BackupResult<Vec<FilePair>> {
    match fs::metadata(source_folder) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(BackupError::NotADirectory {
                path: source_folder.to_path_buf(),
            })
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(BackupError::SourceNotFound {
                path: source_folder.to_path_buf(),
            })
        }
        Err(err) => {
            return Err(BackupError::io(
                format!("stat {}", source_folder.display()),
                err,
            ))
        }
    }

    let mut pending = Vec::new();
    for next in WalkDir::new(source_folder).follow_links(false) {
        let entry = match next {
            Ok(e) => e,
            Err(err) => {
                if err.depth() == 0 {
                    let error = err
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("walk failed"));
                    return Err(BackupError::io(
                        format!("walk {}", source_folder.display()),
                        error,
                    ));
                }
                log::debug!("skipping unreadable entry under {}", source_folder.display());
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let source = entry.path();
        let relative = source.strip_prefix(source_folder).unwrap_or(source);
        let backup = backup_folder.join(relative);

        if needs_backup(source, &backup)? {
            pending.push(FilePair {
                source: source.to_path_buf(),
                backup,
            });
        }
    }

    log::debug!(
        "scan of {} found {} pending file(s)",
        source_folder.display(),
        pending.len()
    );
    Ok(pending)
}

/// Check if `source` must be copied over `backup`.
pub fn needs_backup(source: &Path, backup: &Path) -> BackupResult<bool> {
    let backup_meta = match fs::metadata(backup) {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(err) => {
            return Err(BackupError::io(
                format!("stat backup {}", backup.display()),
                err,
            ))
        }
    };
    let source_meta = fs::metadata(source)
        .map_err(|err| BackupError::io(format!("stat source {}", source.display()), err))?;

    let source_time = FileTime::from_last_modification_time(&source_meta);
    let backup_time = FileTime::from_last_modification_time(&backup_meta);
    Ok(source_time > backup_time)
}
