use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use filetime::{set_file_mtime, FileTime};

use crate::errors::{BackupError, BackupResult};
use crate::execution::UnitContext;

/// Suffix for temporary files while a backup copy is in flight.
pub const PARTIAL_FILE_SUFFIX: &str = ".stash.partial";

const CHUNK_SIZE: usize = 1024 * 1024;

/// Guard that ensures temp files are cleaned up on failure.
/// Deletes the temp file on drop unless `commit()` is called.
struct TempFileGuard {
    temp_path: PathBuf,
    committed: bool,
}

impl TempFileGuard {
    fn new(temp_path: PathBuf) -> Self {
        Self {
            temp_path,
            committed: false,
        }
    }

    /// Atomically rename the temp file over the final destination.
    fn commit(mut self, final_path: &Path) -> io::Result<()> {
        // On Windows, rename fails if destination exists, so remove first
        #[cfg(windows)]
        {
            let _ = fs::remove_file(final_path);
        }
        fs::rename(&self.temp_path, final_path)?;
        self.committed = true;
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.temp_path
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

pub(crate) fn temp_path_for(dst: &Path) -> PathBuf {
    let mut temp = dst.as_os_str().to_owned();
    temp.push(PARTIAL_FILE_SUFFIX);
    PathBuf::from(temp)
}

fn copy_error(src: &Path, dst: &Path, error: io::Error) -> BackupError {
    BackupError::CopyIo {
        source: src.to_path_buf(),
        backup: dst.to_path_buf(),
        error,
    }
}

/// Copy `src` over `dst` byte-for-byte, creating parent directories as
/// needed. Contents are staged in a sibling temp file and renamed into place,
/// so an interrupted copy never leaves a partial file at `dst`.
///
/// Heartbeats once per chunk and stops with `Cancelled` as soon as the
/// attempt is cancelled.
pub fn copy_file(
    src: &Path,
    dst: &Path,
    preserve_times: bool,
    ctx: &UnitContext,
) -> BackupResult<u64> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| copy_error(src, dst, e))?;
    }

    let guard = TempFileGuard::new(temp_path_for(dst));
    let bytes = stream_contents(src, guard.path(), ctx).map_err(|err| match err {
        StreamError::Cancelled => BackupError::Cancelled,
        StreamError::Io(e) => copy_error(src, dst, e),
    })?;

    if let Ok(meta) = fs::metadata(src) {
        if preserve_times {
            let mtime = FileTime::from_last_modification_time(&meta);
            if set_file_mtime(guard.path(), mtime).is_err() {
                log::debug!("could not preserve mtime for {}", dst.display());
            }
        }
        if fs::set_permissions(guard.path(), meta.permissions()).is_err() {
            log::debug!("could not preserve permissions for {}", dst.display());
        }
    }

    guard.commit(dst).map_err(|e| copy_error(src, dst, e))?;
    log::trace!("copied {} -> {} ({} bytes)", src.display(), dst.display(), bytes);
    Ok(bytes)
}

enum StreamError {
    Cancelled,
    Io(io::Error),
}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        StreamError::Io(err)
    }
}

fn stream_contents(src: &Path, temp: &Path, ctx: &UnitContext) -> Result<u64, StreamError> {
    let mut reader = File::open(src)?;
    let mut writer = BufWriter::with_capacity(CHUNK_SIZE, File::create(temp)?);
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        if ctx.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        writer.write_all(&buf[..n])?;
        total += n as u64;
        ctx.heartbeat();
    }

    writer.flush()?;
    Ok(total)
}
