//! Configuration directory resolution and the TOML run file.

use directories::{BaseDirs, ProjectDirs};
use eyre::{eyre, Result, WrapErr};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::execution::UnitOptions;
use crate::orchestrator::RunOptions;

const CONFIG_DIR_ENV: &str = "STASH_CONFIG_DIR";
const RUN_FILE_NAME: &str = "stash.toml";

static CONFIG_DIR_OVERRIDE: Lazy<RwLock<Option<PathBuf>>> = Lazy::new(|| RwLock::new(None));

/// Override the configuration directory for the current process.
/// Subsequent calls replace the previous override.
pub fn set_config_dir<P: AsRef<Path>>(path: P) {
    *CONFIG_DIR_OVERRIDE.write() = Some(path.as_ref().to_path_buf());
}

pub fn clear_config_dir_override() {
    CONFIG_DIR_OVERRIDE.write().take();
}

pub fn config_dir_override() -> Option<PathBuf> {
    CONFIG_DIR_OVERRIDE.read().clone()
}

/// Resolve the configuration directory.
/// Priority: explicit override -> `STASH_CONFIG_DIR` -> platform standard -> ~/.config/stash
pub fn config_dir() -> Result<PathBuf> {
    if let Some(path) = CONFIG_DIR_OVERRIDE.read().clone() {
        return Ok(path);
    }

    if let Some(path) = std::env::var_os(CONFIG_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(path));
    }

    if let Some(proj) = ProjectDirs::from("com", "Stash", "stash") {
        return Ok(proj.config_dir().to_path_buf());
    }

    if let Some(base) = BaseDirs::new() {
        return Ok(base.home_dir().join(".config").join("stash"));
    }

    Err(eyre!(
        "unable to determine configuration directory for stash (no override and no platform default)"
    ))
}

/// Per-unit overrides. Missing keys keep the built-in default.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct UnitSection {
    pub timeout_secs: Option<u64>,
    pub heartbeat_timeout_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
}

impl UnitSection {
    fn apply(&self, options: &mut UnitOptions) {
        if let Some(secs) = self.timeout_secs {
            options.start_to_close_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.heartbeat_timeout_secs {
            // 0 disables the heartbeat watchdog
            options.heartbeat_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(attempts) = self.max_attempts {
            options.retry.max_attempts = attempts.max(1);
        }
        if let Some(ms) = self.initial_backoff_ms {
            options.retry.initial_interval = Duration::from_millis(ms);
        }
    }
}

/// Contents of a `stash.toml` run file.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RunFile {
    pub backup_root: Option<PathBuf>,
    #[serde(default)]
    pub folders: Vec<PathBuf>,
    #[serde(default)]
    pub direct_folders: Vec<PathBuf>,
    /// 0 waits for activation indefinitely.
    pub activation_timeout_secs: Option<u64>,
    pub preserve_times: Option<bool>,
    pub history: Option<bool>,
    #[serde(default)]
    pub scan: UnitSection,
    #[serde(default)]
    pub copy: UnitSection,
    #[serde(default)]
    pub resume_copy: UnitSection,
    #[serde(default)]
    pub skip: UnitSection,
}

impl RunFile {
    pub fn default_path() -> Result<PathBuf> {
        Ok(config_dir()?.join(RUN_FILE_NAME))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading run file {}", path.display()))?;
        Self::parse(&contents).wrap_err_with(|| format!("parsing run file {}", path.display()))
    }

    /// Load the default run file if it exists.
    pub fn load_default() -> Result<Option<Self>> {
        let path = Self::default_path()?;
        if !path.exists() {
            return Ok(None);
        }
        Self::load(&path).map(Some)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Built-in defaults with this file's overrides applied.
    pub fn run_options(&self) -> RunOptions {
        let mut options = RunOptions::default();
        self.scan.apply(&mut options.scan);
        self.copy.apply(&mut options.copy);
        self.resume_copy.apply(&mut options.resume_copy);
        self.skip.apply(&mut options.skip);
        if let Some(secs) = self.activation_timeout_secs {
            options.activation_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(preserve) = self.preserve_times {
            options.preserve_times = preserve;
        }
        if let Some(history) = self.history {
            options.history = history;
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_keeps_defaults() {
        let file = RunFile::parse("").unwrap();
        let options = file.run_options();
        let defaults = RunOptions::default();
        assert_eq!(options.scan.start_to_close_timeout, defaults.scan.start_to_close_timeout);
        assert_eq!(options.activation_timeout, defaults.activation_timeout);
        assert!(options.preserve_times);
        assert!(file.folders.is_empty());
    }

    #[test]
    fn sections_override_unit_settings() {
        let file = RunFile::parse(
            r#"
backup_root = "/mnt/backup"
folders = ["/home/me/docs", "/home/me/photos"]
direct_folders = ["/home/me/photos"]
activation_timeout_secs = 0
preserve_times = false

[copy]
timeout_secs = 60
heartbeat_timeout_secs = 0
max_attempts = 5

[skip]
initial_backoff_ms = 250
"#,
        )
        .unwrap();

        assert_eq!(file.backup_root, Some(PathBuf::from("/mnt/backup")));
        assert_eq!(file.folders.len(), 2);
        assert_eq!(file.direct_folders, vec![PathBuf::from("/home/me/photos")]);

        let options = file.run_options();
        assert_eq!(options.activation_timeout, None);
        assert!(!options.preserve_times);
        assert_eq!(options.copy.start_to_close_timeout, Duration::from_secs(60));
        assert_eq!(options.copy.heartbeat_timeout, None);
        assert_eq!(options.copy.retry.max_attempts, 5);
        assert_eq!(options.skip.retry.initial_interval, Duration::from_millis(250));
        assert_eq!(
            options.resume_copy.start_to_close_timeout,
            RunOptions::default().resume_copy.start_to_close_timeout
        );
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(RunFile::parse("folders = 3").is_err());
    }
}
