//! Store configuration structs and YAML load/save.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read or written.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file contained invalid YAML.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A configuration value was invalid.
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue {
        /// The configuration key that had an invalid value.
        key: String,
        /// Why the value is invalid.
        reason: String,
    },
}

/// A specialized `Result` type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Usage-capture tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageCaptureConfig {
    /// Flush interval for the deferred stat writer, in minutes.
    #[serde(default = "default_rollup_interval_minutes")]
    pub rollup_interval_minutes: u64,

    /// Pending captures flushed per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Whether cost is computed and written back on terminal jobs.
    #[serde(default = "default_true")]
    pub enable_cost_calculation: bool,

    /// Days of usage_stats rows kept by retention pruning.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for UsageCaptureConfig {
    fn default() -> Self {
        Self {
            rollup_interval_minutes: default_rollup_interval_minutes(),
            batch_size: default_batch_size(),
            enable_cost_calculation: true,
            retention_days: default_retention_days(),
        }
    }
}

/// Rollup scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollupConfig {
    /// Local hour of day at which the scheduler fires (0-23).
    #[serde(default = "default_rollup_hour")]
    pub rollup_hour_local: u32,

    /// Whether weekly rollups run after a completed Sun-Sat week.
    #[serde(default = "default_true")]
    pub enable_weekly_rollups: bool,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            rollup_hour_local: default_rollup_hour(),
            enable_weekly_rollups: true,
        }
    }
}

/// Artifact blob-store tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactStorageConfig {
    /// Largest accepted artifact, in MiB.
    #[serde(default = "default_max_artifact_size_mb")]
    pub max_artifact_size_mb: u64,

    /// Age at which retention cleanup soft-deletes artifacts.
    #[serde(default = "default_retention_days")]
    pub default_retention_days: u32,

    /// Whether the scheduler runs artifact retention cleanup at all.
    #[serde(default = "default_true")]
    pub cleanup_enabled: bool,

    /// Second-pass hard deletion of soft-deleted artifacts older than
    /// twice the retention window. Off by default.
    #[serde(default)]
    pub hard_delete_enabled: bool,

    /// Number of hash-prefix directory levels under the storage root.
    #[serde(default = "default_hash_prefix")]
    pub hash_prefix_depth: u8,

    /// Hex characters per prefix level.
    #[serde(default = "default_hash_prefix")]
    pub hash_prefix_width: u8,
}

impl Default for ArtifactStorageConfig {
    fn default() -> Self {
        Self {
            max_artifact_size_mb: default_max_artifact_size_mb(),
            default_retention_days: default_retention_days(),
            cleanup_enabled: true,
            hard_delete_enabled: false,
            hash_prefix_depth: default_hash_prefix(),
            hash_prefix_width: default_hash_prefix(),
        }
    }
}

// ---------------------------------------------------------------------------
// StoreOptions
// ---------------------------------------------------------------------------

/// Top-level configuration for a [`Store`](../tally) instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreOptions {
    /// Path to the SQLite database file. The parent directory is created.
    pub database_path: PathBuf,

    /// Root of the content-addressed artifact store. Created if missing.
    pub artifact_storage_path: PathBuf,

    #[serde(default = "default_true")]
    pub enable_usage_tracking: bool,

    #[serde(default = "default_true")]
    pub enable_rollup_scheduler: bool,

    #[serde(default = "default_true")]
    pub enable_artifact_storage: bool,

    #[serde(default = "default_true")]
    pub enable_validation: bool,

    #[serde(default = "default_true")]
    pub enable_events: bool,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default)]
    pub usage_capture: UsageCaptureConfig,

    #[serde(default)]
    pub rollup: RollupConfig,

    #[serde(default)]
    pub artifact_storage: ArtifactStorageConfig,
}

impl StoreOptions {
    /// Options rooted at a single data directory: `<dir>/tally.db` plus
    /// `<dir>/artifacts/`.
    pub fn at_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            database_path: dir.join("tally.db"),
            artifact_storage_path: dir.join("artifacts"),
            enable_usage_tracking: true,
            enable_rollup_scheduler: true,
            enable_artifact_storage: true,
            enable_validation: true,
            enable_events: true,
            busy_timeout_ms: default_busy_timeout_ms(),
            usage_capture: UsageCaptureConfig::default(),
            rollup: RollupConfig::default(),
            artifact_storage: ArtifactStorageConfig::default(),
        }
    }

    /// Checks cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.rollup.rollup_hour_local > 23 {
            return Err(ConfigError::InvalidValue {
                key: "rollup.rollup_hour_local".into(),
                reason: format!("must be 0-23, got {}", self.rollup.rollup_hour_local),
            });
        }
        if self.artifact_storage.hash_prefix_depth == 0
            || self.artifact_storage.hash_prefix_width == 0
        {
            return Err(ConfigError::InvalidValue {
                key: "artifact_storage.hash_prefix_depth".into(),
                reason: "prefix depth and width must be >= 1".into(),
            });
        }
        let prefix_chars = self.artifact_storage.hash_prefix_depth as usize
            * self.artifact_storage.hash_prefix_width as usize;
        if prefix_chars >= 64 {
            return Err(ConfigError::InvalidValue {
                key: "artifact_storage.hash_prefix_width".into(),
                reason: "prefix consumes the entire hash".into(),
            });
        }
        if self.usage_capture.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "usage_capture.batch_size".into(),
                reason: "must be >= 1".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Loads options from a YAML file.
pub fn load_options(path: impl AsRef<Path>) -> Result<StoreOptions> {
    let text = std::fs::read_to_string(path)?;
    let options: StoreOptions = serde_yaml::from_str(&text)?;
    options.validate()?;
    Ok(options)
}

/// Saves options to a YAML file.
pub fn save_options(path: impl AsRef<Path>, options: &StoreOptions) -> Result<()> {
    let text = serde_yaml::to_string(options)?;
    std::fs::write(path, text)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_rollup_interval_minutes() -> u64 {
    5
}

fn default_batch_size() -> usize {
    100
}

fn default_retention_days() -> u32 {
    90
}

fn default_rollup_hour() -> u32 {
    2
}

fn default_max_artifact_size_mb() -> u64 {
    100
}

fn default_hash_prefix() -> u8 {
    2
}

fn default_busy_timeout_ms() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn at_dir_layout() {
        let opts = StoreOptions::at_dir("/data/tally");
        assert_eq!(opts.database_path, PathBuf::from("/data/tally/tally.db"));
        assert_eq!(
            opts.artifact_storage_path,
            PathBuf::from("/data/tally/artifacts")
        );
        assert!(opts.enable_events);
        assert_eq!(opts.busy_timeout_ms, 30_000);
    }

    #[test]
    fn minimal_yaml_uses_defaults() {
        let yaml = "database_path: /tmp/t.db\nartifact_storage_path: /tmp/blobs\n";
        let opts: StoreOptions = serde_yaml::from_str(yaml).unwrap();
        assert!(opts.enable_usage_tracking);
        assert_eq!(opts.rollup.rollup_hour_local, 2);
        assert_eq!(opts.artifact_storage.hash_prefix_depth, 2);
        assert_eq!(opts.usage_capture.batch_size, 100);
        assert!(!opts.artifact_storage.hard_delete_enabled);
    }

    #[test]
    fn invalid_rollup_hour_rejected() {
        let mut opts = StoreOptions::at_dir("/tmp/x");
        opts.rollup.rollup_hour_local = 24;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.yaml");
        let mut opts = StoreOptions::at_dir(dir.path());
        opts.artifact_storage.max_artifact_size_mb = 25;
        save_options(&path, &opts).unwrap();
        let loaded = load_options(&path).unwrap();
        assert_eq!(loaded.artifact_storage.max_artifact_size_mb, 25);
        assert_eq!(loaded.database_path, opts.database_path);
    }
}
