//! Configuration types and loading for the tally store.
//!
//! The main entry point is [`StoreOptions`], which library callers construct
//! directly and the CLI loads from `tally.yaml` with [`load_options`] /
//! [`save_options`].

mod config;

pub use config::{
    ArtifactStorageConfig, ConfigError, Result, RollupConfig, StoreOptions, UsageCaptureConfig,
    load_options, save_options,
};
