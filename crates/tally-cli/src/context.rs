//! Runtime context resolution for CLI commands.

use std::path::PathBuf;

use anyhow::{Context as _, Result};

use tally::{Store, StoreOptions, load_options};

use crate::cli::GlobalArgs;

/// Default data directory when neither a config file nor --data-dir is given.
const DEFAULT_DATA_DIR: &str = "tally-data";

/// Default config file looked up in the working directory.
pub const CONFIG_FILE: &str = "tally.yaml";

/// Resolved global state shared by command handlers.
pub struct RuntimeContext {
    pub data_dir: PathBuf,
    pub config_path: Option<PathBuf>,
    pub json: bool,
    pub verbose: bool,
}

impl RuntimeContext {
    pub fn from_global_args(global: &GlobalArgs) -> Self {
        let config_path = global
            .config
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| {
                let default = PathBuf::from(CONFIG_FILE);
                default.exists().then_some(default)
            });
        let data_dir = global
            .data_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        Self {
            data_dir,
            config_path,
            json: global.json,
            verbose: global.verbose,
        }
    }

    /// The options the CLI would open the store with.
    pub fn options(&self) -> Result<StoreOptions> {
        match &self.config_path {
            Some(path) => load_options(path)
                .with_context(|| format!("loading config from {}", path.display())),
            None => Ok(StoreOptions::at_dir(&self.data_dir)),
        }
    }

    /// Opens an initialized store. The CLI runs one command and exits, so
    /// the background scheduler stays off.
    pub fn open_store(&self) -> Result<Store> {
        let mut options = self.options()?;
        options.enable_rollup_scheduler = false;
        let mut store = Store::new(options);
        store.initialize().context("initializing store")?;
        Ok(store)
    }
}
