//! `tally init` -- create the data directory and config file.

use anyhow::{Result, bail};

use tally::{Store, StoreOptions, save_options};

use crate::cli::InitArgs;
use crate::context::{CONFIG_FILE, RuntimeContext};

pub fn run(ctx: &RuntimeContext, args: &InitArgs) -> Result<()> {
    let config_path = ctx
        .config_path
        .clone()
        .unwrap_or_else(|| CONFIG_FILE.into());
    if config_path.exists() && !args.force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    let options = StoreOptions::at_dir(&ctx.data_dir);
    save_options(&config_path, &options)?;

    // Open once so the database, schema, and blob directory exist.
    let mut store = Store::new(options);
    store.initialize()?;
    store.close()?;

    if ctx.json {
        println!(
            "{}",
            serde_json::json!({
                "config": config_path,
                "data_dir": ctx.data_dir,
            })
        );
    } else {
        println!("initialized tally store in {}", ctx.data_dir.display());
        println!("config written to {}", config_path.display());
    }
    Ok(())
}
