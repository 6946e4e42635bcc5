//! Clap CLI definitions for the `tally` command.

use clap::{Args, Parser, Subcommand};

/// tally -- local job-accounting and artifact store.
///
/// Records AI jobs with their artifacts, events, and token-level cost
/// accounting in an embedded database.
#[derive(Parser, Debug)]
#[command(
    name = "tally",
    about = "Job-accounting and artifact store",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Global flags available to all subcommands.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Data directory (default: ./tally-data, or the config file's paths).
    #[arg(long, global = true, env = "TALLY_DATA_DIR")]
    pub data_dir: Option<String>,

    /// Config file path (default: ./tally.yaml when present).
    #[arg(long, global = true, env = "TALLY_CONFIG")]
    pub config: Option<String>,

    /// Output in JSON format.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose/debug output.
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

/// All available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a data directory and write a config file.
    Init(InitArgs),

    /// List jobs.
    List(ListArgs),

    /// Show one job with its timeline and artifacts.
    #[command(alias = "view")]
    Show(ShowArgs),

    /// Full-text search across jobs.
    Search(SearchArgs),

    /// Show job and artifact statistics.
    Stats,

    /// Check store health.
    Health,

    /// Export every table as JSON or CSV.
    Export(ExportArgs),

    /// Verify artifact integrity against recorded hashes.
    Verify,

    /// Manually run the daily (or weekly) usage rollup.
    Rollup(RollupArgs),

    /// Database maintenance (vacuum, analyze, integrity, backup).
    #[command(subcommand)]
    Maintenance(MaintenanceArgs),
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing config file.
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Filter by status (pending|running|completed|failed|cancelled).
    #[arg(short, long)]
    pub status: Option<String>,

    /// Filter by job type (chat|vision|capture|automation|image_generation).
    #[arg(short = 't', long = "type")]
    pub job_type: Option<String>,

    /// Filter by provider.
    #[arg(long)]
    pub provider: Option<String>,

    /// Maximum jobs per page.
    #[arg(short, long, default_value_t = 50)]
    pub limit: i64,

    /// Continue from a previous page's cursor.
    #[arg(long)]
    pub cursor: Option<String>,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Job id.
    pub id: String,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Text to search for in titles, descriptions, and error messages.
    pub query: String,

    /// Maximum results.
    #[arg(short, long, default_value_t = 20)]
    pub limit: i64,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Output format.
    #[arg(short, long, default_value = "json")]
    pub format: String,

    /// Write to a file instead of stdout.
    #[arg(short, long)]
    pub output: Option<String>,
}

#[derive(Args, Debug)]
pub struct RollupArgs {
    /// Roll up this date (YYYY-MM-DD; default: yesterday).
    #[arg(long)]
    pub date: Option<String>,

    /// Run the weekly rollup instead (optionally from --week-start).
    #[arg(long)]
    pub weekly: bool,

    /// Week start date for --weekly (a Sunday).
    #[arg(long)]
    pub week_start: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum MaintenanceArgs {
    /// Reclaim free pages and defragment the database file.
    Vacuum,

    /// Refresh query-planner statistics.
    Analyze,

    /// Run the database integrity check.
    Integrity,

    /// Copy the live database to a backup file.
    Backup {
        /// Destination path.
        dest: String,
    },
}
