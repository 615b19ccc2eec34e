use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tablerepl::MAX_CHANGESETS_ENV;

#[derive(Parser, Debug)]
#[command(name = "tablerepl")]
#[command(about = "Apply replication changesets to a replica's table files", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply one changeset to a replica directory
    Apply(ApplyArgs),

    /// Exit successfully if REVISION has reached TARGET
    Check {
        /// Revision the replica is at
        revision: u64,

        /// Revision it needs to reach
        target: u64,
    },
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Replica database directory
    pub db_dir: PathBuf,

    /// Read the changeset from a file instead of stdin
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Replica's current revision; enables the start-revision check
    #[arg(long)]
    pub trusted_revision: Option<u64>,

    /// Seconds allowed for the whole changeset to arrive
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// Number of raw changesets to keep (0 disables archival)
    #[arg(long, env = MAX_CHANGESETS_ENV, allow_negative_numbers = true)]
    pub max_changesets: Option<i64>,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
