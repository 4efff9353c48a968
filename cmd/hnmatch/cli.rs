use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(name = "hnmatch", about = "Build and query hostname-set snapshots")]
pub struct HnMatchCLI {
    #[arg(
        long = "log.level",
        default_value_t = Level::INFO,
        value_name = "LOG_LEVEL",
        help = "The verbosity level used for logs.",
        long_help = "Possible values: info, debug, trace, warn, error"
    )]
    pub log_level: Level,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build a snapshot from a newline-separated hostname list.
    Build {
        #[arg(value_name = "HOSTNAMES_FILE", env = "HNMATCH_INPUT")]
        input: PathBuf,
        #[arg(
            short,
            long,
            value_name = "SNAPSHOT",
            env = "HNMATCH_OUTPUT",
            default_value = "hostnames.hnt"
        )]
        output: PathBuf,
    },
    /// Match hostnames against a snapshot. Exits non-zero when any misses.
    Query {
        #[arg(value_name = "SNAPSHOT")]
        snapshot: PathBuf,
        #[arg(value_name = "HOSTNAME", required = true)]
        hostnames: Vec<String>,
    },
    /// Print every hostname stored in a snapshot.
    List {
        #[arg(value_name = "SNAPSHOT")]
        snapshot: PathBuf,
    },
    /// Print container statistics as JSON.
    Stats {
        #[arg(value_name = "SNAPSHOT")]
        snapshot: PathBuf,
    },
}
