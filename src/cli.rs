use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Vent - configuration deployment orchestrator for monitoring servers
#[derive(Parser, Debug)]
#[command(name = "vent")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "/etc/vent/vent.toml", global = true)]
    pub config: PathBuf,

    /// Output format for CI
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full pipeline: sync, generate, validate, deploy, restart
    Deploy {
        /// Deploy everything, ignoring revision checks
        #[arg(short, long)]
        force: bool,

        /// Show what would be deployed without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Deploy a specific revision instead of HEAD
        #[arg(short, long)]
        revision: Option<u64>,

        /// Stop after generating the configuration trees
        #[arg(long, conflicts_with = "stop_after_push")]
        stop_after_generation: bool,

        /// Stop after pushing to the servers (skip commit and restart)
        #[arg(long)]
        stop_after_push: bool,

        /// Servers to deploy to (default: all)
        servers: Vec<String>,
    },

    /// Start, stop or restart managed applications
    Apps {
        /// Start the applications
        #[arg(long, conflicts_with_all = ["stop", "restart"])]
        start: bool,

        /// Stop the applications
        #[arg(long, conflicts_with = "restart")]
        stop: bool,

        /// Restart the applications
        #[arg(long)]
        restart: bool,

        /// Applications to act on (default: all)
        apps: Vec<String>,
    },

    /// Revert the last deployment on the given servers
    Undo {
        /// Do not restart applications after reverting
        #[arg(long)]
        no_restart: bool,

        /// Servers to revert (default: all)
        servers: Vec<String>,
    },

    /// Show the revision state of the deployment servers
    Info {
        /// Servers to query (default: all)
        servers: Vec<String>,
    },

    /// Enable or disable a deployment server
    Server {
        /// Server name
        name: String,

        /// Mark the server eligible for ventilation again
        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        /// Exclude the server from ventilation
        #[arg(long)]
        disable: bool,
    },
}
