use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod commands;
mod config;

use anyhow::Result;

/// CLI for the dotlink class prelinking engine
#[derive(Parser, Debug)]
#[command(name = "dotlink", about = "Ahead-of-time class archive dump and replay")]
pub struct Cli {
    /// Path to a TOML policy file overriding the built-in defaults
    #[arg(long)]
    pub policy: Option<PathBuf>,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// What kind of archive a dump produces
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindArg {
    /// Base archive from a single training run
    Static,
    /// Layered archive on top of a base archive
    Dynamic,
    /// Trial archive of a two-stage pipeline
    Preimage,
    /// Final archive assembled from a preimage
    Final,
}

/// Top-level commands for dotlink
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Produce an archive from a universe snapshot
    Dump {
        /// JSON snapshot of the classes observed in a representative run
        #[arg(long)]
        universe: PathBuf,

        /// Where to write the archive
        #[arg(long)]
        out: PathBuf,

        /// Archive kind to produce
        #[arg(long, value_enum, default_value_t = KindArg::Static)]
        kind: KindArg,

        /// Base archive whose classes count as already preloaded (layered
        /// dumps only)
        #[arg(long)]
        base: Option<PathBuf>,
    },

    /// Replay an archive against a universe snapshot
    Replay {
        /// JSON snapshot of the fresh process's class universe
        #[arg(long)]
        universe: PathBuf,

        /// Archive to replay; missing file means no acceleration
        #[arg(long)]
        archive: PathBuf,

        /// Treat this replay as the final stage of a preimage pipeline
        #[arg(long)]
        final_stage: bool,
    },

    /// Print the contents summary of an archive
    Inspect {
        #[arg(long)]
        archive: PathBuf,

        /// Emit the full table contents as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let policy = config::load_policy(cli.policy.as_deref())?;

    match cli.command {
        Commands::Dump { universe, out, kind, base } => commands::run_dump(&universe, &out, kind, base.as_deref(), policy),
        Commands::Replay {
            universe,
            archive,
            final_stage,
        } => commands::run_replay(&universe, &archive, final_stage, policy),
        Commands::Inspect { archive, json } => commands::run_inspect(&archive, json),
    }
}
