// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ci-runner")]
#[command(about = "Build and deploy the tip of a branch from inside the cluster")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable debug logging (ignored when RUST_LOG is set)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Override STATE_PATH
    #[arg(long, global = true, value_name = "PATH")]
    pub state_path: Option<PathBuf>,
}

#[derive(Subcommand, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Poll, build, and deploy until interrupted (default)
    Run,

    /// Run a single iteration and exit; non-zero exit if it failed
    Tick,

    /// Print the persisted runner state as JSON
    Status,

    /// Print the resolved settings with secrets redacted
    Config,
}
