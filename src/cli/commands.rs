//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: start the admission loop
//! - submit: enqueue a task
//! - queues / log / snapshot: inspect the bus and the machine
//! - shift: hot-swap the active role

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tollgate::domain::{LogStream, Priority};
use tollgate::roles::Role;

/// Tollgate - admission-control scheduler for a local inference worker
#[derive(Parser, Debug)]
#[command(name = "tollgate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the admission loop until interrupted
    Run {
        /// Also run the recurring job producer
        #[arg(short, long)]
        jobs: bool,
    },

    /// Enqueue a task
    Submit {
        /// Task type, e.g. code_analysis
        task_type: String,

        /// Priority (critical, export, internal)
        #[arg(short, long, default_value = "internal")]
        priority: Priority,

        /// JSON object payload
        #[arg(long)]
        payload: Option<String>,

        /// Explicit task id
        #[arg(long)]
        id: Option<String>,
    },

    /// Show lane lengths
    Queues,

    /// Show the most recent entries of an audit stream
    Log {
        /// Stream (decisions, tasks, incidents)
        stream: LogStream,

        /// Number of entries
        #[arg(short = 'n', long, default_value_t = 20)]
        count: usize,
    },

    /// Switch the worker to another role
    Shift {
        /// Target role
        role: Role,

        /// JSON context carried into the handoff
        #[arg(long)]
        context: Option<String>,
    },

    /// Print the current resource snapshot
    Snapshot,
}
