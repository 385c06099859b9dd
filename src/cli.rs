use clap::{Parser, Subcommand};
use std::path::PathBuf;

use attendance_window::ExportFormat;

/// Attendance Window Coordinator
///
/// Runs a time-boxed attendance registration window controlled by a single
/// administrator session.
#[derive(Parser, Debug)]
#[command(name = "attendance-window")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the coordinator server
    Serve {
        /// Address to listen on (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Show the persisted window and record count
    Status,
    /// Export the attendance log
    Export {
        /// Output format (csv or json)
        #[arg(short, long, default_value = "csv")]
        format: ExportFormat,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the SHA-256 of a secret for admin.secret_sha256
    HashSecret {
        /// Secret to hash
        secret: String,
    },
    /// Write an example configuration file
    Init {
        /// Destination (defaults to the platform config path)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
