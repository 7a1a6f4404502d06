use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "heicsync")]
#[command(author, version, about = "JPEG to HEIC conversion with EXIF timestamp preservation")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the service: discovery, conversion queue and status API
    Start {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Convert a single file without recording it
    Convert {
        /// JPEG file to convert
        #[arg(required = true)]
        file: PathBuf,

        /// Write here instead of the sibling output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Convert every JPEG under the given directories, then exit
    Scan {
        /// Directories to scan (defaults to the configured watch dirs)
        dirs: Vec<PathBuf>,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
