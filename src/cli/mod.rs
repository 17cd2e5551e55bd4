//! CLI module for ragdesk
//!
//! Provides command-line interface parsing for the ragdesk binary.
//! Uses clap for argument parsing and owo-colors for colored terminal output.

pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ragdesk - document Q&A and a Chinook SQL/chart assistant
#[derive(Parser, Debug)]
#[command(
    name = "ragdesk",
    version,
    about = "ragdesk - retrieval-augmented answers and a natural-language SQL/chart assistant",
    long_about = "Serves retrieval-augmented answers over ingested PDFs and a Chinook database\n\
                  assistant that replies in prose or with generated charts.\n\n\
                  Run without arguments to start the server, or use 'ingest' to index documents.",
    after_help = "EXAMPLES:\n    \
                  ragdesk                                  # Start the server (reads ragdesk.toml)\n    \
                  ragdesk ingest docs/*.pdf                # Index PDFs into the default collection\n    \
                  ragdesk ingest a.pdf --collection Cars   # Index into another collection\n    \
                  ragdesk config --validate                # Check the configuration file"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "ragdesk.toml", global = true)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Index PDF documents, one chunk per page
    ///
    /// Pages are appended; ingesting a document twice stores it twice.
    Ingest {
        /// PDF files to ingest, in order
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Target collection (defaults to [rag].collection)
        #[arg(long)]
        collection: Option<String>,
    },

    /// List indexed collections
    Collections,

    /// Show configuration information
    Config {
        /// Validate the configuration file and exit
        #[arg(long)]
        validate: bool,
    },
}

static DEFAULT_COMMAND: Commands = Commands::Serve;

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The subcommand to run, `serve` when none was given
    pub fn command_or_default(&self) -> &Commands {
        self.command.as_ref().unwrap_or(&DEFAULT_COMMAND)
    }
}
