//! Command-line interface definitions for Press Stream.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Deployment settings live in the YAML configuration file; the flags here
//! override a few of them and select what the process does.

use std::path::PathBuf;

use clap::Parser;

use crate::outputs::Format;

/// Command-line arguments for the Press Stream application.
///
/// # Examples
///
/// ```sh
/// # Serve every configured source
/// press_stream --config sources.yaml
///
/// # List configured sources
/// press_stream --config sources.yaml --list
///
/// # Dry-run one source and print titles and links only
/// press_stream --config sources.yaml --test tesco --brief
///
/// # Backfill two sources from their historical indexes
/// press_stream --config sources.yaml --only tesco,bis --historical
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "PRESS_STREAM_CONFIG", default_value = "press_stream.yaml")]
    pub config: PathBuf,

    /// Address for the subscription server (overrides `listen`)
    #[arg(long)]
    pub listen: Option<String>,

    /// Archive database file (overrides `database`)
    #[arg(short, long)]
    pub database: Option<PathBuf>,

    /// Seconds between polling cycles (overrides `interval_secs`)
    #[arg(short, long)]
    pub interval: Option<u64>,

    /// List configured sources and exit
    #[arg(short, long)]
    pub list: bool,

    /// Run one source once without archiving, print what it finds, and exit
    #[arg(short, long, value_name = "SOURCE")]
    pub test: Option<String>,

    /// With --test, print only titles and permalinks
    #[arg(short, long, requires = "test", conflicts_with = "json")]
    pub brief: bool,

    /// With --test, print items as JSON
    #[arg(long, requires = "test")]
    pub json: bool,

    /// Only run these sources (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Use each source's historical (backfill) discover where one is defined
    #[arg(long)]
    pub historical: bool,
}

impl Cli {
    pub fn output_format(&self) -> Format {
        if self.json {
            Format::Json
        } else if self.brief {
            Format::Brief
        } else {
            Format::Full
        }
    }
}
