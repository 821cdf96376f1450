use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tunebridge")]
#[command(author, version, about = "Resolve music tracks across upstream providers")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Request timeout in seconds (overrides the configured default)
    #[arg(short, long, global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Search every enabled provider for a keyword
    Search {
        /// Keyword to search for
        #[arg(required = true)]
        keyword: String,

        /// Restrict the search to these providers
        #[arg(short, long, value_delimiter = ',')]
        sources: Vec<String>,
    },

    /// Resolve a track id to a playable URL
    Match {
        /// Track id
        #[arg(required = true)]
        id: String,

        /// Providers to try, in priority order
        #[arg(short, long, value_delimiter = ',')]
        sources: Vec<String>,

        /// Requested quality (bitrate or provider label)
        #[arg(short, long)]
        quality: Option<String>,
    },

    /// Fetch track metadata from one provider
    Info {
        /// Provider name
        source: String,

        /// Track id
        id: String,
    },

    /// Fetch lyrics from one provider
    Lyric {
        /// Provider name
        source: String,

        /// Track id
        id: String,
    },

    /// Probe every configured provider
    Status,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
