use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "popoff")]
#[command(author, version, about = "Short-video ingestion: transcode to HLS and publish a post")]
pub struct Cli {
    /// Path to config file (JSON)
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
    /// Transcode a video, upload the package and publish a post
    Ingest {
        /// Video file to ingest
        #[arg(required = true)]
        source: PathBuf,

        /// Thumbnail image uploaded alongside the package
        #[arg(long, required = true)]
        thumbnail: PathBuf,

        /// Post description
        #[arg(short, long, default_value = "")]
        description: String,

        /// Tag to attach to the post (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Source duration in milliseconds (probed with ffprobe when omitted)
        #[arg(long)]
        duration_ms: Option<u64>,

        /// Display width in pixels (probed when omitted)
        #[arg(long, requires = "height")]
        width: Option<u32>,

        /// Display height in pixels (probed when omitted)
        #[arg(long, requires = "width")]
        height: Option<u32>,
    },

    /// Probe a video file and display the values sent with a post
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
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
