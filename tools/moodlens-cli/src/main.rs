//! MoodLens CLI — Run emotion inference from the command line.
//!
//! Usage:
//!   moodlens infer <IMAGE>           Classify one image file
//!   moodlens infer --data-uri <STR>  Classify a base64 / data URI payload
//!   moodlens batch <MANIFEST>        Classify every entry of a JSONL manifest
//!   moodlens check                   Report which detectors and models loaded
//!   moodlens config                  Print the effective configuration

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use moodlens_common::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "moodlens",
    about = "Webcam emotion inference for learning platforms",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Load configuration from this file instead of the standard location
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a single frame
    Infer {
        /// Image file (PNG, JPEG, WebP, BMP, GIF)
        #[arg(required_unless_present = "data_uri")]
        image: Option<PathBuf>,

        /// Base64 payload, optionally with a data: URI header
        #[arg(long, conflicts_with = "image")]
        data_uri: Option<String>,

        /// User the frame belongs to
        #[arg(long)]
        user: Option<String>,

        /// Learning module identifier
        #[arg(long)]
        module: Option<String>,

        /// Activity identifier within the module
        #[arg(long)]
        activity: Option<String>,
    },

    /// Classify every request in a JSONL manifest
    Batch {
        /// One JSON object per line with `path` or `image`, plus optional
        /// `user`, `module`, `activity`
        manifest: PathBuf,

        /// Frames classified concurrently
        #[arg(short, long, default_value = "4")]
        jobs: usize,
    },

    /// Check which pipeline stages are available
    Check,

    /// Print the effective configuration
    Config {
        /// Also write it to the standard config location
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AppConfig::load(),
    };

    // Initialize logging
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    moodlens_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Infer {
            image,
            data_uri,
            user,
            module,
            activity,
        } => commands::infer::run(&config, image, data_uri, user, module, activity),
        Commands::Batch { manifest, jobs } => commands::batch::run(&config, manifest, jobs).await,
        Commands::Check => commands::check::run(&config),
        Commands::Config { save } => commands::config::run(&config, save),
    }
}
