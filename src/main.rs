//! # Thumbpool - Thumbnail Generation Service
//!
//! Generates JPEG thumbnails for images and videos through a pool of
//! long-lived helper processes, caching the results on disk.
//!
//! ## Usage
//!
//! ```bash
//! # Where would the thumbnail for a file live?
//! thumbpool path /media/movie.mkv
//!
//! # Generate thumbnails for a few files
//! thumbpool generate /media/movie.mkv /media/poster.png
//!
//! # Thumbnail every media file below a directory
//! thumbpool scan /media
//!
//! # Drop the whole thumbnail cache
//! thumbpool clean
//! ```

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use thumbpool::cache::ThumbCache;
use thumbpool::commands::{
    clean::CleanCommand, generate::GenerateCommand, helper::HelperCommand, scan::ScanCommand,
};
use thumbpool::config::Config;

/// Thumbpool - Asynchronous thumbnail generation backed by helper processes
#[derive(Parser)]
#[command(
    name = "thumbpool",
    about = "Asynchronous thumbnail generation backed by a pool of helper processes",
    long_about = "Generates JPEG thumbnails for images and videos through a pool of long-lived helper processes and caches them on disk.",
    version
)]
struct Cli {
    #[command(flatten)]
    pool: PoolArgs,
    #[command(subcommand)]
    command: Commands,
}

/// Settings shared by every command; each falls back to its THUMBPOOL_* variable
#[derive(Args)]
struct PoolArgs {
    /// Directory holding the thumbnail cache
    #[arg(long, short = 'c', global = true, env = "THUMBPOOL_CACHE_ROOT")]
    cache_root: Option<PathBuf>,
    /// Number of helper processes
    #[arg(long, short = 'j', global = true)]
    pool_size: Option<usize>,
    /// Seconds a helper may spend on one thumbnail
    #[arg(long, short = 't', global = true)]
    timeout: Option<u64>,
    /// External helper executable instead of the built-in one
    #[arg(long, global = true, env = "THUMBPOOL_HELPER")]
    helper: Option<PathBuf>,
    /// Visual theme passed to the helpers
    #[arg(long, global = true, env = "THUMBPOOL_THEME")]
    theme: Option<String>,
    /// Run helpers with low priority
    #[arg(long, short, global = true)]
    background: bool,
}

impl PoolArgs {
    fn into_config(self) -> Config {
        let mut config = Config::from_env();
        if let Some(cache_root) = self.cache_root {
            config.cache_root = cache_root;
        }
        if let Some(pool_size) = self.pool_size {
            config.pool_size = pool_size;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if self.helper.is_some() {
            config.helper = self.helper;
        }
        if let Some(theme) = self.theme {
            config.theme = theme;
        }
        config.background |= self.background;
        config
    }
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Print where the thumbnail for a source is cached
    Path {
        /// Source file path or URL
        url: String,
    },
    /// Generate thumbnails and print their paths
    Generate {
        /// Source file paths or URLs
        urls: Vec<String>,
        /// Frame decoration to request, e.g. "vthumb"
        #[arg(long, short = 'f')]
        frame: Option<String>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate thumbnails for every media file below a directory
    Scan {
        /// Path to the media directory to scan
        path: PathBuf,
        /// Frame decoration to request, e.g. "vthumb"
        #[arg(long, short = 'f')]
        frame: Option<String>,
    },
    /// Remove every cached thumbnail
    Clean,
    /// Serve thumbnail requests on stdin/stdout (used by the pool)
    #[command(hide = true)]
    Helper {
        /// Visual theme
        #[arg(long, default_value = "default")]
        theme: String,
        /// Thumbnail width in pixels
        #[arg(long, default_value_t = 320)]
        width: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; a helper's stdout carries protocol lines
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "thumbpool=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = cli.pool.into_config();

    let result = match cli.command {
        Commands::Path { url } => {
            let cache = ThumbCache::new(config.cache_root);
            println!("{}", cache.thumb_path_get(&url).display());
            Ok(())
        }
        Commands::Generate { urls, frame, json } => {
            info!(
                "Starting generate command for {} sources, cache: {:?}",
                urls.len(),
                config.cache_root
            );
            GenerateCommand::new(urls, frame, json, config).execute().await
        }
        Commands::Scan { path, frame } => {
            info!(
                "Starting scan command for path: {:?}, cache: {:?}",
                path, config.cache_root
            );
            ScanCommand::new(path, frame, config).execute().await
        }
        Commands::Clean => CleanCommand::new(ThumbCache::new(config.cache_root)).execute().await,
        Commands::Helper { theme, width } => HelperCommand::new(theme, width).execute().await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
