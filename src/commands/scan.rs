use anyhow::{anyhow, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use super::batch::run_batch;
use crate::config::Config;
use crate::request::MediaKind;
use crate::service::ThumbnailService;

/// Command to thumbnail every media file below a directory
pub struct ScanCommand {
    media_root: PathBuf,
    frame: Option<String>,
    config: Config,
}

impl ScanCommand {
    pub fn new(media_root: PathBuf, frame: Option<String>, config: Config) -> Self {
        Self {
            media_root,
            frame,
            config,
        }
    }

    pub async fn execute(&self) -> Result<()> {
        if !self.media_root.exists() {
            return Err(anyhow!("Media directory does not exist: {:?}", self.media_root));
        }

        if !self.media_root.is_dir() {
            return Err(anyhow!("Path is not a directory: {:?}", self.media_root));
        }
        self.config.validate()?;

        info!("🔎 Scanning directory: {:?}", self.media_root);

        let sources = find_media(&self.media_root, &self.config.cache_root);
        if sources.is_empty() {
            info!("No media files found.");
            return Ok(());
        }
        info!("Found {} media files. Generating thumbnails...", sources.len());

        let progress = ProgressBar::new(sources.len() as u64);
        progress.set_style(
            ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {wide_msg}")?
                .progress_chars("##-"),
        );

        let (task, handle) = ThumbnailService::spawn(&self.config)?;
        let report = run_batch(&handle, sources, self.frame.clone(), &progress).await;
        handle.shutdown();
        task.await?;
        progress.finish_and_clear();
        let report = report?;

        for entry in &report.failed {
            warn!("⚠️ No thumbnail for {}", entry.url);
        }
        info!(
            "✅ Scan complete. {} generated, {} already cached, {} failed.",
            report.generated.len(),
            report.cached.len(),
            report.failed.len()
        );
        Ok(())
    }
}

/// Media files below `root`, sorted, skipping anything inside the cache
fn find_media(root: &Path, cache_root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !entry.path().starts_with(cache_root))
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| MediaKind::from_extension(&ext.to_string_lossy()))
                .is_some()
        })
        .map(|entry| entry.path().to_string_lossy().into_owned())
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_scan_nonexistent_directory() {
        let scan_cmd = ScanCommand::new(
            PathBuf::from("/nonexistent/path"),
            None,
            Config::default(),
        );
        let result = scan_cmd.execute().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_scan_file_instead_of_directory() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("movie.mkv");
        fs::write(&file, "video").unwrap();

        let result = ScanCommand::new(file, None, Config::default()).execute().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_scan_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            cache_root: temp_dir.path().join("cache"),
            ..Config::default()
        };
        let result = ScanCommand::new(temp_dir.path().to_path_buf(), None, config)
            .execute()
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_find_media_filters_and_skips_cache() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("shows/s01")).unwrap();
        fs::create_dir_all(root.join("cache/thumbs/ab")).unwrap();
        fs::write(root.join("shows/s01/e01.mkv"), "v").unwrap();
        fs::write(root.join("shows/s01/e01.srt"), "s").unwrap();
        fs::write(root.join("poster.JPG"), "i").unwrap();
        fs::write(root.join("cache/thumbs/ab/abc.jpg"), "t").unwrap();

        let found = find_media(root, &root.join("cache"));
        let expected: Vec<String> = vec![
            root.join("poster.JPG").to_string_lossy().into_owned(),
            root.join("shows/s01/e01.mkv").to_string_lossy().into_owned(),
        ];
        assert_eq!(found, expected);
    }
}
