use anyhow::Result;
use tracing::info;

use crate::cache::ThumbCache;

/// Command to delete every cached thumbnail
pub struct CleanCommand {
    cache: ThumbCache,
}

impl CleanCommand {
    pub fn new(cache: ThumbCache) -> Self {
        Self { cache }
    }

    pub async fn execute(&self) -> Result<()> {
        info!("🧹 Removing cached thumbnails in {:?}", self.cache.thumbs_dir());

        if self.cache.clean().await? {
            info!("✅ Cleanup complete.");
        } else {
            info!("Nothing to clean.");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_clean_empty_cache() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ThumbCache::new(temp_dir.path().to_path_buf());

        let result = CleanCommand::new(cache).execute().await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_clean_removes_thumbnails_only() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ThumbCache::new(temp_dir.path().to_path_buf());

        let thumb = cache.thumb_path_get("/m/a.jpg");
        fs::create_dir_all(thumb.parent().unwrap()).unwrap();
        fs::write(&thumb, "jpeg").unwrap();
        let unrelated = temp_dir.path().join("notes.txt");
        fs::write(&unrelated, "keep").unwrap();

        CleanCommand::new(cache.clone()).execute().await.unwrap();

        assert!(!thumb.exists());
        assert!(!cache.thumbs_dir().exists());
        assert!(unrelated.exists());
    }
}
