use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Layout of the on-disk thumbnail cache.
///
/// Thumbnails live at `<root>/thumbs/<xx>/<md5>.jpg`, where `md5` is the hex
/// digest of the source URL and `xx` its first two characters.
#[derive(Debug, Clone)]
pub struct ThumbCache {
    root: PathBuf,
}

impl ThumbCache {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory that holds all thumbnail shards
    pub fn thumbs_dir(&self) -> PathBuf {
        self.root.join("thumbs")
    }

    /// Cache location for a source URL. Pure path arithmetic, no I/O.
    pub fn thumb_path_get(&self, url: &str) -> PathBuf {
        let digest = format!("{:x}", md5::compute(url.as_bytes()));
        self.thumbs_dir()
            .join(&digest[..2])
            .join(format!("{digest}.jpg"))
    }

    /// Whether `thumb` is a usable, up-to-date thumbnail of `url`.
    ///
    /// The thumbnail must exist and be newer than the source. When the
    /// source's modification time cannot be read (remote URL, vanished file)
    /// any existing thumbnail is accepted.
    pub fn is_fresh(&self, url: &str, thumb: &Path) -> bool {
        let thumb_mtime = match modified(thumb) {
            Some(mtime) => mtime,
            None => return false,
        };

        match source_path(url).and_then(|source| modified(&source)) {
            Some(source_mtime) => {
                let fresh = thumb_mtime > source_mtime;
                if !fresh {
                    debug!("Stale thumbnail for {}: {:?}", url, thumb);
                }
                fresh
            }
            None => true,
        }
    }

    /// Remove the whole thumbnail tree
    pub async fn clean(&self) -> Result<bool> {
        let dir = self.thumbs_dir();
        if !dir.exists() {
            return Ok(false);
        }
        tokio::fs::remove_dir_all(&dir).await?;
        Ok(true)
    }
}

/// Local filesystem path behind a URL, if it has one
pub fn source_path(url: &str) -> Option<PathBuf> {
    if let Some(path) = url.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    // Anything else with a scheme is remote
    if url.contains("://") {
        return None;
    }
    Some(PathBuf::from(url))
}

/// Scratch file a helper renders into before moving it to `dest`. Keeps the
/// .jpg extension so ffmpeg picks the right muxer.
pub fn partial_path(dest: &Path) -> PathBuf {
    let stem = dest
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "thumb".to_string());
    dest.with_file_name(format!("{stem}.part.jpg"))
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}
