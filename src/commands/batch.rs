use anyhow::Result;
use indicatif::ProgressBar;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::pool::Generated;
use crate::request::Extra;
use crate::service::ThumbnailHandle;

/// One thumbnail produced or looked up by a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchEntry {
    pub url: String,
    pub path: PathBuf,
}

/// Result of pushing a list of sources through the pool
#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub cached: Vec<BatchEntry>,
    pub generated: Vec<BatchEntry>,
    pub failed: Vec<BatchEntry>,
    pub interrupted: bool,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.cached.len() + self.generated.len() + self.failed.len()
    }
}

/// Submit every url and wait for all outcomes, or for Ctrl-C.
///
/// The same url listed twice is submitted twice, but the pool folds the
/// second request into the first and only one outcome arrives.
pub async fn run_batch(
    handle: &ThumbnailHandle,
    urls: Vec<String>,
    frame: Option<String>,
    progress: &ProgressBar,
) -> Result<BatchReport> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut pending = HashSet::new();
    let mut report = BatchReport::default();

    for url in urls {
        let tx = tx.clone();
        let generated = handle
            .generate(url.clone(), frame.clone(), Extra::new(), move |outcome| {
                let _ = tx.send(outcome);
            })
            .await?;

        match generated {
            Generated::Cached(path) => {
                debug!("Up to date: {}", url);
                report.cached.push(BatchEntry { url, path });
                progress.inc(1);
            }
            Generated::Queued(id) => {
                if !pending.insert(id) {
                    debug!("Already pending as {}: {}", id, url);
                    progress.inc(1);
                }
            }
        }
    }
    drop(tx);

    if pending.is_empty() {
        return Ok(report);
    }
    info!("⏳ Waiting for {} thumbnails...", pending.len());

    tokio::pin! {
        let shutdown_signal = signal::ctrl_c();
    }

    let mut remaining = pending.len();
    while remaining > 0 {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("🛑 Shutdown signal received. Abandoning {} thumbnails.", remaining);
                report.interrupted = true;
                break;
            }
            outcome = rx.recv() => {
                let Some(outcome) = outcome else {
                    warn!("Thumbnail service stopped with {} thumbnails outstanding", remaining);
                    report.interrupted = true;
                    break;
                };
                remaining -= 1;
                progress.inc(1);

                let entry = BatchEntry {
                    url: outcome.url,
                    path: outcome.dest,
                };
                if outcome.success {
                    progress.set_message(entry.url.clone());
                    report.generated.push(entry);
                } else {
                    warn!("❌ Failed to generate thumbnail for {}", entry.url);
                    report.failed.push(entry);
                }
            }
        }
    }

    Ok(report)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::service::ThumbnailService;
    use crate::worker::{CommandSpawner, HelperProgram};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Succeeds for everything except urls containing "broken"
    const PICKY_HELPER: &str = r#"
        while IFS= read -r line; do
            case "$line" in
                *broken*) echo "ERR cannot decode"; continue ;;
            esac
            dest=$(printf '%s' "$line" | awk -F'|' '{print $(NF-1)}')
            mkdir -p "$(dirname "$dest")"
            printf 'jpeg' > "$dest"
            echo OK
        done
    "#;

    fn start(dir: &TempDir) -> (tokio::task::JoinHandle<()>, ThumbnailHandle) {
        let config = Config {
            cache_root: dir.path().join("cache"),
            pool_size: 2,
            ..Config::default()
        };
        let spawner = CommandSpawner::new(HelperProgram::new(
            "sh",
            vec!["-c".to_string(), PICKY_HELPER.to_string()],
        ));
        let (service, handle) =
            ThumbnailService::with_spawner(&config, Arc::new(spawner)).unwrap();
        (tokio::spawn(service.run()), handle)
    }

    #[tokio::test]
    async fn test_batch_collects_every_outcome() {
        let dir = TempDir::new().unwrap();
        let (task, handle) = start(&dir);

        let urls = vec![
            "/m/a.jpg".to_string(),
            "/m/b.png".to_string(),
            "/m/broken.jpg".to_string(),
            "/m/a.jpg".to_string(),
        ];
        let report = run_batch(&handle, urls, None, &ProgressBar::hidden())
            .await
            .unwrap();

        assert!(!report.interrupted);
        assert_eq!(report.generated.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].url, "/m/broken.jpg");
        assert!(!report.failed[0].path.exists());
        for entry in &report.generated {
            assert_eq!(entry.path, handle.thumb_path_get(&entry.url));
            assert!(entry.path.exists());
        }

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_fresh_thumbnails_are_not_regenerated() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("cover.jpg");
        fs::write(&source, "image").unwrap();
        let url = source.to_string_lossy().into_owned();

        let (task, handle) = start(&dir);
        let thumb = handle.thumb_path_get(&url);
        fs::create_dir_all(thumb.parent().unwrap()).unwrap();
        fs::write(&thumb, "jpeg").unwrap();
        fs::File::options()
            .write(true)
            .open(&thumb)
            .unwrap()
            .set_modified(std::time::SystemTime::now() + std::time::Duration::from_secs(5))
            .unwrap();

        let report = run_batch(&handle, vec![url.clone()], None, &ProgressBar::hidden())
            .await
            .unwrap();

        assert_eq!(report.cached, vec![BatchEntry { url, path: thumb }]);
        assert!(report.generated.is_empty());
        assert_eq!(report.total(), 1);

        handle.shutdown();
        task.await.unwrap();
    }
}
