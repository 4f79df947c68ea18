use anyhow::{anyhow, Result};
use indicatif::ProgressBar;
use tracing::info;

use super::batch::{run_batch, BatchReport};
use crate::config::Config;
use crate::service::ThumbnailService;

/// Command to produce thumbnails for the given sources and print where they are
pub struct GenerateCommand {
    urls: Vec<String>,
    frame: Option<String>,
    json: bool,
    config: Config,
}

impl GenerateCommand {
    pub fn new(urls: Vec<String>, frame: Option<String>, json: bool, config: Config) -> Self {
        Self {
            urls,
            frame,
            json,
            config,
        }
    }

    pub async fn execute(&self) -> Result<()> {
        if self.urls.is_empty() {
            return Err(anyhow!("No sources given"));
        }
        self.config.validate()?;

        let (task, handle) = ThumbnailService::spawn(&self.config)?;
        let report = run_batch(
            &handle,
            self.urls.clone(),
            self.frame.clone(),
            &ProgressBar::hidden(),
        )
        .await;
        handle.shutdown();
        task.await?;
        let report = report?;

        self.print_report(&report)?;

        if !report.failed.is_empty() {
            return Err(anyhow!(
                "{} of {} thumbnails failed",
                report.failed.len(),
                report.total()
            ));
        }
        if report.interrupted {
            return Err(anyhow!("Interrupted before all thumbnails were ready"));
        }
        Ok(())
    }

    fn print_report(&self, report: &BatchReport) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(report)?);
            return Ok(());
        }

        for entry in report.cached.iter().chain(&report.generated) {
            println!("{}\t{}", entry.url, entry.path.display());
        }
        info!(
            "✅ {} generated, {} already cached, {} failed",
            report.generated.len(),
            report.cached.len(),
            report.failed.len()
        );
        Ok(())
    }
}
