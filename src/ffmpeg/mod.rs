use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::cache::{self, partial_path};
use crate::error::ThumbError;
use crate::protocol::GenCommand;
use crate::request::MediaKind;

/// Anything smaller than this is not a usable JPEG
const MIN_THUMB_BYTES: u64 = 128;

/// FFmpeg wrapper that renders one thumbnail per call
#[derive(Debug, Clone)]
pub struct FfmpegRenderer {
    theme: String,
    width: u32,
    min_bytes: u64,
}

impl FfmpegRenderer {
    pub fn new(theme: String, width: u32) -> Self {
        Self {
            theme,
            width,
            min_bytes: MIN_THUMB_BYTES,
        }
    }

    /// Render the thumbnail for one request.
    ///
    /// Output is written next to `dest` and renamed into place only once it
    /// passed the size check, so `dest` never holds a half-written file.
    pub async fn render(&self, job: &GenCommand) -> Result<(), ThumbError> {
        let input = match cache::source_path(&job.url) {
            Some(path) => {
                if !path.exists() {
                    return Err(ThumbError::Generation(format!(
                        "input file does not exist: {path:?}"
                    )));
                }
                path.to_string_lossy().into_owned()
            }
            // ffmpeg reads remote locators itself
            None => job.url.clone(),
        };

        if let Some(parent) = job.dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ThumbError::Generation(format!("cannot create {parent:?}: {e}")))?;
        }

        let partial = partial_path(&job.dest);
        let kind = MediaKind::guess(&job.url, job.frame.as_deref());
        let mut cmd = Command::new("ffmpeg");
        cmd.args(self.ffmpeg_args(&input, &partial, kind, job.frame.as_deref()));

        if let Err(e) = self.execute(cmd).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        let size = tokio::fs::metadata(&partial)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);
        if size < self.min_bytes {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(ThumbError::BelowMinimumSize);
        }

        tokio::fs::rename(&partial, &job.dest)
            .await
            .map_err(|e| ThumbError::Generation(format!("cannot move thumbnail into place: {e}")))?;

        info!("✅ Rendered {} -> {:?}", job.url, job.dest);
        Ok(())
    }

    /// Arguments for a single-frame render
    fn ffmpeg_args(
        &self,
        input: &str,
        output: &Path,
        kind: MediaKind,
        frame: Option<&str>,
    ) -> Vec<String> {
        let mut filters = Vec::new();
        if kind == MediaKind::Video {
            // Pick a representative frame instead of the (often black) first one
            filters.push("thumbnail".to_string());
        }
        filters.push(format!("scale={}:-2", self.width));
        if let Some(style) = frame.and_then(|f| self.frame_filter(f)) {
            filters.push(style);
        }

        let mut args: Vec<String> = ["-nostdin", "-hide_banner", "-loglevel", "error", "-i"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.push(input.to_string());
        args.push("-vf".to_string());
        args.push(filters.join(","));
        args.extend(
            ["-frames:v", "1", "-q:v", "3", "-y"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push(output.to_string_lossy().into_owned());
        args
    }

    /// Decoration for a frame tag. Unknown tags render undecorated.
    fn frame_filter(&self, frame: &str) -> Option<String> {
        let border = if self.theme == "light" { "white" } else { "black" };
        match frame {
            "vthumb" => Some(format!("pad=iw+16:ih+16:8:8:{border}")),
            other => {
                debug!("No decoration for frame {:?} in theme {:?}", other, self.theme);
                None
            }
        }
    }

    async fn execute(&self, mut cmd: Command) -> Result<(), ThumbError> {
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        debug!("Executing FFmpeg command: {:?}", cmd);

        let output = cmd
            .output()
            .await
            .map_err(|e| ThumbError::Generation(format!("cannot run ffmpeg: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("FFmpeg failed: {}", stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("ffmpeg failed")
                .to_string();
            return Err(ThumbError::Generation(reason));
        }

        Ok(())
    }
}
