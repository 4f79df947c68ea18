use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::ffmpeg::FfmpegRenderer;
use crate::protocol::{decode_request, encode_response};

/// Helper process side of the pool: answers one `GEN` line at a time on
/// stdin/stdout until stdin closes.
pub struct HelperCommand {
    renderer: FfmpegRenderer,
}

impl HelperCommand {
    pub fn new(theme: String, width: u32) -> Self {
        Self {
            renderer: FfmpegRenderer::new(theme, width),
        }
    }

    pub async fn execute(&self) -> Result<()> {
        info!("Helper {} ready", std::process::id());
        let stdin = BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();
        self.serve(stdin, &mut stdout).await
    }

    async fn serve<R, W>(&self, reader: R, writer: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            let result = match decode_request(&line) {
                Ok(job) => {
                    debug!("Rendering {} -> {:?}", job.url, job.dest);
                    self.renderer.render(&job).await
                }
                Err(e) => {
                    warn!("Ignoring malformed request {:?}: {}", line, e);
                    Err(e)
                }
            };

            let mut response = encode_response(&result);
            response.push('\n');
            writer.write_all(response.as_bytes()).await?;
            writer.flush().await?;
        }

        debug!("Input closed, helper exiting");
        Ok(())
    }
}
