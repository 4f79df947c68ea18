use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::worker::HelperProgram;

/// Configuration for the thumbnail pool and its helper processes
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub cache_root: PathBuf,
    pub pool_size: usize,
    pub timeout_secs: u64,
    /// Helper executable; `None` runs this binary's own `helper` subcommand
    pub helper: Option<PathBuf>,
    pub theme: String,
    pub thumb_width: u32,
    pub background: bool,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache_root: env::var("THUMBPOOL_CACHE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_root),
            pool_size: env::var("THUMBPOOL_POOL_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.pool_size),
            timeout_secs: env::var("THUMBPOOL_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_secs),
            helper: env::var("THUMBPOOL_HELPER").ok().map(PathBuf::from),
            theme: env::var("THUMBPOOL_THEME").unwrap_or(defaults.theme),
            thumb_width: env::var("THUMBPOOL_THUMB_WIDTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.thumb_width),
            background: env::var("THUMBPOOL_BACKGROUND")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.background),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(anyhow!("Pool size must be at least 1"));
        }
        if self.timeout_secs == 0 {
            return Err(anyhow!("Helper timeout must be at least 1 second"));
        }
        if self.thumb_width == 0 {
            return Err(anyhow!("Thumbnail width must be positive"));
        }
        // Thumbnail paths travel unescaped in the helper's request line
        if self.cache_root.to_string_lossy().contains(['|', '\r', '\n']) {
            return Err(anyhow!(
                "Cache root must not contain '|' or line breaks: {:?}",
                self.cache_root
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Command line for the helper processes.
    ///
    /// External helpers get the theme as their only argument; the bundled
    /// helper is this executable running `helper --theme <theme>`.
    pub fn helper_program(&self) -> Result<HelperProgram> {
        let mut program = match &self.helper {
            Some(path) => HelperProgram::new(path, vec![self.theme.clone()]),
            None => {
                let exe = env::current_exe().context("cannot locate the running executable")?;
                HelperProgram::new(
                    exe,
                    vec![
                        "helper".to_string(),
                        "--theme".to_string(),
                        self.theme.clone(),
                        "--width".to_string(),
                        self.thumb_width.to_string(),
                    ],
                )
            }
        };
        program.background = self.background;
        Ok(program)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            pool_size: 3,
            timeout_secs: 15,
            helper: None,
            theme: "default".to_string(),
            thumb_width: 320,
            background: false,
        }
    }
}

fn default_cache_root() -> PathBuf {
    let base = env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")))
        .unwrap_or_else(env::temp_dir);
    base.join("thumbpool")
}
