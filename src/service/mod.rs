//! Event loop hosting the pool.
//!
//! [`ThumbnailService::run`] owns the [`PoolManager`] and applies caller
//! commands and worker events one at a time on a single task. Callers hold
//! cheap, cloneable [`ThumbnailHandle`]s. A callback that wants more
//! thumbnails submits them through a handle; the command is picked up on a
//! later turn of the loop, so callbacks never re-enter the pool.

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::ThumbCache;
use crate::config::Config;
use crate::pool::{Generated, PoolManager, PoolStatus};
use crate::request::{Callback, Extra, RequestId, ThumbOutcome};
use crate::worker::{CommandSpawner, HelperSpawner, WorkerEvent};

enum Command {
    Generate {
        url: String,
        frame: Option<String>,
        extra: Extra,
        callback: Option<Callback>,
        reply: oneshot::Sender<Generated>,
    },
    Cancel(RequestId),
    Status(oneshot::Sender<PoolStatus>),
    Shutdown,
}

/// Cloneable entry point to a running [`ThumbnailService`]
#[derive(Clone)]
pub struct ThumbnailHandle {
    commands: mpsc::UnboundedSender<Command>,
    cache: ThumbCache,
}

impl ThumbnailHandle {
    pub fn thumb_path_get(&self, url: &str) -> PathBuf {
        self.cache.thumb_path_get(url)
    }

    /// Ask for the thumbnail of `url`; see [`PoolManager::generate`].
    pub async fn generate<F>(
        &self,
        url: impl Into<String>,
        frame: Option<String>,
        extra: Extra,
        callback: F,
    ) -> Result<Generated>
    where
        F: FnOnce(ThumbOutcome) + Send + 'static,
    {
        let (reply, answer) = oneshot::channel();
        self.send(Command::Generate {
            url: url.into(),
            frame,
            extra,
            callback: Some(Box::new(callback)),
            reply,
        })?;
        answer.await.map_err(|_| stopped())
    }

    pub fn cancel_request(&self, id: RequestId) -> Result<()> {
        self.send(Command::Cancel(id))
    }

    pub async fn status(&self) -> Result<PoolStatus> {
        let (reply, answer) = oneshot::channel();
        self.send(Command::Status(reply))?;
        answer.await.map_err(|_| stopped())
    }

    /// Stop the service, killing every helper
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| stopped())
    }
}

fn stopped() -> anyhow::Error {
    anyhow!("thumbnail service is not running")
}

pub struct ThumbnailService {
    pool: PoolManager,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl ThumbnailService {
    /// Service whose workers run the helper described by `config`
    pub fn new(config: &Config) -> Result<(Self, ThumbnailHandle)> {
        config.validate()?;
        let spawner = CommandSpawner::new(config.helper_program()?);
        Self::with_spawner(config, Arc::new(spawner))
    }

    pub fn with_spawner(
        config: &Config,
        spawner: Arc<dyn HelperSpawner>,
    ) -> Result<(Self, ThumbnailHandle)> {
        config.validate()?;
        let cache = ThumbCache::new(config.cache_root.clone());
        let (events_tx, events) = mpsc::unbounded_channel();
        let (commands_tx, commands) = mpsc::unbounded_channel();

        let pool = PoolManager::with_helpers(
            cache.clone(),
            config.pool_size,
            config.timeout(),
            spawner,
            events_tx,
        );

        let service = Self {
            pool,
            commands,
            events,
        };
        let handle = ThumbnailHandle {
            commands: commands_tx,
            cache,
        };
        Ok((service, handle))
    }

    /// Start the service on the current runtime
    pub fn spawn(config: &Config) -> Result<(JoinHandle<()>, ThumbnailHandle)> {
        let (service, handle) = Self::new(config)?;
        Ok((tokio::spawn(service.run()), handle))
    }

    /// Run until shut down or until every handle is dropped
    pub async fn run(mut self) {
        info!(
            "🖼️ Thumbnail pool running with {} workers, cache at {:?}",
            self.pool.status().workers,
            self.pool.cache().root()
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.apply(command),
                },
                Some(event) = self.events.recv() => self.pool.handle_event(event),
            }
        }

        self.pool.shutdown();
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Generate {
                url,
                frame,
                extra,
                callback,
                reply,
            } => {
                let generated = self.pool.generate(&url, callback, frame, extra);
                if reply.send(generated).is_err() {
                    debug!("Caller went away before learning about {}", url);
                }
            }
            Command::Cancel(id) => {
                self.pool.cancel_request(id);
            }
            Command::Status(reply) => {
                let _ = reply.send(self.pool.status());
            }
            Command::Shutdown => {}
        }
    }
}
