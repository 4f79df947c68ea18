//! The pool manager: the one component callers talk to.
//!
//! `PoolManager` is a plain state machine. It never blocks and never awaits;
//! whoever owns it (normally [`crate::service::ThumbnailService`]) feeds it
//! caller requests and [`WorkerEvent`]s one at a time.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{self, ThumbCache};
use crate::queue::RequestQueue;
use crate::request::{Callback, Extra, Request, RequestId};
use crate::worker::{
    EventSender, Finished, HelperSpawner, SubprocessWorker, Worker, WorkerEvent, WorkerId,
};

/// Answer to a `generate` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generated {
    /// An up-to-date thumbnail is already on disk
    Cached(PathBuf),
    /// The thumbnail will be reported through the callback of this request
    Queued(RequestId),
}

/// Snapshot of the pool's load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub workers: usize,
    pub queued: usize,
    pub in_flight: usize,
}

pub struct PoolManager {
    cache: ThumbCache,
    queue: RequestQueue,
    workers: Vec<Box<dyn Worker>>,
}

impl PoolManager {
    pub fn new(cache: ThumbCache, workers: Vec<Box<dyn Worker>>) -> Self {
        Self {
            cache,
            queue: RequestQueue::new(),
            workers,
        }
    }

    /// Pool of `size` helper-backed workers
    pub fn with_helpers(
        cache: ThumbCache,
        size: usize,
        timeout: Duration,
        spawner: Arc<dyn HelperSpawner>,
        events: EventSender,
    ) -> Self {
        let workers = (0..size)
            .map(|index| {
                Box::new(SubprocessWorker::new(
                    WorkerId(index),
                    spawner.clone(),
                    events.clone(),
                    timeout,
                )) as Box<dyn Worker>
            })
            .collect();
        Self::new(cache, workers)
    }

    pub fn cache(&self) -> &ThumbCache {
        &self.cache
    }

    pub fn thumb_path_get(&self, url: &str) -> PathBuf {
        self.cache.thumb_path_get(url)
    }

    /// Ask for the thumbnail of `url`.
    ///
    /// Returns the cached path when it is fresh. Otherwise the thumbnail is
    /// scheduled and `callback` fires once it is done. When `url` is already
    /// scheduled the existing request id comes back, and this call's
    /// `callback` and `extra` are dropped.
    pub fn generate(
        &mut self,
        url: &str,
        callback: Option<Callback>,
        frame: Option<String>,
        extra: Extra,
    ) -> Generated {
        let dest = self.cache.thumb_path_get(url);
        if self.cache.is_fresh(url, &dest) {
            debug!("Cache hit for {}", url);
            return Generated::Cached(dest);
        }

        if let Some(id) = self.find_pending(url) {
            debug!("{} already pending as {}", url, id);
            return Generated::Queued(id);
        }

        let request = Request::new(url, dest, frame, callback, extra);
        let id = request.id();
        self.queue.push(request);
        self.process_queue();
        Generated::Queued(id)
    }

    /// Withdraw a request.
    ///
    /// A queued request disappears without its callback ever running. A
    /// running one finishes anyway, but its outcome is thrown away.
    pub fn cancel_request(&mut self, id: RequestId) -> bool {
        if self.queue.remove(id).is_some() {
            debug!("Cancelled queued {}", id);
            return true;
        }

        for worker in self.workers.iter_mut() {
            let worker_id = worker.id();
            if let Some(request) = worker.current_request_mut() {
                if request.id() == id {
                    request.detach();
                    debug!("Detached running {} on {}", id, worker_id);
                    return true;
                }
            }
        }

        debug!("Nothing to cancel for {}", id);
        false
    }

    /// Feed one worker event through the owning worker
    pub fn handle_event(&mut self, event: WorkerEvent) {
        let worker_id = event.worker();
        let Some(worker) = self.workers.get_mut(worker_id.index()) else {
            warn!("Event for unknown {}: {:?}", worker_id, event);
            return;
        };

        if let Some(finished) = worker.handle_event(event) {
            self.worker_done(finished);
        }
    }

    /// Hand queued requests to idle workers, oldest first
    fn process_queue(&mut self) {
        for worker in self.workers.iter_mut() {
            if self.queue.is_empty() {
                break;
            }
            if worker.is_busy() {
                continue;
            }

            let capabilities = worker.capabilities();
            let Some(request) = self
                .queue
                .pop_oldest_matching(|kind| capabilities.supports(kind))
            else {
                continue;
            };

            if let Err(request) = worker.generate_item(request) {
                self.queue.restore(request);
            }
        }
    }

    fn worker_done(&mut self, finished: Finished) {
        let Finished {
            worker,
            request,
            success,
        } = finished;

        if success {
            info!("✅ Thumbnail ready: {} -> {:?}", request.url, request.dest);
        } else {
            warn!("❌ Thumbnail failed on {}: {}", worker, request.url);
            discard_partial(&request.dest);
        }

        let id = request.id();
        if !request.complete(success) {
            debug!("{} finished with nobody waiting", id);
        }

        self.process_queue();
    }

    /// Kill every helper and forget all pending work without notifying anyone
    pub fn shutdown(&mut self) {
        let dropped = self.queue.clear();
        let mut aborted = 0;
        for worker in self.workers.iter_mut() {
            worker.kill();
            if let Some(mut finished) = worker.item_completed(false) {
                finished.request.detach();
                aborted += 1;
            }
        }
        info!(
            "🛑 Thumbnail pool stopped ({} queued dropped, {} running aborted)",
            dropped, aborted
        );
    }

    pub fn is_pending(&self, id: RequestId) -> bool {
        self.queue.contains(id)
            || self
                .workers
                .iter()
                .any(|worker| worker.current_request().is_some_and(|r| r.id() == id))
    }

    /// Request currently held by each worker, in worker order
    pub fn assignments(&self) -> Vec<Option<RequestId>> {
        self.workers
            .iter()
            .map(|worker| worker.current_request().map(Request::id))
            .collect()
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            workers: self.workers.len(),
            queued: self.queue.len(),
            in_flight: self.workers.iter().filter(|worker| worker.is_busy()).count(),
        }
    }

    fn find_pending(&self, url: &str) -> Option<RequestId> {
        self.queue.find_url(url).or_else(|| {
            self.workers
                .iter()
                .filter_map(|worker| worker.current_request())
                .find(|request| request.url == url)
                .map(Request::id)
        })
    }
}

/// A failed job must not leave something that looks like a finished thumbnail
fn discard_partial(dest: &Path) {
    for path in [dest.to_path_buf(), cache::partial_path(dest)] {
        match std::fs::remove_file(&path) {
            Ok(()) => debug!("Removed partial thumbnail {:?}", path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove partial thumbnail {:?}: {}", path, e),
        }
    }
}
