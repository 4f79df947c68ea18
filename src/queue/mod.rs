use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::request::{MediaKind, Request, RequestId};

/// Requests waiting for a free worker.
///
/// Ids grow monotonically, so ordering the map by id gives arrival order. A
/// side index from URL to id makes duplicate detection O(1).
#[derive(Debug, Default)]
pub struct RequestQueue {
    pending: BTreeMap<RequestId, Request>,
    by_url: HashMap<String, RequestId>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request at the back of the queue
    pub fn push(&mut self, request: Request) {
        debug!("Queued {} for {}", request.id(), request.url);
        self.by_url.insert(request.url.clone(), request.id());
        self.pending.insert(request.id(), request);
    }

    /// Id of the queued request for `url`, if any
    pub fn find_url(&self, url: &str) -> Option<RequestId> {
        self.by_url.get(url).copied()
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Remove a request by id
    pub fn remove(&mut self, id: RequestId) -> Option<Request> {
        let request = self.pending.remove(&id)?;
        self.unindex(&request);
        Some(request)
    }

    /// Take the oldest request
    pub fn pop_oldest(&mut self) -> Option<Request> {
        let (_, request) = self.pending.pop_first()?;
        self.unindex(&request);
        Some(request)
    }

    /// Take the oldest request whose media kind passes `accepts`
    pub fn pop_oldest_matching(&mut self, accepts: impl Fn(MediaKind) -> bool) -> Option<Request> {
        let id = self
            .pending
            .values()
            .find(|request| accepts(request.kind))
            .map(Request::id)?;
        self.remove(id)
    }

    /// Put a request back after a worker refused it. Its id keeps its place.
    pub fn restore(&mut self, request: Request) {
        self.push(request);
    }

    /// Drop every queued request without completing any of them
    pub fn clear(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        self.by_url.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn unindex(&mut self, request: &Request) {
        if self.by_url.get(&request.url) == Some(&request.id()) {
            self.by_url.remove(&request.url);
        }
    }
}
