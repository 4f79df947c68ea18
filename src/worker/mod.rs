//! Workers execute one thumbnail request at a time.
//!
//! [`Worker`] is the contract the pool relies on: an idle/busy slot guarded by
//! a [`Watchdog`], a forced `kill`, and completion reporting. Backends only
//! supply how a request is handed off and how their own events are read; the
//! slot bookkeeping and timeout handling live in the trait's provided methods.

pub mod process;
pub mod subprocess;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::ThumbError;
use crate::request::{MediaKind, Request};

pub use process::{CommandSpawner, HelperHandle, HelperInput, HelperProgram, HelperSpawner};
pub use subprocess::{ProcessState, SubprocessWorker};
pub use watchdog::Watchdog;

/// Position of a worker in the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub usize);

impl WorkerId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Which kinds of media a worker can thumbnail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub can_do_image: bool,
    pub can_do_video: bool,
}

impl Capabilities {
    pub const ALL: Capabilities = Capabilities {
        can_do_image: true,
        can_do_video: true,
    };

    pub fn supports(self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Image => self.can_do_image,
            MediaKind::Video => self.can_do_video,
        }
    }
}

/// Something a helper process reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelperEvent {
    Started,
    Line(String),
    Exited(Option<i32>),
    SpawnFailed(String),
}

/// Everything that can wake the pool besides caller commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Helper {
        worker: WorkerId,
        generation: u64,
        event: HelperEvent,
    },
    WatchdogExpired {
        worker: WorkerId,
        arm: u64,
    },
}

impl WorkerEvent {
    pub fn worker(&self) -> WorkerId {
        match self {
            WorkerEvent::Helper { worker, .. } | WorkerEvent::WatchdogExpired { worker, .. } => {
                *worker
            }
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<WorkerEvent>;

/// A request a worker is done with, handed back to the pool
#[derive(Debug)]
pub struct Finished {
    pub worker: WorkerId,
    pub request: Request,
    pub success: bool,
}

/// The "current job" slot of a worker.
///
/// Holding a request and having the watchdog armed always go together.
#[derive(Debug)]
pub struct JobSlot {
    current: Option<Request>,
    watchdog: Watchdog,
}

impl JobSlot {
    pub fn new(watchdog: Watchdog) -> Self {
        Self {
            current: None,
            watchdog,
        }
    }

    fn assign(&mut self, request: Request) {
        self.watchdog.start();
        self.current = Some(request);
    }

    fn release(&mut self) -> Option<Request> {
        self.watchdog.stop();
        self.current.take()
    }

    pub fn current(&self) -> Option<&Request> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut Request> {
        self.current.as_mut()
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }
}

pub trait Worker: Send {
    fn id(&self) -> WorkerId;

    fn capabilities(&self) -> Capabilities;

    fn slot(&self) -> &JobSlot;

    fn slot_mut(&mut self) -> &mut JobSlot;

    /// Hand the request that was just placed in the slot to the backend.
    fn submit(&mut self);

    /// Abort whatever the backend is doing. Must be safe at any time and
    /// leave the worker able to take the next request.
    fn kill(&mut self);

    /// React to an event from this worker's backend.
    fn on_helper_event(&mut self, generation: u64, event: HelperEvent) -> Option<Finished>;

    fn is_busy(&self) -> bool {
        self.slot().current().is_some()
    }

    fn current_request(&self) -> Option<&Request> {
        self.slot().current()
    }

    fn current_request_mut(&mut self) -> Option<&mut Request> {
        self.slot_mut().current_mut()
    }

    /// Offer a request. A busy worker, or one that cannot handle the media
    /// kind, hands it straight back.
    fn generate_item(&mut self, request: Request) -> Result<(), Request> {
        if self.is_busy() || !self.capabilities().supports(request.kind) {
            return Err(request);
        }

        debug!("{} took {} ({})", self.id(), request.id(), request.url);
        self.slot_mut().assign(request);
        self.submit();
        Ok(())
    }

    /// Finish the current request and report it upward.
    fn item_completed(&mut self, success: bool) -> Option<Finished> {
        let request = self.slot_mut().release()?;
        Some(Finished {
            worker: self.id(),
            request,
            success,
        })
    }

    fn on_watchdog_expired(&mut self, arm: u64) -> Option<Finished> {
        if !self.slot().watchdog().is_current(arm) {
            debug!("{} ignoring stale watchdog expiry", self.id());
            return None;
        }

        let timeout = ThumbError::Timeout(self.slot().watchdog().timeout().as_secs());
        if let Some(request) = self.current_request() {
            warn!("{} gave up on {}: {}", self.id(), request.url, timeout);
        }
        self.kill();
        self.item_completed(false)
    }

    fn handle_event(&mut self, event: WorkerEvent) -> Option<Finished> {
        match event {
            WorkerEvent::Helper {
                generation, event, ..
            } => self.on_helper_event(generation, event),
            WorkerEvent::WatchdogExpired { arm, .. } => self.on_watchdog_expired(arm),
        }
    }
}
