use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tracing::trace;

use super::{EventSender, WorkerEvent, WorkerId};

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    arm: u64,
}

/// Per-worker response timer.
///
/// The timer task is spawned on the first `start()` and re-armed through a
/// watch channel afterwards. Each arming fires at most once, and every
/// expiry carries the arm number it belongs to so late deliveries can be
/// told apart from the current one.
#[derive(Debug)]
pub struct Watchdog {
    worker: WorkerId,
    timeout: Duration,
    events: EventSender,
    timer: Option<watch::Sender<Option<Deadline>>>,
    arm: u64,
    armed: bool,
}

impl Watchdog {
    pub fn new(worker: WorkerId, timeout: Duration, events: EventSender) -> Self {
        Self {
            worker,
            timeout,
            events,
            timer: None,
            arm: 0,
            armed: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Whether an expiry for `arm` belongs to the running arming
    pub fn is_current(&self, arm: u64) -> bool {
        self.armed && self.arm == arm
    }

    /// (Re)start the countdown from now
    pub fn start(&mut self) {
        self.arm += 1;
        self.armed = true;
        let deadline = Deadline {
            at: Instant::now() + self.timeout,
            arm: self.arm,
        };

        match &self.timer {
            Some(timer) => {
                timer.send_replace(Some(deadline));
            }
            None => {
                let (timer, deadlines) = watch::channel(Some(deadline));
                tokio::spawn(run_timer(self.worker, deadlines, self.events.clone()));
                self.timer = Some(timer);
            }
        }
    }

    pub fn stop(&mut self) {
        self.armed = false;
        if let Some(timer) = &self.timer {
            timer.send_replace(None);
        }
    }
}

/// Runs until the owning `Watchdog` is dropped.
async fn run_timer(
    worker: WorkerId,
    mut deadlines: watch::Receiver<Option<Deadline>>,
    events: EventSender,
) {
    loop {
        let current = *deadlines.borrow_and_update();
        let Some(deadline) = current else {
            if deadlines.changed().await.is_err() {
                return;
            }
            continue;
        };

        let expired = tokio::select! {
            _ = time::sleep_until(deadline.at) => true,
            changed = deadlines.changed() => {
                if changed.is_err() {
                    return;
                }
                false
            }
        };

        if expired {
            trace!("{} watchdog expired (arm {})", worker, deadline.arm);
            let event = WorkerEvent::WatchdogExpired {
                worker,
                arm: deadline.arm,
            };
            if events.send(event).is_err() {
                return;
            }
            // Stay quiet until re-armed or stopped
            if deadlines.changed().await.is_err() {
                return;
            }
        }
    }
}
