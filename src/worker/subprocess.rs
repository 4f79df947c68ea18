use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{
    Capabilities, EventSender, Finished, HelperEvent, HelperHandle, HelperSpawner, JobSlot,
    Watchdog, Worker, WorkerEvent, WorkerId,
};
use crate::error::ThumbError;
use crate::protocol;

/// Lifecycle of the helper behind a [`SubprocessWorker`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Starting,
    Ready,
}

/// Worker backed by one long-lived helper process.
///
/// The helper is spawned on the first assignment and kept warm for the jobs
/// that follow. If it dies it is spawned again on the next assignment.
pub struct SubprocessWorker {
    id: WorkerId,
    capabilities: Capabilities,
    slot: JobSlot,
    spawner: Arc<dyn HelperSpawner>,
    events: EventSender,
    state: ProcessState,
    helper: Option<HelperHandle>,
    /// Bumped on every spawn and kill; events from older helpers are ignored
    generation: u64,
    /// The slot's request is waiting for the helper to come up
    pending_send: bool,
}

impl SubprocessWorker {
    pub fn new(
        id: WorkerId,
        spawner: Arc<dyn HelperSpawner>,
        events: EventSender,
        timeout: Duration,
    ) -> Self {
        Self {
            id,
            capabilities: Capabilities::ALL,
            slot: JobSlot::new(Watchdog::new(id, timeout, events.clone())),
            spawner,
            events,
            state: ProcessState::NotStarted,
            helper: None,
            generation: 0,
            pending_send: false,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn start_helper(&mut self) {
        self.generation += 1;
        self.state = ProcessState::Starting;

        match self.spawner.spawn(self.id, self.generation, self.events.clone()) {
            Ok(handle) => self.helper = Some(handle),
            Err(e) => {
                error!("{} could not start its helper: {:#}", self.id, e);
                // Reported through the event loop like any other helper news
                let _ = self.events.send(WorkerEvent::Helper {
                    worker: self.id,
                    generation: self.generation,
                    event: HelperEvent::SpawnFailed(format!("{e:#}")),
                });
            }
        }
    }

    fn send_current(&mut self) {
        let Some(request) = self.slot.current() else {
            return;
        };
        let line = protocol::encode_request(&request.url, &request.dest, request.frame.as_deref());
        debug!("{} -> {}", self.id, line);

        let sent = self
            .helper
            .as_ref()
            .is_some_and(|helper| helper.send_line(line));
        if !sent {
            // The exit notification is already on its way and fails the job
            warn!("{} helper went away before {} was sent", self.id, request.id());
        }
    }

    fn reset_process(&mut self) {
        self.state = ProcessState::NotStarted;
        self.helper = None;
        self.pending_send = false;
    }

    fn fail_current(&mut self, reason: ThumbError) -> Option<Finished> {
        let request = self.slot.current()?;
        warn!("{} failed {}: {}", self.id, request.url, reason);
        self.item_completed(false)
    }
}

impl Worker for SubprocessWorker {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn slot(&self) -> &JobSlot {
        &self.slot
    }

    fn slot_mut(&mut self) -> &mut JobSlot {
        &mut self.slot
    }

    fn submit(&mut self) {
        match self.state {
            ProcessState::NotStarted => {
                self.pending_send = true;
                self.start_helper();
            }
            ProcessState::Starting => self.pending_send = true,
            ProcessState::Ready => self.send_current(),
        }
    }

    fn kill(&mut self) {
        if let Some(helper) = self.helper.take() {
            info!("🛑 Killing helper of {} (PID: {:?})", self.id, helper.pid());
            helper.kill();
        }
        self.generation += 1;
        self.reset_process();
    }

    fn on_helper_event(&mut self, generation: u64, event: HelperEvent) -> Option<Finished> {
        if generation != self.generation {
            debug!(
                "{} dropping {:?} from old helper generation {}",
                self.id, event, generation
            );
            return None;
        }

        match event {
            HelperEvent::Started => {
                self.state = ProcessState::Ready;
                if self.pending_send {
                    self.pending_send = false;
                    self.send_current();
                }
                None
            }
            HelperEvent::Line(line) => {
                if !self.is_busy() {
                    warn!("{} unsolicited helper output: {:?}", self.id, line);
                    return None;
                }
                match protocol::parse_response(&line) {
                    Ok(()) => self.item_completed(true),
                    Err(reason) => self.fail_current(reason),
                }
            }
            HelperEvent::Exited(code) => {
                self.reset_process();
                if self.is_busy() {
                    self.fail_current(ThumbError::ProcessDied(code))
                } else {
                    info!("{} helper exited while idle (code: {:?})", self.id, code);
                    None
                }
            }
            HelperEvent::SpawnFailed(reason) => {
                self.reset_process();
                self.fail_current(ThumbError::SpawnFailed(reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Extra, Request};
    use crate::worker::testing::FakeSpawner;
    use std::path::PathBuf;
    use tokio::sync::mpsc;

    const TIMEOUT: Duration = Duration::from_secs(15);

    fn request(url: &str) -> Request {
        Request::new(url, PathBuf::from("/t/x.jpg"), None, None, Extra::new())
    }

    fn helper(worker: &SubprocessWorker, event: HelperEvent) -> WorkerEvent {
        WorkerEvent::Helper {
            worker: worker.id(),
            generation: worker.generation(),
            event,
        }
    }

    #[tokio::test]
    async fn test_lazy_spawn_and_buffered_send() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let spawner = FakeSpawner::manual();
        let mut worker = SubprocessWorker::new(WorkerId(0), spawner.clone(), tx, TIMEOUT);
        assert_eq!(worker.state(), ProcessState::NotStarted);
        assert_eq!(spawner.spawn_count(), 0);

        worker.generate_item(request("/m/a.jpg")).unwrap();
        assert_eq!(worker.state(), ProcessState::Starting);
        assert_eq!(spawner.spawn_count(), 1);
        assert!(spawner.lines(WorkerId(0)).is_empty());
        assert!(worker.slot().watchdog().is_armed());

        let started = helper(&worker, HelperEvent::Started);
        assert!(worker.handle_event(started).is_none());
        assert_eq!(worker.state(), ProcessState::Ready);
        assert_eq!(spawner.lines(WorkerId(0)), ["GEN|/m/a.jpg|/t/x.jpg|"]);
    }

    #[tokio::test]
    async fn test_busy_worker_rejects() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut worker = SubprocessWorker::new(WorkerId(0), FakeSpawner::ready(), tx, TIMEOUT);

        worker.generate_item(request("/m/a.jpg")).unwrap();
        let rejected = worker.generate_item(request("/m/b.jpg")).unwrap_err();
        assert_eq!(rejected.url, "/m/b.jpg");
        assert_eq!(worker.current_request().unwrap().url, "/m/a.jpg");
    }

    #[tokio::test]
    async fn test_capabilities_are_enforced() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut worker = SubprocessWorker::new(WorkerId(0), FakeSpawner::ready(), tx, TIMEOUT)
            .with_capabilities(Capabilities {
                can_do_image: true,
                can_do_video: false,
            });

        assert!(worker.generate_item(request("/m/movie.mkv")).is_err());
        assert!(!worker.is_busy());
        assert!(worker.generate_item(request("/m/cover.png")).is_ok());
    }

    #[tokio::test]
    async fn test_ok_and_error_responses() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let spawner = FakeSpawner::ready();
        let mut worker = SubprocessWorker::new(WorkerId(0), spawner.clone(), tx, TIMEOUT);

        worker.generate_item(request("/m/a.jpg")).unwrap();
        worker.handle_event(helper(&worker, HelperEvent::Started));
        let done = worker
            .handle_event(helper(&worker, HelperEvent::Line("OK".to_string())))
            .unwrap();
        assert!(done.success);
        assert_eq!(done.request.url, "/m/a.jpg");
        assert!(!worker.is_busy());
        assert!(!worker.slot().watchdog().is_armed());

        // Helper stays warm for the next job
        worker.generate_item(request("/m/b.jpg")).unwrap();
        assert_eq!(spawner.spawn_count(), 1);
        let done = worker
            .handle_event(helper(&worker, HelperEvent::Line("ERR broken".to_string())))
            .unwrap();
        assert!(!done.success);
        assert_eq!(
            spawner.lines(WorkerId(0)),
            ["GEN|/m/a.jpg|/t/x.jpg|", "GEN|/m/b.jpg|/t/x.jpg|"]
        );
    }

    #[tokio::test]
    async fn test_helper_death_fails_job_and_respawns() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let spawner = FakeSpawner::ready();
        let mut worker = SubprocessWorker::new(WorkerId(0), spawner.clone(), tx, TIMEOUT);

        worker.generate_item(request("/m/a.jpg")).unwrap();
        worker.handle_event(helper(&worker, HelperEvent::Started));
        let done = worker
            .handle_event(helper(&worker, HelperEvent::Exited(Some(139))))
            .unwrap();
        assert!(!done.success);
        assert_eq!(worker.state(), ProcessState::NotStarted);

        worker.generate_item(request("/m/b.jpg")).unwrap();
        assert_eq!(spawner.spawn_count(), 2);
        assert_eq!(worker.state(), ProcessState::Starting);
    }

    #[tokio::test]
    async fn test_idle_exit_is_quiet() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut worker = SubprocessWorker::new(WorkerId(0), FakeSpawner::ready(), tx, TIMEOUT);

        worker.generate_item(request("/m/a.jpg")).unwrap();
        worker.handle_event(helper(&worker, HelperEvent::Started));
        worker.handle_event(helper(&worker, HelperEvent::Line("OK".to_string())));

        assert!(worker
            .handle_event(helper(&worker, HelperEvent::Exited(Some(0))))
            .is_none());
        assert_eq!(worker.state(), ProcessState::NotStarted);
    }

    #[tokio::test]
    async fn test_spawn_failure_fails_job() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut worker = SubprocessWorker::new(WorkerId(0), FakeSpawner::failing(), tx, TIMEOUT);

        worker.generate_item(request("/m/a.jpg")).unwrap();
        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            WorkerEvent::Helper {
                event: HelperEvent::SpawnFailed(_),
                ..
            }
        ));

        let done = worker.handle_event(event).unwrap();
        assert!(!done.success);
        assert_eq!(worker.state(), ProcessState::NotStarted);
    }

    #[tokio::test]
    async fn test_kill_is_safe_when_idle_and_ignores_old_output() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let spawner = FakeSpawner::ready();
        let mut worker = SubprocessWorker::new(WorkerId(0), spawner.clone(), tx, TIMEOUT);

        worker.kill();
        assert_eq!(worker.state(), ProcessState::NotStarted);

        worker.generate_item(request("/m/a.jpg")).unwrap();
        let old_started = helper(&worker, HelperEvent::Started);
        worker.handle_event(old_started);
        let old_answer = helper(&worker, HelperEvent::Line("OK".to_string()));

        worker.kill();
        assert!(spawner.was_killed(WorkerId(0)));
        // Still holding the job; the killed helper's answer does not count
        assert!(worker.handle_event(old_answer).is_none());
        assert!(worker.is_busy());
        assert!(worker.item_completed(false).is_some());
    }
}
