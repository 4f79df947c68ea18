//! In-memory helper spawner for exercising workers and the pool without
//! real processes.

use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::{
    EventSender, HelperEvent, HelperHandle, HelperInput, HelperSpawner, WorkerEvent, WorkerId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Nothing is reported; the test delivers `Started` itself
    Manual,
    /// `Started` is posted as soon as the helper is spawned
    AutoStart,
    /// Every spawn fails
    Failing,
}

struct FakeHelper {
    worker: WorkerId,
    generation: u64,
    input: mpsc::UnboundedReceiver<HelperInput>,
    lines: Vec<String>,
    killed: bool,
}

impl FakeHelper {
    fn drain(&mut self) {
        while let Ok(message) = self.input.try_recv() {
            match message {
                HelperInput::Line(line) => self.lines.push(line),
                HelperInput::Kill => self.killed = true,
            }
        }
    }
}

pub(crate) struct FakeSpawner {
    mode: Mode,
    helpers: Mutex<Vec<FakeHelper>>,
}

impl FakeSpawner {
    fn with_mode(mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            helpers: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn manual() -> Arc<Self> {
        Self::with_mode(Mode::Manual)
    }

    pub(crate) fn ready() -> Arc<Self> {
        Self::with_mode(Mode::AutoStart)
    }

    pub(crate) fn failing() -> Arc<Self> {
        Self::with_mode(Mode::Failing)
    }

    pub(crate) fn spawn_count(&self) -> usize {
        self.helpers.lock().unwrap().len()
    }

    /// Every line sent to any helper of `worker`, oldest first
    pub(crate) fn lines(&self, worker: WorkerId) -> Vec<String> {
        let mut helpers = self.helpers.lock().unwrap();
        helpers
            .iter_mut()
            .filter(|helper| helper.worker == worker)
            .flat_map(|helper| {
                helper.drain();
                helper.lines.clone()
            })
            .collect()
    }

    /// Whether the newest helper of `worker` was told to die
    pub(crate) fn was_killed(&self, worker: WorkerId) -> bool {
        let mut helpers = self.helpers.lock().unwrap();
        helpers
            .iter_mut()
            .rev()
            .find(|helper| helper.worker == worker)
            .map(|helper| {
                helper.drain();
                helper.killed
            })
            .unwrap_or(false)
    }

    /// Generation of the newest helper of `worker`
    pub(crate) fn generation(&self, worker: WorkerId) -> Option<u64> {
        let helpers = self.helpers.lock().unwrap();
        helpers
            .iter()
            .rev()
            .find(|helper| helper.worker == worker)
            .map(|helper| helper.generation)
    }
}

impl HelperSpawner for FakeSpawner {
    fn spawn(
        &self,
        worker: WorkerId,
        generation: u64,
        events: EventSender,
    ) -> Result<HelperHandle> {
        if self.mode == Mode::Failing {
            return Err(anyhow!("no such helper"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.helpers.lock().unwrap().push(FakeHelper {
            worker,
            generation,
            input: rx,
            lines: Vec::new(),
            killed: false,
        });

        if self.mode == Mode::AutoStart {
            let _ = events.send(WorkerEvent::Helper {
                worker,
                generation,
                event: HelperEvent::Started,
            });
        }

        Ok(HelperHandle::new(tx, Some(4242)))
    }
}
