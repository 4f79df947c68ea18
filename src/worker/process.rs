use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{EventSender, HelperEvent, WorkerEvent, WorkerId};

/// How long to keep reading a dead helper's stdout for its last words
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Messages from a worker to the task driving its helper
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelperInput {
    Line(String),
    Kill,
}

/// Worker-side handle to a running helper.
///
/// Dropping the handle kills the helper.
#[derive(Debug)]
pub struct HelperHandle {
    input: mpsc::UnboundedSender<HelperInput>,
    pid: Option<u32>,
}

impl HelperHandle {
    pub fn new(input: mpsc::UnboundedSender<HelperInput>, pid: Option<u32>) -> Self {
        Self { input, pid }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Queue a line for the helper's stdin. False if the helper is gone.
    pub fn send_line(&self, line: String) -> bool {
        self.input.send(HelperInput::Line(line)).is_ok()
    }

    pub fn kill(&self) {
        let _ = self.input.send(HelperInput::Kill);
    }
}

/// Starts helper processes for workers.
///
/// Every event about the spawned helper must be posted on `events`, tagged
/// with `worker` and `generation`, starting with [`HelperEvent::Started`] and
/// ending with [`HelperEvent::Exited`].
pub trait HelperSpawner: Send + Sync {
    fn spawn(
        &self,
        worker: WorkerId,
        generation: u64,
        events: EventSender,
    ) -> Result<HelperHandle>;
}

/// Command line used to launch a helper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperProgram {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Run the helper with the lowest scheduling priority
    pub background: bool,
}

impl HelperProgram {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            background: false,
        }
    }

    fn build(&self) -> Command {
        let mut cmd = if self.background {
            let mut c = Command::new("nice");
            c.args(["-n", "19"]);
            c.arg(&self.program);
            c
        } else {
            Command::new(&self.program)
        };
        cmd.args(&self.args);
        cmd
    }
}

/// Spawns helpers as real child processes talking over stdio
#[derive(Debug, Clone)]
pub struct CommandSpawner {
    program: HelperProgram,
}

impl CommandSpawner {
    pub fn new(program: HelperProgram) -> Self {
        Self { program }
    }
}

impl HelperSpawner for CommandSpawner {
    fn spawn(
        &self,
        worker: WorkerId,
        generation: u64,
        events: EventSender,
    ) -> Result<HelperHandle> {
        let mut cmd = self.program.build();
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Spawning helper for {}: {:?}", worker, cmd);
        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to run {:?}", self.program.program))?;

        let stdin = child.stdin.take().ok_or_else(|| anyhow!("helper stdin not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("helper stdout not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("helper stderr not piped"))?;

        let pid = child.id();
        info!("🚀 Started helper for {} (PID: {:?})", worker, pid);

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let driver = HelperDriver {
            worker,
            generation,
            events,
        };
        tokio::spawn(driver.run(child, stdin, stdout, stderr, input_rx));

        Ok(HelperHandle::new(input_tx, pid))
    }
}

struct HelperDriver {
    worker: WorkerId,
    generation: u64,
    events: EventSender,
}

impl HelperDriver {
    fn emit(&self, event: HelperEvent) {
        let _ = self.events.send(WorkerEvent::Helper {
            worker: self.worker,
            generation: self.generation,
            event,
        });
    }

    /// Owns the child for its whole life: feeds stdin, forwards stdout lines,
    /// logs stderr, and reports the exit.
    async fn run(
        self,
        mut child: Child,
        stdin: ChildStdin,
        stdout: ChildStdout,
        stderr: ChildStderr,
        mut input: mpsc::UnboundedReceiver<HelperInput>,
    ) {
        self.emit(HelperEvent::Started);

        let mut stdin = Some(stdin);
        let mut stdout = BufReader::new(stdout).lines();
        let mut stderr = BufReader::new(stderr).lines();
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut input_open = true;

        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                line = stdout.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => self.emit(HelperEvent::Line(line)),
                    Ok(None) => stdout_open = false,
                    Err(e) => {
                        warn!("{} helper stdout unreadable: {}", self.worker, e);
                        stdout_open = false;
                    }
                },
                line = stderr.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => debug!("{} helper: {}", self.worker, line),
                    _ => stderr_open = false,
                },
                message = input.recv(), if input_open => match message {
                    Some(HelperInput::Line(line)) => {
                        if let Some(pipe) = stdin.as_mut() {
                            if let Err(e) = write_line(pipe, &line).await {
                                warn!("{} helper stdin closed: {}", self.worker, e);
                                stdin = None;
                            }
                        }
                    }
                    Some(HelperInput::Kill) | None => {
                        input_open = false;
                        stdin = None;
                        if let Err(e) = child.start_kill() {
                            debug!("{} helper already gone: {}", self.worker, e);
                        }
                    }
                },
            }
        };

        // The helper may have answered right before exiting
        if stdout_open {
            let drain = async {
                while let Ok(Some(line)) = stdout.next_line().await {
                    self.emit(HelperEvent::Line(line));
                }
            };
            let _ = tokio::time::timeout(DRAIN_TIMEOUT, drain).await;
        }

        let code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                warn!("{} could not reap helper: {}", self.worker, e);
                None
            }
        };
        info!("{} helper exited (code: {:?})", self.worker, code);
        self.emit(HelperEvent::Exited(code));
    }
}

async fn write_line(pipe: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    pipe.write_all(line.as_bytes()).await?;
    pipe.write_all(b"\n").await?;
    pipe.flush().await
}
