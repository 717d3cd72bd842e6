//! A single supervised command.
//!
//! A `Process` runs its command line through `/bin/sh -c` inside a fresh
//! session, so every signal it sends targets the whole process group and
//! reaches whatever the command forked.

use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};

use crate::output::{Label, Multiplexer, ProcessId, Reader};

/// Shell used to interpret command lines.
pub const SHELL: &str = "/bin/sh";

/// How long a finished process waits for its remaining output to be read.
const DRAIN_WINDOW: Duration = Duration::from_millis(500);

/// Specification for a process to be run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Display name, already deduplicated.
    pub name: String,
    /// Shell command line.
    pub cmd: String,
    /// Working directory.
    pub dir: PathBuf,
    /// Variables set on top of the inherited environment.
    pub env: HashMap<OsString, OsString>,
    /// 256-color code for the label.
    pub color: u8,
    /// Suppresses lifecycle status lines.
    pub silent: bool,
}

/// Where a process is in its one-way lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    NotStarted,
    Running { pid: u32 },
    Exited,
}

/// How a process finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    /// Exited with status 0.
    Success,
    /// Exited with a non-zero status.
    Code(i32),
    /// Terminated by a signal.
    Signal(i32),
    /// Never ran, or could not be waited on.
    Failed(String),
}

impl Exit {
    pub fn success(&self) -> bool {
        matches!(self, Exit::Success)
    }
}

impl From<ExitStatus> for Exit {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(0), _) => Exit::Success,
            (Some(code), _) => Exit::Code(code),
            (None, Some(signal)) => Exit::Signal(signal),
            (None, None) => Exit::Failed(status.to_string()),
        }
    }
}

/// Result of `Process::start`, consumed by `Process::finish`.
pub struct Launch(Result<(Child, Reader), Exit>);

/// One supervised command.
pub struct Process {
    spec: ProcessSpec,
    label: Label,
    output: Arc<Multiplexer>,
    state: Mutex<Liveness>,
}

impl Process {
    /// Creates a process whose label was already connected to `output`.
    pub fn new(id: ProcessId, spec: ProcessSpec, output: Arc<Multiplexer>) -> Self {
        let label = Label {
            id,
            name: spec.name.clone(),
            color: spec.color,
        };
        Self {
            spec,
            label,
            output,
            state: Mutex::new(Liveness::NotStarted),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn liveness(&self) -> Liveness {
        *lock(&self.state)
    }

    /// True once started and until its exit status has been collected.
    pub fn running(&self) -> bool {
        matches!(self.liveness(), Liveness::Running { .. })
    }

    /// Runs the command to completion and reports how it ended.
    pub async fn run(&self) -> Exit {
        let launch = self.start();
        self.finish(launch).await
    }

    /// Opens the process's terminal and spawns the command without waiting
    /// for it. On return the process is either running or already exited.
    pub fn start(&self) -> Launch {
        let mut command = self.command();
        let reader = match self.output.pipe_output(&self.label, &mut command) {
            Ok(reader) => reader,
            Err(err) => {
                self.output.close_pipe(&self.label);
                *lock(&self.state) = Liveness::Exited;
                return Launch(Err(Exit::Failed(format!(
                    "failed to open pseudo-terminal: {err}"
                ))));
            }
        };
        if !self.spec.silent {
            self.write_status("Starting...");
        }

        let spawned = {
            let mut state = lock(&self.state);
            let spawned = command.spawn();
            *state = match spawned.as_ref().ok().and_then(|child| child.id()) {
                Some(pid) => Liveness::Running { pid },
                None => Liveness::Exited,
            };
            spawned
        };
        // The command keeps copies of the terminal side until it is dropped.
        drop(command);
        match spawned {
            Ok(child) => {
                tracing::debug!(process = %self.spec.name, pid = ?child.id(), "spawned");
                Launch(Ok((child, reader)))
            }
            Err(err) => {
                self.output.close_pipe(&self.label);
                tracing::debug!(process = %self.spec.name, "spawn failed: {err}");
                Launch(Err(Exit::Failed(err.to_string())))
            }
        }
    }

    /// Waits for a launched process to exit, drains its output and writes
    /// the closing status line.
    pub async fn finish(&self, launch: Launch) -> Exit {
        let exit = match launch.0 {
            Ok((child, reader)) => self.wait(child, reader).await,
            Err(exit) => exit,
        };
        self.report(&exit);
        exit
    }

    async fn wait(&self, mut child: Child, reader: Reader) -> Exit {
        let status = child.wait().await;
        *lock(&self.state) = Liveness::Exited;
        self.output.close_pipe(&self.label);
        self.report_drain(reader.drain(DRAIN_WINDOW).await);
        match status {
            Ok(status) => status.into(),
            Err(err) => Exit::Failed(err.to_string()),
        }
    }

    /// A read error on the terminal becomes an error line for this process.
    fn report_drain(&self, drained: Option<io::Result<()>>) {
        match drained {
            Some(Ok(())) => {}
            Some(Err(err)) => self.output.write_err(&self.label, &err),
            None => tracing::debug!(process = %self.spec.name, "terminal still held open after exit"),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(SHELL);
        command
            .arg("-c")
            .arg(&self.spec.cmd)
            .current_dir(&self.spec.dir)
            .envs(&self.spec.env)
            .kill_on_drop(true);
        command
    }

    fn report(&self, exit: &Exit) {
        match exit {
            Exit::Success => {
                if !self.spec.silent {
                    self.write_status("Process exited");
                }
            }
            // Usually the shell itself failing, e.g. a command it could not find.
            Exit::Code(1) => self.output.write_err(&self.label, &"exit status 1"),
            Exit::Code(code) => self.write_status(&format!("exit status {code}")),
            Exit::Signal(_) if self.spec.silent => {}
            Exit::Signal(signal) => {
                let name = Signal::try_from(*signal)
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_else(|_| signal.to_string());
                self.write_status(&format!("terminated by {name}"));
            }
            Exit::Failed(err) => self.output.write_err(&self.label, err),
        }
    }

    /// Sends SIGINT to the process group. No-op unless running.
    pub fn interrupt(&self) {
        self.escalate("Interrupting...", Signal::SIGINT);
    }

    /// Sends SIGKILL to the process group. No-op unless running.
    pub fn kill(&self) {
        self.escalate("Killing...", Signal::SIGKILL);
    }

    fn escalate(&self, status: &str, signal: Signal) {
        let Liveness::Running { pid } = self.liveness() else {
            return;
        };
        tracing::debug!(process = %self.spec.name, pid, signal = signal.as_str(), "signaling process group");
        // Signal first so a slow sink never delays delivery.
        let sent = killpg(Pid::from_raw(pid as i32), signal);
        if !self.spec.silent {
            self.write_status(status);
        }
        if let Err(errno) = sent {
            self.output.write_err(
                &self.label,
                &format!("failed to send {} to process group {pid}: {errno}", signal.as_str()),
            );
        }
    }

    fn write_status(&self, text: &str) {
        let text = self.output.palette().dim(text);
        self.output.write_line(&self.label, text.as_bytes());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
