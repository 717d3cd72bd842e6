//! Supervision of a fixed group of processes.
//!
//! `ProcessManager` starts every process at once and then walks a one-way
//! shutdown sequence: the first process to exit (or the first operator
//! interrupt) interrupts everyone; the grace timeout (or a second interrupt)
//! kills whoever is left; the run ends once every process has exited.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

use crate::ansi::{label_color, Palette};
use crate::commands;
use crate::error::ConfigError;
use crate::output::{Label, Multiplexer, ProcessId, Sink};
use crate::process::{Exit, Process, ProcessSpec};

/// Default grace period between interrupting and killing.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for a `ProcessManager`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Shell command lines, possibly `npm:` aliases.
    pub cmds: Vec<String>,
    /// Directory the commands run from.
    pub root: PathBuf,
    /// Grace period before interrupted processes are killed.
    pub timeout: Duration,
    /// Suppresses "Starting...", "Interrupting..." and similar lines.
    pub silent: bool,
    /// Omits the label column.
    pub raw: bool,
    pub palette: Palette,
}

impl Config {
    pub fn new(cmds: Vec<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            cmds,
            root: root.into(),
            timeout: DEFAULT_TIMEOUT,
            silent: false,
            raw: false,
            palette: Palette::from_env(false),
        }
    }
}

/// Delivers operator interrupts to a running `ProcessManager`.
#[derive(Debug, Clone)]
pub struct Interrupter(mpsc::UnboundedSender<()>);

impl Interrupter {
    /// The first interrupt starts the shutdown; one during the grace period
    /// skips straight to killing.
    pub fn interrupt(&self) {
        let _ = self.0.send(());
    }
}

/// What set off the shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// A process exited on its own.
    Exited { name: String, exit: Exit },
    /// The operator asked to stop.
    Interrupted,
}

/// Outcome of `ProcessManager::run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub trigger: Trigger,
    /// Whether a second interrupt cut the grace period short.
    pub hurried: bool,
    /// Final outcome of each process, in input order.
    pub exits: Vec<(String, Exit)>,
}

impl Summary {
    /// False when the shutdown was caused by a process failing.
    pub fn success(&self) -> bool {
        match &self.trigger {
            Trigger::Interrupted => true,
            Trigger::Exited { exit, .. } => exit.success(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Running,
    Interrupting,
    Killing,
    Done,
}

/// Owns a group of processes and their shared output.
pub struct ProcessManager {
    procs: Vec<Arc<Process>>,
    timeout: Duration,
    interrupter: Interrupter,
    interrupts: mpsc::UnboundedReceiver<()>,
}

impl ProcessManager {
    /// Resolves commands and prepares every process, writing output to
    /// `sink`. Nothing is spawned if any command fails to resolve.
    pub fn new(config: Config, sink: Sink) -> Result<Self, ConfigError> {
        if config.cmds.is_empty() {
            return Err(ConfigError::NoCommands);
        }
        let root = commands::resolve_directory(&config.root)?;
        let named = commands::resolve(&root, &config.cmds)?;
        let env = commands::child_env(&root);

        let specs: Vec<ProcessSpec> = named
            .into_iter()
            .enumerate()
            .map(|(id, cmd)| ProcessSpec {
                name: cmd.name,
                cmd: cmd.cmd,
                dir: root.clone(),
                env: env.clone(),
                color: label_color(id),
                silent: config.silent,
            })
            .collect();

        let mut output = Multiplexer::new(sink, config.palette);
        if config.raw {
            output = output.raw();
        }
        for (id, spec) in specs.iter().enumerate() {
            output.connect(&Label {
                id,
                name: spec.name.clone(),
                color: spec.color,
            });
        }
        let output = Arc::new(output);
        let procs = specs
            .into_iter()
            .enumerate()
            .map(|(id, spec)| Arc::new(Process::new(id, spec, Arc::clone(&output))))
            .collect();

        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            procs,
            timeout: config.timeout,
            interrupter: Interrupter(tx),
            interrupts: rx,
        })
    }

    /// Handle for requesting a shutdown from outside.
    pub fn interrupter(&self) -> Interrupter {
        self.interrupter.clone()
    }

    pub fn names(&self) -> Vec<&str> {
        self.procs.iter().map(|p| p.name()).collect()
    }

    /// Runs every process and returns once all of them have exited.
    pub async fn run(self) -> Summary {
        let Self {
            procs,
            timeout,
            interrupter: _interrupter,
            mut interrupts,
        } = self;

        let mut exits: Vec<Option<Exit>> = vec![None; procs.len()];
        let mut runs = JoinSet::new();
        // Every process is spawned before anything can interrupt it.
        let launches: Vec<_> = procs.iter().map(|proc| proc.start()).collect();
        for (id, (proc, launch)) in procs.iter().zip(launches).enumerate() {
            let proc = Arc::clone(proc);
            runs.spawn(async move { (id, proc.finish(launch).await) });
        }

        let mut stage = Stage::Running;
        tracing::debug!(count = procs.len(), ?stage, "supervising");

        let trigger = tokio::select! {
            joined = runs.join_next() => match joined {
                Some(joined) => {
                    let id = settle(joined, &mut exits);
                    match id {
                        Some(id) => Trigger::Exited {
                            name: procs[id].name().to_string(),
                            exit: exits[id].clone().unwrap_or_else(lost),
                        },
                        None => Trigger::Exited {
                            name: String::new(),
                            exit: lost(),
                        },
                    }
                }
                None => Trigger::Interrupted,
            },
            Some(()) = interrupts.recv() => Trigger::Interrupted,
        };

        stage = advance(stage, Stage::Interrupting);
        for proc in &procs {
            proc.interrupt();
        }

        let grace = tokio::time::sleep(timeout);
        tokio::pin!(grace);
        let mut hurried = false;
        while stage == Stage::Interrupting {
            tokio::select! {
                _ = &mut grace => stage = advance(stage, Stage::Killing),
                Some(()) = interrupts.recv() => {
                    hurried = true;
                    stage = advance(stage, Stage::Killing);
                }
                joined = runs.join_next() => match joined {
                    Some(joined) => {
                        settle(joined, &mut exits);
                    }
                    None => stage = advance(stage, Stage::Done),
                },
            }
        }

        if stage == Stage::Killing {
            for proc in &procs {
                proc.kill();
            }
            while let Some(joined) = runs.join_next().await {
                settle(joined, &mut exits);
            }
            advance(stage, Stage::Done);
        }

        Summary {
            trigger,
            hurried,
            exits: procs
                .iter()
                .zip(exits)
                .map(|(proc, exit)| (proc.name().to_string(), exit.unwrap_or_else(lost)))
                .collect(),
        }
    }
}

fn advance(from: Stage, to: Stage) -> Stage {
    tracing::debug!(?from, ?to, "shutdown stage");
    to
}

/// Records a finished run, returning which process it belonged to.
fn settle(
    joined: Result<(ProcessId, Exit), JoinError>,
    exits: &mut [Option<Exit>],
) -> Option<ProcessId> {
    match joined {
        Ok((id, exit)) => {
            exits[id] = Some(exit);
            Some(id)
        }
        Err(err) => {
            tracing::error!("process task failed: {err}");
            None
        }
    }
}

fn lost() -> Exit {
    Exit::Failed("process task failed".to_string())
}
