//! Merges the output of every supervised process into one labeled stream.
//!
//! Each process gets its own pseudo-terminal and reader thread. Readers hand
//! complete lines to `Multiplexer::write_line`, which composes the labeled
//! record and writes it to the shared sink while holding the sink lock, so
//! records from different processes never interleave mid-line.

use std::collections::HashMap;
use std::fmt::Display;
use std::io::{self, BufReader, Write};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::oneshot;

use crate::ansi::Palette;
use crate::pty::PtyChannel;
use crate::scanner::scan_lines;

/// Prefix the shell puts on its own diagnostics, e.g. `/bin/sh: foo: not found`.
const SHELL_ERROR_PREFIX: &[u8] = b"/bin/sh: ";

/// Index of a process within its manager.
pub type ProcessId = usize;

/// Identity of a process as it appears in the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub id: ProcessId,
    pub name: String,
    pub color: u8,
}

/// Destination for multiplexed output.
pub type Sink = Box<dyn Write + Send>;

/// Fan-in of per-process output onto a single sink.
pub struct Multiplexer {
    palette: Palette,
    show_labels: bool,
    max_name_len: usize,
    pipes: Mutex<HashMap<ProcessId, PtyChannel>>,
    sink: Mutex<Sink>,
}

impl Multiplexer {
    pub fn new(sink: Sink, palette: Palette) -> Self {
        Self {
            palette,
            show_labels: true,
            max_name_len: 0,
            pipes: Mutex::new(HashMap::new()),
            sink: Mutex::new(sink),
        }
    }

    /// Writes payloads only, without the label column.
    pub fn raw(mut self) -> Self {
        self.show_labels = false;
        self
    }

    pub fn palette(&self) -> Palette {
        self.palette
    }

    /// Registers a process ahead of its start and widens the label column
    /// if its name is the longest seen so far.
    pub fn connect(&mut self, label: &Label) {
        self.max_name_len = self.max_name_len.max(display_width(&label.name));
        self.pipes
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(label.id, PtyChannel::default());
    }

    /// Opens a pseudo-terminal for `label`, binds it to `command`'s standard
    /// streams and starts a reader thread that forwards every complete line
    /// to `write_line`. Must be called before `command` is spawned.
    pub fn pipe_output(self: &Arc<Self>, label: &Label, command: &mut Command) -> io::Result<Reader> {
        let master = {
            let mut pipes = lock(&self.pipes);
            let channel = pipes.entry(label.id).or_default();
            channel.open()?;
            channel.bind(command)?;
            channel.reader()?
        };

        let (done_tx, done_rx) = oneshot::channel();
        let output = Arc::clone(self);
        let owner = label.clone();
        thread::Builder::new()
            .name(format!("tandem-{}", label.id))
            .spawn(move || {
                let result = scan_lines(BufReader::new(master), |line| {
                    output.write_line(&owner, line);
                    ControlFlow::Continue(())
                });
                tracing::trace!(process = %owner.name, "output reader finished");
                let _ = done_tx.send(result);
            })?;
        Ok(Reader { done: done_rx })
    }

    /// Closes both ends of the process's pseudo-terminal, if it has one.
    pub fn close_pipe(&self, label: &Label) {
        if let Some(channel) = lock(&self.pipes).get_mut(&label.id) {
            channel.close();
        }
    }

    /// Writes one labeled record for `label`.
    pub fn write_line(&self, label: &Label, line: &[u8]) {
        let payload = line.strip_prefix(SHELL_ERROR_PREFIX).unwrap_or(line);
        let mut record = Vec::with_capacity(payload.len() + self.max_name_len + 32);
        if self.show_labels {
            let padding = self.max_name_len.saturating_sub(display_width(&label.name)) + 1;
            let padded = format!("{}{}", label.name, " ".repeat(padding));
            record.extend_from_slice(self.palette.label(&padded, label.color).as_bytes());
            record.push(b' ');
        }
        record.extend_from_slice(payload);
        record.push(b'\n');

        let mut sink = lock(&self.sink);
        if let Err(err) = sink.write_all(&record).and_then(|()| sink.flush()) {
            tracing::debug!(process = %label.name, "dropping output line: {err}");
        }
    }

    /// Writes `err` as a red record for `label`.
    pub fn write_err(&self, label: &Label, err: &dyn Display) {
        let text = self.palette.red(&err.to_string());
        self.write_line(label, text.as_bytes());
    }
}

/// Completion of a process's output reader thread.
#[derive(Debug)]
pub struct Reader {
    done: oneshot::Receiver<io::Result<()>>,
}

impl Reader {
    /// Waits up to `window` for the reader to reach end-of-stream.
    ///
    /// Returns `None` if the window elapsed first, for example because a
    /// descendant still holds the terminal open.
    pub async fn drain(self, window: Duration) -> Option<io::Result<()>> {
        match tokio::time::timeout(window, self.done).await {
            Ok(Ok(result)) => Some(result),
            Ok(Err(_)) => Some(Ok(())),
            Err(_) => None,
        }
    }
}

fn display_width(name: &str) -> usize {
    name.chars().count()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
