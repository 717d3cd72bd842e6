//! Pseudo-terminal pairs bound as a child's standard streams.

use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::process::Stdio;

use nix::pty::{openpty, Winsize};
use tokio::process::Command;

/// Size reported to children that ask their terminal for dimensions.
const WINDOW: Winsize = Winsize {
    ws_row: 24,
    ws_col: 80,
    ws_xpixel: 0,
    ws_ypixel: 0,
};

/// A master/slave pseudo-terminal pair.
///
/// Both ends start out empty; `open` allocates them and `close` drops them.
#[derive(Debug, Default)]
pub struct PtyChannel {
    master: Option<OwnedFd>,
    tty: Option<OwnedFd>,
}

impl PtyChannel {
    /// Allocates a fresh pair, replacing (and closing) any previous one.
    pub fn open(&mut self) -> io::Result<()> {
        let pair = openpty(Some(&WINDOW), None).map_err(io::Error::from)?;
        // openpty leaves both descriptors inheritable; siblings spawned later
        // must not hold this terminal open.
        set_cloexec(&pair.master)?;
        set_cloexec(&pair.slave)?;
        self.master = Some(pair.master);
        self.tty = Some(pair.slave);
        Ok(())
    }

    /// Binds stdin, stdout and stderr of `command` to the terminal side and
    /// makes the child a session leader with that terminal as its
    /// controlling tty, so group signals reach everything it forks.
    pub fn bind(&self, command: &mut Command) -> io::Result<()> {
        let tty = self.tty.as_ref().ok_or_else(not_open)?;
        command
            .stdin(Stdio::from(tty.try_clone()?))
            .stdout(Stdio::from(tty.try_clone()?))
            .stderr(Stdio::from(tty.try_clone()?));
        // SAFETY: only async-signal-safe calls between fork and exec.
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                if libc::ioctl(0, libc::TIOCSCTTY, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
        Ok(())
    }

    /// Returns an independent handle to the master side for reading.
    pub fn reader(&self) -> io::Result<File> {
        let master = self.master.as_ref().ok_or_else(not_open)?;
        Ok(File::from(master.try_clone()?))
    }

    /// Closes both ends. Safe to call repeatedly or on a never-opened pair.
    ///
    /// Handles returned by `reader` stay valid; they see end-of-stream once
    /// the child and its descendants have closed the terminal side too.
    pub fn close(&mut self) {
        self.master.take();
        self.tty.take();
    }
}

fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
    // SAFETY: fd is a live descriptor owned by the caller.
    if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn not_open() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "pseudo-terminal is not open")
}
