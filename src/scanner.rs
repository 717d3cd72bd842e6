//! Newline-delimited record scanning over blocking byte streams.

use std::io::{self, BufRead};
use std::ops::ControlFlow;

/// Reads `reader` to the end, invoking `on_line` once per complete line.
///
/// The line terminator (`\n`, and a preceding `\r` if present) is not part of
/// the slice handed to the callback. A trailing partial line is delivered when
/// the stream ends. End-of-stream and a closed handle both terminate the scan
/// with `Ok(())`; returning `ControlFlow::Break` from the callback does too.
pub fn scan_lines<R, F>(mut reader: R, mut on_line: F) -> io::Result<()>
where
    R: BufRead,
    F: FnMut(&[u8]) -> ControlFlow<()>,
{
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        let read = match reader.read_until(b'\n', &mut buf) {
            Ok(n) => n,
            Err(err) if is_closed(&err) => {
                // read_until keeps whatever it consumed before failing.
                if !buf.is_empty() {
                    let _ = on_line(trim_terminator(&buf));
                }
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        if read == 0 {
            return Ok(());
        }
        if on_line(trim_terminator(&buf)).is_break() {
            return Ok(());
        }
    }
}

/// Whether `err` means the other side of the handle went away.
///
/// A pty master reports `EIO` once every slave descriptor is closed.
fn is_closed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof
    ) || err.raw_os_error() == Some(libc::EIO)
}

fn trim_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
