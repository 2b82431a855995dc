//! Supervised child processes with line-oriented output
//!
//! [`ProcessHandle`] owns one spawned child. Its piped output streams are
//! decoded into lines by background reader tasks and delivered through a
//! single [`OutputLines`] stream, which ends once the child closes every piped
//! stream. Callers must reach either [`ProcessHandle::wait`] or
//! [`ProcessHandle::terminate`]; a handle dropped without either sends the
//! termination signal itself.

use crate::error::{Error, Result};
use futures::{Stream, StreamExt};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::task::{Context, Poll};
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, FramedRead};
use tracing::{debug, trace, warn};

/// Buffered lines per process before the reader tasks apply backpressure
const LINE_BUFFER: usize = 1024;

/// Which child streams feed [`OutputLines`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputMode {
    /// Stdout and stderr interleaved in arrival order
    Merged,
    /// Stdout only; stderr is discarded
    Stdout,
    /// Stderr only; stdout is discarded
    Stderr,
}

impl OutputMode {
    fn stdout(self) -> Stdio {
        match self {
            OutputMode::Merged | OutputMode::Stdout => Stdio::piped(),
            OutputMode::Stderr => Stdio::null(),
        }
    }

    fn stderr(self) -> Stdio {
        match self {
            OutputMode::Merged | OutputMode::Stderr => Stdio::piped(),
            OutputMode::Stdout => Stdio::null(),
        }
    }
}

/// Lazy, finite sequence of decoded output lines
///
/// Produced once per process by [`ProcessHandle::take_lines`]; it cannot be
/// restarted.
#[derive(Debug)]
pub struct OutputLines {
    rx: mpsc::Receiver<String>,
}

impl OutputLines {
    /// Next line, or `None` once the child has closed its output
    pub async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Consume the remaining lines in the background without inspecting them
    ///
    /// Keeps the child's pipes flowing after the caller has stopped reading.
    /// The task resolves to the number of lines discarded.
    pub fn drain_in_background(mut self, label: String) -> JoinHandle<usize> {
        tokio::spawn(async move {
            let mut discarded = 0;
            while let Some(line) = self.rx.recv().await {
                trace!(process = %label, "{}", line);
                discarded += 1;
            }
            discarded
        })
    }
}

impl Stream for OutputLines {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.rx.poll_recv(cx)
    }
}

/// Handle to one spawned child process
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    program: PathBuf,
    lines: Option<OutputLines>,
    terminated: bool,
    reaped: bool,
}

impl ProcessHandle {
    /// Spawn `program` with a structured argument list
    ///
    /// No shell is involved, so arguments are passed through verbatim. Stdin
    /// is closed.
    pub fn spawn(program: &Path, args: &[String], mode: OutputMode) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(mode.stdout())
            .stderr(mode.stderr())
            .spawn()
            .map_err(|e| {
                Error::ExternalTool(format!("Failed to execute {}: {}", program.display(), e))
            })?;

        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone(), "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone(), "stderr"));
        }
        // The stream closes when the last reader task drops its sender.
        drop(tx);

        debug!(program = %program.display(), pid = ?child.id(), ?mode, "spawned process");

        Ok(Self {
            child,
            program: program.to_path_buf(),
            lines: Some(OutputLines { rx }),
            terminated: false,
            reaped: false,
        })
    }

    /// OS process id, `None` once the child has been reaped
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Program this handle was spawned from
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Take the output line stream; returns `None` on every later call
    pub fn take_lines(&mut self) -> Option<OutputLines> {
        self.lines.take()
    }

    /// Send the termination signal without waiting for the child to exit
    ///
    /// On Unix this is `SIGTERM`; elsewhere the platform kill is used. A child
    /// that already exited is not an error.
    pub fn terminate(&mut self) -> Result<()> {
        self.terminated = true;
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        debug!(program = %self.program.display(), pid, "terminating process");
        send_terminate(&mut self.child, pid)
    }

    /// Wait for the child to exit and return its status
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.wait().await?;
        self.reaped = true;
        debug!(program = %self.program.display(), %status, "process exited");
        Ok(status)
    }

    /// Non-blocking exit check
    pub fn has_exited(&mut self) -> Result<bool> {
        match self.child.try_wait()? {
            Some(status) => {
                self.reaped = true;
                debug!(program = %self.program.display(), %status, "process exited");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.reaped || self.terminated {
            return;
        }
        if let Some(pid) = self.child.id() {
            warn!(
                program = %self.program.display(),
                pid,
                "process handle dropped while child still running, terminating"
            );
            let _ = send_terminate(&mut self.child, pid);
        }
    }
}

#[cfg(unix)]
fn send_terminate(_child: &mut Child, pid: u32) -> Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| Error::ExternalTool(format!("pid {pid} out of range")))?;
    // SAFETY: kill(2) takes plain integers and has no memory-safety requirements.
    // The pid belongs to a child we have not reaped yet, so it cannot have been
    // recycled for an unrelated process.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(Error::Io(err))
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child, _pid: u32) -> Result<()> {
    child.start_kill().map_err(Error::Io)
}

async fn forward_lines<R>(stream: R, tx: mpsc::Sender<String>, label: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut framed = FramedRead::new(stream, UniversalLines::default());
    while let Some(item) = framed.next().await {
        match item {
            Ok(line) => {
                if tx.send(line).await.is_err() {
                    // Receiver gone; nobody is listening anymore.
                    break;
                }
            }
            Err(e) => {
                debug!(stream = label, error = %e, "output stream read failed");
                break;
            }
        }
    }
}

/// Line codec accepting `\n`, `\r\n` and bare `\r` as terminators
///
/// Download backends redraw progress with carriage returns, so a bare `\r`
/// has to end a line just like `\n` does. Bytes are decoded lossily.
#[derive(Debug, Default)]
pub struct UniversalLines {
    next_index: usize,
}

impl Decoder for UniversalLines {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> std::io::Result<Option<String>> {
        let Some(offset) = buf[self.next_index..]
            .iter()
            .position(|b| *b == b'\n' || *b == b'\r')
        else {
            self.next_index = buf.len();
            return Ok(None);
        };

        let idx = self.next_index + offset;
        let terminator_len = if buf[idx] == b'\r' {
            match buf.get(idx + 1) {
                Some(b'\n') => 2,
                Some(_) => 1,
                None => {
                    // Might be the first half of "\r\n"; wait for more input.
                    self.next_index = idx;
                    return Ok(None);
                }
            }
        } else {
            1
        };

        self.next_index = 0;
        let frame = buf.split_to(idx + terminator_len);
        Ok(Some(String::from_utf8_lossy(&frame[..idx]).into_owned()))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> std::io::Result<Option<String>> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        self.next_index = 0;
        let rest = buf.split_to(buf.len());
        let text = rest.strip_suffix(b"\r").unwrap_or(&rest[..]);
        Ok(Some(String::from_utf8_lossy(text).into_owned()))
    }
}
