//! Child processes with a wall-clock timeout and bounded output capture.
//!
//! Used by the generator, the code sandbox and the search/extract tools. Every
//! pipe gets its own thread so a child that floods stdout or ignores stdin can
//! never block the timeout.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

const CHUNK_BYTES: usize = 8 * 1024;

/// Bytes kept from one stream, plus how many were drained and dropped.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub dropped: usize,
}

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn stdout_text(&self) -> String {
        self.stdout.text()
    }

    pub fn stderr_text(&self) -> String {
        self.stderr.text()
    }

    /// Stdout then stderr, each followed by a notice when bytes were dropped.
    pub fn combined_text(&self) -> String {
        let mut parts = Vec::new();
        for (label, stream) in [("stdout", &self.stdout), ("stderr", &self.stderr)] {
            let text = stream.text();
            if !text.is_empty() {
                parts.push(text.trim_end_matches('\n').to_string());
            }
            if stream.dropped > 0 {
                parts.push(format!("[{label} truncated {} bytes]", stream.dropped));
            }
        }
        let mut combined = parts.join("\n");
        if !combined.is_empty() {
            combined.push('\n');
        }
        combined
    }
}

/// Spawn `cmd`, feed it `stdin`, and wait at most `timeout`.
///
/// At most `limit` bytes per stream are kept; on timeout the child is killed
/// and `timed_out` is set. Errors are spawn and wait failures only.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64, limit = limit))]
pub fn run_bounded(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    limit: usize,
) -> Result<ProcessOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let program = cmd.get_program().to_string_lossy().into_owned();
    debug!(program = %program, "spawning");
    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawn {program}"))?;

    let writer = stdin.map(|input| feed_stdin(&mut child, input.to_vec()));
    let stdout = capture(child.stdout.take(), limit);
    let stderr = capture(child.stderr.take(), limit);

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for child")? {
        Some(status) => (status, false),
        None => {
            warn!(program = %program, timeout_ms = timeout.as_millis() as u64, "timed out; killing");
            child.kill().context("kill child")?;
            (child.wait().context("reap killed child")?, true)
        }
    };

    if let Some(Some(handle)) = writer
        && handle.join().is_err()
    {
        warn!("stdin writer panicked");
    }
    let stdout = collect(stdout).context("collect stdout")?;
    let stderr = collect(stderr).context("collect stderr")?;
    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(stdout_dropped = stdout.dropped, stderr_dropped = stderr.dropped, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "child finished");
    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

fn feed_stdin(child: &mut Child, input: Vec<u8>) -> Option<JoinHandle<()>> {
    let mut pipe = child.stdin.take()?;
    Some(thread::spawn(move || {
        // Dropping the pipe closes it, so the child sees EOF.
        if let Err(err) = pipe.write_all(&input) {
            debug!(err = %err, "child closed stdin early");
        }
    }))
}

type CaptureHandle = Option<JoinHandle<Result<Captured>>>;

fn capture<R: Read + Send + 'static>(stream: Option<R>, limit: usize) -> CaptureHandle {
    stream.map(|reader| thread::spawn(move || drain(reader, limit)))
}

fn collect(handle: CaptureHandle) -> Result<Captured> {
    match handle {
        None => Ok(Captured::default()),
        Some(handle) => handle
            .join()
            .map_err(|_| anyhow!("output reader panicked"))?,
    }
}

fn drain<R: Read>(mut reader: R, limit: usize) -> Result<Captured> {
    let mut captured = Captured::default();
    let mut chunk = [0u8; CHUNK_BYTES];
    loop {
        let n = reader.read(&mut chunk).context("read child output")?;
        if n == 0 {
            return Ok(captured);
        }
        let keep = n.min(limit.saturating_sub(captured.bytes.len()));
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.dropped += n - keep;
    }
}
