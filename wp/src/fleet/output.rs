//! Worker output capture
//!
//! Drains a child's stdout/stderr in background tasks so the pipes never fill,
//! forwarding each line to the log and keeping the last few KiB of each
//! stream for diagnostics.

use std::process::ExitStatus;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::debug;

/// Bytes retained per stream; older output is dropped first
const MAX_CAPTURE_BYTES: usize = 8 * 1024;

/// Characters of each stream included in a failure message
const ERROR_SNIPPET_CHARS: usize = 200;

/// Bounded capture of a child's stdout and stderr
#[derive(Debug)]
pub struct OutputCapture {
    stdout: Arc<Mutex<String>>,
    stderr: Arc<Mutex<String>>,
    drains: Vec<JoinHandle<()>>,
}

impl OutputCapture {
    /// Take the child's piped streams and start draining them
    pub fn attach(worker: &str, child: &mut Child) -> Self {
        debug!(%worker, "OutputCapture::attach: called");
        let stdout = Arc::new(Mutex::new(String::new()));
        let stderr = Arc::new(Mutex::new(String::new()));
        let mut drains = Vec::new();

        if let Some(out) = child.stdout.take() {
            drains.push(tokio::spawn(drain(worker.to_string(), "stdout", out, stdout.clone())));
        }
        if let Some(err) = child.stderr.take() {
            drains.push(tokio::spawn(drain(worker.to_string(), "stderr", err, stderr.clone())));
        }

        Self { stdout, stderr, drains }
    }

    /// Wait for both streams to reach EOF, at most `timeout`
    ///
    /// Returns false if the drains were still running when the timeout hit.
    pub async fn finish(&mut self, timeout: Duration) -> bool {
        debug!(?timeout, "OutputCapture::finish: called");
        let drains: Vec<_> = self.drains.drain(..).collect();
        tokio::time::timeout(timeout, futures::future::join_all(drains))
            .await
            .is_ok()
    }

    pub fn stdout(&self) -> String {
        self.stdout.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn stderr(&self) -> String {
        self.stderr.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

async fn drain<R>(worker: String, stream: &'static str, reader: R, buf: Arc<Mutex<String>>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!(%worker, stream, %line, "worker output");
                let mut captured = buf.lock().unwrap_or_else(PoisonError::into_inner);
                push_tail(&mut captured, &line, MAX_CAPTURE_BYTES);
            }
            Ok(None) => break,
            Err(e) => {
                debug!(%worker, stream, error = %e, "drain: read failed");
                break;
            }
        }
    }
}

/// Append `line` and drop the oldest bytes beyond `max`
fn push_tail(captured: &mut String, line: &str, max: usize) {
    captured.push_str(line);
    captured.push('\n');
    if captured.len() > max {
        let mut cut = captured.len() - max;
        while !captured.is_char_boundary(cut) {
            cut += 1;
        }
        captured.drain(..cut);
    }
}

/// First `max` characters of the input with surrounding whitespace removed
fn truncate_chars(s: &str, max: usize) -> String {
    s.trim().chars().take(max).collect()
}

/// Human-readable description of an early exit
pub fn describe_exit(status: ExitStatus, stderr: &str, stdout: &str) -> String {
    let mut msg = match status.code() {
        Some(code) => format!("exit code {}", code),
        None => format!("terminated ({})", status),
    };
    let stderr = truncate_chars(stderr, ERROR_SNIPPET_CHARS);
    if !stderr.is_empty() {
        msg.push_str(" - ");
        msg.push_str(&stderr);
    }
    let stdout = truncate_chars(stdout, ERROR_SNIPPET_CHARS);
    if !stdout.is_empty() {
        msg.push_str(" - ");
        msg.push_str(&stdout);
    }
    msg
}
