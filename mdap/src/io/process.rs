//! Child-process plumbing for worker sessions: stdin feeding, bounded
//! output capture and a wall-clock limit.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

const READ_CHUNK: usize = 8192;

/// Bytes kept from one stream plus how many were dropped past the limit.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub dropped: usize,
}

impl Captured {
    fn read_from<R: Read>(mut reader: R, limit: usize) -> Result<Self> {
        let mut captured = Self::default();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = reader.read(&mut chunk).context("read worker output")?;
            if n == 0 {
                return Ok(captured);
            }
            let keep = n.min(limit.saturating_sub(captured.bytes.len()));
            captured.bytes.extend_from_slice(&chunk[..keep]);
            captured.dropped += n - keep;
        }
    }
}

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout.bytes).into_owned()
    }

    /// Last non-empty stderr line, for failure reasons.
    pub fn stderr_summary(&self) -> String {
        String::from_utf8_lossy(&self.stderr.bytes)
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default()
            .to_string()
    }
}

fn capture<R: Read + Send + 'static>(reader: R, limit: usize) -> JoinHandle<Result<Captured>> {
    thread::spawn(move || Captured::read_from(reader, limit))
}

fn joined<T>(handle: JoinHandle<Result<T>>, what: &str) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow!("{what} thread panicked"))?
}

/// Run `cmd` to completion or until `timeout`, killing it on timeout.
///
/// `stdin` is fed from its own thread and both output streams are drained
/// concurrently, so neither side can block on a full pipe. At most
/// `output_limit_bytes` of each stream is kept.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    debug!("spawning worker process");
    let mut child = cmd.spawn().map_err(|err| {
        error!(err = %err, "failed to spawn worker process");
        anyhow::Error::new(err).context("spawn worker process")
    })?;

    let feeder = match (stdin, child.stdin.take()) {
        (Some(input), Some(mut pipe)) => {
            let input = input.to_vec();
            Some(thread::spawn(move || -> Result<()> {
                pipe.write_all(&input).context("write worker stdin")
            }))
        }
        (Some(_), None) => return Err(anyhow!("worker stdin was not piped")),
        (None, _) => None,
    };
    let stdout = capture(
        child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("worker stdout was not piped"))?,
        output_limit_bytes,
    );
    let stderr = capture(
        child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("worker stderr was not piped"))?,
        output_limit_bytes,
    );

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for worker")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "worker process timed out, killing");
            child.kill().context("kill worker process")?;
            (child.wait().context("reap worker process")?, true)
        }
    };

    if let Some(feeder) = feeder {
        // A child that exits without reading all of stdin closes the pipe early.
        if let Err(err) = joined(feeder, "stdin writer") {
            debug!(err = %format!("{err:#}"), "worker stdin not fully consumed");
        }
    }
    let stdout = joined(stdout, "stdout reader")?;
    let stderr = joined(stderr, "stderr reader")?;
    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "worker output truncated"
        );
    }

    debug!(exit_code = ?status.code(), timed_out, "worker process finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn stdin_is_echoed_up_to_limit() {
        let input: &[u8] = b"hello world";
        let output = run_command_with_timeout(Command::new("cat"), Some(input), Duration::from_secs(5), 5)
            .expect("run");
        assert!(output.status.success());
        assert_eq!(output.stdout_text(), "hello");
        assert_eq!(output.stdout.dropped, 6);
        assert!(!output.timed_out);
    }

    #[test]
    fn large_prompt_does_not_deadlock() {
        let prompt = vec![b'x'; 1 << 20];
        let output = run_command_with_timeout(
            Command::new("cat"),
            Some(prompt.as_slice()),
            Duration::from_secs(10),
            16,
        )
        .expect("run");
        assert!(output.status.success());
        assert_eq!(output.stdout.bytes.len(), 16);
        assert_eq!(output.stdout.dropped, (1 << 20) - 16);
    }

    #[test]
    fn slow_process_is_killed() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let output =
            run_command_with_timeout(cmd, None, Duration::from_millis(100), 100).expect("run");
        assert!(output.timed_out);
    }

    #[test]
    fn stderr_summary_is_last_non_empty_line() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("echo first >&2; echo 'last line' >&2; echo >&2; exit 3");
        let output =
            run_command_with_timeout(cmd, None, Duration::from_secs(5), 1000).expect("run");
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stderr_summary(), "last line");
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let err = run_command_with_timeout(
            Command::new("definitely-not-a-real-binary-xyz"),
            None,
            Duration::from_secs(1),
            10,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("spawn worker process"));
    }
}
