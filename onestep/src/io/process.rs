//! Child process helper with a timeout and bounded, tail-keeping capture.

use std::collections::VecDeque;
use std::io::Read;
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Output of a child run by [`run_bounded`]. Each stream holds at most the
/// last `output_limit_bytes` bytes.
#[derive(Debug)]
pub struct BoundedOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes discarded from the front of stdout and stderr.
    pub dropped: (usize, usize),
    pub timed_out: bool,
}

impl BoundedOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Spawn `cmd` with stdin closed, drain both pipes on reader threads and kill
/// the child once `timeout` elapses. On unix the child leads its own process
/// group and the whole group is killed, so grandchildren holding the pipes
/// open cannot outlive the timeout.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes = output_limit_bytes))]
pub fn run_bounded(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<BoundedOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|err| {
        error!(err = %err, "failed to spawn command");
        anyhow::Error::new(err).context("spawn command")
    })?;
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(anyhow!("child pipes were not captured"));
    };
    let stdout_reader = thread::spawn(move || read_stream_tail(stdout, output_limit_bytes));
    let stderr_reader = thread::spawn(move || read_stream_tail(stderr, output_limit_bytes));

    let waited = child.wait_timeout(timeout).context("wait for command")?;
    let timed_out = waited.is_none();
    let status = match waited {
        Some(status) => status,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            kill_tree(&mut child).context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_dropped) = join_output(stdout_reader).context("join stdout")?;
    let (stderr, stderr_dropped) = join_output(stderr_reader).context("join stderr")?;
    if stdout_dropped > 0 || stderr_dropped > 0 {
        debug!(stdout_dropped, stderr_dropped, "kept output tails only");
    }
    debug!(exit_code = ?status.code(), timed_out, "command finished");

    Ok(BoundedOutput {
        status,
        stdout,
        stderr,
        dropped: (stdout_dropped, stderr_dropped),
        timed_out,
    })
}

#[cfg(unix)]
fn kill_tree(child: &mut Child) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(child.id()).context("child pid out of range")?;
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(anyhow!("kill process group {pgid}: {err}")),
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) -> Result<()> {
    child.kill().context("kill child")
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Drain `reader`, keeping at most the last `limit` bytes. Returns the kept bytes and the
/// number of bytes discarded from the front.
fn read_stream_tail<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = VecDeque::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        buf.extend(&chunk[..n]);
        if buf.len() > limit {
            let excess = buf.len() - limit;
            buf.drain(..excess);
            dropped += excess;
        }
    }

    Ok((buf.into(), dropped))
}

/// Keep the last `max_chars` characters of `text`.
pub fn tail_chars(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    text.chars().skip(total - max_chars).collect()
}

/// Keep the first `max_chars` characters of `text`.
pub fn head_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_stream_tail_keeps_last_bytes() {
        let data = b"0123456789".repeat(2000);
        let (kept, dropped) = read_stream_tail(&data[..], 100).expect("read");
        assert_eq!(kept.len(), 100);
        assert_eq!(dropped, data.len() - 100);
        assert_eq!(&kept[..], &data[data.len() - 100..]);
    }

    #[test]
    fn tail_and_head_count_chars_not_bytes() {
        assert_eq!(tail_chars("héllo", 3), "llo");
        assert_eq!(tail_chars("hé", 5), "hé");
        assert_eq!(head_chars("héllo", 2), "hé");
        assert_eq!(head_chars("abc", 10), "abc");
        assert_eq!(head_chars("abc", 0), "");
    }

    #[cfg(unix)]
    #[test]
    fn captures_exit_code_and_output() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err 1>&2; exit 3"]);
        let output = run_bounded(cmd, Duration::from_secs(10), 1024).expect("run");
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stdout_lossy(), "out\n");
        assert_eq!(output.stderr_lossy(), "err\n");
        assert!(!output.timed_out);
        assert_eq!(output.dropped, (0, 0));
    }

    #[cfg(unix)]
    #[test]
    fn kills_command_after_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let output = run_bounded(cmd, Duration::from_millis(100), 1024).expect("run");
        assert!(output.timed_out);
        assert!(output.status.code().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_grandchildren_holding_pipes() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 5; echo done"]);
        let started = std::time::Instant::now();
        let output = run_bounded(cmd, Duration::from_millis(200), 1024).expect("run");
        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(output.stdout_lossy(), "");
    }

    #[test]
    fn read_stream_tail_across_many_chunks() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let (kept, dropped) = read_stream_tail(&data[..], 10_000).expect("read");
        assert_eq!(dropped, 190_000);
        assert_eq!(&kept[..], &data[190_000..]);
    }
}
