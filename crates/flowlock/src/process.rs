//! External command execution for probes and linters.
//!
//! Output pipes are drained on background threads while the parent waits,
//! so a chatty child can never block on a full pipe. A command that outlives
//! its deadline is killed and reported as timed out rather than failed.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code, `None` when the child was killed or died to a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status == Some(0)
    }
}

/// Run `program` with `args` in `working_dir`, optionally bounded by a
/// deadline.
pub fn run_with_timeout(
    program: &str,
    args: &[&str],
    working_dir: &Path,
    timeout: Option<Duration>,
) -> Result<CommandOutput> {
    let started = Instant::now();
    let mut child = Command::new(program)
        .args(args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;

    let stdout = child.stdout.take().map(drain_in_background);
    let stderr = child.stderr.take().map(drain_in_background);

    let status = wait_with_deadline(&mut child, timeout)
        .with_context(|| format!("failed to wait on {program}"))?;
    let timed_out = status.is_none();
    if timed_out {
        let _ = child.kill();
        let _ = child.wait();
    }

    Ok(CommandOutput {
        status: status.and_then(|s| s.code()),
        stdout: collect_drained(stdout),
        stderr: collect_drained(stderr),
        timed_out,
        duration: started.elapsed(),
    })
}

/// Drain a child pipe to completion on its own thread.
fn drain_in_background<R: Read + Send + 'static>(pipe: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut pipe = pipe;
        let mut buffer = Vec::new();
        let _ = pipe.read_to_end(&mut buffer);
        buffer
    })
}

fn collect_drained(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// Wait for the child to exit. `Ok(None)` means the deadline passed first;
/// the child is still running and the caller decides its fate.
fn wait_with_deadline(child: &mut Child, timeout: Option<Duration>) -> Result<Option<ExitStatus>> {
    let Some(limit) = timeout else {
        return child.wait().map(Some).map_err(Into::into);
    };
    let deadline = Instant::now() + limit;
    let mut backoff = Duration::from_millis(5);
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        std::thread::sleep(backoff.min(deadline.saturating_duration_since(Instant::now())));
        // Poll gently at first, then back off toward 50ms.
        backoff = (backoff * 2).min(Duration::from_millis(50));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_output_and_exit_code() {
        let out = run_with_timeout("sh", &["-c", "echo hi; echo oops >&2; exit 3"], Path::new("."), None)
            .unwrap();
        assert_eq!(out.status, Some(3));
        assert_eq!(out.stdout.trim(), "hi");
        assert_eq!(out.stderr.trim(), "oops");
        assert!(!out.timed_out);
        assert!(!out.success());
    }

    #[test]
    fn zero_exit_is_success() {
        let out = run_with_timeout("sh", &["-c", "true"], Path::new("."), None).unwrap();
        assert!(out.success());
        assert_eq!(out.status, Some(0));
    }

    #[test]
    fn reports_timeout_and_kills_the_child() {
        let out = run_with_timeout(
            "sh",
            &["-c", "sleep 5"],
            Path::new("."),
            Some(Duration::from_millis(100)),
        )
        .unwrap();
        assert!(out.timed_out);
        assert_eq!(out.status, None);
        assert!(!out.success());
        assert!(out.duration < Duration::from_secs(5));
    }

    #[test]
    fn output_before_timeout_is_still_captured() {
        let out = run_with_timeout(
            "sh",
            &["-c", "echo early; sleep 5"],
            Path::new("."),
            Some(Duration::from_millis(200)),
        )
        .unwrap();
        assert!(out.timed_out);
        assert_eq!(out.stdout.trim(), "early");
    }
}
