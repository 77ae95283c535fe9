//! Supervised execution of render invocations.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::command::RenderInvocation;
use crate::error::{MediaError, MediaResult};
use crate::logs::{LogBuffer, LogStream};

/// Bytes of captured output attached to a failed render.
pub const FAILURE_LOG_TAIL_BYTES: usize = 4 * 1024;

/// Longest single line kept from a stream before the rest is discarded.
const MAX_LINE_BYTES: usize = 8 * 1024;

/// How long to wait for the output readers once the process is gone.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Runs render processes with a timeout and cancellation.
///
/// The process is started in its own process group. On timeout or
/// cancellation the whole group is killed and the child reaped before
/// returning, so no render process outlives its job.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `invocation` to completion, capturing output into `logs`.
    ///
    /// Succeeds only if the process exits zero and the declared output file
    /// exists and is non-empty.
    pub async fn run(
        &self,
        invocation: &RenderInvocation,
        logs: &LogBuffer,
        mut cancel: watch::Receiver<bool>,
    ) -> MediaResult<()> {
        if *cancel.borrow() {
            return Err(MediaError::Cancelled);
        }

        debug!("Running: {}", invocation.display());

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| {
            MediaError::ffmpeg_failed(
                format!("failed to start {}: {}", invocation.program.display(), e),
                "",
                None,
            )
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("stderr not captured"))?;
        let readers = [
            tokio::spawn(capture(stdout, logs.clone(), LogStream::Stdout)),
            tokio::spawn(capture(stderr, logs.clone(), LogStream::Stderr)),
        ];

        let pid = child.id();
        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = tokio::time::sleep(self.timeout) => Outcome::TimedOut,
            _ = cancelled(&mut cancel) => Outcome::Cancelled,
        };

        if matches!(outcome, Outcome::Exited(_)) {
            // Leftover members of the group would hold the output pipes open.
            kill_group_members(pid);
        } else {
            kill_process_group(&mut child, pid);
            if let Err(e) = child.wait().await {
                warn!("Failed to reap render process: {}", e);
            }
        }

        for reader in readers {
            let abort = reader.abort_handle();
            if tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await.is_err() {
                abort.abort();
            }
        }

        match outcome {
            Outcome::TimedOut => {
                warn!(
                    "Render timed out after {} seconds, process group killed",
                    self.timeout.as_secs()
                );
                Err(MediaError::Timeout(self.timeout.as_secs()))
            }
            Outcome::Cancelled => {
                info!("Render cancelled, process group killed");
                Err(MediaError::Cancelled)
            }
            Outcome::Exited(status) => {
                let status = status?;
                if !status.success() {
                    let message = match status.code() {
                        Some(code) => format!("process exited with status {}", code),
                        None => "process terminated by signal".to_string(),
                    };
                    return Err(MediaError::ffmpeg_failed(
                        message,
                        logs.tail(FAILURE_LOG_TAIL_BYTES),
                        status.code(),
                    ));
                }
                verify_output(invocation).await
            }
        }
    }
}

async fn verify_output(invocation: &RenderInvocation) -> MediaResult<()> {
    match tokio::fs::metadata(&invocation.output_path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        _ => Err(MediaError::OutputMissing(invocation.output_path.clone())),
    }
}

/// Resolves once the cancel flag is set. Pends forever if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// SIGKILL the child's process group. The child must not have been reaped
/// yet, so `pid` still names its group.
fn kill_process_group(child: &mut Child, pid: Option<u32>) {
    kill_group_members(pid);
    let _ = child.start_kill();
}

/// SIGKILL the process group led by `pid`.
fn kill_group_members(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        // ESRCH just means the group is already gone.
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Splits a stream into lines (on `\n` or `\r`) and feeds them to `logs`.
async fn capture<R>(mut reader: R, logs: LogBuffer, stream: LogStream)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 8192];
    let mut line: Vec<u8> = Vec::new();

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for &byte in &buf[..n] {
            if byte == b'\n' || byte == b'\r' {
                if !line.is_empty() {
                    logs.push(stream, &String::from_utf8_lossy(&line));
                    line.clear();
                }
            } else if line.len() < MAX_LINE_BYTES {
                line.push(byte);
            }
        }
    }

    if !line.is_empty() {
        logs.push(stream, &String::from_utf8_lossy(&line));
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn shell(script: &str, output: &Path) -> RenderInvocation {
        RenderInvocation::new(
            "sh",
            vec!["-c".to_string(), script.to_string()],
            output.to_path_buf(),
        )
    }

    fn never_cancelled() -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        std::mem::forget(tx);
        rx
    }

    fn process_alive(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit_once(") ")
                .map(|(_, rest)| !rest.starts_with('Z'))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[tokio::test]
    async fn test_success_captures_output() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.mp4");
        let script = format!("echo rendering; echo warn >&2; printf data > {}", out.display());
        let logs = LogBuffer::new(1024);

        ProcessRunner::new(Duration::from_secs(10))
            .run(&shell(&script, &out), &logs, never_cancelled())
            .await
            .unwrap();

        let snapshot = logs.snapshot();
        assert!(snapshot.contains("rendering"));
        assert!(snapshot.contains("[stderr] warn"));
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.mp4");
        let logs = LogBuffer::new(1024);

        let err = ProcessRunner::new(Duration::from_secs(10))
            .run(&shell("echo broken input >&2; exit 3", &out), &logs, never_cancelled())
            .await
            .unwrap_err();

        match err {
            MediaError::FfmpegFailed {
                exit_code, log_tail, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert!(log_tail.contains("broken input"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_output() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.mp4");
        let logs = LogBuffer::default();

        let err = ProcessRunner::new(Duration::from_secs(10))
            .run(&shell("true", &out), &logs, never_cancelled())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::OutputMissing(_)));

        std::fs::write(&out, b"").unwrap();
        let err = ProcessRunner::new(Duration::from_secs(10))
            .run(&shell("true", &out), &logs, never_cancelled())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::OutputMissing(_)));
    }

    #[tokio::test]
    async fn test_timeout_kills_process_group() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.mp4");
        let pid_file = dir.path().join("child.pid");
        let script = format!("sleep 30 & echo $! > {}; wait", pid_file.display());
        let logs = LogBuffer::default();

        let started = std::time::Instant::now();
        let err = ProcessRunner::new(Duration::from_millis(500))
            .run(&shell(&script, &out), &logs, never_cancelled())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(10));

        let pid: u32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!process_alive(pid), "background child survived the timeout");
    }

    #[tokio::test]
    async fn test_cancel_kills_process() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.mp4");
        let logs = LogBuffer::default();
        let (tx, rx) = watch::channel(false);

        let runner = ProcessRunner::new(Duration::from_secs(30));
        let invocation = shell("sleep 30", &out);
        let handle = tokio::spawn(async move { runner.run(&invocation, &logs, rx).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(MediaError::Cancelled)));
    }

    #[tokio::test]
    async fn test_already_cancelled() {
        let dir = TempDir::new().unwrap();
        let (_tx, rx) = watch::channel(true);
        let err = ProcessRunner::new(Duration::from_secs(1))
            .run(&shell("true", &dir.path().join("out")), &LogBuffer::default(), rx)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Cancelled));
    }

    #[tokio::test]
    async fn test_background_children_do_not_outlive_success() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.mp4");
        let pid_file = dir.path().join("bg.pid");
        let script = format!(
            "sleep 30 & echo $! > {}; printf data > {}",
            pid_file.display(),
            out.display()
        );
        let logs = LogBuffer::new(1024);

        let started = std::time::Instant::now();
        ProcessRunner::new(Duration::from_secs(20))
            .run(&shell(&script, &out), &logs, never_cancelled())
            .await
            .unwrap();
        assert!(
            started.elapsed() < READER_DRAIN_TIMEOUT,
            "run waited on the background child's pipes"
        );

        let pid: u32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!process_alive(pid), "background child survived a successful render");
    }
}
