//! Process utilities for child process management.

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

fn exit_status_code_parts(code: Option<i32>, _signal: Option<i32>) -> Option<i32> {
    if let Some(code) = code {
        return Some(code);
    }
    #[cfg(unix)]
    {
        if let Some(signal) = _signal {
            return Some(128 + signal);
        }
    }
    None
}

/// Extract exit code from ExitStatus, using 128+signal for signal-terminated processes on Unix.
pub(crate) fn exit_status_code(status: &std::process::ExitStatus) -> Option<i32> {
    let code = status.code();
    #[cfg(unix)]
    let signal = status.signal();
    #[cfg(not(unix))]
    let signal = None;
    exit_status_code_parts(code, signal)
}

/// Attempt to capture the exit code from a child process.
/// Tries non-blocking first, falls back to blocking wait if process hasn't exited.
pub(crate) async fn capture_exit_code(child: &mut Child) -> Option<i32> {
    match child.try_wait() {
        Ok(Some(status)) => exit_status_code(&status),
        Ok(None) => child
            .wait()
            .await
            .ok()
            .and_then(|status| exit_status_code(&status)),
        Err(_) => None,
    }
}

/// Kill a child and reap it, returning whatever exit code it ended with.
pub(crate) async fn stop_child(child: &mut Child) -> Option<i32> {
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "Kill failed, process likely already exited");
    }
    capture_exit_code(child).await
}

/// Write the payload to a child's stdin and close it.
///
/// A tool that exits without reading its input is not an error.
pub(crate) async fn feed_stdin(mut stdin: ChildStdin, payload: Option<&str>) -> std::io::Result<()> {
    if let Some(payload) = payload {
        match stdin.write_all(payload.as_bytes()).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => return Ok(()),
            Err(e) => return Err(e),
        }
    }

    match stdin.shutdown().await {
        Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::io::AsyncReadExt;

    #[test]
    fn exit_code_passthrough() {
        assert_eq!(exit_status_code_parts(Some(0), None), Some(0));
        assert_eq!(exit_status_code_parts(Some(42), None), Some(42));
    }

    #[cfg(unix)]
    #[test]
    fn signal_exit_code() {
        // SIGKILL
        assert_eq!(exit_status_code_parts(None, Some(9)), Some(137));
        // SIGTERM
        assert_eq!(exit_status_code_parts(None, Some(15)), Some(143));
    }

    #[cfg(not(unix))]
    #[test]
    fn signal_ignored_on_non_unix() {
        assert_eq!(exit_status_code_parts(None, Some(9)), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_capture_exit_code() {
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg("exit 42")
            .spawn()
            .expect("failed to spawn");

        assert_eq!(capture_exit_code(&mut child).await, Some(42));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_child_reports_signal() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("failed to spawn");

        assert_eq!(stop_child(&mut child).await, Some(137));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_feed_stdin_round_trips_payload() {
        let mut child = tokio::process::Command::new("cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .expect("failed to spawn");

        let stdin = child.stdin.take().unwrap();
        feed_stdin(stdin, Some("payload")).await.unwrap();

        let mut out = String::new();
        child
            .stdout
            .take()
            .unwrap()
            .read_to_string(&mut out)
            .await
            .unwrap();
        assert_eq!(out, "payload");
        assert!(child.wait().await.unwrap().success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_feed_stdin_ignores_closed_pipe() {
        let mut child = tokio::process::Command::new("true")
            .stdin(Stdio::piped())
            .spawn()
            .expect("failed to spawn");
        let stdin = child.stdin.take().unwrap();
        child.wait().await.unwrap();

        let big = "x".repeat(1 << 20);
        assert!(feed_stdin(stdin, Some(&big)).await.is_ok());
    }
}
