//! Local process tool pipeline

use super::process::{exit_status_code, feed_stdin, stop_child};
use super::types::{
    PipelineEvent, ToolError, ToolOutput, ToolPipeline, ToolRequest, ToolResponse, ToolResult,
};
use crate::config::ActionType;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;

/// Events buffered between the process task and the consumer
const EVENT_BUFFER: usize = 64;

/// Runs tools as local processes
///
/// The payload goes to stdin, stdout is streamed back as fragments in the
/// order it was read, and the exit code decides success.
#[derive(Debug, Clone, Default)]
pub struct CommandPipeline {
    /// Working directory for tools that don't set one
    working_dir: Option<PathBuf>,
}

/// Incremental lossy UTF-8 decoding of raw output chunks
///
/// A multi-byte character split across two reads is held back until the
/// rest of it arrives. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let ready = self.pending.len() - incomplete_tail(&self.pending);
        let text = String::from_utf8_lossy(&self.pending[..ready]).into_owned();
        self.pending.drain(..ready);
        text
    }

    /// Decode whatever is left once the stream has ended
    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Length of a trailing, possibly valid but unfinished, UTF-8 sequence
fn incomplete_tail(bytes: &[u8]) -> usize {
    let mut rest = bytes;
    loop {
        match std::str::from_utf8(rest) {
            Ok(_) => return 0,
            Err(e) => match e.error_len() {
                None => return rest.len() - e.valid_up_to(),
                Some(len) => rest = &rest[e.valid_up_to() + len..],
            },
        }
    }
}

/// Append decoded output to the body and stream it
///
/// Returns false once the consumer has gone away.
async fn forward(
    text: String,
    body: &mut String,
    streaming: bool,
    tx: &mpsc::Sender<PipelineEvent>,
) -> bool {
    if text.is_empty() {
        return true;
    }
    body.push_str(&text);
    !streaming || tx.send(PipelineEvent::Fragment(text)).await.is_ok()
}

enum Exit {
    Status(std::io::Result<std::process::ExitStatus>),
    Cancelled,
    TimedOut,
}

impl CommandPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default working directory
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn arguments(request: &ToolRequest) -> &[String] {
        match (request.action, &request.tool.test_args) {
            (ActionType::Test, Some(test_args)) => test_args,
            _ => &request.tool.args,
        }
    }

    /// Build the command with arguments
    fn build_command(&self, request: &ToolRequest) -> Command {
        let tool = &request.tool;
        let program = shellexpand::tilde(&tool.command).into_owned();

        let mut cmd = Command::new(program);
        cmd.args(Self::arguments(request));
        cmd.envs(&tool.env);

        if let Some(ref dir) = tool.working_dir {
            cmd.current_dir(shellexpand::tilde(dir).into_owned());
        } else if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        cmd
    }

    fn summarize_request(request: &ToolRequest) -> String {
        let args = Self::arguments(request);
        let mut summary = format!("{}: {}", request.action, request.tool.command);
        if !args.is_empty() {
            summary.push(' ');
            summary.push_str(&args.join(" "));
        }
        if let Some(ref payload) = request.payload {
            summary.push_str(&format!(" ({} bytes on stdin)", payload.len()));
        }
        summary
    }
}

impl ToolPipeline for CommandPipeline {
    fn invoke(&self, request: ToolRequest) -> BoxStream<'static, PipelineEvent> {
        let cmd = self.build_command(&request);
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        tokio::spawn(async move {
            let result = run_tool(cmd, &request, &tx).await;
            if let Err(ref e) = result {
                tracing::debug!(tool = %request.tool.id, code = e.code(), error = %e, "Tool failed");
            }
            let _ = tx.send(PipelineEvent::Result(result)).await;
        });

        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed()
    }
}

async fn run_tool(
    mut cmd: Command,
    request: &ToolRequest,
    tx: &mpsc::Sender<PipelineEvent>,
) -> ToolResult {
    if request.cancel.is_cancelled() {
        return Err(ToolError::Cancelled);
    }

    let start = Instant::now();
    let tool = &request.tool;

    let mut child = cmd.spawn().map_err(|e| {
        ToolError::unavailable(format!("failed to spawn '{}': {}", tool.command, e))
    })?;

    tracing::debug!(tool = %tool.id, pid = ?child.id(), action = %request.action, "Spawned tool");

    if let Some(stdin) = child.stdin.take() {
        let payload = request.payload.clone();
        let tool_id = tool.id.clone();
        tokio::spawn(async move {
            if let Err(e) = feed_stdin(stdin, payload.as_deref()).await {
                tracing::warn!(tool = %tool_id, error = %e, "Failed to write payload");
            }
        });
    }

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        stop_child(&mut child).await;
        return Err(ToolError::io("tool output was not captured"));
    };

    let mut stdout_chunks = ReaderStream::new(stdout);
    let mut stderr_chunks = ReaderStream::new(stderr);

    let mut decoder = Utf8Decoder::default();
    let mut body = String::new();
    let mut stderr_bytes = Vec::new();
    let mut stdout_done = false;
    let mut stderr_done = false;

    let deadline = tokio::time::sleep(request.timeout);
    tokio::pin!(deadline);

    while !(stdout_done && stderr_done) {
        tokio::select! {
            biased;
            _ = request.cancel.cancelled() => {
                stop_child(&mut child).await;
                return Err(ToolError::Cancelled);
            }
            _ = &mut deadline => {
                stop_child(&mut child).await;
                body.push_str(&decoder.finish());
                let partial = (!body.is_empty()).then_some(body);
                return Err(ToolError::timeout(start.elapsed(), partial));
            }
            chunk = stdout_chunks.next(), if !stdout_done => {
                let text = match chunk {
                    Some(Ok(bytes)) => decoder.push(&bytes),
                    None => {
                        stdout_done = true;
                        decoder.finish()
                    }
                    Some(Err(e)) => {
                        stop_child(&mut child).await;
                        return Err(ToolError::io(format!("stdout read error: {}", e)));
                    }
                };
                if !forward(text, &mut body, request.streaming, tx).await {
                    // nobody is listening anymore
                    stop_child(&mut child).await;
                    return Err(ToolError::Cancelled);
                }
            }
            chunk = stderr_chunks.next(), if !stderr_done => {
                match chunk {
                    Some(Ok(bytes)) => stderr_bytes.extend_from_slice(&bytes),
                    None => stderr_done = true,
                    Some(Err(e)) => {
                        stop_child(&mut child).await;
                        return Err(ToolError::io(format!("stderr read error: {}", e)));
                    }
                }
            }
        }
    }

    let exit = tokio::select! {
        biased;
        _ = request.cancel.cancelled() => Exit::Cancelled,
        _ = &mut deadline => Exit::TimedOut,
        status = child.wait() => Exit::Status(status),
    };

    let status = match exit {
        Exit::Status(status) => {
            status.map_err(|e| ToolError::io(format!("failed to wait for process: {}", e)))?
        }
        Exit::Cancelled => {
            stop_child(&mut child).await;
            return Err(ToolError::Cancelled);
        }
        Exit::TimedOut => {
            stop_child(&mut child).await;
            return Err(ToolError::timeout(start.elapsed(), Some(body)));
        }
    };

    let elapsed = start.elapsed();
    let duration_ms = elapsed.as_millis() as u64;
    let exit_code = exit_status_code(&status);

    if !status.success() {
        let stderr = String::from_utf8_lossy(&stderr_bytes);
        return Err(ToolError::execution_failed(
            exit_code,
            body,
            stderr.trim_end_matches(['\r', '\n']).to_string(),
        ));
    }

    let code = exit_code.unwrap_or(0);
    let response_summary = format!("exit {} in {}ms, {} bytes", code, duration_ms, body.len());
    let output = ToolOutput::new(code, body)
        .with_header("exit-code", code.to_string())
        .with_header("duration-ms", duration_ms.to_string());

    Ok(ToolResponse {
        output,
        request_summary: CommandPipeline::summarize_request(request),
        response_summary,
        duration_ms,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::Tool;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    async fn collect(pipeline: &CommandPipeline, request: ToolRequest) -> (Vec<String>, ToolResult) {
        let mut stream = pipeline.invoke(request);
        let mut fragments = Vec::new();
        while let Some(event) = stream.next().await {
            match event {
                PipelineEvent::Fragment(text) => fragments.push(text),
                PipelineEvent::Result(result) => return (fragments, result),
            }
        }
        panic!("stream ended without a result");
    }

    fn sh(script: &str) -> Tool {
        Tool::new("sh", "sh").with_args(["-c", script])
    }

    #[tokio::test]
    async fn test_streams_stdout() {
        let pipeline = CommandPipeline::new();
        let request = ToolRequest::new(sh("echo one; echo two"), ActionType::Run);

        let (fragments, result) = collect(&pipeline, request).await;

        assert!(!fragments.is_empty());
        assert_eq!(fragments.concat(), "one\ntwo\n");
        let response = result.unwrap();
        assert_eq!(response.output.status_code, 0);
        assert_eq!(response.output.body, "one\ntwo\n");
        assert_eq!(response.output.headers["exit-code"], "0");
        assert!(response.request_summary.starts_with("run: sh -c"));
        assert!(response.response_summary.starts_with("exit 0"));
    }

    #[tokio::test]
    async fn test_non_utf8_output_is_decoded_lossily() {
        let pipeline = CommandPipeline::new();
        let request = ToolRequest::new(sh("printf 'ok\\n\\377\\376 bin\\n'"), ActionType::Run);

        let (fragments, result) = collect(&pipeline, request).await;

        let response = result.unwrap();
        assert_eq!(response.output.body, "ok\n\u{FFFD}\u{FFFD} bin\n");
        assert_eq!(fragments.concat(), response.output.body);
    }

    #[tokio::test]
    async fn test_output_without_trailing_newline_is_kept_exact() {
        let pipeline = CommandPipeline::new();
        let request = ToolRequest::new(sh("printf hello"), ActionType::Run);

        let (fragments, result) = collect(&pipeline, request).await;

        assert_eq!(result.unwrap().output.body, "hello");
        assert_eq!(fragments.concat(), "hello");
    }

    #[tokio::test]
    async fn test_crlf_output_is_kept_exact() {
        let pipeline = CommandPipeline::new();
        let request = ToolRequest::new(sh("printf 'a\\r\\nb\\r\\n'"), ActionType::Run);

        let (fragments, result) = collect(&pipeline, request).await;

        assert_eq!(result.unwrap().output.body, "a\r\nb\r\n");
        assert_eq!(fragments.concat(), "a\r\nb\r\n");
    }

    #[tokio::test]
    async fn test_non_utf8_stderr_still_reports_failure() {
        let pipeline = CommandPipeline::new();
        let request = ToolRequest::new(sh("printf 'bad \\377\\n' >&2; exit 2"), ActionType::Run);

        let (_, result) = collect(&pipeline, request).await;

        match result {
            Err(ToolError::ExecutionFailed {
                exit_code, stderr, ..
            }) => {
                assert_eq!(exit_code, Some(2));
                assert_eq!(stderr, "bad \u{FFFD}");
            }
            other => panic!("expected execution failure, got {:?}", other),
        }
    }

    #[test]
    fn test_decoder_holds_split_characters() {
        let mut decoder = Utf8Decoder::default();
        let snowman = "☃".as_bytes();

        assert_eq!(decoder.push(&[b'a', snowman[0]]), "a");
        assert_eq!(decoder.push(&snowman[1..2]), "");
        assert_eq!(decoder.push(&[snowman[2], b'b']), "☃b");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_decoder_replaces_invalid_and_truncated_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.push(&[0xff, b'x', 0xe2, 0x98]), "\u{FFFD}x");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    #[tokio::test]
    async fn test_payload_goes_to_stdin() {
        let pipeline = CommandPipeline::new();
        let request = ToolRequest::new(Tool::new("cat", "cat"), ActionType::Run)
            .with_payload(Some("{\"ok\":true}".into()))
            .with_streaming(false);

        let (fragments, result) = collect(&pipeline, request).await;

        assert!(fragments.is_empty());
        let response = result.unwrap();
        assert_eq!(response.output.body, "{\"ok\":true}\n");
        assert!(response.request_summary.contains("11 bytes on stdin"));
    }

    #[tokio::test]
    async fn test_action_uses_test_args() {
        let pipeline = CommandPipeline::new();
        let mut tool = sh("echo running");
        tool.test_args = Some(vec!["-c".into(), "echo testing".into()]);

        let (_, result) = collect(&pipeline, ToolRequest::new(tool.clone(), ActionType::Test)).await;
        assert_eq!(result.unwrap().output.body, "testing\n");

        let (_, result) = collect(&pipeline, ToolRequest::new(tool, ActionType::Run)).await;
        assert_eq!(result.unwrap().output.body, "running\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let pipeline = CommandPipeline::new();
        let request = ToolRequest::new(sh("echo partial; echo broken >&2; exit 3"), ActionType::Run);

        let (_, result) = collect(&pipeline, request).await;

        match result {
            Err(ToolError::ExecutionFailed {
                exit_code, stderr, ..
            }) => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("expected execution failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let pipeline = CommandPipeline::new();
        let request = ToolRequest::new(
            Tool::new("ghost", "/definitely/not/a/real/binary"),
            ActionType::Run,
        );

        let (_, result) = collect(&pipeline, request).await;
        assert!(matches!(result, Err(ToolError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn test_timeout_kills_tool() {
        let pipeline = CommandPipeline::new();
        let request = ToolRequest::new(sh("echo started; sleep 30"), ActionType::Run)
            .with_timeout(Duration::from_millis(200));

        let (_, result) = collect(&pipeline, request).await;

        match result {
            Err(ToolError::Timeout { partial_output, .. }) => {
                assert_eq!(partial_output.as_deref(), Some("started\n"));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation_stops_tool() {
        let pipeline = CommandPipeline::new();
        let token = CancellationToken::new();
        let request = ToolRequest::new(sh("sleep 30"), ActionType::Run).with_cancel(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });

        let start = Instant::now();
        let (_, result) = collect(&pipeline, request).await;
        canceller.await.unwrap();

        assert!(matches!(result, Err(ToolError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_already_cancelled_never_spawns() {
        let pipeline = CommandPipeline::new();
        let token = CancellationToken::new();
        token.cancel();
        let request = ToolRequest::new(sh("echo nope"), ActionType::Run).with_cancel(token);

        let (fragments, result) = collect(&pipeline, request).await;
        assert!(fragments.is_empty());
        assert!(matches!(result, Err(ToolError::Cancelled)));
    }
}
