//! Output sinks for CLI commands
//!
//! Supports console (pretty), JSON lines, and quiet output modes.

use crate::workflow::{NoopSink, NodeRun, NodeRunStatus, Run, RunEvent, RunSink, RunStatus};
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

/// Output mode for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Console,
    Json,
    Quiet,
}

impl OutputMode {
    /// Pick the mode from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if json {
            Self::Json
        } else if quiet {
            Self::Quiet
        } else {
            Self::Console
        }
    }
}

/// Create a sink for the given mode
pub fn create_sink(mode: OutputMode) -> Arc<dyn RunSink> {
    match mode {
        OutputMode::Console => Arc::new(ConsoleSink::new()),
        OutputMode::Json => Arc::new(JsonSink::new(io::stdout())),
        OutputMode::Quiet => Arc::new(NoopSink),
    }
}

pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

type Writer = Box<dyn Write + Send>;

struct ConsoleState {
    out: Writer,
    err: Writer,
    /// Bytes of output already written, per NodeRun id
    printed: HashMap<String, usize>,
    /// The last write to `out` did not end with a newline
    open_line: bool,
}

impl ConsoleState {
    fn write_output(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.flush();
        self.open_line = !text.ends_with('\n');
    }

    fn close_line(&mut self) {
        if self.open_line {
            let _ = self.out.write_all(b"\n");
            let _ = self.out.flush();
            self.open_line = false;
        }
    }

    fn status(&mut self, line: &str) {
        self.close_line();
        let _ = writeln!(self.err, "{}", line);
    }

    /// Write whatever part of `output` has not been written yet
    fn flush_delta(&mut self, node: &NodeRun) {
        let printed = self.printed.get(&node.id).copied().unwrap_or(0);
        if let Some(delta) = node.output.get(printed..) {
            let delta = delta.to_string();
            self.write_output(&delta);
        }
        self.printed.insert(node.id.clone(), node.output.len());
    }
}

/// Human-readable progress on stderr, step output on stdout
pub struct ConsoleSink {
    state: Mutex<ConsoleState>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::with_writers(Box::new(io::stdout()), Box::new(io::stderr()))
    }

    pub fn with_writers(out: Writer, err: Writer) -> Self {
        Self {
            state: Mutex::new(ConsoleState {
                out,
                err,
                printed: HashMap::new(),
                open_line: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConsoleState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RunSink for ConsoleSink {
    fn on_run_upsert(&self, run: &Run) {
        let mut state = self.lock();
        match run.status {
            RunStatus::Queued => {}
            RunStatus::Running => {
                state.status(&format!("Running workflow '{}' ({})", run.workflow_name, run.id));
            }
            RunStatus::Succeeded => {
                state.status(&format!(
                    "✓ Workflow completed successfully ({})",
                    format_duration(run.duration_ms)
                ));
            }
            RunStatus::Failed => {
                state.status(&format!(
                    "✗ Workflow failed after {}: {}",
                    format_duration(run.duration_ms),
                    run.error
                ));
            }
            RunStatus::Cancelled => {
                state.status(&format!(
                    "⊘ Workflow cancelled after {}",
                    format_duration(run.duration_ms)
                ));
            }
        }
    }

    fn on_node_run_upsert(&self, node: &NodeRun) {
        let mut state = self.lock();
        let first_seen = !state.printed.contains_key(&node.id);

        match node.status {
            NodeRunStatus::Queued => {}
            NodeRunStatus::Running => {
                if first_seen {
                    state.status(&format!("▸ {} ({})", node.step_name, node.tool_id));
                }
                state.flush_delta(node);
            }
            NodeRunStatus::Succeeded => {
                state.flush_delta(node);
                state.status(&format!(
                    "✓ {} ({})",
                    node.step_name,
                    format_duration(node.duration_ms)
                ));
            }
            NodeRunStatus::Failed | NodeRunStatus::Cancelled => {
                if node.output != node.error {
                    state.flush_delta(node);
                }
                let mark = if node.status == NodeRunStatus::Failed {
                    "✗"
                } else {
                    "⊘"
                };
                state.status(&format!("{} {}: {}", mark, node.step_name, node.error));
            }
            NodeRunStatus::Skipped => {
                state.status(&format!("- {} skipped ({})", node.step_name, node.error));
            }
        }

        if node.status.is_terminal() {
            state.printed.insert(node.id.clone(), node.output.len());
        }
    }
}

/// One JSON object per published snapshot
pub struct JsonSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    fn write_event(&self, event: &RunEvent) {
        let Ok(line) = serde_json::to_string(event) else {
            return;
        };
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let _ = writeln!(writer, "{}", line);
        let _ = writer.flush();
    }
}

impl<W: Write + Send> RunSink for JsonSink<W> {
    fn on_run_upsert(&self, run: &Run) {
        self.write_event(&RunEvent::Run(run.clone()));
    }

    fn on_node_run_upsert(&self, node_run: &NodeRun) {
        self.write_event(&RunEvent::NodeRun(node_run.clone()));
    }
}
