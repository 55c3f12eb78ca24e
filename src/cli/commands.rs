//! CLI command implementations

use super::output::format_duration;
use super::signals::{EXIT_CANCELLED, Shutdown, shutdown_signal};
use crate::config::{ToolRegistry, ToolResolver, ToolflowConfig, Workflow, load_workflow};
use crate::pipeline::CommandPipeline;
use crate::workflow::{RunHandle, RunSink, RunStatus, RunnerOptions, WorkflowRunner};
use std::path::Path;
use std::sync::Arc;

/// Per-invocation overrides for `run`
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    /// Overrides the configured default step timeout
    pub timeout_ms: Option<u64>,
    /// Disable live output even if the config enables it
    pub no_stream: bool,
}

/// Process exit code for a terminal run status
pub fn exit_code(status: RunStatus) -> i32 {
    match status {
        RunStatus::Succeeded => 0,
        RunStatus::Cancelled => EXIT_CANCELLED,
        _ => 1,
    }
}

/// Exit code for a run, using the signal's own code when one cancelled it
pub fn exit_code_for(status: RunStatus, stopped_by: Option<Shutdown>) -> i32 {
    match (status, stopped_by) {
        (RunStatus::Cancelled, Some(signal)) => signal.exit_code(),
        (status, _) => exit_code(status),
    }
}

/// Steps whose tool cannot be resolved, as `(step id, tool id)`
pub fn unresolved_tools(workflow: &Workflow, tools: &dyn ToolResolver) -> Vec<(String, String)> {
    workflow
        .steps
        .iter()
        .filter(|step| tools.resolve(&step.tool_id).is_none())
        .map(|step| (step.id.clone(), step.tool_id.clone()))
        .collect()
}

/// Run a workflow until it finishes or a shutdown signal cancels it
pub async fn run_workflow(
    workflow_name: &str,
    working_dir: &Path,
    config: &ToolflowConfig,
    args: RunArgs,
    sink: Arc<dyn RunSink>,
) -> Result<i32, String> {
    let workflow = load_workflow(workflow_name, Some(working_dir))
        .map_err(|e| format!("Failed to load workflow '{}': {:#}", workflow_name, e))?;

    let tools = ToolRegistry::from_config(&config.tools)
        .map_err(|e| format!("Invalid tool configuration: {}", e))?;

    for (step, tool) in unresolved_tools(&workflow, &tools) {
        tracing::warn!(step = %step, tool = %tool, "Step references an unknown tool");
    }

    let pipeline = CommandPipeline::new().with_working_dir(working_dir);
    let options = RunnerOptions {
        streaming: config.defaults.stream_output && !args.no_stream,
    };
    let runner = WorkflowRunner::new(Arc::new(pipeline)).with_options(options);
    let timeout_ms = args.timeout_ms.unwrap_or(config.defaults.timeout_ms);

    let RunHandle {
        run_id,
        mut completion,
    } = runner.start_run(workflow, timeout_ms, Arc::new(tools), sink);

    let mut stopped_by = None;
    let run = tokio::select! {
        run = &mut completion => run,
        signal = shutdown_signal() => {
            match signal {
                Ok(signal) => {
                    tracing::info!(run_id = %run_id, signal = %signal, "Cancelling run");
                    if runner.cancel_run(&run_id) {
                        stopped_by = Some(signal);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Could not install signal handlers");
                }
            }
            completion.await
        }
    };

    tracing::debug!(
        run_id = %run.id,
        status = %run.status,
        duration = %format_duration(run.duration_ms),
        "Run complete"
    );

    Ok(exit_code_for(run.status, stopped_by))
}

/// Validate a workflow and the tools it references
pub fn validate_workflow(
    workflow_name: &str,
    working_dir: Option<&Path>,
    config: &ToolflowConfig,
) -> Result<i32, String> {
    let workflow = match load_workflow(workflow_name, working_dir) {
        Ok(wf) => wf,
        Err(e) => {
            eprintln!("✗ Workflow validation failed:\n{:#}", e);
            return Ok(1);
        }
    };

    let tools = ToolRegistry::from_config(&config.tools)
        .map_err(|e| format!("Invalid tool configuration: {}", e))?;

    let missing = unresolved_tools(&workflow, &tools);
    if missing.is_empty() {
        println!(
            "✓ Workflow '{}' is valid ({} steps)",
            workflow.name,
            workflow.steps.len()
        );
        return Ok(0);
    }

    println!(
        "✗ Workflow '{}' references {} unknown tool(s):",
        workflow.name,
        missing.len()
    );
    for (step, tool) in &missing {
        println!("  - step '{}' uses '{}'", step, tool);
    }
    Ok(1)
}

/// Lines describing every configured tool
pub fn describe_tools(config: &ToolflowConfig) -> Result<Vec<String>, String> {
    let registry = ToolRegistry::from_config(&config.tools)
        .map_err(|e| format!("Invalid tool configuration: {}", e))?;

    Ok(registry
        .list()
        .into_iter()
        .map(|tool| {
            let enabled = if tool.enabled { "✓" } else { "✗" };
            let mut line = format!("{} {} - {}", enabled, tool.id, tool.command);
            if !tool.args.is_empty() {
                line.push(' ');
                line.push_str(&tool.args.join(" "));
            }
            if !tool.description.is_empty() {
                line.push_str(&format!("\n    {}", tool.description));
            }
            line
        })
        .collect())
}

/// List configured tools
pub fn list_tools(config: &ToolflowConfig) -> Result<i32, String> {
    let lines = describe_tools(config)?;
    if lines.is_empty() {
        println!("(no tools configured)");
    }
    for line in lines {
        println!("{}", line);
    }
    Ok(0)
}
