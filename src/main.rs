use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use toolflow::cli::{self, OutputMode, RunArgs};
use toolflow::config::ToolflowConfig;
use toolflow::logging;

#[derive(Parser)]
#[command(name = "toolflow")]
#[command(about = "Run chains of registered tools as linear workflows")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory (defaults to current)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress progress output
    #[arg(long, global = true)]
    quiet: bool,

    /// Also write JSON logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow
    Run {
        /// Workflow name or path to a workflow file
        workflow: String,

        /// Default per-step timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Emit run events as JSON lines on stdout
        #[arg(long)]
        json: bool,

        /// Only show tool output once each step finishes
        #[arg(long)]
        no_stream: bool,

        /// Keep a log of this run under the toolflow config directory
        #[arg(long)]
        log: bool,
    },

    /// Validate a workflow without running it
    Validate {
        /// Workflow name or path to a workflow file
        workflow: String,
    },

    /// List configured tools
    Tools,
}

/// File-name-safe label for a workflow given by name or path
fn workflow_stem(workflow: &str) -> String {
    std::path::Path::new(workflow)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workflow".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_file = match (&cli.log_file, &cli.command) {
        (Some(path), _) => Some(path.clone()),
        (None, Commands::Run { workflow, log: true, .. }) => {
            Some(logging::default_log_path(&workflow_stem(workflow))?)
        }
        _ => None,
    };
    logging::init_logging(cli.debug, cli.quiet, log_file)?;

    let working_dir = match cli.dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let config = ToolflowConfig::load(Some(&working_dir))?;

    let result = match cli.command {
        Commands::Run {
            workflow,
            timeout_ms,
            json,
            no_stream,
            ..
        } => {
            let sink = cli::create_sink(OutputMode::from_flags(json, cli.quiet));
            let args = RunArgs {
                timeout_ms,
                no_stream,
            };
            cli::run_workflow(&workflow, &working_dir, &config, args, sink).await
        }
        Commands::Validate { workflow } => {
            cli::validate_workflow(&workflow, Some(&working_dir), &config)
        }
        Commands::Tools => cli::list_tools(&config),
    };

    match result {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
