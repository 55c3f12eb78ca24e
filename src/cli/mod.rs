//! CLI module for toolflow
//!
//! This module provides:
//! - Command implementations (run, validate, tools)
//! - Output sinks (console, JSON, quiet)
//! - Signal handling for graceful cancellation
//!
//! # Example
//!
//! ```ignore
//! use toolflow::cli::{commands, output};
//!
//! let sink = output::create_sink(output::OutputMode::Console);
//! let exit_code = commands::run_workflow("release", dir, &config, Default::default(), sink).await?;
//! ```

pub mod commands;
pub mod output;
pub mod signals;

pub use commands::{RunArgs, exit_code, list_tools, run_workflow, validate_workflow};
pub use output::{ConsoleSink, JsonSink, OutputMode, create_sink};
pub use signals::{EXIT_CANCELLED, Shutdown, shutdown_signal};
