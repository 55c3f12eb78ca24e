//! Configuration types and loading for toolflow

mod error;
mod loader;
mod tool;
mod workflow;

pub use error::ConfigError;
pub use loader::{ConfigLayer, Defaults, DefaultsLayer, ToolflowConfig, load_workflow, load_workflow_file};
pub use tool::{Tool, ToolRegistry, ToolResolver};
pub use workflow::{ActionType, Step, Workflow};
