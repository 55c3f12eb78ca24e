//! Configuration errors

use thiserror::Error;

/// Problems found in a workflow or tool definition
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("invalid workflow '{name}':\n  {}", errors.join("\n  "))]
    InvalidWorkflow { name: String, errors: Vec<String> },

    #[error("workflow '{name}' not found")]
    WorkflowNotFound { name: String },

    #[error("invalid tool '{id}': {message}")]
    InvalidTool { id: String, message: String },
}
