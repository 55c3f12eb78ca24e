//! Tool definitions and lookup

use super::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A registered, callable tool
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Tool {
    /// Tool id, taken from the table key
    #[serde(skip)]
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// What the tool does
    #[serde(default)]
    pub description: String,

    /// Command to execute
    pub command: String,

    /// Arguments for `run` actions
    #[serde(default)]
    pub args: Vec<String>,

    /// Arguments for `test` actions (falls back to `args`)
    pub test_args: Option<Vec<String>>,

    /// Additional environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Working directory for the process
    pub working_dir: Option<String>,

    /// Whether this tool can be resolved
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for Tool {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            description: String::new(),
            command: String::new(),
            args: Vec::new(),
            test_args: None,
            env: BTreeMap::new(),
            working_dir: None,
            enabled: default_enabled(),
        }
    }
}

impl Tool {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Name shown to users
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.command.trim().is_empty() {
            return Err(ConfigError::InvalidTool {
                id: self.id.clone(),
                message: "command is empty".into(),
            });
        }
        Ok(())
    }
}

/// Synchronous tool lookup used by the runner
pub trait ToolResolver: Send + Sync {
    fn resolve(&self, tool_id: &str) -> Option<Tool>;
}

/// Tools known to this process, keyed by id
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from the `[tools]` config table
    pub fn from_config(tools: &HashMap<String, Tool>) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for (id, tool) in tools {
            let mut tool = tool.clone();
            tool.id = id.clone();
            registry.register(tool)?;
        }
        Ok(registry)
    }

    /// Register a tool, replacing any tool with the same id
    pub fn register(&mut self, tool: Tool) -> Result<(), ConfigError> {
        tool.validate()?;
        tracing::debug!(tool = %tool.id, command = %tool.command, "Registered tool");
        self.tools.insert(tool.id.clone(), tool);
        Ok(())
    }

    pub fn get(&self, tool_id: &str) -> Option<&Tool> {
        self.tools.get(tool_id)
    }

    /// All tools sorted by id
    pub fn list(&self) -> Vec<&Tool> {
        let mut tools: Vec<_> = self.tools.values().collect();
        tools.sort_by(|a, b| a.id.cmp(&b.id));
        tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl ToolResolver for ToolRegistry {
    fn resolve(&self, tool_id: &str) -> Option<Tool> {
        self.tools.get(tool_id).filter(|t| t.enabled).cloned()
    }
}
