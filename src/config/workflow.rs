//! Workflow and step definitions

use super::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// What a step asks its tool to do
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// Smoke-test the tool
    Test,
    /// Invoke the tool for real
    #[default]
    Run,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Test => write!(f, "test"),
            ActionType::Run => write!(f, "run"),
        }
    }
}

/// A single step of a workflow
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Step {
    /// Step id (unique within workflow)
    pub id: String,

    /// Display name, defaults to the id
    #[serde(default)]
    pub name: String,

    /// Tool to invoke
    #[serde(rename = "tool")]
    pub tool_id: String,

    /// Action type
    #[serde(default)]
    pub action: ActionType,

    /// Payload handed to the tool
    pub payload: Option<String>,

    /// Keep going if this step fails
    #[serde(default)]
    pub continue_on_error: bool,

    /// Timeout override in milliseconds
    pub timeout_ms: Option<u64>,
}

impl Step {
    pub fn new(id: impl Into<String>, tool_id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            tool_id: tool_id.into(),
            ..Default::default()
        }
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_action(mut self, action: ActionType) -> Self {
        self.action = action;
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
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
}

/// An ordered chain of tool invocations
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Workflow {
    /// Workflow id, defaults to the name
    #[serde(default)]
    pub id: String,

    /// Workflow name
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Steps, executed in order
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Workflow {
    pub fn new(id: impl Into<String>, name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            steps,
        }
    }

    /// Fill in ids and names left out of a hand-written file
    pub fn normalize(&mut self) {
        if self.id.is_empty() {
            self.id = self.name.clone();
        }
        for step in &mut self.steps {
            if step.name.is_empty() {
                step.name = step.id.clone();
            }
        }
    }

    /// Validate the workflow definition
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("workflow name is empty".to_string());
        }

        let mut seen = HashSet::new();
        for (idx, step) in self.steps.iter().enumerate() {
            if step.id.trim().is_empty() {
                errors.push(format!("step #{} has an empty id", idx + 1));
            } else if !seen.insert(step.id.as_str()) {
                errors.push(format!("duplicate step id: {}", step.id));
            }
            if step.tool_id.trim().is_empty() {
                errors.push(format!("step '{}' has no tool", step.display_name()));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::InvalidWorkflow {
                name: self.name.clone(),
                errors,
            })
        }
    }
}
