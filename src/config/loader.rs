//! Configuration loading with multi-layer merge

use super::error::ConfigError;
use super::{Tool, Workflow};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Top-level toolflow configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ToolflowConfig {
    /// Global defaults
    #[serde(default)]
    pub defaults: Defaults,

    /// Tool definitions
    #[serde(default)]
    pub tools: HashMap<String, Tool>,
}

/// Global default settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    /// Default per-step timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Stream tool output while it runs
    #[serde(default = "default_stream_output")]
    pub stream_output: bool,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_stream_output() -> bool {
    true
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            stream_output: default_stream_output(),
        }
    }
}

/// One config file as written, before it is layered onto the others
///
/// Only the keys a file actually sets override earlier layers.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    #[serde(default)]
    pub defaults: DefaultsLayer,

    #[serde(default)]
    pub tools: HashMap<String, Tool>,
}

/// `[defaults]` keys of a single config file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultsLayer {
    pub timeout_ms: Option<u64>,
    pub stream_output: Option<bool>,
}

impl ToolflowConfig {
    /// Load configuration from the standard hierarchy
    ///
    /// Load order (later overrides earlier):
    /// 1. Built-in defaults
    /// 2. ~/.config/toolflow/config.toml
    /// 3. .toolflow/config.toml (project)
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let project_config_path = project_dir
            .map(|p| p.join(".toolflow/config.toml"))
            .unwrap_or_else(|| PathBuf::from(".toolflow/config.toml"));

        Self::load_layers(
            Self::user_config_path()
                .into_iter()
                .chain(std::iter::once(project_config_path)),
        )
    }

    /// Layer the given files over the built-in defaults, skipping missing ones
    pub fn load_layers(paths: impl IntoIterator<Item = PathBuf>) -> Result<Self> {
        let mut config = Self::default();
        for path in paths {
            if !path.exists() {
                continue;
            }
            let layer = Self::load_file(&path)
                .with_context(|| format!("loading {}", path.display()))?;
            config.merge(layer);
        }
        Ok(config)
    }

    /// Load one configuration file
    pub fn load_file(path: &Path) -> Result<ConfigLayer> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut layer: ConfigLayer = toml::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        for (id, tool) in layer.tools.iter_mut() {
            tool.id = id.clone();
        }
        Ok(layer)
    }

    /// Get the user config path (~/.config/toolflow/config.toml)
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("toolflow/config.toml"))
    }

    /// Apply a layer on top of this config; every key it sets wins
    pub fn merge(&mut self, layer: ConfigLayer) {
        if let Some(timeout_ms) = layer.defaults.timeout_ms {
            self.defaults.timeout_ms = timeout_ms;
        }
        if let Some(stream_output) = layer.defaults.stream_output {
            self.defaults.stream_output = stream_output;
        }

        for (id, tool) in layer.tools {
            self.tools.insert(id, tool);
        }
    }
}

/// Load a workflow by path or name
///
/// Search order (first match wins):
/// 1. `name` as a file path
/// 2. .toolflow/workflows/{name}.toml (project)
/// 3. ~/.config/toolflow/workflows/{name}.toml (user)
pub fn load_workflow(name: &str, project_dir: Option<&Path>) -> Result<Workflow> {
    let direct = PathBuf::from(name);
    if direct.is_file() {
        return load_workflow_file(&direct);
    }

    let filename = format!("{}.toml", name);

    let project_path = project_dir
        .map(|p| p.join(".toolflow/workflows").join(&filename))
        .unwrap_or_else(|| PathBuf::from(".toolflow/workflows").join(&filename));

    if project_path.exists() {
        return load_workflow_file(&project_path);
    }

    if let Some(user_dir) = dirs::config_dir() {
        let user_path = user_dir.join("toolflow/workflows").join(&filename);
        if user_path.exists() {
            return load_workflow_file(&user_path);
        }
    }

    Err(ConfigError::WorkflowNotFound { name: name.into() }.into())
}

/// Load and validate a single workflow file
pub fn load_workflow_file(path: &Path) -> Result<Workflow> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let mut workflow: Workflow = toml::from_str(&contents)
        .with_context(|| format!("parsing {}", path.display()))?;

    workflow.normalize();
    workflow.validate()?;

    Ok(workflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ToolflowConfig::default();
        assert!(config.tools.is_empty());
        assert_eq!(config.defaults.timeout_ms, 30_000);
        assert!(config.defaults.stream_output);
    }

    #[test]
    fn test_load_config_file() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
            [defaults]
            timeout_ms = 5000

            [tools.echo]
            command = "cat"

            [tools.count]
            command = "wc"
            args = ["-c"]
        "#
        )
        .unwrap();

        let layer = ToolflowConfig::load_file(&config_path).unwrap();
        assert_eq!(layer.defaults.timeout_ms, Some(5000));
        assert_eq!(layer.defaults.stream_output, None);
        assert_eq!(layer.tools["echo"].id, "echo");
        assert_eq!(layer.tools["count"].args, vec!["-c"]);
    }

    #[test]
    fn test_config_merge() {
        let mut base = ToolflowConfig::default();
        base.tools.insert("echo".into(), Tool::new("echo", "cat"));

        let mut override_config = ConfigLayer::default();
        override_config.defaults.timeout_ms = Some(1000);
        override_config.defaults.stream_output = Some(false);
        override_config
            .tools
            .insert("echo".into(), Tool::new("echo", "/bin/cat"));
        override_config
            .tools
            .insert("count".into(), Tool::new("count", "wc"));

        base.merge(override_config);

        assert_eq!(base.defaults.timeout_ms, 1000);
        assert!(!base.defaults.stream_output);
        assert_eq!(base.tools["echo"].command, "/bin/cat");
        assert!(base.tools.contains_key("count"));
    }

    #[test]
    fn test_unset_keys_keep_earlier_layer() {
        let mut config = ToolflowConfig::default();
        config.defaults.timeout_ms = 5000;
        config.defaults.stream_output = false;

        config.merge(ConfigLayer::default());

        assert_eq!(config.defaults.timeout_ms, 5000);
        assert!(!config.defaults.stream_output);
    }

    #[test]
    fn test_project_layer_can_restore_defaults() {
        let dir = TempDir::new().unwrap();
        let user = dir.path().join("user.toml");
        let project = dir.path().join("project.toml");
        std::fs::write(&user, "[defaults]\ntimeout_ms = 5000\nstream_output = false\n").unwrap();
        std::fs::write(&project, "[defaults]\ntimeout_ms = 30000\nstream_output = true\n").unwrap();

        let config = ToolflowConfig::load_layers([user.clone(), project]).unwrap();
        assert_eq!(config.defaults.timeout_ms, 30_000);
        assert!(config.defaults.stream_output);

        let missing = dir.path().join("missing.toml");
        let config = ToolflowConfig::load_layers([user, missing]).unwrap();
        assert_eq!(config.defaults.timeout_ms, 5000);
        assert!(!config.defaults.stream_output);
    }

    #[test]
    fn test_unknown_config_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[defaults]\ntimeout = 5\n").unwrap();

        assert!(ToolflowConfig::load_layers([path]).is_err());
    }

    #[test]
    fn test_load_workflow_from_project_dir() {
        let dir = TempDir::new().unwrap();
        let workflows = dir.path().join(".toolflow/workflows");
        std::fs::create_dir_all(&workflows).unwrap();
        std::fs::write(
            workflows.join("release.toml"),
            r#"
            name = "release"

            [[steps]]
            id = "build"
            tool = "make"
            "#,
        )
        .unwrap();

        let workflow = load_workflow("release", Some(dir.path())).unwrap();
        assert_eq!(workflow.id, "release");
        assert_eq!(workflow.steps[0].name, "build");
    }

    #[test]
    fn test_load_workflow_by_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("adhoc.toml");
        std::fs::write(&path, "id = \"wf-1\"\nname = \"adhoc\"\n").unwrap();

        let workflow = load_workflow(path.to_str().unwrap(), None).unwrap();
        assert_eq!(workflow.id, "wf-1");
        assert!(workflow.steps.is_empty());
    }

    #[test]
    fn test_load_invalid_workflow() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dup.toml");
        std::fs::write(
            &path,
            r#"
            name = "dup"

            [[steps]]
            id = "a"
            tool = "x"

            [[steps]]
            id = "a"
            tool = "y"
            "#,
        )
        .unwrap();

        let err = load_workflow_file(&path).unwrap_err();
        assert!(err.to_string().contains("duplicate step id"));
    }

    #[test]
    fn test_missing_workflow() {
        let dir = TempDir::new().unwrap();
        let err = load_workflow("does-not-exist", Some(dir.path())).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
