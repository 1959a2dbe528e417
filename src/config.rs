use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ExitError;

/// Config file name constants.
pub const CONFIG_TOML: &str = "gt.toml";
pub const CONFIG_JSON: &str = "gt.json";

/// Environment variable overriding town root discovery.
pub const TOWN_ROOT_ENV: &str = "GT_TOWN_ROOT";

/// Find the config file in a town root, preferring gt.toml over gt.json.
pub fn find_config(dir: &Path) -> Option<PathBuf> {
    let toml_path = dir.join(CONFIG_TOML);
    if toml_path.exists() {
        return Some(toml_path);
    }
    let json_path = dir.join(CONFIG_JSON);
    if json_path.exists() {
        return Some(json_path);
    }
    None
}

/// Walk up from `start` to the first directory that looks like a town root:
/// one holding a config file or a `mayor/` directory.
pub fn find_town_root(start: &Path) -> anyhow::Result<PathBuf> {
    for dir in start.ancestors() {
        if find_config(dir).is_some() || dir.join("mayor").is_dir() {
            return Ok(dir.to_path_buf());
        }
    }
    Err(ExitError::Config(format!(
        "no {CONFIG_TOML} or mayor/ found at or above {} (is this a town?)",
        start.display()
    ))
    .into())
}

/// Resolve the town root from an explicit flag, `GT_TOWN_ROOT`, or the
/// current directory, in that order.
pub fn resolve_town_root(flag: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(root) = flag {
        return Ok(root.to_path_buf());
    }
    if let Ok(root) = std::env::var(TOWN_ROOT_ENV)
        && !root.is_empty()
    {
        return Ok(PathBuf::from(root));
    }
    let cwd = std::env::current_dir().context("could not determine current directory")?;
    find_town_root(&cwd)
}

/// Town-level configuration (`gt.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub town: TownConfig,
    #[serde(default)]
    pub doctor: DoctorConfig,
    #[serde(default)]
    pub processes: ProcessConfig,
    #[serde(default)]
    pub queues: Vec<QueueConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TownConfig {
    /// Town name; defaults to the town directory name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DoctorConfig {
    /// Upper bound on every external query or kill issued during a pass.
    #[serde(default = "default_command_timeout", alias = "commandTimeoutSecs")]
    pub command_timeout_secs: u64,
}

impl Default for DoctorConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
        }
    }
}

impl DoctorConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }
}

/// How worker processes are recognised in the process table.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProcessConfig {
    /// Executable names (`comm`) of worker CLIs.
    #[serde(default = "default_worker_commands", alias = "workerCommands")]
    pub worker_commands: Vec<String>,
    /// Command-line flag present only on fleet-spawned workers.
    #[serde(default = "default_managed_flag", alias = "managedFlag")]
    pub managed_flag: String,
    /// Case-insensitive regex of desktop helper processes to ignore.
    #[serde(default = "default_exclude_pattern", alias = "excludePattern")]
    pub exclude_pattern: String,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            worker_commands: default_worker_commands(),
            managed_flag: default_managed_flag(),
            exclude_pattern: default_exclude_pattern(),
        }
    }
}

impl ProcessConfig {
    /// Compile the exclusion pattern.
    pub fn exclude_regex(&self) -> anyhow::Result<Regex> {
        Regex::new(&self.exclude_pattern).map_err(|e| {
            ExitError::Config(format!(
                "invalid processes.exclude_pattern {:?}: {e}",
                self.exclude_pattern
            ))
            .into()
        })
    }
}

/// Who may claim from a named work queue.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueueConfig {
    pub name: String,
    /// Worker identity patterns (`rig/polecats/*`, `mayor/`, `*`).
    #[serde(default)]
    pub workers: Vec<String>,
}

fn default_command_timeout() -> u64 { 5 }
fn default_worker_commands() -> Vec<String> {
    vec!["claude".into(), "claude-code".into(), "codex".into()]
}
fn default_managed_flag() -> String { "--dangerously-skip-permissions".into() }
fn default_exclude_pattern() -> String { r"(?i)(Claude\.app|claude-native|chrome-native)".into() }

impl Config {
    /// Load config from a file (TOML or JSON, auto-detected by extension).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            "toml" => Self::parse_toml(&contents),
            "json" => Self::parse_json(&contents),
            _ => Self::parse_toml(&contents).or_else(|_| Self::parse_json(&contents)),
        }
    }

    /// Load the town's config, or defaults when the town has no config file.
    pub fn load_for_town(town_root: &Path) -> anyhow::Result<Self> {
        match find_config(town_root) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string.
    pub fn parse_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| ExitError::Config(format!("invalid {CONFIG_TOML}: {e}")).into())
    }

    /// Parse config from a JSON string.
    pub fn parse_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ExitError::Config(format!("invalid {CONFIG_JSON}: {e}")).into())
    }

    /// Serialize config to a TOML string with section comments.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        let raw = toml::to_string_pretty(self).context("serializing config to TOML")?;

        let mut doc: toml_edit::DocumentMut = raw
            .parse()
            .context("parsing generated TOML for comment injection")?;

        doc.decor_mut().set_prefix("# Town configuration for gt\n\n");

        fn set_table_comment(doc: &mut toml_edit::DocumentMut, key: &str, comment: &str) {
            if let Some(tbl) = doc.get_mut(key).and_then(toml_edit::Item::as_table_mut) {
                tbl.decor_mut().set_prefix(comment);
            }
        }

        set_table_comment(&mut doc, "town", "# Town identity (name defaults to the directory name)\n");
        set_table_comment(&mut doc, "doctor", "\n# Health pass limits\n");
        set_table_comment(
            &mut doc,
            "processes",
            "\n# Worker process recognition\n# managed_flag marks fleet-spawned workers; others are never killed\n",
        );

        Ok(doc.to_string())
    }

    /// Effective town name: configured, else the town directory name.
    pub fn town_name(&self, town_root: &Path) -> String {
        if let Some(name) = self.town.name.as_deref()
            && !name.is_empty()
        {
            return name.to_string();
        }
        town_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Look up a queue's configuration by name.
    pub fn queue(&self, name: &str) -> Option<&QueueConfig> {
        self.queues.iter().find(|q| q.name == name)
    }
}
