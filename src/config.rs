//! Project and global configuration loading.
//!
//! Two JSON files drive PortMux:
//!
//! - [`ProjectConfig`] (`portmux.config.json` at a repository root) declares
//!   named groups of commands with their ports, working directories and
//!   environment overrides.
//! - [`GlobalConfig`] (`$HOME/.config/portmux/config.json`) registers
//!   repository aliases so groups can be resolved by name from anywhere.
//!
//! `${VAR}` references in command strings, environment values and port
//! entries are expanded against the command-scoped environment first and the
//! process environment second. Undefined variables expand to the empty
//! string with a warning, except in port entries where they are a hard
//! error because the result must parse as a positive integer.

use crate::error::{Error, Result};
use crate::{GLOBAL_CONFIG_FILE, PROJECT_CONFIG_FILE};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::warn;

fn var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static pattern compiles")
    })
}

/// Per-repository configuration, one `portmux.config.json` at the root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    /// Group definitions, keyed by name. Definition order is preserved and
    /// meaningful: the first group is the fallback outside the registry.
    pub groups: IndexMap<String, Group>,

    /// Runner settings. Only background mode is recognized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<RunnerSettings>,
}

/// Runner settings block of a project config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Execution mode for group commands
    pub mode: RunnerMode,
}

/// How group commands are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerMode {
    /// Detached background children (the only supported mode)
    Background,
}

/// A named set of commands run together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    /// Human-readable description shown in listings
    pub description: String,

    /// Commands in start order, at least one
    pub commands: Vec<CommandSpec>,
}

/// One supervised command inside a group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Process name, unique within the group
    pub name: String,

    /// Shell command line, run through the system shell
    pub command: String,

    /// TCP ports the command will bind, literal or `${VAR}` templates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<PortSpec>>,

    /// Working directory, absolute or relative to the project root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    /// Environment overrides applied on top of the process environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<IndexMap<String, String>>,
}

/// A port entry: a literal number or a string that resolves to one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    /// Literal port number
    Number(u64),
    /// Numeric string or `${VAR}` template
    Template(String),
}

/// Newest global config format this build understands
pub const GLOBAL_CONFIG_VERSION: u32 = 1;

/// Per-user registry of known repositories
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    /// Format version stamp; absent means version 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,

    /// Repository alias -> path and default group definition
    #[serde(default)]
    pub repositories: IndexMap<String, RepositoryEntry>,

    /// Log handling settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<LogSettings>,
}

/// One registered repository
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryEntry {
    /// Absolute path of the primary worktree
    pub path: PathBuf,

    /// Group definition name used when none is given
    pub group: String,
}

/// Log handling settings of the global config
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSettings {
    /// Size cap per log file in bytes
    #[serde(default = "default_max_log_bytes")]
    pub max_bytes: u64,

    /// When true, child stdio goes to a null sink instead of log files
    #[serde(default)]
    pub disabled: bool,
}

fn default_max_log_bytes() -> u64 {
    crate::DEFAULT_MAX_LOG_BYTES
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            max_bytes: crate::DEFAULT_MAX_LOG_BYTES,
            disabled: false,
        }
    }
}

impl GlobalConfig {
    /// Effective log settings, defaults when the block is absent
    pub fn log_settings(&self) -> LogSettings {
        self.logs.clone().unwrap_or_default()
    }
}

impl ProjectConfig {
    /// Validate the parsed config against the schema constraints.
    ///
    /// Checks that at least one group is defined, every group has at least
    /// one command, names and command strings are non-empty, and literal
    /// port numbers are in `1..=65535`.
    pub fn validate(&self, path: &str) -> Result<()> {
        if self.groups.is_empty() {
            return Err(Error::config_validation(path, "at least one group is required"));
        }

        for (group_name, group) in &self.groups {
            if group.commands.is_empty() {
                return Err(Error::config_validation(
                    path,
                    format!("group '{}' has no commands", group_name),
                ));
            }

            for command in &group.commands {
                if command.name.trim().is_empty() {
                    return Err(Error::config_validation(
                        path,
                        format!("group '{}' has a command with an empty name", group_name),
                    ));
                }
                if command.command.trim().is_empty() {
                    return Err(Error::config_validation(
                        path,
                        format!(
                            "command '{}' in group '{}' has an empty command string",
                            command.name, group_name
                        ),
                    ));
                }

                if let Some(ports) = &command.ports {
                    for spec in ports {
                        if let PortSpec::Number(n) = spec {
                            if *n == 0 || *n > u16::MAX as u64 {
                                return Err(Error::config_validation(
                                    path,
                                    format!(
                                        "command '{}' in group '{}' has invalid port {}",
                                        command.name, group_name, n
                                    ),
                                ));
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Look up a group definition by name
    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// First group in definition order, used for registry-less fallback
    pub fn first_group(&self) -> Option<(&String, &Group)> {
        self.groups.iter().next()
    }
}

/// Walk upward from `start_dir` looking for `portmux.config.json`.
///
/// Stops at the filesystem root. Returns the path of the first config file
/// encountered.
pub fn find_project_config(start_dir: &Path) -> Result<PathBuf> {
    let mut dir = start_dir.to_path_buf();
    loop {
        let candidate = dir.join(PROJECT_CONFIG_FILE);
        if candidate.is_file() {
            return Ok(candidate);
        }
        if !dir.pop() {
            return Err(Error::config_not_found(start_dir.display().to_string()));
        }
    }
}

/// Parse and validate a project config file
pub fn load_project(path: &Path) -> Result<ProjectConfig> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::config_parse(&display, e.to_string()))?;
    let config: ProjectConfig =
        serde_json::from_str(&raw).map_err(|e| Error::config_parse(&display, e.to_string()))?;
    config.validate(&display)?;
    Ok(config)
}

/// Path of the global config file under the config root
pub fn global_config_path() -> Result<PathBuf> {
    Ok(crate::config_root()?.join(GLOBAL_CONFIG_FILE))
}

/// Load the per-user global config.
///
/// An absent file is not an error; callers fall back to registry-less
/// resolution when `None` comes back.
pub fn load_global() -> Result<Option<GlobalConfig>> {
    let path = global_config_path()?;
    if !path.is_file() {
        return Ok(None);
    }

    let display = path.display().to_string();
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| Error::config_parse(&display, e.to_string()))?;
    let config: GlobalConfig =
        serde_json::from_str(&raw).map_err(|e| Error::config_parse(&display, e.to_string()))?;

    let version = config.version.unwrap_or(1);
    if version > GLOBAL_CONFIG_VERSION {
        return Err(Error::VersionMismatch {
            message: format!(
                "{} is version {}, this build understands up to {}",
                display, version, GLOBAL_CONFIG_VERSION
            ),
        });
    }

    Ok(Some(config))
}

/// Persist the global config via write-temp-then-rename.
///
/// Callers mutate the global config only while holding the global lock.
pub fn save_global(config: &GlobalConfig) -> Result<()> {
    let path = global_config_path()?;
    let root = crate::config_root()?;
    std::fs::create_dir_all(&root)?;

    let mut serialized = serde_json::to_string_pretty(config)?;
    serialized.push('\n');

    let mut temp = tempfile::NamedTempFile::new_in(&root)?;
    temp.write_all(serialized.as_bytes())?;
    temp.persist(&path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Expand `${VAR}` references in a shell command string.
///
/// Lookup order is the command-scoped environment, then the process
/// environment. Undefined names resolve to the empty string with a warning.
pub fn resolve_command_env(command: &str, command_env: &IndexMap<String, String>) -> String {
    expand_lenient(command, command_env, "command")
}

/// Expand every value of a command environment mapping.
///
/// Values are expanded against the original mapping, so self-references work
/// but resolved values are not re-evaluated (single-pass substitution).
pub fn resolve_env_object(command_env: &IndexMap<String, String>) -> IndexMap<String, String> {
    command_env
        .iter()
        .map(|(key, value)| (key.clone(), expand_lenient(value, command_env, key)))
        .collect()
}

/// Resolve every port entry of a command to a concrete port number.
///
/// Literal numbers are range-checked. Numeric strings are parsed. Strings
/// containing `${VAR}` are template-expanded first; an undefined variable is
/// a hard error here because the result must be a positive integer.
pub fn resolve_command_ports(
    ports: &[PortSpec],
    command_env: &IndexMap<String, String>,
    context: &str,
) -> Result<Vec<u16>> {
    let mut resolved = Vec::with_capacity(ports.len());

    for (index, spec) in ports.iter().enumerate() {
        let entry_context = format!("{}.ports[{}]", context, index);
        let port = match spec {
            PortSpec::Number(n) => validate_port(*n, &entry_context)?,
            PortSpec::Template(raw) => {
                let expanded = if raw.contains("${") {
                    expand_strict(raw, command_env, &entry_context)?
                } else {
                    raw.clone()
                };
                let parsed = expanded.trim().parse::<u64>().map_err(|_| {
                    Error::port_resolution(
                        &entry_context,
                        format!("'{}' is not a positive integer", expanded),
                    )
                })?;
                validate_port(parsed, &entry_context)?
            }
        };
        resolved.push(port);
    }

    Ok(resolved)
}

fn validate_port(value: u64, context: &str) -> Result<u16> {
    if value == 0 || value > u16::MAX as u64 {
        return Err(Error::port_resolution(
            context,
            format!("{} is outside 1..=65535", value),
        ));
    }
    Ok(value as u16)
}

fn lookup_var(name: &str, command_env: &IndexMap<String, String>) -> Option<String> {
    command_env
        .get(name)
        .cloned()
        .or_else(|| std::env::var(name).ok())
}

fn expand_lenient(input: &str, command_env: &IndexMap<String, String>, context: &str) -> String {
    var_pattern()
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match lookup_var(name, command_env) {
                Some(value) => value,
                None => {
                    warn!("${{{}}} is undefined in {}; using empty string", name, context);
                    String::new()
                }
            }
        })
        .into_owned()
}

fn expand_strict(
    input: &str,
    command_env: &IndexMap<String, String>,
    context: &str,
) -> Result<String> {
    let mut missing: Option<String> = None;
    let expanded = var_pattern()
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match lookup_var(name, command_env) {
                Some(value) => value,
                None => {
                    missing.get_or_insert_with(|| name.to_string());
                    String::new()
                }
            }
        })
        .into_owned();

    if let Some(name) = missing {
        return Err(Error::port_resolution(
            context,
            format!("${{{}}} is undefined", name),
        ));
    }
    Ok(expanded)
}
