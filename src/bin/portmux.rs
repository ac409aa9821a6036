//! PortMux CLI
//!
//! Command-line interface for the PortMux process supervisor.

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use portmux::config::{
    load_global, resolve_command_env, resolve_command_ports, resolve_env_object, CommandSpec,
    LogSettings,
};
use portmux::lock::{LockManager, LockScope};
use portmux::resolver::{self, ResolvedGroup, SelectableGroup};
use portmux::state::{ProcessStatus, StateStore};
use portmux::supervisor::{DisplayFields, StartOptions, Supervisor, SupervisorSettings};
use portmux::sync::{init_project, sync_project, SyncOptions};
use portmux::logwriter;
use std::io::Write as _;
use std::path::PathBuf;
use tracing::{error, warn};

#[derive(Parser, Debug)]
#[command(name = "portmux")]
#[command(about = "Supervise groups of long-running dev processes per Git worktree")]
#[command(version = portmux::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a project config and register it
    Init {
        /// Overwrite an existing portmux.config.json
        #[arg(long)]
        force: bool,
    },

    /// Register the current project in the global registry
    Sync {
        /// Register every group of a multi-group project
        #[arg(long)]
        all: bool,

        /// Register exactly this group
        #[arg(long)]
        group: Option<String>,

        /// Repository alias (defaults to the directory name)
        #[arg(long)]
        name: Option<String>,

        /// Show what would change without writing
        #[arg(long)]
        dry_run: bool,

        /// Overwrite an alias registered for a different path
        #[arg(long)]
        force: bool,

        /// Drop registry entries whose path lost its project config
        #[arg(long)]
        prune: bool,
    },

    /// Start one or all processes of a group
    Start {
        /// Repository alias (resolved from the current directory if omitted)
        group: Option<String>,

        /// Process name within the group
        process: Option<String>,

        /// Start every process of the group
        #[arg(long)]
        all: bool,
    },

    /// Stop one or all processes of a group
    Stop {
        /// Repository alias (resolved from the current directory if omitted)
        group: Option<String>,

        /// Process name within the group
        process: Option<String>,

        /// Stop every process of the group
        #[arg(long)]
        all: bool,

        /// SIGTERM->SIGKILL timeout in milliseconds
        #[arg(short = 't', long, default_value_t = portmux::DEFAULT_STOP_TIMEOUT_MS)]
        timeout: u64,
    },

    /// Stop then start processes of a group
    Restart {
        /// Repository alias (resolved from the current directory if omitted)
        group: Option<String>,

        /// Process name within the group
        process: Option<String>,

        /// Restart every process of the group
        #[arg(long)]
        all: bool,
    },

    /// List supervised processes with liveness verification
    Ps,

    /// Pick a group interactively, stop conflicting worktrees, start it
    Select {
        /// Include worktrees without a project config
        #[arg(long)]
        all: bool,
    },

    /// Show the tail of a process log
    Logs {
        /// Repository alias
        group: String,

        /// Process name
        process: String,

        /// Number of lines to show
        #[arg(short = 'n', long = "lines", default_value = "20")]
        lines: usize,

        /// Print the tail and exit (follow mode is not supported)
        #[arg(long)]
        no_follow: bool,

        /// Prefix each line with the process name
        #[arg(short = 't')]
        tag: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("portmux={}", log_level))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Init { force } => cmd_init(force).await,
        Commands::Sync {
            all,
            group,
            name,
            dry_run,
            force,
            prune,
        } => {
            cmd_sync(SyncOptions {
                all,
                group,
                name,
                dry_run,
                force,
                prune,
            })
            .await
        }
        Commands::Start {
            group,
            process,
            all,
        } => cmd_start(group.as_deref(), process.as_deref(), all).await,
        Commands::Stop {
            group,
            process,
            all,
            timeout,
        } => cmd_stop(group.as_deref(), process.as_deref(), all, timeout).await,
        Commands::Restart {
            group,
            process,
            all,
        } => cmd_restart(group.as_deref(), process.as_deref(), all).await,
        Commands::Ps => cmd_ps().await,
        Commands::Select { all } => cmd_select(all).await,
        Commands::Logs {
            group,
            process,
            lines,
            no_follow: _,
            tag,
        } => cmd_logs(&group, &process, lines, tag).await,
    }
}

fn make_supervisor() -> anyhow::Result<Supervisor> {
    let logs = load_global()?
        .map(|g| g.log_settings())
        .unwrap_or_else(LogSettings::default);
    let settings = SupervisorSettings {
        max_log_bytes: logs.max_bytes,
        logs_disabled: logs.disabled,
        ..SupervisorSettings::default()
    };
    Ok(Supervisor::with_settings(StateStore::new()?, settings))
}

async fn resolve_target(group: Option<&str>) -> anyhow::Result<ResolvedGroup> {
    match group {
        Some(name) => Ok(resolver::resolve_by_name(name, None).await?),
        None => {
            let cwd = std::env::current_dir()?;
            Ok(resolver::resolve_auto(&cwd).await?)
        }
    }
}

/// Pick the commands a start/stop/restart operates on
fn select_commands<'a>(
    resolved: &'a ResolvedGroup,
    process: Option<&str>,
    all: bool,
) -> anyhow::Result<Vec<&'a CommandSpec>> {
    let group = resolved.group()?;
    if let Some(name) = process {
        let command = group
            .commands
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| {
                anyhow!(
                    "process '{}' is not defined in group '{}'",
                    name,
                    resolved.group_definition_name
                )
            })?;
        return Ok(vec![command]);
    }

    if !all && group.commands.len() > 1 {
        bail!(
            "group '{}' has {} processes; pass a process name or --all",
            resolved.group_definition_name,
            group.commands.len()
        );
    }

    Ok(group.commands.iter().collect())
}

fn start_options_for(
    resolved: &ResolvedGroup,
    command: &CommandSpec,
) -> anyhow::Result<(String, StartOptions)> {
    let empty = indexmap::IndexMap::new();
    let command_env = command.env.as_ref().unwrap_or(&empty);

    let shell_command = resolve_command_env(&command.command, command_env);
    let ports = match &command.ports {
        Some(ports) => resolve_command_ports(
            ports,
            command_env,
            &format!("{}.{}", resolved.group_definition_name, command.name),
        )?,
        None => Vec::new(),
    };

    let project_root = resolved
        .project_config_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| resolved.worktree_path.clone());

    let opts = StartOptions {
        ports,
        cwd: command.cwd.clone(),
        env: resolve_env_object(command_env),
        project_root: Some(project_root),
        display: DisplayFields {
            group_key: Some(resolved.instance_id()),
            group_label: Some(resolved.label()),
            repository_name: Some(resolved.repository_name.clone()),
            group_definition_name: Some(resolved.group_definition_name.clone()),
            worktree_path: Some(resolved.worktree_path.clone()),
            branch: resolved.branch_label.clone(),
        },
    };

    Ok((shell_command, opts))
}

async fn cmd_init(force: bool) -> anyhow::Result<()> {
    let cwd = std::env::current_dir()?;
    let path = init_project(&cwd, force)?;
    println!("Wrote {}", path.display());

    let locks = LockManager::new()?;
    let outcome = sync_project(&cwd, SyncOptions::default(), &locks).await?;
    for (alias, _, group) in &outcome.registered {
        println!("Registered '{}' (group '{}')", alias, group);
    }
    Ok(())
}

async fn cmd_sync(opts: SyncOptions) -> anyhow::Result<()> {
    let cwd = std::env::current_dir()?;
    let locks = LockManager::new()?;
    let outcome = sync_project(&cwd, opts, &locks).await?;

    let verb = if outcome.dry_run {
        "Would register"
    } else {
        "Registered"
    };
    for (alias, path, group) in &outcome.registered {
        println!("{} '{}' -> {} (group '{}')", verb, alias, path.display(), group);
    }
    for alias in &outcome.pruned {
        println!("Pruned '{}'", alias);
    }
    Ok(())
}

/// A command resolved down to what the supervisor needs
struct PreparedCommand {
    name: String,
    shell_command: String,
    opts: StartOptions,
}

/// Expand env/ports for each selected command; pure resolution, so it
/// happens before the group lock is taken
fn prepare_commands(
    resolved: &ResolvedGroup,
    commands: &[&CommandSpec],
    single: bool,
) -> anyhow::Result<(Vec<PreparedCommand>, usize)> {
    let mut prepared = Vec::new();
    let mut failures = 0usize;

    for command in commands {
        match start_options_for(resolved, command) {
            Ok((shell_command, opts)) => prepared.push(PreparedCommand {
                name: command.name.clone(),
                shell_command,
                opts,
            }),
            Err(e) if single => return Err(e),
            Err(e) => {
                error!("Skipping '{}': {}", command.name, e);
                failures += 1;
            }
        }
    }

    Ok((prepared, failures))
}

async fn cmd_start(group: Option<&str>, process: Option<&str>, all: bool) -> anyhow::Result<()> {
    if all && process.is_some() {
        bail!("--all cannot be combined with a process name");
    }
    let resolved = resolve_target(group).await?;
    let commands = select_commands(&resolved, process, all)?;
    let single = commands.len() == 1;
    let (prepared, mut failures) = prepare_commands(&resolved, &commands, single)?;

    let mut supervisor = make_supervisor()?;
    let locks = LockManager::new()?;
    let instance_id = resolved.instance_id();
    let id = instance_id.clone();

    failures += locks
        .with_lock(LockScope::Group, &instance_id, || async move {
            let mut failures = 0usize;
            for command in &prepared {
                match supervisor
                    .start_process(&id, &command.name, &command.shell_command, command.opts.clone())
                    .await
                {
                    Ok(state) => {
                        println!(
                            "Started {} (pid {})",
                            command.name,
                            state.pid.unwrap_or_default()
                        );
                    }
                    Err(e) if single => return Err(e),
                    Err(e) => {
                        error!("Failed to start '{}': {}", command.name, e);
                        failures += 1;
                    }
                }
            }
            Ok(failures)
        })
        .await?;

    if failures > 0 {
        bail!("{} process(es) failed to start", failures);
    }
    Ok(())
}

async fn cmd_stop(
    group: Option<&str>,
    process: Option<&str>,
    all: bool,
    timeout: u64,
) -> anyhow::Result<()> {
    if all && process.is_some() {
        bail!("--all cannot be combined with a process name");
    }
    let resolved = resolve_target(group).await?;
    let mut supervisor = make_supervisor()?;
    let locks = LockManager::new()?;
    let instance_id = resolved.instance_id();

    if let Some(name) = process {
        let name = name.to_string();
        let id = instance_id.clone();
        let printed = name.clone();
        locks
            .with_lock(LockScope::Group, &instance_id, || async move {
                supervisor.stop_process(&id, &name, timeout).await
            })
            .await?;
        println!("Stopped {}", printed);
        return Ok(());
    }

    let group_def = resolved.group()?;
    if !all && group_def.commands.len() > 1 {
        bail!(
            "group '{}' has {} processes; pass a process name or --all",
            resolved.group_definition_name,
            group_def.commands.len()
        );
    }

    // Stop everything recorded for this instance, which also covers
    // processes renamed out of the config since they started.
    let targets: Vec<String> = supervisor
        .store()
        .list_all()?
        .into_iter()
        .filter(|s| s.group == instance_id)
        .map(|s| s.process)
        .collect();

    if targets.is_empty() {
        println!("No processes to stop");
        return Ok(());
    }

    let id = instance_id.clone();
    let failures = locks
        .with_lock(LockScope::Group, &instance_id, || async move {
            let mut failures = 0usize;
            for name in &targets {
                match supervisor.stop_process(&id, name, timeout).await {
                    Ok(()) => println!("Stopped {}", name),
                    Err(e) => {
                        error!("Failed to stop '{}': {}", name, e);
                        failures += 1;
                    }
                }
            }
            Ok(failures)
        })
        .await?;

    if failures > 0 {
        bail!("{} process(es) failed to stop", failures);
    }
    Ok(())
}

async fn cmd_restart(group: Option<&str>, process: Option<&str>, all: bool) -> anyhow::Result<()> {
    if all && process.is_some() {
        bail!("--all cannot be combined with a process name");
    }
    let resolved = resolve_target(group).await?;
    let commands = select_commands(&resolved, process, all)?;
    let single = commands.len() == 1;
    let (prepared, mut failures) = prepare_commands(&resolved, &commands, single)?;

    let mut supervisor = make_supervisor()?;
    let locks = LockManager::new()?;
    let instance_id = resolved.instance_id();
    let id = instance_id.clone();

    failures += locks
        .with_lock(LockScope::Group, &instance_id, || async move {
            let mut failures = 0usize;
            for command in &prepared {
                match supervisor
                    .restart_process(
                        &id,
                        &command.name,
                        &command.shell_command,
                        command.opts.clone(),
                        portmux::DEFAULT_STOP_TIMEOUT_MS,
                    )
                    .await
                {
                    Ok(state) => {
                        println!(
                            "Restarted {} (pid {})",
                            command.name,
                            state.pid.unwrap_or_default()
                        );
                    }
                    Err(e) if single => return Err(e),
                    Err(e) => {
                        error!("Failed to restart '{}': {}", command.name, e);
                        failures += 1;
                    }
                }
            }
            Ok(failures)
        })
        .await?;

    if failures > 0 {
        bail!("{} process(es) failed to restart", failures);
    }
    Ok(())
}

async fn cmd_ps() -> anyhow::Result<()> {
    let mut supervisor = make_supervisor()?;
    let logs = load_global()?
        .map(|g| g.log_settings())
        .unwrap_or_else(LogSettings::default);

    let states = supervisor.list_processes().await?;
    if states.is_empty() {
        println!("No processes running");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Process").add_attribute(Attribute::Bold),
            Cell::new("Group").add_attribute(Attribute::Bold),
            Cell::new("Status").add_attribute(Attribute::Bold),
            Cell::new("PID").add_attribute(Attribute::Bold),
            Cell::new("Ports").add_attribute(Attribute::Bold),
            Cell::new("Uptime").add_attribute(Attribute::Bold),
            Cell::new("Branch").add_attribute(Attribute::Bold),
        ]);

    for state in &states {
        // Keep log files inside their size budget as a side effect of
        // scanning, same as the supervisor does on start
        if let Some(log_path) = &state.log_path {
            if let Err(e) = logwriter::trim_to_tail(log_path, logs.max_bytes) {
                warn!("Could not trim {}: {}", log_path.display(), e);
            }
        }

        let status_cell = match state.status {
            ProcessStatus::Running => Cell::new("running").fg(Color::Green),
            ProcessStatus::Stopped => Cell::new("stopped").fg(Color::Yellow),
            ProcessStatus::Error => Cell::new("error").fg(Color::Red),
        };

        let uptime = state
            .started_at
            .map(|start| format_duration(chrono::Utc::now() - start))
            .unwrap_or_else(|| "-".to_string());

        let ports = state
            .ports
            .as_ref()
            .map(|p| {
                p.iter()
                    .map(|port| port.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            Cell::new(&state.process),
            Cell::new(state.group_label.as_deref().unwrap_or(&state.group)),
            status_cell,
            Cell::new(
                state
                    .pid
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(ports),
            Cell::new(uptime),
            Cell::new(state.branch.as_deref().unwrap_or("-")),
        ]);
    }

    println!("{}", table);
    Ok(())
}

async fn cmd_select(all: bool) -> anyhow::Result<()> {
    let cwd = std::env::current_dir()?;
    let store = StateStore::new()?;
    let candidates = resolver::build_selectable(&store, all, &cwd).await?;

    if candidates.is_empty() {
        println!("No selectable groups; run 'portmux sync' in a repository first");
        return Ok(());
    }

    for (index, candidate) in candidates.iter().enumerate() {
        let mut markers = Vec::new();
        if candidate.is_running {
            markers.push("running");
        }
        if candidate.is_primary {
            markers.push("primary");
        }
        if !candidate.has_config {
            markers.push("no config");
        }
        let markers = if markers.is_empty() {
            String::new()
        } else {
            format!(" [{}]", markers.join(", "))
        };

        println!(
            "{:>3}) {}/{} {} ({}){}",
            index + 1,
            candidate.repository_name,
            candidate.group_definition_name,
            candidate.branch_label.as_deref().unwrap_or("-"),
            candidate.worktree_path.display(),
            markers
        );
    }

    print!("Select a group [1-{}]: ", candidates.len());
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let choice: usize = line
        .trim()
        .parse()
        .map_err(|_| anyhow!("'{}' is not a number", line.trim()))?;
    let chosen = candidates
        .get(choice.saturating_sub(1))
        .ok_or_else(|| anyhow!("{} is out of range", choice))?;
    if !chosen.has_config {
        bail!(
            "{} has no {}; create one first",
            chosen.worktree_path.display(),
            portmux::PROJECT_CONFIG_FILE
        );
    }

    stop_conflicting_instances(chosen, &candidates).await?;

    let resolved =
        resolver::resolve_by_name(&chosen.repository_name, Some(&chosen.worktree_path)).await?;
    let group_def = resolved.group()?;
    let commands: Vec<&CommandSpec> = group_def.commands.iter().collect();
    let (prepared, _) = prepare_commands(&resolved, &commands, false)?;

    let mut supervisor = make_supervisor()?;
    let locks = LockManager::new()?;
    let instance_id = resolved.instance_id();
    let id = instance_id.clone();

    locks
        .with_lock(LockScope::Group, &instance_id, || async move {
            for command in &prepared {
                match supervisor
                    .start_process(&id, &command.name, &command.shell_command, command.opts.clone())
                    .await
                {
                    Ok(state) => println!(
                        "Started {} (pid {})",
                        command.name,
                        state.pid.unwrap_or_default()
                    ),
                    Err(e) => error!("Failed to start '{}': {}", command.name, e),
                }
            }
            Ok(())
        })
        .await?;

    Ok(())
}

/// Stop running instances of the same repository+group in other worktrees
async fn stop_conflicting_instances(
    chosen: &SelectableGroup,
    candidates: &[SelectableGroup],
) -> anyhow::Result<()> {
    let mut supervisor = make_supervisor()?;
    let locks = LockManager::new()?;

    for other in candidates {
        let conflicting = other.is_running
            && other.repository_name == chosen.repository_name
            && other.group_definition_name == chosen.group_definition_name
            && other.worktree_path != chosen.worktree_path;
        if !conflicting {
            continue;
        }

        let other_id = other.instance_id();
        println!(
            "Stopping conflicting worktree {} first",
            other.worktree_path.display()
        );

        let targets: Vec<String> = supervisor
            .store()
            .list_all()?
            .into_iter()
            .filter(|s| s.group == other_id)
            .map(|s| s.process)
            .collect();

        let id = other_id.clone();
        let sup = &mut supervisor;
        locks
            .with_lock(LockScope::Group, &other_id, || async move {
                for name in &targets {
                    if let Err(e) = sup
                        .stop_process(&id, name, portmux::DEFAULT_STOP_TIMEOUT_MS)
                        .await
                    {
                        error!("Failed to stop '{}': {}", name, e);
                    }
                }
                Ok(())
            })
            .await?;
    }

    Ok(())
}

async fn cmd_logs(group: &str, process: &str, lines: usize, tag: bool) -> anyhow::Result<()> {
    let resolved = resolve_target(Some(group)).await?;
    let store = StateStore::new()?;

    let state = store
        .read(&resolved.instance_id(), process)
        .ok_or_else(|| anyhow!("no state recorded for '{}' in '{}'", process, group))?;
    let log_path = state
        .log_path
        .ok_or_else(|| anyhow!("'{}' has no log file recorded", process))?;

    let content = std::fs::read_to_string(&log_path)
        .with_context(|| format!("cannot read {}", log_path.display()))?;
    let all_lines: Vec<&str> = content.lines().collect();
    let start = all_lines.len().saturating_sub(lines);
    for line in &all_lines[start..] {
        if tag {
            println!("[{}] {}", process, line);
        } else {
            println!("{}", line);
        }
    }
    Ok(())
}

fn format_duration(delta: chrono::Duration) -> String {
    let secs = delta.num_seconds().max(0);
    if secs >= 3600 {
        format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn test_cli_parsing_start() {
        let cli = Cli::try_parse_from(["portmux", "start", "acme", "web"]).unwrap();
        if let Commands::Start {
            group,
            process,
            all,
        } = cli.command
        {
            assert_eq!(group.as_deref(), Some("acme"));
            assert_eq!(process.as_deref(), Some("web"));
            assert!(!all);
        } else {
            panic!("Expected Start command");
        }
    }

    #[test]
    fn test_cli_parsing_start_all() {
        let cli = Cli::try_parse_from(["portmux", "start", "--all"]).unwrap();
        if let Commands::Start { group, all, .. } = cli.command {
            assert!(group.is_none());
            assert!(all);
        } else {
            panic!("Expected Start command");
        }
    }

    #[test]
    fn test_cli_parsing_stop_timeout() {
        let cli = Cli::try_parse_from(["portmux", "stop", "acme", "web", "-t", "5000"]).unwrap();
        if let Commands::Stop { timeout, .. } = cli.command {
            assert_eq!(timeout, 5000);
        } else {
            panic!("Expected Stop command");
        }
    }

    #[test]
    fn test_cli_parsing_stop_default_timeout() {
        let cli = Cli::try_parse_from(["portmux", "stop", "--all"]).unwrap();
        if let Commands::Stop { timeout, all, .. } = cli.command {
            assert_eq!(timeout, portmux::DEFAULT_STOP_TIMEOUT_MS);
            assert!(all);
        } else {
            panic!("Expected Stop command");
        }
    }

    #[test]
    fn test_cli_parsing_sync_flags() {
        let cli = Cli::try_parse_from([
            "portmux", "sync", "--all", "--name", "acme", "--dry-run", "--prune",
        ])
        .unwrap();
        if let Commands::Sync {
            all,
            name,
            dry_run,
            prune,
            force,
            group,
        } = cli.command
        {
            assert!(all);
            assert_eq!(name.as_deref(), Some("acme"));
            assert!(dry_run);
            assert!(prune);
            assert!(!force);
            assert!(group.is_none());
        } else {
            panic!("Expected Sync command");
        }
    }

    #[test]
    fn test_cli_parsing_logs() {
        let cli =
            Cli::try_parse_from(["portmux", "logs", "acme", "web", "-n", "50", "--no-follow"])
                .unwrap();
        if let Commands::Logs {
            group,
            process,
            lines,
            no_follow,
            tag,
        } = cli.command
        {
            assert_eq!(group, "acme");
            assert_eq!(process, "web");
            assert_eq!(lines, 50);
            assert!(no_follow);
            assert!(!tag);
        } else {
            panic!("Expected Logs command");
        }
    }

    #[test]
    fn test_cli_logs_requires_process() {
        let err = Cli::try_parse_from(["portmux", "logs", "acme"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(chrono::Duration::seconds(42)), "42s");
        assert_eq!(format_duration(chrono::Duration::seconds(90)), "1m30s");
        assert_eq!(format_duration(chrono::Duration::seconds(3700)), "1h1m");
    }
}
