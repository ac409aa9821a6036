//! Global registry maintenance.
//!
//! `portmux sync` publishes the current project into the per-user global
//! config so it can be resolved by name from anywhere. All registry
//! mutation happens under the global lock; the write itself goes through
//! the atomic save in [`crate::config`].

use crate::config::{self, RepositoryEntry};
use crate::error::{Error, Result};
use crate::lock::{LockManager, LockScope};
use crate::resolver::{alias_conflicts, canonicalize_lossy};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Options of the `sync` command
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Register every group of a multi-group project
    pub all: bool,
    /// Register exactly this group
    pub group: Option<String>,
    /// Alias override; defaults to the repository directory name
    pub name: Option<String>,
    /// Compute the outcome without writing the registry
    pub dry_run: bool,
    /// Overwrite an alias that points at a different path
    pub force: bool,
    /// Drop registry entries whose path no longer holds a project config
    pub prune: bool,
}

/// What a sync did (or would do, under `--dry-run`)
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    /// `(alias, path, group)` triples written to the registry
    pub registered: Vec<(String, PathBuf, String)>,
    /// Aliases removed by `--prune`
    pub pruned: Vec<String>,
    /// True when nothing was persisted
    pub dry_run: bool,
}

/// Register the project at `start_dir` in the global registry.
///
/// A project defining several groups needs `--all` or `--group`; with
/// `--all` every group is registered, secondary groups under the alias
/// `<base>-<group>`. Re-pointing an existing alias at a different path
/// requires `--force`.
pub async fn sync_project(
    start_dir: &Path,
    opts: SyncOptions,
    locks: &LockManager,
) -> Result<SyncOutcome> {
    let project_config_path = config::find_project_config(start_dir)?;
    let project = config::load_project(&project_config_path)?;
    let project_root = canonicalize_lossy(
        project_config_path
            .parent()
            .unwrap_or_else(|| Path::new(".")),
    );

    let selected: Vec<String> = if let Some(group) = &opts.group {
        if project.group(group).is_none() {
            return Err(Error::group_resolution(format!(
                "group '{}' does not exist in {}",
                group,
                project_config_path.display()
            )));
        }
        vec![group.clone()]
    } else if opts.all || project.groups.len() == 1 {
        project.groups.keys().cloned().collect()
    } else {
        return Err(Error::config(format!(
            "{} defines {} groups; pass --all or --group <name>",
            project_config_path.display(),
            project.groups.len()
        )));
    };

    let base_alias = match &opts.name {
        Some(name) => name.clone(),
        None => project_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::config("cannot derive a repository name from the path"))?,
    };

    let outcome = locks
        .with_lock(LockScope::Global, "config", || async move {
            let mut global = config::load_global()?.unwrap_or_default();
            let mut outcome = SyncOutcome {
                dry_run: opts.dry_run,
                ..SyncOutcome::default()
            };

            if opts.prune {
                let stale: Vec<String> = global
                    .repositories
                    .iter()
                    .filter(|(_, entry)| {
                        !entry.path.join(crate::PROJECT_CONFIG_FILE).is_file()
                    })
                    .map(|(alias, _)| alias.clone())
                    .collect();
                for alias in stale {
                    debug!("Pruning stale registry entry '{}'", alias);
                    global.repositories.shift_remove(&alias);
                    outcome.pruned.push(alias);
                }
            }

            for (index, group) in selected.iter().enumerate() {
                let alias = if index == 0 {
                    base_alias.clone()
                } else {
                    format!("{}-{}", base_alias, group)
                };

                if alias_conflicts(&global, &alias, &project_root) && !opts.force {
                    let existing = global
                        .repositories
                        .get(&alias)
                        .map(|e| e.path.display().to_string())
                        .unwrap_or_default();
                    return Err(Error::DuplicateRepositoryName {
                        name: alias,
                        existing_path: existing,
                    });
                }

                global.repositories.insert(
                    alias.clone(),
                    RepositoryEntry {
                        path: project_root.clone(),
                        group: group.clone(),
                    },
                );
                outcome
                    .registered
                    .push((alias, project_root.clone(), group.clone()));
            }

            if !opts.dry_run {
                config::save_global(&global)?;
            }
            Ok(outcome)
        })
        .await?;

    for (alias, path, group) in &outcome.registered {
        info!(
            "{} '{}' -> {} (group '{}')",
            if outcome.dry_run { "Would register" } else { "Registered" },
            alias,
            path.display(),
            group
        );
    }
    Ok(outcome)
}

/// Write a starter project config into `dir`.
///
/// Refuses to overwrite an existing file unless `force` is set. The
/// interactive question flow lives above this; this is just the file
/// contract.
pub fn init_project(dir: &Path, force: bool) -> Result<PathBuf> {
    let path = dir.join(crate::PROJECT_CONFIG_FILE);
    if path.exists() && !force {
        return Err(Error::config(format!(
            "{} already exists; pass --force to overwrite",
            path.display()
        )));
    }

    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());

    let starter = serde_json::json!({
        "groups": {
            "app": {
                "description": format!("Development processes for {}", name),
                "commands": [
                    {
                        "name": "web",
                        "command": "echo 'replace with your dev server command'"
                    }
                ]
            }
        }
    });

    let mut serialized = serde_json::to_string_pretty(&starter)?;
    serialized.push('\n');
    std::fs::write(&path, serialized)?;
    Ok(path)
}
