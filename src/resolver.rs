//! Context-aware group resolution.
//!
//! Maps the caller's position on disk to a concrete group instance. The
//! same project config can be checked out in several Git worktrees of one
//! repository; each worktree gets its own instance identity so state and
//! locks never collide across worktrees.
//!
//! The instance id has the shape `<repoSlug>::<groupSlug>::<worktreeHash>`
//! where the hash is eight hex chars over the canonicalized worktree path.
//! Slugs alone could collide for aliases differing only in punctuation;
//! the path hash keeps instances apart even then.

use crate::config::{self, GlobalConfig, ProjectConfig};
use crate::error::{Error, Result};
use crate::git;
use crate::state::{slugify, ProcessStatus, StateStore};
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A fully resolved group instance, ready to start
#[derive(Debug, Clone)]
pub struct ResolvedGroup {
    /// Repository alias from the global config, or the first-defined group
    /// name in registry-less fallback
    pub repository_name: String,

    /// Canonicalized path of the worktree the caller is in
    pub worktree_path: PathBuf,

    /// Canonicalized path of the primary worktree; differs from
    /// `worktree_path` inside a secondary worktree
    pub repository_path: PathBuf,

    /// The parsed project config
    pub project_config: ProjectConfig,

    /// Where the project config was loaded from
    pub project_config_path: PathBuf,

    /// Which key inside `project_config.groups` to use
    pub group_definition_name: String,

    /// Branch checked out in the worktree, for display
    pub branch_label: Option<String>,
}

impl ResolvedGroup {
    /// The identity under which state and locks are keyed
    pub fn instance_id(&self) -> String {
        group_instance_id(
            &self.repository_name,
            &self.group_definition_name,
            &self.worktree_path,
        )
    }

    /// The group definition this resolution points at
    pub fn group(&self) -> Result<&config::Group> {
        self.project_config
            .group(&self.group_definition_name)
            .ok_or_else(|| {
                Error::group_resolution(format!(
                    "group '{}' disappeared from {}",
                    self.group_definition_name,
                    self.project_config_path.display()
                ))
            })
    }

    /// Human-oriented label: `repo/group`, with the branch when known
    pub fn label(&self) -> String {
        match &self.branch_label {
            Some(branch) => format!(
                "{}/{}@{}",
                self.repository_name, self.group_definition_name, branch
            ),
            None => format!("{}/{}", self.repository_name, self.group_definition_name),
        }
    }
}

/// Candidate produced by [`build_selectable`]
#[derive(Debug, Clone)]
pub struct SelectableGroup {
    /// Repository alias
    pub repository_name: String,
    /// Group definition the registry entry points at
    pub group_definition_name: String,
    /// Worktree this candidate would run in
    pub worktree_path: PathBuf,
    /// Primary worktree of the repository
    pub repository_path: PathBuf,
    /// Branch checked out in the worktree
    pub branch_label: Option<String>,
    /// Some process of this instance has a `Running` record
    pub is_running: bool,
    /// The worktree has a project config on disk
    pub has_config: bool,
    /// This candidate is the primary worktree
    pub is_primary: bool,
}

impl SelectableGroup {
    /// Instance id this candidate resolves to
    pub fn instance_id(&self) -> String {
        group_instance_id(
            &self.repository_name,
            &self.group_definition_name,
            &self.worktree_path,
        )
    }
}

/// Canonicalize a path, falling back to the path itself when the target
/// does not exist
pub fn canonicalize_lossy(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Eight hex chars over the canonicalized worktree path
pub fn worktree_hash(worktree_path: &Path) -> String {
    let canonical = canonicalize_lossy(worktree_path);
    let mut hasher = Sha1::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(4).map(|b| format!("{:02x}", b)).collect()
}

/// Deterministic instance identity for `(repository, group, worktree)`.
///
/// Same triple in, same id out, across any number of invocations; two
/// worktrees of the same repository always produce different ids.
pub fn group_instance_id(
    repository_name: &str,
    group_definition_name: &str,
    worktree_path: &Path,
) -> String {
    format!(
        "{}::{}::{}",
        slugify(repository_name),
        slugify(group_definition_name),
        worktree_hash(worktree_path)
    )
}

/// Resolve a group by its registered repository alias.
///
/// `worktree_path` overrides the registered primary path; the project
/// config is then re-loaded from there and the group definition must also
/// exist in that copy.
pub async fn resolve_by_name(
    repository_name: &str,
    worktree_path: Option<&Path>,
) -> Result<ResolvedGroup> {
    let global = config::load_global()?.ok_or_else(|| {
        Error::group_resolution(format!(
            "no global config found; run 'portmux sync' in the repository before using '{}'",
            repository_name
        ))
    })?;

    let entry = global.repositories.get(repository_name).ok_or_else(|| {
        Error::group_resolution(format!(
            "repository '{}' is not registered; run 'portmux sync' in its root",
            repository_name
        ))
    })?;

    let base = worktree_path.unwrap_or(&entry.path);
    let project_config_path = base.join(crate::PROJECT_CONFIG_FILE);
    if !project_config_path.is_file() {
        return Err(Error::InvalidRepositoryReference {
            name: repository_name.to_string(),
            path: base.display().to_string(),
        });
    }

    let project_config = config::load_project(&project_config_path)?;
    if project_config.group(&entry.group).is_none() {
        return Err(Error::group_resolution(format!(
            "group '{}' does not exist in {}",
            entry.group,
            project_config_path.display()
        )));
    }

    let worktree = canonicalize_lossy(base);
    let repository_path = canonicalize_lossy(&entry.path);
    let branch_label = branch_of_worktree(&worktree).await;

    Ok(ResolvedGroup {
        repository_name: repository_name.to_string(),
        worktree_path: worktree,
        repository_path,
        project_config,
        project_config_path,
        group_definition_name: entry.group.clone(),
        branch_label,
    })
}

/// Resolve the group instance for the current directory.
///
/// Finds the project config upward, then identifies the repository through
/// the Git worktree listing and the global registry. Without a registry
/// (or outside Git with no registered path match) the first group defined
/// in the project serves as both repository name and group definition.
pub async fn resolve_auto(start_dir: &Path) -> Result<ResolvedGroup> {
    let project_config_path = config::find_project_config(start_dir)?;
    let project_config = config::load_project(&project_config_path)?;
    let project_root = project_config_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| start_dir.to_path_buf());

    let Some(global) = config::load_global()? else {
        debug!("No global config; using first-group fallback");
        return fallback_resolution(project_config, project_config_path, &project_root);
    };

    let Some(git_root) = git::find_git_root(start_dir) else {
        // Outside Git the registry can still match by plain path equality
        let canonical_root = canonicalize_lossy(&project_root);
        for (alias, entry) in &global.repositories {
            if canonicalize_lossy(&entry.path) == canonical_root {
                return resolve_by_name(alias, Some(&canonical_root)).await;
            }
        }
        warn!(
            "{} is not inside a Git repository and is not registered; using the first group of the project config",
            start_dir.display()
        );
        return fallback_resolution(project_config, project_config_path, &project_root);
    };

    let worktrees = git::list_worktrees(&git_root).await;
    let current = canonicalize_lossy(start_dir);

    let current_worktree = worktrees
        .iter()
        .find(|wt| current.starts_with(canonicalize_lossy(&wt.path)))
        .cloned();

    let (worktree_path, branch_label) = match &current_worktree {
        Some(wt) => (canonicalize_lossy(&wt.path), wt.branch_label()),
        None => (canonicalize_lossy(&git_root), None),
    };

    // Identify the repository: a registry entry whose path is any of this
    // repo's worktrees (usually the primary) claims the whole set.
    let registered = global.repositories.iter().find(|(_, entry)| {
        let entry_path = canonicalize_lossy(&entry.path);
        if worktrees.is_empty() {
            entry_path == canonicalize_lossy(&git_root)
        } else {
            worktrees
                .iter()
                .any(|wt| canonicalize_lossy(&wt.path) == entry_path)
        }
    });

    let Some((alias, entry)) = registered else {
        return Err(Error::group_resolution(format!(
            "repository at {} is not registered; run 'portmux sync' in its root first",
            git_root.display()
        )));
    };

    if project_config.group(&entry.group).is_none() {
        return Err(Error::group_resolution(format!(
            "group '{}' does not exist in {}",
            entry.group,
            project_config_path.display()
        )));
    }

    let repository_path = worktrees
        .first()
        .map(|wt| canonicalize_lossy(&wt.path))
        .unwrap_or_else(|| canonicalize_lossy(&entry.path));

    Ok(ResolvedGroup {
        repository_name: alias.clone(),
        worktree_path,
        repository_path,
        project_config,
        project_config_path,
        group_definition_name: entry.group.clone(),
        branch_label,
    })
}

fn fallback_resolution(
    project_config: ProjectConfig,
    project_config_path: PathBuf,
    project_root: &Path,
) -> Result<ResolvedGroup> {
    let (name, _) = project_config.first_group().ok_or_else(|| {
        Error::group_resolution(format!(
            "{} defines no groups",
            project_config_path.display()
        ))
    })?;
    let name = name.clone();
    let canonical = canonicalize_lossy(project_root);

    Ok(ResolvedGroup {
        repository_name: name.clone(),
        worktree_path: canonical.clone(),
        repository_path: canonical,
        project_config,
        project_config_path,
        group_definition_name: name,
        branch_label: None,
    })
}

async fn branch_of_worktree(worktree_path: &Path) -> Option<String> {
    let root = git::find_git_root(worktree_path)?;
    let target = canonicalize_lossy(worktree_path);
    git::list_worktrees(&root)
        .await
        .iter()
        .find(|wt| canonicalize_lossy(&wt.path) == target)
        .and_then(|wt| wt.branch_label())
}

/// Enumerate every startable candidate across the global registry.
///
/// For each repository the Git worktree listing is expanded (falling back
/// to the registered path when empty); candidates without a local project
/// config are dropped unless `include_all` is set. Entries matching the
/// caller's current Git root sort first, then by repository name, branch
/// label, group name and worktree path.
pub async fn build_selectable(
    store: &StateStore,
    include_all: bool,
    current_dir: &Path,
) -> Result<Vec<SelectableGroup>> {
    let global = config::load_global()?.ok_or_else(|| {
        Error::group_resolution(
            "no global config found; run 'portmux sync' to register a repository".to_string(),
        )
    })?;

    let running = running_groups(store)?;
    let current_root = git::find_git_root(current_dir).map(|p| canonicalize_lossy(&p));

    let mut candidates = Vec::new();
    for (alias, entry) in &global.repositories {
        let worktrees = git::list_worktrees(&entry.path).await;
        let primary = worktrees
            .first()
            .map(|wt| canonicalize_lossy(&wt.path))
            .unwrap_or_else(|| canonicalize_lossy(&entry.path));

        let expanded: Vec<(PathBuf, Option<String>)> = if worktrees.is_empty() {
            vec![(canonicalize_lossy(&entry.path), None)]
        } else {
            worktrees
                .iter()
                .map(|wt| (canonicalize_lossy(&wt.path), wt.branch_label()))
                .collect()
        };

        for (worktree_path, branch_label) in expanded {
            let has_config = worktree_path.join(crate::PROJECT_CONFIG_FILE).is_file();
            if !include_all && !has_config {
                continue;
            }

            let candidate = SelectableGroup {
                repository_name: alias.clone(),
                group_definition_name: entry.group.clone(),
                repository_path: primary.clone(),
                is_primary: worktree_path == primary,
                is_running: running.contains(&group_instance_id(
                    alias,
                    &entry.group,
                    &worktree_path,
                )),
                worktree_path,
                branch_label,
                has_config,
            };
            candidates.push(candidate);
        }
    }

    candidates.sort_by(|a, b| {
        let a_current = matches_current(a, current_root.as_deref());
        let b_current = matches_current(b, current_root.as_deref());
        b_current
            .cmp(&a_current)
            .then_with(|| a.repository_name.cmp(&b.repository_name))
            .then_with(|| a.branch_label.cmp(&b.branch_label))
            .then_with(|| a.group_definition_name.cmp(&b.group_definition_name))
            .then_with(|| a.worktree_path.cmp(&b.worktree_path))
    });

    Ok(candidates)
}

fn matches_current(candidate: &SelectableGroup, current_root: Option<&Path>) -> bool {
    match current_root {
        Some(root) => candidate.worktree_path == root || candidate.repository_path == root,
        None => false,
    }
}

fn running_groups(store: &StateStore) -> Result<std::collections::HashSet<String>> {
    Ok(store
        .list_all()?
        .into_iter()
        .filter(|s| s.status == ProcessStatus::Running)
        .map(|s| s.group)
        .collect())
}

/// Check whether the given global config is present and references a
/// repository whose alias collides with `name` at a different path
pub fn alias_conflicts(global: &GlobalConfig, name: &str, path: &Path) -> bool {
    match global.repositories.get(name) {
        Some(entry) => canonicalize_lossy(&entry.path) != canonicalize_lossy(path),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryEntry;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::fs;

    fn write_project(dir: &Path) {
        fs::write(
            dir.join(crate::PROJECT_CONFIG_FILE),
            r#"{
                "groups": {
                    "app": {
                        "description": "main",
                        "commands": [{"name": "web", "command": "sleep 60", "ports": [3000]}]
                    }
                }
            }"#,
        )
        .unwrap();
    }

    #[test]
    fn test_group_instance_id_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let a = group_instance_id("acme", "app", dir.path());
        let b = group_instance_id("acme", "app", dir.path());
        assert_eq!(a, b);
    }

    #[test]
    fn test_group_instance_id_differs_per_worktree() {
        let dir = tempfile::tempdir().unwrap();
        let wt_a = dir.path().join("a");
        let wt_b = dir.path().join("b");
        fs::create_dir_all(&wt_a).unwrap();
        fs::create_dir_all(&wt_b).unwrap();

        let a = group_instance_id("acme", "app", &wt_a);
        let b = group_instance_id("acme", "app", &wt_b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_group_instance_id_format() {
        let dir = tempfile::tempdir().unwrap();
        let id = group_instance_id("Acme Corp", "My App", dir.path());
        let parts: Vec<&str> = id.split("::").collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "acme-corp");
        assert_eq!(parts[1], "my-app");
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_worktree_hash_resolves_symlinks() {
        #[cfg(unix)]
        {
            let dir = tempfile::tempdir().unwrap();
            let real = dir.path().join("real");
            fs::create_dir_all(&real).unwrap();
            let link = dir.path().join("link");
            std::os::unix::fs::symlink(&real, &link).unwrap();

            assert_eq!(worktree_hash(&real), worktree_hash(&link));
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_resolve_by_name_without_global_config() {
        let home = tempfile::tempdir().unwrap();
        std::env::set_var("PORTMUX_HOME", home.path());

        let err = resolve_by_name("acme", None).await.unwrap_err();
        assert!(matches!(err, Error::GroupResolution { .. }));
        assert!(err.to_string().contains("portmux sync"));

        std::env::remove_var("PORTMUX_HOME");
    }

    #[tokio::test]
    #[serial]
    async fn test_resolve_by_name_unregistered_alias() {
        let home = tempfile::tempdir().unwrap();
        std::env::set_var("PORTMUX_HOME", home.path());
        config::save_global(&GlobalConfig::default()).unwrap();

        let err = resolve_by_name("acme", None).await.unwrap_err();
        assert!(err.to_string().contains("not registered"));

        std::env::remove_var("PORTMUX_HOME");
    }

    #[tokio::test]
    #[serial]
    async fn test_resolve_by_name_happy_path() {
        let home = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();
        std::env::set_var("PORTMUX_HOME", home.path());
        write_project(repo.path());

        let mut global = GlobalConfig::default();
        global.repositories.insert(
            "acme".to_string(),
            RepositoryEntry {
                path: repo.path().to_path_buf(),
                group: "app".to_string(),
            },
        );
        config::save_global(&global).unwrap();

        let resolved = resolve_by_name("acme", None).await.unwrap();
        assert_eq!(resolved.repository_name, "acme");
        assert_eq!(resolved.group_definition_name, "app");
        assert_eq!(resolved.worktree_path, canonicalize_lossy(repo.path()));
        assert_eq!(resolved.group().unwrap().commands[0].name, "web");

        std::env::remove_var("PORTMUX_HOME");
    }

    #[tokio::test]
    #[serial]
    async fn test_resolve_by_name_missing_project_config() {
        let home = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();
        std::env::set_var("PORTMUX_HOME", home.path());

        // Registered path holds no portmux.config.json
        let mut global = GlobalConfig::default();
        global.repositories.insert(
            "acme".to_string(),
            RepositoryEntry {
                path: repo.path().to_path_buf(),
                group: "app".to_string(),
            },
        );
        config::save_global(&global).unwrap();

        let err = resolve_by_name("acme", None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRepositoryReference { .. }));

        std::env::remove_var("PORTMUX_HOME");
    }

    #[tokio::test]
    #[serial]
    async fn test_resolve_by_name_missing_group_definition() {
        let home = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();
        std::env::set_var("PORTMUX_HOME", home.path());
        write_project(repo.path());

        let mut global = GlobalConfig::default();
        global.repositories.insert(
            "acme".to_string(),
            RepositoryEntry {
                path: repo.path().to_path_buf(),
                group: "missing".to_string(),
            },
        );
        config::save_global(&global).unwrap();

        let err = resolve_by_name("acme", None).await.unwrap_err();
        assert!(err.to_string().contains("'missing'"));

        std::env::remove_var("PORTMUX_HOME");
    }

    #[tokio::test]
    #[serial]
    async fn test_resolve_auto_fallback_without_global_config() {
        let home = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();
        std::env::set_var("PORTMUX_HOME", home.path());
        write_project(repo.path());

        let resolved = resolve_auto(repo.path()).await.unwrap();
        // First group doubles as repository name and definition name
        assert_eq!(resolved.repository_name, "app");
        assert_eq!(resolved.group_definition_name, "app");
        assert_eq!(resolved.worktree_path, resolved.repository_path);

        std::env::remove_var("PORTMUX_HOME");
    }

    #[tokio::test]
    #[serial]
    async fn test_resolve_auto_path_equality_outside_git() {
        let home = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();
        std::env::set_var("PORTMUX_HOME", home.path());
        write_project(repo.path());

        let mut global = GlobalConfig::default();
        global.repositories.insert(
            "acme".to_string(),
            RepositoryEntry {
                path: repo.path().to_path_buf(),
                group: "app".to_string(),
            },
        );
        config::save_global(&global).unwrap();

        let resolved = resolve_auto(repo.path()).await.unwrap();
        assert_eq!(resolved.repository_name, "acme");

        std::env::remove_var("PORTMUX_HOME");
    }

    #[tokio::test]
    #[serial]
    async fn test_resolve_auto_no_project_config() {
        let home = tempfile::tempdir().unwrap();
        let empty = tempfile::tempdir().unwrap();
        std::env::set_var("PORTMUX_HOME", home.path());

        let err = resolve_auto(empty.path()).await.unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { .. }));

        std::env::remove_var("PORTMUX_HOME");
    }

    #[tokio::test]
    #[serial]
    async fn test_build_selectable_without_git() {
        let home = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();
        let bare = tempfile::tempdir().unwrap();
        std::env::set_var("PORTMUX_HOME", home.path());
        write_project(repo.path());

        let mut global = GlobalConfig::default();
        global.repositories.insert(
            "acme".to_string(),
            RepositoryEntry {
                path: repo.path().to_path_buf(),
                group: "app".to_string(),
            },
        );
        // Registered but without a project config on disk
        global.repositories.insert(
            "empty".to_string(),
            RepositoryEntry {
                path: bare.path().to_path_buf(),
                group: "app".to_string(),
            },
        );
        config::save_global(&global).unwrap();

        let store = StateStore::at_root(home.path());
        let candidates = build_selectable(&store, false, repo.path()).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].repository_name, "acme");
        assert!(candidates[0].has_config);
        assert!(candidates[0].is_primary);
        assert!(!candidates[0].is_running);

        // include_all keeps the config-less entry
        let all = build_selectable(&store, true, repo.path()).await.unwrap();
        assert_eq!(all.len(), 2);

        std::env::remove_var("PORTMUX_HOME");
    }

    #[test]
    fn test_alias_conflicts() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();

        let mut global = GlobalConfig::default();
        global.repositories.insert(
            "acme".to_string(),
            RepositoryEntry {
                path: dir_a.path().to_path_buf(),
                group: "app".to_string(),
            },
        );

        assert!(alias_conflicts(&global, "acme", dir_b.path()));
        assert!(!alias_conflicts(&global, "acme", dir_a.path()));
        assert!(!alias_conflicts(&global, "other", dir_b.path()));
    }
}
