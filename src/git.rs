//! Git integration for worktree discovery.
//!
//! PortMux shells out to `git` rather than linking a Git library; the two
//! commands it needs are `rev-parse --is-inside-work-tree` and
//! `worktree list --porcelain`. Porcelain output is blank-line-separated
//! records, each holding a `worktree <path>` line, a `HEAD <sha>` line and
//! either a `branch <ref>` line or a bare `detached` line.

use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// One entry of `git worktree list --porcelain`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worktree {
    /// Worktree root path as reported by git
    pub path: PathBuf,

    /// HEAD commit sha
    pub head: Option<String>,

    /// Checked-out branch ref (`refs/heads/...`), absent when detached
    pub branch: Option<String>,

    /// Worktree is on a detached HEAD
    pub detached: bool,
}

impl Worktree {
    /// Display label for the checked-out branch.
    ///
    /// Strips the `refs/heads/` prefix; a detached HEAD maps to `detached`.
    pub fn branch_label(&self) -> Option<String> {
        if self.detached {
            return Some("detached".to_string());
        }
        self.branch
            .as_ref()
            .map(|r| r.strip_prefix("refs/heads/").unwrap_or(r).to_string())
    }
}

/// Whether `dir` is inside a Git working tree
pub async fn is_inside_work_tree(dir: &Path) -> bool {
    let output = Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .await;

    match output {
        Ok(out) => out.status.success() && String::from_utf8_lossy(&out.stdout).trim() == "true",
        Err(e) => {
            debug!("git rev-parse failed in {}: {}", dir.display(), e);
            false
        }
    }
}

/// Locate the Git root by walking the ancestor chain for a `.git` entry.
///
/// A `.git` regular file (the gitdir pointer of a linked worktree) counts
/// the same as a `.git` directory.
pub fn find_git_root(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        if dir.join(".git").exists() {
            return Some(dir);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// List the worktrees of the repository containing `repo_dir`.
///
/// Failures (git missing, not a repository) degrade to an empty list;
/// callers fall back to the primary path.
pub async fn list_worktrees(repo_dir: &Path) -> Vec<Worktree> {
    let output = Command::new("git")
        .args(["worktree", "list", "--porcelain"])
        .current_dir(repo_dir)
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => {
            parse_worktree_porcelain(&String::from_utf8_lossy(&out.stdout))
        }
        Ok(out) => {
            debug!(
                "git worktree list failed in {}: {}",
                repo_dir.display(),
                String::from_utf8_lossy(&out.stderr).trim()
            );
            Vec::new()
        }
        Err(e) => {
            debug!("git worktree list failed in {}: {}", repo_dir.display(), e);
            Vec::new()
        }
    }
}

/// Parse `git worktree list --porcelain` output
pub fn parse_worktree_porcelain(output: &str) -> Vec<Worktree> {
    let mut worktrees = Vec::new();
    let mut current: Option<Worktree> = None;

    for line in output.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            if let Some(worktree) = current.take() {
                worktrees.push(worktree);
            }
            continue;
        }

        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(worktree) = current.take() {
                worktrees.push(worktree);
            }
            current = Some(Worktree {
                path: PathBuf::from(path),
                head: None,
                branch: None,
                detached: false,
            });
        } else if let Some(worktree) = current.as_mut() {
            if let Some(sha) = line.strip_prefix("HEAD ") {
                worktree.head = Some(sha.to_string());
            } else if let Some(branch) = line.strip_prefix("branch ") {
                worktree.branch = Some(branch.to_string());
            } else if line == "detached" {
                worktree.detached = true;
            }
            // "bare", "locked", "prunable" annotations are ignored
        }
    }

    if let Some(worktree) = current.take() {
        worktrees.push(worktree);
    }

    worktrees
}
