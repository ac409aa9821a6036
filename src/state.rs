//! Durable process state records.
//!
//! One JSON file per `(group instance, process)` pair lives under
//! `$HOME/.config/portmux/state/`. The store treats corrupt or missing
//! files as absent records, writes atomically via temp-file-then-rename so
//! concurrent readers never observe half-written state, and deletes
//! idempotently. Every subsystem reads through this store; mutation happens
//! only under the owning group-instance lock.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Current status of a supervised process
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    /// Process is believed to be running
    Running,
    /// Process has stopped; the record is deleted right after this is
    /// published
    Stopped,
    /// Process ended in an error (a failed restart keeps this on disk)
    Error,
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Stopped => write!(f, "stopped"),
            ProcessStatus::Error => write!(f, "error"),
        }
    }
}

/// Durable record describing one supervised child process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessState {
    /// Owning group instance id
    pub group: String,

    /// Command name within the group
    pub process: String,

    /// Last published status
    pub status: ProcessStatus,

    /// PID of the detached child, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// Shell command line the child was started with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Error message when `status` is `Error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Start timestamp, ISO 8601 UTC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Stop timestamp, ISO 8601 UTC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,

    /// Log file the child's stdio is wired to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,

    /// Ports actually reserved for this process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<u16>>,

    /// Denormalized display fields so `ps` renders without re-resolving
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_definition_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl ProcessState {
    /// Create a minimal record; optional fields start empty
    pub fn new<G: Into<String>, P: Into<String>>(
        group: G,
        process: P,
        status: ProcessStatus,
    ) -> Self {
        Self {
            group: group.into(),
            process: process.into(),
            status,
            pid: None,
            command: None,
            error: None,
            started_at: None,
            stopped_at: None,
            log_path: None,
            ports: None,
            group_key: None,
            group_label: None,
            repository_name: None,
            group_definition_name: None,
            worktree_path: None,
            branch: None,
        }
    }
}

/// Make a string safe for use in file names.
///
/// Replaces every character outside `[A-Za-z0-9-]` with `-`, collapses
/// runs, strips leading/trailing `-` and lowercases.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut last_dash = false;

    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }

    slug.trim_matches('-').to_string()
}

/// File-backed registry of [`ProcessState`] records
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    /// Create a store rooted at the per-user config root
    pub fn new() -> Result<Self> {
        Ok(Self {
            root: crate::config_root()?,
        })
    }

    /// Create a store rooted at an explicit directory
    pub fn at_root<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the state files
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(crate::STATE_DIR)
    }

    /// Directory holding the log files
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(crate::LOG_DIR)
    }

    /// State file path for a `(group instance, process)` pair
    pub fn file_path(&self, group_instance_id: &str, process_name: &str) -> PathBuf {
        self.state_dir().join(format!(
            "{}-{}.json",
            slugify(group_instance_id),
            slugify(process_name)
        ))
    }

    /// Read one record.
    ///
    /// Absent and unparsable files both come back as `None`; corruption is
    /// treated as absence so callers never have to handle it.
    pub fn read(&self, group_instance_id: &str, process_name: &str) -> Option<ProcessState> {
        let path = self.file_path(group_instance_id, process_name);
        Self::read_file(&path)
    }

    fn read_file(path: &Path) -> Option<ProcessState> {
        let raw = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("Skipping unparsable state file {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Persist one record atomically.
    ///
    /// The state directory is created with mode 0700 when missing. The file
    /// is serialized with 2-space indent plus a trailing newline and moved
    /// into place with a rename so concurrent readers see old or new state,
    /// never a torn write.
    pub fn write(&self, state: &ProcessState) -> Result<()> {
        let dir = self.state_dir();
        ensure_private_dir(&dir)?;

        let mut serialized = serde_json::to_string_pretty(state)?;
        serialized.push('\n');

        let path = self.file_path(&state.group, &state.process);
        let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
        temp.write_all(serialized.as_bytes())?;
        temp.persist(&path).map_err(|e| Error::Io(e.error))?;

        debug!("Wrote state {} ({})", path.display(), state.status);
        Ok(())
    }

    /// Delete one record; silent when the file is already gone
    pub fn delete(&self, group_instance_id: &str, process_name: &str) -> Result<()> {
        let path = self.file_path(group_instance_id, process_name);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("Deleted state {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Enumerate every readable record.
    ///
    /// Entries that are not `.json` or fail to parse are skipped.
    pub fn list_all(&self) -> Result<Vec<ProcessState>> {
        let dir = self.state_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut states = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(state) = Self::read_file(&path) {
                states.push(state);
            }
        }

        states.sort_by(|a, b| a.group.cmp(&b.group).then_with(|| a.process.cmp(&b.process)));
        Ok(states)
    }

    /// Allocate a unique log file path for a process.
    ///
    /// The name embeds a short hash of the pair and the current time, so
    /// repeated starts of the same process never collide.
    pub fn generate_log_path(&self, group_instance_id: &str, process_name: &str) -> Result<PathBuf> {
        let dir = self.logs_dir();
        ensure_private_dir(&dir)?;

        let nanos = Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_else(|| Utc::now().timestamp_millis());
        let mut hasher = Sha1::new();
        hasher.update(group_instance_id.as_bytes());
        hasher.update(process_name.as_bytes());
        hasher.update(nanos.to_le_bytes());
        let digest = hasher.finalize();
        let tag: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();

        Ok(dir.join(format!(
            "{}-{}-{}.log",
            slugify(group_instance_id),
            slugify(process_name),
            tag
        )))
    }
}

fn ensure_private_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(dir)?;
    }

    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(dir)?;
    }

    Ok(())
}
