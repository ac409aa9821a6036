//! Cross-process advisory locks.
//!
//! One lock file per `(scope, key)` under `$HOME/.config/portmux/locks/`.
//! Within one invocation the guarded body is a cooperative async
//! computation; across OS processes exclusion comes from an OS advisory
//! lock on the file. Acquisition retries with exponential backoff, and a
//! holder that has been sitting on the lock past the staleness threshold
//! gets stolen.
//!
//! The lock file content is `<pid> <unix-seconds>`, rewritten by each
//! holder at acquisition time. If the guarded future is cancelled the OS
//! releases the lock when the file handle drops.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::File;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Scope of a lock file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    /// Guards the global config registry
    Global,
    /// Guards one group instance
    Group,
}

impl LockScope {
    fn prefix(self) -> &'static str {
        match self {
            LockScope::Global => "global",
            LockScope::Group => "group",
        }
    }
}

/// File-based lock manager rooted at the config directory
#[derive(Debug, Clone)]
pub struct LockManager {
    root: PathBuf,
}

impl LockManager {
    /// Create a manager rooted at the per-user config root
    pub fn new() -> Result<Self> {
        Ok(Self {
            root: crate::config_root()?,
        })
    }

    /// Create a manager rooted at an explicit directory
    pub fn at_root<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Lock file path for a `(scope, key)` pair
    pub fn lock_path(&self, scope: LockScope, key: &str) -> PathBuf {
        self.root.join(crate::LOCK_DIR).join(format!(
            "{}-{}.lock",
            scope.prefix(),
            crate::state::slugify(key)
        ))
    }

    /// Run `body` while holding the `(scope, key)` lock.
    ///
    /// The lock is released on every exit path, including errors from the
    /// body. When the body succeeds but releasing fails, the release error
    /// is surfaced; when the body fails, its error wins and the release
    /// failure is only logged.
    pub async fn with_lock<T, F, Fut>(&self, scope: LockScope, key: &str, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let path = self.lock_path(scope, key);
        let file = self.acquire(&path).await?;
        debug!("Acquired lock {}", path.display());

        let result = body().await;

        match release(file) {
            Ok(()) => {
                debug!("Released lock {}", path.display());
                result
            }
            Err(reason) => match result {
                Ok(_) => Err(Error::LockRelease {
                    path: path.display().to_string(),
                    reason,
                }),
                Err(body_err) => {
                    warn!("Failed to release lock {}: {}", path.display(), reason);
                    Err(body_err)
                }
            },
        }
    }

    async fn acquire(&self, path: &Path) -> Result<File> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut delay = Duration::from_millis(crate::LOCK_RETRY_INITIAL_MS);
        for attempt in 0..crate::LOCK_MAX_RETRIES {
            match try_acquire(path)? {
                Some(file) => return Ok(file),
                None => {
                    if lock_is_stale(path) {
                        warn!("Stealing stale lock {}", path.display());
                        let _ = std::fs::remove_file(path);
                        continue;
                    }
                    debug!(
                        "Lock {} busy (attempt {}), retrying in {:?}",
                        path.display(),
                        attempt + 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_millis(crate::LOCK_RETRY_CAP_MS));
                }
            }
        }

        Err(Error::LockTimeout {
            path: path.display().to_string(),
        })
    }
}

/// Try to take the exclusive lock once; `None` when another holder has it
fn try_acquire(path: &Path) -> Result<Option<File>> {
    // Open without truncating so a concurrent holder's pid/timestamp
    // survives a failed attempt.
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;

    match file.try_lock_exclusive() {
        Ok(()) => {
            file.set_len(0)?;
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            writeln!(file, "{} {}", std::process::id(), now)?;
            Ok(Some(file))
        }
        Err(_) => Ok(None),
    }
}

fn release(file: File) -> std::result::Result<(), String> {
    fs2::FileExt::unlock(&file).map_err(|e| e.to_string())
}

/// Whether the on-disk lock's recorded timestamp exceeds the staleness
/// threshold. Malformed content counts as stale.
pub fn lock_is_stale(path: &Path) -> bool {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return false,
    };

    let recorded = raw
        .split_whitespace()
        .nth(1)
        .and_then(|field| field.parse::<u64>().ok());

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    match recorded {
        Some(ts) => now.saturating_sub(ts) > crate::LOCK_STALE_SECS,
        None => true,
    }
}
