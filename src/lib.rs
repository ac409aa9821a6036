//! # PortMux - Worktree-Aware Dev Process Supervisor
//!
//! A daemonless CLI that supervises groups of long-running background
//! processes for local development. PortMux reserves TCP ports per group
//! instance, spawns commands detached from the calling shell, and keeps all
//! state in plain JSON files so every invocation recovers from disk.
//!
//! ## Key Features
//!
//! ### Process Supervision
//! - **Detached spawning** - Children run in their own process group and
//!   survive the CLI exiting
//! - **Graceful stop protocol** - SIGTERM, bounded wait, then SIGKILL
//! - **Liveness verification** - PID checks with delete-on-dead reconciliation
//! - **Per-process log files** - Append-only with size-bounded tail retention
//!
//! ### Port Reservations
//! - **Two-phase reserve/commit** - Plan against live listeners and recorded
//!   reservations, commit only after the child settles
//! - **Conflict detection** - Overlapping requests fail before anything spawns
//! - **Orphan reconciliation** - Reservations whose PID died are swept on
//!   every start
//!
//! ### Worktree Awareness
//! - **Group instances** - The same port set can be configured in several
//!   Git worktrees of one repository; state and locks are keyed per worktree
//! - **Context resolution** - The current directory maps to a repository
//!   alias and group definition through the global registry
//!
//! ## Library Usage
//!
//! ```rust,no_run
//! use portmux::state::StateStore;
//! use portmux::supervisor::{StartOptions, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut supervisor = Supervisor::new(StateStore::new()?);
//!
//!     let opts = StartOptions {
//!         ports: vec![3000],
//!         ..Default::default()
//!     };
//!     supervisor
//!         .start_process("acme::app::1a2b3c4d", "web", "npm run dev", opts)
//!         .await?;
//!
//!     for record in supervisor.list_processes().await? {
//!         println!("{} is {}", record.process, record.status);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! # Start every command of the group resolved from the current directory
//! portmux start --all
//!
//! # Start one command of a named group
//! portmux start api web
//!
//! # Stop with a custom SIGTERM->SIGKILL timeout
//! portmux stop api web -t 5000
//!
//! # Liveness-verified listing
//! portmux ps
//!
//! # Register the current project in the global registry
//! portmux sync --group app
//! ```

use std::path::PathBuf;

pub mod config;
pub mod error;
pub mod git;
pub mod lock;
pub mod logwriter;
pub mod ports;
pub mod process;
pub mod resolver;
pub mod state;
pub mod supervisor;
pub mod sync;

// Re-export main types for convenience
pub use config::{GlobalConfig, ProjectConfig};
pub use error::{Error, Result};
pub use resolver::ResolvedGroup;
pub use state::{ProcessState, ProcessStatus, StateStore};
pub use supervisor::{Supervisor, SupervisorSettings};

/// Version of the PortMux library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Project config file name, looked up from the working directory upward
pub const PROJECT_CONFIG_FILE: &str = "portmux.config.json";

/// Global config file name inside the config root
pub const GLOBAL_CONFIG_FILE: &str = "config.json";

/// State directory name inside the config root
pub const STATE_DIR: &str = "state";

/// Lock directory name inside the config root
pub const LOCK_DIR: &str = "locks";

/// Log directory name inside the config root
pub const LOG_DIR: &str = "logs";

/// Default SIGTERM->SIGKILL stop timeout in milliseconds
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 3000;

/// Settle delay after spawning before the PID is trusted, in milliseconds
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 2000;

/// Default log size cap in bytes (10 MiB)
pub const DEFAULT_MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Fraction of the log size cap retained when a log file is trimmed
pub const LOG_RETAIN_FRACTION: f64 = 0.5;

/// Initial lock retry backoff in milliseconds
pub const LOCK_RETRY_INITIAL_MS: u64 = 100;

/// Lock retry backoff cap in milliseconds
pub const LOCK_RETRY_CAP_MS: u64 = 3000;

/// Number of lock acquisition attempts before giving up
pub const LOCK_MAX_RETRIES: u32 = 10;

/// Age in seconds after which an on-disk lock is considered stale
pub const LOCK_STALE_SECS: u64 = 30;

/// Resolve the per-user configuration root.
///
/// Checks the `PORTMUX_HOME` environment variable first, which allows
/// overriding the default root. This is particularly useful for testing and
/// for running isolated PortMux instances side by side. The default is
/// `$HOME/.config/portmux`.
pub fn config_root() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("PORTMUX_HOME") {
        return Ok(PathBuf::from(home));
    }

    let home_dir =
        dirs::home_dir().ok_or_else(|| Error::config("Could not determine home directory"))?;
    Ok(home_dir.join(".config").join("portmux"))
}
