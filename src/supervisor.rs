//! Process lifecycle supervision.
//!
//! The supervisor owns the full start/stop/restart protocol around the
//! port engine and the state store. Every mutating entry point assumes the
//! caller already holds the group-instance lock; within that lock the
//! sequence reconcile -> plan -> spawn -> settle -> commit -> persist is
//! totally ordered.

use crate::config::find_project_config;
use crate::error::{Error, Result};
use crate::logwriter;
use crate::ports::PortEngine;
use crate::process::{is_pid_alive, send_kill, send_term, spawn_shell};
use crate::state::{ProcessState, ProcessStatus, StateStore};
use chrono::Utc;
use indexmap::IndexMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Tunable timings and log policy for the supervisor.
///
/// Defaults follow the documented protocol; integration tests compress
/// them to keep suites fast.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Delay after spawn before the child's PID is trusted
    pub settle_delay: Duration,
    /// Poll interval of the stop loop
    pub stop_poll_interval: Duration,
    /// Size cap applied when opening log files
    pub max_log_bytes: u64,
    /// When true, child stdio goes to a null sink
    pub logs_disabled: bool,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(crate::DEFAULT_SETTLE_DELAY_MS),
            stop_poll_interval: Duration::from_millis(100),
            max_log_bytes: crate::DEFAULT_MAX_LOG_BYTES,
            logs_disabled: false,
        }
    }
}

/// Denormalized fields copied into state records for display
#[derive(Debug, Clone, Default)]
pub struct DisplayFields {
    /// Stable group key (the instance id)
    pub group_key: Option<String>,
    /// Human-oriented label for the instance
    pub group_label: Option<String>,
    /// Repository alias
    pub repository_name: Option<String>,
    /// Group definition name inside the project config
    pub group_definition_name: Option<String>,
    /// Canonical worktree path
    pub worktree_path: Option<PathBuf>,
    /// Branch label of the worktree
    pub branch: Option<String>,
}

/// Options for [`Supervisor::start_process`]
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Ports to reserve before spawning; empty skips reservation
    pub ports: Vec<u16>,
    /// Working directory: absolute used verbatim, relative joined under
    /// the project root, absent means the project root itself
    pub cwd: Option<String>,
    /// Environment overlaid on the current process environment
    pub env: IndexMap<String, String>,
    /// Project root; located via the project config when absent
    pub project_root: Option<PathBuf>,
    /// Display fields denormalized into the state record
    pub display: DisplayFields,
}

/// Orchestrates detached children, reservations and durable state
#[derive(Debug)]
pub struct Supervisor {
    store: StateStore,
    engine: PortEngine,
    settings: SupervisorSettings,
}

impl Supervisor {
    /// Create a supervisor with default settings
    pub fn new(store: StateStore) -> Self {
        Self::with_settings(store, SupervisorSettings::default())
    }

    /// Create a supervisor with explicit settings
    pub fn with_settings(store: StateStore, settings: SupervisorSettings) -> Self {
        Self {
            engine: PortEngine::new(store.clone()),
            store,
            settings,
        }
    }

    /// The underlying state store
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Start one detached process.
    ///
    /// Runs the full protocol: reconcile orphans, plan the port
    /// reservation, refuse a duplicate live start, spawn through the
    /// system shell wired to a log file, wait out the settle delay, then
    /// commit and persist. The caller holds the group-instance lock for
    /// the whole call.
    pub async fn start_process(
        &mut self,
        group_instance_id: &str,
        process_name: &str,
        shell_command: &str,
        opts: StartOptions,
    ) -> Result<ProcessState> {
        self.engine.reconcile_from_state()?;

        let mut token: Option<String> = None;
        if !opts.ports.is_empty() {
            let plan = self
                .engine
                .plan_reservation(group_instance_id, process_name, &opts.ports)
                .await?;
            for warning in &plan.warnings {
                warn!("{}", warning);
            }
            token = Some(plan.token);
        }

        if let Some(existing) = self.store.read(group_instance_id, process_name) {
            let live = existing.status == ProcessStatus::Running
                && existing.pid.map(is_pid_alive).unwrap_or(false);
            if live {
                self.engine.release_reservation(token.as_deref());
                return Err(Error::process_start(process_name, "already running"));
            }
            debug!(
                "Removing stale state for {}/{}",
                group_instance_id, process_name
            );
            self.store.delete(group_instance_id, process_name)?;
        }

        let project_root = match &opts.project_root {
            Some(root) => root.clone(),
            None => {
                let cwd = std::env::current_dir()?;
                let result = find_project_config(&cwd).map(|p| {
                    p.parent().map(PathBuf::from).unwrap_or_else(|| cwd.clone())
                });
                match result {
                    Ok(root) => root,
                    Err(e) => {
                        self.engine.release_reservation(token.as_deref());
                        return Err(e);
                    }
                }
            }
        };

        let child_cwd = match &opts.cwd {
            Some(dir) => {
                let dir = PathBuf::from(dir);
                if dir.is_absolute() {
                    dir
                } else {
                    project_root.join(dir)
                }
            }
            None => project_root.clone(),
        };

        // Open the log sink before spawning so a log failure never leaves
        // a half-started child behind.
        let mut log_path = None;
        let (stdout, stderr) = if self.settings.logs_disabled {
            (Stdio::null(), Stdio::null())
        } else {
            let path = match self
                .store
                .generate_log_path(group_instance_id, process_name)
            {
                Ok(path) => path,
                Err(e) => {
                    self.engine.release_reservation(token.as_deref());
                    return Err(e);
                }
            };
            let file = match logwriter::open_for_append(&path, self.settings.max_log_bytes) {
                Ok(file) => file,
                Err(e) => {
                    self.engine.release_reservation(token.as_deref());
                    return Err(e);
                }
            };
            let stdout_handle = match file.try_clone() {
                Ok(clone) => clone,
                Err(e) => {
                    self.engine.release_reservation(token.as_deref());
                    return Err(e.into());
                }
            };
            log_path = Some(path);
            (Stdio::from(stdout_handle), Stdio::from(file))
        };

        info!("Starting {}/{}: {}", group_instance_id, process_name, shell_command);
        let child = match spawn_shell(shell_command, &child_cwd, &opts.env, stdout, stderr) {
            Ok(child) => child,
            Err(e) => {
                self.engine.release_reservation(token.as_deref());
                return Err(Error::process_start(process_name, e.to_string()));
            }
        };

        // The parent-side log descriptor was moved into the child's stdio;
        // nothing stays open on our side past this point.
        let Some(pid) = child.id() else {
            self.engine.release_reservation(token.as_deref());
            return Err(Error::process_start(process_name, "no pid"));
        };
        drop(child);

        sleep(self.settings.settle_delay).await;
        if !is_pid_alive(pid) {
            self.engine.release_reservation(token.as_deref());
            return Err(Error::process_start(process_name, "exited immediately"));
        }

        if let Some(token) = &token {
            self.engine.commit_reservation(token);
        }

        let mut state = ProcessState::new(group_instance_id, process_name, ProcessStatus::Running);
        state.pid = Some(pid);
        state.command = Some(shell_command.to_string());
        state.started_at = Some(Utc::now());
        state.log_path = log_path;
        state.ports = if opts.ports.is_empty() {
            None
        } else {
            Some(opts.ports.clone())
        };
        state.group_key = opts.display.group_key;
        state.group_label = opts.display.group_label;
        state.repository_name = opts.display.repository_name;
        state.group_definition_name = opts.display.group_definition_name;
        state.worktree_path = opts.display.worktree_path;
        state.branch = opts.display.branch;

        self.store.write(&state)?;
        info!("Started {}/{} with pid {}", group_instance_id, process_name, pid);
        Ok(state)
    }

    /// Stop one process: SIGTERM, bounded wait, then SIGKILL.
    ///
    /// State bookkeeping publishes a transient `Stopped` record, deletes
    /// it, and releases any reservation for the pair. The log file is
    /// removed best-effort on the way out.
    pub async fn stop_process(
        &mut self,
        group_instance_id: &str,
        process_name: &str,
        timeout_ms: u64,
    ) -> Result<()> {
        let Some(state) = self.store.read(group_instance_id, process_name) else {
            return Err(Error::process_stop(process_name, "no state"));
        };

        let pid = match (state.status, state.pid) {
            (ProcessStatus::Stopped, _) | (_, None) => {
                return self.finish_stop(group_instance_id, process_name, &state);
            }
            (_, Some(pid)) => pid,
        };

        if !is_pid_alive(pid) {
            return self.finish_stop(group_instance_id, process_name, &state);
        }

        info!("Stopping {}/{} (pid {})", group_instance_id, process_name, pid);
        if let Err(e) = send_term(pid) {
            self.engine
                .release_reservation_by_process(group_instance_id, process_name)?;
            return Err(Error::process_stop(
                process_name,
                format!("failed to signal pid {}: {}", pid, e),
            ));
        }

        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        while tokio::time::Instant::now() < deadline {
            if !is_pid_alive(pid) {
                return self.finish_stop(group_instance_id, process_name, &state);
            }
            sleep(self.settings.stop_poll_interval).await;
        }

        warn!(
            "{}/{} ignored the termination signal; killing pid {}",
            group_instance_id, process_name, pid
        );
        if let Err(e) = send_kill(pid) {
            return Err(Error::process_stop(
                process_name,
                format!("failed to kill pid {}: {}", pid, e),
            ));
        }

        // Brief grace for the kill to land
        for _ in 0..5 {
            if !is_pid_alive(pid) {
                return self.finish_stop(group_instance_id, process_name, &state);
            }
            sleep(self.settings.stop_poll_interval).await;
        }

        Err(Error::process_stop(
            process_name,
            format!("pid {} survived the kill signal", pid),
        ))
    }

    fn finish_stop(
        &mut self,
        group_instance_id: &str,
        process_name: &str,
        state: &ProcessState,
    ) -> Result<()> {
        // Stopped is a transient published status: written, then the
        // record is removed.
        let mut stopped = state.clone();
        stopped.status = ProcessStatus::Stopped;
        stopped.stopped_at = Some(Utc::now());
        self.store.write(&stopped)?;

        self.store.delete(group_instance_id, process_name)?;
        self.engine
            .release_reservation_by_process(group_instance_id, process_name)?;

        if let Some(log_path) = &state.log_path {
            if let Err(e) = std::fs::remove_file(log_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!("Leaving log file {}: {}", log_path.display(), e);
                }
            }
        }

        info!("Stopped {}/{}", group_instance_id, process_name);
        Ok(())
    }

    /// Restart: stop, then start.
    ///
    /// A stop failure wraps into `ProcessRestart`. A start failure after a
    /// successful stop leaves an `Error` record carrying the message plus
    /// the prior log path and ports, then wraps into `ProcessRestart`.
    pub async fn restart_process(
        &mut self,
        group_instance_id: &str,
        process_name: &str,
        shell_command: &str,
        opts: StartOptions,
        timeout_ms: u64,
    ) -> Result<ProcessState> {
        let prior = self.store.read(group_instance_id, process_name);

        if let Err(e) = self
            .stop_process(group_instance_id, process_name, timeout_ms)
            .await
        {
            return Err(Error::process_restart(process_name, e.to_string()));
        }

        match self
            .start_process(group_instance_id, process_name, shell_command, opts)
            .await
        {
            Ok(state) => Ok(state),
            Err(e) => {
                let mut errored =
                    ProcessState::new(group_instance_id, process_name, ProcessStatus::Error);
                errored.error = Some(e.to_string());
                errored.command = Some(shell_command.to_string());
                if let Some(prior) = &prior {
                    errored.log_path = prior.log_path.clone();
                    errored.ports = prior.ports.clone();
                }
                if let Err(write_err) = self.store.write(&errored) {
                    warn!(
                        "Failed to record error state for {}/{}: {}",
                        group_instance_id, process_name, write_err
                    );
                }
                Err(Error::process_restart(process_name, e.to_string()))
            }
        }
    }

    /// Enumerate all records, verifying PID liveness.
    ///
    /// A `Running` record whose PID is dead gets a `Stopped` transition
    /// written and the file deleted before the view is returned; callers
    /// only ever see live `Running` records.
    pub async fn list_processes(&mut self) -> Result<Vec<ProcessState>> {
        let mut view = Vec::new();

        for state in self.store.list_all()? {
            if state.status == ProcessStatus::Running {
                let alive = state.pid.map(is_pid_alive).unwrap_or(false);
                if !alive {
                    debug!(
                        "Dropping dead record {}/{} (pid {:?})",
                        state.group, state.process, state.pid
                    );
                    self.finish_stop(&state.group, &state.process, &state)?;
                    continue;
                }
            }
            view.push(state);
        }

        Ok(view)
    }
}
