//! Two-phase TCP port reservations.
//!
//! Phase 1 (`plan_reservation`) probes the requested ports for live
//! listeners, replays the durable reservations derived from the state
//! store, and records a pending entry keyed by a random token. Phase 2
//! (`commit_reservation`) drops the pending entry once the supervisor has
//! written the durable `ProcessState`; the state file IS the committed
//! reservation, the pending map only exists so concurrent planners inside
//! one invocation see intended usage and failure paths can back out
//! without touching disk.
//!
//! Port availability can change between the probe and the spawn; the
//! group-instance lock held around the whole plan->spawn->commit sequence
//! is what prevents cross-process conflicts.

use crate::error::{Error, Result};
use crate::process::is_pid_alive;
use crate::state::{ProcessStatus, StateStore};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// How long a connect probe waits before the port counts as free
const PROBE_TIMEOUT: Duration = Duration::from_millis(250);

/// A durable reservation derived from a `Running` state record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// Owning group instance
    pub group: String,
    /// Owning process name
    pub process: String,
    /// Ports held by the process
    pub ports: Vec<u16>,
    /// Recorded PID
    pub pid: Option<u32>,
    /// When the owning process started
    pub started_at: Option<DateTime<Utc>>,
}

/// A pre-commit reservation held only in process memory
#[derive(Debug, Clone)]
pub struct PendingReservation {
    /// Owning group instance
    pub group: String,
    /// Owning process name
    pub process: String,
    /// Ports the planner intends to use
    pub ports: Vec<u16>,
    /// When the plan was made
    pub reserved_at: DateTime<Utc>,
}

/// Outcome of a successful phase-1 plan
#[derive(Debug, Clone)]
pub struct ReservationPlan {
    /// Opaque token redeemed by commit or release
    pub token: String,
    /// Non-fatal findings surfaced to the user
    pub warnings: Vec<String>,
}

/// The port reservation engine.
///
/// Owned by one CLI invocation; the pending table lives and dies with it.
#[derive(Debug)]
pub struct PortEngine {
    store: StateStore,
    pending: HashMap<String, PendingReservation>,
}

impl PortEngine {
    /// Create an engine over the given state store
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            pending: HashMap::new(),
        }
    }

    /// Phase 1: validate and hold the requested ports.
    ///
    /// Fails `PortInUse` when a port has a live listener, or when another
    /// process of the same group instance holds it (durable or pending).
    /// Reservations are scoped per instance: two worktrees may reserve
    /// identical port lists, and the live-listener probe is what arbitrates
    /// if their children really bind. A reservation by the same
    /// `(group, process)` pair is not fatal; it only produces a warning.
    pub async fn plan_reservation(
        &mut self,
        group_instance_id: &str,
        process_name: &str,
        ports: &[u16],
    ) -> Result<ReservationPlan> {
        for port in ports {
            if is_port_listening(*port).await {
                return Err(Error::PortInUse(*port));
            }
        }

        let mut warnings = Vec::new();
        let reservations = self.load_reservations_from_state()?;

        for reservation in &reservations {
            if reservation.group != group_instance_id {
                continue;
            }
            if reservation.process == process_name {
                warnings.push(format!(
                    "'{}' is already running; stop it before starting it again",
                    process_name
                ));
                continue;
            }
            if let Some(port) = overlap(ports, &reservation.ports) {
                return Err(Error::PortInUse(port));
            }
        }

        for pending in self.pending.values() {
            if pending.group != group_instance_id || pending.process == process_name {
                continue;
            }
            if let Some(port) = overlap(ports, &pending.ports) {
                return Err(Error::PortInUse(port));
            }
        }

        let token = mint_token();
        self.pending.insert(
            token.clone(),
            PendingReservation {
                group: group_instance_id.to_string(),
                process: process_name.to_string(),
                ports: ports.to_vec(),
                reserved_at: Utc::now(),
            },
        );
        debug!(
            "Planned reservation {} for {}/{} ports={:?}",
            token, group_instance_id, process_name, ports
        );

        Ok(ReservationPlan { token, warnings })
    }

    /// Phase 2: the durable record has been written; drop the pending entry
    pub fn commit_reservation(&mut self, token: &str) {
        if self.pending.remove(token).is_some() {
            debug!("Committed reservation {}", token);
        }
    }

    /// Drop a pending entry on a failure path; `None` is a no-op
    pub fn release_reservation(&mut self, token: Option<&str>) {
        if let Some(token) = token {
            if self.pending.remove(token).is_some() {
                debug!("Released reservation {}", token);
            }
        }
    }

    /// Drop any pending entry for the pair and delete its durable record
    pub fn release_reservation_by_process(
        &mut self,
        group_instance_id: &str,
        process_name: &str,
    ) -> Result<()> {
        self.pending
            .retain(|_, p| !(p.group == group_instance_id && p.process == process_name));
        self.store.delete(group_instance_id, process_name)
    }

    /// Derive reservations from the state store: every `Running` record
    /// with a PID holds its recorded ports.
    pub fn load_reservations_from_state(&self) -> Result<Vec<Reservation>> {
        let states = self.store.list_all()?;
        Ok(states
            .into_iter()
            .filter(|s| s.status == ProcessStatus::Running && s.pid.is_some())
            .map(|s| Reservation {
                group: s.group,
                process: s.process,
                ports: s.ports.unwrap_or_default(),
                pid: s.pid,
                started_at: s.started_at,
            })
            .collect())
    }

    /// Sweep orphaned reservations: any `Running` record whose PID is dead
    /// is deleted from the state store. Idempotent; runs at the start of
    /// every `start`.
    pub fn reconcile_from_state(&self) -> Result<()> {
        for reservation in self.load_reservations_from_state()? {
            let Some(pid) = reservation.pid else {
                continue;
            };
            if !is_pid_alive(pid) {
                info!(
                    "Reclaiming orphaned reservation {}/{} (pid {} is gone)",
                    reservation.group, reservation.process, pid
                );
                if let Err(e) = self.store.delete(&reservation.group, &reservation.process) {
                    warn!(
                        "Failed to delete orphaned state {}/{}: {}",
                        reservation.group, reservation.process, e
                    );
                }
            }
        }
        Ok(())
    }

    /// Number of pending (phase-1) reservations
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Probe `localhost:<port>` for a live listener; a successful connect
/// means the port is in use.
pub async fn is_port_listening(port: u16) -> bool {
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}

fn overlap(requested: &[u16], held: &[u16]) -> Option<u16> {
    requested.iter().copied().find(|p| held.contains(p))
}

fn mint_token() -> String {
    let raw: u128 = rand::thread_rng().gen();
    format!("{:032x}", raw)
}
