//! End-to-end scenarios against an isolated PORTMUX_HOME.
//!
//! These tests drive the library the way the CLI does: resolve a group,
//! take the instance lock, start detached children, and verify the durable
//! state afterwards. Supervisor timings are compressed so suites stay
//! fast; the protocol is unchanged.

#![cfg(unix)]

use portmux::config::{self, GlobalConfig, RepositoryEntry};
use portmux::lock::{LockManager, LockScope};
use portmux::process::is_pid_alive;
use portmux::resolver::{self, group_instance_id};
use portmux::state::{ProcessStatus, StateStore};
use portmux::supervisor::{StartOptions, Supervisor, SupervisorSettings};
use serial_test::serial;
use std::path::Path;
use std::time::Duration;

struct TestHome {
    home: tempfile::TempDir,
}

impl TestHome {
    fn new() -> Self {
        let home = tempfile::tempdir().unwrap();
        std::env::set_var("PORTMUX_HOME", home.path());
        Self { home }
    }

    fn store(&self) -> StateStore {
        StateStore::at_root(self.home.path())
    }

    fn supervisor(&self) -> Supervisor {
        let settings = SupervisorSettings {
            settle_delay: Duration::from_millis(200),
            stop_poll_interval: Duration::from_millis(25),
            ..SupervisorSettings::default()
        };
        Supervisor::with_settings(self.store(), settings)
    }
}

impl Drop for TestHome {
    fn drop(&mut self) {
        std::env::remove_var("PORTMUX_HOME");
    }
}

fn write_project(dir: &Path, port: u16) {
    std::fs::write(
        dir.join("portmux.config.json"),
        format!(
            r#"{{
                "groups": {{
                    "app": {{
                        "description": "",
                        "commands": [
                            {{"name": "web", "command": "sleep 60", "ports": [{}]}}
                        ]
                    }}
                }}
            }}"#,
            port
        ),
    )
    .unwrap();
}

fn register(alias: &str, path: &Path) {
    let mut global = config::load_global().unwrap().unwrap_or_else(GlobalConfig::default);
    global.repositories.insert(
        alias.to_string(),
        RepositoryEntry {
            path: path.to_path_buf(),
            group: "app".to_string(),
        },
    );
    config::save_global(&global).unwrap();
}

#[tokio::test]
#[serial]
async fn start_produces_one_running_state_and_stop_clears_it() {
    let env = TestHome::new();
    let repo = tempfile::tempdir().unwrap();
    write_project(repo.path(), 43210);
    register("acme", repo.path());

    let resolved = resolver::resolve_by_name("acme", None).await.unwrap();
    let group = resolved.group().unwrap().clone();
    let command = &group.commands[0];
    let instance_id = resolved.instance_id();

    let mut supervisor = env.supervisor();
    let opts = StartOptions {
        ports: vec![43210],
        project_root: Some(repo.path().to_path_buf()),
        ..StartOptions::default()
    };
    let state = supervisor
        .start_process(&instance_id, &command.name, &command.command, opts)
        .await
        .unwrap();

    assert_eq!(state.status, ProcessStatus::Running);
    assert!(is_pid_alive(state.pid.unwrap()));
    assert_eq!(state.ports, Some(vec![43210]));

    // ps view lists exactly one row
    let view = supervisor.list_processes().await.unwrap();
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].process, "web");

    // stop round-trips back to a clean store (state gone, log gone)
    supervisor
        .stop_process(&instance_id, "web", 2000)
        .await
        .unwrap();
    assert!(env.store().list_all().unwrap().is_empty());
    assert!(!state.log_path.unwrap().exists());
}

#[tokio::test]
#[serial]
async fn identical_ports_run_in_parallel_across_worktrees() {
    let env = TestHome::new();
    let base = tempfile::tempdir().unwrap();
    let wt_a = base.path().join("a");
    let wt_b = base.path().join("b");
    std::fs::create_dir_all(&wt_a).unwrap();
    std::fs::create_dir_all(&wt_b).unwrap();
    write_project(&wt_a, 43211);
    write_project(&wt_b, 43211);
    register("acme", &wt_a);

    let in_a = resolver::resolve_by_name("acme", Some(&wt_a)).await.unwrap();
    let in_b = resolver::resolve_by_name("acme", Some(&wt_b)).await.unwrap();
    assert_ne!(in_a.instance_id(), in_b.instance_id());

    let mut supervisor = env.supervisor();
    for (resolved, root) in [(&in_a, &wt_a), (&in_b, &wt_b)] {
        let opts = StartOptions {
            ports: vec![43211],
            project_root: Some(root.clone()),
            ..StartOptions::default()
        };
        // Neither child actually binds the port, so both reservations
        // coexist; the OS would be the arbiter if they did.
        supervisor
            .start_process(&resolved.instance_id(), "web", "sleep 60", opts)
            .await
            .unwrap();
    }

    let states = env.store().list_all().unwrap();
    assert_eq!(states.len(), 2);

    for resolved in [&in_a, &in_b] {
        supervisor
            .stop_process(&resolved.instance_id(), "web", 2000)
            .await
            .unwrap();
    }
    assert!(env.store().list_all().unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn same_instance_same_ports_is_rejected() {
    let env = TestHome::new();
    let repo = tempfile::tempdir().unwrap();
    write_project(repo.path(), 43212);
    register("acme", repo.path());

    let id = group_instance_id("acme", "app", repo.path());
    let mut supervisor = env.supervisor();

    let opts = StartOptions {
        ports: vec![43212],
        project_root: Some(repo.path().to_path_buf()),
        ..StartOptions::default()
    };
    supervisor
        .start_process(&id, "web", "sleep 60", opts.clone())
        .await
        .unwrap();

    // A second process of the same instance asking for the same port
    // conflicts with the recorded reservation
    let err = supervisor
        .start_process(&id, "api", "sleep 60", opts)
        .await
        .unwrap_err();
    assert!(matches!(err, portmux::Error::PortInUse(43212)));

    supervisor.stop_process(&id, "web", 2000).await.unwrap();
}

#[tokio::test]
#[serial]
async fn start_under_lock_serializes_with_concurrent_callers() {
    let env = TestHome::new();
    let repo = tempfile::tempdir().unwrap();
    write_project(repo.path(), 43213);

    let id = group_instance_id("acme", "app", repo.path());
    let locks = LockManager::at_root(env.home.path());

    // First caller starts under the lock
    let mut supervisor = env.supervisor();
    {
        let sup = &mut supervisor;
        let root = repo.path().to_path_buf();
        let body_id = id.clone();
        locks
            .with_lock(LockScope::Group, &id, || async move {
                let opts = StartOptions {
                    project_root: Some(root),
                    ..StartOptions::default()
                };
                sup.start_process(&body_id, "web", "sleep 60", opts).await
            })
            .await
            .unwrap();
    }

    // Second caller observes the existing record and refuses to spawn
    let mut second = env.supervisor();
    {
        let sup = &mut second;
        let root = repo.path().to_path_buf();
        let body_id = id.clone();
        let err = locks
            .with_lock(LockScope::Group, &id, || async move {
                let opts = StartOptions {
                    project_root: Some(root),
                    ..StartOptions::default()
                };
                sup.start_process(&body_id, "web", "sleep 60", opts).await
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already running"));
    }

    // Exactly one state file exists
    assert_eq!(env.store().list_all().unwrap().len(), 1);
    supervisor.stop_process(&id, "web", 2000).await.unwrap();
}

#[tokio::test]
#[serial]
async fn failed_start_leaves_store_untouched() {
    let env = TestHome::new();
    let repo = tempfile::tempdir().unwrap();
    write_project(repo.path(), 43214);

    let id = group_instance_id("acme", "app", repo.path());
    let mut supervisor = env.supervisor();

    let opts = StartOptions {
        ports: vec![43214],
        project_root: Some(repo.path().to_path_buf()),
        ..StartOptions::default()
    };
    let err = supervisor
        .start_process(&id, "web", "exit 7", opts)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("exited immediately"));

    // No state record, and the port plans again cleanly
    assert!(env.store().list_all().unwrap().is_empty());
    let opts = StartOptions {
        ports: vec![43214],
        project_root: Some(repo.path().to_path_buf()),
        ..StartOptions::default()
    };
    supervisor
        .start_process(&id, "web", "sleep 60", opts)
        .await
        .unwrap();
    supervisor.stop_process(&id, "web", 2000).await.unwrap();
}

#[tokio::test]
#[serial]
async fn resolve_auto_outside_git_warns_and_uses_first_group() {
    let _env = TestHome::new();
    let repo = tempfile::tempdir().unwrap();
    write_project(repo.path(), 43215);

    // No global config at all: the first project group doubles as the
    // repository name
    let resolved = resolver::resolve_auto(repo.path()).await.unwrap();
    assert_eq!(resolved.repository_name, "app");
    assert_eq!(resolved.group_definition_name, "app");
}

#[tokio::test]
#[serial]
async fn reconcile_is_idempotent_across_invocations() {
    let env = TestHome::new();
    let repo = tempfile::tempdir().unwrap();
    write_project(repo.path(), 43216);

    let id = group_instance_id("acme", "app", repo.path());
    let mut supervisor = env.supervisor();
    let opts = StartOptions {
        project_root: Some(repo.path().to_path_buf()),
        ..StartOptions::default()
    };
    let state = supervisor
        .start_process(&id, "web", "sleep 60", opts)
        .await
        .unwrap();
    let pid = state.pid.unwrap();

    // Kill the child behind the supervisor's back; the next start's
    // reconciliation sweeps the orphan
    portmux::process::send_kill(pid).unwrap();
    for _ in 0..100 {
        if !is_pid_alive(pid) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let opts = StartOptions {
        project_root: Some(repo.path().to_path_buf()),
        ..StartOptions::default()
    };
    let replacement = supervisor
        .start_process(&id, "web", "sleep 60", opts)
        .await
        .unwrap();
    assert_ne!(replacement.pid, Some(pid));
    assert_eq!(env.store().list_all().unwrap().len(), 1);

    supervisor.stop_process(&id, "web", 2000).await.unwrap();
}
