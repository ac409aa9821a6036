//! PID liveness probing and detached child spawning.
//!
//! The supervisor never keeps child handles across invocations; a PID
//! recorded in a state file is all it has. Liveness uses signal-0
//! semantics. Because PIDs are recycled by the OS, the recorded command
//! line can be checked against the live process as a defensive control.

use crate::error::{Error, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

/// Check whether `pid` refers to a live process.
///
/// Signal-0 semantics: the probe sends no signal but reports whether the
/// target exists. A permission error means the process exists but belongs
/// to someone else, which still counts as alive.
pub fn is_pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid as i32), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    #[cfg(windows)]
    {
        let output = std::process::Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid), "/NH", "/FO", "CSV"])
            .output();
        match output {
            Ok(out) => String::from_utf8_lossy(&out.stdout).contains(&format!("\"{}\"", pid)),
            Err(_) => false,
        }
    }
}

/// Fetch the command line of a live process, if the platform exposes it
pub fn get_command_line(pid: u32) -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        let raw = std::fs::read(format!("/proc/{}/cmdline", pid)).ok()?;
        if raw.is_empty() {
            return None;
        }
        let joined = raw
            .split(|b| *b == 0)
            .filter(|part| !part.is_empty())
            .map(|part| String::from_utf8_lossy(part).into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        Some(joined)
    }

    #[cfg(target_os = "macos")]
    {
        let output = std::process::Command::new("ps")
            .args(["-p", &pid.to_string(), "-o", "command="])
            .output()
            .ok()?;
        let line = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if line.is_empty() {
            None
        } else {
            Some(line)
        }
    }

    #[cfg(windows)]
    {
        let output = std::process::Command::new("wmic")
            .args([
                "process",
                "where",
                &format!("ProcessId={}", pid),
                "get",
                "CommandLine",
                "/FORMAT:LIST",
            ])
            .output()
            .ok()?;
        let text = String::from_utf8_lossy(&output.stdout);
        text.lines()
            .find_map(|line| line.strip_prefix("CommandLine="))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
    {
        let _ = pid;
        None
    }
}

/// Check the recorded command against the live process's command line.
///
/// Substring containment in either direction, which tolerates shell
/// wrappers around the recorded command. When the command line cannot be
/// read the check passes; liveness alone is then the deciding signal.
pub fn verify_pid_command(pid: u32, expected: &str) -> bool {
    match get_command_line(pid) {
        Some(actual) => actual.contains(expected) || expected.contains(&actual),
        None => true,
    }
}

/// Spawn `shell_command` through the system shell, detached.
///
/// The child becomes the leader of its own process group so it survives
/// the CLI exiting. Stdin is ignored; the caller wires stdout/stderr to
/// the log descriptor (or a null sink).
pub fn spawn_shell(
    shell_command: &str,
    cwd: &Path,
    env: &indexmap::IndexMap<String, String>,
    stdout: Stdio,
    stderr: Stdio,
) -> Result<Child> {
    #[cfg(unix)]
    let mut cmd = {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(shell_command);
        cmd
    };

    #[cfg(windows)]
    let mut cmd = {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(shell_command);
        cmd
    };

    cmd.current_dir(cwd);
    for (key, value) in env {
        cmd.env(key, value);
    }

    cmd.stdin(Stdio::null());
    cmd.stdout(stdout);
    cmd.stderr(stderr);

    // Detach: the child must survive the parent CLI exit
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }

    #[cfg(windows)]
    {
        // DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP
        cmd.creation_flags(0x0000_0008 | 0x0000_0200);
    }

    let child = cmd
        .spawn()
        .map_err(|e| Error::process_start(shell_command, e.to_string()))?;
    debug!(
        "Spawned detached child pid={:?} cmd={}",
        child.id(),
        shell_command
    );
    Ok(child)
}

/// Send the graceful termination signal to a PID
pub fn send_term(pid: u32) -> Result<()> {
    send_signal(pid, false)
}

/// Send the forceful kill signal to a PID
pub fn send_kill(pid: u32) -> Result<()> {
    send_signal(pid, true)
}

fn send_signal(pid: u32, force: bool) -> Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        kill(Pid::from_raw(pid as i32), signal)
            .map_err(|e| Error::Io(std::io::Error::from_raw_os_error(e as i32)))
    }

    #[cfg(windows)]
    {
        let mut cmd = std::process::Command::new("taskkill");
        cmd.args(["/PID", &pid.to_string()]);
        if force {
            cmd.arg("/F");
        }
        let status = cmd.status()?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::Io(std::io::Error::other(format!(
                "taskkill exited with {}",
                status
            ))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn test_is_pid_alive_self() {
        assert!(is_pid_alive(std::process::id()));
    }

    #[test]
    fn test_is_pid_alive_bogus() {
        // PID near the max is vanishingly unlikely to exist
        assert!(!is_pid_alive(4_000_000));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_get_command_line_self() {
        let cmdline = get_command_line(std::process::id()).unwrap();
        assert!(!cmdline.is_empty());
    }

    #[test]
    fn test_verify_pid_command_unreadable_passes() {
        assert!(verify_pid_command(4_000_000, "anything"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_verify_pid_command_self() {
        let cmdline = get_command_line(std::process::id()).unwrap();
        assert!(verify_pid_command(std::process::id(), &cmdline));
        // Substring in either direction
        let prefix = &cmdline[..cmdline.len().min(8)];
        assert!(verify_pid_command(std::process::id(), prefix));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_shell_detached_child_runs() {
        let dir = tempfile::tempdir().unwrap();
        let child = spawn_shell(
            "sleep 30",
            dir.path(),
            &IndexMap::new(),
            Stdio::null(),
            Stdio::null(),
        )
        .unwrap();

        let pid = child.id().unwrap();
        assert!(is_pid_alive(pid));

        send_term(pid).unwrap();
        // SIGTERM lands quickly on sleep
        for _ in 0..50 {
            if !is_pid_alive(pid) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("child did not exit after SIGTERM");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_shell_env_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("out.txt");
        let mut env = IndexMap::new();
        env.insert("PORTMUX_TEST_VALUE".to_string(), "hello".to_string());

        let child = spawn_shell(
            &format!("printf %s \"$PORTMUX_TEST_VALUE\" > {}", marker.display()),
            dir.path(),
            &env,
            Stdio::null(),
            Stdio::null(),
        )
        .unwrap();
        let pid = child.id().unwrap();

        for _ in 0..100 {
            if !is_pid_alive(pid) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(std::fs::read_to_string(&marker).unwrap(), "hello");
    }
}
