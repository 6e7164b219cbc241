use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;

use tracing::{debug, info, warn};

use crate::core::error::{PanelError, PanelResult};

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Timing of the stop escalation ladder.
#[derive(Debug, Clone, Copy)]
pub struct StopPolicy {
    /// Wait between escalation steps.
    pub grace: Duration,
    /// Liveness polling interval while waiting.
    pub poll: Duration,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(1),
            poll: Duration::from_millis(100),
        }
    }
}

/// Which rung of the ladder finally stopped the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStep {
    AlreadyGone,
    Interrupt,
    Terminate,
    Kill,
}

/// Keep a child from opening a console window on Windows.
pub fn hide_console(cmd: &mut tokio::process::Command) {
    #[cfg(target_os = "windows")]
    {
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    #[cfg(not(target_os = "windows"))]
    {
        let _ = cmd;
    }
}

fn hidden_std_command(program: &str) -> Command {
    #[allow(unused_mut)]
    let mut cmd = Command::new(program);
    #[cfg(target_os = "windows")]
    cmd.creation_flags(CREATE_NO_WINDOW);
    cmd
}

/// Liveness check: signal 0 on POSIX, a process-table lookup on Windows.
pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }

    #[cfg(target_os = "windows")]
    {
        let system = sysinfo::System::new_all();
        system.process(sysinfo::Pid::from_u32(pid)).is_some()
    }

    #[cfg(not(target_os = "windows"))]
    {
        matches!(
            hidden_std_command("kill")
                .args(["-0", &pid.to_string()])
                .stderr(std::process::Stdio::null())
                .status(),
            Ok(status) if status.success()
        )
    }
}

#[cfg(not(target_os = "windows"))]
fn send_signal(pid: u32, signal: &str) -> bool {
    match hidden_std_command("kill")
        .args(["-s", signal, &pid.to_string()])
        .stderr(std::process::Stdio::null())
        .status()
    {
        Ok(status) => status.success(),
        Err(err) => {
            warn!("Cannot send SIG{} to {}: {}", signal, pid, err);
            false
        }
    }
}

/// Poll until `pid` is gone or `within` elapses. True when it exited.
pub async fn wait_for_exit(pid: u32, within: Duration, poll: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if !is_process_alive(pid) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

/// Stop `pid` politely first, escalating when it does not go away.
///
/// POSIX: SIGINT, SIGTERM after one grace period, SIGKILL on the whole
/// process tree after another. Windows: `taskkill /PID` so shutdown hooks
/// run, then `taskkill /F /T`.
pub async fn terminate_gracefully(pid: u32, policy: StopPolicy) -> PanelResult<StopStep> {
    if !is_process_alive(pid) {
        return Ok(StopStep::AlreadyGone);
    }

    #[cfg(target_os = "windows")]
    {
        let polite = hidden_std_command("taskkill")
            .args(["/PID", &pid.to_string()])
            .status();
        match polite {
            Ok(status) if status.success() => {
                if wait_for_exit(pid, policy.grace * 2, policy.poll).await {
                    return Ok(StopStep::Terminate);
                }
            }
            Ok(status) => debug!("taskkill /PID {} returned {:?}", pid, status.code()),
            Err(err) => warn!("taskkill /PID {} failed: {}", pid, err),
        }
        force_kill_tree(pid)?;
        wait_for_exit(pid, policy.grace, policy.poll).await;
        return Ok(StopStep::Kill);
    }

    #[cfg(not(target_os = "windows"))]
    {
        if send_signal(pid, "INT") && wait_for_exit(pid, policy.grace, policy.poll).await {
            info!("Process {} stopped after SIGINT", pid);
            return Ok(StopStep::Interrupt);
        }

        if send_signal(pid, "TERM") && wait_for_exit(pid, policy.grace, policy.poll).await {
            info!("Process {} stopped after SIGTERM", pid);
            return Ok(StopStep::Terminate);
        }

        force_kill_tree(pid)?;
        wait_for_exit(pid, policy.grace, policy.poll).await;
        info!("Process {} killed", pid);
        Ok(StopStep::Kill)
    }
}

/// Forcefully kill `pid` and every descendant found in the process table.
pub fn force_kill_tree(pid: u32) -> PanelResult<()> {
    #[cfg(target_os = "windows")]
    {
        let status = hidden_std_command("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .status()
            .map_err(|e| PanelError::Other(format!("Cannot terminate process {pid}: {e}")))?;
        if !status.success() && is_process_alive(pid) {
            return Err(PanelError::Other(format!(
                "taskkill for process {pid} returned {:?}",
                status.code()
            )));
        }
        Ok(())
    }

    #[cfg(not(target_os = "windows"))]
    {
        let mut victims = descendants_of(pid);
        // Children first so nothing gets re-parented mid-way.
        victims.reverse();
        for child in victims {
            let _ = send_signal(child, "KILL");
        }
        if !send_signal(pid, "KILL") && is_process_alive(pid) {
            return Err(PanelError::Other(format!("Cannot kill process {pid}")));
        }
        Ok(())
    }
}

/// Every transitive child of `root`, parents before children.
pub fn descendants_of(root: u32) -> Vec<u32> {
    let system = sysinfo::System::new_all();
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (pid, process) in system.processes() {
        if let Some(parent) = process.parent() {
            children
                .entry(parent.as_u32())
                .or_default()
                .push(pid.as_u32());
        }
    }

    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut queue = vec![root];
    while let Some(current) = queue.pop() {
        if let Some(kids) = children.get(&current) {
            for &kid in kids {
                if seen.insert(kid) {
                    out.push(kid);
                    queue.push(kid);
                }
            }
        }
    }
    out
}

/// Open a URL in the system browser.
pub fn open_url(url: &str) -> PanelResult<()> {
    #[cfg(target_os = "windows")]
    let mut command = {
        let mut cmd = hidden_std_command("cmd");
        cmd.args(["/C", "start", "", url]);
        cmd
    };

    #[cfg(target_os = "macos")]
    let mut command = {
        let mut cmd = Command::new("open");
        cmd.arg(url);
        cmd
    };

    // Under WSL, wslview hands the URL to the Windows browser.
    #[cfg(all(unix, not(target_os = "macos")))]
    let mut command = {
        let opener = if super::is_wsl() { "wslview" } else { "xdg-open" };
        let mut cmd = Command::new(opener);
        cmd.arg(url);
        cmd
    };

    let status = command
        .status()
        .map_err(|e| PanelError::Other(format!("Cannot open {url}: {e}")))?;
    if !status.success() {
        return Err(PanelError::Other(format!("Opener returned an error for {url}")));
    }
    Ok(())
}

/// Reveal a path in the native file manager.
pub fn open_path(path: &Path) -> PanelResult<()> {
    #[cfg(target_os = "windows")]
    let mut command = {
        let mut cmd = Command::new("explorer");
        cmd.arg(path);
        cmd
    };

    #[cfg(target_os = "macos")]
    let mut command = {
        let mut cmd = Command::new("open");
        cmd.arg(path);
        cmd
    };

    #[cfg(all(unix, not(target_os = "macos")))]
    let mut command = {
        let mut cmd = Command::new("xdg-open");
        cmd.arg(path);
        cmd
    };

    let status = command.status().map_err(|source| PanelError::io(path, source))?;

    // explorer.exe exits with 1 even on success.
    if !status.success() && !cfg!(target_os = "windows") {
        return Err(PanelError::Other(format!(
            "Cannot open the file manager for {:?}",
            path
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn pid_zero_is_never_alive() {
        assert!(!is_process_alive(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sigint_stops_a_plain_sleeper() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        let reaper = tokio::spawn(async move { child.wait().await });

        let step = terminate_gracefully(
            pid,
            StopPolicy {
                grace: Duration::from_millis(500),
                poll: Duration::from_millis(20),
            },
        )
        .await
        .unwrap();

        assert_eq!(step, StopStep::Interrupt);
        let status = reaper.await.unwrap().unwrap();
        assert!(!status.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ladder_escalates_past_ignored_signals() {
        let mut child = tokio::process::Command::new("sh")
            .args(["-c", "trap '' INT TERM; while true; do sleep 0.05; done"])
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        let reaper = tokio::spawn(async move { child.wait().await });

        let step = terminate_gracefully(
            pid,
            StopPolicy {
                grace: Duration::from_millis(300),
                poll: Duration::from_millis(20),
            },
        )
        .await
        .unwrap();

        assert_eq!(step, StopStep::Kill);
        reaper.await.unwrap().unwrap();
    }
}
