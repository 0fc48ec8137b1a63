//! Target application process: launch and process-tree teardown

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::config::{LaunchConfig, Shell};
use crate::error::{EngineError, EngineResult};
use crate::logger::RunLogger;

/// Grace period between SIGTERM and SIGKILL
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Time allowed for a killed group to disappear
#[cfg(unix)]
const KILL_GRACE: Duration = Duration::from_secs(1);

#[cfg(unix)]
const GROUP_POLL: Duration = Duration::from_millis(50);

/// Handle to the launched application
pub struct AppProcess {
    child: Child,
    pid: u32,
}

impl AppProcess {
    /// Spawn the application described by `config`.
    ///
    /// On unix the child leads a new process group so `stop` can take down
    /// everything it started. Output lines go to the run logger at debug level.
    pub async fn launch(config: &LaunchConfig, logger: Arc<RunLogger>) -> EngineResult<Self> {
        let mut cmd = build_command(config);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| EngineError::AppLaunch(format!("spawn failed: {}", e)))?;
        let pid = child
            .id()
            .ok_or_else(|| EngineError::AppLaunch("failed to obtain process PID".to_string()))?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, "stdout", Arc::clone(&logger)));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, "stderr", logger));
        }

        info!(pid, "App process started");
        Ok(Self { child, pid })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Terminate the whole process group: SIGTERM, then SIGKILL for whatever
    /// outlives the grace period. The group is signalled even when the leader
    /// has already exited.
    #[cfg(unix)]
    pub async fn stop(&mut self) -> EngineResult<()> {
        use nix::sys::signal::Signal;

        info!(pid = self.pid, "Stopping app process group");
        if self.signal_group(Some(Signal::SIGTERM))? && !self.await_group_exit(STOP_GRACE).await? {
            warn!(pid = self.pid, "App process group ignored SIGTERM, killing");
            self.signal_group(Some(Signal::SIGKILL))?;
            if !self.await_group_exit(KILL_GRACE).await? {
                return Err(EngineError::Cleanup(format!(
                    "process group {} survived SIGKILL",
                    self.pid
                )));
            }
        }

        let status = self.child.wait().await?;
        info!(pid = self.pid, %status, "App process group stopped");
        Ok(())
    }

    #[cfg(not(unix))]
    pub async fn stop(&mut self) -> EngineResult<()> {
        if self.child.try_wait()?.is_none() {
            self.child
                .kill()
                .await
                .map_err(|e| EngineError::Cleanup(format!("kill failed: {}", e)))?;
        }
        info!(pid = self.pid, "App process stopped");
        Ok(())
    }

    /// Send `signal` to the group; `None` only checks for members.
    /// Returns false once the group is gone.
    #[cfg(unix)]
    fn signal_group(&self, signal: Option<nix::sys::signal::Signal>) -> EngineResult<bool> {
        use nix::errno::Errno;
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        match killpg(Pid::from_raw(self.pid as i32), signal) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(e) => Err(EngineError::Cleanup(format!(
                "signal to process group {} failed: {}",
                self.pid, e
            ))),
        }
    }

    /// Poll until the group is empty or `grace` elapses. The leader is reaped
    /// on the way so it does not linger as a zombie member.
    #[cfg(unix)]
    async fn await_group_exit(&mut self, grace: Duration) -> EngineResult<bool> {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            self.child.try_wait()?;
            if !self.signal_group(None)? {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(GROUP_POLL).await;
        }
    }
}

fn build_command(config: &LaunchConfig) -> Command {
    match config {
        LaunchConfig::Command {
            command,
            cwd,
            env,
            shell,
        } => {
            let mut cmd = match shell.unwrap_or_else(Shell::platform_default) {
                Shell::Bash => {
                    let mut cmd = Command::new("bash");
                    cmd.arg("-c").arg(command);
                    cmd
                }
                Shell::Powershell => {
                    let mut cmd = Command::new("powershell");
                    cmd.args(["-NoProfile", "-Command"]).arg(command);
                    cmd
                }
            };
            if let Some(cwd) = cwd {
                cmd.current_dir(cwd);
            }
            cmd.envs(env);
            cmd
        }
        LaunchConfig::Binary {
            executable,
            args,
            cwd,
            env,
        } => {
            let mut cmd = Command::new(executable);
            cmd.args(args);
            if let Some(cwd) = cwd {
                cmd.current_dir(cwd);
            }
            cmd.envs(env);
            cmd
        }
    }
}

async fn forward_lines<R>(stream: R, stream_name: &'static str, logger: Arc<RunLogger>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        logger.debug("App output", json!({ "stream": stream_name, "line": line }));
    }
}
