//! Local process backend.
//!
//! [`LocalRunner`] runs a command through the host shell (`sh -c` on Unix,
//! `cmd.exe /C` on Windows), waits for it to exit and returns the merged
//! stdout/stderr together with the real exit status.
//!
//! Both output streams are attached to the write end of a single pipe, so the
//! captured text interleaves exactly as the process wrote it.
//!
//! # Cancellation
//!
//! [`Runner::run`] takes a [`CancellationToken`]. When it fires, the command
//! is killed and the run fails with [`LocalFailure::Interrupted`]. The token is
//! left cancelled, so whoever owns it still sees the cancellation after the
//! runner returns. Dropping the future returned by `run` also kills it.
//!
//! On Unix the shell leads its own process group and every kill targets the
//! whole group, so a timeout or cancellation also takes down the commands the
//! shell started (`sleep 60; echo done` leaves no `sleep` behind). Anything
//! still running in the group when the shell exits is killed as well.

use async_trait::async_trait;
use std::io::{self, Read};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::execution::FAILURE_EXIT_CODE;

/// Text recorded when a command printed nothing.
pub const EMPTY_OUTPUT_PLACEHOLDER: &str = "(no output)";

/// A command that ran to completion, whatever its exit status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Merged stdout/stderr, trailing whitespace trimmed.
    pub output: String,
    /// Process exit code; `-1` if the process was killed by a signal.
    pub exit_code: i32,
}

/// Why a command could not be run to completion.
#[derive(Debug, Error)]
pub enum LocalFailure {
    /// No shell is configured.
    #[error("no shell configured")]
    NoShell,

    /// The output pipe could not be created.
    #[error("failed to create output pipe: {0}")]
    Pipe(#[source] io::Error),

    /// The shell could not be started.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Waiting for the process or reading its output failed.
    #[error("failed while waiting for process: {0}")]
    Wait(String),

    /// The process exceeded the configured timeout and was killed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The run was cancelled and the process was killed.
    #[error("interrupted while waiting for process")]
    Interrupted,
}

/// Something that runs a shell command to completion.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run `command`, blocking the calling task until it exits.
    ///
    /// A non-zero exit status is a normal [`Completion`].
    async fn run(
        &self,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<Completion, LocalFailure>;
}

/// The interpreter prefix for this host.
pub fn default_shell() -> Vec<String> {
    if cfg!(windows) {
        vec!["cmd.exe".to_string(), "/C".to_string()]
    } else {
        vec!["sh".to_string(), "-c".to_string()]
    }
}

/// Runs commands as child processes of this host.
#[derive(Debug, Clone)]
pub struct LocalRunner {
    shell: Vec<String>,
    timeout: Option<Duration>,
}

impl LocalRunner {
    /// Create a runner using the host's default shell and no timeout.
    pub fn new() -> Self {
        Self {
            shell: default_shell(),
            timeout: None,
        }
    }

    /// Use a different interpreter prefix, e.g. `["bash", "-lc"]`.
    ///
    /// The command is appended as the final argument.
    pub fn with_shell<I, S>(mut self, shell: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shell = shell.into_iter().map(Into::into).collect();
        self
    }

    /// Kill commands that run longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The interpreter prefix in use.
    pub fn shell(&self) -> &[String] {
        &self.shell
    }

    /// The configured timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Trim trailing whitespace and substitute the placeholder for empty output.
pub fn normalize_output(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim_end();
    if trimmed.is_empty() {
        EMPTY_OUTPUT_PLACEHOLDER.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Kills a child's process group, at the latest when dropped.
///
/// The child is spawned as group leader, so its pid is the group id.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    /// Send SIGKILL to every process in the group. Only the first call signals.
    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_process_group(pgid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // An already empty group reports ESRCH, which is fine to ignore.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, error = %io::Error::last_os_error(), "process group already gone");
    }
}

// Without process groups `kill_on_drop` only reaches the shell itself.
#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

#[async_trait]
impl Runner for LocalRunner {
    async fn run(
        &self,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<Completion, LocalFailure> {
        let (program, prefix) = self.shell.split_first().ok_or(LocalFailure::NoShell)?;

        let (mut reader, writer) = io::pipe().map_err(LocalFailure::Pipe)?;
        let stderr_writer = writer.try_clone().map_err(LocalFailure::Pipe)?;

        let mut cmd = Command::new(program);
        cmd.args(prefix)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(stderr_writer)
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| LocalFailure::Spawn {
            program: program.clone(),
            source,
        })?;
        // The command still holds our copies of the write end; the reader
        // only sees EOF once they are closed.
        drop(cmd);

        debug!(pid = ?child.id(), program = %program, "spawned local process");
        let mut group = ProcessGroup::new(child.id());

        let mut collect = tokio::task::spawn_blocking(move || {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).map(|_| buf)
        });

        let deadline = async {
            match self.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| LocalFailure::Wait(e.to_string()))?,
            _ = cancel.cancelled() => {
                group.kill();
                let _ = child.kill().await;
                return Err(LocalFailure::Interrupted);
            }
            _ = &mut deadline => {
                group.kill();
                let _ = child.kill().await;
                return Err(LocalFailure::Timeout(self.timeout.unwrap_or_default()));
            }
        };

        // Background children may keep the pipe open after the shell exits.
        // The reader is left to drain on its own once the group is gone.
        let raw = tokio::select! {
            joined = &mut collect => joined
                .map_err(|e| LocalFailure::Wait(e.to_string()))?
                .map_err(|e| LocalFailure::Wait(e.to_string()))?,
            _ = cancel.cancelled() => {
                group.kill();
                return Err(LocalFailure::Interrupted);
            }
            _ = &mut deadline => {
                group.kill();
                return Err(LocalFailure::Timeout(self.timeout.unwrap_or_default()));
            }
        };
        // Nothing the command left behind outlives the run.
        group.kill();

        let exit_code = status.code().unwrap_or(FAILURE_EXIT_CODE);
        debug!(exit_code, bytes = raw.len(), "local process exited");

        Ok(Completion {
            output: normalize_output(&raw),
            exit_code,
        })
    }
}
