//! External command execution for the hypervisor CLI surface.
//!
//! All host-side tooling (`virsh`, `qemu-img`, `virt-install`, `file`) is
//! driven through the [`CommandRunner`] trait so the lifecycle phases can be
//! exercised against a fake runner in tests without touching a hypervisor.
//!
//! No retry happens at this layer; retry policy belongs to callers (the
//! lease-polling loop is the only caller that retries at all).

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::info;

use crate::error::{ForgeError, ForgeResult};

/// Optional per-invocation overrides.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Working directory for the child process.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables set on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

/// Result of one external command run to completion. Both streams are
/// captured whole (no streaming) and trimmed.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

/// Runs a fully-formed shell invocation string to completion.
pub trait CommandRunner {
    /// Execute `command` and capture its outcome. `Err` here means the
    /// command could not be run at all; a non-zero exit is reported through
    /// [`CommandOutcome::success`], not as `Err`.
    async fn exec(&self, command: &str, options: &ExecOptions) -> ForgeResult<CommandOutcome>;

    /// Execute a command that is expected to succeed.
    ///
    /// Returns trimmed stdout on exit status zero, otherwise a
    /// [`ForgeError::Command`] carrying the command text and both streams.
    async fn exec_ok(&self, command: &str, options: &ExecOptions) -> ForgeResult<String> {
        let outcome = self.exec(command, options).await?;
        if outcome.success {
            Ok(outcome.stdout)
        } else {
            Err(ForgeError::Command {
                command: command.to_string(),
                stdout: outcome.stdout,
                stderr: outcome.stderr,
            })
        }
    }
}

/// Real runner backed by `sh -c` via `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    async fn exec(&self, command: &str, options: &ExecOptions) -> ForgeResult<CommandOutcome> {
        // Audit trail: this workflow is destructive, so every invocation is
        // logged before it runs.
        info!(command, "executing");

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd.stdin(Stdio::null());

        if let Some(dir) = &options.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        let output = cmd.output().await.map_err(|e| ForgeError::Spawn {
            command: command.to_string(),
            source: e,
        })?;

        Ok(CommandOutcome {
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            success: output.status.success(),
        })
    }
}
