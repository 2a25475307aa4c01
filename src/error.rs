//! Error taxonomy for the provisioning workflow.
//!
//! Every fatal condition a phase can surface is a distinct variant so the
//! driver (and tests) can match on what went wrong instead of parsing
//! message strings. `anyhow` wraps these at the binary boundary.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type ForgeResult<T> = Result<T, ForgeError>;

#[derive(Debug, Error)]
pub enum ForgeError {
    /// An external command ran to completion but exited non-zero.
    ///
    /// Carries the original command text plus both trimmed output streams so
    /// the failure diagnostic is self-contained in the log.
    #[error("command failed: `{command}`\n\tstderr: {stderr}\n\tstdout: {stdout}")]
    Command {
        command: String,
        stdout: String,
        stderr: String,
    },

    /// The command could not be spawned at all (binary missing, fork failure).
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The install media path does not exist on the host.
    #[error("install ISO not found at {}", .0.display())]
    MissingIso(PathBuf),

    /// A required key was absent after scanning the whole config file.
    #[error("key '{key}' not found in {}", path.display())]
    ConfigKeyNotFound { key: String, path: PathBuf },

    /// No DHCP lease appeared on the guest interface within the time budget.
    #[error("guest '{guest}' obtained no DHCP lease within {timeout_secs}s")]
    LeaseTimeout { guest: String, timeout_secs: u64 },

    /// Host filesystem operation failed (config read, disk image delete).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
