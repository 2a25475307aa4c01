//! KVM guest provisioning for the IDM test suite.
//!
//! Provides the external command runner, the sequential lifecycle phases
//! (cleanup, disk setup, install launch, boot-menu keypresses, post-install
//! start) and DHCP lease discovery for the freshly installed guest.

use std::path::PathBuf;

pub mod discovery;
pub mod executor;
pub mod lifecycle;

use crate::config::ConfigFile;
use crate::error::ForgeResult;

// ---------------------------------------------------------------------------
// Shared types used across submodules
// ---------------------------------------------------------------------------

/// Immutable descriptor of the guest to provision.
///
/// Built once per run from `test.config` plus fixed sizing defaults; the
/// guest `name` is the sole identity key for every hypervisor query.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Unique libvirt domain name.
    pub name: String,

    /// Virtual disk size in GiB.
    pub disk_size_gb: u32,

    /// Guest memory in MiB.
    pub ram_mb: u32,

    /// Virtual CPU count.
    pub vcpus: u32,

    /// Path to the install ISO on the host.
    pub iso_path: PathBuf,

    /// Path where the qcow2 disk image is created (and removed on cleanup).
    pub disk_image_path: PathBuf,
}

impl VmConfig {
    /// Assemble a guest descriptor from the shared `test.config` file.
    ///
    /// Only `VM_NAME` and `ISO_DEST_PATH` come from the file; disk, RAM and
    /// CPU sizing are fixed for the IDM installer. Malformed paths or
    /// out-of-range sizes are not validated here — they surface later as
    /// command failures.
    pub fn from_test_config(config: &mut ConfigFile) -> ForgeResult<Self> {
        let name = config.read_key("VM_NAME")?;
        let iso_path = PathBuf::from(config.read_key("ISO_DEST_PATH")?);

        Ok(Self {
            disk_image_path: PathBuf::from(format!("/var/lib/libvirt/images/{name}.qcow2")),
            name,
            disk_size_gb: 30,
            ram_mb: 4096,
            vcpus: 2,
            iso_path,
        })
    }
}

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use executor::{CommandOutcome, CommandRunner, ExecOptions, ShellRunner};
pub use lifecycle::{GuestState, VmLifecycle};
