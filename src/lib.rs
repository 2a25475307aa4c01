//! vmforge: provisions a disposable KVM guest for the IDM API test suite.
//!
//! Drives `virsh`, `qemu-img` and `virt-install` through a strictly
//! sequential phase workflow (cleanup, disk setup, install launch, boot-menu
//! keypresses, post-install start, DHCP lease discovery) and hands the
//! guest's address to downstream test drivers via a dotenv file.

pub mod config;
pub mod error;
pub mod logging;
pub mod vm;

pub use config::ConfigFile;
pub use error::{ForgeError, ForgeResult};
pub use vm::{GuestState, ShellRunner, VmConfig, VmLifecycle};
