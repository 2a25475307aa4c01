//! vmforge: disposable KVM test guest provisioner.
//!
//! Default invocation runs the full provisioning workflow and writes the
//! discovered guest address to a dotenv file for the API test drivers.
//! `vmforge cleanup` runs only the recovery/cleanup phase.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use vmforge::{ConfigFile, ShellRunner, VmConfig, VmLifecycle};

/// Disposable KVM test guest provisioner
#[derive(Parser, Debug)]
#[command(name = "vmforge", version, about = "Provisions the IDM test VM")]
struct Args {
    #[command(subcommand)]
    mode: Option<Mode>,

    /// Path to the shared key=value test configuration
    #[arg(long, default_value = "./test.config")]
    config: PathBuf,

    /// Where to write the IDM_SYSTEM=<ip> line on success
    #[arg(long, default_value = "./.env")]
    env_file: PathBuf,

    /// DHCP lease discovery budget in seconds
    #[arg(long, default_value_t = 300)]
    lease_timeout: u64,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Run the full workflow: cleanup, install, start, lease discovery
    Provision,
    /// Run only the cleanup phase (recovery after a failed run)
    Cleanup,
}

#[tokio::main]
async fn main() {
    let _log_guard = vmforge::logging::init();
    let args = Args::parse();

    if let Err(err) = run(args).await {
        error!("{err:?}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    info!(config = %args.config.display(), "sourcing configuration");
    let mut config_file = ConfigFile::new(&args.config);
    let vm_config = VmConfig::from_test_config(&mut config_file)
        .context("failed to assemble VM configuration")?;

    let lifecycle = VmLifecycle::new(ShellRunner, vm_config);

    match args.mode.unwrap_or(Mode::Provision) {
        Mode::Provision => {
            info!("starting VM creation workflow");
            let ip = lifecycle
                .provision(Duration::from_secs(args.lease_timeout))
                .await
                .context("VM setup failed")?;

            std::fs::write(&args.env_file, format!("IDM_SYSTEM={ip}\n")).with_context(|| {
                format!("failed to write {}", args.env_file.display())
            })?;

            info!(ip, env_file = %args.env_file.display(), "VM is ready");
            info!("SSH into the guest with: ssh arbitrary@{ip}");
        }
        Mode::Cleanup => {
            lifecycle
                .cleanup_vm_if_present()
                .await
                .context("VM cleanup failed")?;
            info!("VM cleanup finished");
        }
    }

    Ok(())
}
