//! Sequential lifecycle phases for the disposable IDM test guest.
//!
//! The controller drives exactly one guest, one external command at a time,
//! through: cleanup → disk setup → install launch → boot-menu keypresses →
//! install-completion reboot → post-install start → lease discovery. The
//! hypervisor is the sole source of truth for guest state; every decision
//! re-queries it through [`VmLifecycle::classify`] instead of caching.
//!
//! There is no rollback. A fatal error mid-sequence leaves partial state on
//! the host; the cleanup phase is designed to be re-runnable from any such
//! state and is the recovery entry point for the next run.

use std::time::Duration;

use tracing::{info, warn};

use crate::error::{ForgeError, ForgeResult};
use crate::vm::VmConfig;
use crate::vm::discovery;
use crate::vm::executor::{CommandRunner, ExecOptions};

// ---------------------------------------------------------------------------
// Delay calibration
//
// All empirically tuned against the IDM installer ISO. Timing-fragile: a
// slower host shifts when the boot menu and the reboot prompt appear.
// ---------------------------------------------------------------------------

/// Wait for the installer boot menu to render after `virt-install` returns.
pub const BOOT_MENU_SETTLE: Duration = Duration::from_secs(5);

/// Gap between consecutive synthetic keypresses.
pub const KEYPRESS_GAP: Duration = Duration::from_millis(500);

/// Blind wait spanning the whole unattended install. No completion polling
/// is attempted; see DESIGN.md for the deferred condition-based alternative.
pub const INSTALL_WAIT: Duration = Duration::from_secs(420);

/// Wait for the installer's reboot to take effect before touching the guest.
pub const REBOOT_SETTLE: Duration = Duration::from_secs(10);

/// Wait before querying run-state in the post-install start phase.
pub const PRE_START_SETTLE: Duration = Duration::from_secs(5);

/// Wait before the first lease query, giving the freshly booted guest time
/// to bring its network stack up.
pub const LEASE_SETTLE: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Guest state
// ---------------------------------------------------------------------------

/// Run-state of the configured guest as reported by the hypervisor.
///
/// Never cached across phases: an operator can change it behind our back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestState {
    /// The name is not among the defined domains.
    Absent,
    /// Defined but not running (shut off, crashed, paused…).
    Defined,
    /// Actively running.
    Running,
}

// ---------------------------------------------------------------------------
// Lifecycle controller
// ---------------------------------------------------------------------------

/// Owns the phase sequence for one guest. Holds no mutable state; the
/// discovered IP is returned as a value, not stored on the controller.
pub struct VmLifecycle<R: CommandRunner> {
    runner: R,
    config: VmConfig,
}

impl<R: CommandRunner> VmLifecycle<R> {
    pub fn new(runner: R, config: VmConfig) -> Self {
        Self { runner, config }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Query the hypervisor and classify the guest's current state.
    ///
    /// Query failures are folded into `Absent`/`Defined`: a hypervisor we
    /// cannot ask is treated the same as one that knows nothing about the
    /// name, which keeps cleanup callable on a broken host.
    pub async fn classify(&self) -> GuestState {
        let list = self.query_tolerant("sudo virsh list --all").await;
        if !list.contains(&self.config.name) {
            return GuestState::Absent;
        }

        let state = self
            .query_tolerant(&format!("sudo virsh domstate {}", self.config.name))
            .await;
        if state.to_lowercase().contains("running") {
            GuestState::Running
        } else {
            GuestState::Defined
        }
    }

    /// Run a read-only query, mapping any failure to empty output.
    async fn query_tolerant(&self, command: &str) -> String {
        match self.runner.exec(command, &ExecOptions::default()).await {
            Ok(outcome) if outcome.success => outcome.stdout,
            _ => String::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Phase 1: cleanup
    // -----------------------------------------------------------------------

    /// Remove any leftover guest with our name, from whatever state a
    /// previous run left it in.
    ///
    /// Safe to call when the guest is absent (no destructive command is
    /// issued) and idempotent across repeated calls. Destroy and undefine
    /// failures are tolerated: they only mean there was nothing to clean up
    /// in that sub-step. Failing to delete an existing disk image is fatal —
    /// a stale image would corrupt the next install.
    pub async fn cleanup_vm_if_present(&self) -> ForgeResult<()> {
        info!(guest = %self.config.name, "checking for existing guest");

        if self.classify().await == GuestState::Absent {
            info!("no existing guest found; skipping cleanup");
            return Ok(());
        }

        info!(guest = %self.config.name, "cleaning up existing guest");

        let destroy = format!("sudo virsh destroy {}", self.config.name);
        if let Err(e) = self.runner.exec_ok(&destroy, &ExecOptions::default()).await {
            warn!(error = %e, "guest not running; skipping destroy");
        }

        let undefine = format!(
            "sudo virsh undefine {} --remove-all-storage",
            self.config.name
        );
        if let Err(e) = self.runner.exec_ok(&undefine, &ExecOptions::default()).await {
            warn!(error = %e, "undefine skipped");
        }

        if self.config.disk_image_path.exists() {
            tokio::fs::remove_file(&self.config.disk_image_path).await?;
            info!(path = %self.config.disk_image_path.display(), "deleted disk image");
        }

        info!("cleanup complete");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Phase 2: environment setup
    // -----------------------------------------------------------------------

    /// Validate the install media and create the blank qcow2 disk image.
    ///
    /// The bootability probe is a soft check: `file` has false negatives on
    /// some hybrid ISOs, so a non-bootable classification only logs a
    /// warning. Everything else here is fatal.
    pub async fn setup_environment(&self) -> ForgeResult<()> {
        info!("setting up environment");

        if !self.config.iso_path.exists() {
            return Err(ForgeError::MissingIso(self.config.iso_path.clone()));
        }

        let probe = format!("file {}", self.config.iso_path.display());
        let media_info = self.runner.exec_ok(&probe, &ExecOptions::default()).await?;
        if !media_info.to_lowercase().contains("bootable") {
            warn!(detected = %media_info, "ISO might not be bootable");
        }

        let create = format!(
            "sudo qemu-img create -f qcow2 {} {}G",
            self.config.disk_image_path.display(),
            self.config.disk_size_gb
        );
        self.runner.exec_ok(&create, &ExecOptions::default()).await?;

        info!(path = %self.config.disk_image_path.display(), "created virtual disk");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Phase 3: define and launch the install
    // -----------------------------------------------------------------------

    /// Define the domain and launch the unattended install from the ISO.
    ///
    /// Boot order is optical media first with the menu enabled, so the
    /// installer entry can be selected by keypress in the next phase. The
    /// guest attaches to the default NAT network; its lease there is what
    /// discovery reports at the end.
    pub async fn define_and_start_vm(&self) -> ForgeResult<()> {
        info!(guest = %self.config.name, "creating and starting guest");

        let install = format!(
            "sudo virt-install --name {name} --ram {ram} --vcpus {vcpus} \
             --disk path={disk},format=qcow2,bus=virtio --os-variant rocky9 \
             --boot cdrom,hd,menu=on --cdrom {iso} --network default \
             --graphics vnc,listen=0.0.0.0 --noautoconsole",
            name = self.config.name,
            ram = self.config.ram_mb,
            vcpus = self.config.vcpus,
            disk = self.config.disk_image_path.display(),
            iso = self.config.iso_path.display(),
        );
        self.runner.exec_ok(&install, &ExecOptions::default()).await?;

        info!("guest installation launched");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Phase 4: boot menu navigation
    // -----------------------------------------------------------------------

    /// Select the installer entry in the boot menu.
    ///
    /// The menu defaults to the wrong entry, so one Down + Enter is sent to
    /// the virtual console after a settle delay.
    pub async fn navigate_boot_menu(&self) -> ForgeResult<()> {
        info!("navigating guest boot menu");
        tokio::time::sleep(BOOT_MENU_SETTLE).await;

        self.send_key("KEY_DOWN").await?;
        tokio::time::sleep(KEYPRESS_GAP).await;
        self.send_key("KEY_ENTER").await?;

        info!("boot menu selection complete");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Phase 5: trigger the installer's completion reboot
    // -----------------------------------------------------------------------

    /// After the blind install wait, focus and confirm the installer's
    /// reboot button (Tab, then Enter).
    pub async fn trigger_final_reboot(&self) -> ForgeResult<()> {
        info!(
            wait_secs = INSTALL_WAIT.as_secs(),
            "waiting for installer to complete"
        );
        tokio::time::sleep(INSTALL_WAIT).await;

        self.send_key("KEY_TAB").await?;
        tokio::time::sleep(KEYPRESS_GAP).await;
        self.send_key("KEY_ENTER").await?;

        info!("reboot command sent");
        tokio::time::sleep(REBOOT_SETTLE).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Phase 6: post-install start
    // -----------------------------------------------------------------------

    /// Start the guest from its installed disk.
    ///
    /// No-op when the guest is already running: the installer reboot may
    /// have brought it up on its own, and a double start would fail.
    pub async fn start_vm_after_install(&self) -> ForgeResult<()> {
        info!("starting guest from installed OS");
        tokio::time::sleep(PRE_START_SETTLE).await;

        if self.classify().await == GuestState::Running {
            info!(guest = %self.config.name, "guest already running; skipping start");
            return Ok(());
        }

        let start = format!("sudo virsh start {}", self.config.name);
        self.runner.exec_ok(&start, &ExecOptions::default()).await?;

        info!(guest = %self.config.name, "guest started");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Phase 7: lease discovery
    // -----------------------------------------------------------------------

    /// Wait for the guest to obtain a DHCP lease and return its address.
    pub async fn get_vm_ip_address(&self, timeout: Duration) -> ForgeResult<String> {
        tokio::time::sleep(LEASE_SETTLE).await;

        let state = self.classify().await;
        info!(guest = %self.config.name, ?state, "waiting for guest DHCP lease");

        discovery::wait_for_lease(&self.runner, &self.config.name, timeout).await
    }

    // -----------------------------------------------------------------------
    // Full workflow
    // -----------------------------------------------------------------------

    /// Run all phases in order and return the discovered guest address.
    pub async fn provision(&self, lease_timeout: Duration) -> ForgeResult<String> {
        self.cleanup_vm_if_present().await?;
        self.setup_environment().await?;
        self.define_and_start_vm().await?;
        self.navigate_boot_menu().await?;
        info!("installation in progress; this will take several minutes");
        self.trigger_final_reboot().await?;
        self.start_vm_after_install().await?;
        self.get_vm_ip_address(lease_timeout).await
    }

    async fn send_key(&self, key: &str) -> ForgeResult<()> {
        let command = format!("sudo virsh send-key {} {key}", self.config.name);
        self.runner.exec_ok(&command, &ExecOptions::default()).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::executor::CommandOutcome;
    use std::sync::Mutex;

    /// Scripted runner: records every command and answers through a closure.
    struct FakeRunner<F: Fn(&str) -> CommandOutcome> {
        calls: Mutex<Vec<String>>,
        respond: F,
    }

    impl<F: Fn(&str) -> CommandOutcome> FakeRunner<F> {
        fn new(respond: F) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                respond,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl<F: Fn(&str) -> CommandOutcome> CommandRunner for FakeRunner<F> {
        async fn exec(&self, command: &str, _opts: &ExecOptions) -> ForgeResult<CommandOutcome> {
            self.calls.lock().unwrap().push(command.to_string());
            Ok((self.respond)(command))
        }
    }

    fn ok(stdout: &str) -> CommandOutcome {
        CommandOutcome {
            stdout: stdout.to_string(),
            stderr: String::new(),
            success: true,
        }
    }

    fn fail(stderr: &str) -> CommandOutcome {
        CommandOutcome {
            stdout: String::new(),
            stderr: stderr.to_string(),
            success: false,
        }
    }

    fn test_config(dir: &std::path::Path) -> VmConfig {
        VmConfig {
            name: "idm-test-vm".to_string(),
            disk_size_gb: 30,
            ram_mb: 4096,
            vcpus: 2,
            iso_path: dir.join("install.iso"),
            disk_image_path: dir.join("idm-test-vm.qcow2"),
        }
    }

    // -- classify ----------------------------------------------------------

    #[tokio::test]
    async fn classify_reports_absent_when_name_not_listed() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|cmd| {
            assert!(cmd.contains("virsh list --all"), "unexpected command: {cmd}");
            ok(" Id   Name          State\n 1    other-guest   running")
        });
        let vm = VmLifecycle::new(runner, test_config(dir.path()));

        assert_eq!(vm.classify().await, GuestState::Absent);
    }

    #[tokio::test]
    async fn classify_reports_running_from_domstate() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|cmd| {
            if cmd.contains("list --all") {
                ok(" 3    idm-test-vm   running")
            } else {
                ok("running")
            }
        });
        let vm = VmLifecycle::new(runner, test_config(dir.path()));

        assert_eq!(vm.classify().await, GuestState::Running);
    }

    #[tokio::test]
    async fn classify_reports_defined_when_shut_off() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|cmd| {
            if cmd.contains("list --all") {
                ok(" -    idm-test-vm   shut off")
            } else {
                ok("shut off")
            }
        });
        let vm = VmLifecycle::new(runner, test_config(dir.path()));

        assert_eq!(vm.classify().await, GuestState::Defined);
    }

    #[tokio::test]
    async fn classify_folds_query_failure_into_absent() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|_| fail("error: failed to connect to the hypervisor"));
        let vm = VmLifecycle::new(runner, test_config(dir.path()));

        assert_eq!(vm.classify().await, GuestState::Absent);
    }

    // -- cleanup -----------------------------------------------------------

    #[tokio::test]
    async fn cleanup_is_noop_for_absent_guest() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|_| ok(" Id   Name   State"));
        let vm = VmLifecycle::new(runner, test_config(dir.path()));

        vm.cleanup_vm_if_present().await.unwrap();

        let calls = vm.runner.calls();
        assert_eq!(calls.len(), 1, "only the list query may run: {calls:?}");
        assert!(!calls.iter().any(|c| c.contains("destroy")));
        assert!(!calls.iter().any(|c| c.contains("undefine")));
    }

    #[tokio::test]
    async fn cleanup_destroys_undefines_and_deletes_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::write(&config.disk_image_path, b"stale").unwrap();

        let runner = FakeRunner::new(|cmd| {
            if cmd.contains("list --all") {
                ok(" 2    idm-test-vm   running")
            } else {
                ok("")
            }
        });
        let vm = VmLifecycle::new(runner, config);

        vm.cleanup_vm_if_present().await.unwrap();

        let calls = vm.runner.calls();
        assert!(calls.iter().any(|c| c == "sudo virsh destroy idm-test-vm"));
        assert!(
            calls
                .iter()
                .any(|c| c == "sudo virsh undefine idm-test-vm --remove-all-storage")
        );
        assert!(
            !vm.config.disk_image_path.exists(),
            "stale disk image must be deleted"
        );
    }

    #[tokio::test]
    async fn cleanup_tolerates_destroy_and_undefine_failures() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|cmd| {
            if cmd.contains("list --all") {
                ok(" -    idm-test-vm   shut off")
            } else if cmd.contains("domstate") {
                ok("shut off")
            } else {
                // Not running / already undefined.
                fail("error: domain is not running")
            }
        });
        let vm = VmLifecycle::new(runner, test_config(dir.path()));

        vm.cleanup_vm_if_present().await.unwrap();
    }

    #[tokio::test]
    async fn cleanup_twice_performs_no_destructive_command_the_second_time() {
        let dir = tempfile::tempdir().unwrap();
        // Stateful fake: the guest disappears once undefined.
        let defined = Mutex::new(true);
        let runner = FakeRunner::new(move |cmd| {
            if cmd.contains("list --all") {
                if *defined.lock().unwrap() {
                    ok(" 2    idm-test-vm   running")
                } else {
                    ok(" Id   Name   State")
                }
            } else if cmd.contains("undefine") {
                *defined.lock().unwrap() = false;
                ok("")
            } else {
                ok("")
            }
        });
        let vm = VmLifecycle::new(runner, test_config(dir.path()));

        vm.cleanup_vm_if_present().await.unwrap();
        let after_first = vm.runner.calls().len();

        vm.cleanup_vm_if_present().await.unwrap();
        let all_calls = vm.runner.calls();
        let second_calls = &all_calls[after_first..];

        assert_eq!(
            second_calls.len(),
            1,
            "second cleanup must only observe absence: {second_calls:?}"
        );
        assert!(second_calls[0].contains("list --all"));
    }

    // -- setup -------------------------------------------------------------

    #[tokio::test]
    async fn setup_fails_with_missing_iso_before_any_command() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|_| ok(""));
        let vm = VmLifecycle::new(runner, test_config(dir.path()));

        let err = vm.setup_environment().await.unwrap_err();
        match err {
            ForgeError::MissingIso(path) => assert_eq!(path, vm.config.iso_path),
            other => panic!("expected MissingIso, got: {other}"),
        }
        assert!(vm.runner.calls().is_empty(), "no command may run");
    }

    #[tokio::test]
    async fn setup_creates_qcow2_disk_of_configured_size() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::write(&config.iso_path, b"iso").unwrap();

        let runner = FakeRunner::new(|cmd| {
            if cmd.starts_with("file ") {
                ok("install.iso: ISO 9660 CD-ROM filesystem data (bootable)")
            } else {
                ok("")
            }
        });
        let vm = VmLifecycle::new(runner, config);

        vm.setup_environment().await.unwrap();

        let calls = vm.runner.calls();
        let create = calls
            .iter()
            .find(|c| c.contains("qemu-img create"))
            .expect("qemu-img create must run");
        assert!(create.contains("-f qcow2"));
        assert!(create.ends_with("30G"));
    }

    #[tokio::test]
    async fn setup_continues_when_media_probe_is_not_bootable() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::write(&config.iso_path, b"iso").unwrap();

        let runner = FakeRunner::new(|cmd| {
            if cmd.starts_with("file ") {
                ok("install.iso: data")
            } else {
                ok("")
            }
        });
        let vm = VmLifecycle::new(runner, config);

        // Soft check: the warning is logged, not raised.
        vm.setup_environment().await.unwrap();
        assert!(
            vm.runner
                .calls()
                .iter()
                .any(|c| c.contains("qemu-img create"))
        );
    }

    // -- install launch ----------------------------------------------------

    #[tokio::test]
    async fn install_command_carries_full_argument_shape() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|_| ok(""));
        let vm = VmLifecycle::new(runner, test_config(dir.path()));

        vm.define_and_start_vm().await.unwrap();

        let calls = vm.runner.calls();
        assert_eq!(calls.len(), 1);
        let cmd = &calls[0];
        assert!(cmd.starts_with("sudo virt-install --name idm-test-vm"));
        assert!(cmd.contains("--ram 4096"));
        assert!(cmd.contains("--vcpus 2"));
        assert!(cmd.contains("format=qcow2,bus=virtio"));
        assert!(cmd.contains("--os-variant rocky9"));
        assert!(cmd.contains("--boot cdrom,hd,menu=on"));
        assert!(cmd.contains("--network default"));
        assert!(cmd.contains("--graphics vnc,listen=0.0.0.0"));
        assert!(cmd.contains("--noautoconsole"));
    }

    // -- keypress phases ---------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn boot_menu_sends_down_then_enter() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|_| ok(""));
        let vm = VmLifecycle::new(runner, test_config(dir.path()));

        vm.navigate_boot_menu().await.unwrap();

        assert_eq!(
            vm.runner.calls(),
            vec![
                "sudo virsh send-key idm-test-vm KEY_DOWN",
                "sudo virsh send-key idm-test-vm KEY_ENTER",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn final_reboot_sends_tab_then_enter() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|_| ok(""));
        let vm = VmLifecycle::new(runner, test_config(dir.path()));

        vm.trigger_final_reboot().await.unwrap();

        assert_eq!(
            vm.runner.calls(),
            vec![
                "sudo virsh send-key idm-test-vm KEY_TAB",
                "sudo virsh send-key idm-test-vm KEY_ENTER",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn keypress_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|_| fail("error: domain not found"));
        let vm = VmLifecycle::new(runner, test_config(dir.path()));

        let err = vm.navigate_boot_menu().await.unwrap_err();
        assert!(matches!(err, ForgeError::Command { .. }));
    }

    // -- post-install start ------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn start_is_skipped_when_guest_already_running() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|cmd| {
            if cmd.contains("list --all") {
                ok(" 2    idm-test-vm   running")
            } else if cmd.contains("domstate") {
                ok("running")
            } else {
                panic!("unexpected command: {cmd}")
            }
        });
        let vm = VmLifecycle::new(runner, test_config(dir.path()));

        vm.start_vm_after_install().await.unwrap();

        assert!(!vm.runner.calls().iter().any(|c| c.contains("virsh start")));
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_issued_when_guest_is_shut_off() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|cmd| {
            if cmd.contains("list --all") {
                ok(" -    idm-test-vm   shut off")
            } else if cmd.contains("domstate") {
                ok("shut off")
            } else {
                ok("")
            }
        });
        let vm = VmLifecycle::new(runner, test_config(dir.path()));

        vm.start_vm_after_install().await.unwrap();

        assert!(
            vm.runner
                .calls()
                .iter()
                .any(|c| c == "sudo virsh start idm-test-vm")
        );
    }

    // -- lease discovery ---------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn lease_found_on_later_poll_stops_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let lease_queries = Mutex::new(0u32);
        let runner = FakeRunner::new(move |cmd| {
            if cmd.contains("domifaddr") {
                let mut n = lease_queries.lock().unwrap();
                *n += 1;
                if *n > 3 {
                    ok(" vnet0  52:54:00:6b:3c:58  ipv4  192.168.1.50/24")
                } else {
                    ok("")
                }
            } else if cmd.contains("list --all") {
                ok(" 2    idm-test-vm   running")
            } else {
                ok("running")
            }
        });
        let vm = VmLifecycle::new(runner, test_config(dir.path()));

        let ip = vm.get_vm_ip_address(Duration::from_secs(300)).await.unwrap();

        assert_eq!(ip, "192.168.1.50");
        let polls = vm
            .runner
            .calls()
            .iter()
            .filter(|c| c.contains("domifaddr"))
            .count();
        assert_eq!(polls, 4, "polling must stop at the first match");
    }

    #[tokio::test(start_paused = true)]
    async fn lease_timeout_is_fatal_and_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new(|cmd| {
            if cmd.contains("list --all") {
                ok(" 2    idm-test-vm   running")
            } else if cmd.contains("domstate") {
                ok("running")
            } else {
                ok("")
            }
        });
        let vm = VmLifecycle::new(runner, test_config(dir.path()));

        let err = vm
            .get_vm_ip_address(Duration::from_secs(20))
            .await
            .unwrap_err();

        match err {
            ForgeError::LeaseTimeout { guest, timeout_secs } => {
                assert_eq!(guest, "idm-test-vm");
                assert_eq!(timeout_secs, 20);
            }
            other => panic!("expected LeaseTimeout, got: {other}"),
        }

        // 20 s budget with a 5 s interval: queries at t=0,5,10,15,20.
        let polls = vm
            .runner
            .calls()
            .iter()
            .filter(|c| c.contains("domifaddr"))
            .count();
        assert_eq!(polls, 5);
    }
}
