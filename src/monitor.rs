// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The secure monitor: owns the board, loads the applet and supervises it.

use crate::{
    bundle::BundleVerifier,
    config::MonitorConfig,
    console::Console,
    context::{ExecContext, UserCpu},
    control::ControlTransport,
    debug::{self, CRASH_REPORTING},
    exceptions::ExceptionVector,
    firmware::{self, APPLET_CONFIG, FirmwareError, SLOT_STRIDE, SlotId},
    loader::{self, LoadError, LoadedImage},
    net::{Net, Network},
    ota::{OtaBuffer, UpdateError},
    platform::{Board, InterruptController, Platform, Soc, Watchdog},
    rollback::{self, Rollback, RollbackError},
    rpc::Dispatcher,
    slots::{Geometry, Partition},
    storage::{Card, StorageError},
    task::{BackgroundTasks, DueTask, Led},
};
use alloc::{
    string::{String, ToString},
    vec,
    vec::Vec,
};
use arrayvec::ArrayVec;
use core::fmt::{self, Display, Formatter};
use log::{error, info, warn};
use spin::mutex::SpinMutex;
use thiserror::Error;
use trusted_os_api::{
    firmware::{Component, FirmwareRelease, ProofBundle},
    rpc::Configuration,
    status::WitnessStatus,
};

/// First block of the crash log partition, right after the applet slots.
const CRASH_LOG_START: u64 = APPLET_CONFIG + 2 * SLOT_STRIDE;
/// Slot of the crash log partition holding the applet console output.
const CRASH_LOG_SLOT: usize = 0;
/// Slot of the crash log partition holding the exit reason.
const EXIT_REASON_SLOT: usize = 1;

fn crash_log_geometry() -> Geometry {
    Geometry {
        start: CRASH_LOG_START,
        length: 128,
        slot_lengths: vec![72, 8],
    }
}

/// Why [`Monitor::run`] returned.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExitReason {
    /// The applet called `SYS_EXIT` with the given code.
    Exited(u32),
    /// The monitor stopped the applet.
    Stopped,
    /// The applet took a fatal exception.
    Fault {
        /// Vector taken.
        vector: ExceptionVector,
        /// Faulting program counter.
        pc: u32,
        /// Link register at the time of the fault.
        lr: u32,
    },
    /// A syscall failed in a way the applet cannot recover from.
    Error(String),
}

impl Display for ExitReason {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {code}"),
            Self::Stopped => f.write_str("stopped"),
            Self::Fault { vector, pc, lr } => {
                write!(f, "{vector:?} exception pc:{pc:#010x} lr:{lr:#010x}")
            }
            Self::Error(e) => write!(f, "error, {e}"),
        }
    }
}

/// An error during boot, before any applet can run.
#[derive(Debug, Error)]
pub enum BootError {
    /// The internal card could not be detected.
    #[error("{0}")]
    Storage(#[from] StorageError),
    /// Rollback protection failed, or the monitor is older than allowed.
    #[error("{0}")]
    Rollback(#[from] RollbackError),
}

/// An error loading the applet.
#[derive(Debug, Error)]
pub enum AppletError {
    /// No trust anchors are configured.
    #[error("firmware verification not configured")]
    Untrusted,
    /// No slot holds a verifiable applet.
    #[error("{0}")]
    Firmware(#[from] FirmwareError),
    /// The applet is older than allowed.
    #[error("{0}")]
    Rollback(#[from] RollbackError),
    /// The applet ELF could not be loaded.
    #[error("{0}")]
    Load(#[from] LoadError),
}

/// A loaded applet and its execution context.
pub struct Applet {
    /// Registers and lifecycle of the applet.
    pub ctx: ExecContext,
    /// Entry point, text span and symbols of the loaded ELF.
    pub image: LoadedImage,
    /// Verified release manifest.
    pub release: FirmwareRelease,
    /// Slot the applet was loaded from.
    pub slot: SlotId,
    pub(crate) rpc: Dispatcher,
}

/// A verified firmware update waiting for its grace delay.
#[derive(Debug)]
pub(crate) struct PendingUpdate {
    pub(crate) component: Component,
    pub(crate) image: Vec<u8>,
    pub(crate) bundle: ProofBundle,
    pub(crate) release: FirmwareRelease,
}

/// The device an interrupt line belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum IrqSource {
    Control,
    Watchdog,
    Network,
}

/// The secure monitor.
pub struct Monitor<P: Platform> {
    pub(crate) card: P::Card,
    pub(crate) gic: P::Gic,
    pub(crate) watchdog: P::Watchdog,
    pub(crate) net: Net<P::Network>,
    pub(crate) soc: P::Soc,
    pub(crate) cpu: P::Cpu,
    pub(crate) control: P::Control,
    pub(crate) rng: P::Rng,
    pub(crate) config: MonitorConfig,
    pub(crate) verifier: Option<BundleVerifier>,
    pub(crate) rollback: Option<Rollback>,
    pub(crate) console: Console,
    pub(crate) tasks: BackgroundTasks,
    pub(crate) ota: SpinMutex<OtaBuffer>,
    pub(crate) pending_update: Option<PendingUpdate>,
    pub(crate) apply_due: bool,
    pub(crate) applet_config: Option<Configuration>,
    pub(crate) witness: Option<WitnessStatus>,
    pub(crate) identity_counter: u64,
    pub(crate) crash_log: Option<Partition>,
    irqs: ArrayVec<(u32, IrqSource), 3>,
}

impl<P: Platform> Monitor<P> {
    /// Takes ownership of the board.
    pub fn new(board: Board<P>, config: MonitorConfig) -> Self {
        let verifier = if config.trust.is_empty() {
            warn!("SM no trust anchors configured, firmware cannot be verified");
            None
        } else {
            config
                .trust
                .verifier()
                .inspect_err(|e| error!("SM invalid trust anchors, {e}"))
                .ok()
        };

        let mut irqs = ArrayVec::new();
        irqs.push((board.control.irq(), IrqSource::Control));
        if let Some(irq) = board.watchdog.irq() {
            irqs.push((irq, IrqSource::Watchdog));
        }
        irqs.push((board.network.irq(), IrqSource::Network));

        Self {
            card: board.card,
            gic: board.gic,
            watchdog: board.watchdog,
            net: Net::new(board.network),
            soc: board.soc,
            cpu: board.cpu,
            control: board.control,
            rng: board.rng,
            ota: SpinMutex::new(OtaBuffer::new(config.ota_limit)),
            config,
            verifier,
            rollback: None,
            console: Console::new(),
            tasks: BackgroundTasks::new(),
            pending_update: None,
            apply_due: false,
            applet_config: None,
            witness: None,
            identity_counter: 0,
            crash_log: None,
            irqs,
        }
    }

    /// Detects storage, sets up rollback protection and checks the monitor's own version.
    ///
    /// Rollback protection requires the hardware unique key, so it is skipped with a warning when
    /// SNVS is not available.
    pub fn boot(&mut self) -> Result<(), BootError> {
        info!(
            "SM trusted OS {} ({} {})",
            self.config.version,
            crate::config::REVISION,
            crate::config::BUILD
        );
        self.soc.set_led(Led::Blue, false);
        self.soc.set_led(Led::White, false);

        self.card.detect()?;
        let info = self.card.info();
        info!(
            "SM card detected, {} blocks of {} bytes, mmc:{}",
            info.blocks, info.block_size, info.mmc
        );

        if self.soc.snvs_available() {
            let rollback = Rollback::init(&mut self.soc, &mut self.card, &mut self.rng)?;
            info!("SM version verification ({})", self.config.version);
            rollback.check_version_str(
                &mut self.card,
                &mut self.rng,
                rollback::OS_VERSION,
                &self.config.version,
            )?;
            self.rollback = Some(rollback);
        } else {
            warn!("SM rollback protection unavailable, SNVS not available");
        }

        match Partition::open(&mut self.card, crash_log_geometry()) {
            Ok(partition) => self.crash_log = Some(partition),
            Err(e) => warn!("SM crash log unavailable, {e}"),
        }

        Ok(())
    }

    /// Selects, verifies and loads the newest valid applet.
    pub fn load_applet(&mut self) -> Result<Applet, AppletError> {
        let verifier = self.verifier.as_ref().ok_or(AppletError::Untrusted)?;
        let selected = firmware::select(&mut self.card, Component::TrustedApplet, verifier)?;

        if let Some(rollback) = &self.rollback {
            rollback.check_version(
                &mut self.card,
                &mut self.rng,
                rollback::APPLET_VERSION,
                &selected.release.git_tag_name,
            )?;
        }

        let image = loader::load(&selected.image, P::APPLET_REGION, &mut self.cpu)?;
        let ctx = ExecContext::new(P::APPLET_REGION, image.entry, false);
        info!(
            "SM loaded applet {} entry:{:#010x} from slot {:?}",
            selected.release.git_tag_name, image.entry, selected.slot
        );

        Ok(Applet {
            ctx,
            image,
            release: selected.release,
            slot: selected.slot,
            rpc: Dispatcher::new(&selected.image, P::APPLET_REGION),
        })
    }

    /// Runs `applet` until it exits, faults or is stopped.
    ///
    /// The watchdog is armed first, so the monitor regains control within
    /// [`Platform::WATCHDOG_TIMEOUT_MS`] even if the applet never traps.
    pub fn run(&mut self, applet: &mut Applet) -> ExitReason {
        self.gic.set_fiq_routing(true);
        self.watchdog.arm(P::WATCHDOG_TIMEOUT_MS);
        applet.ctx.start();

        let ctx = &applet.ctx;
        info!(
            "SM starting mode:{:?} sp:{:#010x} pc:{:#010x} ns:{}",
            ctx.spsr.mode(),
            ctx.sp,
            ctx.pc,
            ctx.non_secure
        );

        let reason = loop {
            let vector = self.cpu.enter(&mut applet.ctx);
            if let Some(reason) = self.handle_exception(applet, vector) {
                break reason;
            }
            if self.poll_tasks() {
                applet.ctx.stop();
            }
            if applet.ctx.stop_requested() {
                break ExitReason::Stopped;
            }
        };

        self.gic.set_fiq_routing(false);
        self.console.flush();
        applet.ctx.finish();

        let ctx = &applet.ctx;
        info!(
            "SM stopped mode:{:?} sp:{:#010x} lr:{:#010x} pc:{:#010x} ns:{} ({reason})",
            ctx.spsr.mode(),
            ctx.sp,
            ctx.lr,
            ctx.pc,
            ctx.non_secure
        );

        reason
    }

    /// Runs the applet forever, reloading it whenever it exits and applying firmware updates once
    /// due.
    pub fn supervise(&mut self) -> ! {
        loop {
            match self.load_applet() {
                Ok(mut applet) => {
                    let reason = self.run(&mut applet);
                    applet.ctx.await_done(|| {});
                    self.record_exit(&applet, &reason);
                }
                Err(e) => {
                    error!("SM could not load applet, {e}");
                    self.idle();
                }
            }

            if self.apply_due {
                if let Err(e) = self.apply_update() {
                    error!("SM firmware update failed, {e}");
                }
                info!("SM rebooting");
                self.soc.reset();
            }
        }
    }

    /// Services the control interface until a firmware update falls due.
    fn idle(&mut self) {
        info!("SM waiting for firmware update");
        while !self.poll_tasks() {
            self.gic.wait_for_interrupt();
            self.service_control(None);
        }
    }

    /// Runs due background tasks, returning whether a firmware update must now be applied.
    pub(crate) fn poll_tasks(&mut self) -> bool {
        let now = self.soc.nanotime();
        let soc = &mut self.soc;
        if self.tasks.poll(now, |led, on| soc.set_led(led, on)) == Some(DueTask::ApplyUpdate) {
            self.apply_due = true;
        }
        self.apply_due
    }

    /// Returns the device `irq` belongs to.
    pub(crate) fn irq_source(&self, irq: u32) -> Option<IrqSource> {
        self.irqs
            .iter()
            .find(|(line, _)| *line == irq)
            .map(|&(_, source)| source)
    }

    /// Accepts a firmware update chunk, verifying the image once the transfer is complete and
    /// scheduling it to be applied after the grace delay.
    pub(crate) fn receive_update(
        &mut self,
        component: Component,
        update: trusted_os_api::rpc::FirmwareUpdate,
    ) -> Result<(), UpdateError> {
        let Some(received) = self.ota.lock().push(component, update)? else {
            return Ok(());
        };

        let verifier = self.verifier.as_ref().ok_or(UpdateError::Untrusted)?;
        let mut bundle = received.proof.ok_or(UpdateError::MissingProof)?;
        let release = verifier.verify(&mut bundle, component, &received.image)?;

        if let Some(rollback) = &self.rollback {
            let sector = match component {
                Component::TrustedOs => rollback::OS_VERSION,
                Component::TrustedApplet => rollback::APPLET_VERSION,
            };
            let expected = rollback.expected_version(&mut self.card, &mut self.rng, sector)?;
            if release.git_tag_name.less_than(&expected) {
                return Err(RollbackError::VersionMismatch {
                    running: release.git_tag_name,
                    expected,
                }
                .into());
            }
        }

        info!(
            "SM {component} {} verified, applying update",
            release.git_tag_name
        );
        self.pending_update = Some(PendingUpdate {
            component,
            image: received.image,
            bundle,
            release,
        });
        self.tasks
            .schedule_apply(self.soc.nanotime(), self.config.update_grace_delay_ns);

        Ok(())
    }

    /// Writes the pending firmware update to the slot not holding the newest firmware, blinking
    /// the white LED while flashing.
    pub fn apply_update(&mut self) -> Result<(), UpdateError> {
        self.apply_due = false;
        let Some(update) = self.pending_update.take() else {
            return Ok(());
        };

        let (slot, generation) = firmware::next_target(&mut self.card, update.component);
        info!(
            "SM installing {} {} to slot {slot:?}",
            update.component, update.release.git_tag_name
        );

        let tasks = &mut self.tasks;
        let soc = &mut self.soc;
        let result = firmware::install(
            &mut self.card,
            update.component,
            &update.image,
            update.bundle,
            generation,
            slot,
            || soc.set_led(Led::White, tasks.flash_progress()),
        );
        let on = self.tasks.flash_done();
        self.soc.set_led(Led::White, on);

        result?;
        Ok(())
    }

    /// Persists the applet console output and exit reason to the crash log partition.
    fn record_exit(&mut self, applet: &Applet, reason: &ExitReason) {
        match reason {
            ExitReason::Exited(0) | ExitReason::Stopped => info!("SM applet {reason}"),
            _ => error!("SM applet {} {reason}", applet.release.git_tag_name),
        }

        let log = self.console.take_crash_log();
        let Some(partition) = self.crash_log.as_mut() else {
            return;
        };

        let records = [
            (CRASH_LOG_SLOT, log.into_bytes()),
            (EXIT_REASON_SLOT, reason.to_string().into_bytes()),
        ];
        for (index, data) in records {
            let result = partition.open_slot(index).and_then(|mut slot| {
                let start = data.len().saturating_sub(slot.capacity());
                slot.write(&mut self.card, &data[start..])
            });
            if let Err(e) = result {
                warn!("SM could not save crash log, {e}");
            }
        }
    }

    /// Returns the exit reason and console output saved when the applet last exited.
    pub(crate) fn saved_crash_log(&mut self) -> Vec<u8> {
        let Some(partition) = self.crash_log.as_mut() else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for index in [EXIT_REASON_SLOT, CRASH_LOG_SLOT] {
            if let Ok(slot) = partition.open_slot(index) {
                let (data, _) = slot.read();
                out.extend_from_slice(&data);
                if index == EXIT_REASON_SLOT && !data.is_empty() {
                    out.push(b'\n');
                }
            }
        }
        out
    }

    /// Logs the state of a faulting applet, with a stack trace where enabled.
    pub(crate) fn report_fault(&self, applet: &Applet, vector: ExceptionVector) -> ExitReason {
        error!("SM unhandled {vector:?} exception");
        if CRASH_REPORTING {
            debug::log_stack_trace(&applet.ctx, &self.cpu, &applet.image);
        }
        ExitReason::Fault {
            vector,
            pc: applet.ctx.pc,
            lr: applet.ctx.lr,
        }
    }
}

/// Boots the monitor and supervises the applet forever.
///
/// The board support crate calls this from its reset handler, once it has set up the MMU, the
/// console and [`logger::init`](crate::logger::init).
pub fn trusted_os_main<P: Platform>(board: Board<P>, config: MonitorConfig) -> ! {
    let mut monitor = Monitor::new(board, config);
    if let Err(e) = monitor.boot() {
        panic!("SM boot failed, {e}");
    }
    monitor.supervise()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bundle::fixture,
        loader::fixture::{Segment, elf},
        platform::test::{
            Bus, CONTROL_IRQ, FakeControl, RESET_MAGIC, Step, TestPlatform, expect_reset,
        },
    };
    use trusted_os_api::{
        control::{ControlCommand, ControlResponse},
        rpc::{FirmwareUpdate, Handler},
        syscall::{FIQ, SYS_EXIT, SYS_WRITE},
    };

    const ENTRY: u32 = 0x9000_0000;

    fn applet_elf(marker: u8) -> Vec<u8> {
        elf(
            ENTRY,
            &[Segment {
                addr: ENTRY,
                data: &vec![marker; 64],
                mem_size: 128,
                execute: true,
            }],
            &[("main", ENTRY, 64)],
        )
    }

    fn monitor() -> (Monitor<TestPlatform>, Bus) {
        let (board, bus) = TestPlatform::board();
        let config = MonitorConfig {
            trust: fixture::anchors(),
            ..MonitorConfig::default()
        };
        (Monitor::new(board, config), bus)
    }

    fn install_applet(monitor: &mut Monitor<TestPlatform>, version: &str, image: &[u8]) {
        let (slot, generation) = firmware::next_target(&mut monitor.card, Component::TrustedApplet);
        firmware::install(
            &mut monitor.card,
            Component::TrustedApplet,
            image,
            fixture::bundle(Component::TrustedApplet, version, image),
            generation,
            slot,
            || {},
        )
        .unwrap();
    }

    #[test]
    fn boot_initialises_rollback_protection() {
        let (mut monitor, _) = monitor();
        monitor.boot().unwrap();
        assert!(monitor.rollback.is_some());
        assert!(monitor.crash_log.is_some());
        assert_eq!(monitor.card.rpmb_counter(), 1);
    }

    #[test]
    fn boot_without_snvs() {
        let (mut monitor, _) = monitor();
        monitor.soc.set_snvs_available(false);
        monitor.boot().unwrap();
        assert!(monitor.rollback.is_none());
    }

    #[test]
    fn loads_newest_applet() {
        let (mut monitor, _) = monitor();
        monitor.boot().unwrap();
        install_applet(&mut monitor, "1.0.0", &applet_elf(1));
        install_applet(&mut monitor, "1.1.0", &applet_elf(2));

        let applet = monitor.load_applet().unwrap();
        assert_eq!(applet.release.git_tag_name.to_string(), "1.1.0");
        assert_eq!(applet.slot, SlotId::B);
        assert_eq!(applet.ctx.pc, ENTRY);
        assert_eq!(applet.ctx.sp, 0xa000_0000);
        assert_eq!(monitor.cpu.memory().read_vec(ENTRY, 2), [2, 2]);
    }

    #[test]
    fn applet_rollback_is_refused() {
        let (mut monitor, _) = monitor();
        monitor.boot().unwrap();
        install_applet(&mut monitor, "2.0.0", &applet_elf(1));
        monitor.load_applet().unwrap();

        install_applet(&mut monitor, "1.0.0", &applet_elf(2));
        // Slot B holds the older release with a higher generation, it is selected and refused.
        assert!(matches!(
            monitor.load_applet(),
            Err(AppletError::Rollback(RollbackError::VersionMismatch { .. }))
        ));
    }

    #[test]
    fn no_applet_installed() {
        let (mut monitor, _) = monitor();
        monitor.boot().unwrap();
        assert!(matches!(
            monitor.load_applet(),
            Err(AppletError::Firmware(FirmwareError::NoValidFirmware(_)))
        ));
    }

    #[test]
    fn run_until_exit() {
        let (mut monitor, bus) = monitor();
        monitor.boot().unwrap();
        install_applet(&mut monitor, "1.0.0", &applet_elf(1));
        let mut applet = monitor.load_applet().unwrap();

        monitor.cpu.script([
            Step::Syscall([SYS_WRITE, u32::from(b'h'), 0]),
            Step::Syscall([SYS_WRITE, u32::from(b'i'), 0]),
            Step::Syscall([SYS_WRITE, u32::from(b'\n'), 0]),
            Step::Syscall([SYS_EXIT, 3, 0]),
        ]);
        assert_eq!(monitor.run(&mut applet), ExitReason::Exited(3));
        assert!(!bus.borrow().fiq_routing);
        assert_eq!(bus.borrow().watchdog_timeout_ms, Some(5000));

        monitor.record_exit(&applet, &ExitReason::Exited(3));
        let log = monitor.saved_crash_log();
        assert_eq!(log, b"exited with code 3\nhi\n");
    }

    #[test]
    fn fault_is_reported() {
        let (mut monitor, _) = monitor();
        monitor.boot().unwrap();
        install_applet(&mut monitor, "1.0.0", &applet_elf(1));
        let mut applet = monitor.load_applet().unwrap();

        monitor.cpu.script([Step::Exception {
            vector: ExceptionVector::DataAbort,
            pc: ENTRY + 8,
            lr: ENTRY + 4,
        }]);
        assert_eq!(
            monitor.run(&mut applet),
            ExitReason::Fault {
                vector: ExceptionVector::DataAbort,
                pc: ENTRY + 8,
                lr: ENTRY + 4
            }
        );
    }

    #[test]
    fn watchdog_regains_control_from_spinning_applet() {
        let (mut monitor, bus) = monitor();
        monitor.boot().unwrap();
        install_applet(&mut monitor, "1.0.0", &applet_elf(1));
        let mut applet = monitor.load_applet().unwrap();

        applet.ctx.set_handler(Handler {
            g: ENTRY,
            p: ENTRY + 0x100,
        });

        // The handler must unmask FIQs again for the next watchdog interrupt to be taken.
        let start = bus.borrow().now;
        monitor
            .cpu
            .script([Step::Spin, Step::Syscall([FIQ, 0, 0]), Step::Spin]);
        assert_eq!(monitor.run(&mut applet), ExitReason::Exited(0));

        let bus = bus.borrow();
        assert_eq!(bus.watchdog_services, 2);
        assert_eq!(bus.now - start, 2 * 5000 * 1_000_000);
        assert_eq!(monitor.cpu.wakes(), 2);
    }

    #[test]
    fn masked_applet_is_reset_by_watchdog() {
        let (mut monitor, _) = monitor();
        monitor.boot().unwrap();
        install_applet(&mut monitor, "1.0.0", &applet_elf(1));
        let mut applet = monitor.load_applet().unwrap();

        applet.ctx.spsr |= crate::context::Cpsr::F;
        monitor.cpu.script([Step::Spin]);
        expect_reset(|| {
            monitor.run(&mut applet);
        });
    }

    #[test]
    fn control_config_restarts_applet() {
        let (mut monitor, _) = monitor();
        monitor.boot().unwrap();
        install_applet(&mut monitor, "1.0.0", &applet_elf(1));
        let mut applet = monitor.load_applet().unwrap();

        let config = Configuration {
            mac: "02:00:00:00:00:01".into(),
            ..Configuration::default()
        };
        monitor.control.push(
            ControlCommand::Config,
            serde_json::to_vec(&config).unwrap(),
        );
        monitor.cpu.script([Step::Interrupt(CONTROL_IRQ), Step::Spin]);
        assert_eq!(monitor.run(&mut applet), ExitReason::Stopped);
        assert_eq!(monitor.applet_config, Some(config));
        assert_eq!(
            FakeControl::decode(&monitor.control.responses()[0]),
            ControlResponse::ok(Vec::new())
        );
    }

    #[test]
    fn update_is_applied_after_grace_delay() {
        let (mut monitor, bus) = monitor();
        monitor.boot().unwrap();
        install_applet(&mut monitor, "1.0.0", &applet_elf(1));
        let mut applet = monitor.load_applet().unwrap();

        let image = applet_elf(7);
        let update = FirmwareUpdate {
            sequence: 0,
            total: 1,
            image: Vec::new(),
            proof: Some(fixture::bundle(Component::TrustedApplet, "1.2.0", &image)),
        };
        monitor.receive_update(Component::TrustedApplet, update).unwrap();
        monitor
            .receive_update(
                Component::TrustedApplet,
                FirmwareUpdate {
                    sequence: 1,
                    total: 1,
                    image: image.clone(),
                    proof: None,
                },
            )
            .unwrap();
        assert!(monitor.pending_update.is_some());
        assert!(!monitor.poll_tasks());

        bus.borrow_mut().now += 2 * crate::task::NS_PER_SEC;
        monitor.cpu.script([Step::Syscall([SYS_WRITE, u32::from(b'x'), 0])]);
        assert_eq!(monitor.run(&mut applet), ExitReason::Stopped);
        assert!(monitor.apply_due);

        monitor.apply_update().unwrap();
        assert!(!monitor.apply_due);
        assert!(monitor.soc.led_history(Led::White).contains(&true));
        assert!(!monitor.soc.led(Led::White));

        let applet = monitor.load_applet().unwrap();
        assert_eq!(applet.release.git_tag_name.to_string(), "1.2.0");
    }

    #[test]
    fn unverified_update_is_not_scheduled() {
        let (mut monitor, _) = monitor();
        monitor.boot().unwrap();

        let image = applet_elf(7);
        let update = FirmwareUpdate {
            sequence: 0,
            total: 1,
            image: Vec::new(),
            proof: Some(fixture::bundle(Component::TrustedApplet, "1.2.0", b"other")),
        };
        monitor.receive_update(Component::TrustedApplet, update).unwrap();
        let result = monitor.receive_update(
            Component::TrustedApplet,
            FirmwareUpdate {
                sequence: 1,
                total: 1,
                image,
                proof: None,
            },
        );
        assert!(matches!(result, Err(UpdateError::Verify(_))));
        assert!(monitor.pending_update.is_none());
        assert!(!monitor.tasks.apply_scheduled());
    }

    #[test]
    fn older_update_is_refused() {
        let (mut monitor, _) = monitor();
        monitor.boot().unwrap();
        install_applet(&mut monitor, "2.0.0", &applet_elf(1));
        monitor.load_applet().unwrap();

        let image = applet_elf(7);
        let result = monitor.receive_update(
            Component::TrustedApplet,
            FirmwareUpdate {
                sequence: 0,
                total: 0,
                image: Vec::new(),
                proof: None,
            },
        );
        assert_eq!(result, Err(UpdateError::Sequence));

        monitor
            .receive_update(
                Component::TrustedApplet,
                FirmwareUpdate {
                    sequence: 0,
                    total: 1,
                    image: Vec::new(),
                    proof: Some(fixture::bundle(Component::TrustedApplet, "1.9.0", &image)),
                },
            )
            .unwrap();
        let result = monitor.receive_update(
            Component::TrustedApplet,
            FirmwareUpdate {
                sequence: 1,
                total: 1,
                image,
                proof: None,
            },
        );
        assert!(matches!(
            result,
            Err(UpdateError::Rollback(RollbackError::VersionMismatch { .. }))
        ));
    }

    #[test]
    fn supervise_resets_after_update() {
        let (mut monitor, bus) = monitor();
        monitor.boot().unwrap();
        install_applet(&mut monitor, "1.0.0", &applet_elf(1));

        let image = applet_elf(9);
        let chunks = [
            FirmwareUpdate {
                sequence: 0,
                total: 1,
                image: Vec::new(),
                proof: Some(fixture::bundle(Component::TrustedApplet, "1.0.1", &image)),
            },
            FirmwareUpdate {
                sequence: 1,
                total: 1,
                image,
                proof: None,
            },
        ];
        for chunk in chunks {
            monitor
                .receive_update(Component::TrustedApplet, chunk)
                .unwrap();
        }
        bus.borrow_mut().now += 2 * crate::task::NS_PER_SEC;
        monitor.cpu.script([Step::Spin]);

        let message = expect_reset(|| {
            monitor.supervise();
        });
        assert_eq!(message, RESET_MAGIC);
        let (_, generation) = firmware::next_target(&mut monitor.card, Component::TrustedApplet);
        assert_eq!(generation, 3);
    }

    #[test]
    fn exit_reason_display() {
        assert_eq!(ExitReason::Stopped.to_string(), "stopped");
        assert_eq!(
            ExitReason::Fault {
                vector: ExceptionVector::Undefined,
                pc: 0x9000_0010,
                lr: 0x9000_0004
            }
            .to_string(),
            "Undefined exception pc:0x90000010 lr:0x90000004"
        );
    }
}
