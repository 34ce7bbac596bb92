// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The hardware the monitor depends on, provided by the board support crate.


use crate::{
    context::{AppletMemory, MemoryRegion, UserCpu},
    control::ControlTransport,
    net::Network,
    rpmb::RpmbCard,
    storage::Card,
    task::Led,
};
use alloc::vec::Vec;
use rand_core::RngCore;
use thiserror::Error;

/// An error reported by the SoC security peripherals.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SocError {
    /// The secure non-volatile storage is not available, e.g. secure boot is not active.
    #[error("SNVS not available")]
    SnvsUnavailable,
    /// An OTP fuse could not be read or blown.
    #[error("fuse bank {bank} word {word} access failed")]
    Fuse {
        /// Fuse bank.
        bank: u32,
        /// Word within the bank.
        word: u32,
    },
    /// The diversifier or IV is not usable for key derivation.
    #[error("invalid key derivation input")]
    InvalidDiversifier,
    /// The SoC does not support the operation.
    #[error("operation not supported")]
    Unsupported,
}

/// SoC security, clock and board control.
pub trait Soc {
    /// Returns the SoC unique identifier.
    fn unique_id(&self) -> [u8; 8];

    /// Returns whether the secure non-volatile storage, and therefore the hardware unique key, is
    /// available.
    fn snvs_available(&self) -> bool;

    /// Derives a key from the hardware unique key by encrypting `diversifier` with AES-CBC and
    /// `iv`.
    fn derive_key(&self, diversifier: &[u8], iv: &[u8; 16]) -> Result<Vec<u8>, SocError>;

    /// Reads an OTP fuse word.
    fn read_fuse(&self, bank: u32, word: u32) -> Result<u32, SocError>;

    /// Irreversibly blows the bits of `mask` in an OTP fuse word.
    fn blow_fuse(&mut self, bank: u32, word: u32, mask: u32) -> Result<(), SocError>;

    /// Turns a LED on or off.
    fn set_led(&mut self, led: Led, on: bool);

    /// Changes the ARM core frequency.
    fn set_frequency(&mut self, mhz: u32) -> Result<(), SocError>;

    /// Returns the monotonic time in nanoseconds.
    fn nanotime(&self) -> u64;

    /// Resets the board.
    fn reset(&mut self) -> !;
}

/// The interrupt controller.
pub trait InterruptController {
    /// Acknowledges the highest priority pending interrupt, returning its number.
    fn acknowledge(&mut self) -> Option<u32>;

    /// Signals the end of handling of `irq`.
    fn end_of_interrupt(&mut self, irq: u32);

    /// Routes every interrupt as FIQ, taken by the monitor while the applet runs, or back to IRQ.
    fn set_fiq_routing(&mut self, enabled: bool);

    /// Waits for the next interrupt, with interrupts routed to the monitor.
    fn wait_for_interrupt(&mut self);
}

/// The watchdog guaranteeing the monitor regains control of the CPU.
///
/// Once armed it cannot be disabled, only serviced.
pub trait Watchdog {
    /// Arms the watchdog, or changes its timeout.
    fn arm(&mut self, timeout_ms: u32);

    /// Restarts the timeout.
    fn service(&mut self);

    /// Returns the pre-timeout interrupt number, if the watchdog raises one.
    fn irq(&self) -> Option<u32>;
}

/// The hooks and devices of a board.
pub trait Platform {
    /// Memory exclusively owned by the applet.
    const APPLET_REGION: MemoryRegion = MemoryRegion::new(0x9000_0000, 0x1000_0000);

    /// Watchdog timeout while the applet runs.
    const WATCHDOG_TIMEOUT_MS: u32 = 5000;

    /// Internal storage, an eMMC for RPMB support.
    type Card: Card + RpmbCard;
    /// Interrupt controller.
    type Gic: InterruptController;
    /// Watchdog.
    type Watchdog: Watchdog;
    /// Ethernet controller.
    type Network: Network;
    /// SoC security peripherals.
    type Soc: Soc;
    /// CPU running the applet in User mode, and the memory it runs from.
    type Cpu: UserCpu + AppletMemory;
    /// Operator control interface.
    type Control: ControlTransport;
    /// Random number generator.
    type Rng: RngCore;
}

/// The devices of a board, handed to the monitor at boot.
pub struct Board<P: Platform> {
    /// Internal storage.
    pub card: P::Card,
    /// Interrupt controller.
    pub gic: P::Gic,
    /// Watchdog.
    pub watchdog: P::Watchdog,
    /// Ethernet controller.
    pub network: P::Network,
    /// SoC security peripherals.
    pub soc: P::Soc,
    /// CPU and applet memory.
    pub cpu: P::Cpu,
    /// Operator control interface.
    pub control: P::Control,
    /// Random number generator.
    pub rng: P::Rng,
}
