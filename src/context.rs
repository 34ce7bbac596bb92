// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The applet execution context.

use crate::{exceptions::ExceptionVector, task::Signal};
use alloc::{vec, vec::Vec};
use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;
use trusted_os_api::rpc::Handler;

/// A contiguous range of physical memory.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MemoryRegion {
    /// First address of the region.
    pub start: u32,
    /// Size of the region in bytes.
    pub size: u32,
}

impl MemoryRegion {
    /// Creates a region covering `size` bytes from `start`.
    pub const fn new(start: u32, size: u32) -> Self {
        Self { start, size }
    }

    /// Returns the first address past the end of the region.
    pub const fn end(&self) -> u64 {
        self.start as u64 + self.size as u64
    }

    /// Returns whether `addr` lies within the region.
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start && u64::from(addr) < self.end()
    }

    /// Returns whether the `len` bytes from `addr` all lie within the region.
    pub fn contains_range(&self, addr: u32, len: usize) -> bool {
        addr >= self.start && u64::from(addr) + len as u64 <= self.end()
    }
}

/// An error accessing applet memory.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum MemoryError {
    /// The access falls outside the applet region.
    #[error("invalid offset")]
    InvalidOffset {
        /// First address accessed.
        addr: u32,
        /// Length of the access.
        len: usize,
    },
}

/// ARM processor modes, as encoded in the CPSR mode field.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum Mode {
    /// Unprivileged, the applet runs here.
    User = 0x10,
    /// Fast interrupt.
    Fiq = 0x11,
    /// Interrupt.
    Irq = 0x12,
    /// Supervisor call.
    Supervisor = 0x13,
    /// Prefetch or data abort.
    Abort = 0x17,
    /// Undefined instruction.
    Undefined = 0x1b,
    /// Privileged, the monitor runs here.
    System = 0x1f,
}

bitflags! {
    /// Current/saved program status register.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct Cpsr: u32 {
        /// Thumb execution state.
        const T = 1 << 5;
        /// FIQ mask.
        const F = 1 << 6;
        /// IRQ mask.
        const I = 1 << 7;
        const _ = !0;
    }
}

impl Cpsr {
    const MODE_MASK: u32 = 0x1f;

    /// Returns the processor mode, if the mode field holds a valid one.
    pub fn mode(self) -> Option<Mode> {
        Mode::try_from(self.bits() & Self::MODE_MASK).ok()
    }

    /// Returns a copy with the mode field replaced by `mode`.
    pub fn with_mode(self, mode: Mode) -> Self {
        Self::from_bits_retain((self.bits() & !Self::MODE_MASK) | u32::from(mode))
    }
}

/// Lifecycle of an execution context.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    /// Loaded but never entered.
    Loaded,
    /// Being run by the monitor.
    Running,
    /// A stop was requested, the monitor will return at the next exception.
    Stopped,
    /// The run loop returned, memory and registers may be reused.
    Done,
}

/// Runs an execution context in User mode.
pub trait UserCpu {
    /// Restores `ctx` and runs it until the next exception is taken, saving the registers back
    /// into `ctx` and recording the interrupted mode before returning the vector.
    fn enter(&mut self, ctx: &mut ExecContext) -> ExceptionVector;
}

/// Physical memory backing the applet region.
pub trait AppletMemory {
    /// Copies memory at `addr` into `buf`.
    fn read(&self, addr: u32, buf: &mut [u8]);

    /// Copies `data` to memory at `addr`.
    fn write(&mut self, addr: u32, data: &[u8]);
}

/// The register file and lifecycle state of the applet.
#[derive(Debug)]
pub struct ExecContext {
    /// General purpose registers r0-r12.
    pub r: [u32; 13],
    /// Stack pointer (r13).
    pub sp: u32,
    /// Link register (r14).
    pub lr: u32,
    /// Program counter (r15).
    pub pc: u32,
    /// Status register restored on entry.
    pub spsr: Cpsr,
    /// Memory exclusively owned by the applet.
    pub region: MemoryRegion,
    /// Entry point of the loaded image.
    pub entry: u32,
    /// Whether the context runs in the normal world.
    pub non_secure: bool,
    /// Mode the processor was in when the last exception was taken.
    pub exception_mode: Mode,
    state: State,
    handler: Option<Handler>,
    wake: Signal,
    done: Signal,
}

impl ExecContext {
    /// Creates a context entering at `entry`, with the stack at the end of `region`, IRQs masked
    /// and FIQs deliverable.
    pub fn new(region: MemoryRegion, entry: u32, non_secure: bool) -> Self {
        Self {
            r: [0; 13],
            // The region end is a 32-bit address for every supported applet region.
            sp: region.end() as u32,
            lr: 0,
            pc: entry,
            spsr: Cpsr::I.with_mode(Mode::User),
            region,
            entry,
            non_secure,
            exception_mode: Mode::User,
            state: State::Loaded,
            handler: None,
            wake: Signal::new(),
            done: Signal::new(),
        }
    }

    /// First syscall argument, the syscall number.
    pub fn a0(&self) -> u32 {
        self.r[0]
    }

    /// Second syscall argument.
    pub fn a1(&self) -> u32 {
        self.r[1]
    }

    /// Third syscall argument.
    pub fn a2(&self) -> u32 {
        self.r[2]
    }

    /// Sets the syscall return value.
    pub fn ret(&mut self, value: u32) {
        self.r[0] = value;
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Marks the context as being run.
    pub fn start(&mut self) {
        self.state = State::Running;
    }

    /// Requests the context to stop. This is asynchronous: the monitor returns from
    /// [`Monitor::run`](crate::monitor::Monitor::run) at the next exception, after which
    /// [`ExecContext::await_done`] completes.
    pub fn stop(&mut self) {
        if self.state != State::Done {
            self.state = State::Stopped;
        }
    }

    /// Returns whether a stop was requested.
    pub fn stop_requested(&self) -> bool {
        self.state == State::Stopped
    }

    /// Marks the context as no longer running and signals completion.
    pub fn finish(&mut self) {
        self.state = State::Done;
        self.done.signal();
    }

    /// Waits until the run loop has returned.
    pub fn await_done(&self, idle: impl FnMut()) {
        self.done.await_signal(idle);
    }

    /// Returns the registered event handler.
    pub fn handler(&self) -> Option<Handler> {
        self.handler
    }

    /// Sets the task to wake after interrupts are serviced on the applet's behalf.
    pub fn set_handler(&mut self, handler: Handler) {
        self.handler = Some(handler);
    }

    /// Wakes the registered event handler, returning whether there was one.
    pub fn wake_handler(&self) -> bool {
        if self.handler.is_some() {
            self.wake.signal();
            true
        } else {
            false
        }
    }

    /// Consumes a pending wake-up. Called by the CPU on entry to resume the handler task.
    pub fn take_wake(&self) -> bool {
        self.wake.take()
    }

    /// Reads `len` bytes of applet memory at `addr`.
    pub fn read_memory<M: AppletMemory + ?Sized>(
        &self,
        memory: &M,
        addr: u32,
        len: usize,
    ) -> Result<Vec<u8>, MemoryError> {
        self.check_range(addr, len)?;
        let mut buf = vec![0; len];
        memory.read(addr, &mut buf);
        Ok(buf)
    }

    /// Writes `data` to applet memory at `addr`.
    pub fn write_memory<M: AppletMemory + ?Sized>(
        &self,
        memory: &mut M,
        addr: u32,
        data: &[u8],
    ) -> Result<(), MemoryError> {
        self.check_range(addr, data.len())?;
        memory.write(addr, data);
        Ok(())
    }

    fn check_range(&self, addr: u32, len: usize) -> Result<(), MemoryError> {
        if self.region.contains_range(addr, len) {
            Ok(())
        } else {
            Err(MemoryError::InvalidOffset { addr, len })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::test::SparseMemory;

    const REGION: MemoryRegion = MemoryRegion::new(0x9000_0000, 0x1000_0000);

    #[test]
    fn region_bounds() {
        assert!(REGION.contains(0x9000_0000));
        assert!(REGION.contains(0x9fff_ffff));
        assert!(!REGION.contains(0xa000_0000));
        assert!(!REGION.contains(0x8fff_ffff));
        assert!(REGION.contains_range(0x9fff_fff0, 16));
        assert!(!REGION.contains_range(0x9fff_fff0, 17));
        assert!(!REGION.contains_range(0xffff_fff0, 0x100));
        assert_eq!(REGION.end(), 0xa000_0000);
    }

    #[test]
    fn initial_registers() {
        let ctx = ExecContext::new(REGION, 0x9001_0000, true);
        assert_eq!(ctx.pc, 0x9001_0000);
        assert_eq!(ctx.sp, 0xa000_0000);
        assert_eq!(ctx.spsr.mode(), Some(Mode::User));
        assert!(!ctx.spsr.contains(Cpsr::F));
        assert!(ctx.spsr.contains(Cpsr::I));
        assert_eq!(ctx.state(), State::Loaded);
    }

    #[test]
    fn cpsr_mode() {
        let cpsr = Cpsr::from_bits_retain(0x6000_01d3);
        assert_eq!(cpsr.mode(), Some(Mode::Supervisor));
        assert!(cpsr.contains(Cpsr::F | Cpsr::I));
        assert_eq!(cpsr.with_mode(Mode::System).bits(), 0x6000_01df);
        assert_eq!(Cpsr::from_bits_retain(0x15).mode(), None);
    }

    #[test]
    fn stop_is_asynchronous() {
        let mut ctx = ExecContext::new(REGION, REGION.start, false);
        ctx.start();
        ctx.stop();
        assert!(ctx.stop_requested());
        assert_eq!(ctx.state(), State::Stopped);

        ctx.finish();
        ctx.await_done(|| panic!("already done"));
        assert_eq!(ctx.state(), State::Done);

        ctx.stop();
        assert_eq!(ctx.state(), State::Done);
    }

    #[test]
    fn wake_requires_handler() {
        let mut ctx = ExecContext::new(REGION, REGION.start, false);
        assert!(!ctx.wake_handler());
        assert!(!ctx.take_wake());

        ctx.set_handler(Handler {
            g: 0x9000_1000,
            p: 0x9000_2000,
        });
        assert!(ctx.wake_handler());
        assert!(ctx.take_wake());
        assert!(!ctx.take_wake());
    }

    #[test]
    fn memory_access_is_bounded() {
        let ctx = ExecContext::new(REGION, REGION.start, false);
        let mut memory = SparseMemory::default();

        ctx.write_memory(&mut memory, 0x9000_0100, b"applet").unwrap();
        assert_eq!(
            ctx.read_memory(&memory, 0x9000_0100, 6).unwrap(),
            b"applet"
        );
        assert_eq!(
            ctx.read_memory(&memory, 0x8fff_fffc, 8),
            Err(MemoryError::InvalidOffset {
                addr: 0x8fff_fffc,
                len: 8
            })
        );
        assert_eq!(
            ctx.write_memory(&mut memory, 0x9fff_ffff, b"ab")
                .unwrap_err()
                .to_string(),
            "invalid offset"
        );
    }
}
