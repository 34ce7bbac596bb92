// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Routing of exceptions taken while the applet runs.

use crate::{
    context::{Cpsr, MemoryError, Mode},
    monitor::{Applet, ExitReason, IrqSource, Monitor},
    platform::{InterruptController, Platform, Soc, SocError, Watchdog},
    rpc::RpcError,
};
use alloc::string::ToString;
use log::{trace, warn};
use rand_core::RngCore;
use thiserror::Error;
use trusted_os_api::syscall::Syscall;

/// Random bytes generated per step of `SYS_GETRANDOM`.
const GETRANDOM_CHUNK: usize = 256;

/// ARMv7 exception vectors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExceptionVector {
    /// Reset.
    Reset,
    /// Undefined instruction.
    Undefined,
    /// Supervisor call, the applet's syscalls.
    Supervisor,
    /// Instruction fetch abort.
    PrefetchAbort,
    /// Data access abort.
    DataAbort,
    /// Interrupt.
    Irq,
    /// Fast interrupt, every interrupt while the applet runs.
    Fiq,
}

/// A syscall failure which terminates the applet.
#[derive(Debug, Error)]
pub enum SyscallError {
    /// The syscall number is not known.
    #[error("invalid syscall {0:#x}")]
    Unknown(u32),
    /// A buffer lies outside the applet region.
    #[error("{0}")]
    Memory(#[from] MemoryError),
    /// The SoC refused the request.
    #[error("{0}")]
    Soc(#[from] SocError),
    /// The RPC reply could not be encoded.
    #[error("{0}")]
    Rpc(#[from] RpcError),
}

impl<P: Platform> Monitor<P> {
    /// Handles the exception `vector` taken by `applet`, returning why the applet must stop
    /// running, if it must.
    pub fn handle_exception(
        &mut self,
        applet: &mut Applet,
        vector: ExceptionVector,
    ) -> Option<ExitReason> {
        match vector {
            ExceptionVector::Supervisor => self
                .handle_syscall(applet)
                .unwrap_or_else(|e| Some(ExitReason::Error(e.to_string()))),
            ExceptionVector::Fiq => {
                self.handle_fiq(applet);
                None
            }
            ExceptionVector::Reset
            | ExceptionVector::Undefined
            | ExceptionVector::PrefetchAbort
            | ExceptionVector::DataAbort
            | ExceptionVector::Irq => Some(self.report_fault(applet, vector)),
        }
    }

    fn handle_syscall(&mut self, applet: &mut Applet) -> Result<Option<ExitReason>, SyscallError> {
        let number = applet.ctx.a0();
        let syscall = Syscall::try_from(number).map_err(|_| SyscallError::Unknown(number))?;
        let ctx = &mut applet.ctx;

        match syscall {
            Syscall::Exit => return Ok(Some(ExitReason::Exited(ctx.a1()))),
            // Only the low byte of r1 carries the character.
            Syscall::Write => self.console.write(ctx.a1() as u8),
            Syscall::Nanotime => {
                let now = self.soc.nanotime();
                ctx.r[0] = now as u32;
                ctx.r[1] = (now >> 32) as u32;
            }
            Syscall::GetRandom => {
                let (addr, len) = (ctx.a1(), ctx.a2() as usize);
                if !ctx.region.contains_range(addr, len) {
                    return Err(MemoryError::InvalidOffset { addr, len }.into());
                }
                let mut chunk = [0; GETRANDOM_CHUNK];
                for offset in (0..len).step_by(GETRANDOM_CHUNK) {
                    let chunk = &mut chunk[..GETRANDOM_CHUNK.min(len - offset)];
                    self.rng.fill_bytes(chunk);
                    // The range check above bounds `offset` below the region size.
                    ctx.write_memory(&mut self.cpu, addr + offset as u32, chunk)?;
                }
            }
            Syscall::RpcRequest => self.rpc_request(applet)?,
            Syscall::RpcResponse => {
                applet.rpc.write_reply(&mut applet.ctx, &mut self.cpu)?;
            }
            Syscall::Rx => self.net.rx_syscall(ctx, &mut self.cpu)?,
            Syscall::Tx => {
                self.net.tx_syscall(ctx, &self.cpu)?;
                self.watchdog.service();
            }
            Syscall::Fiq => ctx.spsr.remove(Cpsr::F),
            Syscall::Freq => self.soc.set_frequency(ctx.a1())?,
        }

        Ok(None)
    }

    /// Services the interrupt which preempted the applet and wakes its handler.
    ///
    /// An FIQ taken in System mode raced with the applet masking FIQs on its way into the
    /// monitor, it is left pending.
    fn handle_fiq(&mut self, applet: &mut Applet) {
        if applet.ctx.exception_mode != Mode::User {
            applet.ctx.spsr |= Cpsr::F;
            return;
        }

        let Some(irq) = self.gic.acknowledge() else {
            trace!("SM spurious FIQ");
            return;
        };
        self.gic.end_of_interrupt(irq);

        match self.irq_source(irq) {
            Some(IrqSource::Control) => self.service_control(Some(&mut *applet)),
            Some(IrqSource::Watchdog) => self.watchdog.service(),
            Some(IrqSource::Network) => self.net.drain(),
            None => {
                warn!("SM received unexpected IRQ {irq}");
                return;
            }
        }

        applet.ctx.spsr |= Cpsr::F;
        applet.ctx.wake_handler();
    }
}
