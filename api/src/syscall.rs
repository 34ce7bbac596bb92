// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! System call numbers.
//!
//! The applet places the syscall number in `r0` and its arguments in `r1` and `r2` before issuing
//! `svc`. The monitor returns results in `r0` (and `r1` for 64-bit values).

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// A system call understood by the secure monitor.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum Syscall {
    /// Terminates the applet, `r1` holds the exit code.
    Exit = 0,
    /// Writes the byte in `r1` to the applet console.
    Write = 1,
    /// Returns the system time in nanoseconds in `r0` (low) and `r1` (high).
    Nanotime = 2,
    /// Fills the buffer at `r1` with `r2` random bytes.
    GetRandom = 3,
    /// Submits the encoded RPC call at `r1` with length `r2`.
    RpcRequest = 4,
    /// Copies the pending RPC reply into the buffer at `r1` with capacity `r2`.
    RpcResponse = 5,
    /// Receives an Ethernet frame into the buffer at `r1` with capacity `r2`.
    Rx = 0x1000_0000,
    /// Transmits the Ethernet frame at `r1` with length `r2`.
    Tx = 0x1000_0001,
    /// Unmasks FIQs for the applet once its interrupt handler has completed.
    Fiq = 0x1000_0002,
    /// Changes the ARM core frequency to `r1` MHz.
    Freq = 0x1000_0003,
}

/// See [`Syscall::Exit`].
pub const SYS_EXIT: u32 = Syscall::Exit as u32;
/// See [`Syscall::Write`].
pub const SYS_WRITE: u32 = Syscall::Write as u32;
/// See [`Syscall::Nanotime`].
pub const SYS_NANOTIME: u32 = Syscall::Nanotime as u32;
/// See [`Syscall::GetRandom`].
pub const SYS_GETRANDOM: u32 = Syscall::GetRandom as u32;
/// See [`Syscall::RpcRequest`].
pub const SYS_RPC_REQ: u32 = Syscall::RpcRequest as u32;
/// See [`Syscall::RpcResponse`].
pub const SYS_RPC_RES: u32 = Syscall::RpcResponse as u32;
/// See [`Syscall::Rx`].
pub const RX: u32 = Syscall::Rx as u32;
/// See [`Syscall::Tx`].
pub const TX: u32 = Syscall::Tx as u32;
/// See [`Syscall::Fiq`].
pub const FIQ: u32 = Syscall::Fiq as u32;
/// See [`Syscall::Freq`].
pub const FREQ: u32 = Syscall::Freq as u32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trusted_os_syscalls() {
        assert_eq!(RX, 0x1000_0000);
        assert_eq!(TX, 0x1000_0001);
        assert_eq!(FIQ, 0x1000_0002);
        assert_eq!(FREQ, 0x1000_0003);
        assert_eq!(Syscall::try_from(0x1000_0002), Ok(Syscall::Fiq));
        assert!(Syscall::try_from(0x1000_0004).is_err());
    }
}
