// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Debug build switches and applet crash reporting.

use crate::{
    context::{AppletMemory, ExecContext},
    loader::LoadedImage,
};
use log::error;

/// True if the build is configured with debug assertions on.
pub const DEBUG: bool = cfg!(debug_assertions);

/// Whether fatal applet exceptions are followed by a best-effort stack trace.
pub const CRASH_REPORTING: bool = DEBUG;

/// Number of bytes above the faulting stack pointer scanned for return addresses.
const STACK_SCAN_LENGTH: u32 = 1024;

/// Logs the faulting instruction and every word found on the applet stack which points into its
/// text, resolved against the applet symbol table where possible.
pub fn log_stack_trace<M: AppletMemory + ?Sized>(
    ctx: &ExecContext,
    memory: &M,
    image: &LoadedImage,
) {
    error!("SM applet fault pc:{:#010x} lr:{:#010x}", ctx.pc, ctx.lr);
    log_symbol(image, "pc", ctx.pc);
    log_symbol(image, "lr", ctx.lr);

    let end = ctx.sp.saturating_add(STACK_SCAN_LENGTH);
    for addr in (ctx.sp..end).step_by(4) {
        let Ok(word) = ctx.read_memory(memory, addr, 4) else {
            break;
        };
        let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        if image.text.contains(value) {
            log_symbol(image, "stack", value);
        }
    }
}

fn log_symbol(image: &LoadedImage, label: &str, addr: u32) {
    match image.symbol_at(addr) {
        Some((name, offset)) => error!("\t{label} {addr:#010x} {name}+{offset:#x}"),
        None => error!("\t{label} {addr:#010x}"),
    }
}
