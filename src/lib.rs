// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! A secure monitor for ARMv7 TrustZone boards, supervising a single User mode applet.
//!
//! The monitor loads a verified applet from internal storage, runs it under a watchdog and serves
//! its system calls and RPC requests: storage, RPMB, rollback protection, key derivation and
//! firmware updates.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod bundle;
pub mod config;
pub mod console;
pub mod context;
pub mod control;
pub mod debug;
pub mod exceptions;
pub mod firmware;
pub mod hab;
pub mod loader;
pub mod logger;
pub mod monitor;
pub mod net;
pub mod ota;
pub mod platform;
pub mod rollback;
pub mod rpc;
pub mod rpmb;
pub mod slots;
pub mod status;
pub mod storage;
pub mod task;

pub use monitor::{Monitor, trusted_os_main};
pub use trusted_os_api as api;
