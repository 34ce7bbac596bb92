// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Buffered applet console.

use crate::logger::{self, inmemory::MemoryLogger};
use alloc::{string::String, vec::Vec};
use core::fmt::Write;

/// Buffered bytes beyond which the console is flushed without waiting for a newline.
pub const OUTPUT_LIMIT: usize = 1024;

/// Size of the ring keeping the latest applet output for the crash log.
pub const CRASH_LOG_SIZE: usize = 16 * 1024;

/// Console output of the applet, written one byte per `SYS_WRITE`.
///
/// Output is kept until a full line is available so that applet and monitor logs do not
/// interleave mid-line.
pub struct Console {
    buf: Vec<u8>,
    crash_log: MemoryLogger<CRASH_LOG_SIZE>,
}

impl Console {
    /// Creates an empty console.
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            crash_log: MemoryLogger::new(),
        }
    }

    /// Buffers one byte, flushing on newline or once more than [`OUTPUT_LIMIT`] bytes are
    /// buffered.
    pub fn write(&mut self, c: u8) {
        self.buf.push(c);
        if c == b'\n' || self.buf.len() > OUTPUT_LIMIT {
            self.flush();
        }
    }

    /// Writes out whatever is buffered.
    pub fn flush(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(&self.buf);
        logger::write_raw(&text);
        // The ring never fails, it overwrites the oldest output.
        let _ = self.crash_log.write_str(&text);
        self.buf.clear();
    }

    /// Flushes and returns the output recorded since the last call, clearing it.
    pub fn take_crash_log(&mut self) -> String {
        self.flush();
        let log = String::from(self.crash_log.as_str());
        self.crash_log.reset();
        log
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}
