// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Fixed-size text ring keeping the newest output.

use core::fmt::{self, Write};

/// An in-memory log ring of `N` bytes.
///
/// Backs both the monitor log history and the applet console ring which is persisted as the crash
/// log. Once full, every new byte overwrites the oldest one.
pub struct MemoryLogger<const N: usize> {
    buffer: [u8; N],
    /// Index of the oldest byte.
    head: usize,
    /// Number of bytes held, at most `N`.
    len: usize,
}

impl<const N: usize> MemoryLogger<N> {
    /// Creates an empty ring.
    pub const fn new() -> Self {
        Self {
            buffer: [0; N],
            head: 0,
            len: 0,
        }
    }

    /// Discards everything logged so far.
    pub fn reset(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// Returns whether nothing is held.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn push(&mut self, bytes: &[u8]) {
        if N == 0 {
            return;
        }
        // Only the last N bytes can survive.
        for &byte in &bytes[bytes.len().saturating_sub(N)..] {
            self.buffer[(self.head + self.len) % N] = byte;
            if self.len == N {
                self.head = (self.head + 1) % N;
            } else {
                self.len += 1;
            }
        }
    }

    /// Returns the held text, oldest first.
    ///
    /// A character partly overwritten at the start, or still incomplete at the end, is left out.
    pub fn as_str(&mut self) -> &str {
        self.buffer.rotate_left(self.head);
        self.head = 0;

        let held = &self.buffer[..self.len];
        let overwritten = held
            .iter()
            .take(3)
            .take_while(|&&byte| byte & 0xc0 == 0x80)
            .count();
        let held = &held[overwritten..];

        match str::from_utf8(held) {
            Ok(text) => text,
            Err(e) => str::from_utf8(&held[..e.valid_up_to()]).unwrap_or_default(),
        }
    }
}

impl<const N: usize> Default for MemoryLogger<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Write for MemoryLogger<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push(s.as_bytes());
        Ok(())
    }
}
