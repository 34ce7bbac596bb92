// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Monitor logging through the `log` facade.

pub mod inmemory;

use crate::debug::DEBUG;
use alloc::string::{String, ToString};
use core::{
    fmt::{Arguments, Write},
    sync::atomic::{AtomicBool, Ordering},
};
#[cfg(all(target_os = "none", not(test)))]
use core::panic::PanicInfo;
use inmemory::MemoryLogger;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::{
    Once,
    mutex::{SpinMutex, SpinMutexGuard},
};

/// Size of the monitor log history kept for retrieval over the control interface.
pub const LOG_HISTORY_SIZE: usize = 16 * 1024;

/// A log sink shared by the whole monitor.
pub type SharedSink = &'static (dyn LogSink + Send + Sync);

static HISTORY: LockedWriter<MemoryLogger<LOG_HISTORY_SIZE>> =
    LockedWriter::new(MemoryLogger::new());

static LOGGER: Once<Logger> = Once::new();

struct Logger {
    sink: HybridLogger<&'static LockedWriter<MemoryLogger<LOG_HISTORY_SIZE>>, SharedSink>,
}

impl Log for Logger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        writeln!(self.sink, "{}: {}", record.level(), record.args());
    }

    fn flush(&self) {
        self.sink.flush();
    }
}

/// Initialises logger.
///
/// Logs are always kept in the in-memory history; they are only forwarded to `console` in debug
/// builds, as release builds must not leak anything over the serial port.
pub fn init(console: SharedSink) -> Result<(), SetLoggerError> {
    let logger = LOGGER.call_once(|| Logger {
        sink: HybridLogger::new(&HISTORY, console),
    });
    logger.sink.enable_secondary(DEBUG);
    log::set_logger(logger)?;
    log::set_max_level(build_time_log_level());
    Ok(())
}

/// Enables or disables forwarding of logs to the console sink.
pub fn enable_console(enable: bool) {
    if let Some(logger) = LOGGER.get() {
        logger.sink.enable_secondary(enable);
    }
}

/// Writes applet console output, bypassing the level filter and the `level: ` prefix.
pub fn write_raw(text: &str) {
    if let Some(logger) = LOGGER.get() {
        write!(logger.sink, "{text}");
    }
}

/// Returns a copy of the monitor log history.
pub fn history() -> String {
    HISTORY.lock().as_str().to_string()
}

#[cfg(all(target_os = "none", not(test)))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    if let Some(logger) = LOGGER.get() {
        writeln!(logger.sink, "{}", info);
        logger.sink.flush();
    }
    // The watchdog resets the board.
    loop {}
}

/// Maximum log level, taken from `LOG_LEVEL` at build time.
///
/// Accepts the lower-case [`LevelFilter`] names. Anything else falls back to `Debug` in debug
/// builds and `Info` otherwise.
pub const fn build_time_log_level() -> LevelFilter {
    let Some(level) = option_env!("LOG_LEVEL") else {
        return default_log_level();
    };
    match level.as_bytes() {
        b"off" => LevelFilter::Off,
        b"error" => LevelFilter::Error,
        b"warn" => LevelFilter::Warn,
        b"info" => LevelFilter::Info,
        b"debug" => LevelFilter::Debug,
        b"trace" => LevelFilter::Trace,
        _ => default_log_level(),
    }
}

const fn default_log_level() -> LevelFilter {
    if DEBUG {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Destination for monitor log output.
///
/// `write_fmt` takes `&self`, so implementations do their own locking.
pub trait LogSink {
    /// Writes formatted output to the sink.
    fn write_fmt(&self, args: Arguments);

    /// Pushes any buffered output to the underlying device.
    fn flush(&self) {}
}

impl<T: LogSink + ?Sized> LogSink for &T {
    fn write_fmt(&self, args: Arguments) {
        (**self).write_fmt(args)
    }

    fn flush(&self) {
        (**self).flush()
    }
}

/// A [`LogSink`] over any [`Write`] behind a spin mutex.
///
/// Each record is written under the lock, so a FIQ handler cannot interleave with a line in
/// progress.
pub struct LockedWriter<W: Write> {
    writer: SpinMutex<W>,
}

impl<W: Write> LockedWriter<W> {
    /// Wraps `writer`.
    pub const fn new(writer: W) -> Self {
        Self {
            writer: SpinMutex::new(writer),
        }
    }

    /// Locks the wrapped writer.
    pub fn lock(&self) -> SpinMutexGuard<'_, W> {
        self.writer.lock()
    }
}

impl<W: Write> LogSink for LockedWriter<W> {
    fn write_fmt(&self, args: Arguments) {
        // Sinks are best effort.
        let _ = self.writer.lock().write_fmt(args);
    }
}

/// Fans log output out to the in-memory history and, while enabled, the serial console.
pub struct HybridLogger<P: LogSink, S: LogSink> {
    primary: P,
    secondary: S,
    secondary_enabled: AtomicBool,
}

impl<P: LogSink, S: LogSink> HybridLogger<P, S> {
    /// Creates a fan-out with the secondary sink enabled.
    pub const fn new(primary: P, secondary: S) -> Self {
        Self {
            primary,
            secondary,
            secondary_enabled: AtomicBool::new(true),
        }
    }

    /// Turns forwarding to the secondary sink on or off.
    pub fn enable_secondary(&self, enable: bool) {
        self.secondary_enabled.store(enable, Ordering::Release);
    }
}

impl<P: LogSink, S: LogSink> LogSink for HybridLogger<P, S> {
    fn write_fmt(&self, args: Arguments) {
        self.primary.write_fmt(args);
        if self.secondary_enabled.load(Ordering::Acquire) {
            self.secondary.write_fmt(args);
        }
    }

    fn flush(&self) {
        self.primary.flush();
        if self.secondary_enabled.load(Ordering::Acquire) {
            self.secondary.flush();
        }
    }
}
