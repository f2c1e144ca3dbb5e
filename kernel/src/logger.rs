//! Simple logger implementation for the kernel core.
//!
//! Backs the `log` facade by formatting records into a fixed buffer and
//! writing them through the console contract of the installed kernel.
//! Records emitted before the kernel is installed are dropped.

use log::{Level, LevelFilter, Metadata, Record};
use spin::Mutex;

/// Serializes whole lines on the console.
struct KernelLogger {
    write_lock: Mutex<()>,
}

impl log::Log for KernelLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let kernel = match crate::kernel::try_kernel() {
            Some(kernel) => kernel,
            None => return,
        };

        let level_str = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN ",
            Level::Info => "INFO ",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };

        use core::fmt::Write;
        let mut buf = [0u8; 512];
        let pos = {
            let mut writer = BufferWriter {
                buffer: &mut buf,
                pos: 0,
            };
            let _ = core::write!(&mut writer, "[{}] {}\n", level_str, record.args());
            writer.pos
        };

        let _guard = self.write_lock.lock();
        kernel.console().putbuf(&buf[..pos]);
    }

    fn flush(&self) {}
}

/// Formats into a fixed buffer, truncating silently. No allocation: the
/// logger must work in any context.
pub struct BufferWriter<'a> {
    pub buffer: &'a mut [u8],
    pub pos: usize,
}

impl core::fmt::Write for BufferWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.buffer.len() - self.pos;
        let to_write = bytes.len().min(remaining);

        if to_write > 0 {
            self.buffer[self.pos..self.pos + to_write].copy_from_slice(&bytes[..to_write]);
            self.pos += to_write;
        }

        Ok(())
    }
}

static LOGGER: KernelLogger = KernelLogger {
    write_lock: Mutex::new(()),
};

/// Installs the logger at the default level. Safe to call more than once;
/// only the first installation counts.
pub fn init() {
    init_with_level(LevelFilter::Info);
}

/// Installs the logger with a specific maximum level.
pub fn init_with_level(level: LevelFilter) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}
