//! PL011 console and the `log` backend built on it.
//!
//! One core, non-reentrant trap handling: no locking around the data
//! register. Off-target the writes compile out, so host-side tests can
//! link the logger without touching device addresses.

use core::fmt;

use log::{LevelFilter, Log, Metadata, Record};

#[cfg(target_arch = "arm")]
const UART0_DR: *mut u32 = 0x1C09_0000 as *mut u32;

pub struct Uart;

impl Uart {
    fn put_byte(&mut self, byte: u8) {
        #[cfg(target_arch = "arm")]
        unsafe {
            UART0_DR.write_volatile(byte as u32);
        }
        #[cfg(not(target_arch = "arm"))]
        let _ = byte;
    }
}

impl fmt::Write for Uart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.put_byte(b'\r');
            }
            self.put_byte(byte);
        }
        Ok(())
    }
}

struct UartLogger;

static LOGGER: UartLogger = UartLogger;

impl Log for UartLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        use fmt::Write;
        let _ = writeln!(Uart, "[{:5}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

/// Install the console logger. Call once from boot code, before the
/// first guest entry.
pub fn init(level: LevelFilter) -> core::result::Result<(), log::SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}
