//! `log` facade backend that lands records in the klog ring buffer.

use crate::klog::{LogLevel, KLOG};

static LOGGER: KlogLogger = KlogLogger;

struct KlogLogger;

impl log::Log for KlogLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            KLOG.log(
                LogLevel::from_log(record.level()),
                record.target(),
                &alloc::format!("{}", record.args()),
            );
        }
    }

    fn flush(&self) {}
}

/// Initialize the logger (call once at boot)
pub fn init_logger(level: log::LevelFilter) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
