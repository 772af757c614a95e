//! Driver log ring.
//!
//! Every module logs through the `klog_*` helpers with a short tag naming
//! the block it speaks for: `ain`, `aout`, `asrc`, `apll`, `codec` or
//! `session`. Records from other crates arrive through [`crate::logger`].
//! The platform empties the ring with [`LogBuffer::drain`] when it has
//! somewhere to put the text, and may mirror records to a console as they
//! are written.

use alloc::collections::VecDeque;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::lock::{LockId, Spinlock};

/// Records kept before the oldest is overwritten
const RING_DEPTH: usize = 128;

/// Message bytes kept per record, marker included
const MESSAGE_MAX: usize = 160;

const TRUNCATED: &str = "~";

/// Severity, most urgent first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warning = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn from_log(level: log::Level) -> Self {
        match level {
            log::Level::Error => LogLevel::Error,
            log::Level::Warn => LogLevel::Warning,
            log::Level::Info => LogLevel::Info,
            log::Level::Debug => LogLevel::Debug,
            log::Level::Trace => LogLevel::Trace,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warning,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    fn letter(self) -> char {
        match self {
            LogLevel::Off => '-',
            LogLevel::Error => 'E',
            LogLevel::Warning => 'W',
            LogLevel::Info => 'I',
            LogLevel::Debug => 'D',
            LogLevel::Trace => 'T',
        }
    }
}

#[derive(Clone, Debug)]
pub struct LogRecord {
    pub seq: usize,
    pub level: LogLevel,
    pub tag: String,
    pub message: String,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06} {} [{}] {}", self.seq, self.level.letter(), self.tag, self.message)
    }
}

/// Cut `message` to `MESSAGE_MAX` bytes on a char boundary.
fn clip(message: &str) -> String {
    if message.len() <= MESSAGE_MAX {
        return String::from(message);
    }
    let mut end = MESSAGE_MAX - TRUNCATED.len();
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    let mut clipped = String::with_capacity(MESSAGE_MAX);
    clipped.push_str(&message[..end]);
    clipped.push_str(TRUNCATED);
    clipped
}

pub struct LogBuffer {
    ring: Spinlock<VecDeque<LogRecord>>,
    console: Spinlock<Option<fn(&str)>>,
    next_seq: AtomicUsize,
    max_level: AtomicU8,
}

impl LogBuffer {
    pub const fn new() -> Self {
        Self {
            ring: Spinlock::new_with_id(VecDeque::new(), LockId::Klog),
            console: Spinlock::new_with_id(None, LockId::Klog),
            next_seq: AtomicUsize::new(0),
            max_level: AtomicU8::new(LogLevel::Info as u8),
        }
    }

    pub fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.max_level.load(Ordering::Relaxed))
    }

    /// Record `message` if `level` passes the filter.
    pub fn log(&self, level: LogLevel, tag: &str, message: &str) {
        if level == LogLevel::Off || level > self.level() {
            return;
        }

        let record = LogRecord {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            level,
            tag: String::from(tag),
            message: clip(message),
        };

        if let Some(write_line) = *self.console.lock() {
            if level <= LogLevel::Warning {
                write_line(&format!("{}", record));
            }
        }

        let mut ring = self.ring.lock();
        if ring.len() == RING_DEPTH {
            ring.pop_front();
        }
        ring.push_back(record);
    }

    /// Take every buffered record, oldest first.
    pub fn drain(&self) -> Vec<LogRecord> {
        self.ring.lock().drain(..).collect()
    }

    /// Newest `count` records with `tag`, newest first.
    pub fn recent_tagged(&self, tag: &str, count: usize) -> Vec<LogRecord> {
        self.ring
            .lock()
            .iter()
            .rev()
            .filter(|r| r.tag == tag)
            .take(count)
            .cloned()
            .collect()
    }

    pub fn set_level(&self, level: LogLevel) {
        self.max_level.store(level as u8, Ordering::Relaxed);
    }

    /// Mirror warnings and errors to `writer` as they are logged.
    pub fn set_console(&self, writer: Option<fn(&str)>) {
        *self.console.lock() = writer;
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records accepted since boot, including ones already overwritten.
    pub fn accepted(&self) -> usize {
        self.next_seq.load(Ordering::Relaxed)
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

pub static KLOG: LogBuffer = LogBuffer::new();

pub fn klog_error(tag: &str, message: &str) {
    KLOG.log(LogLevel::Error, tag, message);
}

pub fn klog_warning(tag: &str, message: &str) {
    KLOG.log(LogLevel::Warning, tag, message);
}

pub fn klog_info(tag: &str, message: &str) {
    KLOG.log(LogLevel::Info, tag, message);
}

pub fn klog_debug(tag: &str, message: &str) {
    KLOG.log(LogLevel::Debug, tag, message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;

    static CONSOLE_LINES: AtomicUsize = AtomicUsize::new(0);

    fn count_line(line: &str) {
        assert!(line.contains("[apll]"));
        CONSOLE_LINES.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_debug_hidden_until_enabled() {
        let ring = LogBuffer::new();
        ring.log(LogLevel::Debug, "asrc", "bank map 0x3");
        assert!(ring.is_empty());

        ring.set_level(LogLevel::Debug);
        ring.log(LogLevel::Debug, "asrc", "bank map 0x3");
        assert_eq!(ring.recent_tagged("asrc", 4).len(), 1);
        assert!(ring.recent_tagged("aout", 4).is_empty());
    }

    #[test]
    fn test_off_records_nothing() {
        let ring = LogBuffer::new();
        ring.set_level(LogLevel::Off);
        ring.log(LogLevel::Error, "aout", "pa fault");
        assert_eq!(ring.accepted(), 0);
    }

    #[test]
    fn test_overwrites_oldest() {
        let ring = LogBuffer::new();
        for i in 0..RING_DEPTH + 3 {
            ring.log(LogLevel::Info, "ain", &format!("frame {}", i));
        }
        let records = ring.drain();
        assert_eq!(records.len(), RING_DEPTH);
        assert_eq!(records[0].message, "frame 3");
        assert_eq!(records[0].seq, 3);
        assert_eq!(ring.accepted(), RING_DEPTH + 3);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_long_message_clipped() {
        let ring = LogBuffer::new();
        ring.log(LogLevel::Warning, "codec", &"é".repeat(MESSAGE_MAX));
        let record = &ring.drain()[0];
        assert!(record.message.len() <= MESSAGE_MAX);
        assert!(record.message.ends_with(TRUNCATED));
        assert!(format!("{}", record).starts_with("000000 W [codec]"));
    }

    #[test]
    fn test_console_gets_warnings_only() {
        let ring = LogBuffer::new();
        ring.set_console(Some(count_line));
        ring.log(LogLevel::Info, "apll", "series 0 locked");
        ring.log(LogLevel::Error, "apll", "no free pll");
        assert_eq!(CONSOLE_LINES.load(Ordering::SeqCst), 1);
        assert_eq!(ring.len(), 2);
    }
}
