//! Error codes returned by the audio driver.
//!
//! Each variant maps onto the negative errno value the application layer
//! expects from the C-style entry points.

use core::fmt;

const EPERM: i32 = 1;
const ENOENT: i32 = 2;
const EIO: i32 = 5;
const ENXIO: i32 = 6;
const EACCES: i32 = 13;
const EFAULT: i32 = 14;
const EINVAL: i32 = 22;
const ETIMEDOUT: i32 = 116;
const ENOTSUP: i32 = 134;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioError {
    /// Malformed parameter, unsupported width/FIFO/clock/policy, index out of range
    InvalidArgument,
    /// No free session slot, no DMA channel, or command has no handler
    NoDevice,
    /// DMA engine missing or already running when (re)configured
    Io,
    /// Command code unknown to the dispatched subsystem
    NotSupported,
    /// Session handle does not carry a live magic tag
    Fault,
    /// DSP routing requested while ASRC owns the FIFO
    PermissionDenied,
    /// FIFO drain did not finish within the budget
    TimedOut,
    /// Requested gain beyond the translation table
    NotFound,
    /// DMA could not be prepared on start
    AccessDenied,
    /// Resource already claimed (PLL series, ASRC channel, RAM bank, PA state)
    Busy,
}

impl AudioError {
    /// Negative errno value (`Busy` is the generic `-1`).
    pub fn errno(&self) -> i32 {
        match self {
            AudioError::InvalidArgument => -EINVAL,
            AudioError::NoDevice => -ENXIO,
            AudioError::Io => -EIO,
            AudioError::NotSupported => -ENOTSUP,
            AudioError::Fault => -EFAULT,
            AudioError::PermissionDenied => -EPERM,
            AudioError::TimedOut => -ETIMEDOUT,
            AudioError::NotFound => -ENOENT,
            AudioError::AccessDenied => -EACCES,
            AudioError::Busy => -1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioError::InvalidArgument => "invalid argument",
            AudioError::NoDevice => "no such device",
            AudioError::Io => "i/o error",
            AudioError::NotSupported => "operation not supported",
            AudioError::Fault => "bad session handle",
            AudioError::PermissionDenied => "operation not permitted",
            AudioError::TimedOut => "timed out",
            AudioError::NotFound => "no such entry",
            AudioError::AccessDenied => "access denied",
            AudioError::Busy => "already in use",
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.errno())
    }
}

pub type Result<T> = core::result::Result<T, AudioError>;

/// Collapse a driver result into the C-style status code.
pub fn to_errno(result: Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.errno(),
    }
}
