//! Audio In/Out session managers for the Actions-Semi audio block.
//!
//! The crate arbitrates capture and playback sessions over the SoC's ADC,
//! DAC, I2S, SPDIF and ASRC hardware, programs the audio PLLs that clock them
//! and moves sample data with the platform's DMA engine.
//!
//! # Layout
//! - [`device`] - [`AudioDevice`], the root every entry point hangs off
//! - [`audio_in`] / [`audio_out`] - session managers
//! - [`asrc`] - ASRC channel and RAM bank management
//! - [`codec`] - block enable/disable sequences
//! - [`clock`] - PLL reference counting and rate math
//! - [`hal`] - traits the platform implements
//!
//! Everything runs without an allocator-backed runtime except logging, which
//! formats into the [`klog`] ring buffer.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod asrc;
pub mod audio_in;
pub mod audio_out;
pub mod clock;
pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod gain;
pub mod hal;
pub mod klog;
pub mod lock;
pub mod logger;
pub mod regs;
pub mod session;

#[cfg(test)]
mod testutil;

pub use device::AudioDevice;
pub use error::{AudioError, Result};
