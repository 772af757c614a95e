//! Audio device root.
//!
//! One [`AudioDevice`] owns the platform, the immutable board configuration,
//! the clock bookkeeping and the three locked pieces of session state:
//!
//! | Lock      | Id         | Protects                       |
//! |-----------|------------|--------------------------------|
//! | `ain`     | `AudioIn`  | input session pool             |
//! | `aout`    | `AudioOut` | output session pool, PA state  |
//! | `asrc`    | `Asrc`     | ASRC channel and RAM binding   |
//!
//! Locks are always taken in that order. DMA interrupts never touch session
//! state directly: [`AudioDevice::on_dma_irq`] only queues the event and
//! [`AudioDevice::dispatch_dma_events`] resolves it later from thread context.

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::asrc::{AsrcIndex, AsrcIrq, AsrcRam, AsrcState};
use crate::audio_in::AudioIn;
use crate::audio_out::AudioOut;
use crate::clock::ClockState;
use crate::config::{AudioConfig, DMA_EVENT_QUEUE_DEPTH};
use crate::hal::{DmaIrq, Platform};
use crate::klog::{klog_info, klog_warning};
use crate::lock::{LockId, Spinlock};
use crate::session::SessionHandle;

/// Token bit marking an output session
const DMA_TOKEN_OUTPUT: u32 = 1 << 31;

/// Callback token handed to the DMA engine for `handle`.
pub(crate) const fn dma_token(handle: SessionHandle, output: bool) -> u32 {
    if output {
        handle.token() | DMA_TOKEN_OUTPUT
    } else {
        handle.token()
    }
}

/// DMA completion waiting for dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DmaEvent {
    pub token: u32,
    pub reason: DmaIrq,
}

pub struct AudioDevice<P: Platform> {
    pub(crate) platform: P,
    pub(crate) config: AudioConfig,
    pub(crate) clocks: ClockState,
    pub(crate) asrc_irq: AsrcIrq,
    pub(crate) ain: Spinlock<AudioIn>,
    pub(crate) aout: Spinlock<AudioOut>,
    pub(crate) asrc: Spinlock<AsrcState>,
    events: Channel<CriticalSectionRawMutex, DmaEvent, DMA_EVENT_QUEUE_DEPTH>,
    /// Events the ISR could not queue since the last dispatch
    dropped: AtomicU32,
}

impl<P: Platform> AudioDevice<P> {
    pub fn new(platform: P, config: AudioConfig) -> Self {
        Self {
            platform,
            config,
            clocks: ClockState::new(),
            asrc_irq: AsrcIrq::new(),
            ain: Spinlock::new_with_id(AudioIn::new(), LockId::AudioIn),
            aout: Spinlock::new_with_id(AudioOut::new(), LockId::AudioOut),
            asrc: Spinlock::new_with_id(AsrcState::new(), LockId::Asrc),
            events: Channel::new(),
            dropped: AtomicU32::new(0),
        }
    }

    /// Bring the output side up; opens the PA when configured to.
    pub fn init(&self) {
        if self.config.poweron_open_pa {
            // already-open is the only failure and is harmless here
            let _ = self.aout_open_pa(true);
        }
        klog_info("aout", "audio device ready");
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub fn clocks(&self) -> &ClockState {
        &self.clocks
    }

    /// Layout currently bound to an ASRC channel.
    pub fn asrc_bound(&self, index: AsrcIndex) -> Option<AsrcRam> {
        self.asrc.lock().bound(index)
    }

    // =========================================================================
    // Interrupt Entry Points
    // =========================================================================

    /// DMA completion from interrupt context.
    ///
    /// Queues the event and nothing else: no allocation and no spinlock, so
    /// an overflow is only counted here and reported by the next dispatch.
    pub fn on_dma_irq(&self, token: u32, reason: DmaIrq) {
        if self.events.try_send(DmaEvent { token, reason }).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// ASRC threshold interrupt.
    pub fn asrc_isr(&self) {
        self.asrc_irq.handle(&self.platform);
    }

    /// Resolve queued DMA events and run their callbacks with no lock held.
    ///
    /// Returns the number of callbacks invoked. Events for sessions closed
    /// in the meantime are dropped.
    pub fn dispatch_dma_events(&self) -> usize {
        let dropped = self.dropped.swap(0, Ordering::Relaxed);
        if dropped != 0 {
            klog_warning("session", &alloc::format!("dma event queue full, {} events dropped", dropped));
        }

        let mut invoked = 0;
        while let Ok(event) = self.events.try_receive() {
            let handle = SessionHandle::from_token(event.token & !DMA_TOKEN_OUTPUT);
            let pending = if event.token & DMA_TOKEN_OUTPUT != 0 {
                self.aout_dma_event(handle, event.reason)
            } else {
                self.ain_dma_event(handle, event.reason)
                    .map(|(callback, data)| (callback, data, event.reason))
            };

            if let Some((callback, data, reason)) = pending {
                callback(data, reason);
                invoked += 1;
            }
        }
        invoked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_in::{AinChannel, AinParam};
    use crate::audio_out::{AoutChannel, AoutFifo, AoutParam, DacSetting};
    use crate::session::ReloadBuffer;
    use crate::testutil::MockPlatform;
    use core::sync::atomic::AtomicUsize;

    static OUT_DATA: AtomicUsize = AtomicUsize::new(0);
    static IN_DATA: AtomicUsize = AtomicUsize::new(0);

    fn on_out(data: usize, reason: DmaIrq) {
        assert_eq!(reason, DmaIrq::TransferComplete);
        OUT_DATA.store(data, Ordering::SeqCst);
    }

    fn on_in(data: usize, _reason: DmaIrq) {
        IN_DATA.store(data, Ordering::SeqCst);
    }

    fn noop(_data: usize, _reason: DmaIrq) {}

    fn device() -> AudioDevice<MockPlatform> {
        AudioDevice::new(MockPlatform::new(), AudioConfig::DEFAULT)
    }

    #[test]
    fn test_token_marks_direction() {
        let handle = SessionHandle::from_token(0x0102);
        assert_eq!(dma_token(handle, false), 0x0102);
        assert_eq!(dma_token(handle, true), 0x8000_0102);
    }

    #[test]
    fn test_dispatch_routes_by_direction() {
        let dev = device();
        let out = dev
            .aout_open(&AoutParam {
                channel: AoutChannel::DAC,
                sample_rate: 48,
                channel_width: 16,
                fifo: AoutFifo::Dac0,
                callback: Some(on_out),
                cb_data: 11,
                reload: None,
                dac: Some(DacSetting { mono: false, volume: 0 }),
            })
            .unwrap();
        let inp = dev
            .ain_open(&AinParam {
                channel: AinChannel::SPDIFRX,
                sample_rate: 48,
                channel_width: 24,
                callback: Some(on_in),
                cb_data: 22,
                reload: ReloadBuffer { addr: 0x2000_0000, len: 256 },
                adc: None,
            })
            .unwrap();

        dev.aout_write(out, 0x2000_1000, 128).unwrap();
        dev.on_dma_irq(dma_token(out, true), DmaIrq::TransferComplete);
        dev.on_dma_irq(dma_token(inp, false), DmaIrq::HalfComplete);
        assert_eq!(dev.dispatch_dma_events(), 2);
        assert_eq!(OUT_DATA.load(Ordering::SeqCst), 11);
        assert_eq!(IN_DATA.load(Ordering::SeqCst), 22);
        assert_eq!(dev.dispatch_dma_events(), 0);
    }

    #[test]
    fn test_events_for_closed_sessions_are_dropped() {
        let dev = device();
        let inp = dev
            .ain_open(&AinParam {
                channel: AinChannel::SPDIFRX,
                sample_rate: 48,
                channel_width: 16,
                callback: Some(noop),
                cb_data: 0,
                reload: ReloadBuffer { addr: 0x2000_0000, len: 256 },
                adc: None,
            })
            .unwrap();
        dev.on_dma_irq(dma_token(inp, false), DmaIrq::TransferComplete);
        dev.ain_close(inp).unwrap();
        assert_eq!(dev.dispatch_dma_events(), 0);
    }

    #[test]
    fn test_full_queue_drops_events() {
        let dev = device();
        for _ in 0..DMA_EVENT_QUEUE_DEPTH + 4 {
            dev.on_dma_irq(0x7f, DmaIrq::HalfComplete);
        }
        assert_eq!(dev.dropped.load(Ordering::Relaxed), 4);
        assert_eq!(dev.dispatch_dma_events(), 0);
        assert_eq!(dev.dropped.load(Ordering::Relaxed), 0);
        assert!(crate::klog::KLOG
            .recent_tagged("session", crate::klog::KLOG.len())
            .iter()
            .any(|r| r.message == "dma event queue full, 4 events dropped"));
    }
}
