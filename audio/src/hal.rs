//! Collaborator interfaces consumed by the audio driver.
//!
//! The driver never touches the RTOS directly. Everything it needs from the
//! outside world comes through these traits:
//! - [`RegisterBus`] - 32-bit peripheral register access
//! - [`DmaEngine`] - channel request/config/reload/start/stop/free
//! - [`IrqController`] - interrupt line registration and masking
//! - [`Board`] - timing, DVFS and board wiring hooks
//!
//! [`Platform`] bundles all four; [`MmioBus`] is the volatile MMIO
//! implementation of [`RegisterBus`] used on real hardware.

use core::ptr::{read_volatile, write_volatile};

use crate::error::Result;

// =============================================================================
// Register Access
// =============================================================================

pub trait RegisterBus {
    fn read32(&self, addr: usize) -> u32;
    fn write32(&self, addr: usize, value: u32);

    /// Read-modify-write: clear `mask`, then set `bits`.
    #[inline]
    fn modify32(&self, addr: usize, mask: u32, bits: u32) {
        let value = self.read32(addr);
        self.write32(addr, (value & !mask) | bits);
    }

    #[inline]
    fn set_bits(&self, addr: usize, bits: u32) {
        self.modify32(addr, 0, bits);
    }

    #[inline]
    fn clear_bits(&self, addr: usize, bits: u32) {
        self.modify32(addr, bits, 0);
    }
}

/// Memory-mapped register access with volatile semantics.
///
/// Addresses handed to this bus must be valid device registers.
#[derive(Clone, Copy, Default)]
pub struct MmioBus;

impl RegisterBus for MmioBus {
    #[inline]
    fn read32(&self, addr: usize) -> u32 {
        unsafe { read_volatile(addr as *const u32) }
    }

    #[inline]
    fn write32(&self, addr: usize, value: u32) {
        unsafe { write_volatile(addr as *mut u32, value) }
    }
}

// =============================================================================
// DMA
// =============================================================================

/// Logical DMA channel returned by [`DmaEngine::dma_request`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DmaChannel(pub u32);

/// Physical channel handle returned by a deferred (prepare) start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhyDma(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DmaDirection {
    MemoryToPeripheral,
    PeripheralToMemory,
}

/// Hardware request line the channel is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DmaSlot {
    AdcFifo,
    DacFifo0,
    DacFifo1,
    /// Shared by I2S-TX0 and I2S-RX1
    I2s,
    AsrcFifo0,
    AsrcFifo1,
}

/// Reason reported by a DMA completion interrupt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DmaIrq {
    HalfComplete,
    TransferComplete,
}

/// Channel descriptor passed to [`DmaEngine::dma_config`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DmaConfig {
    pub direction: DmaDirection,
    pub slot: DmaSlot,
    /// Bytes per beat (2 or 4)
    pub width: u8,
    pub burst_len: u8,
    pub interleaved: bool,
    pub reload: bool,
    /// Single-address mode (same source every beat)
    pub sam: bool,
    pub half_complete_irq: bool,
    pub complete_irq: bool,
    /// Opaque value the platform hands back to `AudioDevice::on_dma_irq`
    pub callback_token: Option<u32>,
    pub src: usize,
    pub dst: usize,
    pub len: u32,
}

pub trait DmaEngine {
    /// Whether a DMA controller is present at all
    fn dma_present(&self) -> bool {
        true
    }
    fn dma_request(&self) -> Option<DmaChannel>;
    fn dma_config(&self, chan: DmaChannel, config: &DmaConfig) -> Result<()>;
    fn dma_reload(&self, chan: DmaChannel, src: usize, dst: usize, len: u32) -> Result<()>;
    fn dma_start(&self, chan: DmaChannel) -> Result<()>;
    /// Arm the channel without triggering it; used for synchronised starts.
    fn dma_prepare_start(&self, chan: DmaChannel) -> Result<PhyDma>;
    fn dma_stop(&self, chan: DmaChannel) -> Result<()>;
    fn dma_free(&self, chan: DmaChannel);

    fn phy_dma_stop(&self, phy: PhyDma);
    fn phy_dma_start(&self, phy: PhyDma);
    fn phy_dma_disable_sam(&self, phy: PhyDma);
    fn phy_dma_reload(&self, phy: PhyDma, src: usize, dst: usize, len: u32);
}

// =============================================================================
// Interrupts
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrqLine {
    Asrc,
    AudioDac,
    I2sTx0,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrqPriority {
    High,
    Normal,
}

pub trait IrqController {
    /// Route `line` to the driver's handler for it (e.g. `AudioDevice::asrc_isr`).
    fn irq_connect(&self, line: IrqLine, priority: IrqPriority);
    fn irq_enable(&self, line: IrqLine);
    fn irq_disable(&self, line: IrqLine);
    fn irq_is_enabled(&self, line: IrqLine) -> bool;
}

// =============================================================================
// Board / Timing
// =============================================================================

/// Physical source behind a logical input device id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputSource {
    Aux0,
    Aux1,
    Aux2,
    AuxFd,
    Asemic,
    Afdmic,
    AfdmicAuxFd,
    AsemicAuxFd,
    AfdmicAux2,
    AsemicAux2,
    Dmic,
    I2s0,
    I2s1,
    Spdif,
}

/// Result of mapping a logical input device through the board table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceMapping {
    pub source: InputSource,
    pub track: u8,
}

pub trait Board {
    /// Spin for `us` microseconds without yielding.
    fn busy_wait_us(&self, us: u32);
    /// Free-running hardware cycle counter.
    fn cycle_count(&self) -> u32;
    fn cycles_per_us(&self) -> u32;
    /// Ask DVFS for at least `mhz` on the ASRC clock domain.
    fn set_asrc_rate(&self, mhz: u32);
    fn audio_device_mapping(&self, device: u16) -> Result<DeviceMapping>;
    /// External power amplifier enable line.
    fn extern_pa_ctl(&self, _on: bool) {}
    fn extern_pa_class_select(&self, _class: u8) -> Result<()> {
        Err(crate::error::AudioError::Busy)
    }
}

/// Everything the driver needs from the platform.
pub trait Platform: RegisterBus + DmaEngine + IrqController + Board {}

impl<T: RegisterBus + DmaEngine + IrqController + Board> Platform for T {}
