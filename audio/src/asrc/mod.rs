//! ASRC physical layer.
//!
//! Four hardware channels (in0, in1, out0, out1) share nine RAM banks. A
//! channel may only run on one of a fixed set of bank layouts ([`AsrcRam`]);
//! binding a layout routes the banks' memory clocks to the ASRC, unbinding
//! hands them back to the CPU.
//!
//! Per-channel lifecycle: idle -> [`input::open_asrc_in`] /
//! [`output::open_asrc_out`] -> running (rate and FIFO adjustments) ->
//! close -> idle. After every open and close the module clock is re-derived
//! by [`asrc_freq_adjust`].

use core::cell::Cell;

use bitflags::bitflags;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::error::{AudioError, Result};
use crate::hal::{Board, IrqController, IrqLine, IrqPriority, RegisterBus};
use crate::klog::{klog_debug, klog_error, klog_info, klog_warning};
use crate::regs::*;

pub mod input;
pub mod output;

/// Q20 unity gain written to LGAIN/RGAIN on open
pub const ASRC_UNITY_GAIN: u32 = 1_048_576;

/// ASRC FIFO windows seen by DMA
pub const ASRC_FIFO0_ADDR: usize = 0x0003_6000;
pub const ASRC_FIFO1_ADDR: usize = 0x0003_7000;

const ASRC_RAM_NUM: u32 = 9;

// =============================================================================
// Channel / Clock Selection
// =============================================================================

/// Hardware ASRC channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum AsrcIndex {
    Out0,
    Out1,
    In0,
    In1,
}

impl AsrcIndex {
    pub const fn regs(self) -> AsrcChannelRegs {
        match self {
            AsrcIndex::Out0 => ASRC_OUT0,
            AsrcIndex::Out1 => ASRC_OUT1,
            AsrcIndex::In0 => ASRC_IN0,
            AsrcIndex::In1 => ASRC_IN1,
        }
    }

    /// Enable bit in ASRC_CLK_CTL
    pub const fn clk_bit(self) -> u32 {
        match self {
            AsrcIndex::Out0 => ASRC_CLK_OUT0,
            AsrcIndex::Out1 => ASRC_CLK_OUT1,
            AsrcIndex::In0 => ASRC_CLK_IN0,
            AsrcIndex::In1 => ASRC_CLK_IN1,
        }
    }

    pub const fn is_output(self) -> bool {
        matches!(self, AsrcIndex::Out0 | AsrcIndex::Out1)
    }

    /// DMA window of the channel's FIFO (channel 0 or 1 of either direction)
    pub const fn fifo_addr(self) -> usize {
        match self {
            AsrcIndex::Out0 | AsrcIndex::In0 => ASRC_FIFO0_ADDR,
            AsrcIndex::Out1 | AsrcIndex::In1 => ASRC_FIFO1_ADDR,
        }
    }

    const fn slot(self) -> usize {
        self as usize
    }
}

/// Clock domain driving one side of an ASRC channel.
///
/// Inputs accept `Cpu`, `Dma` or `Dsp` as read clock and are written by an
/// I2S-RX clock; outputs accept `Cpu`, `Dma` or `Dsp` as write clock and are
/// read by the DAC or I2S-TX.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AsrcClock {
    Cpu,
    Dma,
    Dsp,
    Dac,
    I2s,
    I2sRx0,
    I2sRx1,
}

impl AsrcClock {
    /// Clocks a caller may hand to ASRC as the application side
    pub const fn is_application_side(self) -> bool {
        matches!(self, AsrcClock::Cpu | AsrcClock::Dma | AsrcClock::Dsp)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AsrcMode {
    Src,
    Asrc,
    Bypass,
}

/// RAM bank allocation strategy for ASRC enable requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AsrcMemPolicy {
    Auto,
    LowLatency,
    /// Output only
    Subwoofer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryOwner {
    Asrc,
    Cpu,
}

// =============================================================================
// RAM Banks
// =============================================================================

bitflags! {
    /// One bit per physical RAM bank.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct RamBanks: u16 {
        const PCM0 = 1 << 0;
        const PCM1 = 1 << 1;
        const PCM2 = 1 << 2;
        const URAM0 = 1 << 3;
        const URAM1 = 1 << 4;
        const PCM3 = 1 << 5;
        const PCM4 = 1 << 6;
        const PCM5 = 1 << 7;
        const PCM6 = 1 << 8;
    }
}

pub(crate) struct RamBank {
    pub addr: usize,
    pub size: u32,
    clken: u32,
    clksel_mask: u32,
    clksel_asrc: u32,
}

/// Indexed by bit position in [`RamBanks`]
pub(crate) const RAM_BANKS: [RamBank; ASRC_RAM_NUM as usize] = [
    RamBank { addr: 0x0003_0000, size: 4096, clken: 1 << 0, clksel_mask: 1 << 0, clksel_asrc: 1 << 0 },
    RamBank { addr: 0x0003_1000, size: 4096, clken: 1 << 1, clksel_mask: 1 << 1, clksel_asrc: 1 << 1 },
    RamBank { addr: 0x0003_2000, size: 4096, clken: 1 << 2, clksel_mask: 1 << 2, clksel_asrc: 1 << 2 },
    RamBank { addr: 0x0003_5000, size: 2048, clken: 1 << 3, clksel_mask: 3 << 4, clksel_asrc: 2 << 4 },
    RamBank { addr: 0x0003_5800, size: 2048, clken: 1 << 4, clksel_mask: 3 << 6, clksel_asrc: 2 << 6 },
    RamBank { addr: 0x0003_3000, size: 4096, clken: 1 << 5, clksel_mask: 1 << 8, clksel_asrc: 1 << 8 },
    RamBank { addr: 0x0003_4000, size: 1024, clken: 1 << 6, clksel_mask: 1 << 9, clksel_asrc: 1 << 9 },
    RamBank { addr: 0x0003_4400, size: 1024, clken: 1 << 7, clksel_mask: 1 << 10, clksel_asrc: 1 << 10 },
    RamBank { addr: 0x0003_4800, size: 2048, clken: 1 << 8, clksel_mask: 1 << 11, clksel_asrc: 1 << 11 },
];

/// Allowed bank layouts, grouped by the channel that may use them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AsrcRam {
    Out0P012,
    Out0P01,
    Out0P0,
    Out0U0,
    Out0U0P5,
    Out1P2,
    Out1P12W16,
    Out1P3,
    Out1P1,
    Out1P12W24,
    InP12,
    InP2,
    InU1,
    InU1P4,
    In1P1,
    In1P3,
    In1P36,
}

impl AsrcRam {
    pub const fn channel(self) -> AsrcIndex {
        use AsrcRam::*;
        match self {
            Out0P012 | Out0P01 | Out0P0 | Out0U0 | Out0U0P5 => AsrcIndex::Out0,
            Out1P2 | Out1P12W16 | Out1P3 | Out1P1 | Out1P12W24 => AsrcIndex::Out1,
            InP12 | InP2 | InU1 | InU1P4 => AsrcIndex::In0,
            In1P1 | In1P3 | In1P36 => AsrcIndex::In1,
        }
    }

    pub const fn banks(self) -> RamBanks {
        use AsrcRam::*;
        match self {
            Out0P012 => RamBanks::PCM0.union(RamBanks::PCM1).union(RamBanks::PCM2),
            Out0P01 => RamBanks::PCM0.union(RamBanks::PCM1),
            Out0P0 => RamBanks::PCM0,
            Out0U0 => RamBanks::URAM0,
            Out0U0P5 => RamBanks::URAM0.union(RamBanks::PCM5),
            Out1P2 => RamBanks::PCM2,
            Out1P12W16 | Out1P12W24 => RamBanks::PCM1.union(RamBanks::PCM2),
            Out1P3 => RamBanks::PCM3,
            Out1P1 => RamBanks::PCM1,
            InP12 => RamBanks::PCM1.union(RamBanks::PCM2),
            InP2 => RamBanks::PCM2,
            InU1 => RamBanks::URAM1,
            InU1P4 => RamBanks::URAM1.union(RamBanks::PCM4),
            In1P1 => RamBanks::PCM1,
            In1P3 => RamBanks::PCM3,
            In1P36 => RamBanks::PCM3.union(RamBanks::PCM6),
        }
    }

    /// RAMSEL field value for the channel's control register
    pub const fn ramsel(self) -> u32 {
        use AsrcRam::*;
        match self {
            Out0P012 => 0,
            Out0P01 => 1,
            Out0P0 => 2,
            Out0U0 => 3,
            Out0U0P5 => 4,
            Out1P2 => 0,
            Out1P12W16 => 2,
            Out1P3 => 3,
            Out1P1 => 4,
            Out1P12W24 => 5,
            InP12 => 0,
            InP2 => 1,
            InU1 => 2,
            InU1P4 => 3,
            In1P3 => 0,
            In1P1 => 2,
            In1P36 => 3,
        }
    }

    pub const fn data_width(self) -> u32 {
        use AsrcRam::*;
        match self {
            Out0P012 | Out0U0P5 | Out1P12W24 | InU1P4 | In1P36 => ASRC_DATAWIDTH_24BIT,
            _ => ASRC_DATAWIDTH_16BIT,
        }
    }

    /// Usable FIFO bytes for layouts the session managers allocate
    pub const fn fifo_size(self) -> Option<u32> {
        use AsrcRam::*;
        match self {
            Out0P01 | Out1P12W16 | InP12 => Some(8192),
            Out0P0 | Out1P2 | Out1P3 | Out1P1 | InP2 | In1P1 | In1P3 => Some(4096),
            Out0U0 | InU1 => Some(2048),
            _ => None,
        }
    }
}

/// Everything needed to bring one channel up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AsrcParams {
    pub ram: AsrcRam,
    pub wclk: AsrcClock,
    pub rclk: AsrcClock,
    pub mode: AsrcMode,
    /// DMA beat width in bits, 0 leaves DMACTL alone
    pub dma_width_bits: u32,
    pub dec0: u32,
    pub dec1: u32,
    pub hfull: u32,
    pub hempty: u32,
}

/// Move every bank in `bitmap` to (or from) ASRC ownership.
///
/// A zero bitmap touches nothing; bits outside the nine banks are rejected
/// before any register write.
pub fn switch_asrc_memory<B: RegisterBus>(bus: &B, bitmap: u16, owner: MemoryOwner) -> Result<()> {
    if bitmap >= (1 << ASRC_RAM_NUM) {
        klog_error("asrc", &alloc::format!("ram bitmap 0x{:x} out of range", bitmap));
        return Err(AudioError::InvalidArgument);
    }

    for (bit, bank) in RAM_BANKS.iter().enumerate() {
        if bitmap & (1 << bit) == 0 {
            continue;
        }
        match owner {
            MemoryOwner::Asrc => {
                bus.set_bits(CMU_MEMCLKEN, bank.clken);
                bus.modify32(CMU_MEMCLKSEL, bank.clksel_mask, bank.clksel_asrc);
            }
            MemoryOwner::Cpu => {
                bus.clear_bits(CMU_MEMCLKSEL, bank.clksel_mask);
            }
        }
    }
    Ok(())
}

/// Whether `index` is running, or any channel when `index` is `None`.
pub fn asrc_status_check<B: RegisterBus>(bus: &B, index: Option<AsrcIndex>) -> bool {
    match index {
        Some(index) => bus.read32(index.regs().ctl) & ASRC_CTL_CHEN != 0,
        None => [AsrcIndex::Out0, AsrcIndex::Out1, AsrcIndex::In0, AsrcIndex::In1]
            .iter()
            .any(|i| bus.read32(i.regs().ctl) & ASRC_CTL_CHEN != 0),
    }
}

/// Gate the clock of one channel, or all four when `index` is `None`.
pub(crate) fn config_channel_clk<B: RegisterBus>(bus: &B, index: Option<AsrcIndex>, enable: bool) {
    let mask = index.map_or(ASRC_CLK_ALL, AsrcIndex::clk_bit);
    bus.modify32(ASRC_CLK_CTL, mask, if enable { mask } else { 0 });
}

// =============================================================================
// Module Init / Clocking
// =============================================================================

/// Power the ASRC block up into a clean state with every channel gated.
pub fn init_asrc<P: RegisterBus + Board + IrqController>(p: &P) {
    p.set_bits(CMU_DEVCLKEN, DEVCLKEN_ASRC);
    p.clear_bits(CMU_DEVRST, DEVRST_ASRC);
    p.busy_wait_us(1);
    p.set_bits(CMU_DEVRST, DEVRST_ASRC);

    p.clear_bits(ASRC_IN0.ctl, ASRC_CTL_TABLESEL);

    p.set_bits(CMU_MEMCLKEN, MEMCLKEN_ASRCBUF0);
    p.set_bits(CMU_MEMCLKSEL, MEMCLKSEL_ASRCBUF0);

    config_channel_clk(p, None, false);

    p.irq_connect(IrqLine::Asrc, IrqPriority::Normal);
    klog_info("asrc", "module initialised");
}

const ASRC_SAMPLE_TBL: [u8; 10] = [8, 11, 12, 16, 22, 24, 32, 44, 48, 96];

/// MHz per running channel, `[out, in]`, indexed like `ASRC_SAMPLE_TBL`
const ASRC_FREQ_TABLE: [[u32; 2]; 10] = [
    [3, 6],
    [4, 8],
    [4, 8],
    [6, 11],
    [8, 15],
    [8, 16],
    [11, 21],
    [16, 29],
    [18, 31],
    [32, 64],
];

/// Re-derive the ASRC module clock from the set of running channels.
///
/// The table row is chosen by the DAC rate and only when an output channel
/// runs; input-only configurations use the first row. With nothing running
/// the block is gated and held in reset.
pub fn asrc_freq_adjust<P: RegisterBus + Board>(p: &P, dac_rate_khz: Option<u8>) -> Result<u32> {
    let running = |index: AsrcIndex| p.read32(index.regs().ctl) & ASRC_CTL_CHEN != 0;
    let chan_out = [AsrcIndex::Out0, AsrcIndex::Out1].iter().filter(|i| running(**i)).count() as u32;
    let chan_in = [AsrcIndex::In0, AsrcIndex::In1].iter().filter(|i| running(**i)).count() as u32;

    let mut freq_index = 0;
    let mut dest_freq = 0;

    if chan_out != 0 {
        let rate = dac_rate_khz.ok_or_else(|| {
            klog_error("asrc", "output channel running without a DAC rate");
            AudioError::Io
        })?;
        freq_index = ASRC_SAMPLE_TBL
            .iter()
            .position(|r| *r == rate)
            .unwrap_or(ASRC_SAMPLE_TBL.len() - 1);
        dest_freq = ASRC_FREQ_TABLE[freq_index][0] * chan_out;
    }

    if chan_in != 0 {
        dest_freq += ASRC_FREQ_TABLE[freq_index][1] * chan_in;
    }

    if chan_out == 0 && chan_in == 0 {
        p.clear_bits(CMU_DEVCLKEN, DEVCLKEN_ASRC);
        p.clear_bits(CMU_DEVRST, DEVRST_ASRC);
        klog_debug("asrc", "all channels closed, module powered down");
    } else {
        p.set_asrc_rate(dest_freq);
        klog_debug("asrc", &alloc::format!("module clock {} MHz", dest_freq));
    }
    Ok(dest_freq)
}

/// [`asrc_freq_adjust`] after a channel open or close.
///
/// The channel is already in its requested state; a failure only leaves the
/// module clock where it was.
pub(crate) fn retune_asrc_clock<P: RegisterBus + Board>(p: &P, dac_rate_khz: Option<u8>) {
    if let Err(e) = asrc_freq_adjust(p, dac_rate_khz) {
        klog_warning("asrc", &alloc::format!("module clock left unchanged: {}", e));
    }
}

// =============================================================================
// Channel Programming
// =============================================================================

/// Full control-register sequence shared by input and output channels.
pub(crate) fn program_channel<B: RegisterBus>(
    bus: &B,
    params: &AsrcParams,
    default_ctl: u32,
    wclk_bits: u32,
    rclk_bits: u32,
) {
    let index = params.ram.channel();
    let regs = index.regs();

    bus.write32(regs.ctl, default_ctl | (params.ram.ramsel() << ASRC_CTL_RAMSEL_SHIFT));
    bus.modify32(regs.ctl, ASRC_CTL_WCLKSEL_MASK, wclk_bits << ASRC_CTL_WCLKSEL_SHIFT);
    bus.modify32(regs.ctl, ASRC_CTL_RCLKSEL_MASK, rclk_bits << ASRC_CTL_RCLKSEL_SHIFT);

    if index.is_output() {
        bus.clear_bits(regs.ctl, ASRC_CTL_RESETWFIFO);
        bus.set_bits(regs.ctl, ASRC_CTL_RESETWFIFO);
        bus.clear_bits(regs.ctl, ASRC_CTL_RESETRFIFO);
        bus.set_bits(regs.ctl, ASRC_CTL_RESETRFIFO);
        if params.dma_width_bits != 0 {
            bus.write32(regs.dmactl, params.dma_width_bits / 8 - 1);
        }
    }

    if params.mode == AsrcMode::Asrc {
        bus.set_bits(regs.ctl, ASRC_CTL_MODESEL_ASRC);
    }

    bus.write32(regs.dec0, params.dec0);
    bus.write32(regs.dec1, params.dec1);
    bus.write32(regs.lgain, ASRC_UNITY_GAIN);
    bus.write32(regs.rgain, ASRC_UNITY_GAIN);

    // pending bits are write-one-to-clear
    let ip = bus.read32(regs.ip);
    bus.write32(regs.ip, ip);

    let average = asrc_ctl_averagenum(1) >> ASRC_CTL_AVERAGENUM_SHIFT;
    bus.write32(regs.thres_hf, params.hfull * average * 2);
    bus.write32(regs.thres_he, params.hempty * average * 2);

    bus.set_bits(regs.ctl, ASRC_CTL_RESETWFIFO | ASRC_CTL_RESETRFIFO | ASRC_CTL_CHEN);
    let bypass = (params.mode == AsrcMode::Bypass) as u32;
    bus.set_bits(regs.ctl, bypass << ASRC_CTL_BYPASSEN_SHIFT);

    config_channel_clk(bus, Some(index), true);
}

/// Stop a channel and gate its clock.
pub(crate) fn disable_channel<B: RegisterBus>(bus: &B, index: AsrcIndex) {
    bus.clear_bits(
        index.regs().ctl,
        ASRC_CTL_CHEN | ASRC_CTL_RESETRFIFO | ASRC_CTL_RESETWFIFO,
    );
    config_channel_clk(bus, Some(index), false);
}

/// Live rate change: acknowledge pending bits, then load dec0 and mirror it.
pub(crate) fn load_rate<B: RegisterBus>(bus: &B, index: AsrcIndex, dec: u32) {
    let regs = index.regs();
    let ip = bus.read32(regs.ip);
    bus.write32(regs.ip, ip);
    bus.write32(regs.dec0, dec);
    let dec0 = bus.read32(regs.dec0);
    bus.write32(regs.dec1, dec0);
}

/// Pulse the selected FIFO resets while keeping whichever reset bits were
/// already released.
pub fn reset_asrc_fifo<P: RegisterBus + Board>(p: &P, index: AsrcIndex, reset_w: bool, reset_r: bool) {
    let ctl = index.regs().ctl;
    let mut bits = 0;
    if reset_w {
        bits |= ASRC_CTL_RESETWFIFO;
    }
    if reset_r {
        bits |= ASRC_CTL_RESETRFIFO;
    }

    let value = p.read32(ctl);
    let state = value & (ASRC_CTL_RESETWFIFO | ASRC_CTL_RESETRFIFO);
    p.write32(ctl, value & !bits);
    p.busy_wait_us(10);
    p.modify32(ctl, ASRC_CTL_RESETWFIFO | ASRC_CTL_RESETRFIFO, state);
    klog_debug("asrc", &alloc::format!("{:?} fifo reset w={} r={}", index, reset_w, reset_r));
}

// =============================================================================
// Threshold Interrupt
// =============================================================================

/// Single callback slot for the shared ASRC threshold interrupt.
pub struct AsrcIrq {
    callback: Mutex<CriticalSectionRawMutex, Cell<Option<fn()>>>,
}

impl AsrcIrq {
    pub const fn new() -> Self {
        Self {
            callback: Mutex::new(Cell::new(None)),
        }
    }

    pub(crate) fn set(&self, callback: Option<fn()>) {
        self.callback.lock(|cell| cell.set(callback));
    }

    pub fn callback(&self) -> Option<fn()> {
        self.callback.lock(|cell| cell.get())
    }

    /// Interrupt body: acknowledge out0/out1, then hand off to the user.
    pub fn handle<B: RegisterBus>(&self, bus: &B) {
        if bus.read32(ASRC_INT_PD) & ASRC_INT_OUT_MASK != 0 {
            bus.write32(ASRC_INT_PD, ASRC_INT_OUT_MASK);
        }
        if let Some(callback) = self.callback() {
            callback();
        }
    }
}

impl Default for AsrcIrq {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Binding State
// =============================================================================

/// Which layout each channel holds and which banks are spoken for.
pub struct AsrcState {
    bound: [Option<AsrcRam>; 4],
    owned: RamBanks,
}

impl AsrcState {
    pub const fn new() -> Self {
        Self {
            bound: [None; 4],
            owned: RamBanks::empty(),
        }
    }

    pub fn bound(&self, index: AsrcIndex) -> Option<AsrcRam> {
        self.bound[index.slot()]
    }

    pub fn owned(&self) -> RamBanks {
        self.owned
    }

    /// Claim `ram` for its channel; nothing is recorded on failure.
    pub fn reserve(&mut self, ram: AsrcRam) -> Result<()> {
        let index = ram.channel();
        if self.bound[index.slot()].is_some() {
            klog_error("asrc", &alloc::format!("{:?} already bound", index));
            return Err(AudioError::InvalidArgument);
        }
        if self.owned.intersects(ram.banks()) {
            klog_error(
                "asrc",
                &alloc::format!("{:?} overlaps owned banks {:?}", ram, self.owned),
            );
            return Err(AudioError::Busy);
        }
        self.bound[index.slot()] = Some(ram);
        self.owned |= ram.banks();
        Ok(())
    }

    pub fn release(&mut self, index: AsrcIndex) -> Option<AsrcRam> {
        let ram = self.bound[index.slot()].take()?;
        self.owned.remove(ram.banks());
        Some(ram)
    }
}

impl Default for AsrcState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockPlatform;

    #[test]
    fn test_switch_memory_zero_bitmap_is_noop() {
        let p = MockPlatform::new();
        switch_asrc_memory(&p, 0, MemoryOwner::Asrc).unwrap();
        assert_eq!(p.write_count(), 0);
    }

    #[test]
    fn test_switch_memory_rejects_out_of_range() {
        let p = MockPlatform::new();
        assert_eq!(
            switch_asrc_memory(&p, 1 << 9, MemoryOwner::Asrc),
            Err(AudioError::InvalidArgument)
        );
        assert_eq!(p.write_count(), 0);
    }

    #[test]
    fn test_switch_memory_uram_uses_two_bit_select() {
        let p = MockPlatform::new();
        p.poke(CMU_MEMCLKSEL, 3 << 4);
        switch_asrc_memory(&p, RamBanks::URAM0.bits(), MemoryOwner::Asrc).unwrap();
        assert_eq!(p.peek(CMU_MEMCLKSEL), 2 << 4);
        assert_eq!(p.peek(CMU_MEMCLKEN), 1 << 3);

        switch_asrc_memory(&p, RamBanks::URAM0.bits(), MemoryOwner::Cpu).unwrap();
        assert_eq!(p.peek(CMU_MEMCLKSEL), 0);
        // clock stays enabled, only the owner changes
        assert_eq!(p.peek(CMU_MEMCLKEN), 1 << 3);
    }

    #[test]
    fn test_layout_tables() {
        assert_eq!(AsrcRam::Out0P012.banks().bits(), 0b111);
        assert_eq!(AsrcRam::In1P36.banks(), RamBanks::PCM3 | RamBanks::PCM6);
        assert_eq!(AsrcRam::In1P3.ramsel(), 0);
        assert_eq!(AsrcRam::InP2.channel(), AsrcIndex::In0);
        assert_eq!(AsrcRam::Out1P12W24.data_width(), ASRC_DATAWIDTH_24BIT);
        assert_eq!(AsrcRam::InP12.fifo_size(), Some(8192));
        assert_eq!(AsrcRam::InU1P4.fifo_size(), None);
        assert_eq!(RAM_BANKS[RamBanks::PCM6.bits().trailing_zeros() as usize].size, 2048);
    }

    #[test]
    fn test_reserve_rejects_overlap_and_double_bind() {
        let mut state = AsrcState::new();
        state.reserve(AsrcRam::InP2).unwrap();
        assert_eq!(state.reserve(AsrcRam::InU1), Err(AudioError::InvalidArgument));
        assert_eq!(state.reserve(AsrcRam::Out1P12W16), Err(AudioError::Busy));
        assert_eq!(state.bound(AsrcIndex::Out1), None);

        assert_eq!(state.release(AsrcIndex::In0), Some(AsrcRam::InP2));
        assert!(state.owned().is_empty());
        state.reserve(AsrcRam::Out1P12W16).unwrap();
    }

    #[test]
    fn test_freq_adjust_powers_down_when_idle() {
        let p = MockPlatform::new();
        p.poke(CMU_DEVCLKEN, DEVCLKEN_ASRC);
        p.poke(CMU_DEVRST, DEVRST_ASRC);
        assert_eq!(asrc_freq_adjust(&p, None), Ok(0));
        assert_eq!(p.peek(CMU_DEVCLKEN) & DEVCLKEN_ASRC, 0);
        assert_eq!(p.peek(CMU_DEVRST) & DEVRST_ASRC, 0);
        assert!(p.asrc_rates().is_empty());
    }

    #[test]
    fn test_freq_adjust_sums_directions() {
        let p = MockPlatform::new();
        p.poke(ASRC_OUT0.ctl, ASRC_CTL_CHEN);
        p.poke(ASRC_IN0.ctl, ASRC_CTL_CHEN);
        p.poke(ASRC_IN1.ctl, ASRC_CTL_CHEN);
        assert_eq!(asrc_freq_adjust(&p, Some(48)), Ok(18 + 2 * 31));

        // unknown DAC rate falls back to the last row
        assert_eq!(asrc_freq_adjust(&p, Some(64)), Ok(32 + 2 * 64));
        assert_eq!(p.asrc_rates(), alloc::vec![80, 160]);
    }

    #[test]
    fn test_freq_adjust_input_only_uses_first_row() {
        let p = MockPlatform::new();
        p.poke(ASRC_IN0.ctl, ASRC_CTL_CHEN);
        assert_eq!(asrc_freq_adjust(&p, Some(48)), Ok(6));
    }

    #[test]
    fn test_reset_fifo_keeps_released_bits() {
        let p = MockPlatform::new();
        p.poke(ASRC_OUT1.ctl, ASRC_CTL_CHEN | ASRC_CTL_RESETWFIFO | ASRC_CTL_RESETRFIFO);
        reset_asrc_fifo(&p, AsrcIndex::Out1, true, false);
        assert_eq!(
            p.writes_to(ASRC_OUT1.ctl),
            alloc::vec![
                ASRC_CTL_CHEN | ASRC_CTL_RESETRFIFO,
                ASRC_CTL_CHEN | ASRC_CTL_RESETWFIFO | ASRC_CTL_RESETRFIFO,
            ]
        );
    }

    #[test]
    fn test_irq_handler_acks_and_calls_back() {
        use core::sync::atomic::{AtomicU32, Ordering};
        static HITS: AtomicU32 = AtomicU32::new(0);
        fn on_threshold() {
            HITS.fetch_add(1, Ordering::SeqCst);
        }

        let p = MockPlatform::new();
        let irq = AsrcIrq::new();
        irq.handle(&p);
        assert_eq!(HITS.load(Ordering::SeqCst), 0);

        irq.set(Some(on_threshold));
        p.poke(ASRC_INT_PD, 0x2);
        irq.handle(&p);
        assert_eq!(p.writes_to(ASRC_INT_PD), alloc::vec![ASRC_INT_OUT_MASK]);
        assert_eq!(HITS.load(Ordering::SeqCst), 1);
    }
}
