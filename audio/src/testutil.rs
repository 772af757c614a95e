//! In-memory platform for unit tests.
//!
//! Registers are a sparse map that reads back what was written. `poke` seeds
//! a value without counting as a driver write, so tests can fake hardware
//! status and then assert on exactly what the driver touched.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use crate::error::{AudioError, Result};
use crate::hal::{
    Board, DeviceMapping, DmaChannel, DmaConfig, DmaEngine, InputSource, IrqController, IrqLine,
    IrqPriority, PhyDma, RegisterBus,
};

/// Cycles the fake counter advances per read
const CYCLES_PER_READ: u32 = 100;
const CYCLES_PER_US: u32 = 100;

/// One call made into the fake DMA engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DmaCall {
    Request(u32),
    Config(u32),
    Reload(u32, usize, usize, u32),
    Start(u32),
    PrepareStart(u32),
    Stop(u32),
    Free(u32),
    PhyStop(u32),
    PhyStart(u32),
    PhyDisableSam(u32),
    PhyReload(u32, usize, usize, u32),
}

pub struct MockPlatform {
    regs: RefCell<BTreeMap<usize, u32>>,
    writes: RefCell<Vec<(usize, u32)>>,
    dma_calls: RefCell<Vec<DmaCall>>,
    dma_configs: RefCell<Vec<DmaConfig>>,
    dma_present: Cell<bool>,
    dma_exhausted: Cell<bool>,
    dma_start_fails: Cell<bool>,
    next_dma: Cell<u32>,
    irqs: RefCell<Vec<IrqLine>>,
    cycles: Cell<u32>,
    busy_waits: RefCell<Vec<u32>>,
    asrc_rates: RefCell<Vec<u32>>,
    devices: RefCell<BTreeMap<u16, InputSource>>,
    extern_pa: Cell<Option<bool>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            regs: RefCell::new(BTreeMap::new()),
            writes: RefCell::new(Vec::new()),
            dma_calls: RefCell::new(Vec::new()),
            dma_configs: RefCell::new(Vec::new()),
            dma_present: Cell::new(true),
            dma_exhausted: Cell::new(false),
            dma_start_fails: Cell::new(false),
            next_dma: Cell::new(0),
            irqs: RefCell::new(Vec::new()),
            cycles: Cell::new(0),
            busy_waits: RefCell::new(Vec::new()),
            asrc_rates: RefCell::new(Vec::new()),
            devices: RefCell::new(BTreeMap::new()),
            extern_pa: Cell::new(None),
        }
    }

    /// Seed a register without recording a write.
    pub fn poke(&self, addr: usize, value: u32) {
        self.regs.borrow_mut().insert(addr, value);
    }

    pub fn peek(&self, addr: usize) -> u32 {
        self.regs.borrow().get(&addr).copied().unwrap_or(0)
    }

    pub fn write_count(&self) -> usize {
        self.writes.borrow().len()
    }

    /// Values written to `addr`, oldest first.
    pub fn writes_to(&self, addr: usize) -> Vec<u32> {
        self.writes
            .borrow()
            .iter()
            .filter(|(a, _)| *a == addr)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn dma_calls(&self) -> Vec<DmaCall> {
        self.dma_calls.borrow().clone()
    }

    pub fn last_dma_config(&self) -> Option<DmaConfig> {
        self.dma_configs.borrow().last().copied()
    }

    pub fn set_dma_present(&self, present: bool) {
        self.dma_present.set(present);
    }

    /// Make every following channel request fail.
    pub fn exhaust_dma(&self) {
        self.dma_exhausted.set(true);
    }

    /// Make `dma_start` and `dma_prepare_start` report an I/O error.
    pub fn fail_dma_start(&self, fail: bool) {
        self.dma_start_fails.set(fail);
    }

    /// Undo [`MockPlatform::exhaust_dma`].
    pub fn refill_dma(&self) {
        self.dma_exhausted.set(false);
    }

    pub fn busy_waits(&self) -> Vec<u32> {
        self.busy_waits.borrow().clone()
    }

    pub fn asrc_rates(&self) -> Vec<u32> {
        self.asrc_rates.borrow().clone()
    }

    /// Wire logical input `device` to `source`; unmapped devices read as AUX0.
    pub fn map_device(&self, device: u16, source: InputSource) {
        self.devices.borrow_mut().insert(device, source);
    }

    /// Last level driven on the external PA line.
    pub fn extern_pa(&self) -> Option<bool> {
        self.extern_pa.get()
    }

    fn record(&self, call: DmaCall) {
        self.dma_calls.borrow_mut().push(call);
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBus for MockPlatform {
    fn read32(&self, addr: usize) -> u32 {
        self.peek(addr)
    }

    fn write32(&self, addr: usize, value: u32) {
        self.regs.borrow_mut().insert(addr, value);
        self.writes.borrow_mut().push((addr, value));
    }
}

impl DmaEngine for MockPlatform {
    fn dma_present(&self) -> bool {
        self.dma_present.get()
    }

    fn dma_request(&self) -> Option<DmaChannel> {
        if self.dma_exhausted.get() {
            return None;
        }
        let id = self.next_dma.get();
        self.next_dma.set(id + 1);
        self.record(DmaCall::Request(id));
        Some(DmaChannel(id))
    }

    fn dma_config(&self, chan: DmaChannel, config: &DmaConfig) -> Result<()> {
        self.record(DmaCall::Config(chan.0));
        self.dma_configs.borrow_mut().push(*config);
        Ok(())
    }

    fn dma_reload(&self, chan: DmaChannel, src: usize, dst: usize, len: u32) -> Result<()> {
        self.record(DmaCall::Reload(chan.0, src, dst, len));
        Ok(())
    }

    fn dma_start(&self, chan: DmaChannel) -> Result<()> {
        if self.dma_start_fails.get() {
            return Err(AudioError::Io);
        }
        self.record(DmaCall::Start(chan.0));
        Ok(())
    }

    fn dma_prepare_start(&self, chan: DmaChannel) -> Result<PhyDma> {
        if self.dma_start_fails.get() {
            return Err(AudioError::Io);
        }
        self.record(DmaCall::PrepareStart(chan.0));
        Ok(PhyDma(chan.0))
    }

    fn dma_stop(&self, chan: DmaChannel) -> Result<()> {
        self.record(DmaCall::Stop(chan.0));
        Ok(())
    }

    fn dma_free(&self, chan: DmaChannel) {
        self.record(DmaCall::Free(chan.0));
    }

    fn phy_dma_stop(&self, phy: PhyDma) {
        self.record(DmaCall::PhyStop(phy.0));
    }

    fn phy_dma_start(&self, phy: PhyDma) {
        self.record(DmaCall::PhyStart(phy.0));
    }

    fn phy_dma_disable_sam(&self, phy: PhyDma) {
        self.record(DmaCall::PhyDisableSam(phy.0));
    }

    fn phy_dma_reload(&self, phy: PhyDma, src: usize, dst: usize, len: u32) {
        self.record(DmaCall::PhyReload(phy.0, src, dst, len));
    }
}

impl IrqController for MockPlatform {
    fn irq_connect(&self, _line: IrqLine, _priority: IrqPriority) {}

    fn irq_enable(&self, line: IrqLine) {
        let mut irqs = self.irqs.borrow_mut();
        if !irqs.contains(&line) {
            irqs.push(line);
        }
    }

    fn irq_disable(&self, line: IrqLine) {
        self.irqs.borrow_mut().retain(|l| *l != line);
    }

    fn irq_is_enabled(&self, line: IrqLine) -> bool {
        self.irqs.borrow().contains(&line)
    }
}

impl Board for MockPlatform {
    fn busy_wait_us(&self, us: u32) {
        self.busy_waits.borrow_mut().push(us);
    }

    fn cycle_count(&self) -> u32 {
        let now = self.cycles.get();
        self.cycles.set(now.wrapping_add(CYCLES_PER_READ));
        now
    }

    fn cycles_per_us(&self) -> u32 {
        CYCLES_PER_US
    }

    fn set_asrc_rate(&self, mhz: u32) {
        self.asrc_rates.borrow_mut().push(mhz);
    }

    fn audio_device_mapping(&self, device: u16) -> Result<DeviceMapping> {
        let source = self.devices.borrow().get(&device).copied().unwrap_or(InputSource::Aux0);
        Ok(DeviceMapping { source, track: 0 })
    }

    fn extern_pa_ctl(&self, on: bool) {
        self.extern_pa.set(Some(on));
    }
}
