//! ASRC output channels (out0, out1): DMA/DSP/CPU -> ASRC -> DAC or I2S-TX.

use super::*;
use crate::audio_out::AoutFifo;

const DEFAULT_OUT_CTL: u32 = asrc_ctl_averagenum(1)
    | (ASRC_OUT_WCLK_DSP << ASRC_CTL_WCLKSEL_SHIFT)
    | (ASRC_OUT_RCLK_DAC << ASRC_CTL_RCLKSEL_SHIFT);

fn wclk_bits(clk: AsrcClock) -> u32 {
    match clk {
        AsrcClock::Dma => ASRC_OUT_WCLK_DMA,
        AsrcClock::Dsp => ASRC_OUT_WCLK_DSP,
        _ => ASRC_WCLK_CPU,
    }
}

fn rclk_bits(clk: AsrcClock) -> u32 {
    match clk {
        AsrcClock::Dac => ASRC_OUT_RCLK_DAC,
        AsrcClock::I2s => ASRC_OUT_RCLK_I2S,
        _ => ASRC_RCLK_CPU,
    }
}

/// Bank layout `policy` picks for `fifo`, without checking the channel.
///
/// Only the I2S-TX auto policy looks at the hardware: it takes whichever
/// output channel is idle.
pub fn asrc_out_layout<B: RegisterBus>(bus: &B, fifo: AoutFifo, policy: AsrcMemPolicy) -> Result<AsrcRam> {
    let ram = match (policy, fifo) {
        (AsrcMemPolicy::Auto, AoutFifo::Dac0) => AsrcRam::Out0P0,
        (AsrcMemPolicy::Auto, AoutFifo::Dac1) => AsrcRam::Out1P1,
        (AsrcMemPolicy::Auto, AoutFifo::I2sTx0) => {
            if !asrc_status_check(bus, Some(AsrcIndex::Out0)) {
                AsrcRam::Out0P0
            } else if !asrc_status_check(bus, Some(AsrcIndex::Out1)) {
                AsrcRam::Out1P1
            } else {
                klog_error("asrc", "no asrc output channel left");
                return Err(AudioError::InvalidArgument);
            }
        }
        (AsrcMemPolicy::LowLatency, AoutFifo::Dac0) => AsrcRam::Out0U0,
        (AsrcMemPolicy::Subwoofer, AoutFifo::Dac0) => AsrcRam::Out0P0,
        (_, AoutFifo::Dac1) | (_, AoutFifo::I2sTx0) => AsrcRam::Out1P1,
    };
    Ok(ram)
}

/// Pick the output channel and bank layout for a playback FIFO.
///
/// # Panics
///
/// When the policy lands on a channel that is already running. The session
/// manager refuses busy channels with [`asrc_out_layout`] first.
pub fn prepare_asrc_out<B: RegisterBus>(bus: &B, fifo: AoutFifo, policy: AsrcMemPolicy) -> Result<AsrcRam> {
    let ram = asrc_out_layout(bus, fifo, policy)?;
    let index = ram.channel();
    if asrc_status_check(bus, Some(index)) {
        klog_error("asrc", &alloc::format!("asrc {:?} can not be used ({:?})", index, policy));
        panic!("asrc {:?} already running", index);
    }
    klog_info("asrc", &alloc::format!("{:?} -> {:?} ram {:?}", fifo, index, ram));
    Ok(ram)
}

/// Read clock for an output channel feeding `fifo`.
pub fn asrc_out_rclk(fifo: AoutFifo) -> AsrcClock {
    match fifo {
        AoutFifo::I2sTx0 => AsrcClock::I2s,
        AoutFifo::Dac0 | AoutFifo::Dac1 => AsrcClock::Dac,
    }
}

/// Check that `ram` is a layout the output manager can size.
///
/// # Panics
///
/// On layouts without a FIFO size; only reachable through a bad policy table.
pub fn asrc_out_fifo_size(ram: AsrcRam) -> u32 {
    match (ram.channel().is_output(), ram.fifo_size()) {
        (true, Some(size)) => size,
        _ => {
            klog_error("asrc", &alloc::format!("{:?} has no output fifo size", ram));
            panic!("asrc ram {:?} not usable for output", ram);
        }
    }
}

fn require_output(ram: AsrcRam) -> Result<AsrcIndex> {
    let index = ram.channel();
    if !index.is_output() {
        klog_error("asrc", &alloc::format!("{:?} is not an output layout", ram));
        return Err(AudioError::InvalidArgument);
    }
    Ok(index)
}

fn require_output_index(index: AsrcIndex) -> Result<()> {
    if !index.is_output() {
        klog_error("asrc", &alloc::format!("{:?} is not an output channel", index));
        return Err(AudioError::InvalidArgument);
    }
    Ok(())
}

/// Route the banks of `params.ram` to the ASRC and start its output channel.
pub fn open_asrc_out<P: RegisterBus + Board>(p: &P, params: &AsrcParams, dac_rate_khz: Option<u8>) -> Result<()> {
    let index = require_output(params.ram)?;

    switch_asrc_memory(p, params.ram.banks().bits(), MemoryOwner::Asrc)?;
    program_channel(p, params, DEFAULT_OUT_CTL, wclk_bits(params.wclk), rclk_bits(params.rclk));
    p.write32(index.regs().dmactl, params.ram.data_width());

    retune_asrc_clock(p, dac_rate_khz);
    klog_info("asrc", &alloc::format!("{:?} opened, dec0 {}", index, params.dec0));
    Ok(())
}

/// Stop the output channel owning `ram` and hand its banks back to the CPU.
pub fn close_asrc_out<P: RegisterBus + Board>(p: &P, ram: AsrcRam, dac_rate_khz: Option<u8>) -> Result<()> {
    let index = require_output(ram)?;

    disable_channel(p, index);
    switch_asrc_memory(p, ram.banks().bits(), MemoryOwner::Cpu)?;
    retune_asrc_clock(p, dac_rate_khz);
    Ok(())
}

pub fn set_asrc_out_rate<B: RegisterBus>(bus: &B, index: AsrcIndex, dec: u32) -> Result<()> {
    require_output_index(index)?;
    load_rate(bus, index, dec);
    Ok(())
}

/// Accumulate the sample drift caused by the current decimation ratio.
///
/// `count += input_rate * (ratio - 1) * duration_ms` with the ratio in
/// thousandths of the unity value. A zero duration only reports `count`.
pub fn asrc_out_changed_samples<B: RegisterBus>(
    bus: &B,
    index: AsrcIndex,
    input_rate_khz: u32,
    count: &mut i32,
    duration_ms: u32,
) -> Result<i32> {
    require_output_index(index)?;
    if duration_ms == 0 {
        return Ok(*count);
    }

    let dec0 = bus.read32(index.regs().dec0) as i64;
    if dec0 == 0 {
        klog_error("asrc", &alloc::format!("{:?} has no decimation ratio", index));
        return Err(AudioError::Io);
    }
    let ratio = ASRC_UNITY_GAIN as i64 * 1000 / dec0;
    let delta = input_rate_khz as i64 * (ratio - 1000) * duration_ms as i64 / 1000;
    *count = count.wrapping_add(delta as i32);
    Ok(*count)
}

pub fn set_asrc_out_vol_gain<B: RegisterBus>(bus: &B, index: AsrcIndex, gain: u32) -> Result<()> {
    require_output_index(index)?;
    let regs = index.regs();
    bus.write32(regs.lgain, gain);
    bus.write32(regs.rgain, gain);
    Ok(())
}

pub fn get_asrc_out_vol_gain<B: RegisterBus>(bus: &B, index: AsrcIndex) -> Result<u32> {
    require_output_index(index)?;
    Ok(bus.read32(index.regs().lgain))
}

/// Push `samples` zero words into the write FIFO from the CPU side.
///
/// The write clock is switched to CPU for the duration and restored after.
pub fn write_zero_to_asrc_fifo<B: RegisterBus>(bus: &B, index: AsrcIndex, samples: u32) -> Result<u32> {
    require_output_index(index)?;
    if samples == 0 {
        return Ok(0);
    }

    let regs = index.regs();
    let saved = bus.read32(regs.ctl) & ASRC_CTL_WCLKSEL_MASK;
    bus.clear_bits(regs.ctl, ASRC_CTL_WCLKSEL_MASK);
    for _ in 0..samples {
        bus.write32(regs.wfifo, 0);
    }
    bus.modify32(regs.ctl, ASRC_CTL_WCLKSEL_MASK, saved);
    klog_debug("asrc", &alloc::format!("{:?} zero fill {}", index, samples));
    Ok(samples)
}

/// Samples still queued in the channel.
pub fn asrc_out_remain_samples<B: RegisterBus>(bus: &B, index: AsrcIndex) -> Result<u32> {
    require_output_index(index)?;
    Ok((bus.read32(index.regs().ip) >> ASRC_IP_REMAIN_SHIFT) & ASRC_IP_REMAIN_MASK)
}

/// FIFO level at which a reload-mode output starts reading.
pub fn set_asrc_out_start_threshold<B: RegisterBus>(bus: &B, index: AsrcIndex, level: u32) -> Result<()> {
    require_output_index(index)?;
    bus.write32(index.regs().st_level, level);
    Ok(())
}

/// Install or remove the shared threshold callback.
///
/// `None` clears both thresholds and masks the interrupt line.
pub fn request_asrc_irq<P: RegisterBus + IrqController>(
    p: &P,
    irq: &AsrcIrq,
    callback: Option<fn()>,
    threshold: u32,
) {
    match callback {
        Some(callback) => {
            p.write32(ASRC_OUT0.int_thres, threshold);
            p.write32(ASRC_OUT1.int_thres, threshold);
            p.write32(ASRC_INT_PD, ASRC_INT_OUT_MASK);
            p.set_bits(ASRC_INT_EN, ASRC_INT_OUT_MASK);
            irq.set(Some(callback));
            p.irq_enable(IrqLine::Asrc);
        }
        None => {
            p.write32(ASRC_OUT0.int_thres, 0);
            p.write32(ASRC_OUT1.int_thres, 0);
            p.write32(ASRC_INT_PD, ASRC_INT_OUT_MASK);
            p.write32(ASRC_INT_EN, 0);
            p.irq_disable(IrqLine::Asrc);
            irq.set(None);
        }
    }
}
