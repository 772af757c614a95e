//! ASRC input channels (in0, in1): capture FIFO -> ASRC -> DMA/DSP/CPU.

use super::*;
use crate::audio_in::AinFifo;

const DEFAULT_IN_CTL: u32 = asrc_ctl_averagenum(1)
    | (ASRC_IN_WCLK_I2SRX0 << ASRC_CTL_WCLKSEL_SHIFT)
    | (ASRC_IN_RCLK_DSP << ASRC_CTL_RCLKSEL_SHIFT);

fn wclk_bits(clk: AsrcClock) -> u32 {
    match clk {
        AsrcClock::I2sRx0 => ASRC_IN_WCLK_I2SRX0,
        AsrcClock::I2sRx1 => ASRC_IN_WCLK_I2SRX1,
        _ => ASRC_WCLK_CPU,
    }
}

fn rclk_bits(clk: AsrcClock) -> u32 {
    match clk {
        AsrcClock::Dma => ASRC_IN_RCLK_DMA,
        AsrcClock::Dsp => ASRC_IN_RCLK_DSP,
        _ => ASRC_RCLK_CPU,
    }
}

/// Pick the input channel and bank layout for a capture FIFO.
///
/// Only reads channel state; nothing is claimed here.
pub fn prepare_asrc_in<B: RegisterBus>(bus: &B, fifo: AinFifo, policy: AsrcMemPolicy) -> Result<AsrcRam> {
    let ram = match policy {
        AsrcMemPolicy::Auto => match fifo {
            AinFifo::Adc => AsrcRam::InP2,
            AinFifo::I2sRx1 => {
                if !asrc_status_check(bus, Some(AsrcIndex::In0)) {
                    AsrcRam::InP2
                } else if !asrc_status_check(bus, Some(AsrcIndex::In1)) {
                    AsrcRam::In1P3
                } else {
                    klog_error("asrc", "no asrc input channel left");
                    return Err(AudioError::InvalidArgument);
                }
            }
        },
        AsrcMemPolicy::LowLatency => AsrcRam::InU1,
        AsrcMemPolicy::Subwoofer => {
            klog_error("asrc", "subwoofer policy is output only");
            return Err(AudioError::InvalidArgument);
        }
    };

    let index = ram.channel();
    if asrc_status_check(bus, Some(index)) {
        klog_error("asrc", &alloc::format!("asrc {:?} can not be used", index));
        return Err(AudioError::InvalidArgument);
    }
    klog_info("asrc", &alloc::format!("{:?} -> {:?} ram {:?}", fifo, index, ram));
    Ok(ram)
}

/// Half-full / half-empty FIFO thresholds of an input layout.
pub fn asrc_in_thresholds(ram: AsrcRam) -> Result<(u32, u32)> {
    match ram {
        AsrcRam::InP12 | AsrcRam::InP2 | AsrcRam::In1P1 | AsrcRam::In1P3 | AsrcRam::InU1 => {
            let size = ram.fifo_size().unwrap_or(0);
            Ok((size / 16 * 3, size / 16))
        }
        _ => {
            klog_error("asrc", &alloc::format!("{:?} has no input thresholds", ram));
            Err(AudioError::InvalidArgument)
        }
    }
}

fn require_input(ram: AsrcRam) -> Result<AsrcIndex> {
    let index = ram.channel();
    if index.is_output() {
        klog_error("asrc", &alloc::format!("{:?} is not an input layout", ram));
        return Err(AudioError::InvalidArgument);
    }
    Ok(index)
}

/// Route the banks of `params.ram` to the ASRC and start its input channel.
pub fn open_asrc_in<P: RegisterBus + Board>(p: &P, params: &AsrcParams, dac_rate_khz: Option<u8>) -> Result<()> {
    let index = require_input(params.ram)?;

    switch_asrc_memory(p, params.ram.banks().bits(), MemoryOwner::Asrc)?;
    program_channel(p, params, DEFAULT_IN_CTL, wclk_bits(params.wclk), rclk_bits(params.rclk));
    p.write32(index.regs().dmactl, params.ram.data_width());

    retune_asrc_clock(p, dac_rate_khz);
    klog_info("asrc", &alloc::format!("{:?} opened, dec0 {}", index, params.dec0));
    Ok(())
}

/// Stop the input channel owning `ram` and hand its banks back to the CPU.
pub fn close_asrc_in<P: RegisterBus + Board>(p: &P, ram: AsrcRam, dac_rate_khz: Option<u8>) -> Result<()> {
    let index = require_input(ram)?;

    disable_channel(p, index);
    switch_asrc_memory(p, ram.banks().bits(), MemoryOwner::Cpu)?;
    retune_asrc_clock(p, dac_rate_khz);
    Ok(())
}

pub fn set_asrc_in_rate<B: RegisterBus>(bus: &B, index: AsrcIndex, dec: u32) -> Result<()> {
    if index.is_output() {
        klog_error("asrc", &alloc::format!("{:?} is not an input channel", index));
        return Err(AudioError::InvalidArgument);
    }
    load_rate(bus, index, dec);
    Ok(())
}

/// Pulse the read-FIFO reset of a running input channel.
pub fn reset_asrc_in_fifo<P: RegisterBus + Board>(p: &P, index: AsrcIndex) -> Result<()> {
    if index.is_output() {
        klog_error("asrc", &alloc::format!("{:?} is not an input channel", index));
        return Err(AudioError::InvalidArgument);
    }

    let ctl = index.regs().ctl;
    let running = ASRC_CTL_RESETRFIFO | ASRC_CTL_CHEN;
    critical_section::with(|_| {
        let value = p.read32(ctl);
        if value & running == running {
            p.write32(ctl, value & !ASRC_CTL_RESETRFIFO);
            p.busy_wait_us(1);
            p.write32(ctl, value);
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockPlatform;

    fn params(ram: AsrcRam) -> AsrcParams {
        let (hfull, hempty) = asrc_in_thresholds(ram).unwrap();
        AsrcParams {
            ram,
            wclk: AsrcClock::I2sRx0,
            rclk: AsrcClock::Dma,
            mode: AsrcMode::Src,
            dma_width_bits: 16,
            dec0: ASRC_UNITY_GAIN,
            dec1: ASRC_UNITY_GAIN,
            hfull,
            hempty,
        }
    }

    #[test]
    fn test_prepare_auto_policy() {
        let p = MockPlatform::new();
        assert_eq!(prepare_asrc_in(&p, AinFifo::Adc, AsrcMemPolicy::Auto), Ok(AsrcRam::InP2));
        assert_eq!(prepare_asrc_in(&p, AinFifo::I2sRx1, AsrcMemPolicy::Auto), Ok(AsrcRam::InP2));

        p.poke(ASRC_IN0.ctl, ASRC_CTL_CHEN);
        assert_eq!(prepare_asrc_in(&p, AinFifo::I2sRx1, AsrcMemPolicy::Auto), Ok(AsrcRam::In1P3));
        assert_eq!(
            prepare_asrc_in(&p, AinFifo::Adc, AsrcMemPolicy::Auto),
            Err(AudioError::InvalidArgument)
        );
    }

    #[test]
    fn test_prepare_both_inputs_busy() {
        let p = MockPlatform::new();
        p.poke(ASRC_IN0.ctl, ASRC_CTL_CHEN);
        p.poke(ASRC_IN1.ctl, ASRC_CTL_CHEN);
        assert_eq!(
            prepare_asrc_in(&p, AinFifo::I2sRx1, AsrcMemPolicy::Auto),
            Err(AudioError::InvalidArgument)
        );
        assert_eq!(p.write_count(), 0);
    }

    #[test]
    fn test_prepare_low_latency_and_subwoofer() {
        let p = MockPlatform::new();
        assert_eq!(
            prepare_asrc_in(&p, AinFifo::I2sRx1, AsrcMemPolicy::LowLatency),
            Ok(AsrcRam::InU1)
        );
        assert_eq!(
            prepare_asrc_in(&p, AinFifo::Adc, AsrcMemPolicy::Subwoofer),
            Err(AudioError::InvalidArgument)
        );
    }

    #[test]
    fn test_thresholds() {
        assert_eq!(asrc_in_thresholds(AsrcRam::InP12), Ok((1536, 512)));
        assert_eq!(asrc_in_thresholds(AsrcRam::InU1), Ok((384, 128)));
        assert_eq!(asrc_in_thresholds(AsrcRam::In1P36), Err(AudioError::InvalidArgument));
        assert_eq!(asrc_in_thresholds(AsrcRam::Out0P0), Err(AudioError::InvalidArgument));
    }

    #[test]
    fn test_open_programs_channel() {
        let p = MockPlatform::new();
        open_asrc_in(&p, &params(AsrcRam::In1P3), None).unwrap();

        let ctl = p.peek(ASRC_IN1.ctl);
        assert_ne!(ctl & ASRC_CTL_CHEN, 0);
        assert_eq!(ctl & ASRC_CTL_MODESEL_ASRC, 0);
        assert_eq!((ctl & ASRC_CTL_RAMSEL_MASK) >> ASRC_CTL_RAMSEL_SHIFT, 0);
        assert_eq!((ctl & ASRC_CTL_WCLKSEL_MASK) >> ASRC_CTL_WCLKSEL_SHIFT, ASRC_IN_WCLK_I2SRX0);
        assert_eq!((ctl & ASRC_CTL_RCLKSEL_MASK) >> ASRC_CTL_RCLKSEL_SHIFT, ASRC_IN_RCLK_DMA);
        assert_eq!(p.peek(ASRC_IN1.thres_hf), 768 * 2);
        assert_eq!(p.peek(ASRC_IN1.thres_he), 256 * 2);
        assert_eq!(p.peek(ASRC_IN1.lgain), ASRC_UNITY_GAIN);
        assert_eq!(p.peek(ASRC_IN1.dmactl), ASRC_DATAWIDTH_16BIT);
        assert_eq!(p.peek(ASRC_CLK_CTL), ASRC_CLK_IN1);
        assert_eq!(p.peek(CMU_MEMCLKSEL), 1 << 8);
        assert_eq!(p.asrc_rates(), alloc::vec![6]);
    }

    #[test]
    fn test_open_rejects_output_layout() {
        let p = MockPlatform::new();
        let mut bad = params(AsrcRam::InP2);
        bad.ram = AsrcRam::Out0P0;
        assert_eq!(open_asrc_in(&p, &bad, None), Err(AudioError::InvalidArgument));
        assert_eq!(p.write_count(), 0);
    }

    #[test]
    fn test_close_returns_banks() {
        let p = MockPlatform::new();
        open_asrc_in(&p, &params(AsrcRam::InP2), None).unwrap();
        close_asrc_in(&p, AsrcRam::InP2, None).unwrap();

        assert!(!asrc_status_check(&p, Some(AsrcIndex::In0)));
        assert_eq!(p.peek(ASRC_CLK_CTL), 0);
        assert_eq!(p.peek(CMU_MEMCLKSEL) & (1 << 2), 0);
        // last channel gone: module clock off
        assert_eq!(p.peek(CMU_DEVCLKEN) & DEVCLKEN_ASRC, 0);
    }

    #[test]
    fn test_set_rate_mirrors_dec1() {
        let p = MockPlatform::new();
        set_asrc_in_rate(&p, AsrcIndex::In0, 963_380).unwrap();
        assert_eq!(p.peek(ASRC_IN0.dec0), 963_380);
        assert_eq!(p.peek(ASRC_IN0.dec1), 963_380);
        assert_eq!(set_asrc_in_rate(&p, AsrcIndex::Out1, 1), Err(AudioError::InvalidArgument));
    }

    #[test]
    fn test_reset_fifo_only_when_running() {
        let p = MockPlatform::new();
        p.poke(ASRC_IN0.ctl, ASRC_CTL_RESETRFIFO);
        reset_asrc_in_fifo(&p, AsrcIndex::In0).unwrap();
        assert!(p.writes_to(ASRC_IN0.ctl).is_empty());

        let running = ASRC_CTL_RESETRFIFO | ASRC_CTL_CHEN;
        p.poke(ASRC_IN0.ctl, running);
        reset_asrc_in_fifo(&p, AsrcIndex::In0).unwrap();
        assert_eq!(p.writes_to(ASRC_IN0.ctl), alloc::vec![ASRC_CTL_CHEN, running]);
    }
}
