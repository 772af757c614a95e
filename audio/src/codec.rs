//! Codec front ends.
//!
//! Thin register sequences for the blocks the session managers drive:
//! ADC/DMIC, I2S-RX, SPDIF-RX on the capture side and DAC, I2S-TX,
//! SPDIF-TX, analog passthrough (AA) and the PA on the playback side.
//!
//! Blocks that own a sample clock take a reference on an audio PLL through
//! [`ClockState`] and hand back the [`ClockBinding`] their disable releases.

use crate::audio_in::AinFifo;
use crate::audio_out::AoutFifo;
use crate::clock::{ApllAlloc, ClockBinding, ClockState, ClockTarget};
use crate::config::{AaSource, I2sFormat, I2sRole};
use crate::error::{AudioError, Result};
use crate::gain::AdcGain;
use crate::hal::{Board, InputSource, RegisterBus};
use crate::klog::{klog_debug, klog_error, klog_info};
use crate::regs::*;

/// Settle time of the I2S-RX1 FIFO reset, in microseconds
const I2SRX1_FIFO_RESET_WAIT_US: u32 = 100;
const ANTIPOP_SETTLE_US: u32 = 10;

// =============================================================================
// Common
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelWidth {
    Bits16,
    Bits20,
    Bits24,
}

impl ChannelWidth {
    pub fn from_bits(bits: u8) -> Result<Self> {
        match bits {
            16 => Ok(ChannelWidth::Bits16),
            20 => Ok(ChannelWidth::Bits20),
            24 => Ok(ChannelWidth::Bits24),
            _ => {
                klog_error("codec", &alloc::format!("invalid channel width {}", bits));
                Err(AudioError::InvalidArgument)
            }
        }
    }

    pub const fn bits(self) -> u8 {
        match self {
            ChannelWidth::Bits16 => 16,
            ChannelWidth::Bits20 => 20,
            ChannelWidth::Bits24 => 24,
        }
    }

    /// DMA beat in bytes
    pub const fn dma_width(self) -> u8 {
        match self {
            ChannelWidth::Bits16 => 2,
            _ => 4,
        }
    }

    const fn i2s_code(self) -> u32 {
        match self {
            ChannelWidth::Bits16 => 0,
            ChannelWidth::Bits20 => 1,
            ChannelWidth::Bits24 => 2,
        }
    }
}

const fn i2s_format_code(format: I2sFormat) -> u32 {
    match format {
        I2sFormat::I2s => 0,
        I2sFormat::LeftJustified => 1,
        I2sFormat::RightJustified => 2,
    }
}

fn i2s_ctl(width: ChannelWidth, role: I2sRole, format: I2sFormat) -> u32 {
    let mut ctl = I2S_CTL_EN
        | ((i2s_format_code(format) << I2S_CTL_FMT_SHIFT) & I2S_CTL_FMT_MASK)
        | ((width.i2s_code() << I2S_CTL_WIDTH_SHIFT) & I2S_CTL_WIDTH_MASK);
    if role == I2sRole::Slave {
        ctl |= I2S_CTL_SLAVE;
    }
    ctl
}

/// Program a clock when the block is the I2S master; slaves follow the bus.
fn master_clock<B: RegisterBus>(
    bus: &B,
    clocks: &ClockState,
    role: I2sRole,
    rate_khz: u8,
    target: ClockTarget,
) -> Result<Option<ClockBinding>> {
    match role {
        I2sRole::Master => clocks
            .set_samplerate(bus, rate_khz, target, ApllAlloc::Auto)
            .map(Some),
        I2sRole::Slave => Ok(None),
    }
}

// =============================================================================
// Capture
// =============================================================================

const fn adc_source_code(source: InputSource) -> u32 {
    source as u32
}

/// Route an analog source into the ADC and apply its input-stage gain.
pub fn enable_inputsrc<B: RegisterBus>(bus: &B, source: InputSource, gain: &AdcGain) {
    bus.modify32(
        ADC_CTL,
        ADC_CTL_SRC_MASK | ADC_CTL_INPUT_GAIN_MASK,
        ((adc_source_code(source) << ADC_CTL_SRC_SHIFT) & ADC_CTL_SRC_MASK)
            | ((gain.input_gain as u32) << ADC_CTL_INPUT_GAIN_SHIFT)
            | ADC_CTL_INPUTSRC_EN,
    );
    klog_debug("codec", &alloc::format!("inputsrc {:?} gain 0x{:x}", source, gain.input_gain));
}

pub fn disable_inputsrc<B: RegisterBus>(bus: &B) {
    bus.clear_bits(
        ADC_CTL,
        ADC_CTL_INPUTSRC_EN | ADC_CTL_SRC_MASK | ADC_CTL_INPUT_GAIN_MASK,
    );
}

/// Digital stage of the ADC gain plus the input stage of the current source.
pub fn set_adc_gain<B: RegisterBus>(bus: &B, gain: &AdcGain) {
    let force = if gain.force_0db { ADC_GAIN_FORCE_0DB } else { 0 };
    bus.modify32(
        ADC_GAIN,
        ADC_GAIN_DIGITAL_MASK | ADC_GAIN_FORCE_0DB,
        (((gain.digital_gain as u32) << ADC_GAIN_DIGITAL_SHIFT) & ADC_GAIN_DIGITAL_MASK) | force,
    );
    bus.modify32(
        ADC_CTL,
        ADC_CTL_INPUT_GAIN_MASK,
        (gain.input_gain as u32) << ADC_CTL_INPUT_GAIN_SHIFT,
    );
}

pub fn enable_adc<B: RegisterBus>(
    bus: &B,
    clocks: &ClockState,
    rate_khz: u8,
    width: ChannelWidth,
    gain: &AdcGain,
    apll: ApllAlloc,
) -> Result<ClockBinding> {
    let clock = clocks.set_samplerate(bus, rate_khz, ClockTarget::Adc, apll)?;

    set_adc_gain(bus, gain);
    let width24 = if width == ChannelWidth::Bits16 { 0 } else { ADC_CTL_WIDTH24 };
    bus.modify32(ADC_CTL, ADC_CTL_WIDTH24, width24 | ADC_CTL_EN);
    bus.set_bits(ADC_FIFOCTL, FIFOCTL_FIFO_RESET);

    klog_info("codec", &alloc::format!("adc on {} kHz {} bit", rate_khz, width.bits()));
    Ok(clock)
}

pub fn disable_adc<B: RegisterBus>(bus: &B, clocks: &ClockState, clock: &ClockBinding) {
    bus.clear_bits(ADC_CTL, ADC_CTL_EN | ADC_CTL_WIDTH24);
    bus.clear_bits(ADC_FIFOCTL, FIFOCTL_FIFO_RESET);
    clocks.unset_samplerate(bus, clock);
}

pub fn enable_dmic<B: RegisterBus>(
    bus: &B,
    clocks: &ClockState,
    rate_khz: u8,
    width: ChannelWidth,
    gain: &AdcGain,
    apll: ApllAlloc,
) -> Result<ClockBinding> {
    let clock = enable_adc(bus, clocks, rate_khz, width, gain, apll)?;
    bus.set_bits(ADC_CTL, ADC_CTL_DMIC_EN);
    Ok(clock)
}

pub fn disable_dmic<B: RegisterBus>(bus: &B, clocks: &ClockState, clock: &ClockBinding) {
    bus.clear_bits(ADC_CTL, ADC_CTL_DMIC_EN);
    disable_adc(bus, clocks, clock);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum I2sRxPort {
    Rx0,
    Rx1,
}

impl I2sRxPort {
    const fn ctl(self) -> usize {
        match self {
            I2sRxPort::Rx0 => I2SRX0_CTL,
            I2sRxPort::Rx1 => I2SRX1_CTL,
        }
    }
}

pub fn enable_i2srx<B: RegisterBus>(
    bus: &B,
    clocks: &ClockState,
    port: I2sRxPort,
    rate_khz: u8,
    width: ChannelWidth,
    role: I2sRole,
    format: I2sFormat,
) -> Result<Option<ClockBinding>> {
    let clock = master_clock(bus, clocks, role, rate_khz, ClockTarget::Adc)?;
    bus.write32(port.ctl(), i2s_ctl(width, role, format));
    if port == I2sRxPort::Rx1 {
        bus.set_bits(I2SRX1_FIFOCTL, FIFOCTL_FIFO_RESET);
    }
    klog_info("codec", &alloc::format!("i2srx {:?} {:?} {:?}", port, role, format));
    Ok(clock)
}

pub fn disable_i2srx<B: RegisterBus>(
    bus: &B,
    clocks: &ClockState,
    port: I2sRxPort,
    clock: Option<&ClockBinding>,
) {
    bus.write32(port.ctl(), 0);
    if port == I2sRxPort::Rx1 {
        bus.clear_bits(I2SRX1_FIFOCTL, FIFOCTL_FIFO_RESET);
    }
    if let Some(clock) = clock {
        clocks.unset_samplerate(bus, clock);
    }
}

/// SPDIF-RX lands in the I2S-RX1 FIFO.
pub fn enable_spdifrx<B: RegisterBus>(bus: &B, width: ChannelWidth) {
    let width24 = if width == ChannelWidth::Bits16 { 0 } else { SPDIF_CTL_WIDTH24 };
    bus.write32(SPDIFRX_CTL, SPDIF_CTL_EN | width24);
    bus.set_bits(I2SRX1_FIFOCTL, FIFOCTL_FIFO_RESET);
}

pub fn disable_spdifrx<B: RegisterBus>(bus: &B) {
    bus.write32(SPDIFRX_CTL, 0);
    bus.clear_bits(I2SRX1_FIFOCTL, FIFOCTL_FIFO_RESET);
}

const fn rx_fifoctl(fifo: AinFifo) -> usize {
    match fifo {
        AinFifo::Adc => ADC_FIFOCTL,
        AinFifo::I2sRx1 => I2SRX1_FIFOCTL,
    }
}

/// Select where a capture FIFO drains to (`RX_FIFO_OS_*`).
pub fn set_rx_fifo_output<B: RegisterBus>(bus: &B, fifo: AinFifo, os: u32) {
    bus.modify32(
        rx_fifoctl(fifo),
        RX_FIFO_OS_MASK,
        (os << RX_FIFO_OS_SHIFT) & RX_FIFO_OS_MASK,
    );
}

pub fn set_rx_dma_width<B: RegisterBus>(bus: &B, fifo: AinFifo, width_bytes: u8) -> Result<()> {
    match width_bytes {
        4 => bus.clear_bits(rx_fifoctl(fifo), FIFOCTL_DMAWIDTH_16),
        2 => bus.set_bits(rx_fifoctl(fifo), FIFOCTL_DMAWIDTH_16),
        _ => {
            klog_error("codec", &alloc::format!("invalid dma width {}", width_bytes));
            return Err(AudioError::InvalidArgument);
        }
    }
    Ok(())
}

/// Drop stale samples from the I2S-RX1 FIFO before a capture starts.
pub fn restart_i2srx1_fifo<P: RegisterBus + Board>(p: &P) {
    p.clear_bits(I2SRX1_FIFOCTL, FIFOCTL_FIFO_RESET);
    p.busy_wait_us(I2SRX1_FIFO_RESET_WAIT_US);
    p.set_bits(I2SRX1_FIFOCTL, FIFOCTL_FIFO_RESET);
}

// =============================================================================
// Playback
// =============================================================================

/// `(pa << 8) | da` gain word; the DA level is applied to both channels.
pub fn set_dac_gain<B: RegisterBus>(bus: &B, gain: u32) {
    let pa = (gain >> 8) & PA_VOL_MASK;
    let da = gain & DAC_VOL_MASK;
    bus.write32(DAC_PAVOL, pa);
    bus.write32(
        DAC_VOL,
        (da << DAC_VOL_LEFT_SHIFT) | (da << DAC_VOL_RIGHT_SHIFT),
    );
    klog_debug("codec", &alloc::format!("gain pa 0x{:x} da 0x{:x}", pa, da));
}

pub fn get_dac_gain<B: RegisterBus>(bus: &B) -> u32 {
    let pa = bus.read32(DAC_PAVOL) & PA_VOL_MASK;
    let da = (bus.read32(DAC_VOL) >> DAC_VOL_LEFT_SHIFT) & DAC_VOL_MASK;
    (pa << 8) | da
}

const fn dac_fifo_bits(fifo: AoutFifo) -> Option<(u32, u32, u32, u32)> {
    match fifo {
        AoutFifo::Dac0 => Some((
            DAC_DIGCTL_DAC0_EN,
            DAC_FIFOCTL_DAF0IS_MASK,
            DAC_FIFOCTL_DAF0IS_SHIFT,
            DAC_FIFOCTL_DAF0RT,
        )),
        AoutFifo::Dac1 => Some((
            DAC_DIGCTL_DAC1_EN,
            DAC_FIFOCTL_DAF1IS_MASK,
            DAC_FIFOCTL_DAF1IS_SHIFT,
            DAC_FIFOCTL_DAF1RT,
        )),
        AoutFifo::I2sTx0 => None,
    }
}

pub fn enable_dac<B: RegisterBus>(
    bus: &B,
    clocks: &ClockState,
    fifo: AoutFifo,
    rate_khz: u8,
    width: ChannelWidth,
    mono: bool,
    gain: u32,
) -> Result<ClockBinding> {
    let (en, is_mask, is_shift, release) = dac_fifo_bits(fifo).ok_or_else(|| {
        klog_error("codec", &alloc::format!("dac can not use {:?}", fifo));
        AudioError::InvalidArgument
    })?;

    let clock = clocks.set_samplerate(bus, rate_khz, ClockTarget::Dac, ApllAlloc::Auto)?;

    let mut digctl = en;
    if width == ChannelWidth::Bits24 {
        digctl |= DAC_DIGCTL_WIDTH24;
    }
    if mono {
        digctl |= DAC_DIGCTL_MONO;
    }
    bus.modify32(DAC_DIGCTL, DAC_DIGCTL_WIDTH24 | DAC_DIGCTL_MONO, digctl);
    bus.modify32(DAC_FIFOCTL, is_mask, (TX_FIFO_IS_DMA << is_shift) | release);
    set_dac_gain(bus, gain);

    klog_info("codec", &alloc::format!("dac {:?} on {} kHz", fifo, rate_khz));
    Ok(clock)
}

pub fn disable_dac<B: RegisterBus>(bus: &B, clocks: &ClockState, fifo: AoutFifo, clock: &ClockBinding) {
    if let Some((en, is_mask, _, release)) = dac_fifo_bits(fifo) {
        bus.clear_bits(DAC_DIGCTL, en);
        bus.clear_bits(DAC_FIFOCTL, is_mask | release);
    }
    clocks.unset_samplerate(bus, clock);
}

/// Gate a DAC FIFO into the DAC without tearing the channel down.
pub fn dac_mute<B: RegisterBus>(bus: &B, fifo: AoutFifo, mute: bool) -> Result<()> {
    let (en, _, _, _) = dac_fifo_bits(fifo).ok_or_else(|| {
        klog_info("codec", &alloc::format!("{:?} is not a dac fifo", fifo));
        AudioError::Busy
    })?;
    if mute {
        bus.clear_bits(DAC_DIGCTL, en);
    } else {
        bus.set_bits(DAC_DIGCTL, en);
    }
    Ok(())
}

pub fn enable_i2stx<B: RegisterBus>(
    bus: &B,
    clocks: &ClockState,
    rate_khz: u8,
    width: ChannelWidth,
    role: I2sRole,
    format: I2sFormat,
) -> Result<Option<ClockBinding>> {
    let clock = master_clock(bus, clocks, role, rate_khz, ClockTarget::Dac)?;
    bus.modify32(
        I2STX0_CTL,
        !I2STX0_CTL_MULT_SPF,
        i2s_ctl(width, role, format),
    );
    klog_info("codec", &alloc::format!("i2stx {:?} {:?}", role, format));
    Ok(clock)
}

pub fn disable_i2stx<B: RegisterBus>(bus: &B, clocks: &ClockState, clock: Option<&ClockBinding>) {
    bus.clear_bits(I2STX0_CTL, I2S_CTL_EN);
    bus.clear_bits(I2STX0_FIFOCTL, I2STX0_FIFOCTL_FIFO_IN_MASK | I2STX0_FIFOCTL_ASRC_SEL_MASK);
    if let Some(clock) = clock {
        clocks.unset_samplerate(bus, clock);
    }
}

/// Stream the SPDIF transmitter serialises.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpdifTxSource {
    Dac,
    I2s,
    /// Own FIFO fed by DMA
    Direct,
}

pub fn enable_spdiftx<B: RegisterBus>(bus: &B, source: SpdifTxSource, width: ChannelWidth) {
    let mut ctl = SPDIF_CTL_EN;
    if width == ChannelWidth::Bits24 {
        ctl |= SPDIF_CTL_WIDTH24;
    }
    ctl |= match source {
        SpdifTxSource::Dac => SPDIFTX_CTL_FROM_DAC,
        SpdifTxSource::I2s => SPDIFTX_CTL_FROM_I2S,
        SpdifTxSource::Direct => 0,
    };
    bus.write32(SPDIFTX_CTL, ctl);
}

pub fn disable_spdiftx<B: RegisterBus>(bus: &B) {
    bus.write32(SPDIFTX_CTL, 0);
}

/// Analog passthrough from the ADC input stage to the PA or line-out.
pub fn enable_aa<B: RegisterBus>(bus: &B, left_mute: bool, right_mute: bool, output: AaSource) {
    let mut bits = DAC_ANACTL_AA_EN;
    if output == AaSource::LineOut {
        bits |= DAC_ANACTL_AA_LINEOUT;
    }
    if left_mute {
        bits |= DAC_ANACTL_LMUTE;
    }
    if right_mute {
        bits |= DAC_ANACTL_RMUTE;
    }
    bus.modify32(
        DAC_ANACTL,
        DAC_ANACTL_AA_LINEOUT | DAC_ANACTL_LMUTE | DAC_ANACTL_RMUTE,
        bits,
    );
}

pub fn disable_aa<B: RegisterBus>(bus: &B) {
    bus.clear_bits(DAC_ANACTL, DAC_ANACTL_AA_EN | DAC_ANACTL_AA_LINEOUT);
}

pub fn enable_pa<P: RegisterBus + Board>(p: &P, left_mute: bool, right_mute: bool, antipop: bool) {
    if antipop {
        p.set_bits(DAC_ANACTL, DAC_ANACTL_ANTIPOP);
        p.busy_wait_us(ANTIPOP_SETTLE_US);
    }
    p.set_bits(DAC_ANACTL, DAC_ANACTL_PA_EN);
    pa_mute(p, left_mute, right_mute);
    if antipop {
        p.clear_bits(DAC_ANACTL, DAC_ANACTL_ANTIPOP);
    }
    klog_info("codec", "pa on");
}

pub fn disable_pa<P: RegisterBus + Board>(p: &P, antipop: bool) {
    if antipop {
        p.set_bits(DAC_ANACTL, DAC_ANACTL_ANTIPOP);
        p.busy_wait_us(ANTIPOP_SETTLE_US);
    }
    p.clear_bits(
        DAC_ANACTL,
        DAC_ANACTL_PA_EN | DAC_ANACTL_LMUTE | DAC_ANACTL_RMUTE | DAC_ANACTL_ANTIPOP,
    );
    klog_info("codec", "pa off");
}

pub fn pa_mute<B: RegisterBus>(bus: &B, left: bool, right: bool) {
    let mut bits = 0;
    if left {
        bits |= DAC_ANACTL_LMUTE;
    }
    if right {
        bits |= DAC_ANACTL_RMUTE;
    }
    bus.modify32(DAC_ANACTL, DAC_ANACTL_LMUTE | DAC_ANACTL_RMUTE, bits);
}

/// Select what feeds a playback FIFO (`TX_FIFO_IS_*`).
pub fn set_tx_fifo_input<B: RegisterBus>(bus: &B, fifo: AoutFifo, input: u32) {
    match fifo {
        AoutFifo::Dac0 => bus.modify32(
            DAC_FIFOCTL,
            DAC_FIFOCTL_DAF0IS_MASK,
            (input << DAC_FIFOCTL_DAF0IS_SHIFT) & DAC_FIFOCTL_DAF0IS_MASK,
        ),
        AoutFifo::Dac1 => bus.modify32(
            DAC_FIFOCTL,
            DAC_FIFOCTL_DAF1IS_MASK,
            (input << DAC_FIFOCTL_DAF1IS_SHIFT) & DAC_FIFOCTL_DAF1IS_MASK,
        ),
        AoutFifo::I2sTx0 => bus.modify32(
            I2STX0_FIFOCTL,
            I2STX0_FIFOCTL_FIFO_IN_MASK,
            (input << I2STX0_FIFOCTL_FIFO_IN_SHIFT) & I2STX0_FIFOCTL_FIFO_IN_MASK,
        ),
    }
}

/// Point I2S-TX0 at ASRC output channel `channel` (0 or 1).
pub fn set_i2stx_asrc_channel<B: RegisterBus>(bus: &B, channel: u32) {
    bus.modify32(
        I2STX0_FIFOCTL,
        I2STX0_FIFOCTL_ASRC_SEL_MASK,
        i2stx0_fifoctl_asrc_sel(channel),
    );
}

pub fn set_tx_dma_width<B: RegisterBus>(bus: &B, fifo: AoutFifo, width_bytes: u8) -> Result<()> {
    let (reg, bit) = match fifo {
        AoutFifo::I2sTx0 => (I2STX0_FIFOCTL, I2STX0_FIFOCTL_DMAWIDTH_16),
        AoutFifo::Dac0 | AoutFifo::Dac1 => (DAC_FIFOCTL, DAC_FIFOCTL_DMAWIDTH_16),
    };
    match width_bytes {
        4 => bus.clear_bits(reg, bit),
        2 => bus.set_bits(reg, bit),
        _ => {
            klog_error("codec", &alloc::format!("invalid dma width {}", width_bytes));
            return Err(AudioError::InvalidArgument);
        }
    }
    Ok(())
}

/// Samples currently buffered in a playback FIFO.
pub fn tx_fifo_level<B: RegisterBus>(bus: &B, fifo: AoutFifo) -> u32 {
    match fifo {
        AoutFifo::Dac0 => (bus.read32(DAC_STAT) & DAC_STAT_DAF0S_MASK) >> DAC_STAT_DAF0S_SHIFT,
        AoutFifo::Dac1 => (bus.read32(DAC_STAT) & DAC_STAT_DAF1S_MASK) >> DAC_STAT_DAF1S_SHIFT,
        AoutFifo::I2sTx0 => {
            (bus.read32(I2STX0_FIFOSTAT) & I2STX0_FIFOSTAT_MASK) >> I2STX0_FIFOSTAT_SHIFT
        }
    }
}

// =============================================================================
// Linkage
// =============================================================================

/// One stream driving several transmitters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Linkage {
    DacI2s,
    DacSpdif,
    DacI2sSpdif,
    I2sSpdif,
}

pub fn enable_linkage<B: RegisterBus>(bus: &B, linkage: Linkage) {
    match linkage {
        Linkage::DacI2s => bus.modify32(DAC_DIGCTL, DAC_DIGCTL_MULT_MASK, DAC_DIGCTL_MULT_I2S),
        Linkage::DacSpdif => bus.modify32(DAC_DIGCTL, DAC_DIGCTL_MULT_MASK, DAC_DIGCTL_MULT_SPF),
        Linkage::DacI2sSpdif => {
            bus.modify32(DAC_DIGCTL, DAC_DIGCTL_MULT_MASK, DAC_DIGCTL_MULT_I2SSPF)
        }
        Linkage::I2sSpdif => bus.set_bits(I2STX0_CTL, I2STX0_CTL_MULT_SPF),
    }
    klog_debug("codec", &alloc::format!("linkage {:?}", linkage));
}

pub fn disable_linkage<B: RegisterBus>(bus: &B, linkage: Linkage) {
    match linkage {
        Linkage::DacI2s | Linkage::DacSpdif | Linkage::DacI2sSpdif => {
            bus.clear_bits(DAC_DIGCTL, DAC_DIGCTL_MULT_MASK)
        }
        Linkage::I2sSpdif => bus.clear_bits(I2STX0_CTL, I2STX0_CTL_MULT_SPF),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockPlatform;

    #[test]
    fn test_channel_width() {
        assert_eq!(ChannelWidth::from_bits(16).unwrap().dma_width(), 2);
        assert_eq!(ChannelWidth::from_bits(20).unwrap().dma_width(), 4);
        assert_eq!(ChannelWidth::from_bits(24).unwrap().bits(), 24);
        assert_eq!(ChannelWidth::from_bits(32), Err(AudioError::InvalidArgument));
    }

    #[test]
    fn test_adc_enable_disable_releases_clock() {
        let p = MockPlatform::new();
        let clocks = ClockState::new();
        let gain = AdcGain {
            input_gain: 2,
            digital_gain: 3,
            force_0db: true,
        };

        enable_inputsrc(&p, InputSource::Aux1, &gain);
        let clock = enable_adc(&p, &clocks, 48, ChannelWidth::Bits24, &gain, ApllAlloc::Auto).unwrap();
        let ctl = p.peek(ADC_CTL);
        assert_eq!((ctl & ADC_CTL_SRC_MASK) >> ADC_CTL_SRC_SHIFT, 1);
        assert_eq!((ctl & ADC_CTL_INPUT_GAIN_MASK) >> ADC_CTL_INPUT_GAIN_SHIFT, 2);
        assert_ne!(ctl & ADC_CTL_WIDTH24, 0);
        assert_ne!(ctl & ADC_CTL_EN, 0);
        assert_eq!(p.peek(ADC_GAIN), 3 | ADC_GAIN_FORCE_0DB);
        assert_eq!(clocks.refcount(clock.pll), 1);

        disable_adc(&p, &clocks, &clock);
        disable_inputsrc(&p);
        assert_eq!(p.peek(ADC_CTL), 0);
        assert_eq!(clocks.refcount(clock.pll), 0);
    }

    #[test]
    fn test_i2s_slave_takes_no_clock() {
        let p = MockPlatform::new();
        let clocks = ClockState::new();
        let clock = enable_i2srx(
            &p,
            &clocks,
            I2sRxPort::Rx1,
            48,
            ChannelWidth::Bits20,
            I2sRole::Slave,
            I2sFormat::LeftJustified,
        )
        .unwrap();
        assert_eq!(clock, None);
        assert_eq!(
            p.peek(I2SRX1_CTL),
            I2S_CTL_EN | I2S_CTL_SLAVE | (1 << I2S_CTL_FMT_SHIFT) | (1 << I2S_CTL_WIDTH_SHIFT)
        );
        assert_ne!(p.peek(I2SRX1_FIFOCTL) & FIFOCTL_FIFO_RESET, 0);

        let master = enable_i2stx(&p, &clocks, 44, ChannelWidth::Bits16, I2sRole::Master, I2sFormat::I2s)
            .unwrap()
            .unwrap();
        assert_eq!(clocks.refcount(master.pll), 1);
        disable_i2stx(&p, &clocks, Some(&master));
        assert_eq!(clocks.refcount(master.pll), 0);
    }

    #[test]
    fn test_dac_rejects_i2s_fifo() {
        let p = MockPlatform::new();
        let clocks = ClockState::new();
        assert_eq!(
            enable_dac(&p, &clocks, AoutFifo::I2sTx0, 48, ChannelWidth::Bits16, false, 0),
            Err(AudioError::InvalidArgument)
        );
        assert_eq!(p.write_count(), 0);
    }

    #[test]
    fn test_dac_routes_fifo_and_gain() {
        let p = MockPlatform::new();
        let clocks = ClockState::new();
        let gain = (PA_VOLUME_DEFAULT << 8) | 0xBF;
        let clock = enable_dac(&p, &clocks, AoutFifo::Dac1, 48, ChannelWidth::Bits16, true, gain).unwrap();

        assert_eq!(p.peek(DAC_DIGCTL), DAC_DIGCTL_DAC1_EN | DAC_DIGCTL_MONO);
        assert_eq!(
            p.peek(DAC_FIFOCTL),
            (TX_FIFO_IS_DMA << DAC_FIFOCTL_DAF1IS_SHIFT) | DAC_FIFOCTL_DAF1RT
        );
        assert_eq!(get_dac_gain(&p), gain);

        dac_mute(&p, AoutFifo::Dac1, true).unwrap();
        assert_eq!(p.peek(DAC_DIGCTL) & DAC_DIGCTL_DAC1_EN, 0);
        dac_mute(&p, AoutFifo::Dac1, false).unwrap();
        assert_ne!(p.peek(DAC_DIGCTL) & DAC_DIGCTL_DAC1_EN, 0);
        assert_eq!(dac_mute(&p, AoutFifo::I2sTx0, true), Err(AudioError::Busy));

        disable_dac(&p, &clocks, AoutFifo::Dac1, &clock);
        assert_eq!(p.peek(DAC_FIFOCTL), 0);
        assert_eq!(p.peek(DAC_DIGCTL) & DAC_DIGCTL_DAC1_EN, 0);
    }

    #[test]
    fn test_dma_width_registers() {
        let p = MockPlatform::new();
        set_tx_dma_width(&p, AoutFifo::I2sTx0, 2).unwrap();
        assert_eq!(p.peek(I2STX0_FIFOCTL), I2STX0_FIFOCTL_DMAWIDTH_16);
        set_tx_dma_width(&p, AoutFifo::I2sTx0, 4).unwrap();
        assert_eq!(p.peek(I2STX0_FIFOCTL), 0);
        assert_eq!(set_tx_dma_width(&p, AoutFifo::Dac0, 3), Err(AudioError::InvalidArgument));

        set_rx_dma_width(&p, AinFifo::I2sRx1, 2).unwrap();
        assert_eq!(p.peek(I2SRX1_FIFOCTL), FIFOCTL_DMAWIDTH_16);
    }

    #[test]
    fn test_linkage_mux() {
        let p = MockPlatform::new();
        enable_linkage(&p, Linkage::DacI2sSpdif);
        assert_eq!(p.peek(DAC_DIGCTL) & DAC_DIGCTL_MULT_MASK, DAC_DIGCTL_MULT_I2SSPF);
        enable_linkage(&p, Linkage::DacSpdif);
        assert_eq!(p.peek(DAC_DIGCTL) & DAC_DIGCTL_MULT_MASK, DAC_DIGCTL_MULT_SPF);
        disable_linkage(&p, Linkage::DacSpdif);
        assert_eq!(p.peek(DAC_DIGCTL), 0);

        enable_linkage(&p, Linkage::I2sSpdif);
        assert_eq!(p.peek(I2STX0_CTL), I2STX0_CTL_MULT_SPF);
        disable_linkage(&p, Linkage::I2sSpdif);
        assert_eq!(p.peek(I2STX0_CTL), 0);
    }

    #[test]
    fn test_fifo_level_and_pa() {
        let p = MockPlatform::new();
        p.poke(DAC_STAT, (7 << DAC_STAT_DAF1S_SHIFT) | 12);
        assert_eq!(tx_fifo_level(&p, AoutFifo::Dac0), 12);
        assert_eq!(tx_fifo_level(&p, AoutFifo::Dac1), 7);

        enable_pa(&p, true, false, true);
        assert_eq!(p.peek(DAC_ANACTL), DAC_ANACTL_PA_EN | DAC_ANACTL_LMUTE);
        disable_pa(&p, false);
        assert_eq!(p.peek(DAC_ANACTL), 0);
    }
}
