//! Audio block register map.
//!
//! Addresses are absolute; every access goes through [`crate::hal::RegisterBus`].
//!
//! # Blocks
//! - CMU: peripheral clock/reset, ADC/DAC dividers, audio PLLs, RAM clock routing
//! - ASRC: four channel blocks (in0, in1, out0, out1) plus shared clock/irq registers
//! - ADC, DAC (+PA), I2S-TX0, I2S-RX0/RX1, SPDIF-TX, SPDIF-RX

// =============================================================================
// CMU
// =============================================================================

pub const CMU_BASE: usize = 0xC000_1000;

pub const CMU_DEVCLKEN: usize = CMU_BASE + 0x04;
/// Peripheral reset control; a set bit releases the block from reset
pub const CMU_DEVRST: usize = CMU_BASE + 0x08;
pub const CMU_ADDACLK: usize = CMU_BASE + 0x10;
pub const AUDIO_PLL0_CTL: usize = CMU_BASE + 0x40;
pub const AUDIO_PLL1_CTL: usize = CMU_BASE + 0x44;
pub const CMU_MEMCLKEN: usize = CMU_BASE + 0x50;
pub const CMU_MEMCLKSEL: usize = CMU_BASE + 0x54;

pub const DEVCLKEN_ASRC: u32 = 1 << 16;
pub const DEVRST_ASRC: u32 = 1 << 16;

// CMU_ADDACLK fields
pub const ADDACLK_DACCLKDIV_SHIFT: u32 = 0;
pub const ADDACLK_DACCLKDIV_MASK: u32 = 0x7 << ADDACLK_DACCLKDIV_SHIFT;
pub const ADDACLK_DACCLKPREDIV: u32 = 3;
/// DAC clock from PLL1 when set
pub const ADDACLK_DACCLKSRC: u32 = 4;
pub const ADDACLK_ADCCLKDIV_SHIFT: u32 = 8;
pub const ADDACLK_ADCCLKDIV_MASK: u32 = 0x7 << ADDACLK_ADCCLKDIV_SHIFT;
pub const ADDACLK_ADCCLKPREDIV: u32 = 11;
/// ADC clock from PLL1 when set
pub const ADDACLK_ADCCLKSRC: u32 = 12;

// AUDIO_PLLx_CTL fields
pub const APLL_APS_SHIFT: u32 = 0;
pub const APLL_APS_MASK: u32 = 0x1F << APLL_APS_SHIFT;
pub const APLL_EN: u32 = 1 << 8;
pub const APLL_MODE: u32 = 1 << 9;
/// APS value locking a PLL to the 44.1 kHz family
pub const APLL_APS_44K: u32 = 0x04;
/// APS value locking a PLL to the 48 kHz family
pub const APLL_APS_48K: u32 = 0x0C;
/// APS values at or above this belong to the 48 kHz family
pub const APLL_APS_48K_MIN: u32 = 8;

// CMU_MEMCLKEN / CMU_MEMCLKSEL: per-bank bits live in `asrc::RAM_BANKS`
pub const MEMCLKEN_ASRCBUF0: u32 = 1 << 12;
pub const MEMCLKSEL_ASRCBUF0: u32 = 1 << 16;

// =============================================================================
// ASRC
// =============================================================================

pub const ASRC_BASE: usize = 0xC005_0000;

/// Register addresses of one ASRC channel block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AsrcChannelRegs {
    pub ctl: usize,
    pub dec0: usize,
    pub dec1: usize,
    pub lgain: usize,
    pub rgain: usize,
    /// Pending bits (write-back clears) and remaining-sample count
    pub ip: usize,
    pub thres_hf: usize,
    pub thres_he: usize,
    pub dmactl: usize,
    pub wfifo: usize,
    /// Output channels only
    pub st_level: usize,
    /// Output channels only
    pub int_thres: usize,
}

const fn asrc_channel(offset: usize) -> AsrcChannelRegs {
    let base = ASRC_BASE + offset;
    AsrcChannelRegs {
        ctl: base,
        dec0: base + 0x04,
        dec1: base + 0x08,
        lgain: base + 0x0C,
        rgain: base + 0x10,
        ip: base + 0x14,
        thres_hf: base + 0x18,
        thres_he: base + 0x1C,
        dmactl: base + 0x20,
        wfifo: base + 0x24,
        st_level: base + 0x28,
        int_thres: base + 0x2C,
    }
}

pub const ASRC_IN0: AsrcChannelRegs = asrc_channel(0x000);
pub const ASRC_IN1: AsrcChannelRegs = asrc_channel(0x040);
pub const ASRC_OUT0: AsrcChannelRegs = asrc_channel(0x080);
pub const ASRC_OUT1: AsrcChannelRegs = asrc_channel(0x0C0);

pub const ASRC_CLK_CTL: usize = ASRC_BASE + 0x100;
pub const ASRC_INT_EN: usize = ASRC_BASE + 0x104;
pub const ASRC_INT_PD: usize = ASRC_BASE + 0x108;

// ASRC_xx_CTL fields (same layout on all four channels)
pub const ASRC_CTL_MODESEL_ASRC: u32 = 1 << 0;
pub const ASRC_CTL_CHEN: u32 = 1 << 1;
pub const ASRC_CTL_BYPASSEN_SHIFT: u32 = 2;
pub const ASRC_CTL_WCLKSEL_SHIFT: u32 = 6;
pub const ASRC_CTL_WCLKSEL_MASK: u32 = 0x3 << ASRC_CTL_WCLKSEL_SHIFT;
pub const ASRC_CTL_RCLKSEL_SHIFT: u32 = 8;
pub const ASRC_CTL_RCLKSEL_MASK: u32 = 0x3 << ASRC_CTL_RCLKSEL_SHIFT;
/// Coefficient table select, in0 only; clear selects the 512-entry table
pub const ASRC_CTL_TABLESEL: u32 = 1 << 10;
pub const ASRC_CTL_RESETWFIFO: u32 = 1 << 11;
pub const ASRC_CTL_RESETRFIFO: u32 = 1 << 12;
pub const ASRC_CTL_AVERAGENUM_SHIFT: u32 = 16;
pub const ASRC_CTL_AVERAGENUM_MASK: u32 = 0x3 << ASRC_CTL_AVERAGENUM_SHIFT;
pub const ASRC_CTL_RAMSEL_SHIFT: u32 = 20;
pub const ASRC_CTL_RAMSEL_MASK: u32 = 0x7 << ASRC_CTL_RAMSEL_SHIFT;

#[inline]
pub const fn asrc_ctl_averagenum(n: u32) -> u32 {
    (n << ASRC_CTL_AVERAGENUM_SHIFT) & ASRC_CTL_AVERAGENUM_MASK
}

// Write clock select encodings
pub const ASRC_WCLK_CPU: u32 = 0;
pub const ASRC_OUT_WCLK_DMA: u32 = 1;
pub const ASRC_OUT_WCLK_DSP: u32 = 2;
pub const ASRC_IN_WCLK_I2SRX0: u32 = 1;
pub const ASRC_IN_WCLK_I2SRX1: u32 = 2;

// Read clock select encodings
pub const ASRC_RCLK_CPU: u32 = 0;
pub const ASRC_OUT_RCLK_DAC: u32 = 1;
pub const ASRC_OUT_RCLK_I2S: u32 = 2;
pub const ASRC_IN_RCLK_DMA: u32 = 1;
pub const ASRC_IN_RCLK_DSP: u32 = 2;

// ASRC_xx_DMACTL data width
pub const ASRC_DATAWIDTH_16BIT: u32 = 0x01;
pub const ASRC_DATAWIDTH_24BIT: u32 = 0x10;

// ASRC_xx_IP
pub const ASRC_IP_REMAIN_SHIFT: u32 = 16;
pub const ASRC_IP_REMAIN_MASK: u32 = 0x1FFF;

// ASRC_CLK_CTL channel enables
pub const ASRC_CLK_IN0: u32 = 1 << 0;
pub const ASRC_CLK_IN1: u32 = 1 << 1;
pub const ASRC_CLK_OUT0: u32 = 1 << 2;
pub const ASRC_CLK_OUT1: u32 = 1 << 3;
pub const ASRC_CLK_ALL: u32 = 0x0F;

// ASRC_INT_EN / ASRC_INT_PD: out0 and out1 threshold interrupts
pub const ASRC_INT_OUT_MASK: u32 = 0x6;

// =============================================================================
// ADC
// =============================================================================

pub const ADC_BASE: usize = 0xC005_1000;

pub const ADC_CTL: usize = ADC_BASE + 0x00;
pub const ADC_GAIN: usize = ADC_BASE + 0x04;
pub const ADC_FIFOCTL: usize = ADC_BASE + 0x08;

pub const ADC_CTL_EN: u32 = 1 << 0;
pub const ADC_CTL_DMIC_EN: u32 = 1 << 1;
pub const ADC_CTL_WIDTH24: u32 = 1 << 2;
pub const ADC_CTL_INPUTSRC_EN: u32 = 1 << 3;
pub const ADC_CTL_SRC_SHIFT: u32 = 4;
pub const ADC_CTL_SRC_MASK: u32 = 0xF << ADC_CTL_SRC_SHIFT;
pub const ADC_CTL_INPUT_GAIN_SHIFT: u32 = 16;
pub const ADC_CTL_INPUT_GAIN_MASK: u32 = 0xFFFF << ADC_CTL_INPUT_GAIN_SHIFT;

pub const ADC_GAIN_DIGITAL_SHIFT: u32 = 0;
pub const ADC_GAIN_DIGITAL_MASK: u32 = 0xF << ADC_GAIN_DIGITAL_SHIFT;
pub const ADC_GAIN_FORCE_0DB: u32 = 1 << 8;

// Output select shared by ADC_FIFOCTL.ADFOS and I2SRX1_FIFOCTL.RXFOS
pub const RX_FIFO_OS_SHIFT: u32 = 0;
pub const RX_FIFO_OS_MASK: u32 = 0x3 << RX_FIFO_OS_SHIFT;
pub const RX_FIFO_OS_CPU: u32 = 0;
pub const RX_FIFO_OS_DMA: u32 = 1;
pub const RX_FIFO_OS_ASRC: u32 = 2;
pub const RX_FIFO_OS_DSP: u32 = 3;
/// DMA beat is 16 bit when set, 32 bit when clear
pub const FIFOCTL_DMAWIDTH_16: u32 = 1 << 4;
/// FIFO released from reset when set
pub const FIFOCTL_FIFO_RESET: u32 = 1 << 5;

// =============================================================================
// DAC / PA
// =============================================================================

pub const DAC_BASE: usize = 0xC005_2000;

pub const DAC_DIGCTL: usize = DAC_BASE + 0x00;
pub const DAC_FIFOCTL: usize = DAC_BASE + 0x04;
pub const DAC_STAT: usize = DAC_BASE + 0x08;
pub const DAC_VOL: usize = DAC_BASE + 0x0C;
pub const DAC_ANACTL: usize = DAC_BASE + 0x10;
pub const DAC_PAVOL: usize = DAC_BASE + 0x14;

pub const DAC_DIGCTL_DAC0_EN: u32 = 1 << 0;
pub const DAC_DIGCTL_DAC1_EN: u32 = 1 << 1;
pub const DAC_DIGCTL_MONO: u32 = 1 << 2;
pub const DAC_DIGCTL_WIDTH24: u32 = 1 << 3;
pub const DAC_DIGCTL_MULT_SHIFT: u32 = 8;
pub const DAC_DIGCTL_MULT_MASK: u32 = 0x3 << DAC_DIGCTL_MULT_SHIFT;
pub const DAC_DIGCTL_MULT_I2S: u32 = 1 << DAC_DIGCTL_MULT_SHIFT;
pub const DAC_DIGCTL_MULT_SPF: u32 = 2 << DAC_DIGCTL_MULT_SHIFT;
pub const DAC_DIGCTL_MULT_I2SSPF: u32 = 3 << DAC_DIGCTL_MULT_SHIFT;

// DAC FIFO input select (DAF0IS / DAF1IS); ASRC means ASRC0 on FIFO0 and ASRC1 on FIFO1
pub const DAC_FIFOCTL_DAF0IS_SHIFT: u32 = 0;
pub const DAC_FIFOCTL_DAF0IS_MASK: u32 = 0x3 << DAC_FIFOCTL_DAF0IS_SHIFT;
pub const DAC_FIFOCTL_DAF1IS_SHIFT: u32 = 4;
pub const DAC_FIFOCTL_DAF1IS_MASK: u32 = 0x3 << DAC_FIFOCTL_DAF1IS_SHIFT;
pub const TX_FIFO_IS_CPU: u32 = 0;
pub const TX_FIFO_IS_DMA: u32 = 1;
pub const TX_FIFO_IS_ASRC: u32 = 2;
pub const TX_FIFO_IS_DSP: u32 = 3;
pub const DAC_FIFOCTL_DMAWIDTH_16: u32 = 1 << 8;
pub const DAC_FIFOCTL_DAF0RT: u32 = 1 << 9;
pub const DAC_FIFOCTL_DAF1RT: u32 = 1 << 10;

pub const DAC_STAT_DAF0S_SHIFT: u32 = 0;
pub const DAC_STAT_DAF0S_MASK: u32 = 0x3F << DAC_STAT_DAF0S_SHIFT;
pub const DAC_STAT_DAF1S_SHIFT: u32 = 8;
pub const DAC_STAT_DAF1S_MASK: u32 = 0x3F << DAC_STAT_DAF1S_SHIFT;

pub const DAC_VOL_LEFT_SHIFT: u32 = 0;
pub const DAC_VOL_RIGHT_SHIFT: u32 = 8;
pub const DAC_VOL_MASK: u32 = 0xFF;

pub const DAC_ANACTL_PA_EN: u32 = 1 << 0;
pub const DAC_ANACTL_LMUTE: u32 = 1 << 1;
pub const DAC_ANACTL_RMUTE: u32 = 1 << 2;
pub const DAC_ANACTL_AA_EN: u32 = 1 << 3;
pub const DAC_ANACTL_AA_SRC_SHIFT: u32 = 4;
pub const DAC_ANACTL_AA_SRC_MASK: u32 = 0x7 << DAC_ANACTL_AA_SRC_SHIFT;
/// AA path drives line-out instead of the PA
pub const DAC_ANACTL_AA_LINEOUT: u32 = 1 << 7;
pub const DAC_ANACTL_ANTIPOP: u32 = 1 << 8;

pub const PA_VOL_MASK: u32 = 0x3F;
/// PA level used when the volume is applied on the DAC digital gain
pub const PA_VOLUME_DEFAULT: u32 = 0x28;

// =============================================================================
// I2S-TX0
// =============================================================================

pub const I2STX_BASE: usize = 0xC005_3000;

pub const I2STX0_CTL: usize = I2STX_BASE + 0x00;
pub const I2STX0_FIFOCTL: usize = I2STX_BASE + 0x04;
pub const I2STX0_FIFOSTAT: usize = I2STX_BASE + 0x08;

pub const I2STX0_FIFOCTL_FIFO_IN_SHIFT: u32 = 0;
pub const I2STX0_FIFOCTL_FIFO_IN_MASK: u32 = 0x3 << I2STX0_FIFOCTL_FIFO_IN_SHIFT;
pub const I2STX0_FIFOCTL_ASRC_SEL_SHIFT: u32 = 2;
pub const I2STX0_FIFOCTL_ASRC_SEL_MASK: u32 = 1 << I2STX0_FIFOCTL_ASRC_SEL_SHIFT;
pub const I2STX0_FIFOCTL_DMAWIDTH_16: u32 = 1 << 4;
pub const I2STX0_FIFOSTAT_SHIFT: u32 = 0;
pub const I2STX0_FIFOSTAT_MASK: u32 = 0x3F << I2STX0_FIFOSTAT_SHIFT;

/// Route I2S-TX0 from ASRC output channel `n`
#[inline]
pub const fn i2stx0_fifoctl_asrc_sel(n: u32) -> u32 {
    (n << I2STX0_FIFOCTL_ASRC_SEL_SHIFT) & I2STX0_FIFOCTL_ASRC_SEL_MASK
}

// =============================================================================
// I2S-RX0 / I2S-RX1
// =============================================================================

pub const I2SRX_BASE: usize = 0xC005_4000;

pub const I2SRX0_CTL: usize = I2SRX_BASE + 0x00;
pub const I2SRX1_CTL: usize = I2SRX_BASE + 0x10;
pub const I2SRX1_FIFOCTL: usize = I2SRX_BASE + 0x14;

// Shared by I2STX0_CTL, I2SRX0_CTL and I2SRX1_CTL
pub const I2S_CTL_EN: u32 = 1 << 0;
pub const I2S_CTL_SLAVE: u32 = 1 << 1;
pub const I2S_CTL_FMT_SHIFT: u32 = 2;
pub const I2S_CTL_FMT_MASK: u32 = 0x3 << I2S_CTL_FMT_SHIFT;
pub const I2S_CTL_WIDTH_SHIFT: u32 = 4;
pub const I2S_CTL_WIDTH_MASK: u32 = 0x3 << I2S_CTL_WIDTH_SHIFT;
/// I2S-TX0 only: SPDIF-TX clocked from the I2S stream
pub const I2STX0_CTL_MULT_SPF: u32 = 1 << 8;

// =============================================================================
// SPDIF
// =============================================================================

pub const SPDIFTX_CTL: usize = 0xC005_5000;
pub const SPDIFRX_CTL: usize = 0xC005_6000;

pub const SPDIF_CTL_EN: u32 = 1 << 0;
pub const SPDIF_CTL_WIDTH24: u32 = 1 << 1;
/// SPDIF-TX only: data taken from the DAC FIFO
pub const SPDIFTX_CTL_FROM_DAC: u32 = 1 << 2;
/// SPDIF-TX only: data taken from the I2S-TX0 FIFO
pub const SPDIFTX_CTL_FROM_I2S: u32 = 1 << 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asrc_blocks_do_not_overlap() {
        let blocks = [ASRC_IN0, ASRC_IN1, ASRC_OUT0, ASRC_OUT1];
        for pair in blocks.windows(2) {
            assert!(pair[0].int_thres < pair[1].ctl);
        }
        assert!(ASRC_OUT1.int_thres < ASRC_CLK_CTL);
    }

    #[test]
    fn test_averagenum_scaling() {
        assert_eq!(asrc_ctl_averagenum(1) >> ASRC_CTL_AVERAGENUM_SHIFT, 1);
        assert_eq!(i2stx0_fifoctl_asrc_sel(1), 1 << 2);
        assert_eq!(i2stx0_fifoctl_asrc_sel(0), 0);
    }
}
