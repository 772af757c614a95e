//! Driver configuration.
//!
//! Session pool sizes are fixed at build time through Cargo features; the
//! board-level knobs live in [`AudioConfig`] and are handed to the device at
//! construction.

// =============================================================================
// Session Limits
// =============================================================================

pub const ADC_MAX_SESSIONS: usize = 1;
pub const DAC_MAX_SESSIONS: usize = 2;

#[cfg(feature = "i2stx0")]
pub const I2STX_MAX_SESSIONS: usize = 1;
#[cfg(not(feature = "i2stx0"))]
pub const I2STX_MAX_SESSIONS: usize = 0;

#[cfg(feature = "spdiftx")]
pub const SPDIFTX_MAX_SESSIONS: usize = 2;
#[cfg(not(feature = "spdiftx"))]
pub const SPDIFTX_MAX_SESSIONS: usize = 0;

#[cfg(feature = "i2srx0")]
pub const I2SRX0_MAX_SESSIONS: usize = 1;
#[cfg(not(feature = "i2srx0"))]
pub const I2SRX0_MAX_SESSIONS: usize = 0;

#[cfg(feature = "i2srx1")]
pub const I2SRX1_MAX_SESSIONS: usize = 1;
#[cfg(not(feature = "i2srx1"))]
pub const I2SRX1_MAX_SESSIONS: usize = 0;

#[cfg(feature = "spdifrx")]
pub const SPDIFRX_MAX_SESSIONS: usize = 1;
#[cfg(not(feature = "spdifrx"))]
pub const SPDIFRX_MAX_SESSIONS: usize = 0;

/// Input pool capacity
pub const AIN_SESSION_MAX: usize =
    ADC_MAX_SESSIONS + I2SRX0_MAX_SESSIONS + I2SRX1_MAX_SESSIONS + SPDIFRX_MAX_SESSIONS;

/// Output pool capacity
pub const AOUT_SESSION_MAX: usize = DAC_MAX_SESSIONS + I2STX_MAX_SESSIONS + SPDIFTX_MAX_SESSIONS;

/// Depth of the DMA completion queue drained by `AudioDevice::dispatch_dma_events`
pub const DMA_EVENT_QUEUE_DEPTH: usize = 16;

// =============================================================================
// Board Configuration
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum I2sRole {
    Master,
    Slave,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum I2sFormat {
    I2s,
    LeftJustified,
    RightJustified,
}

/// Output used by the analog passthrough (AA) path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AaSource {
    Pa,
    LineOut,
}

#[derive(Clone, Copy, Debug)]
pub struct AudioConfig {
    pub pa_left_mute: bool,
    pub pa_right_mute: bool,
    pub aa_source: AaSource,
    pub i2stx_role: I2sRole,
    pub i2stx_format: I2sFormat,
    pub i2srx0_role: I2sRole,
    pub i2srx0_format: I2sFormat,
    pub i2srx1_role: I2sRole,
    pub i2srx1_format: I2sFormat,
    /// PA sits behind an external amplifier driven by a board GPIO
    pub external_pa: bool,
    /// Open the PA as soon as the output device comes up
    pub poweron_open_pa: bool,
    /// Word that always reads as silence, used as the "other half" of split mono DMA
    pub sram_mute_addr: usize,
    /// DAC FIFO depth in samples; `wait_finish` waits for `level / 2 - 1`
    pub dac_fifo_level: u32,
    /// Reload-mode ASRC output uses single-address DMA (smaller start threshold)
    pub reload_sam: bool,
    /// Volume is applied on the PA rather than on the DAC digital gain
    pub volume_pa: bool,
}

impl AudioConfig {
    pub const DEFAULT: AudioConfig = AudioConfig {
        pa_left_mute: false,
        pa_right_mute: false,
        aa_source: AaSource::Pa,
        i2stx_role: I2sRole::Master,
        i2stx_format: I2sFormat::I2s,
        i2srx0_role: I2sRole::Slave,
        i2srx0_format: I2sFormat::I2s,
        i2srx1_role: I2sRole::Slave,
        i2srx1_format: I2sFormat::I2s,
        external_pa: false,
        poweron_open_pa: false,
        sram_mute_addr: 0x0003_fffc,
        dac_fifo_level: 32,
        reload_sam: false,
        volume_pa: false,
    };
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_capacity_matches_default_features() {
        assert_eq!(AIN_SESSION_MAX, 4);
        assert_eq!(AOUT_SESSION_MAX, 5);
    }

    #[test]
    fn test_default_roles() {
        let cfg = AudioConfig::default();
        assert_eq!(cfg.i2stx_role, I2sRole::Master);
        assert_eq!(cfg.i2srx0_role, I2sRole::Slave);
        assert_eq!(cfg.dac_fifo_level / 2 - 1, 15);
    }
}
