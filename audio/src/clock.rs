//! Audio clock bookkeeping.
//!
//! Two audio PLLs feed the DAC and ADC dividers. Each PLL is locked to one
//! sample-rate family (44.1 kHz or 48 kHz) by its first user and keeps that
//! family until its reference count drops back to zero.
//!
//! Also home to the rate math shared by the session managers: ASRC
//! decimation ratios, APS (clock nudge) levels, kHz/Hz codes and DAC volume
//! levels.

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::asrc::AsrcIndex;
use crate::error::{AudioError, Result};
use crate::hal::RegisterBus;
use crate::klog::{klog_debug, klog_error, klog_warning};
use crate::regs::*;

// =============================================================================
// Rate Math
// =============================================================================

/// Q20 "1.0" decimation ratio
pub const ASRC_DEC_UNITY: u32 = 1_048_576;
/// 44.1 kHz in, 48 kHz out
pub const ASRC_DEC_44_TO_48: u32 = 963_380;

pub const ASRC_LEVEL_DEFAULT: i32 = 3;
/// Number of ordinary drift levels
pub const ASRC_MAX_LEVEL: i32 = 8;
pub const ASRC_LEVEL_SLOWEST: i32 = 0xE0;
pub const ASRC_LEVEL_SLOWER: i32 = 0xE1;
pub const ASRC_LEVEL_FASTER: i32 = 0xE2;
pub const ASRC_LEVEL_FASTEST: i32 = 0xE3;

/// Number of PLL APS levels per family
pub const APS_LEVEL_MAX: i32 = 8;
pub const APS_LEVEL_1: i32 = 0;

const fn aps_table(base: u32) -> [u32; 12] {
    [
        base - 2500,
        base - 2000,
        base - 1000,
        base,
        base + 1000,
        base + 2000,
        base + 2500,
        base + 10000,
        // jitter correction points reached through the SLOWEST..FASTEST levels
        base - 15000,
        base - 10000,
        base + 10000,
        base + 15000,
    ]
}

static APS_PARAM: [u32; 12] = aps_table(ASRC_DEC_UNITY);
static APS_PARAM_48K: [u32; 12] = aps_table(ASRC_DEC_44_TO_48);

/// Q20 decimation ratio for converting `sr_input` kHz into `sr_output` kHz.
///
/// Equal codes and the 44 -> 48 pair come from the tuned tables at
/// `aps_level`; anything else is the plain ratio of the two rates.
pub fn cal_asrc_rate(sr_input: u8, sr_output: u8, aps_level: i32) -> u32 {
    let level = aps_level.clamp(0, APS_PARAM.len() as i32 - 1) as usize;

    if sr_input == sr_output {
        APS_PARAM[level]
    } else if sr_input == 44 && sr_output == 48 {
        APS_PARAM_48K[level]
    } else {
        let out = sample_rate_hz(sr_output) as u64;
        if out == 0 {
            return ASRC_DEC_UNITY;
        }
        (sample_rate_hz(sr_input) as u64 * ASRC_DEC_UNITY as u64 / out) as u32
    }
}

/// kHz code to Hz; codes that are multiples of 11 belong to the 44.1 kHz family.
pub fn sample_rate_hz(khz: u8) -> u32 {
    match khz {
        0 => 0,
        k if k % 11 == 0 => (k as u32 / 11) * 11025,
        k => k as u32 * 1000,
    }
}

/// Hz to kHz code, the inverse of [`sample_rate_hz`].
pub fn sample_rate_khz(hz: u32) -> u32 {
    match hz {
        0 => 0,
        h if h % 11025 == 0 => h / 11025 * 11,
        h => h / 1000,
    }
}

const DAC_VOL_STEP_MDB: i32 = 375;
const DAC_VOL_0DB_LEVEL: i32 = 0xBF;

/// Milli-dB to DAC volume level, saturating at mute (0) and at 0xFF.
pub fn dac_volume_db_to_level(vol_mdb: i32) -> u8 {
    let index = vol_mdb.unsigned_abs() as i32 / DAC_VOL_STEP_MDB;
    if vol_mdb < 0 {
        if index > DAC_VOL_0DB_LEVEL {
            0
        } else {
            (DAC_VOL_0DB_LEVEL - index) as u8
        }
    } else if index > 0x40 {
        0xFF
    } else {
        (DAC_VOL_0DB_LEVEL + index) as u8
    }
}

pub fn dac_volume_level_to_db(level: u8) -> i32 {
    (level as i32 - DAC_VOL_0DB_LEVEL) * DAC_VOL_STEP_MDB
}

// =============================================================================
// PLL Registers
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioPll {
    Pll0,
    Pll1,
}

impl AudioPll {
    const fn ctl(self) -> usize {
        match self {
            AudioPll::Pll0 => AUDIO_PLL0_CTL,
            AudioPll::Pll1 => AUDIO_PLL1_CTL,
        }
    }

    const fn slot(self) -> usize {
        self as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleSeries {
    Khz44,
    Khz48,
}

impl SampleSeries {
    const fn code(self) -> u8 {
        match self {
            SampleSeries::Khz44 => 0,
            SampleSeries::Khz48 => 1,
        }
    }

    const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SampleSeries::Khz44),
            1 => Some(SampleSeries::Khz48),
            _ => None,
        }
    }
}

const SERIES_NONE: u8 = 0xFF;

/// PLL selection requested by a caller of [`ClockState::set_samplerate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ApllAlloc {
    #[default]
    Auto,
    Pll0,
    Pll1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockTarget {
    Dac,
    Adc,
}

/// Family a PLL is currently locked to, `None` while disabled.
pub fn check_audiopll<B: RegisterBus>(bus: &B, pll: AudioPll) -> Option<SampleSeries> {
    let ctl = bus.read32(pll.ctl());
    if ctl & APLL_EN == 0 {
        None
    } else if (ctl & APLL_APS_MASK) >> APLL_APS_SHIFT >= APLL_APS_48K_MIN {
        Some(SampleSeries::Khz48)
    } else {
        Some(SampleSeries::Khz44)
    }
}

/// Enable `pll` in integer mode at the nominal APS of `series`.
pub fn config_audiopll<B: RegisterBus>(bus: &B, pll: AudioPll, series: SampleSeries) {
    let aps = match series {
        SampleSeries::Khz44 => APLL_APS_44K,
        SampleSeries::Khz48 => APLL_APS_48K,
    };
    bus.modify32(pll.ctl(), APLL_MODE | APLL_APS_MASK, APLL_EN | (aps << APLL_APS_SHIFT));
}

// 256fs divider tables; 0 marks an unused slot
const SAMPLERATE_PREDIV_1: [u8; 14] = [192, 96, 64, 48, 32, 24, 16, 176, 88, 0, 44, 0, 22, 0];
const SAMPLERATE_PREDIV_2: [u8; 14] = [96, 48, 32, 24, 16, 12, 8, 88, 44, 0, 22, 0, 11, 0];
const SERIES_44K_FIRST_INDEX: u32 = 7;

/// Clock a channel was programmed with; handed back on teardown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockBinding {
    pub pll: AudioPll,
    pub series: SampleSeries,
    pub rate_khz: u8,
}

struct PllRecord {
    series: AtomicU8,
    refcnt: AtomicU32,
}

impl PllRecord {
    const fn new() -> Self {
        Self {
            series: AtomicU8::new(SERIES_NONE),
            refcnt: AtomicU32::new(0),
        }
    }
}

/// Reference counts of both PLLs plus the last DAC rate.
pub struct ClockState {
    plls: [PllRecord; 2],
    dac_rate: AtomicU8,
}

impl ClockState {
    pub const fn new() -> Self {
        Self {
            plls: [PllRecord::new(), PllRecord::new()],
            dac_rate: AtomicU8::new(0),
        }
    }

    /// Program the DAC or ADC clock for `rate_khz`, picking (and pinning) a PLL.
    pub fn set_samplerate<B: RegisterBus>(
        &self,
        bus: &B,
        rate_khz: u8,
        target: ClockTarget,
        apll: ApllAlloc,
    ) -> Result<ClockBinding> {
        let (mut index, prediv) = lookup_divider(rate_khz).ok_or_else(|| {
            klog_error("apll", &alloc::format!("unsupported sample rate {} kHz", rate_khz));
            AudioError::InvalidArgument
        })?;

        let series = if index >= SERIES_44K_FIRST_INDEX {
            index -= SERIES_44K_FIRST_INDEX;
            SampleSeries::Khz44
        } else {
            SampleSeries::Khz48
        };

        let usable = |pll: AudioPll| match check_audiopll(bus, pll) {
            None => true,
            Some(current) => current == series,
        };

        let pll = match apll {
            ApllAlloc::Auto => {
                if usable(AudioPll::Pll0) {
                    AudioPll::Pll0
                } else if usable(AudioPll::Pll1) {
                    AudioPll::Pll1
                } else {
                    klog_error("apll", "no audio pll available");
                    return Err(AudioError::Busy);
                }
            }
            ApllAlloc::Pll0 | ApllAlloc::Pll1 => {
                let pll = if apll == ApllAlloc::Pll0 { AudioPll::Pll0 } else { AudioPll::Pll1 };
                if !usable(pll) {
                    klog_error("apll", &alloc::format!("{:?} is already in use", pll));
                    return Err(AudioError::Busy);
                }
                pll
            }
        };

        config_audiopll(bus, pll, series);

        let src_from_pll1 = (pll == AudioPll::Pll1) as u32;
        let (src_bit, div_mask, div_shift, prediv_bit) = match target {
            ClockTarget::Dac => (
                ADDACLK_DACCLKSRC,
                ADDACLK_DACCLKDIV_MASK,
                ADDACLK_DACCLKDIV_SHIFT,
                ADDACLK_DACCLKPREDIV,
            ),
            ClockTarget::Adc => (
                ADDACLK_ADCCLKSRC,
                ADDACLK_ADCCLKDIV_MASK,
                ADDACLK_ADCCLKDIV_SHIFT,
                ADDACLK_ADCCLKPREDIV,
            ),
        };
        bus.modify32(CMU_ADDACLK, 1 << src_bit, src_from_pll1 << src_bit);
        bus.modify32(
            CMU_ADDACLK,
            div_mask | (1 << prediv_bit),
            (index << div_shift) | (prediv << prediv_bit),
        );

        if target == ClockTarget::Dac {
            self.dac_rate.store(rate_khz, Ordering::Release);
        }
        self.inc_refcnt(pll, series);

        klog_debug("apll", &alloc::format!("addaclk 0x{:x}", bus.read32(CMU_ADDACLK)));
        Ok(ClockBinding {
            pll,
            series,
            rate_khz,
        })
    }

    /// Drop the PLL reference taken by [`Self::set_samplerate`].
    pub fn unset_samplerate<B: RegisterBus>(&self, bus: &B, binding: &ClockBinding) {
        self.dec_refcnt(bus, binding.pll);
    }

    pub fn inc_refcnt(&self, pll: AudioPll, series: SampleSeries) {
        let record = &self.plls[pll.slot()];
        let count = record.refcnt.fetch_add(1, Ordering::AcqRel) + 1;
        record.series.store(series.code(), Ordering::Release);
        klog_debug("apll", &alloc::format!("{:?} use {:?} cnt {}", pll, series, count));
    }

    /// Release one reference; the last one switches the PLL off.
    pub fn dec_refcnt<B: RegisterBus>(&self, bus: &B, pll: AudioPll) {
        let record = &self.plls[pll.slot()];
        critical_section::with(|_| {
            let count = record.refcnt.load(Ordering::Acquire);
            if count == 0 {
                klog_warning("apll", &alloc::format!("{:?} released while unused", pll));
                return;
            }
            record.refcnt.store(count - 1, Ordering::Release);
            if count == 1 {
                bus.clear_bits(pll.ctl(), APLL_EN);
                record.series.store(SERIES_NONE, Ordering::Release);
            }
            klog_debug("apll", &alloc::format!("{:?} unuse cnt {}", pll, count - 1));
        });
    }

    pub fn refcount(&self, pll: AudioPll) -> u32 {
        self.plls[pll.slot()].refcnt.load(Ordering::Acquire)
    }

    /// Family recorded by the current users of `pll`
    pub fn series(&self, pll: AudioPll) -> Option<SampleSeries> {
        SampleSeries::from_code(self.plls[pll.slot()].series.load(Ordering::Acquire))
    }

    /// Last DAC rate programmed, used to size the ASRC module clock.
    pub fn dac_rate_khz(&self) -> Option<u8> {
        match self.dac_rate.load(Ordering::Acquire) {
            0 => None,
            rate => Some(rate),
        }
    }
}

impl Default for ClockState {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup_divider(rate_khz: u8) -> Option<(u32, u32)> {
    if rate_khz == 0 {
        return None;
    }
    if let Some(index) = SAMPLERATE_PREDIV_1.iter().position(|r| *r == rate_khz) {
        return Some((index as u32, 0));
    }
    SAMPLERATE_PREDIV_2
        .iter()
        .position(|r| *r == rate_khz)
        .map(|index| (index as u32, 1))
}

// =============================================================================
// APS Adjustment
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApsMode {
    /// Nudge the PLL feeding the channel
    AudioPll,
    /// Nudge the decimation ratio of the channel's ASRC
    Asrc,
}

/// Channel state an APS adjustment works on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ApsTarget {
    pub sr_input: u8,
    pub sr_output: u8,
    pub asrc: Option<AsrcIndex>,
    pub clock: Option<ClockBinding>,
}

pub fn set_aps<B: RegisterBus>(bus: &B, target: &ApsTarget, value: i32, mode: ApsMode) -> Result<()> {
    match mode {
        ApsMode::Asrc => {
            let level = match value {
                ASRC_LEVEL_SLOWEST..=ASRC_LEVEL_FASTEST => value - ASRC_LEVEL_SLOWEST + ASRC_MAX_LEVEL,
                v if !(0..ASRC_MAX_LEVEL).contains(&v) => ASRC_LEVEL_DEFAULT,
                v => v,
            };
            let dec = cal_asrc_rate(target.sr_input, target.sr_output, level);
            klog_debug(
                "apll",
                &alloc::format!(
                    "sr_input:{} sr_output:{} level:{} dec:{}",
                    target.sr_input,
                    target.sr_output,
                    level,
                    dec
                ),
            );
            let index = target.asrc.ok_or(AudioError::Busy)?;
            bus.write32(index.regs().dec0, dec);
        }
        ApsMode::AudioPll => {
            let mut level = if (0..APS_LEVEL_MAX).contains(&value) { value } else { APS_LEVEL_1 };
            let clock = target.clock.ok_or_else(|| {
                klog_error("apll", "channel not using an audio pll");
                AudioError::Busy
            })?;
            if clock.series == SampleSeries::Khz48 {
                level += APS_LEVEL_MAX;
            }
            bus.modify32(clock.pll.ctl(), APLL_APS_MASK, (level as u32) << APLL_APS_SHIFT);
        }
    }
    Ok(())
}

/// Current APS level; `Ok(None)` when the ASRC ratio is not a table value.
pub fn get_aps<B: RegisterBus>(bus: &B, target: &ApsTarget, mode: ApsMode) -> Result<Option<i32>> {
    match mode {
        ApsMode::Asrc => {
            let index = target.asrc.ok_or_else(|| {
                klog_error("apll", "channel not using asrc");
                AudioError::Busy
            })?;
            let dec = bus.read32(index.regs().dec0);
            let table = if target.sr_input == target.sr_output { &APS_PARAM } else { &APS_PARAM_48K };
            Ok(table[..ASRC_MAX_LEVEL as usize]
                .iter()
                .position(|v| *v == dec)
                .map(|level| level as i32))
        }
        ApsMode::AudioPll => {
            let clock = target.clock.ok_or_else(|| {
                klog_error("apll", "channel not using an audio pll");
                AudioError::Busy
            })?;
            let mut level = ((bus.read32(clock.pll.ctl()) & APLL_APS_MASK) >> APLL_APS_SHIFT) as i32;
            if clock.series == SampleSeries::Khz48 && level >= APS_LEVEL_MAX {
                level -= APS_LEVEL_MAX;
            }
            Ok(Some(level))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockPlatform;

    #[test]
    fn test_identity_rate_is_unity() {
        for rate in [8u8, 11, 12, 16, 22, 24, 32, 44, 48, 96] {
            assert_eq!(cal_asrc_rate(rate, rate, ASRC_LEVEL_DEFAULT), ASRC_DEC_UNITY);
        }
        assert_eq!(cal_asrc_rate(48, 48, ASRC_LEVEL_DEFAULT), 1_048_576);
        assert_eq!(cal_asrc_rate(44, 48, ASRC_LEVEL_DEFAULT), 963_380);
    }

    #[test]
    fn test_general_ratio() {
        assert_eq!(cal_asrc_rate(16, 48, ASRC_LEVEL_DEFAULT), ASRC_DEC_UNITY / 3);
        assert_eq!(cal_asrc_rate(96, 48, ASRC_LEVEL_DEFAULT), ASRC_DEC_UNITY * 2);
        // only the exact 44 -> 48 pair uses the tuned table
        assert_eq!(cal_asrc_rate(22, 48, 0), (22050u64 * 1_048_576 / 48000) as u32);
    }

    #[test]
    fn test_levels_are_monotonic() {
        let drift: alloc::vec::Vec<u32> = (0..ASRC_MAX_LEVEL).map(|l| cal_asrc_rate(48, 48, l)).collect();
        assert!(drift.windows(2).all(|w| w[0] < w[1]));

        let jitter: alloc::vec::Vec<u32> = (ASRC_MAX_LEVEL..ASRC_MAX_LEVEL + 4)
            .map(|l| cal_asrc_rate(44, 48, l))
            .collect();
        assert!(jitter.windows(2).all(|w| w[0] < w[1]));

        let max_drift = ASRC_DEC_UNITY - cal_asrc_rate(48, 48, 0);
        let slowest = ASRC_DEC_UNITY - cal_asrc_rate(48, 48, ASRC_MAX_LEVEL);
        assert!(slowest > max_drift);
    }

    #[test]
    fn test_sample_rate_codes() {
        assert_eq!(sample_rate_hz(44), 44100);
        assert_eq!(sample_rate_hz(11), 11025);
        assert_eq!(sample_rate_hz(48), 48000);
        assert_eq!(sample_rate_hz(0), 0);
        assert_eq!(sample_rate_khz(44100), 44);
        assert_eq!(sample_rate_khz(176400), 176);
        assert_eq!(sample_rate_khz(16000), 16);
        assert_eq!(sample_rate_khz(0), 0);
    }

    #[test]
    fn test_dac_volume_levels() {
        assert_eq!(dac_volume_db_to_level(0), 0xBF);
        assert_eq!(dac_volume_db_to_level(-375), 0xBE);
        assert_eq!(dac_volume_db_to_level(-100_000), 0);
        assert_eq!(dac_volume_db_to_level(24_000), 0xFF);
        assert_eq!(dac_volume_level_to_db(0xBE), -375);
        assert_eq!(dac_volume_level_to_db(dac_volume_db_to_level(-12_000)), -12_000);
    }

    #[test]
    fn test_set_samplerate_programs_divider() {
        let p = MockPlatform::new();
        let clocks = ClockState::new();
        let binding = clocks.set_samplerate(&p, 48, ClockTarget::Dac, ApllAlloc::Auto).unwrap();
        assert_eq!(binding.pll, AudioPll::Pll0);
        assert_eq!(binding.series, SampleSeries::Khz48);
        assert_eq!(p.peek(AUDIO_PLL0_CTL), APLL_EN | APLL_APS_48K);
        assert_eq!(p.peek(CMU_ADDACLK) & ADDACLK_DACCLKDIV_MASK, 3);
        assert_eq!(clocks.refcount(AudioPll::Pll0), 1);
        assert_eq!(clocks.dac_rate_khz(), Some(48));

        // 11 kHz sits in the halved table, 44.1k family
        let adc = clocks.set_samplerate(&p, 11, ClockTarget::Adc, ApllAlloc::Auto).unwrap();
        assert_eq!(adc.pll, AudioPll::Pll1);
        let addaclk = p.peek(CMU_ADDACLK);
        assert_eq!((addaclk & ADDACLK_ADCCLKDIV_MASK) >> ADDACLK_ADCCLKDIV_SHIFT, 5);
        assert_ne!(addaclk & (1 << ADDACLK_ADCCLKPREDIV), 0);
        assert_ne!(addaclk & (1 << ADDACLK_ADCCLKSRC), 0);
    }

    #[test]
    fn test_set_samplerate_rejects_unknown_rate() {
        let p = MockPlatform::new();
        let clocks = ClockState::new();
        assert_eq!(
            clocks.set_samplerate(&p, 50, ClockTarget::Dac, ApllAlloc::Auto),
            Err(AudioError::InvalidArgument)
        );
        assert_eq!(
            clocks.set_samplerate(&p, 0, ClockTarget::Dac, ApllAlloc::Auto),
            Err(AudioError::InvalidArgument)
        );
        assert_eq!(p.write_count(), 0);
    }

    #[test]
    fn test_pll_series_conflict() {
        let p = MockPlatform::new();
        let clocks = ClockState::new();
        clocks.set_samplerate(&p, 44, ClockTarget::Adc, ApllAlloc::Pll0).unwrap();
        assert_eq!(clocks.series(AudioPll::Pll0), Some(SampleSeries::Khz44));

        assert_eq!(
            clocks.set_samplerate(&p, 48, ClockTarget::Dac, ApllAlloc::Pll0),
            Err(AudioError::Busy)
        );
        let binding = clocks.set_samplerate(&p, 48, ClockTarget::Dac, ApllAlloc::Auto).unwrap();
        assert_eq!(binding.pll, AudioPll::Pll1);

        // both families taken
        assert_eq!(
            clocks.set_samplerate(&p, 32, ClockTarget::Dac, ApllAlloc::Pll0),
            Err(AudioError::Busy)
        );
        assert!(clocks.set_samplerate(&p, 22, ClockTarget::Adc, ApllAlloc::Auto).is_ok());
        assert_eq!(clocks.refcount(AudioPll::Pll0), 2);
    }

    #[test]
    fn test_last_release_disables_pll() {
        let p = MockPlatform::new();
        let clocks = ClockState::new();
        let a = clocks.set_samplerate(&p, 48, ClockTarget::Dac, ApllAlloc::Auto).unwrap();
        let b = clocks.set_samplerate(&p, 16, ClockTarget::Adc, ApllAlloc::Auto).unwrap();
        assert_eq!(a.pll, b.pll);

        clocks.unset_samplerate(&p, &a);
        assert_ne!(p.peek(AUDIO_PLL0_CTL) & APLL_EN, 0);
        clocks.unset_samplerate(&p, &b);
        assert_eq!(p.peek(AUDIO_PLL0_CTL) & APLL_EN, 0);
        assert_eq!(clocks.series(AudioPll::Pll0), None);

        // unbalanced release is ignored
        clocks.dec_refcnt(&p, AudioPll::Pll0);
        assert_eq!(clocks.refcount(AudioPll::Pll0), 0);

        // now free for the other family
        let c = clocks.set_samplerate(&p, 44, ClockTarget::Dac, ApllAlloc::Pll0).unwrap();
        assert_eq!(c.series, SampleSeries::Khz44);
    }

    #[test]
    fn test_aps_asrc_round_trip() {
        let p = MockPlatform::new();
        let target = ApsTarget {
            sr_input: 44,
            sr_output: 48,
            asrc: Some(AsrcIndex::Out0),
            clock: None,
        };
        set_aps(&p, &target, 5, ApsMode::Asrc).unwrap();
        assert_eq!(p.peek(ASRC_OUT0.dec0), ASRC_DEC_44_TO_48 + 2000);
        assert_eq!(get_aps(&p, &target, ApsMode::Asrc), Ok(Some(5)));

        // out of range falls back to the default level
        set_aps(&p, &target, 42, ApsMode::Asrc).unwrap();
        assert_eq!(get_aps(&p, &target, ApsMode::Asrc), Ok(Some(ASRC_LEVEL_DEFAULT)));

        // jitter slots are not reported back
        set_aps(&p, &target, ASRC_LEVEL_FASTEST, ApsMode::Asrc).unwrap();
        assert_eq!(p.peek(ASRC_OUT0.dec0), ASRC_DEC_44_TO_48 + 15000);
        assert_eq!(get_aps(&p, &target, ApsMode::Asrc), Ok(None));

        let unbound = ApsTarget { asrc: None, ..target };
        assert_eq!(set_aps(&p, &unbound, 1, ApsMode::Asrc), Err(AudioError::Busy));
    }

    #[test]
    fn test_aps_pll_offsets_48k_family() {
        let p = MockPlatform::new();
        let clocks = ClockState::new();
        let clock = clocks.set_samplerate(&p, 48, ClockTarget::Dac, ApllAlloc::Auto).unwrap();
        let target = ApsTarget {
            sr_input: 48,
            sr_output: 48,
            asrc: None,
            clock: Some(clock),
        };

        set_aps(&p, &target, 2, ApsMode::AudioPll).unwrap();
        assert_eq!(p.peek(AUDIO_PLL0_CTL) & APLL_APS_MASK, 10);
        assert_eq!(get_aps(&p, &target, ApsMode::AudioPll), Ok(Some(2)));
        assert_eq!(check_audiopll(&p, AudioPll::Pll0), Some(SampleSeries::Khz48));

        set_aps(&p, &target, 9, ApsMode::AudioPll).unwrap();
        assert_eq!(get_aps(&p, &target, ApsMode::AudioPll), Ok(Some(APS_LEVEL_1)));
    }
}
