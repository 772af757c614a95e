//! ADC gain translation.
//!
//! Every gain in this module, requested or tabulated, is in 0.1 dB steps
//! (`100` is 10 dB). Callers holding milli-dB convert with
//! [`gain_from_millidb`]. Each analog source has its own ascending table of
//! `(gain, input stage code, digital stage code)` rows and a request
//! resolves to the first row at or above it.

use crate::error::{AudioError, Result};
use crate::hal::InputSource;
use crate::klog::{klog_debug, klog_error};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GainMapping {
    pub gain: i16,
    pub input_gain: u8,
    pub digital_gain: u8,
}

const fn row(gain: i16, input_gain: u8, digital_gain: u8) -> GainMapping {
    GainMapping {
        gain,
        input_gain,
        digital_gain,
    }
}

/// 0.1 dB steps in one milli-dB value, truncating toward zero.
pub const fn gain_from_millidb(mdb: i32) -> i16 {
    (mdb / 100) as i16
}

pub static AMIC_GAIN_MAPPING: [GainMapping; 37] = [
    row(0, 0, 0),
    row(30, 0, 1),
    row(60, 0, 2),
    row(90, 0, 3),
    row(120, 0, 4),
    row(150, 0, 5),
    row(180, 0, 6),
    row(210, 0, 7),
    row(240, 0, 8),
    row(260, 0, 0),
    row(290, 0, 1),
    row(300, 1, 0),
    row(315, 2, 0),
    row(320, 0, 2),
    row(330, 3, 0),
    row(345, 4, 0),
    row(350, 0, 3),
    row(360, 5, 0),
    row(375, 6, 0),
    row(380, 3, 2),
    row(390, 7, 0),
    row(405, 6, 1),
    row(420, 7, 1),
    row(450, 7, 2),
    row(480, 7, 3),
    row(510, 7, 4),
    row(540, 7, 5),
    row(570, 7, 6),
    row(600, 7, 7),
    row(630, 7, 8),
    row(660, 7, 9),
    row(690, 7, 10),
    row(720, 7, 11),
    row(750, 7, 12),
    row(780, 7, 13),
    row(810, 7, 14),
    row(840, 7, 15),
];

pub static AUX_SE_GAIN_MAPPING: [GainMapping; 27] = [
    row(-120, 0, 0),
    row(-90, 0, 1),
    row(-60, 0, 2),
    row(-30, 1, 0),
    row(0, 2, 0),
    row(15, 3, 0),
    row(30, 4, 0),
    row(45, 5, 0),
    row(60, 6, 0),
    row(75, 7, 0),
    row(90, 6, 1),
    row(105, 7, 1),
    row(120, 6, 2),
    row(135, 7, 2),
    row(165, 7, 3),
    row(195, 7, 4),
    row(225, 7, 5),
    row(255, 7, 6),
    row(285, 7, 7),
    row(315, 7, 8),
    row(345, 7, 9),
    row(375, 7, 10),
    row(405, 7, 11),
    row(435, 7, 12),
    row(475, 7, 13),
    row(505, 7, 14),
    row(535, 7, 15),
];

pub static AUX_FD_GAIN_MAPPING: [GainMapping; 17] = [
    row(0, 0, 0),
    row(60, 1, 0),
    row(90, 1, 1),
    row(120, 1, 2),
    row(150, 1, 3),
    row(180, 1, 4),
    row(210, 1, 5),
    row(240, 1, 6),
    row(270, 1, 7),
    row(300, 1, 8),
    row(330, 1, 9),
    row(360, 1, 10),
    row(390, 1, 11),
    row(420, 1, 12),
    row(450, 1, 13),
    row(480, 1, 14),
    row(510, 1, 15),
];

pub static DMIC_GAIN_MAPPING: [GainMapping; 19] = [
    row(0, 0, 0),
    row(60, 1, 0),
    row(120, 2, 0),
    row(180, 3, 0),
    row(210, 3, 1),
    row(240, 3, 2),
    row(270, 3, 3),
    row(300, 3, 4),
    row(330, 3, 5),
    row(360, 3, 6),
    row(390, 3, 7),
    row(420, 3, 8),
    row(450, 3, 9),
    row(480, 3, 10),
    row(510, 3, 11),
    row(540, 3, 12),
    row(570, 3, 13),
    row(600, 3, 14),
    row(630, 3, 15),
];

/// Analog-mic gains below this also force the input stage to 0 dB
const AMIC_FORCE_0DB_BELOW: i16 = 260;

/// Ceiling lookup of `gain` in `table`.
pub fn translate(table: &[GainMapping], gain: i16) -> Result<GainMapping> {
    match table.iter().find(|m| gain <= m.gain) {
        Some(m) => {
            klog_debug(
                "codec",
                &alloc::format!("gain:{} map [{} {}]", gain, m.input_gain, m.digital_gain),
            );
            Ok(*m)
        }
        None => {
            klog_error("codec", &alloc::format!("no gain mapping for {}", gain));
            Err(AudioError::NotFound)
        }
    }
}

/// Register values for one ADC configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AdcGain {
    /// Low byte: first channel; bits 8.. carry the second channel of combined sources
    pub input_gain: u16,
    pub digital_gain: u16,
    pub force_0db: bool,
}

/// Resolve the requested channel gains for `source`.
///
/// `secondary` is the gain of the aux half of combined mic+aux sources and
/// is ignored for every other source.
pub fn translate_adc_gain(source: InputSource, primary: i16, secondary: Option<i16>) -> Result<AdcGain> {
    use InputSource::*;

    let amic = |gain: i16| -> Result<AdcGain> {
        let m = translate(&AMIC_GAIN_MAPPING, gain)?;
        Ok(AdcGain {
            input_gain: m.input_gain as u16,
            digital_gain: m.digital_gain as u16,
            force_0db: gain < AMIC_FORCE_0DB_BELOW,
        })
    };
    let simple = |table: &[GainMapping]| -> Result<AdcGain> {
        let m = translate(table, primary)?;
        Ok(AdcGain {
            input_gain: m.input_gain as u16,
            digital_gain: m.digital_gain as u16,
            force_0db: false,
        })
    };

    match source {
        Aux0 | Aux1 | Aux2 => simple(&AUX_SE_GAIN_MAPPING),
        Asemic | Afdmic => amic(primary),
        AuxFd => simple(&AUX_FD_GAIN_MAPPING),
        Dmic => simple(&DMIC_GAIN_MAPPING),
        AfdmicAuxFd | AsemicAuxFd => {
            let mut setting = amic(primary)?;
            if let Some(gain) = secondary {
                // the fully differential aux stage only has an on/off input gain
                if translate(&AUX_FD_GAIN_MAPPING, gain)?.input_gain != 0 {
                    setting.input_gain |= 1 << 8;
                }
            }
            Ok(setting)
        }
        AfdmicAux2 | AsemicAux2 => {
            let mut setting = amic(primary)?;
            if let Some(gain) = secondary {
                let aux = translate(&AUX_SE_GAIN_MAPPING, gain)?;
                setting.input_gain |= (aux.input_gain as u16) << 8;
            }
            Ok(setting)
        }
        I2s0 | I2s1 | Spdif => Ok(AdcGain::default()),
    }
}
