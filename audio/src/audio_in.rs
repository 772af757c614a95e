//! Capture session manager.
//!
//! Arbitrates the input session pool and drives the physical bring-up of
//! ADC/DMIC, I2S-RX0, I2S-RX1 and SPDIF-RX channels, their ring-mode DMA and
//! the optional ASRC stage between the capture FIFO and memory.
//!
//! Every entry point runs under the audio-in lock; ASRC binding additionally
//! takes the ASRC lock, which ranks below it.

use bitflags::bitflags;

use crate::asrc::input::{
    asrc_in_thresholds, close_asrc_in, open_asrc_in, prepare_asrc_in, reset_asrc_in_fifo,
    set_asrc_in_rate,
};
use crate::asrc::{asrc_status_check, init_asrc, AsrcClock, AsrcIndex, AsrcMemPolicy, AsrcMode, AsrcParams};
use crate::clock::{
    cal_asrc_rate, get_aps, set_aps, ApllAlloc, ApsMode, ApsTarget, ClockBinding, ClockTarget,
    ASRC_LEVEL_DEFAULT,
};
use crate::codec::{self, ChannelWidth, I2sRxPort};
use crate::config::{
    AIN_SESSION_MAX, ADC_MAX_SESSIONS, I2SRX0_MAX_SESSIONS, I2SRX1_MAX_SESSIONS,
    SPDIFRX_MAX_SESSIONS,
};
use crate::device::{dma_token, AudioDevice};
use crate::error::{AudioError, Result};
use crate::gain::{translate_adc_gain, AdcGain};
use crate::hal::{DmaChannel, DmaConfig, DmaDirection, DmaIrq, DmaSlot, InputSource, Platform};
use crate::klog::{klog_debug, klog_error, klog_info};
use crate::regs::{RX_FIFO_OS_ASRC, RX_FIFO_OS_DMA, RX_FIFO_OS_DSP};
use crate::session::{
    DmaCallback, PooledSession, ReloadBuffer, SessionFlags, SessionHandle, SessionPool,
};

const DMA_BURST_LEN: u8 = 8;

// =============================================================================
// Types
// =============================================================================

bitflags! {
    /// Logical input channel types.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AinChannel: u16 {
        const ADC = 1 << 0;
        const I2SRX0 = 1 << 1;
        const I2SRX1 = 1 << 2;
        const SPDIFRX = 1 << 3;
        /// Analog passthrough; routes the ADC input stage without capturing
        const AA = 1 << 4;
    }
}

/// Physical capture FIFO.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AinFifo {
    /// Shared by the ADC, DMIC and I2S-RX0
    Adc,
    /// Shared by I2S-RX1 and SPDIF-RX
    I2sRx1,
}

/// Block behind an open input session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AinKind {
    Adc,
    Dmic,
    I2sRx0,
    I2sRx1,
    Spdif,
}

/// Where the capture FIFO drains to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FifoDst {
    Dma,
    Asrc,
    Dsp,
}

/// Split layouts for a stereo capture; the unused half goes to the mute word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterleaveMode {
    LeftMonoRightMute,
    LeftMuteRightMono,
    LeftRightSeparate,
}

/// Analog front-end selection for ADC and AA sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdcSetting {
    /// Logical input device, mapped through the board table
    pub device: u16,
    /// Gain in milli-dB
    pub gain: i16,
    /// Gain of the aux half of combined mic+aux sources
    pub aux_gain: Option<i16>,
}

#[derive(Clone, Copy, Debug)]
pub struct AinParam {
    /// Exactly one [`AinChannel`] flag
    pub channel: AinChannel,
    /// Sample rate in kHz
    pub sample_rate: u8,
    /// Sample width in bits
    pub channel_width: u8,
    pub callback: Option<DmaCallback>,
    pub cb_data: usize,
    pub reload: ReloadBuffer,
    pub adc: Option<AdcSetting>,
}

/// ASRC stage requested through [`AinCommand::AsrcEnable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AsrcInSetting {
    pub mode: AsrcMode,
    pub mem_policy: AsrcMemPolicy,
    /// Clock the application side reads with (CPU, DMA or DSP)
    pub rclk: AsrcClock,
    /// Output rate in kHz
    pub output_rate: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AinInfo {
    FifoUsing,
    FifoDst,
    /// ASRC channel index, -1 when none
    AsrcUsing,
    SampleRateStatus,
    SampleRateValue,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AinCommand {
    /// Arm the DMA on start without triggering it
    SetPrepareStart,
    GetChannelInfo(AinInfo),
    SetInterleave(InterleaveMode),
    DspEnable,
    AsrcEnable(AsrcInSetting),
    SetAsrcInRate { input_rate: u8, output_rate: u8 },
    ResetAsrcFifo,
    SetAdcGain { gain: i16, aux_gain: Option<i16> },
    SetSampleRate(u8),
    GetSampleRate,
    GetApsLevel,
    SetApsLevel(i32),
    GetAsrcApsLevel,
    SetAsrcApsLevel(i32),
}

/// One open input channel.
#[derive(Clone, Copy, Debug)]
pub struct AinSession {
    flags: SessionFlags,
    channel: AinChannel,
    kind: AinKind,
    fifo: AinFifo,
    fifo_dst: FifoDst,
    source: InputSource,
    input_dev: u16,
    sample_rate: u8,
    output_rate: u8,
    width: ChannelWidth,
    dma_width: u8,
    clock: Option<ClockBinding>,
    asrc: Option<AsrcIndex>,
    dma: Option<DmaChannel>,
    dma_buf: usize,
    dma_buf_size: u32,
    data_mode: Option<InterleaveMode>,
    run: bool,
    prepare_start: bool,
    asrc_enable: bool,
    dsp_enable: bool,
    callback: Option<DmaCallback>,
    cb_data: usize,
}

impl AinSession {
    fn new(param: &AinParam, width: ChannelWidth) -> Self {
        Self {
            flags: SessionFlags::OPEN,
            channel: param.channel,
            kind: AinKind::Adc,
            fifo: AinFifo::Adc,
            fifo_dst: FifoDst::Dma,
            source: InputSource::Aux0,
            input_dev: 0,
            sample_rate: param.sample_rate,
            output_rate: param.sample_rate,
            width,
            dma_width: width.dma_width(),
            clock: None,
            asrc: None,
            dma: None,
            dma_buf: param.reload.addr,
            dma_buf_size: param.reload.len,
            data_mode: None,
            run: false,
            prepare_start: false,
            asrc_enable: false,
            dsp_enable: false,
            callback: param.callback,
            cb_data: param.cb_data,
        }
    }

    pub fn flags(&self) -> SessionFlags {
        self.flags
    }

    pub fn kind(&self) -> AinKind {
        self.kind
    }

    pub fn fifo(&self) -> AinFifo {
        self.fifo
    }

    pub fn fifo_dst(&self) -> FifoDst {
        self.fifo_dst
    }

    pub fn source(&self) -> InputSource {
        self.source
    }

    pub fn input_device(&self) -> u16 {
        self.input_dev
    }

    pub fn asrc(&self) -> Option<AsrcIndex> {
        self.asrc
    }

    pub fn dma_width(&self) -> u8 {
        self.dma_width
    }

    pub fn sample_rate(&self) -> u8 {
        self.sample_rate
    }

    pub fn is_running(&self) -> bool {
        self.run
    }

    fn aps_target(&self) -> ApsTarget {
        ApsTarget {
            sr_input: self.sample_rate,
            sr_output: self.output_rate,
            asrc: self.asrc,
            clock: self.clock,
        }
    }

    fn asrc_index(&self) -> Result<AsrcIndex> {
        match self.asrc {
            Some(index) if !index.is_output() => Ok(index),
            _ => {
                klog_error("ain", "session has no asrc input channel");
                Err(AudioError::InvalidArgument)
            }
        }
    }
}

impl PooledSession for AinSession {
    fn channel_bits(&self) -> u16 {
        self.channel.bits()
    }

    fn is_open(&self) -> bool {
        self.flags.contains(SessionFlags::OPEN)
    }
}

/// Input side of the device.
pub(crate) struct AudioIn {
    pub(crate) sessions: SessionPool<AinSession, AIN_SESSION_MAX>,
}

impl AudioIn {
    pub(crate) fn new() -> Self {
        Self {
            sessions: SessionPool::new(),
        }
    }
}

/// Types counted together and their shared limit.
fn session_limit(channel: AinChannel) -> Result<(AinChannel, usize)> {
    if channel == AinChannel::ADC || channel == AinChannel::AA {
        Ok((AinChannel::ADC | AinChannel::AA, ADC_MAX_SESSIONS))
    } else if channel == AinChannel::I2SRX0 {
        Ok((channel, I2SRX0_MAX_SESSIONS))
    } else if channel == AinChannel::I2SRX1 {
        Ok((channel, I2SRX1_MAX_SESSIONS))
    } else if channel == AinChannel::SPDIFRX {
        Ok((channel, SPDIFRX_MAX_SESSIONS))
    } else {
        klog_error("ain", &alloc::format!("invalid channel type {:?}", channel));
        Err(AudioError::InvalidArgument)
    }
}

// =============================================================================
// Session Operations
// =============================================================================

impl<P: Platform> AudioDevice<P> {
    /// Open a capture channel and bring its hardware up.
    pub fn ain_open(&self, param: &AinParam) -> Result<SessionHandle> {
        let mut ain = self.ain.lock();

        let (counted, max) = session_limit(param.channel)?;
        if ain.sessions.count_open(counted.bits()) >= max || ain.sessions.len() >= ain.sessions.capacity() {
            klog_error("ain", &alloc::format!("no free session for {:?}", param.channel));
            return Err(AudioError::NoDevice);
        }

        if param.reload.addr != 0 && param.reload.len == 0 {
            klog_error("ain", "reload buffer without length");
            return Err(AudioError::InvalidArgument);
        }

        let width = ChannelWidth::from_bits(param.channel_width)?;
        let mut session = AinSession::new(param, width);

        let enabled = if param.channel.intersects(AinChannel::ADC | AinChannel::AA) {
            self.ain_enable_adc(&mut session, param)
        } else if param.channel.intersects(AinChannel::I2SRX0 | AinChannel::I2SRX1) {
            self.ain_enable_i2srx(&mut session)
        } else {
            self.ain_enable_spdifrx(&mut session)
        };
        if let Err(e) = enabled {
            klog_error("ain", &alloc::format!("enable {:?} failed: {}", param.channel, e));
            return Err(e);
        }

        session.flags |= SessionFlags::CONFIG;
        let handle = ain.sessions.insert(session).ok_or(AudioError::NoDevice)?;
        klog_info(
            "ain",
            &alloc::format!(
                "session#{} {:?} fifo {:?} {} kHz opened",
                handle.index(),
                param.channel,
                session.fifo,
                param.sample_rate
            ),
        );
        Ok(handle)
    }

    fn ain_enable_adc(&self, s: &mut AinSession, param: &AinParam) -> Result<()> {
        let p = &self.platform;
        if s.width == ChannelWidth::Bits20 {
            klog_error("ain", "adc supports 16 or 24 bit only");
            return Err(AudioError::InvalidArgument);
        }
        let setting = param.adc.ok_or_else(|| {
            klog_error("ain", "adc setting missing");
            AudioError::InvalidArgument
        })?;

        let mapping = p.audio_device_mapping(setting.device)?;
        s.kind = if mapping.source == InputSource::Dmic { AinKind::Dmic } else { AinKind::Adc };
        s.fifo = AinFifo::Adc;
        s.source = mapping.source;
        s.input_dev = setting.device;

        let gain = translate_adc_gain(mapping.source, setting.gain, setting.aux_gain)?;

        if s.kind == AinKind::Dmic {
            s.clock = Some(codec::enable_dmic(p, &self.clocks, s.sample_rate, s.width, &gain, ApllAlloc::Auto)?);
        } else {
            codec::enable_inputsrc(p, mapping.source, &gain);
            if s.channel == AinChannel::AA {
                return Ok(());
            }
            match codec::enable_adc(p, &self.clocks, s.sample_rate, s.width, &gain, ApllAlloc::Auto) {
                Ok(clock) => s.clock = Some(clock),
                Err(e) => {
                    codec::disable_inputsrc(p);
                    return Err(e);
                }
            }
        }
        codec::set_rx_fifo_output(p, s.fifo, RX_FIFO_OS_DMA);
        Ok(())
    }

    fn ain_enable_i2srx(&self, s: &mut AinSession) -> Result<()> {
        let (port, role, format) = if s.channel == AinChannel::I2SRX0 {
            s.kind = AinKind::I2sRx0;
            s.fifo = AinFifo::Adc;
            s.source = InputSource::I2s0;
            (I2sRxPort::Rx0, self.config.i2srx0_role, self.config.i2srx0_format)
        } else {
            s.kind = AinKind::I2sRx1;
            s.fifo = AinFifo::I2sRx1;
            s.source = InputSource::I2s1;
            (I2sRxPort::Rx1, self.config.i2srx1_role, self.config.i2srx1_format)
        };

        s.clock = codec::enable_i2srx(&self.platform, &self.clocks, port, s.sample_rate, s.width, role, format)?;
        codec::set_rx_fifo_output(&self.platform, s.fifo, RX_FIFO_OS_DMA);
        Ok(())
    }

    fn ain_enable_spdifrx(&self, s: &mut AinSession) -> Result<()> {
        if s.width == ChannelWidth::Bits20 {
            klog_error("ain", "spdifrx supports 16 or 24 bit only");
            return Err(AudioError::InvalidArgument);
        }
        s.kind = AinKind::Spdif;
        s.fifo = AinFifo::I2sRx1;
        s.source = InputSource::Spdif;
        codec::enable_spdifrx(&self.platform, s.width);
        codec::set_rx_fifo_output(&self.platform, s.fifo, RX_FIFO_OS_DMA);
        Ok(())
    }

    /// Tear the channel down and free its slot, DMA and ASRC channel.
    pub fn ain_close(&self, handle: SessionHandle) -> Result<()> {
        let mut ain = self.ain.lock();
        let s = ain.sessions.remove(handle)?;
        let p = &self.platform;

        match s.kind {
            AinKind::Dmic => {
                if let Some(clock) = &s.clock {
                    codec::disable_dmic(p, &self.clocks, clock);
                }
            }
            AinKind::Adc => {
                if let Some(clock) = &s.clock {
                    codec::disable_adc(p, &self.clocks, clock);
                }
                codec::disable_inputsrc(p);
            }
            AinKind::I2sRx0 => codec::disable_i2srx(p, &self.clocks, I2sRxPort::Rx0, s.clock.as_ref()),
            AinKind::I2sRx1 => codec::disable_i2srx(p, &self.clocks, I2sRxPort::Rx1, s.clock.as_ref()),
            AinKind::Spdif => codec::disable_spdifrx(p),
        }

        if let Some(chan) = s.dma {
            let _ = p.dma_stop(chan);
            p.dma_free(chan);
        }

        if s.asrc_enable {
            if let Some(index) = s.asrc {
                self.ain_asrc_close(index)?;
            }
        }

        klog_info("ain", &alloc::format!("session#{} closed", handle.index()));
        Ok(())
    }

    fn ain_asrc_close(&self, index: AsrcIndex) -> Result<()> {
        let mut asrc = self.asrc.lock();
        match asrc.release(index) {
            Some(ram) => close_asrc_in(&self.platform, ram, self.clocks.dac_rate_khz()),
            None => {
                klog_error("ain", &alloc::format!("{:?} was not bound", index));
                Err(AudioError::InvalidArgument)
            }
        }
    }

    /// Arm the ring DMA; a second call on a started session does nothing.
    pub fn ain_start(&self, handle: SessionHandle) -> Result<()> {
        let mut ain = self.ain.lock();
        let s = ain.sessions.get_mut(handle)?;

        if s.flags.contains(SessionFlags::START) {
            return Ok(());
        }
        if s.channel == AinChannel::AA {
            klog_error("ain", "analog passthrough has no data path");
            return Err(AudioError::NotSupported);
        }
        if !self.platform.dma_present() {
            klog_error("ain", "no dma controller");
            return Err(AudioError::Io);
        }

        let chan = match self.ain_dma_prepare(s, handle) {
            Ok(chan) => chan,
            Err(e) => {
                klog_error("ain", &alloc::format!("dma prepare failed: {}", e));
                return Err(AudioError::AccessDenied);
            }
        };

        if s.source == InputSource::I2s1 {
            codec::restart_i2srx1_fifo(&self.platform);
        }

        let started = if s.prepare_start {
            self.platform.dma_prepare_start(chan).map(|_| ())
        } else {
            self.platform.dma_start(chan)
        };
        if let Err(e) = started {
            klog_error("ain", &alloc::format!("dma start failed: {}", e));
            return Err(e);
        }
        s.run = true;
        s.flags |= SessionFlags::START;
        Ok(())
    }

    fn ain_dma_prepare(&self, s: &mut AinSession, handle: SessionHandle) -> Result<DmaChannel> {
        let p = &self.platform;
        if s.run {
            klog_error("ain", "dma already running");
            return Err(AudioError::Io);
        }

        let chan = match s.dma {
            Some(chan) => chan,
            None => p.dma_request().ok_or(AudioError::NoDevice)?,
        };
        s.dma = Some(chan);

        let slot = match s.fifo_dst {
            FifoDst::Asrc => match s.asrc {
                Some(AsrcIndex::In0) => DmaSlot::AsrcFifo0,
                Some(AsrcIndex::In1) => DmaSlot::AsrcFifo1,
                _ => return Err(AudioError::InvalidArgument),
            },
            FifoDst::Dma => match s.fifo {
                AinFifo::Adc => DmaSlot::AdcFifo,
                AinFifo::I2sRx1 => DmaSlot::I2s,
            },
            FifoDst::Dsp => {
                klog_error("ain", "fifo drains to the dsp");
                return Err(AudioError::InvalidArgument);
            }
        };

        let notify = s.callback.is_some();
        let config = DmaConfig {
            direction: DmaDirection::PeripheralToMemory,
            slot,
            width: s.dma_width,
            burst_len: DMA_BURST_LEN,
            interleaved: s.data_mode.is_some(),
            reload: true,
            sam: false,
            half_complete_irq: notify,
            complete_irq: notify,
            callback_token: if notify { Some(dma_token(handle, false)) } else { None },
            src: 0,
            dst: 0,
            len: 0,
        };
        p.dma_config(chan, &config)?;
        codec::set_rx_dma_width(p, s.fifo, s.dma_width)?;

        let mute = self.config.sram_mute_addr;
        let (buf, size) = (s.dma_buf, s.dma_buf_size);
        match s.data_mode {
            Some(InterleaveMode::LeftMonoRightMute) => p.dma_reload(chan, mute, buf, size * 2)?,
            Some(InterleaveMode::LeftRightSeparate) => {
                p.dma_reload(chan, buf + size as usize, buf, size * 2)?
            }
            Some(InterleaveMode::LeftMuteRightMono) => p.dma_reload(chan, buf, mute, size * 2)?,
            None => p.dma_reload(chan, 0, buf, size)?,
        }

        klog_debug("ain", &alloc::format!("dma {:?} slot {:?} mode {:?}", chan, slot, s.data_mode));
        Ok(chan)
    }

    /// Stop the DMA; the channel stays configured for the next start.
    pub fn ain_stop(&self, handle: SessionHandle) -> Result<()> {
        let mut ain = self.ain.lock();
        let s = ain.sessions.get_mut(handle)?;

        if let Some(chan) = s.dma {
            if self.platform.dma_present() {
                self.platform.dma_stop(chan)?;
            }
        }
        s.run = false;
        s.flags.remove(SessionFlags::START);
        Ok(())
    }

    /// Snapshot of an open session.
    pub fn ain_session(&self, handle: SessionHandle) -> Result<AinSession> {
        self.ain.lock().sessions.get(handle).copied()
    }

    /// Session control; value-returning commands report through the `i32`.
    pub fn ain_control(&self, handle: SessionHandle, cmd: AinCommand) -> Result<i32> {
        let mut ain = self.ain.lock();
        let s = ain.sessions.get_mut(handle)?;
        let p = &self.platform;

        match cmd {
            AinCommand::SetPrepareStart => {
                s.prepare_start = true;
                klog_info("ain", "enable prepare dma start");
                Ok(0)
            }
            AinCommand::GetChannelInfo(info) => Ok(match info {
                AinInfo::FifoUsing => s.fifo as i32,
                AinInfo::FifoDst => s.fifo_dst as i32,
                AinInfo::AsrcUsing => s.asrc.filter(|i| !i.is_output()).map_or(-1, |i| i as i32),
                AinInfo::SampleRateStatus => (s.sample_rate != 0) as i32,
                AinInfo::SampleRateValue => s.sample_rate as i32,
            }),
            AinCommand::SetInterleave(mode) => {
                s.data_mode = Some(mode);
                Ok(0)
            }
            AinCommand::DspEnable => {
                if s.asrc_enable {
                    klog_error("ain", "fifo already routed to asrc");
                    return Err(AudioError::PermissionDenied);
                }
                s.fifo_dst = FifoDst::Dsp;
                codec::set_rx_fifo_output(p, s.fifo, RX_FIFO_OS_DSP);
                s.dsp_enable = true;
                Ok(0)
            }
            AinCommand::AsrcEnable(setting) => self.ain_asrc_enable(s, &setting).map(|_| 0),
            AinCommand::SetAsrcInRate { input_rate, output_rate } => {
                let index = s.asrc_index()?;
                set_asrc_in_rate(p, index, cal_asrc_rate(input_rate, output_rate, ASRC_LEVEL_DEFAULT))?;
                Ok(0)
            }
            AinCommand::ResetAsrcFifo => {
                let index = s.asrc_index()?;
                reset_asrc_in_fifo(p, index)?;
                Ok(0)
            }
            AinCommand::SetAdcGain { gain, aux_gain } => {
                if !matches!(s.kind, AinKind::Adc | AinKind::Dmic) {
                    return Err(unsupported(cmd));
                }
                let setting: AdcGain = translate_adc_gain(s.source, gain, aux_gain)?;
                if s.channel == AinChannel::AA {
                    codec::enable_inputsrc(p, s.source, &setting);
                } else {
                    codec::set_adc_gain(p, &setting);
                }
                Ok(0)
            }
            AinCommand::SetSampleRate(rate) => {
                if !matches!(s.kind, AinKind::Adc | AinKind::Dmic) || s.channel == AinChannel::AA {
                    return Err(unsupported(cmd));
                }
                if let Some(clock) = s.clock.take() {
                    self.clocks.unset_samplerate(p, &clock);
                }
                s.clock = Some(self.clocks.set_samplerate(p, rate, ClockTarget::Adc, ApllAlloc::Auto)?);
                s.sample_rate = rate;
                Ok(0)
            }
            AinCommand::GetSampleRate => Ok(s.sample_rate as i32),
            AinCommand::GetApsLevel => Ok(get_aps(p, &s.aps_target(), ApsMode::AudioPll)?.unwrap_or(-1)),
            AinCommand::SetApsLevel(level) => set_aps(p, &s.aps_target(), level, ApsMode::AudioPll).map(|_| 0),
            AinCommand::GetAsrcApsLevel => Ok(get_aps(p, &s.aps_target(), ApsMode::Asrc)?.unwrap_or(-1)),
            AinCommand::SetAsrcApsLevel(level) => set_aps(p, &s.aps_target(), level, ApsMode::Asrc).map(|_| 0),
        }
    }

    fn ain_asrc_enable(&self, s: &mut AinSession, setting: &AsrcInSetting) -> Result<()> {
        let p = &self.platform;
        klog_info(
            "ain",
            &alloc::format!(
                "enable asrc mode {:?} policy {:?} rclk {:?} out {} kHz",
                setting.mode,
                setting.mem_policy,
                setting.rclk,
                setting.output_rate
            ),
        );

        if s.dsp_enable {
            klog_error("ain", "fifo already routed to dsp");
            return Err(AudioError::PermissionDenied);
        }
        if s.asrc_enable {
            klog_error("ain", "asrc already enabled");
            return Err(AudioError::Busy);
        }
        if !setting.rclk.is_application_side() {
            klog_error("ain", &alloc::format!("invalid asrc read clock {:?}", setting.rclk));
            return Err(AudioError::InvalidArgument);
        }
        if !matches!(setting.mem_policy, AsrcMemPolicy::Auto | AsrcMemPolicy::LowLatency) {
            klog_error("ain", &alloc::format!("invalid asrc policy {:?}", setting.mem_policy));
            return Err(AudioError::InvalidArgument);
        }

        let ram = prepare_asrc_in(p, s.fifo, setting.mem_policy)?;
        let (hfull, hempty) = asrc_in_thresholds(ram)?;
        let dec = cal_asrc_rate(s.sample_rate, setting.output_rate, ASRC_LEVEL_DEFAULT);
        let params = AsrcParams {
            ram,
            wclk: match s.fifo {
                AinFifo::Adc => AsrcClock::I2sRx0,
                AinFifo::I2sRx1 => AsrcClock::I2sRx1,
            },
            rclk: setting.rclk,
            mode: setting.mode,
            dma_width_bits: s.dma_width as u32 * 8,
            dec0: dec,
            dec1: dec,
            hfull,
            hempty,
        };

        {
            let mut asrc = self.asrc.lock();
            if !asrc_status_check(p, None) {
                init_asrc(p);
            }
            asrc.reserve(ram)?;
            if let Err(e) = open_asrc_in(p, &params, self.clocks.dac_rate_khz()) {
                asrc.release(ram.channel());
                return Err(e);
            }
        }

        s.fifo_dst = FifoDst::Asrc;
        codec::set_rx_fifo_output(p, s.fifo, RX_FIFO_OS_ASRC);
        s.asrc = Some(ram.channel());
        s.output_rate = setting.output_rate;
        s.asrc_enable = true;
        Ok(())
    }

    /// Completion bookkeeping for an input DMA interrupt.
    pub(crate) fn ain_dma_event(&self, handle: SessionHandle, _reason: DmaIrq) -> Option<(DmaCallback, usize)> {
        let ain = self.ain.lock();
        let s = ain.sessions.get(handle).ok()?;
        s.callback.map(|cb| (cb, s.cb_data))
    }
}

fn unsupported(cmd: AinCommand) -> AudioError {
    klog_error("ain", &alloc::format!("unsupported command {:?}", cmd));
    AudioError::NotSupported
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asrc::AsrcRam;
    use crate::config::AudioConfig;
    use crate::regs::*;
    use crate::testutil::{DmaCall, MockPlatform};

    fn noop(_data: usize, _reason: DmaIrq) {}

    fn adc_param(device: u16) -> AinParam {
        AinParam {
            channel: AinChannel::ADC,
            sample_rate: 48,
            channel_width: 16,
            callback: Some(noop),
            cb_data: 0,
            reload: ReloadBuffer { addr: 0x2000_0000, len: 512 },
            adc: Some(AdcSetting { device, gain: 0, aux_gain: None }),
        }
    }

    fn param(channel: AinChannel) -> AinParam {
        AinParam {
            channel,
            adc: None,
            ..adc_param(0)
        }
    }

    fn device() -> AudioDevice<MockPlatform> {
        AudioDevice::new(MockPlatform::new(), AudioConfig::DEFAULT)
    }

    fn src_enable() -> AinCommand {
        AinCommand::AsrcEnable(AsrcInSetting {
            mode: AsrcMode::Src,
            mem_policy: AsrcMemPolicy::Auto,
            rclk: AsrcClock::Dma,
            output_rate: 44,
        })
    }

    #[test]
    fn test_open_adc_aux_single_ended() {
        let dev = device();
        dev.platform().map_device(3, InputSource::Aux1);

        let h = dev.ain_open(&adc_param(3)).unwrap();
        let s = dev.ain_session(h).unwrap();
        assert!(s.flags().contains(SessionFlags::OPEN | SessionFlags::CONFIG));
        assert_eq!(s.kind(), AinKind::Adc);
        assert_eq!(s.fifo(), AinFifo::Adc);
        assert_eq!(s.dma_width(), 2);

        let ctl = dev.platform().peek(ADC_CTL);
        assert_eq!((ctl & ADC_CTL_INPUT_GAIN_MASK) >> ADC_CTL_INPUT_GAIN_SHIFT, 2);
        assert_eq!(dev.platform().peek(ADC_GAIN) & ADC_GAIN_DIGITAL_MASK, 0);
        assert_ne!(ctl & ADC_CTL_EN, 0);
    }

    #[test]
    fn test_open_validation() {
        let dev = device();
        let mut bad = adc_param(0);
        bad.reload.len = 0;
        assert_eq!(dev.ain_open(&bad), Err(AudioError::InvalidArgument));

        let mut bad = adc_param(0);
        bad.channel_width = 20;
        assert_eq!(dev.ain_open(&bad), Err(AudioError::InvalidArgument));

        assert_eq!(
            dev.ain_open(&param(AinChannel::ADC | AinChannel::I2SRX1)),
            Err(AudioError::InvalidArgument)
        );
        assert_eq!(dev.ain_open(&param(AinChannel::ADC)), Err(AudioError::InvalidArgument));
    }

    #[test]
    fn test_type_limit() {
        let dev = device();
        dev.ain_open(&adc_param(0)).unwrap();
        assert_eq!(dev.ain_open(&adc_param(0)), Err(AudioError::NoDevice));

        let mut aa = adc_param(0);
        aa.channel = AinChannel::AA;
        assert_eq!(dev.ain_open(&aa), Err(AudioError::NoDevice));

        dev.ain_open(&param(AinChannel::I2SRX1)).unwrap();
        assert_eq!(dev.ain_open(&param(AinChannel::SPDIFRX)).map(|_| ()), Ok(()));
    }

    #[test]
    fn test_dmic_source() {
        let dev = device();
        dev.platform().map_device(1, InputSource::Dmic);
        let h = dev.ain_open(&adc_param(1)).unwrap();
        assert_eq!(dev.ain_session(h).unwrap().kind(), AinKind::Dmic);
        assert_ne!(dev.platform().peek(ADC_CTL) & ADC_CTL_DMIC_EN, 0);

        dev.ain_close(h).unwrap();
        assert_eq!(dev.platform().peek(ADC_CTL) & (ADC_CTL_DMIC_EN | ADC_CTL_EN), 0);
    }

    #[test]
    fn test_asrc_enable_allocates_in_order() {
        let dev = device();
        let adc = dev.ain_open(&adc_param(0)).unwrap();
        dev.ain_control(adc, src_enable()).unwrap();
        assert_eq!(dev.asrc_bound(AsrcIndex::In0), Some(AsrcRam::InP2));
        assert_eq!(dev.ain_session(adc).unwrap().fifo_dst(), FifoDst::Asrc);
        assert_eq!(dev.ain_control(adc, AinCommand::GetChannelInfo(AinInfo::AsrcUsing)), Ok(2));

        let rx1 = dev.ain_open(&param(AinChannel::I2SRX1)).unwrap();
        dev.ain_control(rx1, src_enable()).unwrap();
        assert_eq!(dev.asrc_bound(AsrcIndex::In1), Some(AsrcRam::In1P3));
        assert_eq!(dev.ain_session(rx1).unwrap().asrc(), Some(AsrcIndex::In1));
    }

    #[test]
    fn test_asrc_enable_rejects_bad_setting() {
        let dev = device();
        let h = dev.ain_open(&adc_param(0)).unwrap();
        let mut setting = AsrcInSetting {
            mode: AsrcMode::Asrc,
            mem_policy: AsrcMemPolicy::Subwoofer,
            rclk: AsrcClock::Dma,
            output_rate: 48,
        };
        assert_eq!(dev.ain_control(h, AinCommand::AsrcEnable(setting)), Err(AudioError::InvalidArgument));

        setting.mem_policy = AsrcMemPolicy::Auto;
        setting.rclk = AsrcClock::Dac;
        assert_eq!(dev.ain_control(h, AinCommand::AsrcEnable(setting)), Err(AudioError::InvalidArgument));

        let s = dev.ain_session(h).unwrap();
        assert_eq!(s.fifo_dst(), FifoDst::Dma);
        assert_eq!(dev.asrc_bound(AsrcIndex::In0), None);
    }

    #[test]
    fn test_close_releases_asrc() {
        let dev = device();
        let h = dev.ain_open(&adc_param(0)).unwrap();
        dev.ain_control(h, src_enable()).unwrap();
        assert!(asrc_status_check(dev.platform(), Some(AsrcIndex::In0)));

        dev.ain_close(h).unwrap();
        assert!(!asrc_status_check(dev.platform(), Some(AsrcIndex::In0)));
        assert_eq!(dev.asrc_bound(AsrcIndex::In0), None);
        assert_eq!(dev.clocks.refcount(crate::clock::AudioPll::Pll0), 0);
    }

    #[test]
    fn test_stale_close_faults_without_writes() {
        let dev = device();
        let h = dev.ain_open(&adc_param(0)).unwrap();
        dev.ain_close(h).unwrap();

        let before = dev.platform().write_count();
        assert_eq!(dev.ain_close(h), Err(AudioError::Fault));
        assert_eq!(dev.platform().write_count(), before);
    }

    #[test]
    fn test_dsp_and_asrc_exclusive() {
        let dev = device();
        let h = dev.ain_open(&adc_param(0)).unwrap();
        dev.ain_control(h, src_enable()).unwrap();
        assert_eq!(dev.ain_control(h, AinCommand::DspEnable), Err(AudioError::PermissionDenied));

        let rx1 = dev.ain_open(&param(AinChannel::I2SRX1)).unwrap();
        dev.ain_control(rx1, AinCommand::DspEnable).unwrap();
        assert_eq!(dev.ain_control(rx1, src_enable()), Err(AudioError::PermissionDenied));
        let os = dev.platform().peek(I2SRX1_FIFOCTL) & RX_FIFO_OS_MASK;
        assert_eq!(os >> RX_FIFO_OS_SHIFT, RX_FIFO_OS_DSP);
    }

    #[test]
    fn test_start_is_idempotent() {
        let dev = device();
        let h = dev.ain_open(&adc_param(0)).unwrap();
        dev.ain_start(h).unwrap();
        let calls = dev.platform().dma_calls().len();
        assert!(dev.ain_session(h).unwrap().is_running());

        dev.ain_start(h).unwrap();
        assert_eq!(dev.platform().dma_calls().len(), calls);

        let config = dev.platform().last_dma_config().unwrap();
        assert_eq!(config.slot, DmaSlot::AdcFifo);
        assert_eq!(config.direction, DmaDirection::PeripheralToMemory);
        assert!(config.reload && config.complete_irq);
        assert!(dev.platform().dma_calls().contains(&DmaCall::Reload(0, 0, 0x2000_0000, 512)));
    }

    #[test]
    fn test_split_mono_reload() {
        let dev = device();
        let h = dev.ain_open(&adc_param(0)).unwrap();
        dev.ain_control(h, AinCommand::SetInterleave(InterleaveMode::LeftMonoRightMute)).unwrap();
        dev.ain_start(h).unwrap();

        let mute = AudioConfig::DEFAULT.sram_mute_addr;
        assert!(dev.platform().dma_calls().contains(&DmaCall::Reload(0, mute, 0x2000_0000, 1024)));
        assert!(dev.platform().last_dma_config().unwrap().interleaved);
    }

    #[test]
    fn test_start_without_dma() {
        let dev = device();
        dev.platform().set_dma_present(false);
        let h = dev.ain_open(&adc_param(0)).unwrap();
        assert_eq!(dev.ain_start(h), Err(AudioError::Io));
    }

    #[test]
    fn test_failed_start_leaves_session_idle() {
        let dev = device();
        let h = dev.ain_open(&adc_param(0)).unwrap();
        dev.platform().fail_dma_start(true);
        assert_eq!(dev.ain_start(h), Err(AudioError::Io));
        let s = dev.ain_session(h).unwrap();
        assert!(!s.is_running());
        assert!(!s.flags().contains(SessionFlags::START));

        dev.platform().fail_dma_start(false);
        dev.ain_start(h).unwrap();
        assert!(dev.ain_session(h).unwrap().is_running());
    }

    #[test]
    fn test_stop_then_restart() {
        let dev = device();
        let h = dev.ain_open(&param(AinChannel::I2SRX1)).unwrap();
        dev.ain_start(h).unwrap();
        dev.ain_stop(h).unwrap();
        assert!(!dev.ain_session(h).unwrap().is_running());

        dev.ain_start(h).unwrap();
        let starts = dev.platform().dma_calls().iter().filter(|c| matches!(c, DmaCall::Start(_))).count();
        assert_eq!(starts, 2);
        assert_eq!(dev.platform().busy_waits(), alloc::vec![100, 100]);
    }

    #[test]
    fn test_generic_commands() {
        let dev = device();
        let h = dev.ain_open(&adc_param(0)).unwrap();
        assert_eq!(dev.ain_control(h, AinCommand::GetSampleRate), Ok(48));
        dev.ain_control(h, AinCommand::SetSampleRate(16)).unwrap();
        assert_eq!(dev.ain_control(h, AinCommand::GetChannelInfo(AinInfo::SampleRateValue)), Ok(16));
        assert_eq!(dev.ain_control(h, AinCommand::ResetAsrcFifo), Err(AudioError::InvalidArgument));

        let spdif = dev.ain_open(&param(AinChannel::SPDIFRX)).unwrap();
        assert_eq!(
            dev.ain_control(spdif, AinCommand::SetAdcGain { gain: 0, aux_gain: None }),
            Err(AudioError::NotSupported)
        );
    }
}
