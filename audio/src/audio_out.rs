//! Playback session manager.
//!
//! Arbitrates the output session pool, brings up DAC, I2S-TX, SPDIF-TX and
//! analog passthrough channels (alone or linked so one stream drives several
//! transmitters), and owns the shared PA state.
//!
//! Output DMA runs either in reload mode, where one ring is re-armed by the
//! hardware, or in direct mode, where every [`AudioDevice::aout_write`] arms
//! one transfer. Completion is handled by [`AudioDevice::dispatch_dma_events`].

use bitflags::bitflags;

use crate::asrc::output::{
    asrc_out_changed_samples, asrc_out_fifo_size, asrc_out_layout, asrc_out_rclk, asrc_out_remain_samples,
    close_asrc_out, get_asrc_out_vol_gain, open_asrc_out, prepare_asrc_out, request_asrc_irq,
    set_asrc_out_rate, set_asrc_out_start_threshold, set_asrc_out_vol_gain, write_zero_to_asrc_fifo,
};
use crate::asrc::{
    asrc_status_check, init_asrc, reset_asrc_fifo, AsrcClock, AsrcIndex, AsrcMemPolicy, AsrcMode,
    AsrcParams,
};
use crate::clock::{
    cal_asrc_rate, dac_volume_db_to_level, dac_volume_level_to_db, get_aps, set_aps, ApllAlloc,
    ApsMode, ApsTarget, ClockBinding, ClockTarget, ASRC_LEVEL_DEFAULT,
};
use crate::codec::{self, ChannelWidth, Linkage, SpdifTxSource};
use crate::config::{AOUT_SESSION_MAX, DAC_MAX_SESSIONS, I2STX_MAX_SESSIONS, SPDIFTX_MAX_SESSIONS};
use crate::device::{dma_token, AudioDevice};
use crate::error::{AudioError, Result};
use crate::hal::{DmaChannel, DmaConfig, DmaDirection, DmaIrq, DmaSlot, PhyDma, Platform};
use crate::klog::{klog_debug, klog_error, klog_info, klog_warning};
use crate::regs::{PA_VOLUME_DEFAULT, TX_FIFO_IS_ASRC, TX_FIFO_IS_DMA, TX_FIFO_IS_DSP};
use crate::session::{
    DmaCallback, PooledSession, ReloadBuffer, SessionFlags, SessionHandle, SessionPool,
};

const DMA_BURST_LEN: u8 = 8;
/// Budget for the FIFO to drain after a stop
pub const AOUT_DMA_WAIT_TIMEOUT_US: u32 = 1000;
/// DA level written alongside a PA-domain volume
const DA_LEVEL_0DB: u32 = 0xBF;
const CHANNEL_STATUS_BUSY: i32 = 1 << 0;

// =============================================================================
// Types
// =============================================================================

bitflags! {
    /// Logical output channel types; DAC, I2STX and SPDIFTX may be combined.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AoutChannel: u16 {
        const DAC = 1 << 0;
        const I2STX = 1 << 1;
        const SPDIFTX = 1 << 2;
        const AA = 1 << 3;
    }
}

/// Physical playback FIFO.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AoutFifo {
    Dac0,
    Dac1,
    I2sTx0,
}

/// What feeds the playback FIFO.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FifoSrc {
    Dma,
    Asrc,
    Dsp,
}

/// Transmitter set of a session, resolved once at open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AoutRole {
    Dac,
    LinkageDacI2s,
    LinkageDacSpdif,
    LinkageDacI2sSpdif,
    I2s,
    LinkageI2sSpdif,
    Spdif,
    Aa,
}

impl AoutRole {
    pub fn from_channel(channel: AoutChannel) -> Result<Self> {
        let has = |flag| channel.contains(flag);
        let role = match (
            has(AoutChannel::DAC),
            has(AoutChannel::I2STX),
            has(AoutChannel::SPDIFTX),
            has(AoutChannel::AA),
        ) {
            (true, false, false, false) => AoutRole::Dac,
            (true, true, false, false) => AoutRole::LinkageDacI2s,
            (true, false, true, false) => AoutRole::LinkageDacSpdif,
            (true, true, true, false) => AoutRole::LinkageDacI2sSpdif,
            (false, true, false, false) => AoutRole::I2s,
            (false, true, true, false) => AoutRole::LinkageI2sSpdif,
            (false, false, true, false) => AoutRole::Spdif,
            (false, false, false, true) => AoutRole::Aa,
            _ => {
                klog_error("aout", &alloc::format!("invalid channel type {:?}", channel));
                return Err(AudioError::InvalidArgument);
            }
        };
        Ok(role)
    }

    pub const fn linkage(self) -> Option<Linkage> {
        match self {
            AoutRole::LinkageDacI2s => Some(Linkage::DacI2s),
            AoutRole::LinkageDacSpdif => Some(Linkage::DacSpdif),
            AoutRole::LinkageDacI2sSpdif => Some(Linkage::DacI2sSpdif),
            AoutRole::LinkageI2sSpdif => Some(Linkage::I2sSpdif),
            _ => None,
        }
    }

    pub const fn has_dac(self) -> bool {
        matches!(
            self,
            AoutRole::Dac | AoutRole::LinkageDacI2s | AoutRole::LinkageDacSpdif | AoutRole::LinkageDacI2sSpdif
        )
    }

    pub const fn has_i2s(self) -> bool {
        matches!(
            self,
            AoutRole::LinkageDacI2s | AoutRole::LinkageDacI2sSpdif | AoutRole::I2s | AoutRole::LinkageI2sSpdif
        )
    }

    pub const fn has_spdif(self) -> bool {
        matches!(
            self,
            AoutRole::LinkageDacSpdif
                | AoutRole::LinkageDacI2sSpdif
                | AoutRole::LinkageI2sSpdif
                | AoutRole::Spdif
        )
    }

    /// Types counted against one limit and that limit.
    fn session_limit(self) -> (AoutChannel, usize) {
        if self.has_dac() || self == AoutRole::Aa {
            (AoutChannel::DAC | AoutChannel::AA, DAC_MAX_SESSIONS)
        } else if self.has_i2s() {
            (AoutChannel::I2STX, I2STX_MAX_SESSIONS)
        } else {
            (AoutChannel::SPDIFTX, SPDIFTX_MAX_SESSIONS)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DacSetting {
    /// One channel duplicated to both DAC inputs
    pub mono: bool,
    /// Milli-dB, or a raw PA level when volume lives on the PA
    pub volume: i32,
}

#[derive(Clone, Copy, Debug)]
pub struct AoutParam {
    pub channel: AoutChannel,
    /// Sample rate in kHz
    pub sample_rate: u8,
    /// Sample width in bits
    pub channel_width: u8,
    pub fifo: AoutFifo,
    pub callback: Option<DmaCallback>,
    pub cb_data: usize,
    /// Ring buffer for reload mode; `None` selects direct mode
    pub reload: Option<ReloadBuffer>,
    /// Required when the channel includes the DAC
    pub dac: Option<DacSetting>,
}

/// ASRC stage requested through [`AoutCommand::AsrcEnable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AsrcOutSetting {
    pub mode: AsrcMode,
    pub mem_policy: AsrcMemPolicy,
    /// Clock the application side writes with (CPU, DMA or DSP)
    pub wclk: AsrcClock,
    /// Rate of the data written into the ASRC, in kHz
    pub input_rate: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AoutInfo {
    FifoUsing,
    FifoSrc,
    /// ASRC channel index, -1 when none
    AsrcUsing,
    /// `CHANNEL_STATUS_BUSY` while the FIFO still holds data
    Status,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AoutCommand {
    /// Arm the DMA on start without triggering it
    SetPrepareStart,
    DspEnable,
    GetChannelInfo(AoutInfo),
    GetSampleRate,
    SetSampleRate(u8),
    GetVolume,
    SetVolume(i32),
    OutMute(bool),
    GetApsLevel,
    SetApsLevel(i32),
    GetAsrcApsLevel,
    SetAsrcApsLevel(i32),
    /// Restart a reload ring from its first buffer at the next transfer-complete
    RearmReload,
    AsrcEnable(AsrcOutSetting),
    SetAsrcOutRate { input_rate: u8, output_rate: u8 },
    /// Drift accumulated over another `duration_ms`; 0 only reads the counter
    GetAsrcSampleCnt { duration_ms: u32 },
    ResetAsrcSampleCnt,
    ResetAsrcFifo { write: bool, read: bool },
    SetAsrcVolume(u32),
    GetAsrcVolume,
    GetAsrcRemainSamples,
    WriteAsrcZero(u32),
    RequestAsrcIrq { callback: Option<fn()>, threshold: u32 },
}

/// One open output channel.
#[derive(Clone, Copy, Debug)]
pub struct AoutSession {
    flags: SessionFlags,
    channel: AoutChannel,
    role: AoutRole,
    fifo: AoutFifo,
    fifo_src: FifoSrc,
    sample_rate: u8,
    input_rate: u8,
    width: ChannelWidth,
    dma_width: u8,
    mono: bool,
    volume: i32,
    reload: bool,
    buf_ptr: usize,
    buf_size: u32,
    first_buf_size: u32,
    dma: Option<DmaChannel>,
    phy_dma: Option<PhyDma>,
    run: bool,
    prepare_start: bool,
    asrc_enable: bool,
    dsp_enable: bool,
    dac_clock: Option<ClockBinding>,
    i2s_clock: Option<ClockBinding>,
    asrc: Option<AsrcIndex>,
    changed_samples: i32,
    callback: Option<DmaCallback>,
    cb_data: usize,
}

impl AoutSession {
    fn new(param: &AoutParam, role: AoutRole, width: ChannelWidth) -> Self {
        Self {
            flags: SessionFlags::OPEN,
            channel: param.channel,
            role,
            fifo: param.fifo,
            fifo_src: FifoSrc::Dma,
            sample_rate: param.sample_rate,
            input_rate: param.sample_rate,
            width,
            dma_width: width.dma_width(),
            mono: param.dac.map_or(false, |dac| dac.mono),
            volume: param.dac.map_or(0, |dac| dac.volume),
            reload: false,
            buf_ptr: 0,
            buf_size: 0,
            first_buf_size: 0,
            dma: None,
            phy_dma: None,
            run: false,
            prepare_start: false,
            asrc_enable: false,
            dsp_enable: false,
            dac_clock: None,
            i2s_clock: None,
            asrc: None,
            changed_samples: 0,
            callback: param.callback,
            cb_data: param.cb_data,
        }
    }

    pub fn flags(&self) -> SessionFlags {
        self.flags
    }

    pub fn role(&self) -> AoutRole {
        self.role
    }

    pub fn fifo(&self) -> AoutFifo {
        self.fifo
    }

    pub fn fifo_src(&self) -> FifoSrc {
        self.fifo_src
    }

    pub fn asrc(&self) -> Option<AsrcIndex> {
        self.asrc
    }

    pub fn dma(&self) -> Option<DmaChannel> {
        self.dma
    }

    pub fn is_running(&self) -> bool {
        self.run
    }

    pub fn buffer_size(&self) -> u32 {
        self.buf_size
    }

    fn aps_target(&self) -> ApsTarget {
        ApsTarget {
            sr_input: self.input_rate,
            sr_output: self.sample_rate,
            asrc: self.asrc,
            clock: self.dac_clock.or(self.i2s_clock),
        }
    }

    fn asrc_index(&self) -> Result<AsrcIndex> {
        match self.asrc {
            Some(index) if index.is_output() => Ok(index),
            _ => {
                klog_error("aout", "session has no asrc output channel");
                Err(AudioError::InvalidArgument)
            }
        }
    }
}

impl PooledSession for AoutSession {
    fn channel_bits(&self) -> u16 {
        self.channel.bits()
    }

    fn is_open(&self) -> bool {
        self.flags.contains(SessionFlags::OPEN)
    }
}

/// Output side of the device.
pub(crate) struct AudioOut {
    pub(crate) sessions: SessionPool<AoutSession, AOUT_SESSION_MAX>,
    pub(crate) pa_open: bool,
}

impl AudioOut {
    pub(crate) fn new() -> Self {
        Self {
            sessions: SessionPool::new(),
            pa_open: false,
        }
    }
}

fn unsupported(cmd: AoutCommand) -> AudioError {
    klog_error("aout", &alloc::format!("unsupported command {:?}", cmd));
    AudioError::NotSupported
}

// =============================================================================
// Session Operations
// =============================================================================

impl<P: Platform> AudioDevice<P> {
    /// Open a playback channel, bring its transmitters up and configure its DMA.
    pub fn aout_open(&self, param: &AoutParam) -> Result<SessionHandle> {
        let role = AoutRole::from_channel(param.channel)?;
        let mut aout = self.aout.lock();

        let (counted, max) = role.session_limit();
        if aout.sessions.count_open(counted.bits()) >= max || aout.sessions.len() >= aout.sessions.capacity() {
            klog_error("aout", &alloc::format!("no free session for {:?}", param.channel));
            return Err(AudioError::NoDevice);
        }

        if param.callback.is_none() {
            klog_error("aout", "channel callback is missing");
            return Err(AudioError::InvalidArgument);
        }
        if self.config.poweron_open_pa && !aout.pa_open {
            klog_error("aout", "pa is closed");
            return Err(AudioError::Busy);
        }
        if role.has_dac() && param.dac.is_none() {
            klog_error("aout", "dac setting missing");
            return Err(AudioError::InvalidArgument);
        }

        let width = ChannelWidth::from_bits(param.channel_width)?;
        let mut session = AoutSession::new(param, role, width);

        if let Some(reload) = param.reload {
            if reload.addr == 0 || reload.len == 0 {
                klog_error(
                    "aout",
                    &alloc::format!("invalid reload buffer 0x{:x} len {}", reload.addr, reload.len),
                );
                return Err(AudioError::InvalidArgument);
            }
            session.reload = true;
            session.buf_ptr = reload.addr;
            session.first_buf_size = reload.len;
            session.buf_size = reload.len;
            klog_info("aout", &alloc::format!("reload mode [0x{:08x} {}]", reload.addr, reload.len));
        }

        if let Err(e) = self.aout_enable(&mut session) {
            klog_error("aout", &alloc::format!("enable {:?} failed: {}", param.channel, e));
            return Err(e);
        }

        let handle = match aout.sessions.insert(session) {
            Some(handle) => handle,
            None => {
                self.aout_disable(&session);
                return Err(AudioError::NoDevice);
            }
        };

        if role != AoutRole::Aa {
            let s = aout.sessions.get_mut(handle)?;
            if let Err(e) = self.aout_dma_prepare(s, handle) {
                klog_error("aout", &alloc::format!("prepare session dma error: {}", e));
                let s = aout.sessions.remove(handle)?;
                self.aout_release_dma(&s);
                self.aout_disable(&s);
                return Err(e);
            }
        }

        klog_info(
            "aout",
            &alloc::format!(
                "session#{} {:?} fifo {:?} {} kHz opened",
                handle.index(),
                role,
                param.fifo,
                param.sample_rate
            ),
        );
        Ok(handle)
    }

    fn aout_dac_gain(&self, volume: i32) -> u32 {
        if self.config.volume_pa {
            (((volume as u32) & 0xFF) << 8) | DA_LEVEL_0DB
        } else {
            (PA_VOLUME_DEFAULT << 8) | dac_volume_db_to_level(volume) as u32
        }
    }

    fn aout_enable(&self, s: &mut AoutSession) -> Result<()> {
        let p = &self.platform;
        let cfg = &self.config;
        let role = s.role;

        if (role.has_dac() || role.has_spdif()) && s.width == ChannelWidth::Bits20 {
            klog_error("aout", "dac and spdif support 16 or 24 bit only");
            return Err(AudioError::InvalidArgument);
        }
        if role.has_dac() && s.fifo == AoutFifo::I2sTx0 {
            klog_error("aout", "dac needs a dac fifo");
            return Err(AudioError::InvalidArgument);
        }

        if role == AoutRole::Aa {
            codec::enable_aa(p, cfg.pa_left_mute, cfg.pa_right_mute, cfg.aa_source);
            return Ok(());
        }

        if role.has_i2s() {
            s.i2s_clock =
                codec::enable_i2stx(p, &self.clocks, s.sample_rate, s.width, cfg.i2stx_role, cfg.i2stx_format)?;
        }
        if role.has_spdif() {
            let source = if role.has_dac() {
                SpdifTxSource::Dac
            } else if role.has_i2s() {
                SpdifTxSource::I2s
            } else {
                SpdifTxSource::Direct
            };
            codec::enable_spdiftx(p, source, s.width);
        }
        if let Some(linkage) = role.linkage() {
            codec::enable_linkage(p, linkage);
        }

        if role.has_dac() {
            let gain = self.aout_dac_gain(s.volume);
            match codec::enable_dac(p, &self.clocks, s.fifo, s.sample_rate, s.width, s.mono, gain) {
                Ok(clock) => s.dac_clock = Some(clock),
                Err(e) => {
                    self.aout_disable(s);
                    return Err(e);
                }
            }
        } else {
            codec::set_tx_fifo_input(p, s.fifo, TX_FIFO_IS_DMA);
        }
        Ok(())
    }

    fn aout_disable(&self, s: &AoutSession) {
        let p = &self.platform;
        if s.role == AoutRole::Aa {
            codec::disable_aa(p);
            return;
        }
        if let Some(linkage) = s.role.linkage() {
            codec::disable_linkage(p, linkage);
        }
        if s.role.has_spdif() {
            codec::disable_spdiftx(p);
        }
        if s.role.has_i2s() {
            codec::disable_i2stx(p, &self.clocks, s.i2s_clock.as_ref());
        }
        if let Some(clock) = &s.dac_clock {
            codec::disable_dac(p, &self.clocks, s.fifo, clock);
        }
    }

    fn aout_release_dma(&self, s: &AoutSession) {
        if let Some(chan) = s.dma {
            if self.platform.dma_present() {
                let _ = self.platform.dma_stop(chan);
                self.platform.dma_free(chan);
            }
        }
    }

    /// Configure the DMA once per session.
    fn aout_dma_prepare(&self, s: &mut AoutSession, handle: SessionHandle) -> Result<()> {
        if s.flags.contains(SessionFlags::CONFIG) {
            return Ok(());
        }
        self.aout_dma_config(s, handle)?;
        s.flags |= SessionFlags::CONFIG;
        Ok(())
    }

    /// Request a channel and load the session's descriptor into it.
    fn aout_dma_config(&self, s: &mut AoutSession, handle: SessionHandle) -> Result<()> {
        let p = &self.platform;
        if !p.dma_present() {
            klog_error("aout", "no dma controller");
            return Err(AudioError::Io);
        }

        s.run = false;
        let chan = p.dma_request().ok_or_else(|| {
            klog_error("aout", "dma request error");
            AudioError::NoDevice
        })?;
        s.dma = Some(chan);
        self.aout_dma_setup(s, chan, handle)
    }

    fn aout_dma_setup(&self, s: &AoutSession, chan: DmaChannel, handle: SessionHandle) -> Result<()> {
        let p = &self.platform;
        let slot = match s.fifo_src {
            FifoSrc::Asrc => match s.asrc {
                Some(AsrcIndex::Out0) => DmaSlot::AsrcFifo0,
                Some(AsrcIndex::Out1) => DmaSlot::AsrcFifo1,
                _ => {
                    klog_error("aout", "asrc source without an output channel");
                    return Err(AudioError::InvalidArgument);
                }
            },
            FifoSrc::Dma => match s.fifo {
                AoutFifo::Dac0 => DmaSlot::DacFifo0,
                AoutFifo::Dac1 => DmaSlot::DacFifo1,
                AoutFifo::I2sTx0 => DmaSlot::I2s,
            },
            FifoSrc::Dsp => {
                klog_error("aout", "fifo is fed by the dsp");
                return Err(AudioError::InvalidArgument);
            }
        };

        let sam = self.config.reload_sam && s.reload && s.buf_size == 0 && s.fifo_src == FifoSrc::Asrc;
        let config = DmaConfig {
            direction: DmaDirection::MemoryToPeripheral,
            slot,
            width: s.dma_width,
            burst_len: DMA_BURST_LEN,
            interleaved: s.mono,
            reload: s.reload,
            sam,
            half_complete_irq: true,
            complete_irq: true,
            callback_token: Some(dma_token(handle, true)),
            src: 0,
            dst: 0,
            len: 0,
        };
        p.dma_config(chan, &config)?;
        codec::set_tx_dma_width(p, s.fifo, s.dma_width)?;
        klog_debug("aout", &alloc::format!("dma {:?} slot {:?} mono {}", chan, slot, s.mono));

        if s.reload {
            self.aout_dma_reload(s, chan, s.buf_ptr, s.buf_size)?;
        }
        Ok(())
    }

    /// Mono data is read twice, once per DAC input.
    fn aout_dma_reload(&self, s: &AoutSession, chan: DmaChannel, addr: usize, len: u32) -> Result<()> {
        if s.mono {
            self.platform.dma_reload(chan, addr, addr, len * 2)
        } else {
            self.platform.dma_reload(chan, addr, 0, len)
        }
    }

    fn aout_dma_kick(&self, s: &mut AoutSession) -> Result<()> {
        let chan = s.dma.ok_or_else(|| {
            klog_error("aout", "aout dma null");
            AudioError::Io
        })?;
        if s.prepare_start {
            s.phy_dma = Some(self.platform.dma_prepare_start(chan)?);
        } else {
            self.platform.dma_start(chan)?;
        }
        s.run = true;
        s.flags |= SessionFlags::START;
        Ok(())
    }

    /// Tear the DMA down and configure it again after the FIFO source changed.
    fn aout_dma_rebuild(&self, s: &mut AoutSession, handle: SessionHandle) -> Result<()> {
        let p = &self.platform;
        match (s.phy_dma, s.dma) {
            (Some(phy), Some(chan)) => {
                p.phy_dma_stop(phy);
                p.phy_dma_disable_sam(phy);
                self.aout_dma_setup(s, chan, handle)
            }
            _ => {
                if let Some(chan) = s.dma.take() {
                    let _ = p.dma_stop(chan);
                    p.dma_free(chan);
                }
                s.run = false;
                s.flags.remove(SessionFlags::START);
                self.aout_dma_config(s, handle)
            }
        }
    }

    /// Re-arm from the first buffer after the live size was zeroed.
    fn aout_reset_dma_config(&self, s: &mut AoutSession, handle: SessionHandle) -> Result<()> {
        s.buf_size = s.first_buf_size;
        match s.phy_dma {
            None => {
                self.aout_dma_rebuild(s, handle)?;
                if !s.reload {
                    let chan = s.dma.ok_or(AudioError::Io)?;
                    self.aout_dma_reload(s, chan, s.buf_ptr, s.buf_size)?;
                }
                self.aout_dma_kick(s)
            }
            Some(phy) => {
                let p = &self.platform;
                p.phy_dma_stop(phy);
                p.phy_dma_disable_sam(phy);
                if s.mono {
                    p.phy_dma_reload(phy, s.buf_ptr, s.buf_ptr, s.buf_size * 2);
                } else {
                    p.phy_dma_reload(phy, s.buf_ptr, 0, s.buf_size);
                }
                p.phy_dma_start(phy);
                Ok(())
            }
        }
    }

    /// Start the DMA. Reload-mode sessions only need to start once.
    pub fn aout_start(&self, handle: SessionHandle) -> Result<()> {
        let mut aout = self.aout.lock();
        let s = aout.sessions.get_mut(handle)?;

        if s.role == AoutRole::Aa {
            klog_error("aout", "analog passthrough has no data path");
            return Err(AudioError::NotSupported);
        }
        if let Err(e) = self.aout_dma_prepare(s, handle) {
            klog_error("aout", &alloc::format!("prepare session dma error: {}", e));
            return Err(AudioError::NoDevice);
        }
        if s.reload && s.flags.contains(SessionFlags::START) {
            return Ok(());
        }
        self.aout_dma_kick(s)
    }

    /// Queue one buffer in direct mode, or refill an idled ASRC-fed ring.
    ///
    /// `addr` must stay valid until the transfer-complete callback for it.
    pub fn aout_write(&self, handle: SessionHandle, addr: usize, len: u32) -> Result<()> {
        if addr == 0 || len == 0 {
            klog_error("aout", &alloc::format!("invalid buffer 0x{:x} len {}", addr, len));
            return Err(AudioError::InvalidArgument);
        }

        let mut aout = self.aout.lock();
        let s = aout.sessions.get_mut(handle)?;
        if s.role == AoutRole::Aa {
            return Err(AudioError::NotSupported);
        }

        if s.reload && s.buf_size != 0 {
            klog_info("aout", "reload mode can start directly");
            return Ok(());
        }
        if let Err(e) = self.aout_dma_prepare(s, handle) {
            klog_error("aout", &alloc::format!("prepare session dma error: {}", e));
            return Err(AudioError::NoDevice);
        }

        s.buf_ptr = addr;
        s.first_buf_size = len;
        let chan = s.dma.ok_or(AudioError::Io)?;
        let refill = s.reload && s.fifo_src == FifoSrc::Asrc;
        let sam = self.config.reload_sam;

        if refill && sam {
            // the ring restarts from the silence word until the next re-arm
            self.aout_dma_reload(s, chan, self.config.sram_mute_addr, len)?;
        } else {
            s.buf_size = len;
            self.aout_dma_reload(s, chan, addr, len)?;
            if !sam {
                if let Some(index) = s.asrc.filter(|i| i.is_output()) {
                    let level = if refill { len >> 4 } else { len >> 2 };
                    set_asrc_out_start_threshold(&self.platform, index, level)?;
                }
            }
        }

        self.aout_dma_kick(s).map_err(|e| {
            klog_error("aout", &alloc::format!("dma start error {}", e));
            e
        })
    }

    /// Stop the DMA and wait for the FIFO to drain.
    pub fn aout_stop(&self, handle: SessionHandle) -> Result<()> {
        let mut aout = self.aout.lock();
        let s = aout.sessions.get_mut(handle)?;
        let p = &self.platform;

        if let Some(chan) = s.dma {
            if p.dma_present() {
                let ret = p.dma_stop(chan);
                if ret.is_ok() && !s.asrc_enable {
                    // a FIFO that never drains is logged, not reported
                    let _ = self.wait_fifo_drain(s.fifo, AOUT_DMA_WAIT_TIMEOUT_US);
                }
                s.run = false;
                s.flags.remove(SessionFlags::START);
                ret?;
            }
        }
        klog_info("aout", &alloc::format!("session#{} stopped", handle.index()));
        Ok(())
    }

    /// Poll until the session's FIFO reaches its near-empty level.
    pub fn aout_wait_finish(&self, handle: SessionHandle, timeout_us: u32) -> Result<()> {
        let fifo = self.aout.lock().sessions.get(handle)?.fifo;
        self.wait_fifo_drain(fifo, timeout_us)
    }

    fn wait_fifo_drain(&self, fifo: AoutFifo, timeout_us: u32) -> Result<()> {
        let p = &self.platform;
        let empty_level = (self.config.dac_fifo_level / 2).saturating_sub(1);
        let per_us = p.cycles_per_us().max(1);
        let start = p.cycle_count();

        loop {
            let level = codec::tx_fifo_level(p, fifo);
            let elapsed_us = p.cycle_count().wrapping_sub(start) / per_us;
            if level >= empty_level {
                klog_debug("aout", &alloc::format!("wait fifo empty time: {}us", elapsed_us));
                return Ok(());
            }
            if elapsed_us > timeout_us {
                klog_error("aout", &alloc::format!("wait fifo empty timeout {}", level));
                return Err(AudioError::TimedOut);
            }
        }
    }

    /// Tear the channel down and free its slot, DMA and ASRC channel.
    pub fn aout_close(&self, handle: SessionHandle) -> Result<()> {
        let mut aout = self.aout.lock();
        let s = aout.sessions.remove(handle)?;

        self.aout_disable(&s);
        self.aout_release_dma(&s);

        if s.asrc_enable {
            if let Some(index) = s.asrc {
                self.aout_asrc_close(index)?;
            }
        }
        klog_info("aout", &alloc::format!("session#{} closed", handle.index()));
        Ok(())
    }

    fn aout_asrc_close(&self, index: AsrcIndex) -> Result<()> {
        let mut asrc = self.asrc.lock();
        match asrc.release(index) {
            Some(ram) => close_asrc_out(&self.platform, ram, self.clocks.dac_rate_khz()),
            None => {
                klog_error("aout", &alloc::format!("{:?} was not bound", index));
                Err(AudioError::InvalidArgument)
            }
        }
    }

    /// Snapshot of an open session.
    pub fn aout_session(&self, handle: SessionHandle) -> Result<AoutSession> {
        self.aout.lock().sessions.get(handle).copied()
    }

    // =========================================================================
    // PA
    // =========================================================================

    /// Power the PA up; fails with `Busy` when it is already on.
    pub fn aout_open_pa(&self, antipop: bool) -> Result<()> {
        let mut aout = self.aout.lock();
        if aout.pa_open {
            klog_debug("aout", "pa is opened, no need open again");
            return Err(AudioError::Busy);
        }
        codec::enable_pa(&self.platform, self.config.pa_left_mute, self.config.pa_right_mute, antipop);
        if self.config.external_pa {
            self.platform.extern_pa_ctl(true);
        }
        aout.pa_open = true;
        Ok(())
    }

    pub fn aout_close_pa(&self, antipop: bool) -> Result<()> {
        let mut aout = self.aout.lock();
        if !aout.pa_open {
            klog_debug("aout", "pa is closed, no need close again");
            return Err(AudioError::Busy);
        }
        codec::disable_pa(&self.platform, antipop);
        if self.config.external_pa {
            self.platform.extern_pa_ctl(false);
        }
        aout.pa_open = false;
        Ok(())
    }

    pub fn aout_pa_status(&self) -> bool {
        self.aout.lock().pa_open
    }

    /// PA and DAC digital gain as one `(pa << 8) | da` word.
    pub fn aout_set_pa_gain(&self, gain: u32) {
        let _aout = self.aout.lock();
        codec::set_dac_gain(&self.platform, gain);
    }

    pub fn aout_get_pa_gain(&self) -> u32 {
        let _aout = self.aout.lock();
        codec::get_dac_gain(&self.platform)
    }

    pub fn aout_pa_mute(&self, left: bool, right: bool) -> Result<()> {
        let aout = self.aout.lock();
        if !aout.pa_open {
            klog_error("aout", "pa is closed");
            return Err(AudioError::Busy);
        }
        codec::pa_mute(&self.platform, left, right);
        Ok(())
    }

    /// Select the class of the external amplifier through the board.
    pub fn aout_pa_class_select(&self, class: u8) -> Result<()> {
        self.platform.extern_pa_class_select(class).map_err(|e| {
            klog_error("aout", &alloc::format!("pa class {} select failed: {}", class, e));
            e
        })
    }

    // =========================================================================
    // Control
    // =========================================================================

    /// Session control; value-returning commands report through the `i32`.
    pub fn aout_control(&self, handle: SessionHandle, cmd: AoutCommand) -> Result<i32> {
        let mut aout = self.aout.lock();
        let s = aout.sessions.get_mut(handle)?;
        let p = &self.platform;

        if s.role == AoutRole::Aa && cmd != AoutCommand::SetPrepareStart {
            return Err(unsupported(cmd));
        }

        match cmd {
            AoutCommand::SetPrepareStart => {
                s.prepare_start = true;
                klog_info("aout", "enable prepare dma start");
                Ok(0)
            }
            AoutCommand::DspEnable => {
                if s.asrc_enable {
                    klog_error("aout", "fifo source already set to asrc");
                    return Err(AudioError::PermissionDenied);
                }
                s.fifo_src = FifoSrc::Dsp;
                match s.fifo {
                    AoutFifo::Dac0 | AoutFifo::Dac1 => codec::set_tx_fifo_input(p, s.fifo, TX_FIFO_IS_DSP),
                    // I2S-TX0 takes DSP data through its ASRC input
                    AoutFifo::I2sTx0 => codec::set_tx_fifo_input(p, s.fifo, TX_FIFO_IS_ASRC),
                }
                match s.phy_dma {
                    Some(phy) => p.phy_dma_stop(phy),
                    None => self.aout_release_dma(s),
                }
                s.dma = None;
                s.phy_dma = None;
                s.run = false;
                s.flags.remove(SessionFlags::CONFIG | SessionFlags::START);
                s.dsp_enable = true;
                Ok(0)
            }
            AoutCommand::GetChannelInfo(info) => Ok(match info {
                AoutInfo::FifoUsing => s.fifo as i32,
                AoutInfo::FifoSrc => s.fifo_src as i32,
                AoutInfo::AsrcUsing => s.asrc.filter(|i| i.is_output()).map_or(-1, |i| i as i32),
                AoutInfo::Status => {
                    let empty_level = (self.config.dac_fifo_level / 2).saturating_sub(1);
                    if codec::tx_fifo_level(p, s.fifo) < empty_level {
                        CHANNEL_STATUS_BUSY
                    } else {
                        0
                    }
                }
            }),
            AoutCommand::GetSampleRate => {
                if !s.role.has_dac() {
                    return Err(unsupported(cmd));
                }
                Ok(s.sample_rate as i32)
            }
            AoutCommand::SetSampleRate(rate) => {
                if !s.role.has_dac() {
                    return Err(unsupported(cmd));
                }
                if let Some(clock) = s.dac_clock.take() {
                    self.clocks.unset_samplerate(p, &clock);
                }
                s.dac_clock = Some(self.clocks.set_samplerate(p, rate, ClockTarget::Dac, ApllAlloc::Auto)?);
                s.sample_rate = rate;
                Ok(0)
            }
            AoutCommand::GetVolume => {
                if !s.role.has_dac() {
                    return Err(unsupported(cmd));
                }
                let gain = codec::get_dac_gain(p);
                Ok(if self.config.volume_pa {
                    ((gain >> 8) & 0xFF) as i32
                } else {
                    dac_volume_level_to_db((gain & 0xFF) as u8)
                })
            }
            AoutCommand::SetVolume(volume) => {
                if !s.role.has_dac() {
                    return Err(unsupported(cmd));
                }
                codec::set_dac_gain(p, self.aout_dac_gain(volume));
                s.volume = volume;
                Ok(0)
            }
            AoutCommand::OutMute(mute) => {
                if !s.role.has_dac() {
                    return Err(unsupported(cmd));
                }
                codec::dac_mute(p, s.fifo, mute).map(|_| 0)
            }
            AoutCommand::GetApsLevel => Ok(get_aps(p, &s.aps_target(), ApsMode::AudioPll)?.unwrap_or(-1)),
            AoutCommand::SetApsLevel(level) => set_aps(p, &s.aps_target(), level, ApsMode::AudioPll).map(|_| 0),
            AoutCommand::GetAsrcApsLevel => Ok(get_aps(p, &s.aps_target(), ApsMode::Asrc)?.unwrap_or(-1)),
            AoutCommand::SetAsrcApsLevel(level) => set_aps(p, &s.aps_target(), level, ApsMode::Asrc).map(|_| 0),
            AoutCommand::RearmReload => {
                if !s.reload {
                    return Err(unsupported(cmd));
                }
                s.buf_size = 0;
                Ok(0)
            }
            AoutCommand::AsrcEnable(setting) => self.aout_asrc_enable(s, &setting, handle).map(|_| 0),
            AoutCommand::SetAsrcOutRate { input_rate, output_rate } => {
                let index = s.asrc_index()?;
                set_asrc_out_rate(p, index, cal_asrc_rate(input_rate, output_rate, ASRC_LEVEL_DEFAULT))?;
                Ok(0)
            }
            AoutCommand::GetAsrcSampleCnt { duration_ms } => {
                let index = s.asrc_index()?;
                asrc_out_changed_samples(p, index, s.input_rate as u32, &mut s.changed_samples, duration_ms)
            }
            AoutCommand::ResetAsrcSampleCnt => {
                s.asrc_index()?;
                s.changed_samples = 0;
                Ok(0)
            }
            AoutCommand::ResetAsrcFifo { write, read } => {
                reset_asrc_fifo(p, s.asrc_index()?, write, read);
                Ok(0)
            }
            AoutCommand::SetAsrcVolume(gain) => set_asrc_out_vol_gain(p, s.asrc_index()?, gain).map(|_| 0),
            AoutCommand::GetAsrcVolume => Ok(get_asrc_out_vol_gain(p, s.asrc_index()?)? as i32),
            AoutCommand::GetAsrcRemainSamples => Ok(asrc_out_remain_samples(p, s.asrc_index()?)? as i32),
            AoutCommand::WriteAsrcZero(samples) => {
                Ok(write_zero_to_asrc_fifo(p, s.asrc_index()?, samples)? as i32)
            }
            AoutCommand::RequestAsrcIrq { callback, threshold } => {
                request_asrc_irq(p, &self.asrc_irq, callback, threshold);
                Ok(0)
            }
        }
    }

    fn aout_asrc_enable(&self, s: &mut AoutSession, setting: &AsrcOutSetting, handle: SessionHandle) -> Result<()> {
        let p = &self.platform;
        klog_info(
            "aout",
            &alloc::format!(
                "enable asrc mode {:?} policy {:?} wclk {:?} in {} kHz",
                setting.mode,
                setting.mem_policy,
                setting.wclk,
                setting.input_rate
            ),
        );

        if s.dsp_enable {
            klog_error("aout", "fifo source already set to dsp");
            return Err(AudioError::PermissionDenied);
        }
        if s.asrc_enable {
            klog_error("aout", "asrc already enabled");
            return Err(AudioError::Busy);
        }
        if !setting.wclk.is_application_side() {
            klog_error("aout", &alloc::format!("invalid asrc write clock {:?}", setting.wclk));
            return Err(AudioError::InvalidArgument);
        }

        let ram = {
            let mut asrc = self.asrc.lock();
            let wanted = asrc_out_layout(p, s.fifo, setting.mem_policy)?.channel();
            if asrc.bound(wanted).is_some() || asrc_status_check(p, Some(wanted)) {
                klog_error("aout", &alloc::format!("{:?} is used by another session", wanted));
                return Err(AudioError::Busy);
            }
            let ram = prepare_asrc_out(p, s.fifo, setting.mem_policy)?;
            let dec = cal_asrc_rate(setting.input_rate, s.sample_rate, ASRC_LEVEL_DEFAULT);
            let params = AsrcParams {
                ram,
                wclk: setting.wclk,
                rclk: asrc_out_rclk(s.fifo),
                mode: setting.mode,
                dma_width_bits: s.dma_width as u32 * 8,
                dec0: dec,
                dec1: dec,
                hfull: 0,
                hempty: 0,
            };

            if !asrc_status_check(p, None) {
                init_asrc(p);
            }
            asrc.reserve(ram)?;
            if let Err(e) = open_asrc_out(p, &params, self.clocks.dac_rate_khz()) {
                asrc.release(ram.channel());
                return Err(e);
            }
            ram
        };
        let fifo_size = asrc_out_fifo_size(ram);

        let index = ram.channel();
        s.input_rate = setting.input_rate;
        s.fifo_src = FifoSrc::Asrc;
        s.asrc = Some(index);
        if s.fifo == AoutFifo::I2sTx0 {
            codec::set_i2stx_asrc_channel(p, if index == AsrcIndex::Out0 { 0 } else { 1 });
        }
        codec::set_tx_fifo_input(p, s.fifo, TX_FIFO_IS_ASRC);
        reset_asrc_fifo(p, index, true, true);

        // the FIFO is now fed through the ASRC window
        if let Err(e) = self.aout_dma_rebuild(s, handle) {
            klog_error("aout", &alloc::format!("dma rebuild for {:?} failed: {}", index, e));
            codec::set_tx_fifo_input(p, s.fifo, TX_FIFO_IS_DMA);
            s.fifo_src = FifoSrc::Dma;
            s.asrc = None;
            if let Err(close_err) = self.aout_asrc_close(index) {
                klog_warning("aout", &alloc::format!("{:?} unwind: {}", index, close_err));
            }
            return Err(e);
        }
        s.asrc_enable = true;
        klog_debug("aout", &alloc::format!("{:?} fifo size {}", index, fifo_size));
        Ok(())
    }

    /// Completion bookkeeping for an output DMA interrupt.
    ///
    /// Returns the callback to run (outside the lock) and the reason to report.
    pub(crate) fn aout_dma_event(
        &self,
        handle: SessionHandle,
        reason: DmaIrq,
    ) -> Option<(DmaCallback, usize, DmaIrq)> {
        let mut aout = self.aout.lock();
        let s = aout.sessions.get_mut(handle).ok()?;
        let callback = s.callback?;
        let data = s.cb_data;

        if s.reload {
            if s.buf_size != 0 {
                return Some((callback, data, reason));
            }
            if reason != DmaIrq::TransferComplete {
                return None;
            }
        } else {
            if reason == DmaIrq::HalfComplete {
                return None;
            }
            s.run = false;
            if s.buf_size != 0 {
                return Some((callback, data, DmaIrq::TransferComplete));
            }
        }

        if let Err(e) = self.aout_reset_dma_config(s, handle) {
            klog_warning("aout", &alloc::format!("dma re-arm failed: {}", e));
        }
        Some((callback, data, DmaIrq::TransferComplete))
    }
}
