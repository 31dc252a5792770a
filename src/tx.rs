use alloc::collections::BTreeMap;
use core::{array, mem::size_of};

use embassy_time::Duration;
use macro_bits::{bit, serializable_enum};

use crate::{
    buffer::{BufferPool, DmaBuffer},
    config::{ProtectionMode, TxConfig, TxInterruptPolicy},
    dma_list::{
        CtlBuffer, DescriptorRing, HwDescriptor, PushClass, TxCtlDurations, TxCtlFrame,
        TxCtlProtection, TxCtlRates, TxCtlTries, CTL_BUFFER, CTL_DUR01, CTL_DUR23, CTL_FRAME,
        CTL_PROTECTION, CTL_RATES, CTL_TRIES,
    },
    hal::{RegisterAccess, RegisterPort},
    rate::{
        airtime, hw_rate_code, is_ofdm, RateState, ACK_LEN, CTS_LEN, MAX_SERIES, RATES,
        RIDX_CCK1, RIDX_CCK2, RIDX_MAX, RIDX_OFDM6,
    },
    regs::*,
    HalError, PeerId,
};

/// The maximum number of DMA segments a frame may be split into.
pub const MAX_SCATTER: usize = 16;
/// The largest frame length a descriptor can express.
const MAX_FRAME_LEN: usize = 0xfff;
/// Length of the FCS appended by the hardware.
const FCS_LEN: usize = 4;
const STOP_POLL: Duration = Duration::from_millis(4);

serializable_enum! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
    /// A hardware TX queue.
    pub enum QueueId: u8 {
        #[default]
        AcBe => 0,
        AcBk => 1,
        AcVi => 2,
        AcVo => 3,
        /// Unscheduled automatic power save delivery.
        Uapsd => 4,
        /// Group addressed frames sent right after a beacon.
        Cab => 5,
        PsPoll => 6,
        Beacon => 7
    }
}
impl QueueId {
    pub const COUNT: usize = 8;
    pub const ALL: [QueueId; Self::COUNT] = [
        Self::AcBe,
        Self::AcBk,
        Self::AcVi,
        Self::AcVo,
        Self::Uapsd,
        Self::Cab,
        Self::PsPoll,
        Self::Beacon,
    ];
    pub const fn index(&self) -> usize {
        self.into_bits() as usize
    }
    /// Map a QoS TID to the queue of its access category.
    pub const fn from_tid(tid: u8) -> Self {
        // TID to 802.1D user priority, then to the access category.
        match tid & 0x7 {
            1 | 2 => Self::AcBk,
            0 | 3 => Self::AcBe,
            4 | 5 => Self::AcVi,
            _ => Self::AcVo,
        }
    }
}

serializable_enum! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    /// The frame type field of a TX descriptor.
    pub enum FrameKind: u8 {
        #[default]
        Normal => 0,
        Atim => 1,
        PsPoll => 2,
        Beacon => 3,
        ProbeResponse => 4
    }
}

/// The fields of an 802.11 MAC header the TX engine looks at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub fc: [u8; 2],
    pub addr1: [u8; 6],
    pub seq_ctrl: Option<u16>,
    pub qos_ctrl: Option<u16>,
}
impl FrameHeader {
    const TYPE_MGMT: u8 = 0;
    const TYPE_CTRL: u8 = 1;
    const TYPE_DATA: u8 = 2;

    /// Parse the header at the start of `frame`.
    pub fn parse(frame: &[u8]) -> Option<Self> {
        let fc: [u8; 2] = frame.get(0..2)?.try_into().ok()?;
        let addr1 = frame.get(4..10)?.try_into().ok()?;
        let frame_type = (fc[0] >> 2) & 0x3;
        let seq_ctrl = if frame_type == Self::TYPE_CTRL {
            None
        } else {
            Some(u16::from_le_bytes(frame.get(22..24)?.try_into().ok()?))
        };
        let qos_ctrl = if frame_type == Self::TYPE_DATA && fc[0] & bit!(7) != 0 {
            // Four address frames have the QoS control field after the fourth address.
            let offset = if fc[1] & 0x3 == 0x3 { 30 } else { 24 };
            Some(u16::from_le_bytes(
                frame.get(offset..offset + 2)?.try_into().ok()?,
            ))
        } else {
            None
        };
        Some(Self {
            fc,
            addr1,
            seq_ctrl,
            qos_ctrl,
        })
    }
    fn frame_type(&self) -> u8 {
        (self.fc[0] >> 2) & 0x3
    }
    fn subtype(&self) -> u8 {
        self.fc[0] >> 4
    }
    pub fn is_data(&self) -> bool {
        self.frame_type() == Self::TYPE_DATA
    }
    pub fn is_group_addressed(&self) -> bool {
        self.addr1[0] & bit!(0) != 0
    }
    pub fn tid(&self) -> Option<u8> {
        self.qos_ctrl.map(|qos| (qos & 0xf) as u8)
    }
    /// Whether the QoS ack policy is "no ack".
    pub fn no_ack_policy(&self) -> bool {
        self.qos_ctrl.is_some_and(|qos| (qos >> 5) & 0x3 == 0x1)
    }
    pub fn fragment_number(&self) -> u8 {
        self.seq_ctrl.map(|seq| (seq & 0xf) as u8).unwrap_or(0)
    }
    pub fn kind(&self) -> FrameKind {
        match (self.frame_type(), self.subtype()) {
            (Self::TYPE_MGMT, 8) => FrameKind::Beacon,
            (Self::TYPE_MGMT, 5) => FrameKind::ProbeResponse,
            (Self::TYPE_MGMT, 9) => FrameKind::Atim,
            (Self::TYPE_CTRL, 10) => FrameKind::PsPoll,
            _ => FrameKind::Normal,
        }
    }
}

/// A frame handed to the TX engine.
pub struct TxRequest<B> {
    pub buffer: B,
    /// The peer the frame is addressed to. Required for unicast data.
    pub peer: Option<PeerId>,
    /// Send a group addressed frame right after the next beacon.
    pub after_beacon: bool,
    /// Override the queue selection.
    pub queue: Option<QueueId>,
}
impl<B> TxRequest<B> {
    pub fn new(buffer: B) -> Self {
        Self {
            buffer,
            peer: None,
            after_beacon: false,
            queue: None,
        }
    }
    pub fn to_peer(mut self, peer: PeerId) -> Self {
        self.peer = Some(peer);
        self
    }
}

/// State of the BSS, which affects how a frame is sent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TxContext {
    pub is_5ghz: bool,
    /// Whether legacy stations require protection of OFDM frames.
    pub use_protection: bool,
    pub short_preamble: bool,
}

/// A frame was not accepted.
#[derive(Debug, PartialEq, Eq)]
pub struct TxRejected<B> {
    pub error: HalError,
    /// The frame, unless it was dropped.
    pub buffer: Option<B>,
}

/// A frame in flight, remembering who it was for.
#[derive(Debug)]
pub struct InFlight<B> {
    pub buffer: B,
    pub peer: Option<PeerId>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxStats {
    pub frames: u32,
    /// Frames, which exhausted all retries.
    pub errors: u32,
    pub underruns: u32,
    /// Frames dropped because they couldn't be mapped.
    pub dropped: u32,
    pub ring_full: u32,
}

/// Handles the TX queues.
pub struct TxEngine<B> {
    queues: [DescriptorRing<InFlight<B>>; QueueId::COUNT],
    config: TxConfig,
    trigger_level: u32,
    max_trigger_level: u32,
    frames_since_interrupt: usize,
    pub stats: TxStats,
}
impl<B: DmaBuffer> TxEngine<B> {
    /// Bytes of descriptor memory needed per queue.
    pub const fn queue_bytes(config: &TxConfig) -> usize {
        (config.ring_size + config.reserve) * size_of::<HwDescriptor>()
    }
    /// Create the queues. The descriptor memory of all queues is laid out consecutively at
    /// `dma_base`.
    pub fn new(config: TxConfig, dma_base: u32) -> Self {
        let queue_bytes = Self::queue_bytes(&config) as u32;
        Self {
            queues: array::from_fn(|qid| {
                DescriptorRing::new(
                    config.ring_size,
                    config.reserve,
                    dma_base + qid as u32 * queue_bytes,
                    ar_qtxdp(qid),
                )
            }),
            config,
            trigger_level: 0,
            max_trigger_level: 0,
            frames_since_interrupt: 0,
            stats: TxStats::default(),
        }
    }
    pub fn config(&self) -> &TxConfig {
        &self.config
    }
    /// Reset all queues and program the FIFO trigger level.
    ///
    /// The queues have to be drained before.
    pub fn init<R: RegisterAccess>(
        &mut self,
        regs: &mut R,
        initial_trigger_level: u32,
        max_trigger_level: u32,
    ) {
        for queue in self.queues.iter_mut() {
            queue.init(regs);
        }
        self.max_trigger_level = max_trigger_level;
        self.trigger_level = initial_trigger_level.min(max_trigger_level);
        regs.modify(AR_TXCFG, AR_TXCFG_FTRIG, self.trigger_level);
        self.frames_since_interrupt = 0;
    }
    pub fn trigger_level(&self) -> u32 {
        self.trigger_level
    }
    /// Number of descriptors in flight on the queue.
    pub fn pending(&self, qid: QueueId) -> usize {
        self.queues[qid.index()].in_flight()
    }
    pub fn queue(&self, qid: QueueId) -> &DescriptorRing<InFlight<B>> {
        &self.queues[qid.index()]
    }
    #[cfg(test)]
    pub(crate) fn queue_mut(&mut self, qid: QueueId) -> &mut DescriptorRing<InFlight<B>> {
        &mut self.queues[qid.index()]
    }
    /// Select the queue for a frame.
    pub fn classify(header: &FrameHeader, after_beacon: bool) -> QueueId {
        match header.kind() {
            FrameKind::Beacon => QueueId::Beacon,
            FrameKind::PsPoll => QueueId::PsPoll,
            _ if after_beacon && header.is_group_addressed() => QueueId::Cab,
            _ => header.tid().map(QueueId::from_tid).unwrap_or(QueueId::AcBe),
        }
    }
    fn request_interrupt(&self, header: &FrameHeader) -> bool {
        match self.config.interrupt_policy {
            TxInterruptPolicy::Always => true,
            TxInterruptPolicy::EveryNth(n) => self.frames_since_interrupt + 1 >= n.max(1),
            TxInterruptPolicy::FirstFragmentOnly => header.fragment_number() == 0,
        }
    }
    /// Account a queued frame towards the interrupt policy.
    fn note_queued(&mut self, int_req: bool) {
        if let TxInterruptPolicy::EveryNth(_) = self.config.interrupt_policy {
            self.frames_since_interrupt = if int_req {
                0
            } else {
                self.frames_since_interrupt + 1
            };
        }
    }
    /// Build the descriptor control words for a frame.
    fn control_words(
        &mut self,
        header: &FrameHeader,
        frame_len: usize,
        rates: Option<&RateState>,
        ctx: &TxContext,
    ) -> [u32; 8] {
        let kind = header.kind();
        let group = header.is_group_addressed();
        let no_ack = group || header.no_ack_policy();
        let lowest = if ctx.is_5ghz { RIDX_OFDM6 } else { RIDX_CCK1 };
        let short_preamble = rates
            .map(|rates| rates.short_preamble)
            .unwrap_or(ctx.short_preamble);

        let mut ridx = [lowest; MAX_SERIES];
        if !group && header.is_data() {
            if let Some(fixed) = self.config.fixed_rate {
                ridx = [fixed.min(RIDX_MAX); MAX_SERIES];
            } else if let Some(rates) = rates {
                ridx = rates.series();
            }
        }

        let totlen = frame_len + FCS_LEN;
        let mut protection = ProtectionMode::None;
        if !group {
            if totlen > self.config.rts_threshold {
                protection = ProtectionMode::RtsCts;
            } else if ctx.use_protection && is_ofdm(ridx[0]) {
                protection = self.config.protection_mode;
            }
        }
        if protection != ProtectionMode::None {
            // No multi rate retries with protection.
            ridx = [ridx[0]; MAX_SERIES];
        }

        let mut durations = [0u16; MAX_SERIES];
        if !no_ack {
            for (duration, ridx) in durations.iter_mut().zip(ridx) {
                *duration = airtime(ACK_LEN, RATES[ridx].rsp_ridx, short_preamble);
            }
        }

        let mut ctl = [0u32; 8];
        let series_tries = self.config.series_tries.map(|tries| tries.min(0xf));
        let mut tries = TxCtlTries::new()
            .with_tries0(series_tries[0])
            .with_tries1(series_tries[1])
            .with_tries2(series_tries[2])
            .with_tries3(series_tries[3]);
        let protected = protection != ProtectionMode::None;
        if protected {
            let prot_ridx = if ctx.is_5ghz { RIDX_OFDM6 } else { RIDX_CCK2 };
            let mut burst = 0;
            if protection == ProtectionMode::RtsCts {
                burst += airtime(CTS_LEN, prot_ridx, short_preamble);
            }
            burst += airtime(totlen, ridx[0], short_preamble);
            if !no_ack {
                burst += airtime(ACK_LEN, RATES[ridx[0]].rsp_ridx, short_preamble);
            }
            tries.set_burst_duration(burst.min(0x7fff));
            ctl[CTL_PROTECTION] = TxCtlProtection::new()
                .with_rts_cts_rate(hw_rate_code(prot_ridx, short_preamble))
                .into_bits();
        }
        ctl[CTL_FRAME] = TxCtlFrame::new()
            .with_frame_len(totlen as u16)
            .with_tx_power(self.config.tx_power)
            .with_rts_enable(protection == ProtectionMode::RtsCts)
            .with_cts_enable(protection == ProtectionMode::CtsOnly)
            .with_clear_dest_mask(true)
            .with_no_ack(no_ack)
            .with_frame_type(kind.into_bits())
            .with_dur_update(kind != FrameKind::PsPoll)
            .into_bits();
        ctl[CTL_TRIES] = tries.into_bits();
        ctl[CTL_RATES] = TxCtlRates::new()
            .with_rate0(hw_rate_code(ridx[0], short_preamble))
            .with_rate1(hw_rate_code(ridx[1], short_preamble))
            .with_rate2(hw_rate_code(ridx[2], short_preamble))
            .with_rate3(hw_rate_code(ridx[3], short_preamble))
            .into_bits();
        ctl[CTL_DUR01] = TxCtlDurations::new()
            .with_dur_a(durations[0])
            .with_rts_cts_a(protected)
            .with_dur_b(durations[1])
            .with_rts_cts_b(protected)
            .into_bits();
        ctl[CTL_DUR23] = TxCtlDurations::new()
            .with_dur_a(durations[2])
            .with_rts_cts_a(protected)
            .with_dur_b(durations[3])
            .with_rts_cts_b(protected)
            .into_bits();
        ctl
    }
    fn is_mappable(buffer: &B) -> bool {
        let segments = buffer.segments();
        !segments.is_empty()
            && segments.len() <= MAX_SCATTER
            && segments
                .iter()
                .all(|segment| segment.len != 0 && segment.len as usize <= MAX_FRAME_LEN)
    }
    /// Queue a frame for transmission.
    ///
    /// On [HalError::RingFull] the frame is handed back, so it can be queued at a higher layer.
    pub fn transmit<R: RegisterAccess, P: BufferPool<Buffer = B>>(
        &mut self,
        regs: &mut R,
        pool: &mut P,
        request: TxRequest<B>,
        rates: Option<&RateState>,
        ctx: &TxContext,
    ) -> Result<QueueId, TxRejected<B>> {
        let TxRequest {
            mut buffer,
            peer,
            after_beacon,
            queue,
        } = request;
        let Some(header) = FrameHeader::parse(buffer.as_slice()) else {
            return Err(TxRejected {
                error: HalError::DmaMapping,
                buffer: Some(buffer),
            });
        };
        if header.is_data() && !header.is_group_addressed() && rates.is_none() {
            return Err(TxRejected {
                error: HalError::UnknownPeer,
                buffer: Some(buffer),
            });
        }
        let frame_len = buffer.len();
        if frame_len + FCS_LEN > MAX_FRAME_LEN {
            pool.release(buffer);
            self.stats.dropped += 1;
            return Err(TxRejected {
                error: HalError::DmaMapping,
                buffer: None,
            });
        }
        if !Self::is_mappable(&buffer) {
            debug!("Linearizing frame with {} segments.", buffer.segments().len());
            buffer = match pool.linearize(buffer) {
                Ok(linear) if Self::is_mappable(&linear) => linear,
                Ok(buffer) | Err(buffer) => {
                    warn!("Dropping unmappable frame.");
                    pool.release(buffer);
                    self.stats.dropped += 1;
                    return Err(TxRejected {
                        error: HalError::DmaMapping,
                        buffer: None,
                    });
                }
            };
        }

        let qid = queue.unwrap_or_else(|| Self::classify(&header, after_beacon));
        let mut ctl = self.control_words(&header, frame_len, rates, ctx);
        let int_req = self.request_interrupt(&header);

        let segments = buffer.segments();
        let count = segments.len();
        let mut templates = [HwDescriptor::EMPTY; MAX_SCATTER];
        for (i, (template, segment)) in templates.iter_mut().zip(segments).enumerate() {
            let last = i + 1 == count;
            let frame_ctl = TxCtlFrame::from_bits(ctl[CTL_FRAME]).with_int_req(last && int_req);
            ctl[CTL_FRAME] = frame_ctl.into_bits();
            ctl[CTL_BUFFER] = CtlBuffer::new()
                .with_buf_len(segment.len)
                .with_more(!last)
                .into_bits();
            template.data = segment.addr;
            template.ctl = ctl;
        }
        let class = if header.is_data() {
            PushClass::Normal
        } else {
            PushClass::Reserved
        };
        match self.queues[qid.index()].push(
            regs,
            InFlight { buffer, peer },
            &templates[..count],
            class,
        ) {
            Ok(_) => {
                self.note_queued(int_req);
                regs.write(AR_Q_TXE, bit!(qid.index()));
                trace!("Queued frame of {} bytes on queue {}.", frame_len, qid.index());
                Ok(qid)
            }
            Err((error, in_flight)) => {
                if error == HalError::RingFull {
                    self.stats.ring_full += 1;
                }
                Err(TxRejected {
                    error,
                    buffer: Some(in_flight.buffer),
                })
            }
        }
    }
    /// Raise the FIFO trigger level by one step, after an underrun.
    fn inc_trigger_level<R: RegisterAccess>(regs: &mut R, trigger_level: &mut u32, max: u32) {
        if *trigger_level >= max {
            return;
        }
        *trigger_level += 1;
        regs.modify(AR_TXCFG, AR_TXCFG_FTRIG, *trigger_level);
        debug!("Raised TX trigger level to {}.", *trigger_level);
    }
    /// Account and release all completed frames of a queue.
    ///
    /// Returns the number of completed frames.
    pub fn process_queue<R: RegisterAccess, P: BufferPool<Buffer = B>>(
        &mut self,
        regs: &mut R,
        qid: QueueId,
        pool: &mut P,
        rates: &mut BTreeMap<PeerId, RateState>,
    ) -> usize {
        let mut completed_frames = 0;
        for completed in self.queues[qid.index()].reap() {
            completed_frames += 1;
            let status = completed.desc.status;
            self.stats.frames += 1;
            if status.excessive_retries() {
                self.stats.errors += 1;
            }
            if status.underrun() {
                self.stats.underruns += 1;
                Self::inc_trigger_level(regs, &mut self.trigger_level, self.max_trigger_level);
            }
            let tries = completed.desc.tries();
            let series_tries = [tries.tries0(), tries.tries1(), tries.tries2(), tries.tries3()];
            let failcnt = status.data_fail_count() as u32
                + series_tries[..status.final_series() as usize]
                    .iter()
                    .map(|tries| *tries as u32)
                    .sum::<u32>();
            let Some(in_flight) = completed.buffer else {
                continue;
            };
            if let Some(state) = in_flight.peer.and_then(|peer| rates.get_mut(&peer)) {
                state.record_tx(failcnt);
            }
            pool.release(in_flight.buffer);
        }
        completed_frames
    }
    /// Stop the DMA engine of a queue.
    ///
    /// If frames are still pending after the first wait, the channel is forced idle for another
    /// wait. Returns whether the queue stopped.
    pub fn stop_dma<R: RegisterAccess>(&mut self, regs: &mut R, qid: QueueId) -> bool {
        let mask = bit!(qid.index());
        regs.write(AR_Q_TXD, mask);
        let mut stopped = Self::wait_stopped(regs, qid, mask);
        if !stopped {
            warn!("Queue {} didn't stop, forcing quiet period.", qid.index());
            regs.set_bits(AR_DIAG_SW, AR_DIAG_FORCE_CH_IDLE_HIGH);
            stopped = Self::wait_stopped(regs, qid, mask);
            regs.clear_bits(AR_DIAG_SW, AR_DIAG_FORCE_CH_IDLE_HIGH);
        }
        regs.write(AR_Q_TXD, 0);
        stopped
    }
    fn wait_stopped<R: RegisterAccess>(regs: &mut R, qid: QueueId, mask: u32) -> bool {
        regs.wait_until(AR_Q_TXE, mask, 0, STOP_POLL).is_ok()
            && regs
                .wait_until(ar_qsts(qid.index()), AR_Q_STS_PEND_FR_CNT.mask, 0, STOP_POLL)
                .is_ok()
    }
    /// Stop a queue and release all frames in it.
    pub fn drain<R: RegisterAccess, P: BufferPool<Buffer = B>>(
        &mut self,
        regs: &mut R,
        qid: QueueId,
        pool: &mut P,
    ) -> bool {
        let stopped = self.stop_dma(regs, qid);
        for in_flight in self.queues[qid.index()].reclaim_all() {
            pool.release(in_flight.buffer);
        }
        stopped
    }
    /// Stop all queues and release all frames.
    pub fn drain_all<R: RegisterAccess, P: BufferPool<Buffer = B>>(
        &mut self,
        regs: &mut R,
        pool: &mut P,
    ) -> bool {
        QueueId::ALL
            .iter()
            .fold(true, |stopped, qid| self.drain(regs, *qid, pool) && stopped)
    }
}

#[cfg(test)]
mod tests {
    use std::vec::Vec;

    use super::*;
    use crate::{
        buffer::mock::{MockBuffer, MockPool},
        dma_list::DescStatus,
        hal::mock::MockRegisters,
    };

    const PEER: PeerId = [0x02, 0, 0, 0, 0, 1];

    fn qos_data(tid: u8, len: usize) -> Vec<u8> {
        let mut frame = vec![0u8; len.max(26)];
        frame[0] = 0x88;
        frame[4..10].copy_from_slice(&PEER);
        frame[24] = tid;
        frame
    }
    fn data(addr1: [u8; 6], len: usize) -> Vec<u8> {
        let mut frame = vec![0u8; len.max(24)];
        frame[0] = 0x08;
        frame[4..10].copy_from_slice(&addr1);
        frame
    }
    fn mgmt(subtype: u8) -> Vec<u8> {
        let mut frame = vec![0u8; 40];
        frame[0] = subtype << 4;
        frame[4..10].copy_from_slice(&[0xff; 6]);
        frame
    }
    fn full_rates() -> RateState {
        RateState::new(&[2, 4, 11, 22, 12, 18, 24, 36, 48, 72, 96, 108], false)
    }
    fn engine(config: TxConfig) -> (TxEngine<MockBuffer>, MockRegisters) {
        let mut regs = MockRegisters::new();
        let mut engine = TxEngine::new(config, 0x4000_0000);
        engine.init(&mut regs, 1, 0x3f);
        (engine, regs)
    }
    /// Queue a unicast frame to [PEER].
    fn send(
        engine: &mut TxEngine<MockBuffer>,
        regs: &mut MockRegisters,
        pool: &mut MockPool,
        frame: MockBuffer,
        rates: Option<&RateState>,
    ) -> Result<QueueId, TxRejected<MockBuffer>> {
        let request = TxRequest::new(frame).to_peer(PEER);
        engine.transmit(regs, pool, request, rates, &TxContext::default())
    }
    fn last_desc(engine: &TxEngine<MockBuffer>, qid: QueueId) -> HwDescriptor {
        let queue = engine.queue(qid);
        queue.peek(queue.in_flight() - 1).unwrap()
    }

    #[test]
    fn classification() {
        let classify = |frame: &[u8], after_beacon| {
            TxEngine::<MockBuffer>::classify(&FrameHeader::parse(frame).unwrap(), after_beacon)
        };
        assert_eq!(classify(&qos_data(6, 40), false), QueueId::AcVo);
        assert_eq!(classify(&qos_data(1, 40), false), QueueId::AcBk);
        assert_eq!(classify(&qos_data(5, 40), false), QueueId::AcVi);
        assert_eq!(classify(&qos_data(3, 40), false), QueueId::AcBe);
        assert_eq!(classify(&mgmt(8), false), QueueId::Beacon);
        assert_eq!(classify(&mgmt(4), true), QueueId::Cab);
        assert_eq!(classify(&mgmt(4), false), QueueId::AcBe);
        assert_eq!(classify(&[0xa4, 0, 1, 0xc0, 2, 0, 0, 0, 0, 1], false), QueueId::PsPoll);
    }
    #[test]
    fn group_frames_use_lowest_rate() {
        let (mut engine, mut regs) = engine(TxConfig::default());
        let mut pool = MockPool::new(0, 0);
        let frame = MockBuffer::frame(1, &data([0xff; 6], 100), 1);
        let ctx = TxContext {
            is_5ghz: true,
            ..Default::default()
        };
        assert_eq!(
            engine
                .transmit(&mut regs, &mut pool, TxRequest::new(frame), None, &ctx)
                .ok(),
            Some(QueueId::AcBe)
        );
        let desc = last_desc(&engine, QueueId::AcBe);
        let rates = desc.rates();
        assert_eq!(
            [rates.rate0(), rates.rate1(), rates.rate2(), rates.rate3()],
            [0x0b; 4]
        );
        assert!(desc.frame_ctl().no_ack());
        assert_eq!(desc.durations()[0].dur_a(), 0);
        assert_eq!(regs.writes_to(AR_Q_TXE), [bit!(0)].to_vec());
    }
    #[test]
    fn unicast_data_walks_fallback_chain() {
        let (mut engine, mut regs) = engine(TxConfig::default());
        let mut pool = MockPool::new(0, 0);
        let mut rates = full_rates();
        rates.set_txrate(11);
        let frame = MockBuffer::frame(1, &qos_data(6, 200), 1);
        engine
            .transmit(
                &mut regs,
                &mut pool,
                TxRequest::new(frame).to_peer(PEER),
                Some(&rates),
                &TxContext::default(),
            )
            .unwrap();
        let desc = last_desc(&engine, QueueId::AcVo);
        let codes = desc.rates();
        assert_eq!(
            [codes.rate0(), codes.rate1(), codes.rate2(), codes.rate3()],
            [0x0c, 0x08, 0x0d, 0x09]
        );
        let tries = desc.tries();
        assert_eq!(
            [tries.tries0(), tries.tries1(), tries.tries2(), tries.tries3()],
            [2, 2, 2, 4]
        );
        // ACKs for 54 Mbps are sent at 24 Mbps.
        assert_eq!(
            desc.durations()[0].dur_a(),
            airtime(ACK_LEN, 8, false)
        );
        assert!(desc.frame_ctl().dur_update());
        assert!(!desc.frame_ctl().rts_enable());
        assert_eq!(desc.frame_ctl().frame_len(), 204);
        assert_eq!(regs.writes_to(AR_Q_TXE), [bit!(3)].to_vec());
    }
    #[test]
    fn unicast_data_needs_rate_state() {
        let (mut engine, mut regs) = engine(TxConfig::default());
        let mut pool = MockPool::new(0, 0);
        let frame = MockBuffer::frame(9, &qos_data(0, 60), 1);
        let rejected = engine
            .transmit(&mut regs, &mut pool, TxRequest::new(frame), None, &TxContext::default())
            .unwrap_err();
        assert_eq!(rejected.error, HalError::UnknownPeer);
        assert_eq!(rejected.buffer.map(|b| b.id), Some(9));
    }
    #[test]
    fn long_frames_use_rts() {
        let config = TxConfig {
            rts_threshold: 500,
            ..Default::default()
        };
        let (mut engine, mut regs) = engine(config);
        let mut pool = MockPool::new(0, 0);
        let mut rates = full_rates();
        rates.set_txrate(11);
        let frame = MockBuffer::frame(1, &qos_data(0, 1000), 1);
        engine
            .transmit(
                &mut regs,
                &mut pool,
                TxRequest::new(frame).to_peer(PEER),
                Some(&rates),
                &TxContext::default(),
            )
            .unwrap();
        let desc = last_desc(&engine, QueueId::AcBe);
        assert!(desc.frame_ctl().rts_enable());
        let codes = desc.rates();
        assert_eq!(
            [codes.rate0(), codes.rate1(), codes.rate2(), codes.rate3()],
            [0x0c; 4]
        );
        assert_eq!(desc.protection().rts_cts_rate(), 0x1a);
        let expected = airtime(CTS_LEN, RIDX_CCK2, false)
            + airtime(1004, 11, false)
            + airtime(ACK_LEN, 8, false);
        assert_eq!(desc.tries().burst_duration(), expected);
        assert!(desc.durations()[1].rts_cts_b());
    }
    #[test]
    fn cts_to_self_protection_for_ofdm() {
        let config = TxConfig {
            protection_mode: ProtectionMode::CtsOnly,
            ..Default::default()
        };
        let (mut engine, mut regs) = engine(config);
        let mut pool = MockPool::new(0, 0);
        let mut rates = full_rates();
        rates.set_txrate(6);
        let ctx = TxContext {
            use_protection: true,
            ..Default::default()
        };
        let frame = MockBuffer::frame(1, &qos_data(0, 100), 1);
        engine
            .transmit(&mut regs, &mut pool, TxRequest::new(frame).to_peer(PEER), Some(&rates), &ctx)
            .unwrap();
        let desc = last_desc(&engine, QueueId::AcBe);
        assert!(desc.frame_ctl().cts_enable());
        assert!(!desc.frame_ctl().rts_enable());
        assert_eq!(
            desc.tries().burst_duration(),
            airtime(104, 6, false) + airtime(ACK_LEN, 6, false)
        );

        // CCK frames aren't protected.
        rates.set_txrate(3);
        let frame = MockBuffer::frame(2, &qos_data(0, 100), 1);
        engine
            .transmit(&mut regs, &mut pool, TxRequest::new(frame).to_peer(PEER), Some(&rates), &ctx)
            .unwrap();
        let desc = last_desc(&engine, QueueId::AcBe);
        assert!(!desc.frame_ctl().cts_enable());
        assert_eq!(desc.tries().burst_duration(), 0);
    }
    #[test]
    fn scatter_over_descriptors() {
        let (mut engine, mut regs) = engine(TxConfig::default());
        let mut pool = MockPool::new(0, 0);
        let rates = full_rates();
        let frame = MockBuffer::frame(1, &qos_data(0, 300), 3);
        send(&mut engine, &mut regs, &mut pool, frame, Some(&rates)).unwrap();
        let queue = engine.queue(QueueId::AcBe);
        assert_eq!(queue.in_flight(), 3);
        let descs: Vec<HwDescriptor> = (0..3).filter_map(|i| queue.peek(i)).collect();
        assert_eq!(
            descs.iter().map(|d| d.buffer_ctl().more()).collect::<Vec<_>>(),
            [true, true, false].to_vec()
        );
        assert_eq!(
            descs.iter().map(|d| d.frame_ctl().int_req()).collect::<Vec<_>>(),
            [false, false, true].to_vec()
        );
        assert_eq!(
            descs.iter().map(|d| d.buffer_ctl().buf_len()).sum::<u16>(),
            300
        );
    }
    #[test]
    fn unmappable_frames_are_linearized_once() {
        let (mut engine, mut regs) = engine(TxConfig::default());
        let mut pool = MockPool::new(0, 0);
        let rates = full_rates();
        let frame = MockBuffer::frame(1, &qos_data(0, 400), MAX_SCATTER + 4);
        assert!(send(&mut engine, &mut regs, &mut pool, frame, Some(&rates)).is_ok());
        assert_eq!(engine.pending(QueueId::AcBe), 1);

        pool.linearize_fails = true;
        let frame = MockBuffer::unmapped(2, &qos_data(0, 400));
        let rejected = send(&mut engine, &mut regs, &mut pool, frame, Some(&rates)).unwrap_err();
        assert_eq!(rejected.error, HalError::DmaMapping);
        assert!(rejected.buffer.is_none());
        assert_eq!(pool.released, [2].to_vec());
        assert_eq!(engine.stats.dropped, 1);
    }
    #[test]
    fn ring_full_hands_frame_back() {
        let config = TxConfig {
            ring_size: 2,
            reserve: 1,
            ..Default::default()
        };
        let (mut engine, mut regs) = engine(config);
        let mut pool = MockPool::new(0, 0);
        let rates = full_rates();
        for id in 0..2 {
            let frame = MockBuffer::frame(id, &qos_data(0, 60), 1);
            assert!(send(&mut engine, &mut regs, &mut pool, frame, Some(&rates)).is_ok());
        }
        let frame = MockBuffer::frame(2, &qos_data(0, 60), 1);
        let rejected = send(&mut engine, &mut regs, &mut pool, frame, Some(&rates)).unwrap_err();
        assert_eq!(rejected.error, HalError::RingFull);
        assert_eq!(rejected.buffer.map(|b| b.id), Some(2));
        // Management frames may use the reserve.
        let frame = MockBuffer::frame(3, &mgmt(4), 1);
        let request = TxRequest::new(frame);
        assert!(engine
            .transmit(&mut regs, &mut pool, request, None, &TxContext::default())
            .is_ok());
        assert_eq!(engine.stats.ring_full, 1);
    }
    #[test]
    fn every_nth_interrupt_policy() {
        let config = TxConfig {
            interrupt_policy: TxInterruptPolicy::EveryNth(3),
            ..Default::default()
        };
        let (mut engine, mut regs) = engine(config);
        let mut pool = MockPool::new(0, 0);
        let rates = full_rates();
        let mut int_reqs = Vec::new();
        for id in 0..6 {
            let frame = MockBuffer::frame(id, &qos_data(0, 60), 1);
            send(&mut engine, &mut regs, &mut pool, frame, Some(&rates)).unwrap();
            int_reqs.push(last_desc(&engine, QueueId::AcBe).frame_ctl().int_req());
        }
        assert_eq!(int_reqs, [false, false, true, false, false, true].to_vec());
    }
    #[test]
    fn completion_updates_rate_control() {
        let (mut engine, mut regs) = engine(TxConfig::default());
        let mut pool = MockPool::new(0, 0);
        let mut peers = BTreeMap::new();
        peers.insert(PEER, full_rates());
        for id in 0..3 {
            let frame = MockBuffer::frame(id, &qos_data(0, 60), 1);
            send(&mut engine, &mut regs, &mut pool, frame, peers.get(&PEER)).unwrap();
        }
        let queue = engine.queue_mut(QueueId::AcBe);
        let done = DescStatus::new().with_done(true);
        queue.hw_complete(0, done.with_frame_ok(true), [0; 2]);
        queue.hw_complete(
            1,
            done.with_frame_ok(true)
                .with_data_fail_count(1)
                .with_final_series(2),
            [0; 2],
        );
        queue.hw_complete(
            2,
            done.with_excessive_retries(true)
                .with_data_fail_count(4)
                .with_final_series(3),
            [0; 2],
        );

        assert_eq!(engine.process_queue(&mut regs, QueueId::AcBe, &mut pool, &mut peers), 3);
        assert_eq!(pool.released, [0, 1, 2].to_vec());
        assert_eq!(peers.get_mut(&PEER).map(|r| r.take_counters()), Some((3, 2)));
        assert_eq!(engine.stats.errors, 1);
        assert_eq!(engine.pending(QueueId::AcBe), 0);
        // Nothing left to do.
        assert_eq!(engine.process_queue(&mut regs, QueueId::AcBe, &mut pool, &mut peers), 0);
    }
    #[test]
    fn underrun_raises_trigger_level_up_to_cap() {
        let mut regs = MockRegisters::new();
        let mut engine = TxEngine::new(TxConfig::default(), 0);
        engine.init(&mut regs, 0x1d, 0x1f);
        let mut pool = MockPool::new(0, 0);
        let mut peers = BTreeMap::new();
        peers.insert(PEER, full_rates());
        for round in 0..4 {
            let frame = MockBuffer::frame(round, &qos_data(0, 60), 1);
            send(&mut engine, &mut regs, &mut pool, frame, peers.get(&PEER)).unwrap();
            engine.queue_mut(QueueId::AcBe).hw_complete(
                0,
                DescStatus::new().with_done(true).with_underrun(true),
                [0; 2],
            );
            engine.process_queue(&mut regs, QueueId::AcBe, &mut pool, &mut peers);
        }
        assert_eq!(engine.trigger_level(), 0x1f);
        assert_eq!(AR_TXCFG_FTRIG.get(regs.get(AR_TXCFG)), 0x1f);
        assert_eq!(engine.stats.underruns, 4);
    }
    #[test]
    fn every_underrun_raises_trigger_level() {
        let (mut engine, mut regs) = engine(TxConfig::default());
        let mut pool = MockPool::new(0, 0);
        let mut peers = BTreeMap::new();
        peers.insert(PEER, full_rates());
        for id in 0..2 {
            let frame = MockBuffer::frame(id, &qos_data(0, 60), 1);
            send(&mut engine, &mut regs, &mut pool, frame, peers.get(&PEER)).unwrap();
        }
        let underrun = DescStatus::new().with_done(true).with_underrun(true);
        let queue = engine.queue_mut(QueueId::AcBe);
        queue.hw_complete(0, underrun, [0; 2]);
        queue.hw_complete(1, underrun, [0; 2]);
        assert_eq!(
            engine.process_queue(&mut regs, QueueId::AcBe, &mut pool, &mut peers),
            2
        );
        assert_eq!(engine.stats.underruns, 2);
        assert_eq!(engine.trigger_level(), 3);
        assert_eq!(AR_TXCFG_FTRIG.get(regs.get(AR_TXCFG)), 3);
    }
    #[test]
    fn rejected_frames_dont_count_towards_interrupts() {
        let config = TxConfig {
            ring_size: 2,
            reserve: 0,
            interrupt_policy: TxInterruptPolicy::EveryNth(3),
            ..Default::default()
        };
        let (mut engine, mut regs) = engine(config);
        let mut pool = MockPool::new(0, 0);
        let mut peers = BTreeMap::new();
        peers.insert(PEER, full_rates());
        for id in 0..2 {
            let frame = MockBuffer::frame(id, &qos_data(0, 60), 1);
            send(&mut engine, &mut regs, &mut pool, frame, peers.get(&PEER)).unwrap();
        }
        for id in 2..4 {
            let frame = MockBuffer::frame(id, &qos_data(0, 60), 1);
            let rejected = send(&mut engine, &mut regs, &mut pool, frame, peers.get(&PEER));
            assert!(rejected.is_err_and(|r| r.error == HalError::RingFull));
        }
        let done = DescStatus::new().with_done(true).with_frame_ok(true);
        engine.queue_mut(QueueId::AcBe).hw_complete(0, done, [0; 2]);
        engine.process_queue(&mut regs, QueueId::AcBe, &mut pool, &mut peers);
        let frame = MockBuffer::frame(5, &qos_data(0, 60), 1);
        send(&mut engine, &mut regs, &mut pool, frame, peers.get(&PEER)).unwrap();
        assert!(last_desc(&engine, QueueId::AcBe).frame_ctl().int_req());
    }
    #[test]
    fn stop_dma_forces_quiet_period() {
        let (mut engine, mut regs) = engine(TxConfig::default());
        regs.set(ar_qsts(2), 1);
        // The queue still has a frame pending during the whole first wait.
        let first_wait = (STOP_POLL.as_micros() / 10 + 1) as usize;
        regs.script(ar_qsts(2), &vec![1; first_wait]);
        regs.set(ar_qsts(2), 0);
        assert!(engine.stop_dma(&mut regs, QueueId::AcVi));
        assert_eq!(regs.writes_to(AR_Q_TXD), [bit!(2), 0].to_vec());
        assert!(regs
            .writes_to(AR_DIAG_SW)
            .iter()
            .any(|v| v & AR_DIAG_FORCE_CH_IDLE_HIGH != 0));
        assert_eq!(regs.get(AR_DIAG_SW) & AR_DIAG_FORCE_CH_IDLE_HIGH, 0);
    }
    #[test]
    fn drain_releases_everything() {
        let (mut engine, mut regs) = engine(TxConfig::default());
        let mut pool = MockPool::new(0, 0);
        let rates = full_rates();
        for id in 0..3 {
            let frame = MockBuffer::frame(id, &qos_data(id as u8 * 2, 60), 2);
            send(&mut engine, &mut regs, &mut pool, frame, Some(&rates)).unwrap();
        }
        assert!(engine.drain_all(&mut regs, &mut pool));
        let mut released = pool.released.clone();
        released.sort();
        assert_eq!(released, [0, 1, 2].to_vec());
        assert!(QueueId::ALL.iter().all(|qid| engine.pending(*qid) == 0));
    }
}
