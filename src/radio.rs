use alloc::collections::BTreeMap;
use core::mem::size_of;

use embassy_time::Duration;

use crate::{
    ani::{AniController, AniStats, ImmunityPolicy},
    buffer::BufferPool,
    calib::{CalStats, CalStatus, CalibrationEngine},
    chip::ChipOps,
    config::{OperatingRole, RadioConfig},
    dma_list::HwDescriptor,
    hal::RegisterAccess,
    rate::RateState,
    regs::*,
    rx::{RxEngine, RxInfo, RxStats},
    switch::{self, SwitchPath},
    sync::{RadioEvent, RadioEvents, RadioTimer},
    tx::{QueueId, TxContext, TxEngine, TxRejected, TxRequest, TxStats},
    Channel, HalError, HalResult, PeerId,
};

/// The upper layer, which received frames are handed to.
pub trait LinkLayer<B> {
    /// Take ownership of a received frame.
    fn deliver(&mut self, buffer: B, info: RxInfo);
    /// A frame failed the Michael MIC check.
    fn mic_failure(&mut self) {}
}

/// Arms the platform timers, whose expiry is reported through
/// [RadioEvents::timer_expired].
pub trait TimerScheduler {
    fn arm(&mut self, timer: RadioTimer, after: Duration);
    fn cancel(&mut self, timer: RadioTimer);
}

/// Bus addresses of the descriptor memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmaLayout {
    /// Start of the descriptors of all TX queues.
    pub tx_base: u32,
    pub rx_base: u32,
}
impl DmaLayout {
    /// Bytes of TX descriptor memory needed for `config`.
    pub const fn tx_bytes(config: &RadioConfig) -> usize {
        (config.tx.ring_size + config.tx.reserve) * size_of::<HwDescriptor>() * QueueId::COUNT
    }
    /// Bytes of RX descriptor memory needed for `config`.
    pub const fn rx_bytes(config: &RadioConfig) -> usize {
        config.rx.ring_size * size_of::<HwDescriptor>()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RadioStats {
    pub tx: TxStats,
    pub rx: RxStats,
    pub calibration: CalStats,
    pub ani: AniStats,
    /// Full resets, including the initial one.
    pub resets: u32,
    pub reset_failures: u32,
    pub fast_switches: u32,
    pub interrupts: u32,
    pub spurious_interrupts: u32,
}

/// The radio.
///
/// This owns the register file, the chip specific operations, the buffer pool and all driver
/// state. It is driven from a single task, either through [Radio::run] or by feeding events to
/// [Radio::handle_event].
pub struct Radio<R, C, P: BufferPool> {
    regs: R,
    chip: C,
    pool: P,
    config: RadioConfig,
    channel: Option<Channel>,
    tx: TxEngine<P::Buffer>,
    rx: RxEngine<P::Buffer>,
    calib: CalibrationEngine,
    ani: AniController,
    rates: BTreeMap<PeerId, RateState>,
    use_protection: bool,
    short_preamble: bool,
    beacon_rssi: Option<i32>,
    running: bool,
    resets: u32,
    reset_failures: u32,
    fast_switches: u32,
    interrupts: u32,
    spurious_interrupts: u32,
}
impl<R: RegisterAccess, C: ChipOps, P: BufferPool> Radio<R, C, P> {
    pub fn new(regs: R, mut chip: C, pool: P, config: RadioConfig, dma: DmaLayout) -> Self {
        chip.swap_rom_fields();
        Self {
            regs,
            chip,
            pool,
            tx: TxEngine::new(config.tx, dma.tx_base),
            rx: RxEngine::new(config.rx, dma.rx_base),
            calib: CalibrationEngine::new(config.calibration),
            ani: AniController::new(config.ani, config.role.into()),
            config,
            channel: None,
            rates: BTreeMap::new(),
            use_protection: false,
            short_preamble: false,
            beacon_rssi: None,
            running: false,
            resets: 0,
            reset_failures: 0,
            fast_switches: 0,
            interrupts: 0,
            spurious_interrupts: 0,
        }
    }
    pub fn config(&self) -> &RadioConfig {
        &self.config
    }
    pub fn channel(&self) -> Option<Channel> {
        self.channel
    }
    pub fn is_running(&self) -> bool {
        self.running
    }
    pub fn regs(&mut self) -> &mut R {
        &mut self.regs
    }
    pub fn chip(&self) -> &C {
        &self.chip
    }
    pub fn pool(&mut self) -> &mut P {
        &mut self.pool
    }
    pub fn tx(&self) -> &TxEngine<P::Buffer> {
        &self.tx
    }
    pub fn rx(&self) -> &RxEngine<P::Buffer> {
        &self.rx
    }
    pub fn calibration(&self) -> &CalibrationEngine {
        &self.calib
    }
    pub fn ani(&self) -> &AniController {
        &self.ani
    }
    pub fn stats(&self) -> RadioStats {
        RadioStats {
            tx: self.tx.stats,
            rx: self.rx.stats,
            calibration: self.calib.stats,
            ani: self.ani.stats,
            resets: self.resets,
            reset_failures: self.reset_failures,
            fast_switches: self.fast_switches,
            interrupts: self.interrupts,
            spurious_interrupts: self.spurious_interrupts,
        }
    }

    fn enable_interrupts(&mut self) {
        self.regs.write(AR_IMR, AR_IMR_DEFAULT);
        self.regs.write(AR_IER, AR_IER_ENABLE);
    }
    fn disable_interrupts(&mut self) {
        self.regs.write(AR_IER, 0);
    }
    /// Stop all DMA and take back every buffer from the hardware.
    fn quiesce(&mut self) {
        if !self.tx.drain_all(&mut self.regs, &mut self.pool) {
            warn!("TX queues didn't stop.");
        }
        self.rx.abort(&mut self.regs);
        if self.rx.stop_dma(&mut self.regs).is_err() {
            warn!("RX DMA didn't stop.");
        }
    }
    /// Reset the chip and bring it up on `chan`.
    ///
    /// A failing reset is retried with a power on reset.
    fn full_reset(&mut self, chan: Channel) -> HalResult<()> {
        self.disable_interrupts();
        self.quiesce();
        self.calib.abort();

        let caps = self.chip.caps();
        let mut power_on = self
            .channel
            .map_or(true, |current| current.band() != chan.band());
        let mut attempts = 0;
        while let Err(err) = switch::hw_reset(&mut self.regs, &mut self.chip, &chan, power_on) {
            attempts += 1;
            warn!("Reset failed: {:?}, attempt {}.", err, attempts);
            if attempts > self.config.reset_retries {
                error!("Chip didn't come out of reset.");
                self.reset_failures += 1;
                self.running = false;
                return Err(HalError::ResetFailed);
            }
            power_on = true;
        }
        self.channel = Some(chan);
        self.resets += 1;

        self.tx.init(
            &mut self.regs,
            caps.initial_tx_trigger_level,
            caps.max_tx_trigger_level,
        );
        if let Err(err) = self.rx.start(&mut self.regs, &mut self.pool) {
            error!("RX didn't start, stopping the radio.");
            self.running = false;
            return Err(err);
        }
        self.calib.start(&mut self.regs, &caps, &chan);
        if self.config.ani.enabled {
            self.ani.start(&mut self.regs, &chan);
        }
        self.enable_interrupts();
        debug!("Full reset to {} MHz done.", chan.freq);
        Ok(())
    }
    /// Bring up the radio on `chan` and start the periodic timers.
    pub fn start<T: TimerScheduler>(&mut self, chan: Channel, timers: &mut T) -> HalResult<()> {
        self.full_reset(chan)?;
        self.running = true;
        timers.arm(RadioTimer::Calibration, self.config.calibration.interval);
        if self.config.ani.enabled {
            timers.arm(RadioTimer::Ani, self.config.ani.interval);
        }
        info!("Radio started on {} MHz.", chan.freq);
        Ok(())
    }
    /// Stop the radio and return all buffers to the pool.
    pub fn stop<T: TimerScheduler>(&mut self, timers: &mut T) {
        timers.cancel(RadioTimer::Calibration);
        timers.cancel(RadioTimer::Ani);
        self.disable_interrupts();
        self.quiesce();
        self.regs.write(AR_RX_FILTER, 0);
        self.rx.reclaim(&mut self.pool);
        self.calib.abort();
        self.running = false;
        info!("Radio stopped.");
    }
    /// Reset the chip on the current channel.
    ///
    /// Anything in progress is aborted and all frames queued for TX are dropped.
    pub fn reset(&mut self) -> HalResult<()> {
        let chan = self.channel.ok_or(HalError::NotRunning)?;
        self.full_reset(chan)
    }
    /// Switch to another channel.
    ///
    /// Within the same band and bandwidth only the synthesizer is retuned. If that fails, or the
    /// band changes, the chip is reset.
    pub fn switch_channel(&mut self, chan: Channel) -> HalResult<SwitchPath> {
        if !self.running {
            return Err(HalError::NotRunning);
        }
        let caps = self.chip.caps();
        if switch::needs_full_reset(&caps, self.channel.as_ref(), &chan) {
            self.full_reset(chan)?;
            return Ok(SwitchPath::FullReset);
        }
        self.disable_interrupts();
        let tx_stopped = self.tx.drain_all(&mut self.regs, &mut self.pool);
        let retuned = if !tx_stopped {
            Err(HalError::Timeout { addr: AR_Q_TXE })
        } else {
            self.rx
                .stop(&mut self.regs)
                .and_then(|_| switch::set_chan(&mut self.regs, &mut self.chip, &chan))
        };
        if let Err(err) = retuned {
            warn!("Fast channel switch failed: {:?}, resetting.", err);
            self.full_reset(chan)?;
            return Ok(SwitchPath::FullReset);
        }
        self.channel = Some(chan);
        if let Err(err) = self.rx.start(&mut self.regs, &mut self.pool) {
            warn!("RX restart failed: {:?}, resetting.", err);
            self.full_reset(chan)?;
            return Ok(SwitchPath::FullReset);
        }
        if self.config.ani.enabled {
            self.ani.start(&mut self.regs, &chan);
        }
        self.enable_interrupts();
        self.fast_switches += 1;
        debug!("Switched to {} MHz.", chan.freq);
        Ok(SwitchPath::Fast)
    }

    /// Create the rate state of a peer, from its rates in units of 500 kbps.
    pub fn peer_associated(&mut self, peer: PeerId, rates: &[u8], short_preamble: bool) {
        self.rates.insert(peer, RateState::new(rates, short_preamble));
    }
    pub fn peer_disassociated(&mut self, peer: &PeerId) {
        self.rates.remove(peer);
    }
    /// The rate state of a peer, through which rate control selects the TX rate.
    pub fn rate_state_mut(&mut self, peer: &PeerId) -> Option<&mut RateState> {
        self.rates.get_mut(peer)
    }
    /// Enable protection of OFDM frames, when legacy stations are present.
    pub fn set_protection(&mut self, enabled: bool) {
        self.use_protection = enabled;
    }
    pub fn set_short_preamble(&mut self, enabled: bool) {
        self.short_preamble = enabled;
    }
    /// Report the RSSI of the beacons of our access point.
    pub fn note_beacon_rssi(&mut self, rssi: i32) {
        self.beacon_rssi = Some(rssi);
    }
    /// Switch between station and access point operation.
    pub fn set_role(&mut self, role: OperatingRole) {
        self.config.role = role;
        self.ani.set_policy(ImmunityPolicy::from(role));
    }

    /// Queue a frame for transmission.
    pub fn transmit(
        &mut self,
        request: TxRequest<P::Buffer>,
    ) -> Result<QueueId, TxRejected<P::Buffer>> {
        let Some(chan) = self.channel.filter(|_| self.running) else {
            return Err(TxRejected {
                error: HalError::NotRunning,
                buffer: Some(request.buffer),
            });
        };
        let ctx = TxContext {
            is_5ghz: chan.is_5ghz(),
            use_protection: self.use_protection,
            short_preamble: self.short_preamble,
        };
        let rates = request.peer.as_ref().and_then(|peer| self.rates.get(peer));
        self.tx
            .transmit(&mut self.regs, &mut self.pool, request, rates, &ctx)
    }

    fn update_ani_rssi(&mut self) {
        if let Some(rssi) = self.beacon_rssi.or_else(|| self.rx.avg_rssi()) {
            self.ani.set_rssi(rssi);
        }
    }
    /// Service the interrupt status.
    ///
    /// A fatal bus error resets the chip, the error of that reset is returned.
    pub fn handle_interrupt<L: LinkLayer<P::Buffer>>(&mut self, link: &mut L) -> HalResult<()> {
        if !self.running {
            return Ok(());
        }
        let sync = self.regs.read(AR_INTR_SYNC_CAUSE);
        if sync & (AR_INTR_SYNC_LOCAL_TIMEOUT | AR_INTR_SYNC_RADM_CPL_TIMEOUT) != 0 {
            warn!("Fatal bus error {:x}, resetting.", sync);
            self.regs.write(AR_INTR_SYNC_CAUSE, sync);
            return self.reset();
        }
        let isr = self.regs.read(AR_ISR_RAC);
        if isr == AR_INTR_SPURIOUS || isr == 0 {
            self.spurious_interrupts += 1;
            return Ok(());
        }
        self.interrupts += 1;
        if isr
            & (AR_ISR_RXOK
                | AR_ISR_RXDESC
                | AR_ISR_RXERR
                | AR_ISR_RXEOL
                | AR_ISR_RXORN
                | AR_ISR_RXMINTR
                | AR_ISR_RXINTM)
            != 0
        {
            self.rx.poll(&mut self.regs, &mut self.pool, link);
            if isr & (AR_ISR_RXEOL | AR_ISR_RXORN) != 0 {
                trace!("RX overrun.");
                self.regs.write(AR_CR, AR_CR_RXE);
            }
        }
        if isr & (AR_ISR_TXOK | AR_ISR_TXDESC | AR_ISR_TXERR | AR_ISR_TXEOL) != 0 {
            let s0 = self.regs.read(AR_ISR_S0_S);
            let s1 = self.regs.read(AR_ISR_S1_S);
            let queues = AR_ISR_S0_QCU_TXOK.get(s0)
                | AR_ISR_S0_QCU_TXDESC.get(s0)
                | AR_ISR_S1_QCU_TXERR.get(s1)
                | AR_ISR_S1_QCU_TXEOL.get(s1);
            for qid in QueueId::ALL {
                // Without per queue status, look at every queue with frames in flight.
                let signaled = queues & (1 << qid.index()) != 0;
                if signaled || (queues == 0 && self.tx.pending(qid) != 0) {
                    self.tx
                        .process_queue(&mut self.regs, qid, &mut self.pool, &mut self.rates);
                }
            }
        }
        if isr & AR_ISR_MIB != 0 && self.config.ani.enabled {
            self.update_ani_rssi();
            self.ani.monitor(&mut self.regs);
        }
        Ok(())
    }
    /// Run the work of an expired timer and arm it again.
    pub fn handle_timer<T: TimerScheduler>(&mut self, timer: RadioTimer, timers: &mut T) {
        if !self.running {
            return;
        }
        match timer {
            RadioTimer::Calibration => {
                if self.calib.step(&mut self.regs) == CalStatus::Idle {
                    self.calib.kick_noise_floor(&mut self.regs);
                }
                timers.arm(RadioTimer::Calibration, self.config.calibration.interval);
            }
            RadioTimer::Ani => {
                if !self.config.ani.enabled {
                    return;
                }
                self.update_ani_rssi();
                self.ani.monitor(&mut self.regs);
                timers.arm(RadioTimer::Ani, self.config.ani.interval);
            }
        }
    }
    pub fn handle_event<L: LinkLayer<P::Buffer>, T: TimerScheduler>(
        &mut self,
        event: RadioEvent,
        link: &mut L,
        timers: &mut T,
    ) -> HalResult<()> {
        match event {
            RadioEvent::Interrupt => self.handle_interrupt(link),
            RadioEvent::Timer(timer) => {
                self.handle_timer(timer, timers);
                Ok(())
            }
        }
    }
    /// Handle events until the radio fails.
    ///
    /// This only returns, if the radio can't recover from an error.
    pub async fn run<L: LinkLayer<P::Buffer>, T: TimerScheduler>(
        &mut self,
        events: &RadioEvents,
        link: &mut L,
        timers: &mut T,
    ) -> HalError {
        loop {
            let event = events.next().await;
            if let Err(err) = self.handle_event(event, link, timers) {
                error!("Radio failed: {:?}", err);
                return err;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::vec::Vec;

    use embassy_futures::{block_on, select::select};

    use super::*;
    use crate::{
        buffer::mock::{MockBuffer, MockPool},
        calib::CalPhase,
        channel::PhyMode,
        chip::mock::{ChipCall, MockChip},
        config::{RxConfig, TxConfig},
        dma_list::{DescStatus, RxStatus},
        hal::mock::MockRegisters,
        rx::tests::MockLink,
    };

    const PEER: PeerId = [0x02, 0, 0, 0, 0, 1];
    const RX_RING: usize = 8;

    #[derive(Default)]
    struct MockTimers {
        armed: Vec<(RadioTimer, Duration)>,
        cancelled: Vec<RadioTimer>,
    }
    impl TimerScheduler for MockTimers {
        fn arm(&mut self, timer: RadioTimer, after: Duration) {
            self.armed.push((timer, after));
        }
        fn cancel(&mut self, timer: RadioTimer) {
            self.cancelled.push(timer);
        }
    }

    type TestRadio = Radio<MockRegisters, MockChip, MockPool>;

    fn hardware() -> MockRegisters {
        let mut regs = MockRegisters::new()
            .with(AR_PHY_RFBUS_GRANT, AR_PHY_RFBUS_GRANT_EN)
            .with(AR_RTC_STATUS, AR_RTC_STATUS_ON)
            .with(AR_CCCNT, 1);
        regs.self_clearing(AR_Q_TXE, u32::MAX);
        regs.self_clearing(ar_phy_timing_ctrl4(0), AR_PHY_TIMING_CTRL4_DO_CAL);
        regs
    }
    fn radio(chip: MockChip) -> TestRadio {
        let config = RadioConfig {
            tx: TxConfig {
                ring_size: 8,
                ..Default::default()
            },
            rx: RxConfig {
                ring_size: RX_RING,
                buffer_size: 256,
            },
            ..Default::default()
        };
        Radio::new(
            hardware(),
            chip,
            MockPool::new(256, 2 * RX_RING),
            config,
            DmaLayout {
                tx_base: 0x2000_0000,
                rx_base: 0x3000_0000,
            },
        )
    }
    fn started(chan: Channel) -> (TestRadio, MockTimers) {
        let mut radio = radio(MockChip::new());
        let mut timers = MockTimers::default();
        assert_eq!(radio.start(chan, &mut timers), Ok(()));
        (radio, timers)
    }
    fn inits(radio: &TestRadio) -> usize {
        radio
            .chip()
            .count(|call| matches!(call, ChipCall::InitPll(_)))
    }
    fn unicast_data(id: u32) -> MockBuffer {
        let mut frame = vec![0u8; 100];
        frame[0] = 0x08;
        frame[4..10].copy_from_slice(&PEER);
        MockBuffer::frame(id, &frame, 1)
    }

    #[test]
    fn start_brings_up_the_chip() {
        let (mut radio, timers) = started(Channel::new(5180, PhyMode::A));
        assert!(radio.is_running());
        assert_eq!(radio.stats().resets, 1);
        assert_eq!(inits(&radio), 1);
        assert_eq!(radio.rx().ring().in_flight(), RX_RING);
        assert_eq!(radio.calibration().phase(), Some(CalPhase::Iq));
        assert_eq!(radio.regs().get(AR_IER), AR_IER_ENABLE);
        assert_eq!(radio.regs().get(AR_IMR), AR_IMR_DEFAULT);
        assert_eq!(
            timers.armed,
            [
                (RadioTimer::Calibration, Duration::from_millis(500)),
                (RadioTimer::Ani, Duration::from_millis(500))
            ]
            .to_vec()
        );
    }
    #[test]
    fn same_band_switch_takes_fast_path() {
        let (mut radio, mut timers) = started(Channel::new(5180, PhyMode::A));
        radio.handle_timer(RadioTimer::Calibration, &mut timers);
        let calib_stats = radio.calibration().stats;
        assert_eq!(
            radio.switch_channel(Channel::new(5200, PhyMode::A)),
            Ok(SwitchPath::Fast)
        );
        assert_eq!(inits(&radio), 1);
        assert_eq!(radio.stats().resets, 1);
        assert_eq!(radio.stats().fast_switches, 1);
        assert_eq!(radio.channel().map(|c| c.freq), Some(5200));
        // The calibration cycle continues where it was.
        assert_eq!(radio.calibration().phase(), Some(CalPhase::Iq));
        assert_eq!(radio.calibration().stats, calib_stats);
        assert_eq!(radio.rx().ring().in_flight(), RX_RING);
        assert!(radio.pool().released.is_empty());
        assert_eq!(radio.regs().get(AR_IER), AR_IER_ENABLE);
    }
    #[test]
    fn band_change_takes_full_reset() {
        let (mut radio, _) = started(Channel::new(5180, PhyMode::A));
        assert_eq!(
            radio.switch_channel(Channel::new(2412, PhyMode::G)),
            Ok(SwitchPath::FullReset)
        );
        assert_eq!(inits(&radio), 2);
        assert_eq!(radio.stats().resets, 2);
        assert_eq!(radio.regs().writes_to(AR_RTC_RESET), [0, 1, 0, 1].to_vec());
        assert_eq!(radio.rx().ring().in_flight(), RX_RING);
    }
    #[test]
    fn failed_fast_switch_falls_back_to_reset() {
        let (mut radio, _) = started(Channel::new(5180, PhyMode::A));
        radio.regs().set(AR_PHY_RFBUS_GRANT, 0);
        assert_eq!(
            radio.switch_channel(Channel::new(5200, PhyMode::A)),
            Ok(SwitchPath::FullReset)
        );
        assert_eq!(radio.stats().fast_switches, 0);
        assert_eq!(radio.stats().resets, 2);
        assert_eq!(radio.channel().map(|c| c.freq), Some(5200));
    }
    #[test]
    fn switch_without_rx_buffers_stops_the_radio() {
        let (mut radio, mut timers) = started(Channel::new(5180, PhyMode::A));
        radio.rx.reclaim(&mut radio.pool);
        radio.pool().available = 0;
        assert_eq!(
            radio.switch_channel(Channel::new(5200, PhyMode::A)),
            Err(HalError::AllocationFailure)
        );
        assert_eq!(radio.stats().fast_switches, 0);
        assert_eq!(radio.stats().resets, 2);
        assert!(!radio.is_running());
        let rejected = radio.transmit(TxRequest::new(unicast_data(1)).to_peer(PEER));
        assert!(rejected.is_err_and(|r| r.error == HalError::NotRunning));

        radio.pool().available = RX_RING;
        assert_eq!(radio.start(Channel::new(5200, PhyMode::A), &mut timers), Ok(()));
        assert!(radio.is_running());
        assert_eq!(radio.rx().ring().in_flight(), RX_RING);
        assert_eq!(radio.regs().get(AR_IER), AR_IER_ENABLE);
    }
    #[test]
    fn reset_is_retried() {
        let mut radio = radio(MockChip {
            failing_synth: 2,
            ..MockChip::new()
        });
        let mut timers = MockTimers::default();
        assert_eq!(
            radio.start(Channel::new(2412, PhyMode::G), &mut timers),
            Ok(())
        );
        assert_eq!(inits(&radio), 3);

        let mut radio = self::radio(MockChip {
            failing_synth: 100,
            ..MockChip::new()
        });
        assert_eq!(
            radio.start(Channel::new(2412, PhyMode::G), &mut timers),
            Err(HalError::ResetFailed)
        );
        assert_eq!(inits(&radio), 4);
        assert_eq!(radio.stats().reset_failures, 1);
        assert!(!radio.is_running());
    }
    #[test]
    fn not_running() {
        let mut radio = radio(MockChip::new());
        let rejected = radio.transmit(TxRequest::new(unicast_data(1)).to_peer(PEER));
        assert!(rejected.is_err_and(|r| r.error == HalError::NotRunning && r.buffer.is_some()));
        assert_eq!(
            radio.switch_channel(Channel::new(5180, PhyMode::A)),
            Err(HalError::NotRunning)
        );
        assert_eq!(radio.reset(), Err(HalError::NotRunning));
    }
    #[test]
    fn transmit_and_complete() {
        let (mut radio, _) = started(Channel::new(2412, PhyMode::G));
        let rejected = radio.transmit(TxRequest::new(unicast_data(1)).to_peer(PEER));
        assert!(rejected.is_err_and(|r| r.error == HalError::UnknownPeer));

        radio.peer_associated(PEER, &[2, 4, 11, 22], false);
        assert_eq!(
            radio
                .transmit(TxRequest::new(unicast_data(2)).to_peer(PEER))
                .map_err(|r| r.error),
            Ok(QueueId::AcBe)
        );
        assert_eq!(radio.tx().pending(QueueId::AcBe), 1);

        radio.tx.queue_mut(QueueId::AcBe).hw_complete(
            0,
            DescStatus::new().with_done(true).with_frame_ok(true).with_data_fail_count(1),
            [0; 2],
        );
        radio.regs().set(AR_ISR_RAC, AR_ISR_TXOK);
        radio.regs().set(AR_ISR_S0_S, 1 << QueueId::AcBe.index());
        assert_eq!(radio.handle_interrupt(&mut MockLink::default()), Ok(()));
        assert_eq!(radio.tx().pending(QueueId::AcBe), 0);
        assert_eq!(radio.pool().released, [2].to_vec());
        assert_eq!(
            radio.rate_state_mut(&PEER).map(|state| state.take_counters()),
            Some((1, 1))
        );
    }
    #[test]
    fn receive_through_interrupt() {
        let (mut radio, _) = started(Channel::new(2412, PhyMode::G));
        radio.rx.ring_mut().hw_complete(
            0,
            DescStatus::new().with_done(true).with_frame_ok(true),
            [RxStatus::new().with_data_len(64).with_rssi(25).into_bits(), 0],
        );
        radio.regs().set(AR_ISR_RAC, AR_ISR_RXOK);
        radio.regs().clear_on_read(AR_ISR_RAC);
        let mut link = MockLink::default();
        assert_eq!(radio.handle_interrupt(&mut link), Ok(()));
        assert_eq!(link.delivered.len(), 1);
        assert_eq!(link.delivered[0].1.len, 64);
        // The status was cleared by reading it.
        assert_eq!(radio.handle_interrupt(&mut link), Ok(()));
        assert_eq!(radio.stats().spurious_interrupts, 1);
        assert_eq!(radio.stats().interrupts, 1);
        assert_eq!(radio.stats().rx.frames, 1);
    }
    #[test]
    fn spurious_interrupts_are_ignored() {
        let (mut radio, _) = started(Channel::new(2412, PhyMode::G));
        radio.regs().set(AR_ISR_RAC, AR_INTR_SPURIOUS);
        assert_eq!(radio.handle_interrupt(&mut MockLink::default()), Ok(()));
        assert_eq!(radio.stats().spurious_interrupts, 1);
        assert_eq!(radio.stats().interrupts, 0);
    }
    #[test]
    fn bus_error_resets_the_chip() {
        let (mut radio, _) = started(Channel::new(2412, PhyMode::G));
        radio.regs().set(AR_INTR_SYNC_CAUSE, AR_INTR_SYNC_LOCAL_TIMEOUT);
        radio.regs().clear_on_read(AR_INTR_SYNC_CAUSE);
        assert_eq!(radio.handle_interrupt(&mut MockLink::default()), Ok(()));
        assert_eq!(radio.stats().resets, 2);
        assert!(radio.is_running());
    }
    #[test]
    fn run_returns_fatal_errors() {
        let (mut radio, mut timers) = started(Channel::new(2412, PhyMode::G));
        radio.chip.failing_synth = 100;
        radio.regs().set(AR_INTR_SYNC_CAUSE, AR_INTR_SYNC_RADM_CPL_TIMEOUT);
        let events = RadioEvents::new();
        events.signal_interrupt();
        let err = block_on(radio.run(&events, &mut MockLink::default(), &mut timers));
        assert_eq!(err, HalError::ResetFailed);
        assert!(!radio.is_running());
    }
    #[test]
    fn timers_are_rearmed() {
        let (mut radio, mut timers) = started(Channel::new(5180, PhyMode::A));
        timers.armed.clear();
        radio.note_beacon_rssi(30);
        radio.handle_timer(RadioTimer::Ani, &mut timers);
        radio.handle_timer(RadioTimer::Calibration, &mut timers);
        assert_eq!(radio.ani().rssi(), 30);
        assert_eq!(radio.ani().stats.ticks, 1);
        assert_eq!(timers.armed.len(), 2);
    }
    #[test]
    fn run_drains_events() {
        let (mut radio, mut timers) = started(Channel::new(2412, PhyMode::G));
        timers.armed.clear();
        let events = RadioEvents::new();
        let mut link = MockLink::default();
        radio.regs().set(AR_ISR_RAC, AR_ISR_MIB);
        radio.regs().clear_on_read(AR_ISR_RAC);
        events.signal_interrupt();
        events.signal_interrupt();
        events.timer_expired(RadioTimer::Ani);
        block_on(select(
            radio.run(&events, &mut link, &mut timers),
            core::future::ready(()),
        ));
        assert_eq!(events.try_next(), None);
        assert_eq!(radio.stats().interrupts, 1);
        // Once from the MIB interrupt and once from the timer.
        assert_eq!(radio.ani().stats.ticks, 2);
        assert_eq!(
            timers.armed,
            [(RadioTimer::Ani, Duration::from_millis(500))].to_vec()
        );
    }
    #[test]
    fn stop_returns_all_buffers() {
        let (mut radio, mut timers) = started(Channel::new(2412, PhyMode::G));
        radio.stop(&mut timers);
        assert!(!radio.is_running());
        assert_eq!(radio.pool().released.len(), RX_RING);
        assert_eq!(
            timers.cancelled,
            [RadioTimer::Calibration, RadioTimer::Ani].to_vec()
        );
        assert_eq!(radio.regs().get(AR_IER), 0);
    }
}
