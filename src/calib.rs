use crate::{
    chip::ChipCaps,
    config::CalibrationConfig,
    hal::{RegisterAccess, RegisterPort},
    regs::*,
    Channel, HalError, HalResult,
};

/// The most RX chains, that can be calibrated.
pub const MAX_CHAINS: usize = 3;

/// A stage of the calibration cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalPhase {
    /// IQ imbalance.
    Iq,
    AdcGain,
    /// ADC DC offset.
    AdcDc,
}
impl CalPhase {
    /// The phases in the order they are run.
    pub const ALL: [Self; 3] = [Self::Iq, Self::AdcGain, Self::AdcDc];
    /// Value of the calibration mode selector.
    pub const fn calmode(&self) -> u32 {
        match self {
            Self::Iq => AR_PHY_CALMODE_IQ,
            Self::AdcGain => AR_PHY_CALMODE_ADC_GAIN,
            Self::AdcDc => AR_PHY_CALMODE_ADC_DC_PER,
        }
    }
    /// Whether the phase is needed on the channel.
    pub fn required(&self, caps: &ChipCaps, chan: &Channel) -> bool {
        match self {
            Self::Iq => caps.supports_iq_cal,
            Self::AdcGain | Self::AdcDc => chan.is_5ghz() || chan.extension.is_some(),
        }
    }
}

/// Accumulated IQ measurements of one chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IqSample {
    pub pwr_i: u64,
    pub pwr_q: u64,
    pub corr: i64,
}
impl IqSample {
    /// Convert the sample set into `(i_coff, q_coff)`.
    ///
    /// `i_coff` carries the sign of the correlation.
    pub fn coefficients(&self) -> HalResult<(i32, i32)> {
        let i_denom = (self.pwr_i / 2 + self.pwr_q / 2) / 128;
        let q_denom = self.pwr_q / 64;
        if i_denom == 0 || q_denom == 0 {
            return Err(HalError::DegenerateCalibration);
        }
        let magnitude = (self.corr.unsigned_abs() / i_denom).min(0x3f) as i32;
        let i_coff = if self.corr < 0 { -magnitude } else { magnitude };
        let q_coff = ((self.pwr_i / q_denom) as i64 - 64).clamp(-16, 15) as i32;
        Ok((i_coff, q_coff))
    }
}

/// Accumulated ADC power measurements of one chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AdcSample {
    pub odd_i: u64,
    pub even_i: u64,
    pub odd_q: u64,
    pub even_q: u64,
}
impl AdcSample {
    /// The gain mismatch `(gain_i, gain_q)` in 1/32.
    pub fn gain_coefficients(&self) -> HalResult<(u32, u32)> {
        if self.odd_i == 0 || self.even_q == 0 {
            return Err(HalError::DegenerateCalibration);
        }
        let gain_i = (self.even_i * 32 / self.odd_i).min(0x3f) as u32;
        let gain_q = (self.odd_q * 32 / self.even_q).min(0x3f) as u32;
        Ok((gain_i, gain_q))
    }
    /// The DC offset mismatch `(dc_i, dc_q)`, with `count` measurements accumulated.
    pub fn dc_coefficients(&self, count: u64) -> HalResult<(i32, i32)> {
        if count == 0 {
            return Err(HalError::DegenerateCalibration);
        }
        let count = count as i64;
        let dc_i = (self.even_i as i64 - 2 * self.odd_i as i64) / count;
        let dc_q = (self.odd_q as i64 - 2 * self.even_q as i64) / count;
        Ok((dc_i as i32, dc_q as i32))
    }
}

/// Result of a calibration step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalStatus {
    /// No calibration is running.
    Idle,
    /// The hardware is still measuring, or more samples are needed.
    InProgress(CalPhase),
    /// All phases were applied.
    Done,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalStats {
    /// Completed calibration cycles.
    pub cycles: u32,
    pub phases_applied: u32,
    /// Chains, whose correction was skipped due to a degenerate sample set.
    pub degenerate: u32,
}

/// Drives the IQ, ADC gain and ADC DC offset calibration.
///
/// Every step is triggered from the calibration timer. The hardware measures for a while after
/// being armed, so a step either finds it still busy, or accumulates one round of measurements.
pub struct CalibrationEngine {
    config: CalibrationConfig,
    phases: [Option<CalPhase>; 3],
    current: usize,
    nchains: usize,
    nsamples: u32,
    iq: [IqSample; MAX_CHAINS],
    adc: [AdcSample; MAX_CHAINS],
    pub stats: CalStats,
}
impl CalibrationEngine {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            config,
            phases: [None; 3],
            current: 0,
            nchains: 0,
            nsamples: 0,
            iq: [IqSample::default(); MAX_CHAINS],
            adc: [AdcSample::default(); MAX_CHAINS],
            stats: CalStats::default(),
        }
    }
    /// The phase currently running.
    pub fn phase(&self) -> Option<CalPhase> {
        self.phases.get(self.current).copied().flatten()
    }
    pub fn is_running(&self) -> bool {
        self.phase().is_some()
    }
    fn reset_samples(&mut self) {
        self.nsamples = 0;
        self.iq = [IqSample::default(); MAX_CHAINS];
        self.adc = [AdcSample::default(); MAX_CHAINS];
    }
    /// Start a noise floor calibration.
    pub fn kick_noise_floor<R: RegisterAccess>(&mut self, regs: &mut R) {
        regs.clear_bits(AR_PHY_AGC_CONTROL, AR_PHY_AGC_CONTROL_NO_UPDATE_NF);
        regs.set_bits(
            AR_PHY_AGC_CONTROL,
            AR_PHY_AGC_CONTROL_ENABLE_NF | AR_PHY_AGC_CONTROL_NF,
        );
    }
    /// Let the hardware start measuring for `phase`.
    fn arm<R: RegisterAccess>(&mut self, regs: &mut R, phase: CalPhase) {
        regs.modify(
            ar_phy_timing_ctrl4(0),
            AR_PHY_TIMING_CTRL4_IQCAL_LOG_COUNT_MAX,
            self.config.log_count_max,
        );
        regs.write(AR_PHY_CALMODE, phase.calmode());
        regs.set_bits(ar_phy_timing_ctrl4(0), AR_PHY_TIMING_CTRL4_DO_CAL);
    }
    /// Start a new calibration cycle for `chan`, discarding the one in progress.
    pub fn start<R: RegisterAccess>(&mut self, regs: &mut R, caps: &ChipCaps, chan: &Channel) {
        let mut phases = CalPhase::ALL
            .into_iter()
            .filter(|phase| phase.required(caps, chan));
        self.phases = [phases.next(), phases.next(), phases.next()];
        self.current = 0;
        self.nchains = caps.nrxchains.min(MAX_CHAINS);
        self.reset_samples();
        self.kick_noise_floor(regs);
        if let Some(phase) = self.phase() {
            debug!("Starting calibration with {:?}.", phase);
            self.arm(regs, phase);
        }
    }
    /// Stop the calibration cycle.
    pub fn abort(&mut self) {
        self.phases = [None; 3];
        self.current = 0;
        self.reset_samples();
    }
    fn accumulate<R: RegisterAccess>(&mut self, regs: &mut R, phase: CalPhase) {
        for chain in 0..self.nchains {
            let meas = [0, 1, 2, 3].map(|index| regs.read(ar_phy_cal_meas(index, chain)));
            match phase {
                CalPhase::Iq => {
                    let iq = &mut self.iq[chain];
                    iq.pwr_i += meas[0] as u64;
                    iq.pwr_q += meas[1] as u64;
                    iq.corr += meas[2] as i32 as i64;
                }
                CalPhase::AdcGain | CalPhase::AdcDc => {
                    let adc = &mut self.adc[chain];
                    adc.odd_i += meas[0] as u64;
                    adc.even_i += meas[1] as u64;
                    adc.odd_q += meas[2] as u64;
                    adc.even_q += meas[3] as u64;
                }
            }
        }
    }
    fn apply<R: RegisterAccess>(&mut self, regs: &mut R, phase: CalPhase) {
        let count = (1u64 << (self.config.log_count_max + 5)) * self.config.samples as u64;
        for chain in 0..self.nchains {
            let result = match phase {
                CalPhase::Iq => self.iq[chain].coefficients().map(|(i_coff, q_coff)| {
                    let reg = regs.read(ar_phy_timing_ctrl4(chain));
                    let reg =
                        AR_PHY_TIMING_CTRL4_IQCORR_Q_I_COFF.set(reg, i_coff.wrapping_neg() as u32);
                    let reg = AR_PHY_TIMING_CTRL4_IQCORR_Q_Q_COFF.set(reg, q_coff as u32);
                    regs.write(ar_phy_timing_ctrl4(chain), reg);
                    trace!("Chain {}: i_coff {} q_coff {}.", chain, i_coff, q_coff);
                }),
                CalPhase::AdcGain => self.adc[chain].gain_coefficients().map(|(gain_i, gain_q)| {
                    let addr = ar_phy_new_adc_dc_gain_corr(chain);
                    let reg = regs.read(addr);
                    let reg = AR_PHY_NEW_ADC_DC_GAIN_IGAIN.set(reg, gain_i);
                    regs.write(addr, AR_PHY_NEW_ADC_DC_GAIN_QGAIN.set(reg, gain_q));
                }),
                CalPhase::AdcDc => self.adc[chain].dc_coefficients(count).map(|(dc_i, dc_q)| {
                    let addr = ar_phy_new_adc_dc_gain_corr(chain);
                    let reg = regs.read(addr);
                    let reg = AR_PHY_NEW_ADC_DC_GAIN_IDC.set(reg, dc_i as u32);
                    regs.write(addr, AR_PHY_NEW_ADC_DC_GAIN_QDC.set(reg, dc_q as u32));
                }),
            };
            if result.is_err() {
                debug!("Skipping {:?} correction of chain {}.", phase, chain);
                self.stats.degenerate += 1;
            }
        }
        match phase {
            CalPhase::Iq => {
                regs.set_bits(ar_phy_timing_ctrl4(0), AR_PHY_TIMING_CTRL4_IQCORR_ENABLE)
            }
            CalPhase::AdcGain => regs.set_bits(
                ar_phy_new_adc_dc_gain_corr(0),
                AR_PHY_NEW_ADC_GAIN_CORR_ENABLE,
            ),
            CalPhase::AdcDc => regs.set_bits(
                ar_phy_new_adc_dc_gain_corr(0),
                AR_PHY_NEW_ADC_DC_OFFSET_CORR_ENABLE,
            ),
        }
        self.stats.phases_applied += 1;
    }
    /// Advance the calibration by one round.
    pub fn step<R: RegisterAccess>(&mut self, regs: &mut R) -> CalStatus {
        let Some(phase) = self.phase() else {
            return CalStatus::Idle;
        };
        if regs.read(ar_phy_timing_ctrl4(0)) & AR_PHY_TIMING_CTRL4_DO_CAL != 0 {
            return CalStatus::InProgress(phase);
        }
        self.accumulate(regs, phase);
        self.nsamples += 1;
        if self.nsamples < self.config.samples {
            self.arm(regs, phase);
            return CalStatus::InProgress(phase);
        }
        self.apply(regs, phase);
        self.reset_samples();
        self.current += 1;
        match self.phase() {
            Some(next) => {
                self.arm(regs, next);
                CalStatus::InProgress(next)
            }
            None => {
                self.stats.cycles += 1;
                debug!("Calibration done.");
                CalStatus::Done
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{channel::PhyMode, hal::mock::MockRegisters};

    fn engine() -> CalibrationEngine {
        CalibrationEngine::new(CalibrationConfig::default())
    }
    fn hardware() -> MockRegisters {
        let mut regs = MockRegisters::new();
        regs.self_clearing(ar_phy_timing_ctrl4(0), AR_PHY_TIMING_CTRL4_DO_CAL);
        regs
    }
    fn set_meas(regs: &mut MockRegisters, chain: usize, meas: [u32; 4]) {
        for (index, value) in meas.into_iter().enumerate() {
            regs.set(ar_phy_cal_meas(index, chain), value);
        }
    }
    fn run(engine: &mut CalibrationEngine, regs: &mut MockRegisters) -> usize {
        let mut steps = 0;
        while engine.step(regs) != CalStatus::Done {
            steps += 1;
            assert!(steps < 1000);
        }
        steps + 1
    }

    #[test]
    fn phases_depend_on_channel() {
        let caps = ChipCaps::default();
        let mut regs = hardware();
        let mut cal = engine();
        cal.start(&mut regs, &caps, &Channel::new(2412, PhyMode::G));
        assert_eq!(cal.phases, [Some(CalPhase::Iq), None, None]);
        cal.start(&mut regs, &caps, &Channel::new(5180, PhyMode::A));
        assert_eq!(
            cal.phases,
            [Some(CalPhase::Iq), Some(CalPhase::AdcGain), Some(CalPhase::AdcDc)]
        );
        let no_iq = ChipCaps {
            supports_iq_cal: false,
            ..caps
        };
        cal.start(&mut regs, &no_iq, &Channel::new(2412, PhyMode::G).with_extension(2432));
        assert_eq!(cal.phase(), Some(CalPhase::AdcGain));
        assert_eq!(regs.get(AR_PHY_CALMODE), AR_PHY_CALMODE_ADC_GAIN);
        cal.start(&mut regs, &no_iq, &Channel::new(2412, PhyMode::G));
        assert!(!cal.is_running());
        assert_eq!(cal.step(&mut regs), CalStatus::Idle);
    }
    #[test]
    fn waits_while_hardware_is_busy() {
        let mut regs = MockRegisters::new();
        let mut cal = engine();
        cal.start(&mut regs, &ChipCaps::default(), &Channel::new(2412, PhyMode::G));
        assert_ne!(regs.get(ar_phy_timing_ctrl4(0)) & AR_PHY_TIMING_CTRL4_DO_CAL, 0);
        assert_ne!(regs.get(AR_PHY_AGC_CONTROL) & AR_PHY_AGC_CONTROL_NF, 0);
        for _ in 0..3 {
            assert_eq!(cal.step(&mut regs), CalStatus::InProgress(CalPhase::Iq));
        }
        assert_eq!(cal.nsamples, 0);
    }
    #[test]
    fn iq_coefficient_sign_follows_correlation() {
        let caps = ChipCaps {
            nrxchains: 1,
            ..Default::default()
        };
        let chan = Channel::new(2412, PhyMode::G);
        let mut results = [0u32; 3];
        for (result, corr) in results.iter_mut().zip([2048i32, -2048, 2048]) {
            let mut regs = hardware();
            set_meas(&mut regs, 0, [0x10000, 0x10000, corr as u32, 0]);
            let mut cal = engine();
            cal.start(&mut regs, &caps, &chan);
            assert_eq!(run(&mut cal, &mut regs), 64);
            let reg = regs.get(ar_phy_timing_ctrl4(0));
            assert_ne!(reg & AR_PHY_TIMING_CTRL4_IQCORR_ENABLE, 0);
            assert_eq!(AR_PHY_TIMING_CTRL4_IQCORR_Q_Q_COFF.get(reg), 0);
            *result = AR_PHY_TIMING_CTRL4_IQCORR_Q_I_COFF.get(reg);
        }
        // The hardware field holds the negated coefficient.
        assert_eq!(results, [0x40 - 4, 4, 0x40 - 4]);
    }
    #[test]
    fn iq_coefficients() {
        let sample = IqSample {
            pwr_i: 64 * 0x10000,
            pwr_q: 64 * 0x10000,
            corr: -64 * 2048,
        };
        assert_eq!(sample.coefficients(), Ok((-4, 0)));
        let sample = IqSample {
            pwr_i: 64 * 0x20000,
            ..sample
        };
        assert_eq!(sample.coefficients().map(|(_, q)| q), Ok(15));
        assert_eq!(
            IqSample::default().coefficients(),
            Err(HalError::DegenerateCalibration)
        );
    }
    #[test]
    fn adc_calibration_on_5ghz() {
        let caps = ChipCaps {
            nrxchains: 1,
            supports_iq_cal: false,
            ..Default::default()
        };
        let mut regs = hardware();
        set_meas(&mut regs, 0, [1000, 1500, 1000, 2000]);
        let mut cal = engine();
        cal.start(&mut regs, &caps, &Channel::new(5180, PhyMode::A));
        assert_eq!(run(&mut cal, &mut regs), 128);
        let reg = regs.get(ar_phy_new_adc_dc_gain_corr(0));
        assert_eq!(AR_PHY_NEW_ADC_DC_GAIN_IGAIN.get(reg), 48);
        assert_eq!(AR_PHY_NEW_ADC_DC_GAIN_QGAIN.get(reg), 16);
        assert_eq!(AR_PHY_NEW_ADC_DC_GAIN_IDC.get(reg), (-3i32 as u32) & 0x1ff);
        assert_eq!(AR_PHY_NEW_ADC_DC_GAIN_QDC.get(reg), (-23i32 as u32) & 0x1ff);
        assert_ne!(reg & AR_PHY_NEW_ADC_GAIN_CORR_ENABLE, 0);
        assert_ne!(reg & AR_PHY_NEW_ADC_DC_OFFSET_CORR_ENABLE, 0);
        assert_eq!(cal.stats.phases_applied, 2);
        assert_eq!(cal.stats.cycles, 1);
        assert!(!cal.is_running());
    }
    #[test]
    fn degenerate_chain_is_skipped() {
        let caps = ChipCaps::default();
        let mut regs = hardware();
        set_meas(&mut regs, 0, [0x10000, 0x10000, 2048, 0]);
        // No power on the Q branch of the second chain.
        set_meas(&mut regs, 1, [0x10000, 0, 2048, 0]);
        regs.set(ar_phy_timing_ctrl4(1), 0x1234_0000);
        let mut cal = engine();
        cal.start(&mut regs, &caps, &Channel::new(2412, PhyMode::G));
        assert_eq!(run(&mut cal, &mut regs), 64);
        assert_eq!(cal.stats.degenerate, 1);
        assert_eq!(regs.get(ar_phy_timing_ctrl4(1)), 0x1234_0000);
        assert_eq!(
            AR_PHY_TIMING_CTRL4_IQCORR_Q_I_COFF.get(regs.get(ar_phy_timing_ctrl4(0))),
            0x40 - 4
        );
    }
    #[test]
    fn abort_stops_the_cycle() {
        let mut regs = hardware();
        let mut cal = engine();
        cal.start(&mut regs, &ChipCaps::default(), &Channel::new(5180, PhyMode::A));
        cal.step(&mut regs);
        cal.abort();
        assert_eq!(cal.step(&mut regs), CalStatus::Idle);
        assert_eq!(cal.stats, CalStats::default());
    }
}
