use crate::{
    config::{AniConfig, OperatingRole},
    hal::{RegisterAccess, RegisterPort},
    regs::*,
    Channel,
};

pub const MAX_NOISE_IMMUNITY: u8 = 4;
pub const MAX_SPUR_IMMUNITY: u8 = 7;
pub const MAX_FIRSTEP: u8 = 2;

/// How immunity is traded against sensitivity.
///
/// An access point has to hear stations at any distance, so it never touches the weak signal
/// detection. A station can use the RSSI of its access point to judge, how much sensitivity it
/// can give up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ImmunityPolicy {
    HostAp,
    Station,
}
impl From<OperatingRole> for ImmunityPolicy {
    fn from(role: OperatingRole) -> Self {
        match role {
            OperatingRole::Station => Self::Station,
            OperatingRole::HostAp => Self::HostAp,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AniState {
    pub noise_immunity: u8,
    pub spur_immunity: u8,
    pub firstep: u8,
    pub ofdm_weak_signal: bool,
    /// Whether the high CCK weak signal threshold is used.
    pub cck_weak_signal: bool,
    cyccnt: u32,
    txfcnt: u32,
    rxfcnt: u32,
    ofdm_phy_err_base: u32,
    cck_phy_err_base: u32,
    pub ofdm_phy_err_count: u32,
    pub cck_phy_err_count: u32,
    /// Accumulated listen time of the current window in ms.
    pub listen_time: i64,
}
impl Default for AniState {
    fn default() -> Self {
        Self {
            noise_immunity: 0,
            spur_immunity: 0,
            firstep: 0,
            ofdm_weak_signal: true,
            cck_weak_signal: false,
            cyccnt: 0,
            txfcnt: 0,
            rxfcnt: 0,
            ofdm_phy_err_base: 0,
            cck_phy_err_base: 0,
            ofdm_phy_err_count: 0,
            cck_phy_err_count: 0,
            listen_time: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AniStats {
    pub ticks: u32,
    pub raised: u32,
    pub lowered: u32,
    /// Evaluation windows, that were restarted.
    pub restarts: u32,
}

/// The adaptive noise immunity controller.
///
/// It watches the rate of OFDM and CCK PHY errors per listen time and moves the receiver
/// thresholds one step at a time.
pub struct AniController {
    config: AniConfig,
    policy: ImmunityPolicy,
    state: AniState,
    rssi: i32,
    is_11a: bool,
    pub stats: AniStats,
}
impl AniController {
    pub fn new(config: AniConfig, policy: ImmunityPolicy) -> Self {
        Self {
            config,
            policy,
            state: AniState::default(),
            rssi: 0,
            is_11a: false,
            stats: AniStats::default(),
        }
    }
    pub fn state(&self) -> &AniState {
        &self.state
    }
    pub fn policy(&self) -> ImmunityPolicy {
        self.policy
    }
    pub fn set_policy(&mut self, policy: ImmunityPolicy) {
        self.policy = policy;
    }
    /// Update the RSSI of the access point, which is used by the station policy.
    pub fn set_rssi(&mut self, rssi: i32) {
        self.rssi = rssi;
    }
    pub fn rssi(&self) -> i32 {
        self.rssi
    }

    pub fn set_noise_immunity<R: RegisterAccess>(&mut self, regs: &mut R, level: u8) {
        let level = level.min(MAX_NOISE_IMMUNITY);
        let high = level == MAX_NOISE_IMMUNITY;
        regs.modify(
            AR_PHY_DESIRED_SZ,
            AR_PHY_DESIRED_SZ_TOT_DES,
            (if high { -62i32 } else { -55 }) as u32,
        );
        let reg = regs.read(AR_PHY_AGC_CTL1);
        let reg = AR_PHY_AGC_CTL1_COARSE_LOW.set(reg, (if high { -70i32 } else { -64 }) as u32);
        let reg = AR_PHY_AGC_CTL1_COARSE_HIGH.set(reg, (if high { -12i32 } else { -14 }) as u32);
        regs.write(AR_PHY_AGC_CTL1, reg);
        regs.modify(
            AR_PHY_FIND_SIG,
            AR_PHY_FIND_SIG_FIRPWR,
            (if high { -80i32 } else { -78 }) as u32,
        );
        self.state.noise_immunity = level;
    }
    pub fn set_spur_immunity<R: RegisterAccess>(&mut self, regs: &mut R, level: u8) {
        let level = level.min(MAX_SPUR_IMMUNITY);
        regs.modify(
            AR_PHY_TIMING5,
            AR_PHY_TIMING5_CYCPWR_THR1,
            (level as u32 + 1) * 2,
        );
        self.state.spur_immunity = level;
    }
    pub fn set_firstep<R: RegisterAccess>(&mut self, regs: &mut R, level: u8) {
        let level = level.min(MAX_FIRSTEP);
        regs.modify(AR_PHY_FIND_SIG, AR_PHY_FIND_SIG_FIRSTEP, level as u32 * 4);
        self.state.firstep = level;
    }
    pub fn set_ofdm_weak_signal<R: RegisterAccess>(&mut self, regs: &mut R, enabled: bool) {
        // Thresholds with the weak signal detection on, and the disabled values.
        let (m1_low, m2_low, m2count_low, m1, m2, m2count) = if enabled {
            (50, 40, 48, 77, 64, 16)
        } else {
            (127, 127, 63, 127, 127, 31)
        };
        let reg = regs.read(AR_PHY_SFCORR_LOW);
        let reg = AR_PHY_SFCORR_LOW_M1_THRESH_LOW.set(reg, m1_low);
        let reg = AR_PHY_SFCORR_LOW_M2_THRESH_LOW.set(reg, m2_low);
        let reg = AR_PHY_SFCORR_LOW_M2COUNT_THR_LOW.set(reg, m2count_low);
        let reg = if enabled {
            reg | AR_PHY_SFCORR_LOW_USE_SELF_CORR_LOW
        } else {
            reg & !AR_PHY_SFCORR_LOW_USE_SELF_CORR_LOW
        };
        regs.write(AR_PHY_SFCORR_LOW, reg);

        let reg = regs.read(AR_PHY_SFCORR);
        let reg = AR_PHY_SFCORR_M1_THRESH.set(reg, m1);
        let reg = AR_PHY_SFCORR_M2_THRESH.set(reg, m2);
        regs.write(AR_PHY_SFCORR, AR_PHY_SFCORR_M2COUNT_THR.set(reg, m2count));

        let reg = regs.read(AR_PHY_SFCORR_EXT);
        let reg = AR_PHY_SFCORR_EXT_M1_THRESH_LOW.set(reg, m1_low);
        let reg = AR_PHY_SFCORR_EXT_M2_THRESH_LOW.set(reg, m2_low);
        let reg = AR_PHY_SFCORR_EXT_M1_THRESH.set(reg, m1);
        regs.write(AR_PHY_SFCORR_EXT, AR_PHY_SFCORR_EXT_M2_THRESH.set(reg, m2));
        self.state.ofdm_weak_signal = enabled;
    }
    pub fn set_cck_weak_signal<R: RegisterAccess>(&mut self, regs: &mut R, high: bool) {
        regs.modify(
            AR_PHY_CCK_DETECT,
            AR_PHY_CCK_DETECT_WEAK_SIG_THR_CCK,
            if high { 6 } else { 8 },
        );
        self.state.cck_weak_signal = high;
    }

    /// Program the current levels after a reset and start a new window.
    pub fn start<R: RegisterAccess>(&mut self, regs: &mut R, chan: &Channel) {
        self.is_11a = chan.is_5ghz();
        let state = self.state;
        self.set_noise_immunity(regs, state.noise_immunity);
        self.set_spur_immunity(regs, state.spur_immunity);
        self.set_firstep(regs, state.firstep);
        self.set_ofdm_weak_signal(regs, state.ofdm_weak_signal);
        self.set_cck_weak_signal(regs, state.cck_weak_signal);
        // The cycle counters were reset with the chip.
        self.state.cyccnt = 0;
        self.restart(regs);
    }
    /// Start a new evaluation window.
    pub fn restart<R: RegisterAccess>(&mut self, regs: &mut R) {
        self.state.ofdm_phy_err_base = AR_PHY_COUNTMAX - self.config.ofdm_trig_high;
        self.state.cck_phy_err_base = AR_PHY_COUNTMAX - self.config.cck_trig_high;
        regs.write(AR_PHY_ERR_1, self.state.ofdm_phy_err_base);
        regs.write(AR_PHY_ERR_2, self.state.cck_phy_err_base);
        regs.write(AR_PHY_ERR_MASK_1, AR_PHY_ERR_OFDM_TIMING);
        regs.write(AR_PHY_ERR_MASK_2, AR_PHY_ERR_CCK_TIMING);
        self.state.listen_time = 0;
        self.state.ofdm_phy_err_count = 0;
        self.state.cck_phy_err_count = 0;
        self.stats.restarts += 1;
    }

    fn ofdm_err_trigger<R: RegisterAccess>(&mut self, regs: &mut R) {
        let state = self.state;
        if state.noise_immunity < MAX_NOISE_IMMUNITY {
            self.set_noise_immunity(regs, state.noise_immunity + 1);
            return;
        }
        if state.spur_immunity < MAX_SPUR_IMMUNITY {
            self.set_spur_immunity(regs, state.spur_immunity + 1);
            return;
        }
        if self.policy == ImmunityPolicy::HostAp {
            if state.firstep < MAX_FIRSTEP {
                self.set_firstep(regs, state.firstep + 1);
            }
            return;
        }
        if self.rssi > self.config.rssi_thr_high {
            // Strong signal, so weak signal detection isn't needed.
            if state.ofdm_weak_signal {
                self.set_ofdm_weak_signal(regs, false);
                self.set_spur_immunity(regs, 0);
            } else if state.firstep < MAX_FIRSTEP {
                self.set_firstep(regs, state.firstep + 1);
            }
        } else if self.rssi > self.config.rssi_thr_low {
            if !state.ofdm_weak_signal {
                self.set_ofdm_weak_signal(regs, true);
            }
            if state.firstep < MAX_FIRSTEP {
                self.set_firstep(regs, state.firstep + 1);
            }
        } else if !self.is_11a {
            // Weak signal in b/g mode, so maximize the CCK sensitivity.
            if state.ofdm_weak_signal {
                self.set_ofdm_weak_signal(regs, false);
            }
            if state.firstep > 0 {
                self.set_firstep(regs, 0);
            }
        }
    }
    fn cck_err_trigger<R: RegisterAccess>(&mut self, regs: &mut R) {
        let state = self.state;
        if state.noise_immunity < MAX_NOISE_IMMUNITY {
            self.set_noise_immunity(regs, state.noise_immunity + 1);
            return;
        }
        if self.policy == ImmunityPolicy::HostAp {
            if state.firstep < MAX_FIRSTEP {
                self.set_firstep(regs, state.firstep + 1);
            }
            return;
        }
        if self.rssi > self.config.rssi_thr_low {
            if state.firstep < MAX_FIRSTEP {
                self.set_firstep(regs, state.firstep + 1);
            }
        } else if !self.is_11a && state.firstep > 0 {
            self.set_firstep(regs, 0);
        }
    }
    fn lower_immunity<R: RegisterAccess>(&mut self, regs: &mut R) {
        let state = self.state;
        match self.policy {
            ImmunityPolicy::HostAp => {
                if state.firstep > 0 {
                    self.set_firstep(regs, state.firstep - 1);
                    return;
                }
            }
            // With a strong signal the weak signal detection stays off, so it doesn't oscillate.
            ImmunityPolicy::Station if self.rssi > self.config.rssi_thr_high => {}
            ImmunityPolicy::Station if self.rssi > self.config.rssi_thr_low => {
                if !state.ofdm_weak_signal {
                    self.set_ofdm_weak_signal(regs, true);
                    return;
                }
                if state.firstep > 0 {
                    self.set_firstep(regs, state.firstep - 1);
                    return;
                }
            }
            ImmunityPolicy::Station => {
                if state.firstep > 0 {
                    self.set_firstep(regs, state.firstep - 1);
                    return;
                }
            }
        }
        if state.spur_immunity > 0 {
            self.set_spur_immunity(regs, state.spur_immunity - 1);
        } else if state.noise_immunity > 0 {
            self.set_noise_immunity(regs, state.noise_immunity - 1);
        }
    }

    /// Sample the counters and adjust the immunity, if the error rates call for it.
    pub fn monitor<R: RegisterAccess>(&mut self, regs: &mut R) {
        self.stats.ticks += 1;
        let cyccnt = regs.read(AR_CCCNT);
        let txfcnt = regs.read(AR_TFCNT);
        let rxfcnt = regs.read(AR_RFCNT);
        let listen_time = if self.state.cyccnt != 0 && self.state.cyccnt <= cyccnt {
            let busy = txfcnt.wrapping_sub(self.state.txfcnt) as i64
                + rxfcnt.wrapping_sub(self.state.rxfcnt) as i64;
            (cyccnt.wrapping_sub(self.state.cyccnt) as i64 - busy)
                / self.config.cycles_per_ms.max(1) as i64
        } else {
            0
        };
        self.state.cyccnt = cyccnt;
        self.state.txfcnt = txfcnt;
        self.state.rxfcnt = rxfcnt;
        if listen_time < 0 {
            trace!("Negative listen time, restarting ANI.");
            self.restart(regs);
            return;
        }
        self.state.listen_time += listen_time;

        let phy1 = regs.read(AR_PHY_ERR_1);
        let phy2 = regs.read(AR_PHY_ERR_2);
        let ofdm_reset = phy1 < self.state.ofdm_phy_err_base;
        let cck_reset = phy2 < self.state.cck_phy_err_base;
        if ofdm_reset {
            regs.write(AR_PHY_ERR_1, self.state.ofdm_phy_err_base);
            regs.write(AR_PHY_ERR_MASK_1, AR_PHY_ERR_OFDM_TIMING);
        }
        if cck_reset {
            regs.write(AR_PHY_ERR_2, self.state.cck_phy_err_base);
            regs.write(AR_PHY_ERR_MASK_2, AR_PHY_ERR_CCK_TIMING);
        }
        if ofdm_reset || cck_reset {
            return;
        }
        self.state.ofdm_phy_err_count = phy1 - self.state.ofdm_phy_err_base;
        self.state.cck_phy_err_count = phy2 - self.state.cck_phy_err_base;

        let listen = self.state.listen_time;
        let period = self.config.period_ms as i64;
        let ofdm = self.state.ofdm_phy_err_count as i64;
        let cck = self.state.cck_phy_err_count as i64;
        let rate = |trig: u32| listen * trig as i64 / 1000;
        if listen > 5 * period {
            if ofdm <= rate(self.config.ofdm_trig_low) && cck <= rate(self.config.cck_trig_low) {
                self.lower_immunity(regs);
                self.stats.lowered += 1;
                debug!("ANI lowered immunity: {:?}", self.state);
            }
            self.restart(regs);
        } else if listen > period {
            if ofdm > rate(self.config.ofdm_trig_high) {
                self.ofdm_err_trigger(regs);
            } else if cck > rate(self.config.cck_trig_high) {
                self.cck_err_trigger(regs);
            } else {
                return;
            }
            self.stats.raised += 1;
            debug!("ANI raised immunity: {:?}", self.state);
            self.restart(regs);
        }
    }
}
