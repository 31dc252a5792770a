/// The MAC address identifying a peer.
pub type PeerId = [u8; 6];

/// The modulation family of a legacy rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PhyKind {
    /// DSSS/CCK.
    Cck,
    Ofdm,
}

/// An entry of the rate table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RateInfo {
    /// Rate in units of 500 kbps.
    pub rate: u8,
    /// Code used in the TX descriptor.
    pub hw_code: u8,
    pub phy: PhyKind,
    /// Index of the rate control responses (ACK/CTS) are sent at.
    pub rsp_ridx: usize,
}
const fn entry(rate: u8, hw_code: u8, phy: PhyKind, rsp_ridx: usize) -> RateInfo {
    RateInfo {
        rate,
        hw_code,
        phy,
        rsp_ridx,
    }
}

/// All legacy rates known to the hardware, indexed by rate index (ridx).
pub const RATES: [RateInfo; 12] = [
    entry(2, 0x1b, PhyKind::Cck, 0),
    entry(4, 0x1a, PhyKind::Cck, 1),
    entry(11, 0x19, PhyKind::Cck, 1),
    entry(22, 0x18, PhyKind::Cck, 1),
    entry(12, 0x0b, PhyKind::Ofdm, 4),
    entry(18, 0x0f, PhyKind::Ofdm, 4),
    entry(24, 0x0a, PhyKind::Ofdm, 6),
    entry(36, 0x0e, PhyKind::Ofdm, 6),
    entry(48, 0x09, PhyKind::Ofdm, 8),
    entry(72, 0x0d, PhyKind::Ofdm, 8),
    entry(96, 0x08, PhyKind::Ofdm, 8),
    entry(108, 0x0c, PhyKind::Ofdm, 8),
];
pub const RIDX_CCK1: usize = 0;
pub const RIDX_CCK2: usize = 1;
pub const RIDX_OFDM6: usize = 4;
pub const RIDX_MAX: usize = RATES.len() - 1;
/// Number of rate series in a TX descriptor.
pub const MAX_SERIES: usize = 4;
/// Length of an ACK frame including the FCS.
pub const ACK_LEN: usize = 14;
/// Length of a CTS frame including the FCS.
pub const CTS_LEN: usize = 14;

/// Find the rate index for a rate in units of 500 kbps.
pub fn ridx_for_rate(rate: u8) -> Option<usize> {
    RATES.iter().rposition(|info| info.rate == rate)
}
/// The descriptor rate code.
///
/// CCK rates above 1 Mbps use a different code with a short preamble.
pub const fn hw_rate_code(ridx: usize, short_preamble: bool) -> u8 {
    let info = RATES[ridx];
    if short_preamble && matches!(info.phy, PhyKind::Cck) && ridx != RIDX_CCK1 {
        info.hw_code | 0x04
    } else {
        info.hw_code
    }
}
pub const fn is_ofdm(ridx: usize) -> bool {
    matches!(RATES[ridx].phy, PhyKind::Ofdm)
}

/// Time in µs it takes to send `len` bytes at `ridx`, including the SIFS.
pub const fn airtime(len: usize, ridx: usize, short_preamble: bool) -> u16 {
    let rate = RATES[ridx].rate as usize;
    let time = match RATES[ridx].phy {
        PhyKind::Ofdm => {
            let symbols = (8 + 4 * len + 3).div_ceil(rate);
            // The signal extension adds 6 µs to the 10 µs SIFS.
            16 + 4 + 4 * symbols + 16
        }
        PhyKind::Cck => {
            let preamble = if ridx != RIDX_CCK1 && short_preamble {
                72 + 24
            } else {
                144 + 48
            };
            (16 * len).div_ceil(rate) + preamble + 10
        }
    };
    time as u16
}

/// Maximum number of rates in a rate set.
pub const MAX_PEER_RATES: usize = RATES.len();

/// Rate state of a peer.
///
/// This is rebuilt whenever the peer (re)associates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateState {
    ridx: [usize; MAX_PEER_RATES],
    fallback: [usize; MAX_PEER_RATES],
    nrates: usize,
    /// Current TX rate as an index into the peer's rate set.
    txrate: usize,
    /// Frames sent since the counters were last taken.
    pub txcnt: u32,
    /// Frames, which needed at least one retry.
    pub retrycnt: u32,
    pub short_preamble: bool,
}
impl RateState {
    /// Build the rate state from the rates of the peer in units of 500 kbps.
    ///
    /// The basic rate flag (MSB) is ignored, unknown rates are skipped. An empty set falls back to
    /// the lowest CCK rate.
    pub fn new(rates: &[u8], short_preamble: bool) -> Self {
        let mut temp = Self {
            ridx: [0; MAX_PEER_RATES],
            fallback: [0; MAX_PEER_RATES],
            nrates: 0,
            txrate: 0,
            txcnt: 0,
            retrycnt: 0,
            short_preamble,
        };
        for rate in rates.iter().map(|rate| rate & 0x7f) {
            let Some(ridx) = ridx_for_rate(rate) else {
                debug!("Skipping unknown rate {}.", rate);
                continue;
            };
            if temp.nrates == MAX_PEER_RATES {
                break;
            }
            let i = temp.nrates;
            temp.ridx[i] = ridx;
            temp.fallback[i] = (0..i)
                .rev()
                .find(|&j| RATES[temp.ridx[j]].phy == RATES[ridx].phy)
                .unwrap_or(i);
            temp.nrates += 1;
        }
        if temp.nrates == 0 {
            temp.nrates = 1;
        }
        temp
    }
    pub fn nrates(&self) -> usize {
        self.nrates
    }
    /// Rate index of the `i`th rate of the set.
    pub fn ridx(&self, i: usize) -> usize {
        self.ridx[i.min(self.nrates - 1)]
    }
    /// Index into the rate set of the rate to fall back to from `i`.
    pub fn fallback(&self, i: usize) -> usize {
        self.fallback[i.min(self.nrates - 1)]
    }
    pub fn txrate(&self) -> usize {
        self.txrate
    }
    /// Select the TX rate. This is the interface for rate control.
    pub fn set_txrate(&mut self, txrate: usize) {
        self.txrate = txrate.min(self.nrates - 1);
    }
    /// The rates of the four series, walking down the fallback chain from the current rate.
    pub fn series(&self) -> [usize; MAX_SERIES] {
        let mut series = [0; MAX_SERIES];
        let mut txrate = self.txrate;
        for ridx in series.iter_mut() {
            *ridx = self.ridx(txrate);
            txrate = self.fallback(txrate);
        }
        series
    }
    /// Account a finished transmission with `failcnt` failed attempts.
    pub fn record_tx(&mut self, failcnt: u32) {
        self.txcnt = self.txcnt.saturating_add(1);
        if failcnt > 0 {
            self.retrycnt = self.retrycnt.saturating_add(1);
        }
    }
    /// Return and reset the counters.
    pub fn take_counters(&mut self) -> (u32, u32) {
        let counters = (self.txcnt, self.retrycnt);
        self.txcnt = 0;
        self.retrycnt = 0;
        counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn airtime_values() {
        assert_eq!(airtime(ACK_LEN, RIDX_OFDM6, false), 60);
        assert_eq!(airtime(ACK_LEN, RIDX_CCK1, true), 314);
        assert_eq!(airtime(ACK_LEN, RIDX_CCK2, true), 162);
        assert_eq!(airtime(ACK_LEN, RIDX_CCK2, false), 258);
        assert_eq!(airtime(1500, RIDX_MAX, false), 260);
    }
    #[test]
    fn short_preamble_codes() {
        assert_eq!(hw_rate_code(RIDX_CCK1, true), 0x1b);
        assert_eq!(hw_rate_code(3, true), 0x1c);
        assert_eq!(hw_rate_code(3, false), 0x18);
        assert_eq!(hw_rate_code(RIDX_OFDM6, true), 0x0b);
    }
    #[test]
    fn fallback_chain_stays_within_phy() {
        // 1, 2, 5.5, 11, 6, 9, 12, 18, 24, 36, 48, 54 Mbps, with basic rate flags on CCK.
        let state = RateState::new(
            &[0x82, 0x84, 0x8b, 0x96, 12, 18, 24, 36, 48, 72, 96, 108],
            false,
        );
        assert_eq!(state.nrates(), 12);
        assert_eq!(state.fallback(0), 0);
        assert_eq!(state.fallback(3), 2);
        // The lowest OFDM rate doesn't fall back to CCK.
        assert_eq!(state.fallback(4), 4);
        assert_eq!(state.fallback(11), 10);

        let mut state = state;
        state.set_txrate(11);
        assert_eq!(state.series(), [11, 10, 9, 8]);
        state.set_txrate(5);
        assert_eq!(state.series(), [5, 4, 4, 4]);
    }
    #[test]
    fn mixed_order_rate_set() {
        // 11b rates mixed in after OFDM ones.
        let state = RateState::new(&[12, 2, 24, 4, 99], false);
        assert_eq!(state.nrates(), 4);
        assert_eq!(state.ridx(1), RIDX_CCK1);
        assert_eq!(state.fallback(2), 0);
        assert_eq!(state.fallback(3), 1);
    }
    #[test]
    fn counters() {
        let mut state = RateState::new(&[2], false);
        state.record_tx(0);
        state.record_tx(3);
        assert_eq!(state.take_counters(), (2, 1));
        assert_eq!(state.take_counters(), (0, 0));
    }
}
