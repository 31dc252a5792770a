use embassy_time::Duration;

use crate::rate::MAX_SERIES;

/// How frames are protected against legacy stations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtectionMode {
    None,
    /// Precede the frame with an RTS/CTS exchange.
    #[default]
    RtsCts,
    /// Precede the frame with a CTS to ourselves.
    CtsOnly,
}

/// When a TX completion interrupt is requested.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxInterruptPolicy {
    /// For every frame.
    #[default]
    Always,
    /// For every nth frame.
    EveryNth(usize),
    /// Only for the first fragment of an MSDU.
    FirstFragmentOnly,
}

/// The role the radio operates in.
///
/// This selects the immunity policy of the ANI controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperatingRole {
    #[default]
    Station,
    HostAp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Parameters of the TX engine.
pub struct TxConfig {
    /// Descriptors per queue available to normal frames.
    pub ring_size: usize,
    /// Descriptors per queue only available to control frames.
    pub reserve: usize,
    /// Frames longer than this are protected by RTS/CTS.
    pub rts_threshold: usize,
    /// Tries for each of the rate series.
    pub series_tries: [u8; MAX_SERIES],
    /// Use this rate index for all unicast data frames.
    pub fixed_rate: Option<usize>,
    pub protection_mode: ProtectionMode,
    pub interrupt_policy: TxInterruptPolicy,
    /// TX power in half dBm.
    pub tx_power: u8,
}
impl Default for TxConfig {
    fn default() -> Self {
        Self {
            ring_size: 64,
            reserve: 2,
            rts_threshold: 2347,
            series_tries: [2, 2, 2, 4],
            fixed_rate: None,
            protection_mode: ProtectionMode::RtsCts,
            interrupt_policy: TxInterruptPolicy::Always,
            tx_power: 0x3f,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Parameters of the RX engine.
pub struct RxConfig {
    pub ring_size: usize,
    /// Size of each RX buffer.
    pub buffer_size: usize,
}
impl Default for RxConfig {
    fn default() -> Self {
        Self {
            ring_size: 128,
            buffer_size: 3872,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Parameters of the adaptive noise immunity controller.
pub struct AniConfig {
    pub enabled: bool,
    /// How often the ANI timer fires.
    pub interval: Duration,
    /// Listen time, after which the error rates are evaluated, in ms.
    pub period_ms: u32,
    /// OFDM PHY errors per second, above which immunity is raised.
    pub ofdm_trig_high: u32,
    /// OFDM PHY errors per second, below which immunity may be lowered.
    pub ofdm_trig_low: u32,
    pub cck_trig_high: u32,
    pub cck_trig_low: u32,
    /// Clock cycles per ms of the cycle counters.
    pub cycles_per_ms: u32,
    pub rssi_thr_high: i32,
    pub rssi_thr_low: i32,
}
impl Default for AniConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_millis(500),
            period_ms: 100,
            ofdm_trig_high: 500,
            ofdm_trig_low: 200,
            cck_trig_high: 200,
            cck_trig_low: 100,
            cycles_per_ms: 44_000,
            rssi_thr_high: 40,
            rssi_thr_low: 7,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Parameters of the calibration engine.
pub struct CalibrationConfig {
    /// How often the calibration timer fires.
    pub interval: Duration,
    /// Sample rounds accumulated per phase.
    pub samples: u32,
    /// Log2 of the hardware measurement count per round.
    pub log_count_max: u32,
}
impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            samples: 64,
            log_count_max: 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The complete configuration of a [Radio](crate::Radio).
pub struct RadioConfig {
    pub tx: TxConfig,
    pub rx: RxConfig,
    pub ani: AniConfig,
    pub calibration: CalibrationConfig,
    pub role: OperatingRole,
    /// How often a failing reset is retried, before giving up.
    pub reset_retries: usize,
}
impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            tx: TxConfig::default(),
            rx: RxConfig::default(),
            ani: AniConfig::default(),
            calibration: CalibrationConfig::default(),
            role: OperatingRole::Station,
            reset_retries: 3,
        }
    }
}
impl RadioConfig {
    pub fn with_role(mut self, role: OperatingRole) -> Self {
        self.role = role;
        self
    }
}
