/// The PHY used on a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PhyMode {
    /// OFDM in the 5 GHz band.
    A,
    /// OFDM and CCK in the 2.4 GHz band.
    G,
    /// CCK only in the 2.4 GHz band.
    B,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Band {
    TwoPointFourGhz,
    FiveGhz,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Bandwidth {
    Ht20,
    Ht40,
}

/// A radio channel.
///
/// Channels are immutable once selected. A channel switch replaces the whole value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Channel {
    /// Centre frequency of the primary channel in MHz.
    pub freq: u16,
    pub mode: PhyMode,
    /// Centre frequency of the extension channel for 40 MHz operation.
    pub extension: Option<u16>,
}
impl Channel {
    pub const fn new(freq: u16, mode: PhyMode) -> Self {
        Self {
            freq,
            mode,
            extension: None,
        }
    }
    /// Create a channel from its IEEE channel number.
    ///
    /// Returns [None] if the number doesn't exist in the band implied by `mode`.
    pub const fn from_ieee(number: u8, mode: PhyMode) -> Option<Self> {
        let freq = match (mode, number) {
            (PhyMode::A, 1..=196) => 5000 + number as u16 * 5,
            (PhyMode::B | PhyMode::G, 14) => 2484,
            (PhyMode::B | PhyMode::G, 1..=13) => 2407 + number as u16 * 5,
            _ => return None,
        };
        Some(Self::new(freq, mode))
    }
    /// Add an extension channel, making this an HT40 channel.
    pub const fn with_extension(mut self, freq: u16) -> Self {
        self.extension = Some(freq);
        self
    }
    /// The IEEE channel number.
    pub const fn ieee(&self) -> u8 {
        match self.freq {
            2484 => 14,
            2407..=2483 => ((self.freq - 2407) / 5) as u8,
            _ => ((self.freq.saturating_sub(5000)) / 5) as u8,
        }
    }
    pub const fn band(&self) -> Band {
        match self.mode {
            PhyMode::A => Band::FiveGhz,
            PhyMode::B | PhyMode::G => Band::TwoPointFourGhz,
        }
    }
    pub const fn bandwidth(&self) -> Bandwidth {
        if self.extension.is_some() {
            Bandwidth::Ht40
        } else {
            Bandwidth::Ht20
        }
    }
    pub const fn is_5ghz(&self) -> bool {
        matches!(self.band(), Band::FiveGhz)
    }
    pub const fn is_11b(&self) -> bool {
        matches!(self.mode, PhyMode::B)
    }
    /// Whether the extension channel lies above the primary channel.
    pub const fn extension_above(&self) -> bool {
        match self.extension {
            Some(ext) => ext > self.freq,
            None => false,
        }
    }
    /// Whether switching to `other` can be done without a full reset.
    pub fn same_band_and_width(&self, other: &Channel) -> bool {
        self.band() == other.band() && self.bandwidth() == other.bandwidth()
    }
    /// The frequency the synthesizer is tuned to.
    ///
    /// For HT40 this is the middle between primary and extension channel.
    pub const fn synth_freq(&self) -> u16 {
        match self.extension {
            Some(ext) => (self.freq + ext) / 2,
            None => self.freq,
        }
    }
    /// The delta slope coefficient `(100 << 24) / freq` used for pilot tracking.
    ///
    /// This is based on the primary channel, also for HT40.
    pub const fn delta_slope_coeff(&self) -> u32 {
        let freq = self.freq as u32;
        if freq == 0 {
            return 0;
        }
        (100 << 24) / freq
    }
    /// The delta slope coefficient for the short guard interval.
    pub const fn delta_slope_coeff_short_gi(&self) -> u32 {
        self.delta_slope_coeff() * 9 / 10
    }
}

/// Convert a delta slope coefficient into the hardware's floating point format.
///
/// Returns `(exponent, mantissa)`. The mantissa is rounded to the nearest value.
pub const fn delta_slope(coeff: u32) -> (u32, u32) {
    if coeff == 0 {
        return (0, 0);
    }
    let highest_bit = 31 - coeff.leading_zeros();
    // The exponent is chosen, so the mantissa has 15 significant bits.
    let mut exp = 38 - highest_bit;
    if exp > 23 {
        exp = 23;
    }
    let shift = 24 - exp;
    let man = (coeff + (1 << (shift - 1))) >> shift;
    (exp - 16, man)
}
