use crate::{hal::RegisterAccess, Channel, HalResult};

/// Static properties of a chip revision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChipCaps {
    /// Number of RX chains, which have to be calibrated.
    pub nrxchains: usize,
    /// Whether the IQ imbalance calibration is available.
    pub supports_iq_cal: bool,
    /// Some revisions can't retune the synthesizer without a full reset.
    pub full_reset_on_switch: bool,
    /// The highest TX FIFO trigger level.
    pub max_tx_trigger_level: u32,
    /// The TX FIFO trigger level programmed at reset.
    pub initial_tx_trigger_level: u32,
}
impl Default for ChipCaps {
    fn default() -> Self {
        Self {
            nrxchains: 2,
            supports_iq_cal: true,
            full_reset_on_switch: false,
            max_tx_trigger_level: 0x3f,
            initial_tx_trigger_level: 0x01,
        }
    }
}

/// Operations, which differ between chip revisions.
///
/// An implementation is selected once, when the [Radio](crate::Radio) is created. It owns the
/// decoded ROM contents and the initialization value tables of its revision.
pub trait ChipOps {
    fn caps(&self) -> ChipCaps;
    /// Program the PLL for the band of the channel.
    fn init_pll<R: RegisterAccess>(&mut self, regs: &mut R, chan: &Channel);
    /// Write the initialization values for the mode of the channel.
    fn write_initvals<R: RegisterAccess>(&mut self, regs: &mut R, chan: &Channel);
    /// Tune the synthesizer to the channel.
    fn set_synth<R: RegisterAccess>(&mut self, regs: &mut R, chan: &Channel) -> HalResult<()>;
    /// Program the TX power tables for the channel.
    fn set_txpower<R: RegisterAccess>(&mut self, regs: &mut R, chan: &Channel);
    /// Suppress spurs close to the channel.
    fn spur_mitigate<R: RegisterAccess>(&mut self, regs: &mut R, chan: &Channel);
    /// Apply the per-channel calibration data stored in the ROM.
    fn init_from_rom<R: RegisterAccess>(&mut self, regs: &mut R, chan: &Channel);
    /// Initialize open loop power control.
    fn olpc_init<R: RegisterAccess>(&mut self, _regs: &mut R) {}
    /// Fix up the endianness of the ROM contents.
    fn swap_rom_fields(&mut self) {}
}
