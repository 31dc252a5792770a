use embassy_time::Duration;

use crate::{
    channel::delta_slope,
    chip::{ChipCaps, ChipOps},
    hal::{RegisterAccess, RegisterPort},
    regs::*,
    Channel, HalResult,
};

/// Base time the PHY needs to become active in µs.
pub const BASE_PHY_ACTIVE_DELAY_US: u32 = 100;
const RF_BUS_GRANT_TIMEOUT: Duration = Duration::from_millis(100);
const RESET_TIMEOUT: Duration = Duration::from_millis(10);

/// How a channel switch was carried out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SwitchPath {
    /// Only the synthesizer was retuned.
    Fast,
    /// The chip was reset and reinitialized for the channel.
    FullReset,
}

/// Whether switching from `current` to `target` requires a full reset.
pub fn needs_full_reset(caps: &ChipCaps, current: Option<&Channel>, target: &Channel) -> bool {
    match current {
        Some(current) => caps.full_reset_on_switch || !current.same_band_and_width(target),
        None => true,
    }
}

/// Program the PHY mode and the HT40 configuration.
pub fn set_phy<R: RegisterAccess>(regs: &mut R, chan: &Channel) {
    let mut phy =
        AR_PHY_FC_HT_EN | AR_PHY_FC_SHORT_GI_40 | AR_PHY_FC_SINGLE_HT_LTF1 | AR_PHY_FC_WALSH;
    if chan.extension.is_some() {
        phy |= AR_PHY_FC_DYN2040_EN;
        if chan.extension_above() {
            phy |= AR_PHY_FC_DYN2040_PRI_CH;
        }
    }
    regs.write(AR_PHY_TURBO, phy);
    regs.write(
        AR_2040_MODE,
        if chan.extension.is_some() {
            AR_2040_JOINED_RX_CLEAR
        } else {
            0
        },
    );
}

/// Program the delta slope coefficients for the normal and the short guard interval.
pub fn set_delta_slope<R: RegisterAccess>(regs: &mut R, chan: &Channel) {
    let (exp, man) = delta_slope(chan.delta_slope_coeff());
    let reg = regs.read(AR_PHY_TIMING3);
    let reg = AR_PHY_TIMING3_DSC_EXP.set(reg, exp);
    regs.write(AR_PHY_TIMING3, AR_PHY_TIMING3_DSC_MAN.set(reg, man));

    let (exp, man) = delta_slope(chan.delta_slope_coeff_short_gi());
    let reg = regs.read(AR_PHY_HALFGI);
    let reg = AR_PHY_HALFGI_DSC_EXP.set(reg, exp);
    regs.write(AR_PHY_HALFGI, AR_PHY_HALFGI_DSC_MAN.set(reg, man));
}

/// The time in µs the synthesizer needs to settle on `chan`.
pub fn synth_delay_us<R: RegisterAccess>(regs: &mut R, chan: &Channel) -> u32 {
    let delay = regs.read_field(AR_PHY_RX_DELAY, AR_PHY_RX_DELAY_DELAY);
    let delay = if chan.is_11b() {
        delay * 4 / 22
    } else {
        delay / 10
    };
    BASE_PHY_ACTIVE_DELAY_US + delay
}

/// Ask the baseband for control of the RF bus.
pub fn rf_bus_request<R: RegisterAccess>(regs: &mut R) -> HalResult<()> {
    regs.write(AR_PHY_RFBUS_REQ, AR_PHY_RFBUS_REQ_EN);
    regs.wait_until(
        AR_PHY_RFBUS_GRANT,
        AR_PHY_RFBUS_GRANT_EN,
        AR_PHY_RFBUS_GRANT_EN,
        RF_BUS_GRANT_TIMEOUT,
    )
}

/// Wait for the synthesizer to settle and hand the RF bus back.
pub fn rf_bus_release<R: RegisterAccess>(regs: &mut R, chan: &Channel) {
    let delay = synth_delay_us(regs, chan);
    regs.delay_us(delay);
    regs.write(AR_PHY_RFBUS_REQ, 0);
}

/// Retune to a channel in the same band, without resetting the chip.
///
/// The TX queues have to be idle and RX has to be stopped.
pub fn set_chan<R: RegisterAccess, C: ChipOps>(
    regs: &mut R,
    chip: &mut C,
    chan: &Channel,
) -> HalResult<()> {
    rf_bus_request(regs)?;
    set_phy(regs, chan);
    chip.set_synth(regs, chan)?;
    chip.set_txpower(regs, chan);
    rf_bus_release(regs, chan);
    if !chan.is_11b() {
        set_delta_slope(regs, chan);
    }
    chip.spur_mitigate(regs, chan);
    trace!("Retuned to {} MHz.", chan.freq);
    Ok(())
}

/// Warm reset of the MAC.
pub fn reset_mac<R: RegisterAccess>(regs: &mut R, cold: bool) -> HalResult<()> {
    regs.write(
        AR_RTC_FORCE_WAKE,
        AR_RTC_FORCE_WAKE_EN | AR_RTC_FORCE_WAKE_ON_INT,
    );
    if regs.read(AR_INTR_SYNC_CAUSE) & (AR_INTR_SYNC_LOCAL_TIMEOUT | AR_INTR_SYNC_RADM_CPL_TIMEOUT)
        != 0
    {
        regs.write(AR_INTR_SYNC_ENABLE, 0);
        regs.write(AR_RC, AR_RC_HOSTIF | AR_RC_AHB);
    } else {
        regs.write(AR_RC, AR_RC_AHB);
    }
    let rc = if cold {
        AR_RTC_RC_MAC_WARM | AR_RTC_RC_MAC_COLD
    } else {
        AR_RTC_RC_MAC_WARM
    };
    regs.write(AR_RTC_RC, rc);
    regs.delay_us(50);
    regs.write(AR_RTC_RC, 0);
    regs.wait_until(
        AR_RTC_RC,
        AR_RTC_RC_MAC_WARM | AR_RTC_RC_MAC_COLD,
        0,
        RESET_TIMEOUT,
    )?;
    regs.write(AR_RC, 0);
    Ok(())
}

/// Power cycle the chip through the RTC.
pub fn reset_power_on<R: RegisterAccess>(regs: &mut R) -> HalResult<()> {
    regs.write(
        AR_RTC_FORCE_WAKE,
        AR_RTC_FORCE_WAKE_EN | AR_RTC_FORCE_WAKE_ON_INT,
    );
    // Make sure no DMA is active.
    regs.write(AR_RC, AR_RC_AHB);
    regs.write(AR_RTC_RESET, 0);
    regs.delay_us(2);
    regs.write(AR_RC, 0);
    regs.write(AR_RTC_RESET, 1);
    regs.wait_until(
        AR_RTC_STATUS,
        AR_RTC_STATUS_M,
        AR_RTC_STATUS_ON,
        RESET_TIMEOUT,
    )?;
    reset_mac(regs, false)
}

/// Reset the chip and bring the PHY up on `chan`.
///
/// With `power_on` the chip is power cycled first, which is required when the band changes.
pub fn hw_reset<R: RegisterAccess, C: ChipOps>(
    regs: &mut R,
    chip: &mut C,
    chan: &Channel,
    power_on: bool,
) -> HalResult<()> {
    if power_on {
        reset_power_on(regs)?;
    } else {
        reset_mac(regs, false)?;
    }
    chip.init_pll(regs, chan);
    chip.write_initvals(regs, chan);
    set_phy(regs, chan);
    chip.set_synth(regs, chan)?;
    chip.init_from_rom(regs, chan);
    chip.olpc_init(regs);
    chip.set_txpower(regs, chan);
    if !chan.is_11b() {
        set_delta_slope(regs, chan);
    }
    chip.spur_mitigate(regs, chan);

    regs.write(AR_PHY_ACTIVE, AR_PHY_ACTIVE_EN);
    let delay = synth_delay_us(regs, chan);
    regs.delay_us(delay);
    debug!("Chip reset on {} MHz.", chan.freq);
    Ok(())
}
