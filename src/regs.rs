//! Register map of the AR5416-family MAC/baseband.
//!
//! The addresses are only data for the rest of the crate. Anything chip revision specific
//! (initvals, ROM layout, synthesizer programming) lives behind [ChipOps](crate::ChipOps).
#![allow(missing_docs)]

/// A bit field inside a 32-bit register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Field {
    pub mask: u32,
    pub shift: u32,
}
impl Field {
    pub const fn new(mask: u32) -> Self {
        Self {
            mask,
            shift: mask.trailing_zeros(),
        }
    }
    /// Extract the field from a register value.
    pub const fn get(&self, reg: u32) -> u32 {
        (reg & self.mask) >> self.shift
    }
    /// Shift a value into position, truncating it to the field width.
    pub const fn prep(&self, value: u32) -> u32 {
        value.wrapping_shl(self.shift) & self.mask
    }
    /// Replace the field in a register value.
    pub const fn set(&self, reg: u32, value: u32) -> u32 {
        (reg & !self.mask) | self.prep(value)
    }
}

// MAC DMA.
pub const AR_CR: u32 = 0x0008;
pub const AR_CR_RXE: u32 = 0x0000_0004;
pub const AR_CR_RXD: u32 = 0x0000_0020;
pub const AR_RXDP: u32 = 0x000c;
pub const AR_CFG: u32 = 0x0014;
pub const AR_IER: u32 = 0x0024;
pub const AR_IER_ENABLE: u32 = 0x0000_0001;
pub const AR_TXCFG: u32 = 0x0030;
pub const AR_TXCFG_FTRIG: Field = Field::new(0x0000_03f0);
pub const AR_RXCFG: u32 = 0x0034;
pub const AR_MIBC: u32 = 0x0040;
pub const AR_MIBC_FMC: u32 = 0x0000_0002;
pub const AR_MIBC_CMC: u32 = 0x0000_0004;

// Interrupts.
pub const AR_ISR: u32 = 0x0080;
pub const AR_IMR: u32 = 0x00a0;
pub const AR_ISR_RAC: u32 = 0x00c0;
pub const AR_ISR_S0_S: u32 = 0x00c4;
pub const AR_ISR_S1_S: u32 = 0x00c8;
pub const AR_ISR_RXOK: u32 = 0x0000_0001;
pub const AR_ISR_RXDESC: u32 = 0x0000_0002;
pub const AR_ISR_RXERR: u32 = 0x0000_0004;
pub const AR_ISR_RXEOL: u32 = 0x0000_0010;
pub const AR_ISR_RXORN: u32 = 0x0000_0020;
pub const AR_ISR_TXOK: u32 = 0x0000_0040;
pub const AR_ISR_TXDESC: u32 = 0x0000_0080;
pub const AR_ISR_TXERR: u32 = 0x0000_0100;
pub const AR_ISR_TXEOL: u32 = 0x0000_0400;
pub const AR_ISR_TXURN: u32 = 0x0000_0800;
pub const AR_ISR_MIB: u32 = 0x0000_1000;
pub const AR_ISR_RXMINTR: u32 = 0x0100_0000;
pub const AR_ISR_RXINTM: u32 = 0x8000_0000;
pub const AR_ISR_S0_QCU_TXOK: Field = Field::new(0x0000_03ff);
pub const AR_ISR_S0_QCU_TXDESC: Field = Field::new(0x03ff_0000);
pub const AR_ISR_S1_QCU_TXERR: Field = Field::new(0x0000_03ff);
pub const AR_ISR_S1_QCU_TXEOL: Field = Field::new(0x03ff_0000);
pub const AR_INTR_SPURIOUS: u32 = 0xffff_ffff;
pub const AR_IMR_DEFAULT: u32 = AR_ISR_TXOK
    | AR_ISR_TXDESC
    | AR_ISR_TXERR
    | AR_ISR_TXEOL
    | AR_ISR_TXURN
    | AR_ISR_RXOK
    | AR_ISR_RXERR
    | AR_ISR_RXEOL
    | AR_ISR_RXORN;

// QCU.
pub const AR_Q_TXE: u32 = 0x0840;
pub const AR_Q_TXD: u32 = 0x0880;
pub const AR_Q_STS_PEND_FR_CNT: Field = Field::new(0x0000_0003);
pub const fn ar_qtxdp(qid: usize) -> u32 {
    0x0800 + (qid as u32) * 4
}
pub const fn ar_qsts(qid: usize) -> u32 {
    0x0a00 + (qid as u32) * 4
}

// Host interface and RTC.
pub const AR_RC: u32 = 0x4000;
pub const AR_RC_AHB: u32 = 0x0000_0001;
pub const AR_RC_HOSTIF: u32 = 0x0000_0100;
pub const AR_INTR_SYNC_CAUSE: u32 = 0x4028;
pub const AR_INTR_SYNC_LOCAL_TIMEOUT: u32 = 0x0000_2000;
pub const AR_INTR_SYNC_RADM_CPL_TIMEOUT: u32 = 0x0000_4000;
pub const AR_INTR_SYNC_ENABLE: u32 = 0x402c;
pub const AR_RTC_RC: u32 = 0x7000;
pub const AR_RTC_RC_MAC_WARM: u32 = 0x0000_0001;
pub const AR_RTC_RC_MAC_COLD: u32 = 0x0000_0002;
pub const AR_RTC_RESET: u32 = 0x7040;
pub const AR_RTC_STATUS: u32 = 0x7044;
pub const AR_RTC_STATUS_M: u32 = 0x0000_000f;
pub const AR_RTC_STATUS_ON: u32 = 0x0000_0002;
pub const AR_RTC_FORCE_WAKE: u32 = 0x704c;
pub const AR_RTC_FORCE_WAKE_EN: u32 = 0x0000_0001;
pub const AR_RTC_FORCE_WAKE_ON_INT: u32 = 0x0000_0002;

// PCU.
pub const AR_RX_FILTER: u32 = 0x803c;
pub const AR_RX_FILTER_UCAST: u32 = 0x0000_0001;
pub const AR_RX_FILTER_MCAST: u32 = 0x0000_0002;
pub const AR_RX_FILTER_BCAST: u32 = 0x0000_0004;
pub const AR_RX_FILTER_BEACON: u32 = 0x0000_0010;
pub const AR_RX_FILTER_PROM: u32 = 0x0000_0020;
pub const AR_RX_FILTER_PROBEREQ: u32 = 0x0000_0080;
pub const AR_DIAG_SW: u32 = 0x8048;
pub const AR_DIAG_RX_DIS: u32 = 0x0000_0020;
pub const AR_DIAG_RX_ABORT: u32 = 0x0200_0000;
pub const AR_DIAG_FORCE_CH_IDLE_HIGH: u32 = 0x0400_0000;
pub const AR_TFCNT: u32 = 0x80ec;
pub const AR_RFCNT: u32 = 0x80f0;
pub const AR_CCCNT: u32 = 0x80f8;
pub const AR_FILT_OFDM: u32 = 0x8124;
pub const AR_FILT_CCK: u32 = 0x8128;
pub const AR_PHY_ERR_1: u32 = 0x812c;
pub const AR_PHY_ERR_MASK_1: u32 = 0x8130;
pub const AR_PHY_ERR_2: u32 = 0x8134;
pub const AR_PHY_ERR_MASK_2: u32 = 0x8138;
pub const AR_PHY_ERR_OFDM_TIMING: u32 = 0x0002_0000;
pub const AR_PHY_ERR_CCK_TIMING: u32 = 0x0200_0000;
/// PHY error counters raise a MIB interrupt once they reach this value.
pub const AR_PHY_COUNTMAX: u32 = 3 << 22;
pub const AR_2040_MODE: u32 = 0x8318;
pub const AR_2040_JOINED_RX_CLEAR: u32 = 0x0000_0001;

// Baseband.
pub const AR_PHY_TURBO: u32 = 0x9804;
pub const AR_PHY_FC_DYN2040_EN: u32 = 0x0000_0004;
pub const AR_PHY_FC_DYN2040_PRI_CH: u32 = 0x0000_0010;
pub const AR_PHY_FC_HT_EN: u32 = 0x0000_0040;
pub const AR_PHY_FC_SHORT_GI_40: u32 = 0x0000_0080;
pub const AR_PHY_FC_WALSH: u32 = 0x0000_0100;
pub const AR_PHY_FC_SINGLE_HT_LTF1: u32 = 0x0000_0200;
pub const AR_PHY_TIMING3: u32 = 0x9814;
pub const AR_PHY_TIMING3_DSC_EXP: Field = Field::new(0x0001_e000);
pub const AR_PHY_TIMING3_DSC_MAN: Field = Field::new(0xfffe_0000);
pub const AR_PHY_ACTIVE: u32 = 0x981c;
pub const AR_PHY_ACTIVE_EN: u32 = 0x0000_0001;
pub const AR_PHY_ACTIVE_DIS: u32 = 0x0000_0000;
pub const AR_PHY_DESIRED_SZ: u32 = 0x9850;
pub const AR_PHY_DESIRED_SZ_TOT_DES: Field = Field::new(0x0ff0_0000);
pub const AR_PHY_FIND_SIG: u32 = 0x9858;
pub const AR_PHY_FIND_SIG_FIRSTEP: Field = Field::new(0x0003_f000);
pub const AR_PHY_FIND_SIG_FIRPWR: Field = Field::new(0x03fc_0000);
pub const AR_PHY_AGC_CTL1: u32 = 0x985c;
pub const AR_PHY_AGC_CTL1_COARSE_LOW: Field = Field::new(0x0000_7f80);
pub const AR_PHY_AGC_CTL1_COARSE_HIGH: Field = Field::new(0x003f_8000);
pub const AR_PHY_AGC_CONTROL: u32 = 0x9860;
pub const AR_PHY_AGC_CONTROL_NF: u32 = 0x0000_0002;
pub const AR_PHY_AGC_CONTROL_ENABLE_NF: u32 = 0x0000_8000;
pub const AR_PHY_AGC_CONTROL_NO_UPDATE_NF: u32 = 0x0002_0000;
pub const AR_PHY_SFCORR: u32 = 0x9868;
pub const AR_PHY_SFCORR_M2COUNT_THR: Field = Field::new(0x0000_001f);
pub const AR_PHY_SFCORR_M1_THRESH: Field = Field::new(0x00fe_0000);
pub const AR_PHY_SFCORR_M2_THRESH: Field = Field::new(0x7f00_0000);
pub const AR_PHY_SFCORR_LOW: u32 = 0x986c;
pub const AR_PHY_SFCORR_LOW_USE_SELF_CORR_LOW: u32 = 0x0000_0001;
pub const AR_PHY_SFCORR_LOW_M2COUNT_THR_LOW: Field = Field::new(0x0000_3f00);
pub const AR_PHY_SFCORR_LOW_M1_THRESH_LOW: Field = Field::new(0x001f_c000);
pub const AR_PHY_SFCORR_LOW_M2_THRESH_LOW: Field = Field::new(0x0fe0_0000);
pub const AR_PHY_RX_DELAY: u32 = 0x9914;
pub const AR_PHY_RX_DELAY_DELAY: Field = Field::new(0x0000_3fff);
pub const AR_PHY_TIMING5: u32 = 0x9924;
pub const AR_PHY_TIMING5_CYCPWR_THR1: Field = Field::new(0x0000_00fe);
pub const AR_PHY_RFBUS_REQ: u32 = 0x997c;
pub const AR_PHY_RFBUS_REQ_EN: u32 = 0x0000_0001;
pub const AR_PHY_SFCORR_EXT: u32 = 0x99c0;
pub const AR_PHY_SFCORR_EXT_M1_THRESH: Field = Field::new(0x0000_007f);
pub const AR_PHY_SFCORR_EXT_M2_THRESH: Field = Field::new(0x0000_3f80);
pub const AR_PHY_SFCORR_EXT_M1_THRESH_LOW: Field = Field::new(0x001f_c000);
pub const AR_PHY_SFCORR_EXT_M2_THRESH_LOW: Field = Field::new(0x0fe0_0000);
pub const AR_PHY_HALFGI: u32 = 0x99d0;
pub const AR_PHY_HALFGI_DSC_EXP: Field = Field::new(0x0000_000f);
pub const AR_PHY_HALFGI_DSC_MAN: Field = Field::new(0x0007_fff0);
pub const AR_PHY_CALMODE: u32 = 0x99f0;
pub const AR_PHY_CALMODE_IQ: u32 = 0x0000_0000;
pub const AR_PHY_CALMODE_ADC_GAIN: u32 = 0x0000_0001;
pub const AR_PHY_CALMODE_ADC_DC_PER: u32 = 0x0000_0002;
pub const AR_PHY_RFBUS_GRANT: u32 = 0x9c20;
pub const AR_PHY_RFBUS_GRANT_EN: u32 = 0x0000_0001;
pub const AR_PHY_CCK_DETECT: u32 = 0xa208;
pub const AR_PHY_CCK_DETECT_WEAK_SIG_THR_CCK: Field = Field::new(0x0000_003f);

// Per chain baseband registers.
pub const AR_PHY_TIMING_CTRL4_IQCORR_Q_Q_COFF: Field = Field::new(0x0000_001f);
pub const AR_PHY_TIMING_CTRL4_IQCORR_Q_I_COFF: Field = Field::new(0x0000_07e0);
pub const AR_PHY_TIMING_CTRL4_IQCORR_ENABLE: u32 = 0x0000_0800;
pub const AR_PHY_TIMING_CTRL4_IQCAL_LOG_COUNT_MAX: Field = Field::new(0x0000_f000);
pub const AR_PHY_TIMING_CTRL4_DO_CAL: u32 = 0x0001_0000;
pub const AR_PHY_NEW_ADC_DC_GAIN_QDC: Field = Field::new(0x0000_01ff);
pub const AR_PHY_NEW_ADC_DC_GAIN_IDC: Field = Field::new(0x0003_fe00);
pub const AR_PHY_NEW_ADC_DC_GAIN_QGAIN: Field = Field::new(0x00fc_0000);
pub const AR_PHY_NEW_ADC_DC_GAIN_IGAIN: Field = Field::new(0x3f00_0000);
pub const AR_PHY_NEW_ADC_GAIN_CORR_ENABLE: u32 = 0x4000_0000;
pub const AR_PHY_NEW_ADC_DC_OFFSET_CORR_ENABLE: u32 = 0x8000_0000;
const CHAIN_STRIDE: u32 = 0x1000;
pub const fn ar_phy_timing_ctrl4(chain: usize) -> u32 {
    0x9920 + (chain as u32) * CHAIN_STRIDE
}
pub const fn ar_phy_new_adc_dc_gain_corr(chain: usize) -> u32 {
    0x99b4 + (chain as u32) * CHAIN_STRIDE
}
/// The four calibration measurement registers of a chain. They are cleared on read.
pub const fn ar_phy_cal_meas(index: usize, chain: usize) -> u32 {
    0x9c10 + (index as u32) * 4 + (chain as u32) * CHAIN_STRIDE
}
