/// Errors, which can occur while driving the radio.
///
/// Most of these are handled inside the component that detected them and only show up in the
/// [RadioStats](crate::RadioStats). The ones that leave the crate are [HalError::RingFull]
/// (back pressure), [HalError::DmaMapping] (frame dropped), [HalError::ResetFailed], which
/// means the chip is not responding at all, and [HalError::AllocationFailure], if not a single
/// RX buffer could be allocated. After the last two the radio is stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HalError {
    /// A register didn't reach the expected value in time.
    Timeout {
        /// The register, that was polled.
        addr: u32,
    },
    /// Not enough free descriptors in the ring.
    RingFull,
    /// The status words of a descriptor contradict each other.
    DescriptorCorrupt,
    /// No buffer could be allocated.
    AllocationFailure,
    /// The accumulated calibration samples can't be converted into a coefficient.
    DegenerateCalibration,
    /// The frame can't be expressed with the available DMA segments.
    DmaMapping,
    /// The chip didn't come out of reset.
    ResetFailed,
    /// The radio hasn't been started.
    NotRunning,
    /// No rate state exists for the peer.
    UnknownPeer,
}
impl HalError {
    /// Whether the condition is handled by escalating to a full reset.
    pub const fn needs_reset(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::DescriptorCorrupt)
    }
}

pub type HalResult<T> = Result<T, HalError>;
