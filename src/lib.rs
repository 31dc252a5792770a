//! # `athn-hal`
//! This is the runtime control plane for the Atheros AR5416 family of 802.11 MACs.
//! It drives the TX and RX descriptor rings, switches channels, runs the periodic radio
//! calibration and adapts the noise immunity of the receiver to the environment.
//!
//! ## Hardware overview
//! ### Descriptor rings
//! The DMA engines work on linked lists of descriptors. Each descriptor carries the bus address
//! of a buffer, a set of control words and a set of status words, which are written by the
//! hardware once it's done with the descriptor. We allocate all descriptors of a ring up front
//! and append to the chain by patching the link word of the previous tail. The hardware-owned
//! descriptors always form a contiguous run at the end of the in flight region, so completions
//! are reaped from the head until the first descriptor still owned by the hardware.
//!
//! ### Transmit (TX)
//! There are ten hardware queues. Data frames are sorted into the four access categories by
//! their TID, beacons, PS-Poll responses and frames following a beacon have their own queues.
//! A frame may span multiple descriptors, the final status is reported in the last one. The
//! control words carry four rate series, each with its own number of tries, which are walked
//! down the fallback chain of the peer.
//!
//! ### Receive (RX)
//! The RX ring is kept full of empty buffers. Received frames are handed to the [LinkLayer] and
//! replaced by a fresh buffer. If no buffer can be allocated, the frame is dropped and its buffer
//! is reused, so the ring never runs dry.
//!
//! ### Channel switching
//! Within a band, the synthesizer can be retuned while the RF bus is held. A band or bandwidth
//! change requires a full reset of the chip. The chip specific parts of this are hidden behind
//! [ChipOps].
//!
//! ### Calibration and ANI
//! The IQ imbalance, ADC gain and ADC DC offset calibrations are driven by a timer and accumulate
//! hardware measurements over many rounds before applying a correction. Adaptive noise immunity
//! watches the PHY error rates and raises or lowers the detection thresholds of the receiver.
//!
//! ## Usage
//! All state is owned by a single [Radio], which is driven from one task. Interrupt handlers
//! and timer callbacks only post to [RadioEvents], which [Radio::run] drains.

#![cfg_attr(not(test), no_std)]
#![allow(unexpected_cfgs)]
extern crate alloc;

pub(crate) mod fmt;

mod ani;
mod buffer;
mod calib;
mod channel;
mod chip;
mod config;
mod dma_list;
mod error;
pub mod hal;
mod radio;
mod rate;
pub mod regs;
mod rx;
mod switch;
mod sync;
mod tx;

pub use ani::{AniState, AniStats, ImmunityPolicy};
pub use buffer::{BufferPool, DmaBuffer, DmaSegment};
pub use calib::{CalPhase, CalStats, CalStatus};
pub use channel::{Band, Bandwidth, Channel, PhyMode};
pub use chip::{ChipCaps, ChipOps};
pub use config::*;
pub use dma_list::HwDescriptor;
pub use error::{HalError, HalResult};
pub use radio::{DmaLayout, LinkLayer, Radio, RadioStats, TimerScheduler};
pub use rate::{PeerId, RateState};
pub use rx::{RxInfo, RxStats};
pub use switch::SwitchPath;
pub use sync::{RadioEvent, RadioEvents, RadioTimer};
pub use tx::{QueueId, TxRejected, TxRequest, TxStats};

cfg_if::cfg_if! {
    if #[cfg(feature = "critical_section")] {
        type DefaultRawMutex = embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    } else {
        type DefaultRawMutex = embassy_sync::blocking_mutex::raw::NoopRawMutex;
    }
}
