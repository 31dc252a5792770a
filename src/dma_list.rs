use alloc::{boxed::Box, vec, vec::Vec};
use core::{mem::size_of, ptr};

use bitfield_struct::bitfield;
use portable_atomic::{fence, Ordering};

use crate::{hal::RegisterAccess, HalError};

#[bitfield(u32)]
#[derive(PartialEq, Eq)]
/// The status word of a descriptor.
///
/// Apart from [DescStatus::hw_owned], this is only written by the hardware.
pub struct DescStatus {
    pub done: bool,
    /// RX: the frame passed all checks. TX: the frame was acknowledged.
    pub frame_ok: bool,
    pub crc_err: bool,
    pub phy_err: bool,
    pub decrypt_crc_err: bool,
    pub mic_err: bool,
    /// The frame continues in the next descriptor.
    pub more: bool,
    pub underrun: bool,
    pub excessive_retries: bool,
    /// Failed attempts in the final rate series.
    #[bits(4)]
    pub data_fail_count: u8,
    /// Index of the rate series the frame was finally sent with.
    #[bits(2)]
    pub final_series: u8,
    #[bits(8)]
    pub phy_err_code: u8,
    #[bits(8)]
    pub __: u8,
    /// Set by the driver when publishing, cleared by the hardware on completion.
    pub hw_owned: bool,
}
impl DescStatus {
    /// Whether one of the RX error flags is set.
    pub const fn has_rx_error(&self) -> bool {
        self.crc_err() || self.phy_err() || self.decrypt_crc_err() || self.mic_err()
    }
    /// Whether the status words contradict each other.
    ///
    /// A descriptor released by the hardware without being done, or one claiming success and an
    /// error at once, can't be trusted.
    pub const fn is_consistent(&self) -> bool {
        if self.hw_owned() {
            return true;
        }
        self.done() && !(self.frame_ok() && self.has_rx_error())
    }
    pub const fn is_cleanly_completed(&self) -> bool {
        !self.hw_owned() && self.done() && self.is_consistent()
    }
}

#[bitfield(u32)]
/// First RX status extension word.
pub struct RxStatus {
    #[bits(12)]
    pub data_len: u16,
    /// Combined RSSI in dB above the noise floor.
    pub rssi: u8,
    /// Hardware rate code.
    pub rate: u8,
    #[bits(4)]
    pub __: u8,
}

#[bitfield(u32)]
pub struct TxCtlFrame {
    #[bits(12)]
    pub frame_len: u16,
    #[bits(6)]
    pub tx_power: u8,
    pub rts_enable: bool,
    pub cts_enable: bool,
    pub int_req: bool,
    pub clear_dest_mask: bool,
    pub no_ack: bool,
    #[bits(3)]
    pub frame_type: u8,
    pub dur_update: bool,
    #[bits(5)]
    pub __: u8,
}

#[bitfield(u32)]
/// Length of the buffer a descriptor points to.
pub struct CtlBuffer {
    #[bits(12)]
    pub buf_len: u16,
    /// TX: more segments of this frame follow.
    pub more: bool,
    /// RX: raise an interrupt once this descriptor is done.
    pub int_req: bool,
    #[bits(18)]
    pub __: u32,
}

#[bitfield(u32)]
pub struct TxCtlTries {
    #[bits(4)]
    pub tries0: u8,
    #[bits(4)]
    pub tries1: u8,
    #[bits(4)]
    pub tries2: u8,
    #[bits(4)]
    pub tries3: u8,
    /// Duration of the whole protected exchange in µs.
    #[bits(15)]
    pub burst_duration: u16,
    #[bits(1)]
    pub __: u8,
}

#[bitfield(u32)]
pub struct TxCtlRates {
    pub rate0: u8,
    pub rate1: u8,
    pub rate2: u8,
    pub rate3: u8,
}

#[bitfield(u32)]
/// Durations of two rate series.
pub struct TxCtlDurations {
    #[bits(15)]
    pub dur_a: u16,
    pub rts_cts_a: bool,
    #[bits(15)]
    pub dur_b: u16,
    pub rts_cts_b: bool,
}

#[bitfield(u32)]
pub struct TxCtlProtection {
    pub rts_cts_rate: u8,
    #[bits(24)]
    pub __: u32,
}

pub const CTL_FRAME: usize = 0;
pub const CTL_BUFFER: usize = 1;
pub const CTL_TRIES: usize = 2;
pub const CTL_RATES: usize = 3;
pub const CTL_DUR01: usize = 4;
pub const CTL_DUR23: usize = 5;
pub const CTL_PROTECTION: usize = 6;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// A descriptor as laid out in DMA memory.
pub struct HwDescriptor {
    /// Bus address of the next descriptor. Zero terminates the chain.
    pub link: u32,
    /// Bus address of the buffer.
    pub data: u32,
    pub ctl: [u32; 8],
    pub status: DescStatus,
    pub status_ext: [u32; 2],
}
impl HwDescriptor {
    pub const EMPTY: Self = Self {
        link: 0,
        data: 0,
        ctl: [0; 8],
        status: DescStatus::new(),
        status_ext: [0; 2],
    };
    pub fn buffer_ctl(&self) -> CtlBuffer {
        CtlBuffer::from_bits(self.ctl[CTL_BUFFER])
    }
    pub fn frame_ctl(&self) -> TxCtlFrame {
        TxCtlFrame::from_bits(self.ctl[CTL_FRAME])
    }
    pub fn tries(&self) -> TxCtlTries {
        TxCtlTries::from_bits(self.ctl[CTL_TRIES])
    }
    pub fn rates(&self) -> TxCtlRates {
        TxCtlRates::from_bits(self.ctl[CTL_RATES])
    }
    pub fn durations(&self) -> [TxCtlDurations; 2] {
        [
            TxCtlDurations::from_bits(self.ctl[CTL_DUR01]),
            TxCtlDurations::from_bits(self.ctl[CTL_DUR23]),
        ]
    }
    pub fn protection(&self) -> TxCtlProtection {
        TxCtlProtection::from_bits(self.ctl[CTL_PROTECTION])
    }
    pub fn rx_status(&self) -> RxStatus {
        RxStatus::from_bits(self.status_ext[0])
    }
    /// The TSF timestamp of the received frame.
    pub fn rx_timestamp(&self) -> u32 {
        self.status_ext[1]
    }
}

/// Whether a push may use the reserved descriptors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PushClass {
    Normal,
    /// Control frames, which must never block behind data.
    Reserved,
}

/// A frame the hardware is done with.
#[derive(Debug)]
pub struct Completed<B> {
    /// Copy of the last descriptor of the frame, which carries the status.
    pub desc: HwDescriptor,
    pub buffer: Option<B>,
    /// Number of descriptors the frame occupied.
    pub descriptors: usize,
}

/// A ring of DMA descriptors.
///
/// The descriptors are allocated once. Frames occupy one or more consecutive slots and are
/// appended at the tail, by patching the link word of the previous tail. The hardware owns a
/// contiguous run of descriptors at the end of the in flight region and hands them back from
/// the head.
pub struct DescriptorRing<B> {
    descs: Box<[HwDescriptor]>,
    buffers: Box<[Option<B>]>,
    frame_len: Box<[u8]>,
    head: usize,
    in_flight: usize,
    reserve: usize,
    dma_base: u32,
    start_reg: u32,
}
impl<B> DescriptorRing<B> {
    /// Create a new ring with `capacity + reserve` descriptors.
    ///
    /// `dma_base` is the bus address of the descriptor memory and `start_reg` the register,
    /// through which the head of the chain is handed to the hardware.
    pub fn new(capacity: usize, reserve: usize, dma_base: u32, start_reg: u32) -> Self {
        let len = (capacity + reserve).max(1);
        Self {
            descs: vec![HwDescriptor::EMPTY; len].into_boxed_slice(),
            buffers: (0..len).map(|_| None).collect(),
            frame_len: vec![0; len].into_boxed_slice(),
            head: 0,
            in_flight: 0,
            reserve,
            dma_base,
            start_reg,
        }
    }
    /// The descriptor memory, which has to be mapped at `dma_base`.
    pub fn descriptors(&self) -> &[HwDescriptor] {
        &self.descs
    }
    pub fn len(&self) -> usize {
        self.descs.len()
    }
    pub fn is_empty(&self) -> bool {
        self.in_flight == 0
    }
    /// Number of descriptors currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }
    pub fn free_slots(&self) -> usize {
        self.len() - self.in_flight
    }
    pub fn start_reg(&self) -> u32 {
        self.start_reg
    }
    /// Bus address of the descriptor at `index`.
    pub fn dma_addr(&self, index: usize) -> u32 {
        self.dma_base + (index * size_of::<HwDescriptor>()) as u32
    }
    /// Bus address of the head descriptor.
    pub fn head_addr(&self) -> u32 {
        self.dma_addr(self.head)
    }
    fn index(&self, offset: usize) -> usize {
        (self.head + offset) % self.len()
    }
    fn status(&self, index: usize) -> DescStatus {
        // The hardware may write this at any time.
        // SAFETY: The reference comes from a live, aligned element of `descs`.
        unsafe { ptr::read_volatile(&self.descs[index].status) }
    }
    /// Reset all descriptors and hand the head to the hardware.
    ///
    /// Buffers still attached to the ring are dropped, so use [Self::reclaim_all] first.
    pub fn init<R: RegisterAccess>(&mut self, regs: &mut R) {
        self.descs.fill(HwDescriptor::EMPTY);
        self.buffers.iter_mut().for_each(|buffer| *buffer = None);
        self.frame_len.fill(0);
        self.head = 0;
        self.in_flight = 0;
        regs.write(self.start_reg, self.dma_addr(0));
        trace!(
            "Initialized ring with {} descriptors at {:x}.",
            self.len(),
            self.dma_base
        );
    }
    /// Append a frame, described by one descriptor per DMA segment.
    ///
    /// The link and status words of the templates are overwritten. The buffer is attached to the
    /// last descriptor. On failure the buffer is handed back.
    pub fn push<R: RegisterAccess>(
        &mut self,
        regs: &mut R,
        buffer: B,
        templates: &[HwDescriptor],
        class: PushClass,
    ) -> Result<usize, (HalError, B)> {
        let count = templates.len();
        if count == 0 || count > u8::MAX as usize {
            return Err((HalError::DmaMapping, buffer));
        }
        let reserve = match class {
            PushClass::Normal => self.reserve,
            PushClass::Reserved => 0,
        };
        if self.free_slots() < count + reserve {
            return Err((HalError::RingFull, buffer));
        }
        let len = self.len();
        let first = self.index(self.in_flight);
        for (i, template) in templates.iter().enumerate() {
            let index = (first + i) % len;
            let mut desc = *template;
            desc.link = if i + 1 < count {
                self.dma_addr((index + 1) % len)
            } else {
                0
            };
            desc.status = DescStatus::new();
            desc.status_ext = [0; 2];
            self.descs[index] = desc;
        }
        self.frame_len[first] = count as u8;
        self.buffers[(first + count - 1) % len] = Some(buffer);

        // All fields have to be visible before the hardware may touch the descriptors.
        fence(Ordering::Release);
        for i in (0..count).rev() {
            let index = (first + i) % len;
            // SAFETY: `index` is in bounds and the descriptor isn't owned by the hardware yet.
            unsafe {
                ptr::write_volatile(
                    &mut self.descs[index].status,
                    DescStatus::new().with_hw_owned(true),
                )
            };
        }
        fence(Ordering::Release);

        let first_addr = self.dma_addr(first);
        if self.in_flight == 0 {
            regs.write(self.start_reg, first_addr);
        } else {
            let tail = self.index(self.in_flight - 1);
            // SAFETY: `tail` is in bounds. The hardware only reads the link word, so a single
            // aligned store can't race with it.
            unsafe { ptr::write_volatile(&mut self.descs[tail].link, first_addr) };
        }
        self.in_flight += count;
        Ok(first)
    }
    /// Take completed frames from the head.
    ///
    /// The iterator stops at the first descriptor, that is still owned by the hardware or whose
    /// status is inconsistent. Dropping it early leaves the remaining frames in the ring.
    pub fn reap(&mut self) -> Reap<'_, B> {
        Reap { ring: self }
    }
    fn head_frame_len(&self) -> usize {
        (self.frame_len[self.head] as usize).clamp(1, self.in_flight)
    }
    fn reap_one(&mut self) -> Option<Completed<B>> {
        if self.in_flight == 0 {
            return None;
        }
        let last = self.index(self.head_frame_len() - 1);
        if !self.status(last).is_cleanly_completed() {
            return None;
        }
        fence(Ordering::Acquire);
        let desc = self.descs[last];
        Some(self.retire_head(desc))
    }
    fn retire_head(&mut self, desc: HwDescriptor) -> Completed<B> {
        let count = self.head_frame_len();
        let mut buffer = None;
        for i in 0..count {
            let index = self.index(i);
            self.descs[index] = HwDescriptor::EMPTY;
            if let Some(b) = self.buffers[index].take() {
                buffer = Some(b);
            }
        }
        self.frame_len[self.head] = 0;
        self.head = self.index(count);
        self.in_flight -= count;
        Completed {
            desc,
            buffer,
            descriptors: count,
        }
    }
    /// Copy of the descriptor `offset` entries after the head.
    pub fn peek(&self, offset: usize) -> Option<HwDescriptor> {
        if offset >= self.in_flight {
            return None;
        }
        let index = self.index(offset);
        let mut desc = self.descs[index];
        desc.status = self.status(index);
        Some(desc)
    }
    /// Whether the descriptor `offset` entries after the head was cleanly completed.
    pub fn is_completed(&self, offset: usize) -> bool {
        offset < self.in_flight && self.status(self.index(offset)).is_cleanly_completed()
    }
    /// Drop the head frame regardless of its status and restart the hardware at the next
    /// descriptor.
    pub fn skip_head<R: RegisterAccess>(&mut self, regs: &mut R) -> Option<Completed<B>> {
        if self.in_flight == 0 {
            return None;
        }
        let last = self.index(self.head_frame_len() - 1);
        let desc = self.descs[last];
        let completed = self.retire_head(desc);
        if self.in_flight != 0 {
            regs.write(self.start_reg, self.head_addr());
        }
        Some(completed)
    }
    /// Force every in flight descriptor complete and return the attached buffers.
    ///
    /// The DMA engine has to be stopped before calling this.
    pub fn reclaim_all(&mut self) -> Vec<B> {
        let mut buffers = Vec::new();
        while self.in_flight != 0 {
            let last = self.index(self.head_frame_len() - 1);
            let desc = self.descs[last];
            if let Some(buffer) = self.retire_head(desc).buffer {
                buffers.push(buffer);
            }
        }
        buffers
    }
    /// Check, that the hardware owned descriptors form a contiguous run ending at the tail.
    pub fn hw_owned_is_contiguous(&self) -> bool {
        let mut seen_owned = false;
        for offset in 0..self.in_flight {
            let owned = self.status(self.index(offset)).hw_owned();
            if seen_owned && !owned {
                return false;
            }
            seen_owned |= owned;
        }
        true
    }
}
#[cfg(test)]
impl<B> DescriptorRing<B> {
    /// Complete the descriptor `offset` entries after the head, like the DMA engine does.
    pub(crate) fn hw_complete(&mut self, offset: usize, status: DescStatus, ext: [u32; 2]) {
        let index = self.index(offset);
        self.descs[index].status_ext = ext;
        self.descs[index].status = status.with_hw_owned(false);
    }
    pub(crate) fn link_of(&self, offset: usize) -> u32 {
        self.descs[self.index(offset)].link
    }
}

/// Iterator returned by [DescriptorRing::reap].
pub struct Reap<'a, B> {
    ring: &'a mut DescriptorRing<B>,
}
impl<B> Iterator for Reap<'_, B> {
    type Item = Completed<B>;
    fn next(&mut self) -> Option<Self::Item> {
        self.ring.reap_one()
    }
}
