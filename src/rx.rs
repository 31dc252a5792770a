use embassy_time::Duration;

use crate::{
    buffer::{BufferPool, DmaBuffer},
    config::RxConfig,
    dma_list::{CtlBuffer, DescriptorRing, HwDescriptor, PushClass, CTL_BUFFER},
    hal::{RegisterAccess, RegisterPort},
    radio::LinkLayer,
    regs::*,
    HalError, HalResult,
};

const STOP_TIMEOUT: Duration = Duration::from_millis(10);
/// Number of PHY error codes tracked individually.
pub const PHY_ERROR_CODES: usize = 32;

/// Metadata of a received frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxInfo {
    /// Signal strength in dB above the noise floor.
    pub rssi: i8,
    /// Hardware rate code.
    pub rate: u8,
    /// Lower 32 bits of the TSF, when the frame was received.
    pub timestamp: u32,
    /// Length of the frame in the buffer.
    pub len: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxStats {
    /// Frames delivered to the link layer.
    pub frames: u32,
    /// All dropped frames, except for missing buffers.
    pub errors: u32,
    pub crc_errors: u32,
    pub phy_errors: u32,
    pub phy_error_codes: [u32; PHY_ERROR_CODES],
    pub decrypt_errors: u32,
    pub mic_failures: u32,
    /// Descriptors with a corrupt status, that were skipped.
    pub corrupt: u32,
    pub bad_length: u32,
    /// Frames spanning multiple descriptors.
    pub fragmented: u32,
    /// Frames dropped, because no replacement buffer was available.
    pub nobuf: u32,
}

/// Handles the RX ring.
pub struct RxEngine<B> {
    ring: DescriptorRing<B>,
    config: RxConfig,
    /// Average RSSI in 1/16 dB.
    rssi_avg: Option<i32>,
    pub stats: RxStats,
}
impl<B: DmaBuffer> RxEngine<B> {
    pub fn new(config: RxConfig, dma_base: u32) -> Self {
        Self {
            ring: DescriptorRing::new(config.ring_size, 0, dma_base, AR_RXDP),
            config,
            rssi_avg: None,
            stats: RxStats::default(),
        }
    }
    pub fn ring(&self) -> &DescriptorRing<B> {
        &self.ring
    }
    #[cfg(test)]
    pub(crate) fn ring_mut(&mut self) -> &mut DescriptorRing<B> {
        &mut self.ring
    }
    /// Average RSSI of the delivered frames.
    pub fn avg_rssi(&self) -> Option<i32> {
        self.rssi_avg.map(|avg| avg / 16)
    }
    fn note_rssi(&mut self, rssi: i8) {
        let sample = rssi as i32 * 16;
        self.rssi_avg = Some(match self.rssi_avg {
            Some(avg) => avg + (sample - avg) / 8,
            None => sample,
        });
    }
    /// Hand a buffer to the hardware at the tail of the ring.
    fn publish<R: RegisterAccess, P: BufferPool<Buffer = B>>(
        &mut self,
        regs: &mut R,
        pool: &mut P,
        buffer: B,
    ) {
        let Some(segment) = buffer.segments().first().copied() else {
            warn!("RX buffer isn't mapped.");
            pool.release(buffer);
            return;
        };
        let mut template = HwDescriptor::EMPTY;
        template.data = segment.addr;
        template.ctl[CTL_BUFFER] = CtlBuffer::new()
            .with_buf_len(segment.len.min(self.config.buffer_size as u16).min(0xfff))
            .with_int_req(true)
            .into_bits();
        if let Err((_, buffer)) = self.ring.push(regs, buffer, &[template], PushClass::Normal) {
            pool.release(buffer);
        }
    }
    /// Put a buffer back into the ring and make sure RX is running.
    fn recycle<R: RegisterAccess, P: BufferPool<Buffer = B>>(
        &mut self,
        regs: &mut R,
        pool: &mut P,
        buffer: B,
    ) {
        self.publish(regs, pool, buffer);
        regs.write(AR_CR, AR_CR_RXE);
    }
    /// Fill the ring with buffers and start receiving.
    ///
    /// Buffers still in the ring are reused. The DMA engine has to be stopped.
    pub fn start<R: RegisterAccess, P: BufferPool<Buffer = B>>(
        &mut self,
        regs: &mut R,
        pool: &mut P,
    ) -> HalResult<()> {
        let buffers = self.ring.reclaim_all();
        self.ring.init(regs);
        for buffer in buffers {
            self.publish(regs, pool, buffer);
        }
        while self.ring.free_slots() > 0 {
            let Some(buffer) = pool.alloc_rx() else {
                break;
            };
            self.publish(regs, pool, buffer);
        }
        if self.ring.is_empty() {
            error!("Couldn't allocate any RX buffers.");
            return Err(HalError::AllocationFailure);
        }
        if self.ring.free_slots() > 0 {
            warn!(
                "Only allocated {} of {} RX buffers.",
                self.ring.in_flight(),
                self.ring.len()
            );
        }
        regs.write(
            AR_RX_FILTER,
            AR_RX_FILTER_UCAST | AR_RX_FILTER_MCAST | AR_RX_FILTER_BCAST | AR_RX_FILTER_BEACON,
        );
        regs.write(AR_FILT_OFDM, 0);
        regs.write(AR_FILT_CCK, 0);
        regs.write(AR_MIBC, 0);
        regs.write(AR_PHY_ERR_MASK_1, AR_PHY_ERR_OFDM_TIMING);
        regs.write(AR_PHY_ERR_MASK_2, AR_PHY_ERR_CCK_TIMING);
        regs.clear_bits(AR_DIAG_SW, AR_DIAG_RX_DIS | AR_DIAG_RX_ABORT);
        regs.write(AR_CR, AR_CR_RXE);
        debug!("RX started with {} buffers.", self.ring.in_flight());
        Ok(())
    }
    /// Stop the RX DMA engine.
    pub fn stop_dma<R: RegisterAccess>(&mut self, regs: &mut R) -> HalResult<()> {
        regs.write(AR_CR, AR_CR_RXD);
        regs.wait_until(AR_CR, AR_CR_RXE, 0, STOP_TIMEOUT)
    }
    /// Stop accepting frames and stop the DMA engine.
    pub fn stop<R: RegisterAccess>(&mut self, regs: &mut R) -> HalResult<()> {
        regs.set_bits(AR_DIAG_SW, AR_DIAG_RX_DIS);
        regs.write(AR_RX_FILTER, 0);
        self.stop_dma(regs)
    }
    /// Abort reception immediately. This is used before a reset.
    pub fn abort<R: RegisterAccess>(&mut self, regs: &mut R) {
        regs.set_bits(AR_DIAG_SW, AR_DIAG_RX_DIS | AR_DIAG_RX_ABORT);
    }
    /// Release all buffers of the ring.
    pub fn reclaim<P: BufferPool<Buffer = B>>(&mut self, pool: &mut P) {
        for buffer in self.ring.reclaim_all() {
            pool.release(buffer);
        }
    }
    fn count_error(&mut self, desc: &HwDescriptor) {
        let status = desc.status;
        self.stats.errors += 1;
        if status.crc_err() {
            self.stats.crc_errors += 1;
        } else if status.phy_err() {
            self.stats.phy_errors += 1;
            let code = status.phy_err_code() as usize;
            if let Some(count) = self.stats.phy_error_codes.get_mut(code) {
                *count += 1;
            }
        } else if status.decrypt_crc_err() {
            self.stats.decrypt_errors += 1;
        }
    }
    /// Process the frame at the head of the ring.
    ///
    /// Returns `false` if there was nothing to do.
    pub fn poll_once<R: RegisterAccess, P: BufferPool<Buffer = B>, L: LinkLayer<B>>(
        &mut self,
        regs: &mut R,
        pool: &mut P,
        link: &mut L,
    ) -> bool {
        if !self.ring.is_completed(0) {
            // If the next descriptor is done, the status of the head can't be trusted.
            if !self.ring.is_completed(1) {
                return false;
            }
            warn!("RX descriptor status is corrupt, skipping it.");
            self.stats.corrupt += 1;
            self.stats.errors += 1;
            if let Some(buffer) = self.ring.skip_head(regs).and_then(|c| c.buffer) {
                self.recycle(regs, pool, buffer);
            }
            return true;
        }
        let Some(completed) = self.ring.reap().next() else {
            return false;
        };
        let Some(buffer) = completed.buffer else {
            return true;
        };
        let desc = completed.desc;
        let status = desc.status;
        let rx_status = desc.rx_status();
        if status.more() {
            trace!("Dropping fragmented frame.");
            self.stats.fragmented += 1;
            self.stats.errors += 1;
            self.recycle(regs, pool, buffer);
            return true;
        }
        if status.mic_err() {
            self.stats.mic_failures += 1;
            self.stats.errors += 1;
            link.mic_failure();
            self.recycle(regs, pool, buffer);
            return true;
        }
        if !status.frame_ok() || status.has_rx_error() {
            self.count_error(&desc);
            self.recycle(regs, pool, buffer);
            return true;
        }
        let len = rx_status.data_len() as usize;
        if len == 0 || len > self.config.buffer_size {
            debug!("Dropping frame with corrupt length {}.", len);
            self.stats.bad_length += 1;
            self.stats.errors += 1;
            self.recycle(regs, pool, buffer);
            return true;
        }
        let Some(replacement) = pool.alloc_rx() else {
            self.stats.nobuf += 1;
            self.recycle(regs, pool, buffer);
            return true;
        };
        let info = RxInfo {
            rssi: rx_status.rssi() as i8,
            rate: rx_status.rate(),
            timestamp: desc.rx_timestamp(),
            len,
        };
        self.note_rssi(info.rssi);
        self.stats.frames += 1;
        link.deliver(buffer, info);
        self.recycle(regs, pool, replacement);
        true
    }
    /// Process all pending frames.
    ///
    /// Returns the number of processed descriptors.
    pub fn poll<R: RegisterAccess, P: BufferPool<Buffer = B>, L: LinkLayer<B>>(
        &mut self,
        regs: &mut R,
        pool: &mut P,
        link: &mut L,
    ) -> usize {
        let mut processed = 0;
        while self.poll_once(regs, pool, link) {
            processed += 1;
        }
        processed
    }
}
