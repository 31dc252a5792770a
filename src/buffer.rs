/// A physically contiguous piece of a buffer, as seen by the DMA engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmaSegment {
    /// Bus address of the segment.
    pub addr: u32,
    pub len: u16,
}

/// A frame buffer, which is mapped for DMA.
///
/// The mapping has to stay valid until the buffer is returned through [BufferPool::release] or
/// handed to the link layer.
pub trait DmaBuffer {
    /// The DMA segments making up the buffer, in order.
    fn segments(&self) -> &[DmaSegment];
    /// Length of the frame in bytes.
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// CPU view of the frame.
    fn as_slice(&self) -> &[u8];
}

/// Allocator for DMA capable buffers.
pub trait BufferPool {
    type Buffer: DmaBuffer;
    /// Allocate an empty RX buffer, mapped as a single segment.
    fn alloc_rx(&mut self) -> Option<Self::Buffer>;
    /// Return a buffer to the pool.
    fn release(&mut self, buffer: Self::Buffer);
    /// Copy the buffer into a single segment.
    ///
    /// On failure the original buffer is handed back.
    fn linearize(&mut self, buffer: Self::Buffer) -> Result<Self::Buffer, Self::Buffer>;
}
