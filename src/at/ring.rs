//! Fixed-capacity receive ring buffer.
//!
//! The fill level is tracked as an explicit count, so a full buffer and an
//! empty one are never confused even when `head == tail`.

/// Receive capacity used by the transports.
pub const DEFAULT_RX_CAPACITY: usize = 512;

/// Byte ring buffer that drops the newest bytes on overflow.
#[derive(Debug)]
pub struct RingBuffer {
    buf: Box<[u8]>,
    /// Next index to read.
    head: usize,
    /// Next index to write.
    tail: usize,
    len: usize,
    dropped: u64,
}

impl RingBuffer {
    /// Create a buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity.max(1)].into_boxed_slice(),
            head: 0,
            tail: 0,
            len: 0,
            dropped: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.buf.len()
    }

    /// Space left before bytes start being dropped.
    pub fn free(&self) -> usize {
        self.buf.len() - self.len
    }

    /// Total number of bytes dropped on overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Append bytes, returning how many were stored.
    ///
    /// Bytes that do not fit are discarded and counted in [`dropped`](Self::dropped).
    pub fn push(&mut self, data: &[u8]) -> usize {
        let accepted = data.len().min(self.free());
        for &byte in &data[..accepted] {
            self.buf[self.tail] = byte;
            self.tail = (self.tail + 1) % self.buf.len();
        }
        self.len += accepted;

        let rejected = data.len() - accepted;
        if rejected > 0 {
            self.dropped += rejected as u64;
            log::warn!("RX ring full, dropped {} bytes", rejected);
        }
        accepted
    }

    /// Move up to `out.len()` bytes into `out`, oldest first.
    pub fn pop_into(&mut self, out: &mut [u8]) -> usize {
        let count = out.len().min(self.len);
        for slot in out.iter_mut().take(count) {
            *slot = self.buf[self.head];
            self.head = (self.head + 1) % self.buf.len();
        }
        self.len -= count;
        count
    }

    /// Discard all buffered bytes.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.len = 0;
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_RX_CAPACITY)
    }
}
