//! Fixed-capacity byte ring buffer.
//!
//! Stages inbound transport bytes until a complete length-prefixed
//! frame is present.
//!
//! ```text
//!  read ─┐           ┌─ write
//!        ▼           ▼
//! ┌───┬───┬───┬───┬───┬───┬───┬───┐
//! │   │ a │ b │ c │   │   │   │   │   N slots, N-1 usable
//! └───┴───┴───┴───┴───┴───┴───┴───┘
//! ```
//!
//! `read == write` always means empty. The writer stops one slot short
//! of the reader, so the queue is full at `N - 1` bytes.

/// Ring buffer of `N` slots holding at most `N - 1` bytes.
pub struct ByteQueue<const N: usize> {
    buf: [u8; N],
    read: usize,
    write: usize,
}

impl<const N: usize> Default for ByteQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ByteQueue<N> {
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            read: 0,
            write: 0,
        }
    }

    /// Maximum number of bytes the queue can hold.
    pub const fn capacity(&self) -> usize {
        N.saturating_sub(1)
    }

    /// Number of bytes ready to pop.
    pub fn available(&self) -> usize {
        if self.write >= self.read {
            self.write - self.read
        } else {
            N - self.read + self.write
        }
    }

    /// Number of bytes that can still be pushed.
    pub fn free(&self) -> usize {
        self.capacity() - self.available()
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    /// Copy as much of `src` as fits. Returns the number of bytes written.
    pub fn push(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.free());
        let first = n.min(N - self.write);
        self.buf[self.write..self.write + first].copy_from_slice(&src[..first]);
        self.buf[..n - first].copy_from_slice(&src[first..n]);
        if n > 0 {
            self.write = (self.write + n) % N;
        }
        n
    }

    /// Move up to `dst.len()` bytes out of the queue. Returns the count.
    pub fn pop(&mut self, dst: &mut [u8]) -> usize {
        let n = self.peek(dst);
        self.discard(n)
    }

    /// Copy up to `dst.len()` bytes without consuming them.
    pub fn peek(&self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.available());
        let first = n.min(N - self.read);
        dst[..first].copy_from_slice(&self.buf[self.read..self.read + first]);
        dst[first..n].copy_from_slice(&self.buf[..n - first]);
        n
    }

    /// Drop up to `n` bytes from the front. Returns the count dropped.
    pub fn discard(&mut self, n: usize) -> usize {
        let n = n.min(self.available());
        if n > 0 {
            self.read = (self.read + n) % N;
        }
        n
    }

    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
    }
}
