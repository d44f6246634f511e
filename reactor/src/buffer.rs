//! Lock-free SPSC byte ring for per-connection staging.
//!
//! Head and tail live in `[0, capacity)`; one slot is reserved so a full
//! ring is distinguishable from an empty one:
//! `readable + writable + 1 == capacity`. The producer publishes the tail
//! with release ordering after copying bytes in; the consumer acquires it
//! before reading. The buffer never copies across the wrap boundary:
//! callers take the first contiguous span and either work in two segments
//! or `clear()` once the ring is empty.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct RingBuffer {
    buf: Box<[UnsafeCell<u8>]>,
    capacity: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// Sound under the single-producer / single-consumer discipline enforced by
// the connection ownership protocol: at most one thread advances each index.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 1, "ring capacity must exceed the reserved slot");
        let buf: Box<[UnsafeCell<u8>]> = (0..capacity).map(|_| UnsafeCell::new(0)).collect();
        RingBuffer {
            buf,
            capacity,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn readable_size(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (tail + self.capacity - head) % self.capacity
    }

    pub fn writable_size(&self) -> usize {
        self.capacity - 1 - self.readable_size()
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    /// Producer cursor: pointer to the first writable byte.
    pub fn write_tail(&self) -> *mut u8 {
        let tail = self.tail.load(Ordering::Acquire);
        self.buf.as_ptr().wrapping_add(tail) as *mut u8
    }

    /// Bytes writable without crossing the wrap boundary.
    pub fn contiguous_writable(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        self.writable_size().min(self.capacity - tail)
    }

    /// Publish `k` bytes copied in at [`write_tail`](Self::write_tail).
    /// Fails without mutation if `k` exceeds the writable size; `k == 0`
    /// succeeds as a no-op.
    pub fn write_data(&self, k: usize) -> bool {
        if k == 0 {
            return true;
        }
        if k > self.writable_size() {
            return false;
        }
        let tail = self.tail.load(Ordering::Acquire);
        self.tail.store((tail + k) % self.capacity, Ordering::Release);
        true
    }

    /// Consumer cursor: pointer to the first readable byte.
    pub fn read_head(&self) -> *const u8 {
        let head = self.head.load(Ordering::Acquire);
        self.buf.as_ptr().wrapping_add(head) as *const u8
    }

    /// Bytes readable without crossing the wrap boundary.
    pub fn contiguous_readable(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        self.readable_size().min(self.capacity - head)
    }

    /// First contiguous readable segment. Stable for the consumer: only the
    /// consumer advances the head.
    pub fn readable_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.read_head(), self.contiguous_readable()) }
    }

    /// Both readable segments; the second is empty unless the data wraps.
    pub fn readable_slices(&self) -> (&[u8], &[u8]) {
        let head = self.head.load(Ordering::Acquire);
        let readable = self.readable_size();
        let first = readable.min(self.capacity - head);
        let second = readable - first;
        unsafe {
            (
                std::slice::from_raw_parts(self.buf.as_ptr().wrapping_add(head) as *const u8, first),
                std::slice::from_raw_parts(self.buf.as_ptr() as *const u8, second),
            )
        }
    }

    /// Consume `k` readable bytes. Fails without mutation if `k` exceeds
    /// the readable size; `k == 0` succeeds as a no-op.
    pub fn read_data(&self, k: usize) -> bool {
        if k == 0 {
            return true;
        }
        if k > self.readable_size() {
            return false;
        }
        let head = self.head.load(Ordering::Acquire);
        self.head.store((head + k) % self.capacity, Ordering::Release);
        true
    }

    /// Copy as much of `data` in as fits, wrapping across the boundary in
    /// two segments. Returns the number of bytes accepted.
    pub fn write_from(&self, data: &[u8]) -> usize {
        let mut written = 0;
        while written < data.len() {
            let span = self.contiguous_writable();
            if span == 0 {
                break;
            }
            let chunk = span.min(data.len() - written);
            unsafe {
                std::ptr::copy_nonoverlapping(data.as_ptr().add(written), self.write_tail(), chunk);
            }
            self.write_data(chunk);
            written += chunk;
        }
        written
    }

    /// Reset both cursors to zero. Only the owner of both ends may call
    /// this; the reactor does so whenever the ring drains empty.
    pub fn clear(&self) {
        self.head.store(0, Ordering::Release);
        self.tail.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(ring: &RingBuffer, data: &[u8]) -> usize {
        ring.write_from(data)
    }

    fn drain(ring: &RingBuffer, k: usize) -> Vec<u8> {
        let (a, b) = ring.readable_slices();
        let mut out: Vec<u8> = a.iter().chain(b.iter()).take(k).copied().collect();
        assert!(ring.read_data(out.len()));
        out.truncate(k);
        out
    }

    #[test]
    fn accounting_invariant_holds() {
        let ring = RingBuffer::new(64);
        assert_eq!(ring.readable_size() + ring.writable_size() + 1, 64);

        fill(&ring, b"hello world");
        assert_eq!(ring.readable_size(), 11);
        assert_eq!(ring.readable_size() + ring.writable_size() + 1, 64);

        ring.read_data(5);
        assert_eq!(ring.readable_size() + ring.writable_size() + 1, 64);
    }

    #[test]
    fn write_then_read_same_k_leaves_head_equal_tail() {
        let ring = RingBuffer::new(64);
        fill(&ring, &[7u8; 20]);
        assert!(ring.read_data(20));
        assert!(ring.is_empty());
    }

    #[test]
    fn zero_length_ops_succeed() {
        let ring = RingBuffer::new(16);
        assert!(ring.write_data(0));
        assert!(ring.read_data(0));
        assert!(ring.is_empty());
    }

    #[test]
    fn overflow_and_underflow_fail_without_mutation() {
        let ring = RingBuffer::new(16);
        assert!(!ring.write_data(16)); // only 15 writable
        assert!(ring.is_empty());

        fill(&ring, b"abc");
        assert!(!ring.read_data(4));
        assert_eq!(ring.readable_size(), 3);
    }

    #[test]
    fn one_slot_is_reserved() {
        let ring = RingBuffer::new(16);
        assert_eq!(ring.writable_size(), 15);
        assert_eq!(fill(&ring, &[0u8; 32]), 15);
        assert_eq!(ring.writable_size(), 0);
    }

    #[test]
    fn data_survives_the_wrap_boundary() {
        let ring = RingBuffer::new(16);
        fill(&ring, &[1u8; 12]);
        assert_eq!(drain(&ring, 12), vec![1u8; 12]);

        // Head/tail now sit at 12; the next write wraps.
        let data: Vec<u8> = (0..10).collect();
        assert_eq!(fill(&ring, &data), 10);
        let (a, b) = ring.readable_slices();
        assert_eq!(a.len(), 4);
        assert_eq!(b.len(), 6);
        assert_eq!(drain(&ring, 10), data);
    }

    #[test]
    fn clear_resets_cursors() {
        let ring = RingBuffer::new(16);
        fill(&ring, b"data");
        ring.read_data(4);
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.contiguous_writable(), 15);
    }

    #[test]
    fn contiguous_spans_respect_the_boundary() {
        let ring = RingBuffer::new(16);
        fill(&ring, &[0u8; 14]);
        ring.read_data(14);
        // tail = 14: only 2 bytes before the wrap.
        assert_eq!(ring.contiguous_writable(), 2);
        assert_eq!(fill(&ring, &[9u8; 5]), 5);
        assert_eq!(ring.contiguous_readable(), 2);
        assert_eq!(ring.readable_size(), 5);
    }
}
