//! Per-connection state.
//!
//! Records live in the slab tier of the memory pool and are reused across
//! connections without reconstruction; [`Connection::reset`] restores the
//! blank state on acquire. The generation counter is bumped when the slot
//! is returned, so completions armed for a previous tenant are discarded.

use std::borrow::Cow;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::fd::RawFd;

use bytes::BytesMut;

use crate::buffer::RingBuffer;

/// Default per-direction staging capacity.
pub const DEFAULT_RING_CAPACITY: usize = 32 * 1024;

/// Per-connection state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Accepting,
    Reading,
    Writing,
    Closing,
}

/// Protocol classification recorded by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    Http,
    File,
    Chat,
    Unknown,
}

/// Outcome of the most recent framing probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseResult {
    NeedMore,
    Complete,
    InvalidFormat,
    ChunkedUnsupported,
}

/// Buddy-pool block staging request bytes that exceed the read ring.
/// `len` is exactly the missing byte count at allocation time.
#[derive(Debug)]
pub struct Overflow {
    pub offset: usize,
    pub ptr: *mut u8,
    pub len: usize,
    pub filled: usize,
}

// The block is owned exclusively by whichever thread owns the connection.
unsafe impl Send for Overflow {}

pub struct Connection {
    pub fd: RawFd,
    pub addr: libc::sockaddr_in,
    pub addr_len: libc::socklen_t,
    pub state: ConnState,
    pub read_ring: RingBuffer,
    pub write_ring: RingBuffer,
    pub overflow: Option<Overflow>,
    pub bytes_pending: usize,
    pub task_type: TaskType,
    pub parse_result: ParseResult,
    /// Response bytes that did not fit the write ring; the reactor drains
    /// this into the ring on every write completion.
    pub response_spill: BytesMut,
    pub close_after_write: bool,
    pub generation: u32,
}

impl Connection {
    pub fn with_ring_capacity(capacity: usize) -> Self {
        Connection {
            fd: -1,
            addr: unsafe { std::mem::zeroed() },
            addr_len: std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            state: ConnState::Accepting,
            read_ring: RingBuffer::new(capacity),
            write_ring: RingBuffer::new(capacity),
            overflow: None,
            bytes_pending: 0,
            task_type: TaskType::Unknown,
            parse_result: ParseResult::NeedMore,
            response_spill: BytesMut::new(),
            close_after_write: false,
            generation: 0,
        }
    }

    /// Blank the record for a new tenant. The generation is deliberately
    /// left alone; it is bumped on release.
    pub fn reset(&mut self) {
        debug_assert!(self.overflow.is_none(), "overflow leaked across tenants");
        self.fd = -1;
        self.addr = unsafe { std::mem::zeroed() };
        self.addr_len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        self.state = ConnState::Accepting;
        self.read_ring.clear();
        self.write_ring.clear();
        self.overflow = None;
        self.bytes_pending = 0;
        self.task_type = TaskType::Unknown;
        self.parse_result = ParseResult::NeedMore;
        self.response_spill.clear();
        self.close_after_write = false;
    }

    /// Peer address captured by the Accept submission.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        if self.fd < 0 || self.addr.sin_family != libc::AF_INET as libc::sa_family_t {
            return None;
        }
        let ip = Ipv4Addr::from(u32::from_be(self.addr.sin_addr.s_addr));
        let port = u16::from_be(self.addr.sin_port);
        Some(SocketAddr::V4(SocketAddrV4::new(ip, port)))
    }

    /// Contiguous view of the buffered request: both read-ring segments
    /// followed by the filled part of the overflow buffer. Borrows when no
    /// concatenation is needed.
    pub fn frame(&self) -> Cow<'_, [u8]> {
        let (first, second) = self.read_ring.readable_slices();
        let overflow = match &self.overflow {
            Some(ov) if ov.filled > 0 => unsafe {
                std::slice::from_raw_parts(ov.ptr as *const u8, ov.filled)
            },
            _ => &[],
        };

        if second.is_empty() && overflow.is_empty() {
            return Cow::Borrowed(first);
        }

        let mut joined = Vec::with_capacity(first.len() + second.len() + overflow.len());
        joined.extend_from_slice(first);
        joined.extend_from_slice(second);
        joined.extend_from_slice(overflow);
        Cow::Owned(joined)
    }

    /// Total request bytes buffered (ring plus overflow).
    pub fn buffered_len(&self) -> usize {
        let overflow = self.overflow.as_ref().map(|ov| ov.filled).unwrap_or(0);
        self.read_ring.readable_size() + overflow
    }

    /// Consume a processed request of `total` bytes. Ring bytes are
    /// consumed first; anything beyond the ring lived in the overflow
    /// buffer, which the caller frees separately.
    pub fn consume_frame(&mut self, total: usize) {
        let from_ring = total.min(self.read_ring.readable_size());
        self.read_ring.read_data(from_ring);
        if self.read_ring.is_empty() {
            self.read_ring.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_blanks_everything_but_generation() {
        let mut conn = Connection::with_ring_capacity(64);
        conn.fd = 9;
        conn.generation = 3;
        conn.task_type = TaskType::Http;
        conn.parse_result = ParseResult::Complete;
        conn.close_after_write = true;
        conn.read_ring.write_from(b"leftover");

        conn.reset();
        assert_eq!(conn.fd, -1);
        assert_eq!(conn.generation, 3);
        assert_eq!(conn.task_type, TaskType::Unknown);
        assert_eq!(conn.parse_result, ParseResult::NeedMore);
        assert!(!conn.close_after_write);
        assert!(conn.read_ring.is_empty());
    }

    #[test]
    fn frame_borrows_the_contiguous_case() {
        let mut conn = Connection::with_ring_capacity(64);
        conn.read_ring.write_from(b"GET / HTTP/1.1\r\n\r\n");
        assert!(matches!(conn.frame(), Cow::Borrowed(_)));
        conn.consume_frame(18);
        assert!(conn.read_ring.is_empty());
    }

    #[test]
    fn consume_frame_caps_at_ring_contents() {
        let mut conn = Connection::with_ring_capacity(64);
        conn.read_ring.write_from(b"0123456789");
        // Pretend 4 more bytes lived in an overflow buffer.
        conn.consume_frame(14);
        assert!(conn.read_ring.is_empty());
    }
}
