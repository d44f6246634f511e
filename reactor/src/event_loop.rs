//! The connection reactor.
//!
//! One thread owns the submission/completion rings and is the sole caller
//! of `get_sqe`/`submit`. Workers hand finished requests back through the
//! reactor queue; an eventfd read completion wakes the loop so queue items
//! are never stranded behind a blocking wait.

use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Buf;
use pool::{SlotId, TieredPool};

use crate::completion::{OpTag, UserData};
use crate::config::ReactorConfig;
use crate::conn::{ConnState, Connection, Overflow, ParseResult};
use crate::dispatch::{DispatchOutcome, Dispatcher, ProtocolHandler};
use crate::error::Error;
use crate::metrics::{
    BYTES_RECEIVED, BYTES_SENT, CONNECTIONS_ACCEPTED, CONNECTIONS_ACTIVE, OVERFLOW_BUFFERS,
};
use crate::queue::{ReactorQueue, ReactorTask, WakeKind};
use crate::ring::Ring;
use crate::workers::WorkerPool;

/// Per-copy cap when moving response bytes into the write ring.
const WRITE_CHUNK: usize = 4096;

/// Handle for signaling shutdown from another thread. Sets the flag and
/// kicks the eventfd so a blocked `submit_and_wait` returns.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    eventfd: RawFd,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Release);
        let one: u64 = 1;
        unsafe {
            libc::write(self.eventfd, &one as *const u64 as *const libc::c_void, 8);
        }
    }
}

pub struct Reactor {
    ring: Ring,
    pool: Arc<TieredPool<Connection>>,
    dispatcher: Dispatcher,
    queue: Arc<ReactorQueue>,
    workers: Arc<WorkerPool>,
    config: ReactorConfig,
    listen_fd: RawFd,
    eventfd: RawFd,
    eventfd_buf: [u8; 8],
    shutdown: Arc<AtomicBool>,
    /// Accept submissions currently in flight on the listen fd.
    pending_accepts: usize,
    /// Connections past Accept and not yet released.
    active: usize,
    cqe_batch: Vec<(u64, i32)>,
}

impl Reactor {
    /// Build the reactor and its subsystems around an already-listening fd.
    pub fn new(config: ReactorConfig, listen_fd: RawFd) -> Result<Self, Error> {
        let ring = Ring::setup(config.sq_entries)?;

        let eventfd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if eventfd < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        let ring_capacity = config.ring_buffer_size;
        let pool = Arc::new(TieredPool::with_factory(
            config.max_connections,
            config.buffer_pool_size,
            config.min_block_size,
            move || Connection::with_ring_capacity(ring_capacity),
        ));

        let queue = Arc::new(ReactorQueue::new(config.sq_entries as usize));
        queue.set_wake_fd(eventfd);

        let workers = Arc::new(WorkerPool::new(config.worker_threads));
        let dispatcher = Dispatcher::new(pool.clone(), workers.clone(), queue.clone());

        Ok(Reactor {
            ring,
            pool,
            dispatcher,
            queue,
            workers,
            config,
            listen_fd,
            eventfd,
            eventfd_buf: [0u8; 8],
            shutdown: Arc::new(AtomicBool::new(false)),
            pending_accepts: 0,
            active: 0,
            cqe_batch: Vec::new(),
        })
    }

    pub fn register_handler(&mut self, handler: Arc<dyn ProtocolHandler>) {
        self.dispatcher.register_handler(handler);
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: self.shutdown.clone(),
            eventfd: self.eventfd,
        }
    }

    pub fn pool(&self) -> Arc<TieredPool<Connection>> {
        self.pool.clone()
    }

    /// Run until shutdown is signaled. Per-connection failures are handled
    /// locally; only ring-level errors terminate the loop.
    pub fn run(&mut self) -> Result<(), Error> {
        for _ in 0..self.config.accept_prearm {
            self.arm_accept();
        }
        if self.pending_accepts == 0 {
            return Err(Error::ConnectionLimitReached);
        }

        let ud = UserData::encode(OpTag::EventFd, SlotId::from_raw(0), 0);
        self.ring
            .submit_eventfd_read(self.eventfd, self.eventfd_buf.as_mut_ptr(), ud)?;

        tracing::info!(
            workers = self.config.worker_threads,
            max_connections = self.config.max_connections,
            "reactor running"
        );

        loop {
            if let Err(e) = self.ring.submit_and_wait(1) {
                if e.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                tracing::error!("completion wait failed: {e}");
                return Err(Error::Io(e));
            }

            self.drain_completions();
            self.drain_queue();

            if self.shutdown.load(Ordering::Acquire) {
                self.run_shutdown();
                return Ok(());
            }
        }
    }

    fn drain_completions(&mut self) {
        self.cqe_batch.clear();
        {
            let cq = self.ring.ring.completion();
            for cqe in cq {
                self.cqe_batch.push((cqe.user_data(), cqe.result()));
            }
        }
        for i in 0..self.cqe_batch.len() {
            let (user_data, result) = self.cqe_batch[i];
            self.dispatch_cqe(UserData(user_data), result);
        }
    }

    fn dispatch_cqe(&mut self, ud: UserData, result: i32) {
        let Some(tag) = ud.tag() else {
            return;
        };

        if matches!(tag, OpTag::EventFd) {
            self.handle_eventfd();
            return;
        }

        let id = ud.conn();
        let generation = unsafe { self.pool.connection_mut(id) }.generation;
        if generation != ud.generation() {
            // A previous tenant of the slot armed this; ignore.
            return;
        }

        match tag {
            OpTag::Accept => self.handle_accept(id, result),
            OpTag::Read => self.handle_read(id, result),
            OpTag::Write => self.handle_write(id, result),
            OpTag::Close => self.handle_close(id),
            OpTag::EventFd => unreachable!(),
        }
    }

    fn handle_eventfd(&mut self) {
        // Queue items are drained once per loop iteration; just re-arm.
        let ud = UserData::encode(OpTag::EventFd, SlotId::from_raw(0), 0);
        if let Err(e) =
            self.ring
                .submit_eventfd_read(self.eventfd, self.eventfd_buf.as_mut_ptr(), ud)
        {
            tracing::error!("failed to re-arm eventfd read: {e}");
        }
    }

    fn drain_queue(&mut self) {
        while let Some(ReactorTask { conn, kind, .. }) = self.queue.try_pop() {
            match kind {
                WakeKind::ArmWrite => self.start_write(conn),
                WakeKind::ArmRead => self.resume_reading(conn),
                WakeKind::Close => self.arm_close(conn),
            }
        }
    }

    fn arm_accept(&mut self) {
        let Some(id) = self.pool.acquire_connection() else {
            tracing::warn!("connection slots exhausted, deferring accept re-arm");
            return;
        };
        let conn = unsafe { self.pool.connection_mut(id) };
        conn.reset();
        conn.state = ConnState::Accepting;

        let ud = UserData::encode(OpTag::Accept, id, conn.generation);
        let addr = &mut conn.addr as *mut libc::sockaddr_in as *mut libc::sockaddr;
        let result = self
            .ring
            .submit_accept(self.listen_fd, addr, &mut conn.addr_len, ud);
        match result {
            Ok(()) => self.pending_accepts += 1,
            Err(e) => {
                tracing::error!("failed to arm accept: {e}");
                self.pool.release_connection(id);
            }
        }
    }

    fn handle_accept(&mut self, id: SlotId, result: i32) {
        self.pending_accepts = self.pending_accepts.saturating_sub(1);

        if result < 0 {
            tracing::warn!(
                errno = -result,
                "accept failed: {}",
                io::Error::from_raw_os_error(-result)
            );
            self.release_record(id);
            self.arm_accept();
            return;
        }

        let conn = unsafe { self.pool.connection_mut(id) };
        conn.fd = result;
        conn.state = ConnState::Reading;
        unsafe {
            let flags = libc::fcntl(conn.fd, libc::F_GETFL, 0);
            libc::fcntl(conn.fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }

        CONNECTIONS_ACCEPTED.increment();
        CONNECTIONS_ACTIVE.increment();
        self.active += 1;
        tracing::debug!(conn = id.raw(), fd = result, peer = ?conn.peer_addr(), "accepted");

        self.arm_read(id);
        self.arm_accept();
    }

    fn arm_read(&mut self, id: SlotId) {
        let conn = unsafe { self.pool.connection_mut(id) };
        conn.state = ConnState::Reading;

        if conn.read_ring.is_empty() {
            conn.read_ring.clear();
        }
        let span = conn.read_ring.contiguous_writable();
        if span == 0 {
            // Ring full with no complete frame: the header region alone
            // exceeds the staging capacity.
            tracing::warn!(conn = id.raw(), "read ring exhausted before frame completed");
            self.arm_close(id);
            return;
        }

        let ud = UserData::encode(OpTag::Read, id, conn.generation);
        let fd = conn.fd;
        let buf = conn.read_ring.write_tail();
        if let Err(e) = self.ring.submit_read(fd, buf, span as u32, ud) {
            tracing::error!(conn = id.raw(), "failed to arm read: {e}");
            self.arm_close(id);
        }
    }

    fn arm_overflow_read(&mut self, id: SlotId) {
        let conn = unsafe { self.pool.connection_mut(id) };
        conn.state = ConnState::Reading;
        let Some(ov) = conn.overflow.as_ref() else {
            self.arm_read(id);
            return;
        };

        let ud = UserData::encode(OpTag::Read, id, conn.generation);
        let fd = conn.fd;
        let buf = unsafe { ov.ptr.add(ov.filled) };
        let len = (ov.len - ov.filled) as u32;
        if let Err(e) = self.ring.submit_read(fd, buf, len, ud) {
            tracing::error!(conn = id.raw(), "failed to arm overflow read: {e}");
            self.arm_close(id);
        }
    }

    fn handle_read(&mut self, id: SlotId, result: i32) {
        if result == 0 {
            // Peer closed.
            self.arm_close(id);
            return;
        }
        if result < 0 {
            tracing::warn!(
                conn = id.raw(),
                "read failed: {}",
                io::Error::from_raw_os_error(-result)
            );
            self.arm_close(id);
            return;
        }

        let n = result as usize;
        BYTES_RECEIVED.add(n as u64);

        let conn = unsafe { self.pool.connection_mut(id) };
        if let Some(ov) = conn.overflow.as_mut() {
            ov.filled += n;
            if ov.filled < ov.len {
                self.arm_overflow_read(id);
                return;
            }
            conn.parse_result = ParseResult::Complete;
        } else if !conn.read_ring.write_data(n) {
            // The kernel cannot outrun the span we armed; treat as fatal
            // for this connection.
            tracing::error!(conn = id.raw(), n, "read ring rejected completed read");
            self.arm_close(id);
            return;
        }

        let outcome = self.dispatcher.dispatch(id);
        self.after_dispatch(id, outcome);
    }

    fn after_dispatch(&mut self, id: SlotId, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Offloaded => {}
            DispatchOutcome::NeedMore => {
                let conn = unsafe { self.pool.connection_mut(id) };
                let pending = conn.bytes_pending;
                if pending > 0 && pending > conn.read_ring.writable_size() {
                    match self.pool.allocate_buffer(pending) {
                        Some(offset) => {
                            let ptr = self.pool.buffer_ptr(offset);
                            let conn = unsafe { self.pool.connection_mut(id) };
                            conn.overflow = Some(Overflow {
                                offset,
                                ptr,
                                len: pending,
                                filled: 0,
                            });
                            OVERFLOW_BUFFERS.increment();
                            self.arm_overflow_read(id);
                        }
                        None => {
                            tracing::warn!(
                                conn = id.raw(),
                                pending,
                                "overflow buffer pool exhausted"
                            );
                            self.arm_close(id);
                        }
                    }
                } else {
                    self.arm_read(id);
                }
            }
            DispatchOutcome::NoHandler => {
                // Too few bytes for any handler (including the fallback) to
                // commit; keep reading until one claims.
                tracing::debug!(conn = id.raw(), "no handler claimed yet, reading more");
                self.arm_read(id);
            }
        }
    }

    /// Move spilled response bytes into the write ring, in bounded chunks.
    fn refill_from_spill(conn: &mut Connection) {
        while !conn.response_spill.is_empty() {
            let span = conn
                .write_ring
                .contiguous_writable()
                .min(WRITE_CHUNK)
                .min(conn.response_spill.len());
            if span == 0 {
                break;
            }
            unsafe {
                std::ptr::copy_nonoverlapping(
                    conn.response_spill.as_ptr(),
                    conn.write_ring.write_tail(),
                    span,
                );
            }
            conn.write_ring.write_data(span);
            conn.response_spill.advance(span);
        }
    }

    /// Begin (or continue) draining the write side of a connection.
    fn start_write(&mut self, id: SlotId) {
        let conn = unsafe { self.pool.connection_mut(id) };
        Self::refill_from_spill(conn);

        if conn.write_ring.readable_size() == 0 {
            // Nothing to send after all.
            self.resume_reading(id);
            return;
        }

        conn.state = ConnState::Writing;
        let ud = UserData::encode(OpTag::Write, id, conn.generation);
        let fd = conn.fd;
        let buf = conn.write_ring.read_head();
        let len = conn.write_ring.contiguous_readable() as u32;
        if let Err(e) = self.ring.submit_write(fd, buf, len, ud) {
            tracing::error!(conn = id.raw(), "failed to arm write: {e}");
            self.arm_close(id);
        }
    }

    fn handle_write(&mut self, id: SlotId, result: i32) {
        if result <= 0 {
            tracing::warn!(
                conn = id.raw(),
                "write failed: {}",
                io::Error::from_raw_os_error(-result)
            );
            self.arm_close(id);
            return;
        }

        let n = result as usize;
        BYTES_SENT.add(n as u64);

        let conn = unsafe { self.pool.connection_mut(id) };
        conn.write_ring.read_data(n);
        Self::refill_from_spill(conn);

        if conn.write_ring.readable_size() > 0 {
            self.start_write(id);
            return;
        }

        let conn = unsafe { self.pool.connection_mut(id) };
        conn.write_ring.clear();
        if conn.close_after_write {
            self.arm_close(id);
        } else {
            self.resume_reading(id);
        }
    }

    /// Back to the read side: process pipelined leftovers already buffered,
    /// otherwise arm a fresh read.
    fn resume_reading(&mut self, id: SlotId) {
        let conn = unsafe { self.pool.connection_mut(id) };
        conn.state = ConnState::Reading;
        if conn.read_ring.readable_size() > 0 {
            let outcome = self.dispatcher.dispatch(id);
            self.after_dispatch(id, outcome);
        } else {
            self.arm_read(id);
        }
    }

    fn arm_close(&mut self, id: SlotId) {
        let conn = unsafe { self.pool.connection_mut(id) };
        if matches!(conn.state, ConnState::Closing) {
            return;
        }
        conn.state = ConnState::Closing;

        let fd = conn.fd;
        if fd < 0 {
            self.release_record(id);
            return;
        }
        let ud = UserData::encode(OpTag::Close, id, conn.generation);
        if let Err(e) = self.ring.submit_close(fd, ud) {
            tracing::error!(conn = id.raw(), "failed to arm close: {e}");
            self.release_active(id);
        }
    }

    fn handle_close(&mut self, id: SlotId) {
        tracing::debug!(conn = id.raw(), "closed");
        self.release_active(id);
    }

    /// Release a connection that was counted active.
    fn release_active(&mut self, id: SlotId) {
        CONNECTIONS_ACTIVE.decrement();
        self.active = self.active.saturating_sub(1);
        self.release_record(id);
        if self.pending_accepts < self.config.accept_prearm {
            self.arm_accept();
        }
    }

    /// Return a record to the slab, bumping the generation so in-flight
    /// completions for the old tenant are discarded.
    fn release_record(&mut self, id: SlotId) {
        let conn = unsafe { self.pool.connection_mut(id) };
        if let Some(ov) = conn.overflow.take() {
            self.pool.deallocate_buffer(ov.offset);
        }
        let conn = unsafe { self.pool.connection_mut(id) };
        conn.generation = conn.generation.wrapping_add(1);
        conn.fd = -1;
        self.pool.release_connection(id);
    }

    /// Stop intake, drain workers, close every live connection, and reap
    /// the remaining completions for a bounded number of iterations.
    fn run_shutdown(&mut self) {
        tracing::info!("reactor shutting down");
        self.queue.stop();
        self.workers.stop();

        for id in self.pool.live_connections() {
            let conn = unsafe { self.pool.connection_mut(id) };
            if conn.fd >= 0 && !matches!(conn.state, ConnState::Closing) {
                self.arm_close(id);
            }
        }

        for _ in 0..100 {
            if self.active == 0 {
                break;
            }
            if self.ring.submit_and_wait(1).is_err() {
                break;
            }
            self.drain_completions();
        }

        unsafe {
            libc::close(self.eventfd);
        }
    }
}
