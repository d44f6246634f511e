//! Protocol dispatcher.
//!
//! Handlers are scanned in registration order; the first to claim a
//! connection wins and its tag is recorded. Complete (or malformed) frames
//! are offloaded to the worker pool; the worker callback pushes an
//! ArmWrite/ArmRead item onto the reactor queue so all submissions happen
//! on the reactor thread. Incomplete frames are reported back so the
//! reactor can arm the follow-up read, into an overflow buffer when the
//! remainder cannot fit the ring.

use std::sync::Arc;

use pool::{SlotId, TieredPool};

use crate::conn::{Connection, ParseResult, TaskType};
use crate::metrics::QUEUE_REJECTIONS;
use crate::queue::{Priority, ReactorQueue, WakeKind};
use crate::workers::WorkerPool;

/// A registered protocol implementation.
///
/// `can_claim` is a cheap signature probe over the first few buffered
/// bytes. `is_frame_complete` decides framing and may set
/// `conn.parse_result` and `conn.bytes_pending`; applied twice to the same
/// buffer it returns the same answer and leaves the buffer unchanged.
/// `handle` parses the frame and emits the response into the write ring
/// (spilling the remainder), and runs on a worker thread.
pub trait ProtocolHandler: Send + Sync {
    fn can_claim(&self, conn: &Connection) -> bool;
    fn is_frame_complete(&self, conn: &mut Connection) -> bool;
    fn handle(&self, conn: &mut Connection);
    fn name(&self) -> TaskType;
}

/// What the reactor should do next for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A worker owns the connection; its callback will wake the reactor.
    Offloaded,
    /// Frame incomplete; arm another read (`conn.bytes_pending` tells how
    /// much is missing once the header has been seen).
    NeedMore,
    /// No registered handler claimed the bytes.
    NoHandler,
}

pub struct Dispatcher {
    handlers: Vec<Arc<dyn ProtocolHandler>>,
    pool: Arc<TieredPool<Connection>>,
    workers: Arc<WorkerPool>,
    queue: Arc<ReactorQueue>,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<TieredPool<Connection>>,
        workers: Arc<WorkerPool>,
        queue: Arc<ReactorQueue>,
    ) -> Self {
        Dispatcher {
            handlers: Vec::new(),
            pool,
            workers,
            queue,
        }
    }

    /// Append a handler to the scan order. The final registration should be
    /// a fallback that claims anything.
    pub fn register_handler(&mut self, handler: Arc<dyn ProtocolHandler>) {
        self.handlers.push(handler);
    }

    /// Classify and route the buffered bytes of `conn_id`.
    ///
    /// Caller must hold logical ownership of the connection (reactor
    /// thread, no worker outstanding). On `Offloaded` that ownership
    /// transfers to the worker until its callback lands on the reactor
    /// queue.
    pub fn dispatch(&self, conn_id: SlotId) -> DispatchOutcome {
        let chosen = {
            let conn = unsafe { self.pool.connection_mut(conn_id) };

            let mut chosen = None;
            for handler in &self.handlers {
                if handler.can_claim(conn) {
                    conn.task_type = handler.name();
                    chosen = Some(handler.clone());
                    break;
                }
            }
            let Some(handler) = chosen else {
                tracing::debug!(conn = conn_id.raw(), "no protocol handler claimed connection");
                return DispatchOutcome::NoHandler;
            };

            let complete = handler.is_frame_complete(conn);
            let errored = matches!(
                conn.parse_result,
                ParseResult::InvalidFormat | ParseResult::ChunkedUnsupported
            );
            if !complete && !errored {
                return DispatchOutcome::NeedMore;
            }
            tracing::debug!(
                conn = conn_id.raw(),
                handler = ?handler.name(),
                result = ?conn.parse_result,
                "offloading frame to worker"
            );
            handler
        };
        // The borrow above has ended; the worker takes ownership from here.

        let task_pool = self.pool.clone();
        let cb_pool = self.pool.clone();
        let queue = self.queue.clone();

        self.workers.enqueue_with_callback(
            conn_id,
            move |id| {
                let conn = unsafe { task_pool.connection_mut(id) };
                chosen.handle(conn);
                if let Some(overflow) = conn.overflow.take() {
                    task_pool.deallocate_buffer(overflow.offset);
                }
                conn.bytes_pending = 0;
            },
            move |id| {
                let conn = unsafe { cb_pool.connection_mut(id) };
                let kind = if conn.write_ring.readable_size() > 0
                    || !conn.response_spill.is_empty()
                {
                    WakeKind::ArmWrite
                } else {
                    WakeKind::ArmRead
                };
                if !queue.push(id, kind, Priority::Normal) {
                    QUEUE_REJECTIONS.increment();
                    tracing::warn!(conn = id.raw(), "reactor queue full, dropping wakeup");
                }
            },
        );

        DispatchOutcome::Offloaded
    }
}
