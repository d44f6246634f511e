//! Main-thread callback queue.
//!
//! Workers never touch the submission ring. When a handler finishes, its
//! callback pushes a `(connection, kind, priority)` item here and kicks the
//! reactor's eventfd; the reactor drains the queue with `try_pop` on every
//! loop iteration and performs the actual arming.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};

use pool::SlotId;

/// Ordinal priority; lower drains first, FIFO within a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    High = 0,
    Normal = 1,
    Low = 2,
}

/// What the reactor should arm for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeKind {
    /// Drain the write ring (and spill) to the peer.
    ArmWrite,
    /// Re-arm a read; the handler produced nothing to send.
    ArmRead,
    /// Tear the connection down.
    Close,
}

#[derive(Debug, Clone, Copy)]
pub struct ReactorTask {
    pub conn: SlotId,
    pub kind: WakeKind,
    pub priority: Priority,
}

struct QueueInner {
    classes: [VecDeque<ReactorTask>; 3],
    len: usize,
    stopped: bool,
}

/// Bounded MPSC queue feeding work back to the reactor thread.
pub struct ReactorQueue {
    inner: Mutex<QueueInner>,
    condvar: Condvar,
    capacity: usize,
    /// Reactor eventfd; -1 until the reactor registers it.
    wake_fd: AtomicI32,
}

impl ReactorQueue {
    pub fn new(capacity: usize) -> Self {
        ReactorQueue {
            inner: Mutex::new(QueueInner {
                classes: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                len: 0,
                stopped: false,
            }),
            condvar: Condvar::new(),
            capacity,
            wake_fd: AtomicI32::new(-1),
        }
    }

    /// Register the eventfd that pushes should kick.
    pub fn set_wake_fd(&self, fd: RawFd) {
        self.wake_fd.store(fd, Ordering::Release);
    }

    /// Enqueue an item. Returns `false` when the queue is full or stopped;
    /// existing items are never dropped.
    pub fn push(&self, conn: SlotId, kind: WakeKind, priority: Priority) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.stopped || inner.len >= self.capacity {
                return false;
            }
            inner.classes[priority as usize].push_back(ReactorTask { conn, kind, priority });
            inner.len += 1;
            self.condvar.notify_one();
        }

        let fd = self.wake_fd.load(Ordering::Acquire);
        if fd >= 0 {
            let one: u64 = 1;
            unsafe {
                libc::write(fd, &one as *const u64 as *const libc::c_void, 8);
            }
        }
        true
    }

    /// Blocking pop. Returns `None` only after [`stop`](Self::stop) once
    /// the queue has drained.
    pub fn pop(&self) -> Option<ReactorTask> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(task) = take(&mut inner) {
                return Some(task);
            }
            if inner.stopped {
                return None;
            }
            self.condvar.wait(&mut inner);
        }
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<ReactorTask> {
        take(&mut self.inner.lock())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reject further pushes and unblock all waiters.
    pub fn stop(&self) {
        self.inner.lock().stopped = true;
        self.condvar.notify_all();
    }
}

fn take(inner: &mut QueueInner) -> Option<ReactorTask> {
    for class in inner.classes.iter_mut() {
        if let Some(task) = class.pop_front() {
            inner.len -= 1;
            return Some(task);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn conn(raw: u32) -> SlotId {
        SlotId::from_raw(raw)
    }

    #[test]
    fn drains_by_priority_then_fifo() {
        let queue = ReactorQueue::new(16);
        assert!(queue.push(conn(1), WakeKind::ArmWrite, Priority::Low));
        assert!(queue.push(conn(2), WakeKind::ArmWrite, Priority::Normal));
        assert!(queue.push(conn(3), WakeKind::ArmWrite, Priority::High));
        assert!(queue.push(conn(4), WakeKind::ArmWrite, Priority::Normal));

        let order: Vec<u32> = std::iter::from_fn(|| queue.try_pop())
            .map(|t| t.conn.raw())
            .collect();
        assert_eq!(order, vec![3, 2, 4, 1]);
    }

    #[test]
    fn push_fails_when_full_without_dropping() {
        let queue = ReactorQueue::new(2);
        assert!(queue.push(conn(1), WakeKind::ArmRead, Priority::Normal));
        assert!(queue.push(conn(2), WakeKind::ArmRead, Priority::Normal));
        assert!(!queue.push(conn(3), WakeKind::ArmRead, Priority::High));

        assert_eq!(queue.try_pop().unwrap().conn.raw(), 1);
        assert_eq!(queue.try_pop().unwrap().conn.raw(), 2);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn try_pop_on_empty_returns_none() {
        let queue = ReactorQueue::new(4);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn stop_unblocks_a_waiting_pop() {
        let queue = Arc::new(ReactorQueue::new(4));
        let waiter = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.pop())
        };
        std::thread::sleep(Duration::from_millis(50));
        queue.stop();
        assert!(waiter.join().unwrap().is_none());
        assert!(!queue.push(conn(1), WakeKind::Close, Priority::Normal));
    }

    #[test]
    fn pop_drains_before_reporting_stopped() {
        let queue = ReactorQueue::new(4);
        queue.push(conn(7), WakeKind::Close, Priority::Low);
        queue.stop();
        assert_eq!(queue.pop().unwrap().conn.raw(), 7);
        assert!(queue.pop().is_none());
    }
}
