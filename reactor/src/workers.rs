//! Worker pool for request handling.
//!
//! N OS threads share one FIFO queue under a mutex and condition variable.
//! `enqueue` hands back a receiver for the task's result; the
//! `enqueue_with_callback` variant runs the bound callback on the same
//! worker thread immediately after the task body returns, which is how
//! handler completion is funneled back to the reactor queue.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use pool::SlotId;

use crate::metrics::WORKER_TASKS;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolInner {
    queue: Mutex<VecDeque<Job>>,
    condvar: Condvar,
    stop: AtomicBool,
}

pub struct WorkerPool {
    inner: Arc<PoolInner>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `threads` workers (at least one).
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let inner = Arc::new(PoolInner {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            stop: AtomicBool::new(false),
        });

        let mut handles = Vec::with_capacity(threads);
        for worker_id in 0..threads {
            let inner = inner.clone();
            let handle = std::thread::Builder::new()
                .name(format!("worker-{}", worker_id))
                .spawn(move || worker_loop(&inner))
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }

        WorkerPool {
            inner,
            handles: Mutex::new(handles),
        }
    }

    /// Queue a task; the receiver yields its result when it completes.
    /// Returns a disconnected receiver if the pool is stopped.
    pub fn enqueue<F, R>(&self, task: F) -> crossbeam_channel::Receiver<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.submit(Box::new(move || {
            let _ = tx.send(task());
        }));
        rx
    }

    /// Queue a task bound to a connection; `callback` runs on the same
    /// worker thread right after the task body, with the same handle.
    pub fn enqueue_with_callback<F, C>(&self, conn: SlotId, task: F, callback: C) -> bool
    where
        F: FnOnce(SlotId) + Send + 'static,
        C: FnOnce(SlotId) + Send + 'static,
    {
        self.submit(Box::new(move || {
            task(conn);
            callback(conn);
        }))
    }

    fn submit(&self, job: Job) -> bool {
        if self.inner.stop.load(Ordering::Acquire) {
            tracing::warn!("task submitted to a stopped worker pool, dropping");
            return false;
        }
        self.inner.queue.lock().push_back(job);
        self.inner.condvar.notify_one();
        true
    }

    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Stop the pool: queued tasks still run to completion, then the
    /// threads exit and are joined. After this returns, no task and no
    /// callback executes.
    pub fn stop(&self) {
        self.inner.stop.store(true, Ordering::Release);
        self.inner.condvar.notify_all();
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.inner.stop.load(Ordering::Acquire) {
            self.stop();
        }
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        let job = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    break job;
                }
                if inner.stop.load(Ordering::Acquire) {
                    return;
                }
                inner.condvar.wait(&mut queue);
            }
        };
        WORKER_TASKS.increment();
        job();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn enqueue_returns_the_result() {
        let pool = WorkerPool::new(2);
        let rx = pool.enqueue(|| 2 + 2);
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 4);
        pool.stop();
    }

    #[test]
    fn callback_runs_after_task_on_the_same_thread() {
        let pool = WorkerPool::new(1);
        let (tx, rx) = crossbeam_channel::bounded(2);
        let tx2 = tx.clone();
        pool.enqueue_with_callback(
            SlotId::from_raw(42),
            move |id| {
                tx.send(("task", id.raw(), std::thread::current().id())).unwrap();
            },
            move |id| {
                tx2.send(("callback", id.raw(), std::thread::current().id())).unwrap();
            },
        );

        let (first, id_a, thread_a) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        let (second, id_b, thread_b) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(first, "task");
        assert_eq!(second, "callback");
        assert_eq!(id_a, 42);
        assert_eq!(id_b, 42);
        assert_eq!(thread_a, thread_b);
        pool.stop();
    }

    #[test]
    fn single_worker_preserves_fifo_order() {
        let pool = WorkerPool::new(1);
        let (tx, rx) = crossbeam_channel::unbounded();
        for i in 0..8 {
            let tx = tx.clone();
            pool.enqueue(move || tx.send(i).unwrap());
        }
        let order: Vec<i32> = (0..8)
            .map(|_| rx.recv_timeout(Duration::from_secs(1)).unwrap())
            .collect();
        assert_eq!(order, (0..8).collect::<Vec<_>>());
        pool.stop();
    }

    #[test]
    fn stop_drains_queued_tasks_then_rejects_new_ones() {
        let pool = WorkerPool::new(2);
        static RAN: AtomicUsize = AtomicUsize::new(0);
        for _ in 0..16 {
            pool.enqueue(|| {
                RAN.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.stop();
        assert_eq!(RAN.load(Ordering::SeqCst), 16);

        assert!(!pool.enqueue_with_callback(SlotId::from_raw(0), |_| {}, |_| {}));
    }
}
