//! Reactor-side metrics.

use metriken::{Counter, Gauge, metric};

#[metric(
    name = "connections_accepted",
    description = "Total number of connections accepted"
)]
pub static CONNECTIONS_ACCEPTED: Counter = Counter::new();

#[metric(
    name = "connections_active",
    description = "Number of currently active connections"
)]
pub static CONNECTIONS_ACTIVE: Gauge = Gauge::new();

#[metric(name = "bytes_received", description = "Total bytes read from peers")]
pub static BYTES_RECEIVED: Counter = Counter::new();

#[metric(name = "bytes_sent", description = "Total bytes written to peers")]
pub static BYTES_SENT: Counter = Counter::new();

#[metric(
    name = "overflow_buffers",
    description = "Overflow buffers allocated for oversized requests"
)]
pub static OVERFLOW_BUFFERS: Counter = Counter::new();

#[metric(
    name = "reactor_queue_rejections",
    description = "Worker wakeups dropped because the reactor queue was full"
)]
pub static QUEUE_REJECTIONS: Counter = Counter::new();

#[metric(name = "worker_tasks", description = "Tasks executed by the worker pool")]
pub static WORKER_TASKS: Counter = Counter::new();
