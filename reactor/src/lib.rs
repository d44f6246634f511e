//! Connection reactor on Linux io_uring.
//!
//! One reactor thread owns the submission/completion rings and multiplexes
//! per-connection state machines. Request handling is offloaded to a worker
//! pool; workers hand completed work back through a bounded callback queue
//! plus an eventfd wake, so every submission originates on the reactor
//! thread.

pub mod buffer;
pub mod completion;
pub mod config;
pub mod conn;
pub mod dispatch;
pub mod error;
pub mod event_loop;
pub mod metrics;
pub mod queue;
pub mod ring;
pub mod workers;

pub use buffer::RingBuffer;
pub use completion::{OpTag, UserData};
pub use config::ReactorConfig;
pub use conn::{ConnState, Connection, Overflow, ParseResult, TaskType};
pub use dispatch::{DispatchOutcome, Dispatcher, ProtocolHandler};
pub use error::Error;
pub use event_loop::{Reactor, ShutdownHandle};
pub use queue::{Priority, ReactorQueue, ReactorTask, WakeKind};
pub use workers::WorkerPool;
