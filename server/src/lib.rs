//! brazier HTTP server.
//!
//! A single-host HTTP/1.1 server on Linux io_uring: one reactor thread
//! drives per-connection state machines, a worker pool runs the protocol
//! handlers, and a two-tier memory pool supplies connection records and
//! request overflow buffers.

pub mod banner;
pub mod config;
pub mod fallback;
pub mod http;
pub mod listener;
pub mod logging;
pub mod metrics;
pub mod signal;

pub use config::Config;
pub use fallback::FallbackHandler;
pub use http::HttpHandler;

use reactor::{Reactor, ShutdownHandle};
use std::sync::Arc;

/// Assemble the reactor for `config`: listener, handler registry, signal
/// wiring left to the caller. Returns the reactor and its shutdown handle.
pub fn build(config: &Config) -> Result<(Reactor, ShutdownHandle), Box<dyn std::error::Error>> {
    let listen_fd = listener::create_listener(config.server.port, config.server.backlog)?;

    let mut reactor = Reactor::new(config.to_reactor_config(), listen_fd)?;
    reactor.register_handler(Arc::new(HttpHandler::new(config.server.static_root.clone())));
    reactor.register_handler(Arc::new(FallbackHandler));

    let handle = reactor.shutdown_handle();
    Ok((reactor, handle))
}
