//! Signal handling for graceful shutdown.

use reactor::ShutdownHandle;
use std::sync::atomic::{AtomicBool, Ordering};

/// Install a SIGINT/SIGTERM handler that triggers reactor shutdown.
///
/// The first signal initiates a graceful shutdown; a second signal forces
/// an immediate exit.
pub fn install(handle: ShutdownHandle) {
    static SIGNALED: AtomicBool = AtomicBool::new(false);

    ctrlc::set_handler(move || {
        if SIGNALED.swap(true, Ordering::SeqCst) {
            tracing::warn!("received second signal, forcing immediate exit");
            std::process::exit(1);
        }
        tracing::info!("received shutdown signal, initiating graceful shutdown...");
        handle.shutdown();
    })
    .expect("failed to set signal handler");
}
