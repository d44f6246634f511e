use std::io;

/// Errors surfaced by the reactor and its rings.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("ring setup: {0}")]
    RingSetup(String),
    #[error("submission queue full after flush")]
    SubmissionQueueFull,
    #[error("connection limit reached")]
    ConnectionLimitReached,
}
