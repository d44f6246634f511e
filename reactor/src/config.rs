/// Runtime configuration for the reactor and its pools.
///
/// The server crate parses the TOML file and hands a resolved record down;
/// every field has a usable default.
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Submission ring depth. The reactor callback queue shares this bound.
    pub sq_entries: u32,
    /// Connection record cap for the slab tier.
    pub max_connections: usize,
    /// Per-direction ring buffer capacity per connection.
    pub ring_buffer_size: usize,
    /// Buddy arena size for overflow buffers.
    pub buffer_pool_size: usize,
    /// Buddy minimum block size.
    pub min_block_size: usize,
    /// Worker threads handling parsed requests.
    pub worker_threads: usize,
    /// Accept submissions kept armed on the listen fd.
    pub accept_prearm: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            sq_entries: 1024,
            max_connections: 1024,
            ring_buffer_size: 32 * 1024,
            buffer_pool_size: 1024 * 1024,
            min_block_size: 4 * 1024,
            worker_threads: 4,
            accept_prearm: 10,
        }
    }
}
