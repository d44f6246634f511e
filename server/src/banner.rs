//! Startup banner utilities.

use crate::config::{Config, format_size};
use std::fmt::Write;

/// Print a startup banner to stdout.
pub fn print_banner(version: &str, config: &Config) {
    let mut output = String::with_capacity(512);

    let name = "brazier-server";
    writeln!(output, "{} v{}", name, version).unwrap();
    writeln!(output, "{}", "=".repeat(name.len() + version.len() + 2)).unwrap();
    writeln!(output).unwrap();

    writeln!(output, "I/O:         io_uring").unwrap();
    writeln!(output, "Workers:     {}", config.threads()).unwrap();
    writeln!(output, "Listener:    0.0.0.0:{}", config.server.port).unwrap();
    writeln!(output, "Static root: {}", config.server.static_root).unwrap();
    writeln!(output).unwrap();

    writeln!(output, "Buffers:").unwrap();
    writeln!(
        output,
        "  Ring:      {} per direction",
        format_size(config.buffers.ring_buffer_size)
    )
    .unwrap();
    writeln!(
        output,
        "  Overflow:  {} arena, {} min block",
        format_size(config.buffers.pool_size),
        format_size(config.buffers.min_block_size)
    )
    .unwrap();
    writeln!(
        output,
        "  Conns:     {} max, sq depth {}",
        config.server.max_connections, config.uring.sq_depth
    )
    .unwrap();
    writeln!(output).unwrap();

    print!("{}", output);
}
