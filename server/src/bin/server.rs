//! brazier server binary.

use clap::Parser;
use server::banner::print_banner;
use server::config::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "brazier-server")]
#[command(about = "HTTP/1.1 server on io_uring")]
struct Args {
    /// Path to configuration file (defaults apply when omitted)
    config: Option<PathBuf>,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return;
    }

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    server::logging::init(&config.logging);
    print_banner(env!("CARGO_PKG_VERSION"), &config);

    let (mut reactor, handle) = match server::build(&config) {
        Ok(built) => built,
        Err(e) => {
            eprintln!("Initialization failed: {}", e);
            std::process::exit(1);
        }
    };

    server::signal::install(handle);

    if let Err(e) = reactor.run() {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("server stopped cleanly");
}

fn print_default_config() {
    let config = r#"# brazier server configuration

[server]
# TCP listen port
port = 2025

# Listen backlog
backlog = 128

# Connection record cap
max_connections = 1024

# Root directory for static files
static_root = "./html"

[uring]
# Submission queue depth
sq_depth = 1024

# Accept submissions kept armed on the listen fd
accept_prearm = 10

[buffers]
# Per-connection staging ring, per direction
ring_buffer_size = "32KB"

# Buddy arena for request overflow buffers
pool_size = "1MB"
min_block_size = "4KB"

[workers]
# Worker threads (default: hardware concurrency, minimum 4)
# threads = 8

[logging]
# Level filter (e.g., "info", "server=debug")
level = "info"

# Output format: "pretty", "compact", or "json"
format = "pretty"
"#;
    print!("{}", config);
}
