//! shardkv - An In-Memory RESP Key-Value Server
//!
//! This is the main entry point for the shardkv server.
//! It parses the command line, builds the store and the connection handler,
//! and runs the server until a termination signal arrives.

use anyhow::Context;
use shardkv::commands::CommandHandler;
use shardkv::config::{Action, Config};
use shardkv::connection::ConnectionHandler;
use shardkv::storage::ShardedMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn print_help() {
    println!(
        r#"
shardkv - An In-Memory RESP Key-Value Server

USAGE:
    shardkv [OPTIONS]

OPTIONS:
    -h, --host <HOST>              Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>              Port to listen on (default: 6379)
        --bind <ADDR>              Full socket address, overrides --host/--port
        --max-connections <N>      Connections served at once (default: 1024)
        --timeout <SECS>           Shutdown drain bound per session (default: 10)
        --shards <N>               Requested shard count (default: 1024)
        --log-level <FILTER>       Log filter, overrides RUST_LOG (default: info)
    -v, --version                  Print version information
        --help                     Print this help message

EXAMPLES:
    shardkv                        # Start on 127.0.0.1:6379
    shardkv --port 6380            # Start on port 6380
    shardkv --bind 0.0.0.0:7000    # Listen on all interfaces

CONNECTING:
    Use redis-cli or any Redis client to connect:
    $ redis-cli -p 6379
    127.0.0.1:6379> PING
    PONG
    127.0.0.1:6379> SET name "Ariz"
    OK
    127.0.0.1:6379> GET name
    "Ariz"
"#
    );
}

fn print_banner(config: &Config, shards: usize) {
    println!(
        r#"
shardkv v{} - In-Memory RESP Key-Value Server
──────────────────────────────────────────────────────────────
Server starting on {}
Shards: {}   Max connections: {}   Drain bound: {}s

Send SIGINT or SIGTERM to shut down gracefully.
"#,
        shardkv::VERSION,
        config.bind_address(),
        shards,
        config.max_connections,
        config.timeout.as_secs(),
    );
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = match &config.log_level {
        Some(level) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid log level '{}'", level))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = match Config::from_args(std::env::args().skip(1)) {
        Ok(Action::Run(config)) => config,
        Ok(Action::Help) => {
            print_help();
            return Ok(());
        }
        Ok(Action::Version) => {
            println!("shardkv version {}", shardkv::VERSION);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    // Set up logging
    init_logging(&config)?;

    // Create the store (shared across all connections)
    let store = Arc::new(ShardedMap::new(config.shards).context("failed to create store")?);
    info!(shards = store.shard_count(), "Store initialized");

    print_banner(&config, store.shard_count());

    let handler = Arc::new(ConnectionHandler::new(
        CommandHandler::new(store),
        config.timeout,
    ));

    // Serve until a termination signal, then drain
    shardkv::server::run(&config, Arc::clone(&handler)).await?;

    let stats = handler.stats();
    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        "Server shutdown complete"
    );
    Ok(())
}
