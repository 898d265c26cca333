//! Binary entry point: parses arguments, loads configuration, wires up
//! logging, builds the storage engine, and runs the dispatcher until
//! shutdown. Mirrors `server.c`'s `main()` at the granularity of what
//! happens in what order; the loop itself lives in [`storage_server::Dispatcher`].

use std::os::unix::net::UnixListener;
use std::sync::Arc;

use storage_core::{EvictionPolicy, Limits, Storage};
use storage_server::{AuditLog, Connections, Dispatcher, ServerConfig, SignalChannel, WorkerPool, load_config};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "./config.txt";
/// Sharding factor for the engine's internal maps; unrelated to any
/// config key, this just bounds lock contention under concurrent load.
const STORAGE_SHARDS: usize = 16;

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    if let Err(err) = run() {
        eprintln!("ERR: {err}");
        std::process::exit(1);
    }
}

fn run() -> storage_server::ServerResult<()> {
    let config_path = parse_args();
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(storage_server::ServerError::ConfigIo { source, .. }) if config_path == DEFAULT_CONFIG_PATH => {
            tracing::warn!(message = "no config file found, using defaults", path = %config_path, error = %source);
            ServerConfig::default()
        }
        Err(err) => return Err(err),
    };

    tracing::info!(
        n_workers = config.n_workers,
        dim_workers_queue = config.dim_workers_queue,
        max_file_num = config.max_file_num,
        max_bytes = config.max_bytes,
        max_locks = config.max_locks,
        expected_clients = config.expected_clients,
        socket_path = %config.socket_path,
        log_file_path = %config.log_file_path,
        eviction_policy = ?config.eviction_policy,
        "starting storage server"
    );

    let audit = Arc::new(AuditLog::create(&config.log_file_path).map_err(|source| storage_server::ServerError::LogFileIo { path: config.log_file_path.clone(), source })?);

    // `SignalChannel::install` must run before any other thread is spawned
    // so the blocked signal mask is inherited by the worker pool's threads.
    let signals = SignalChannel::install().map_err(storage_server::ServerError::Io)?;
    let pool = WorkerPool::new(config.n_workers, config.dim_workers_queue);

    let limits = Limits { max_files: config.max_file_num, max_bytes: config.max_bytes };
    let policy: EvictionPolicy = config.eviction_policy;
    let client_shards = STORAGE_SHARDS.min(config.expected_clients.max(1));
    let storage = Arc::new(Storage::new(limits, policy, STORAGE_SHARDS, client_shards));
    let connections = Arc::new(Connections::new());

    let _ = std::fs::remove_file(&config.socket_path);
    let listener = UnixListener::bind(&config.socket_path).map_err(|source| storage_server::ServerError::SocketBind { path: config.socket_path.clone(), source })?;

    let mut dispatcher = Dispatcher::new(listener, signals, storage, connections, audit, pool).map_err(storage_server::ServerError::Io)?;
    dispatcher.run();

    let _ = std::fs::remove_file(&config.socket_path);
    tracing::info!("storage server shut down");
    Ok(())
}

/// Parses `-c <path>` / `-h`, the same two flags `server.c`'s `getopt` loop
/// recognizes. `-h` prints usage and exits immediately.
fn parse_args() -> String {
    let mut args = std::env::args().skip(1);
    let mut config_path = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            "-c" => {
                let Some(path) = args.next() else {
                    eprintln!("ERR: -c requires an argument");
                    std::process::exit(1);
                };
                config_path = Some(path);
            }
            other => {
                eprintln!("ERR: unrecognized argument '{other}'");
                std::process::exit(1);
            }
        }
    }

    config_path.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_owned())
}

fn print_usage() {
    println!("usage: storage-server [-h] [-c config_file_path]");
    println!();
    println!("If -c is not given, '{DEFAULT_CONFIG_PATH}' is used if present, otherwise built-in defaults apply.");
    println!("The config file is line-oriented: '# comment', blank lines, and 'key = value;' pairs.");
}
