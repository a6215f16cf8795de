use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand, ValueHint};

use crate::{key::ResourceKey, server::ServerConfig, table::DEFAULT_LOCK_TIMEOUT_MS};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the lock daemon.
    Serve(ServeArgs),
    /// Ask a running daemon for a lock. Exits with status 1 if it is held.
    Lock(ClientArgs),
    /// Release a lock on a running daemon.
    Unlock(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address to listen on. Use port 0 for an ephemeral port.
    #[arg(long, env = "LOCKD_LISTEN", default_value = "0.0.0.0:1500")]
    pub listen: SocketAddr,

    /// Milliseconds a lock may be held before the next request reclaims it.
    #[arg(
        long,
        env = "LOCKD_TIMEOUT_MS",
        default_value_t = DEFAULT_LOCK_TIMEOUT_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout_ms: u64,

    /// Periodically drop expired locks instead of waiting for the next
    /// request on the same key.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub sweep_interval_ms: Option<u64>,

    /// Also write warnings to daily rotated `lockd.<YYYY-MM-DD>.log` files in
    /// this directory, keeping the newest five.
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub log_dir: Option<PathBuf>,
}

impl ServeArgs {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            lock_timeout: Duration::from_millis(self.timeout_ms),
            sweep_interval: self.sweep_interval_ms.map(Duration::from_millis),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Resource to lock or unlock, usually a file path.
    pub key: ResourceKey,

    /// Address of the lock daemon.
    #[arg(long, default_value = "127.0.0.1:1500")]
    pub server: SocketAddr,
}
