use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use lock_daemon::{
    cli::{Cli, Command},
    client,
    logging::init_tracing,
    server::LockServer,
};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let log_dir = match &cli.command {
        Command::Serve(args) => args.log_dir.clone(),
        _ => None,
    };
    let _log_guard = init_tracing(log_dir.as_deref())?;

    match cli.command {
        Command::Serve(args) => {
            let listener = TcpListener::bind(args.listen)
                .await
                .with_context(|| format!("failed to bind {}", args.listen))?;
            let config = args.server_config();
            let (timeout, sweep) = (config.lock_timeout, config.sweep_interval);

            let server = LockServer::new(listener, config);
            let addr = server.local_addr()?;
            info!("lockd listening on {}", addr);
            info!(?timeout, ?sweep, "lock table ready");
            if let Err(err) = server.run_until_ctrl_c().await {
                warn!("lockd exited with error: {err:?}");
                return Err(err);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Lock(args) => client::lock(args).await,
        Command::Unlock(args) => client::unlock(args).await,
    }
}
