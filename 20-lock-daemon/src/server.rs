use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    select,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    session::{run_session, Disconnect},
    table::{LockTable, DEFAULT_LOCK_TIMEOUT},
};

/// Settings for a [`LockServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Age after which a held lock may be reclaimed by the next requester.
    pub lock_timeout: Duration,
    /// When set, expired entries are swept from the table on this period.
    /// Off by default: expiry is otherwise only checked when the same key is
    /// requested again.
    pub sweep_interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            sweep_interval: None,
        }
    }
}

pub struct LockServer {
    listener: TcpListener,
    table: Arc<LockTable>,
    sweep_interval: Option<Duration>,
}

impl LockServer {
    pub fn new(listener: TcpListener, config: ServerConfig) -> Self {
        Self {
            listener,
            table: Arc::new(LockTable::new(config.lock_timeout)),
            sweep_interval: config.sweep_interval,
        }
    }

    /// Serves an existing table, e.g. one built with a custom clock.
    pub fn with_table(listener: TcpListener, table: Arc<LockTable>) -> Self {
        Self {
            listener,
            table,
            sweep_interval: None,
        }
    }

    pub fn with_sweep_interval(mut self, sweep_interval: Option<Duration>) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    pub fn table(&self) -> Arc<LockTable> {
        Arc::clone(&self.table)
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let LockServer {
            listener,
            table,
            sweep_interval,
        } = self;
        tokio::pin!(shutdown);

        let sweeper = sweep_interval.map(|period| spawn_sweeper(Arc::clone(&table), period));

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("lock server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &table);
                }
            }
        }

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    table: &Arc<LockTable>,
) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, table),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(stream: TcpStream, peer: SocketAddr, table: &Arc<LockTable>) {
    let table = Arc::clone(table);
    tokio::spawn(async move {
        debug!(peer = %peer, "client connected");
        if let Err(err) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = ?err, "failed to disable nagle");
        }

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        match run_session(&mut reader, &mut writer, &table).await {
            Ok(Disconnect::PeerClosed) => debug!(peer = %peer, "client disconnected"),
            Ok(Disconnect::Truncated) => {
                debug!(peer = %peer, "client disconnected in the middle of a frame")
            }
            Ok(Disconnect::Rejected(err)) => {
                warn!(peer = %peer, error = %err, "rejected malformed frame; closing connection")
            }
            Err(err) => warn!(peer = %peer, error = ?err, "client connection closed with error"),
        }
    });
}

fn spawn_sweeper(table: Arc<LockTable>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; there is nothing to sweep yet.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let swept = table.sweep_expired();
            if swept > 0 {
                debug!(swept, remaining = table.len(), "swept expired locks");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{key::ResourceKey, table::Clock};

    /// Follows tokio's clock so paused-time tests can move it.
    struct TokioClock;

    impl Clock for TokioClock {
        fn now(&self) -> std::time::Instant {
            tokio::time::Instant::now().into_std()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_expired_entries_on_schedule() {
        let table =
            Arc::new(LockTable::new(Duration::from_millis(250)).with_clock(Arc::new(TokioClock)));
        table.lock(&ResourceKey::new("stale").expect("valid key"));

        let sweeper = spawn_sweeper(Arc::clone(&table), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(table.len(), 1, "no sweep before the first period");

        tokio::time::sleep(Duration::from_secs(1)).await;
        sweeper.abort();
        assert!(table.is_empty());
    }

    #[test]
    fn default_config_uses_default_timeout_without_sweep() {
        let config = ServerConfig::default();
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.sweep_interval, None);
    }
}
