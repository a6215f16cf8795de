use std::{net::SocketAddr, process::ExitCode};

use anyhow::{bail, Context, Result};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
};
use tracing::{debug, warn};

use crate::{
    cli::ClientArgs,
    frame::{read_status, write_request, Request, Status},
    key::ResourceKey,
};

/// A connection to a lock daemon.
///
/// Requests are sent one at a time; each call waits for its response.
pub struct LockClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl LockClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        stream.set_nodelay(true)?;

        debug!("connected to {}", addr);

        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Sends one request and waits for its status.
    pub async fn send(&mut self, request: &Request) -> Result<Status> {
        write_request(&mut self.writer, request)
            .await
            .with_context(|| format!("failed to send {:?} for '{}'", request.op, request.key))?;
        match read_status(&mut self.reader).await? {
            Some(status) => Ok(status),
            None => bail!("server closed the connection before responding"),
        }
    }

    /// Returns whether the lock was granted.
    pub async fn lock(&mut self, key: &ResourceKey) -> Result<bool> {
        let status = self.send(&Request::lock(key.clone())).await?;
        Ok(status.is_success())
    }

    pub async fn unlock(&mut self, key: &ResourceKey) -> Result<()> {
        match self.send(&Request::unlock(key.clone())).await? {
            Status::Success => Ok(()),
            Status::Failure => bail!("server refused to unlock '{key}'"),
        }
    }

    pub async fn shutdown(mut self) {
        if let Err(error) = self.writer.shutdown().await {
            warn!(?error, "failed to shutdown client writer cleanly");
        }
    }
}

/// `lockd lock`: exits with status 1 when the lock is held elsewhere.
pub async fn lock(args: ClientArgs) -> Result<ExitCode> {
    let mut client = LockClient::connect(args.server).await?;
    let granted = client.lock(&args.key).await?;
    client.shutdown().await;

    if granted {
        write_stdout("granted").await?;
        Ok(ExitCode::SUCCESS)
    } else {
        write_stdout("denied").await?;
        Ok(ExitCode::FAILURE)
    }
}

/// `lockd unlock`
pub async fn unlock(args: ClientArgs) -> Result<ExitCode> {
    let mut client = LockClient::connect(args.server).await?;
    client.unlock(&args.key).await?;
    client.shutdown().await;

    write_stdout("released").await?;
    Ok(ExitCode::SUCCESS)
}

async fn write_stdout(line: &str) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
