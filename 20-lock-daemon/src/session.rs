//! Per-connection request loop.
//!
//! A session reads one request frame, applies it to the shared
//! [`LockTable`], writes one status frame, and repeats. Requests are handled
//! strictly in arrival order, so a client that pipelines frames gets its
//! responses back in the same order.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::trace;

use crate::{
    frame::{read_frame, write_status, FrameError, Opcode, Request, Status, REQUEST_FRAME_LEN},
    table::LockTable,
};

/// Why a session ended without an I/O error.
#[derive(Debug, PartialEq, Eq)]
pub enum Disconnect {
    /// The peer closed the connection between frames.
    PeerClosed,
    /// The peer closed the connection part way through a frame.
    Truncated,
    /// A frame could not be decoded. The peer was sent a failure status and
    /// the connection is dropped.
    Rejected(FrameError),
}

/// Applies a decoded request to the table.
///
/// Unlock always succeeds.
pub fn dispatch(table: &LockTable, request: &Request) -> Status {
    match request.op {
        Opcode::Lock => table.lock(&request.key).into(),
        Opcode::Unlock => {
            table.unlock(&request.key);
            Status::Success
        }
    }
}

pub async fn run_session<R, W>(
    reader: &mut R,
    writer: &mut W,
    table: &LockTable,
) -> io::Result<Disconnect>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = match read_frame::<_, REQUEST_FRAME_LEN>(reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(Disconnect::PeerClosed),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                return Ok(Disconnect::Truncated)
            }
            Err(err) => return Err(err),
        };

        match Request::decode(&frame) {
            Ok(request) => {
                let status = dispatch(table, &request);
                trace!(op = ?request.op, key = %request.key, ?status, "request handled");
                write_status(writer, status).await?;
            }
            Err(err) => {
                write_status(writer, Status::Failure).await?;
                return Ok(Disconnect::Rejected(err));
            }
        }
    }
}
