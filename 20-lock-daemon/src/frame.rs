//! Fixed-size binary frames exchanged with clients.
//!
//! A request is 260 bytes: a native-endian `i32` operation code, a 255-byte
//! NUL-padded key field and one padding byte. A response is a single
//! native-endian `i32` status. There is no length prefix; frame boundaries
//! follow from the fixed sizes.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    key::{KeyError, ResourceKey, MAX_KEY_LEN},
    table::LockOutcome,
};

const CODE_LEN: usize = 4;

/// Size of the key field, including the trailing padding byte.
pub const KEY_FIELD_LEN: usize = MAX_KEY_LEN + 1;

pub const REQUEST_FRAME_LEN: usize = CODE_LEN + KEY_FIELD_LEN;

pub const RESPONSE_FRAME_LEN: usize = CODE_LEN;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown operation code {0}")]
    UnknownOpcode(i32),
    #[error("invalid key: {0}")]
    InvalidKey(#[from] KeyError),
    #[error("unexpected response status {0}")]
    UnexpectedStatus(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Lock,
    Unlock,
}

impl Opcode {
    pub fn code(self) -> i32 {
        match self {
            Opcode::Lock => 0,
            Opcode::Unlock => 1,
        }
    }
}

impl TryFrom<i32> for Opcode {
    type Error = FrameError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Opcode::Lock),
            1 => Ok(Opcode::Unlock),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub op: Opcode,
    pub key: ResourceKey,
}

impl Request {
    pub fn lock(key: ResourceKey) -> Self {
        Self {
            op: Opcode::Lock,
            key,
        }
    }

    pub fn unlock(key: ResourceKey) -> Self {
        Self {
            op: Opcode::Unlock,
            key,
        }
    }

    pub fn encode(&self) -> [u8; REQUEST_FRAME_LEN] {
        let mut frame = [0u8; REQUEST_FRAME_LEN];
        frame[..CODE_LEN].copy_from_slice(&self.op.code().to_ne_bytes());
        let key = self.key.as_bytes();
        // ResourceKey guarantees the key fits in MAX_KEY_LEN, leaving the
        // padding byte zero.
        frame[CODE_LEN..CODE_LEN + key.len()].copy_from_slice(key);
        frame
    }

    /// Decodes a request frame.
    ///
    /// The key ends at the first NUL in the key field; everything after it,
    /// and the padding byte, is ignored.
    pub fn decode(frame: &[u8; REQUEST_FRAME_LEN]) -> Result<Self, FrameError> {
        let mut code = [0u8; CODE_LEN];
        code.copy_from_slice(&frame[..CODE_LEN]);
        let op = Opcode::try_from(i32::from_ne_bytes(code))?;

        let field = &frame[CODE_LEN..CODE_LEN + MAX_KEY_LEN];
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        let key = ResourceKey::from_bytes(&field[..end])?;

        Ok(Self { op, key })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Failure,
}

impl Status {
    pub fn code(self) -> i32 {
        match self {
            Status::Success => 0,
            Status::Failure => 1,
        }
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }

    pub fn encode(self) -> [u8; RESPONSE_FRAME_LEN] {
        self.code().to_ne_bytes()
    }

    pub fn decode(frame: &[u8; RESPONSE_FRAME_LEN]) -> Result<Self, FrameError> {
        match i32::from_ne_bytes(*frame) {
            0 => Ok(Status::Success),
            1 => Ok(Status::Failure),
            other => Err(FrameError::UnexpectedStatus(other)),
        }
    }
}

impl From<LockOutcome> for Status {
    fn from(outcome: LockOutcome) -> Self {
        if outcome.is_granted() {
            Status::Success
        } else {
            Status::Failure
        }
    }
}

/// Reads exactly one `N`-byte frame.
///
/// Returns `Ok(None)` when the stream ends cleanly before the first byte of a
/// frame, and an [`io::ErrorKind::UnexpectedEof`] error when it ends part way
/// through one.
pub async fn read_frame<R, const N: usize>(reader: &mut R) -> io::Result<Option<[u8; N]>>
where
    R: AsyncRead + Unpin,
{
    let mut frame = [0u8; N];
    let mut filled = 0;
    while filled < N {
        let read = reader.read(&mut frame[filled..]).await?;
        if read == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("connection closed after {filled} of {N} frame bytes"),
            ));
        }
        filled += read;
    }
    Ok(Some(frame))
}

pub async fn write_request<W>(writer: &mut W, request: &Request) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&request.encode()).await?;
    writer.flush().await
}

pub async fn write_status<W>(writer: &mut W, status: Status) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&status.encode()).await?;
    writer.flush().await
}

/// Reads one response frame; `Ok(None)` means the peer closed the connection.
pub async fn read_status<R>(reader: &mut R) -> io::Result<Option<Status>>
where
    R: AsyncRead + Unpin,
{
    match read_frame::<_, RESPONSE_FRAME_LEN>(reader).await? {
        Some(frame) => Status::decode(&frame)
            .map(Some)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err)),
        None => Ok(None),
    }
}
