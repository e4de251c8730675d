//! Raw TCP transport
//!
//! Wire format, identical on every node of a deployment:
//!
//! ```text
//! byte  0      opcode (u8)
//! bytes 1..5   payload length (u32, big-endian)
//! bytes 5..    payload
//! ```
//!
//! Frames are written with a single `write_all` each, so `flush` has nothing to do.

use super::{with_deadline, Conn, FrameReader, FrameWriter};
use crate::error::{RelayError, RelayResult};
use crate::protocol::{Frame, OpCode, MAX_FRAME_SIZE};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::Instant;

/// Opcode byte plus the 32-bit length prefix
const HEADER_LEN: usize = 5;

/// Wrap an accepted or dialed TCP stream
pub fn conn(stream: TcpStream) -> Conn {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
    }
    let (read_half, write_half) = stream.into_split();
    from_io(read_half, write_half)
}

/// Build a TCP-framed connection over any byte stream halves
pub fn from_io<R, W>(reader: R, writer: W) -> Conn
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    Conn::new(TcpReader::new(reader), TcpWriter::new(writer))
}

/// Read one frame from `reader`
pub async fn read_frame<R>(reader: &mut R) -> RelayResult<Frame>
where
    R: AsyncRead + Unpin,
{
    let op = OpCode::try_from(reader.read_u8().await?)?;
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_SIZE {
        return Err(RelayError::FrameTooLarge(len));
    }

    let mut payload = vec![0; len];
    reader.read_exact(&mut payload).await?;
    Ok(Frame::new(op, payload))
}

/// Write one frame to `writer`
pub async fn write_frame<W>(writer: &mut W, op: OpCode, payload: &[u8]) -> RelayResult<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_SIZE {
        return Err(RelayError::FrameTooLarge(payload.len()));
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.push(op.as_u8());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    writer.write_all(&buf).await?;
    Ok(())
}

/// Read half of a TCP connection
pub struct TcpReader<R> {
    inner: BufReader<R>,
    deadline: Option<Instant>,
}

impl<R: AsyncRead + Unpin> TcpReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            deadline: None,
        }
    }
}

#[async_trait]
impl<R> FrameReader for TcpReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn read_frame(&mut self) -> RelayResult<Frame> {
        with_deadline(self.deadline, read_frame(&mut self.inner)).await
    }

    fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }
}

/// Write half of a TCP connection
pub struct TcpWriter<W> {
    inner: W,
    deadline: Option<Instant>,
}

impl<W: AsyncWrite + Unpin> TcpWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            deadline: None,
        }
    }
}

#[async_trait]
impl<W> FrameWriter for TcpWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_frame(&mut self, op: OpCode, payload: &[u8]) -> RelayResult<()> {
        with_deadline(self.deadline, write_frame(&mut self.inner, op, payload)).await
    }

    async fn flush(&mut self) -> RelayResult<()> {
        Ok(())
    }

    fn set_write_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    async fn close(&mut self) -> RelayResult<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
