//! Transport abstraction
//!
//! A [`Conn`] is a frame-level connection made of a [`FrameReader`] half and a
//! [`FrameWriter`] half. Each half carries its own deadline, recomputed by the
//! caller before every operation. The halves can be split so one task reads
//! while another writes.

pub mod tcp;
pub mod websocket;

use crate::error::{RelayError, RelayResult};
use crate::protocol::{Frame, OpCode};
use async_trait::async_trait;
use std::future::Future;
use tokio::time::Instant;

/// Read half of a connection
#[async_trait]
pub trait FrameReader: Send {
    /// Block until one frame arrives or the read deadline elapses
    async fn read_frame(&mut self) -> RelayResult<Frame>;

    /// Set the instant after which `read_frame` fails with `Timeout`; `None` disables it
    fn set_read_deadline(&mut self, deadline: Option<Instant>);
}

/// Write half of a connection
#[async_trait]
pub trait FrameWriter: Send {
    /// Write one frame, bounded by the write deadline
    async fn write_frame(&mut self, op: OpCode, payload: &[u8]) -> RelayResult<()>;

    /// Force any buffered bytes onto the wire
    async fn flush(&mut self) -> RelayResult<()>;

    /// Set the instant after which writes fail with `Timeout`; `None` disables it
    fn set_write_deadline(&mut self, deadline: Option<Instant>);

    /// Shut the connection down from this side
    async fn close(&mut self) -> RelayResult<()>;
}

/// A transport-agnostic frame connection
pub struct Conn {
    reader: Box<dyn FrameReader>,
    writer: Box<dyn FrameWriter>,
}

impl Conn {
    pub fn new(reader: impl FrameReader + 'static, writer: impl FrameWriter + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    pub async fn read_frame(&mut self) -> RelayResult<Frame> {
        self.reader.read_frame().await
    }

    pub async fn write_frame(&mut self, op: OpCode, payload: &[u8]) -> RelayResult<()> {
        self.writer.write_frame(op, payload).await
    }

    pub async fn flush(&mut self) -> RelayResult<()> {
        self.writer.flush().await
    }

    pub fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        self.reader.set_read_deadline(deadline);
    }

    pub fn set_write_deadline(&mut self, deadline: Option<Instant>) {
        self.writer.set_write_deadline(deadline);
    }

    pub async fn close(&mut self) -> RelayResult<()> {
        self.writer.close().await
    }

    /// Separate the halves so reading and writing can proceed on different tasks
    pub fn into_split(self) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        (self.reader, self.writer)
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn").finish_non_exhaustive()
    }
}

/// Run `fut` to completion unless `deadline` passes first
pub(crate) async fn with_deadline<T, F>(deadline: Option<Instant>, fut: F) -> RelayResult<T>
where
    F: Future<Output = RelayResult<T>>,
{
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut)
            .await
            .map_err(|_| RelayError::Timeout)?,
        None => fut.await,
    }
}
