//! WebSocket transport
//!
//! Framing is delegated to the WebSocket library: axum on the accepting side,
//! tokio-tungstenite on the dialing side. Every `write_frame` is sent and flushed
//! immediately.
//!
//! Both libraries answer pings on their own, so writing a `Pong` through this
//! transport is a no-op. That keeps the peer at exactly one pong per ping.

use super::{with_deadline, Conn, FrameReader, FrameWriter};
use crate::error::{RelayError, RelayResult};
use crate::protocol::{Frame, OpCode};
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::borrow::Cow;
use std::marker::PhantomData;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Conversion between a library message type and a [`Frame`]
pub trait WsMessage: Sized + Send {
    fn into_frame(self) -> Frame;

    fn from_frame(op: OpCode, payload: &[u8]) -> Self;
}

impl WsMessage for Message {
    fn into_frame(self) -> Frame {
        match self {
            Self::Text(text) => Frame::new(OpCode::Text, text.into_bytes()),
            Self::Binary(data) => Frame::binary(data),
            Self::Ping(data) => Frame::new(OpCode::Ping, data),
            Self::Pong(data) => Frame::new(OpCode::Pong, data),
            Self::Close(close) => Frame::close(
                close
                    .map(|c| c.reason.into_owned().into_bytes())
                    .unwrap_or_default(),
            ),
            Self::Frame(raw) => Frame::new(OpCode::Continuation, raw.payload().to_vec()),
        }
    }

    fn from_frame(op: OpCode, payload: &[u8]) -> Self {
        match op {
            OpCode::Text => Self::Text(String::from_utf8_lossy(payload).into_owned()),
            OpCode::Ping => Self::Ping(payload.to_vec()),
            OpCode::Pong => Self::Pong(payload.to_vec()),
            OpCode::Close => Self::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: Cow::Owned(String::from_utf8_lossy(payload).into_owned()),
            })),
            OpCode::Binary | OpCode::Continuation => Self::Binary(payload.to_vec()),
        }
    }
}

impl WsMessage for axum::extract::ws::Message {
    fn into_frame(self) -> Frame {
        match self {
            Self::Text(text) => Frame::new(OpCode::Text, text.into_bytes()),
            Self::Binary(data) => Frame::binary(data),
            Self::Ping(data) => Frame::new(OpCode::Ping, data),
            Self::Pong(data) => Frame::new(OpCode::Pong, data),
            Self::Close(close) => Frame::close(
                close
                    .map(|c| c.reason.into_owned().into_bytes())
                    .unwrap_or_default(),
            ),
        }
    }

    fn from_frame(op: OpCode, payload: &[u8]) -> Self {
        match op {
            OpCode::Text => Self::Text(String::from_utf8_lossy(payload).into_owned()),
            OpCode::Ping => Self::Ping(payload.to_vec()),
            OpCode::Pong => Self::Pong(payload.to_vec()),
            OpCode::Close => Self::Close(Some(axum::extract::ws::CloseFrame {
                code: axum::extract::ws::close_code::NORMAL,
                reason: Cow::Owned(String::from_utf8_lossy(payload).into_owned()),
            })),
            OpCode::Binary | OpCode::Continuation => Self::Binary(payload.to_vec()),
        }
    }
}

/// Wrap a socket upgraded by axum
pub fn server_conn(socket: axum::extract::ws::WebSocket) -> Conn {
    let (sink, stream) = socket.split();
    Conn::new(WsReader::new(stream), WsWriter::new(sink))
}

/// Wrap a socket dialed with tokio-tungstenite
pub fn client_conn(socket: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Conn {
    let (sink, stream) = socket.split();
    Conn::new(WsReader::new(stream), WsWriter::new(sink))
}

/// Read half over a message stream
pub struct WsReader<S> {
    stream: S,
    deadline: Option<Instant>,
}

impl<S> WsReader<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            deadline: None,
        }
    }
}

#[async_trait]
impl<S, M, E> FrameReader for WsReader<S>
where
    S: Stream<Item = Result<M, E>> + Unpin + Send,
    M: WsMessage,
    E: Into<RelayError> + Send,
{
    async fn read_frame(&mut self) -> RelayResult<Frame> {
        let stream = &mut self.stream;
        with_deadline(self.deadline, async move {
            match stream.next().await {
                Some(Ok(message)) => Ok(message.into_frame()),
                Some(Err(e)) => Err(e.into()),
                None => Err(RelayError::RemoteClosed),
            }
        })
        .await
    }

    fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }
}

/// Write half over a message sink
pub struct WsWriter<K, M> {
    sink: K,
    deadline: Option<Instant>,
    _message: PhantomData<fn(M)>,
}

impl<K, M> WsWriter<K, M> {
    pub fn new(sink: K) -> Self {
        Self {
            sink,
            deadline: None,
            _message: PhantomData,
        }
    }
}

#[async_trait]
impl<K, M> FrameWriter for WsWriter<K, M>
where
    K: Sink<M> + Unpin + Send,
    K::Error: Into<RelayError>,
    M: WsMessage,
{
    async fn write_frame(&mut self, op: OpCode, payload: &[u8]) -> RelayResult<()> {
        if op == OpCode::Pong {
            return Ok(());
        }
        let message = M::from_frame(op, payload);
        let sink = &mut self.sink;
        with_deadline(self.deadline, async move {
            sink.send(message).await.map_err(Into::into)
        })
        .await
    }

    async fn flush(&mut self) -> RelayResult<()> {
        let sink = &mut self.sink;
        with_deadline(self.deadline, async move { sink.flush().await.map_err(Into::into) }).await
    }

    fn set_write_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    async fn close(&mut self) -> RelayResult<()> {
        self.sink.close().await.map_err(Into::into)
    }
}
