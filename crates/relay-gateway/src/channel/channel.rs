//! Server-side channel
//!
//! Wraps one authenticated [`Conn`]. A write task is spawned at construction and
//! drains the outbound queue in bursts; the read loop is driven by the owner
//! through [`Channel::read_loop`], which may run at most once.

use crate::error::{RelayError, RelayResult};
use crate::listener::{Agent, MessageListener};
use crate::protocol::OpCode;
use crate::task::spawn_supervised;
use crate::transport::{with_deadline, Conn, FrameReader, FrameWriter};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

/// Outbound queue capacity; `push` waits once this many payloads are pending
pub const WRITE_QUEUE_CAPACITY: usize = 5;

/// Default idle timeout applied before every write
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);

/// Default idle timeout applied before every read
pub const DEFAULT_READ_WAIT: Duration = Duration::from_secs(60);

/// Channel lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    /// Created, read loop not yet running; pushes are refused
    NotStarted = 0,
    /// Read loop running
    Active = 1,
    /// Closed; terminal
    Closed = 2,
}

impl ChannelState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NotStarted,
            1 => Self::Active,
            _ => Self::Closed,
        }
    }
}

/// `ChannelState` behind an atomic so transitions are compare-and-swap
#[derive(Debug)]
struct AtomicChannelState(AtomicU8);

impl AtomicChannelState {
    fn new() -> Self {
        Self(AtomicU8::new(ChannelState::NotStarted as u8))
    }

    fn load(&self) -> ChannelState {
        ChannelState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn transition(&self, from: ChannelState, to: ChannelState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn close(&self) -> ChannelState {
        ChannelState::from_u8(self.0.swap(ChannelState::Closed as u8, Ordering::AcqRel))
    }
}

/// Write half shared by the write task and the pong path
struct Outbound {
    writer: tokio::sync::Mutex<Box<dyn FrameWriter>>,
    write_wait: Mutex<Duration>,

    /// Error that stopped the write task, handed to the read loop
    failure: Mutex<Option<RelayError>>,
    failed: Notify,
}

impl Outbound {
    fn deadline(&self) -> Option<Instant> {
        let wait = *self.write_wait.lock();
        (!wait.is_zero()).then(|| Instant::now() + wait)
    }

    async fn write(&self, op: OpCode, payload: &[u8]) -> RelayResult<()> {
        let deadline = self.deadline();
        let mut writer = self.writer.lock().await;
        writer.set_write_deadline(deadline);
        writer.write_frame(op, payload).await
    }

    async fn flush(&self) -> RelayResult<()> {
        let deadline = self.deadline();
        let mut writer = self.writer.lock().await;
        writer.set_write_deadline(deadline);
        writer.flush().await
    }

    /// Write and flush a pong without going through the queue
    async fn pong(&self) -> RelayResult<()> {
        let deadline = self.deadline();
        let mut writer = self.writer.lock().await;
        writer.set_write_deadline(deadline);
        writer.write_frame(OpCode::Pong, &[]).await?;
        writer.flush().await
    }

    async fn close(&self) -> RelayResult<()> {
        let deadline = self.deadline();
        let mut writer = self.writer.lock().await;
        with_deadline(deadline, writer.close()).await
    }

    /// Record a fatal write error and wake the read loop
    fn fail(&self, err: RelayError) {
        *self.failure.lock() = Some(err);
        self.failed.notify_one();
    }

    fn take_failure(&self, id: &str) -> RelayError {
        self.failure
            .lock()
            .take()
            .unwrap_or_else(|| RelayError::ChannelClosed(id.to_string()))
    }
}

/// One live logical connection
pub struct Channel {
    /// Connection id assigned by the acceptor
    id: String,

    /// Lifecycle state
    state: AtomicChannelState,

    /// Read half, taken by the read loop when it starts
    reader: Mutex<Option<Box<dyn FrameReader>>>,

    /// Write half and its timeout
    outbound: Arc<Outbound>,

    /// Outbound queue; `None` once closed
    sender: Mutex<Option<mpsc::Sender<Vec<u8>>>>,

    /// Idle timeout applied before every read
    read_wait: Mutex<Duration>,
}

impl Channel {
    /// Wrap `conn` and start the write task
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(id: impl Into<String>, conn: Conn) -> Arc<Self> {
        let id = id.into();
        let (reader, writer) = conn.into_split();
        let (tx, rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);

        let outbound = Arc::new(Outbound {
            writer: tokio::sync::Mutex::new(writer),
            write_wait: Mutex::new(DEFAULT_WRITE_WAIT),
            failure: Mutex::new(None),
            failed: Notify::new(),
        });

        let channel = Arc::new(Self {
            id: id.clone(),
            state: AtomicChannelState::new(),
            reader: Mutex::new(Some(reader)),
            outbound: outbound.clone(),
            sender: Mutex::new(Some(tx)),
            read_wait: Mutex::new(DEFAULT_READ_WAIT),
        });

        spawn_supervised("channel-write-loop", async move {
            match write_loop(&outbound, rx).await {
                Ok(()) => {
                    if let Err(e) = outbound.close().await {
                        tracing::debug!(channel_id = %id, error = %e, "Transport close failed");
                    }
                    tracing::debug!(channel_id = %id, "Write loop closed");
                }
                Err(e) => {
                    tracing::error!(channel_id = %id, error = %e, "Write loop failed");
                    // A frame may be cut short on the wire; nothing more can follow it.
                    if let Err(close_err) = outbound.close().await {
                        tracing::debug!(channel_id = %id, error = %close_err, "Transport close failed");
                    }
                    outbound.fail(e);
                }
            }
        });

        channel
    }

    /// Get the channel id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the current lifecycle state
    pub fn state(&self) -> ChannelState {
        self.state.load()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ChannelState::Closed
    }

    /// Set the read timeout; takes effect on the next read. Zero disables it.
    pub fn set_read_wait(&self, wait: Duration) {
        *self.read_wait.lock() = wait;
    }

    /// Set the write timeout; takes effect on the next write. Zero disables it.
    pub fn set_write_wait(&self, wait: Duration) {
        *self.outbound.write_wait.lock() = wait;
    }

    pub fn read_wait(&self) -> Duration {
        *self.read_wait.lock()
    }

    pub fn write_wait(&self) -> Duration {
        *self.outbound.write_wait.lock()
    }

    /// Queue `payload` for the write task
    ///
    /// Fails unless the read loop is running. Waits only while the queue is full.
    pub async fn push(&self, payload: Vec<u8>) -> RelayResult<()> {
        if self.state() != ChannelState::Active {
            return Err(RelayError::ChannelClosed(self.id.clone()));
        }
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or_else(|| RelayError::ChannelClosed(self.id.clone()))?;

        sender
            .send(payload)
            .await
            .map_err(|_| RelayError::ChannelClosed(self.id.clone()))
    }

    /// Close the outbound queue
    ///
    /// Payloads already queued are still written, then the write task shuts the
    /// transport down. Closing twice is a no-op.
    pub fn close(&self) -> RelayResult<()> {
        if self.state.close() == ChannelState::Closed {
            return Ok(());
        }
        self.sender.lock().take();
        self.reader.lock().take();
        tracing::debug!(channel_id = %self.id, "Channel closed");
        Ok(())
    }

    /// Refuse a channel whose read loop never started: send a close frame with
    /// `reason`, then close
    pub async fn reject(&self, reason: &str) {
        let result = match self.outbound.write(OpCode::Close, reason.as_bytes()).await {
            Ok(()) => self.outbound.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::debug!(channel_id = %self.id, error = %e, "Failed to send close frame");
        }
        let _ = self.close();
    }

    /// Read frames until the connection fails, times out, or the peer closes it
    ///
    /// Pings are answered immediately. Every other non-empty data payload is handed
    /// to `listener` on its own task. A failed write also ends the loop, with the
    /// write error. Returns the terminal error; a second call fails with
    /// `AlreadyStarted` without touching the connection.
    pub async fn read_loop(self: &Arc<Self>, listener: Arc<dyn MessageListener>) -> RelayResult<()> {
        if !self
            .state
            .transition(ChannelState::NotStarted, ChannelState::Active)
        {
            return Err(match self.state() {
                ChannelState::Closed => RelayError::ChannelClosed(self.id.clone()),
                _ => RelayError::AlreadyStarted(self.id.clone()),
            });
        }

        let mut reader = self
            .reader
            .lock()
            .take()
            .ok_or_else(|| RelayError::ChannelClosed(self.id.clone()))?;

        loop {
            let wait = self.read_wait();
            reader.set_read_deadline((!wait.is_zero()).then(|| Instant::now() + wait));

            let frame = tokio::select! {
                frame = reader.read_frame() => frame?,
                () = self.outbound.failed.notified() => {
                    return Err(self.outbound.take_failure(&self.id));
                }
            };

            if frame.op().is_control() {
                match frame.op() {
                    OpCode::Close => return Err(RelayError::RemoteClosed),
                    OpCode::Ping => {
                        tracing::trace!(channel_id = %self.id, "Ping received, sending pong");
                        if let Err(e) = self.outbound.pong().await {
                            tracing::warn!(channel_id = %self.id, error = %e, "Failed to send pong");
                            return Err(e);
                        }
                    }
                    _ => {}
                }
                continue;
            }

            let payload = frame.into_payload();
            if payload.is_empty() {
                continue;
            }

            let agent: Arc<dyn Agent> = self.clone();
            let listener = listener.clone();
            spawn_supervised("message-listener", async move {
                listener.receive(agent, payload).await;
            });
        }
    }
}

/// Drain the queue in bursts: block for one payload, write whatever else is
/// already queued, then flush once
async fn write_loop(outbound: &Outbound, mut rx: mpsc::Receiver<Vec<u8>>) -> RelayResult<()> {
    while let Some(payload) = rx.recv().await {
        outbound.write(OpCode::Binary, &payload).await?;

        let pending = rx.len();
        for _ in 0..pending {
            let Ok(payload) = rx.try_recv() else { break };
            outbound.write(OpCode::Binary, &payload).await?;
        }

        outbound.flush().await?;
    }
    Ok(())
}

#[async_trait]
impl Agent for Channel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn push(&self, payload: Vec<u8>) -> RelayResult<()> {
        Channel::push(self, payload).await
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Frame;
    use crate::transport::tcp;
    use tokio::io::duplex;

    /// Channel on one end of an in-memory pipe, raw peer connection on the other
    fn channel_pair(id: &str) -> (Arc<Channel>, Conn) {
        channel_pair_sized(id, 64 * 1024)
    }

    /// Like `channel_pair`, but the pipe buffers at most `capacity` bytes each way
    fn channel_pair_sized(id: &str, capacity: usize) -> (Arc<Channel>, Conn) {
        let (a, b) = duplex(capacity);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        (Channel::new(id, tcp::from_io(ar, aw)), tcp::from_io(br, bw))
    }

    struct Recorder {
        tx: mpsc::UnboundedSender<Vec<u8>>,
    }

    #[async_trait]
    impl MessageListener for Recorder {
        async fn receive(&self, _agent: Arc<dyn Agent>, payload: Vec<u8>) {
            let _ = self.tx.send(payload);
        }
    }

    struct Echo;

    #[async_trait]
    impl MessageListener for Echo {
        async fn receive(&self, agent: Arc<dyn Agent>, payload: Vec<u8>) {
            let mut reply = payload;
            reply.extend_from_slice(b" from server ");
            let _ = agent.push(reply).await;
        }
    }

    struct Panics;

    #[async_trait]
    impl MessageListener for Panics {
        async fn receive(&self, _agent: Arc<dyn Agent>, _payload: Vec<u8>) {
            panic!("listener failure");
        }
    }

    fn recorder() -> (Arc<dyn MessageListener>, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Recorder { tx }), rx)
    }

    fn start(channel: &Arc<Channel>, listener: Arc<dyn MessageListener>) -> tokio::task::JoinHandle<RelayResult<()>> {
        let channel = channel.clone();
        tokio::spawn(async move { channel.read_loop(listener).await })
    }

    async fn wait_active(channel: &Channel) {
        while channel.state() != ChannelState::Active {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_new_channel_state() {
        let (channel, _peer) = channel_pair("user_1");
        assert_eq!(channel.id(), "user_1");
        assert_eq!(channel.state(), ChannelState::NotStarted);
        assert_eq!(channel.read_wait(), DEFAULT_READ_WAIT);
        assert_eq!(channel.write_wait(), DEFAULT_WRITE_WAIT);

        channel.set_read_wait(Duration::from_secs(3));
        channel.set_write_wait(Duration::from_secs(4));
        assert_eq!(channel.read_wait(), Duration::from_secs(3));
        assert_eq!(channel.write_wait(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_push_before_read_loop_fails() {
        let (channel, _peer) = channel_pair("user_1");
        let err = channel.push(b"early".to_vec()).await.unwrap_err();
        assert!(matches!(err, RelayError::ChannelClosed(id) if id == "user_1"));
    }

    #[tokio::test]
    async fn test_read_loop_runs_once() {
        let (channel, _peer) = channel_pair("user_1");
        let (listener, _rx) = recorder();

        let first = start(&channel, listener.clone());
        wait_active(&channel).await;

        let err = channel.read_loop(listener).await.unwrap_err();
        assert!(matches!(err, RelayError::AlreadyStarted(_)));
        assert!(!first.is_finished());
    }

    #[tokio::test]
    async fn test_concurrent_read_loops() {
        let (channel, peer) = channel_pair("user_1");
        let (listener, _rx) = recorder();

        let a = start(&channel, listener.clone());
        let b = start(&channel, listener);
        wait_active(&channel).await;

        drop(peer);
        let (ra, rb) = (a.await.unwrap(), b.await.unwrap());
        let started = [&ra, &rb]
            .iter()
            .filter(|r| matches!(r, Err(RelayError::AlreadyStarted(_))))
            .count();
        assert_eq!(started, 1);
    }

    #[tokio::test]
    async fn test_write_ordering() {
        let (channel, mut peer) = channel_pair("user_1");
        let (listener, _rx) = recorder();
        let _loop = start(&channel, listener);
        wait_active(&channel).await;

        for p in ["p1", "p2", "p3"] {
            channel.push(p.as_bytes().to_vec()).await.unwrap();
        }

        for p in ["p1", "p2", "p3"] {
            assert_eq!(peer.read_frame().await.unwrap(), Frame::binary(p));
        }
    }

    #[tokio::test]
    async fn test_burst_beyond_queue_capacity() {
        let (channel, mut peer) = channel_pair("user_1");
        let (listener, _rx) = recorder();
        let _loop = start(&channel, listener);
        wait_active(&channel).await;

        let total = WRITE_QUEUE_CAPACITY * 4;
        let producer = {
            let channel = channel.clone();
            tokio::spawn(async move {
                for i in 0..total {
                    channel.push(i.to_string().into_bytes()).await.unwrap();
                }
            })
        };

        for i in 0..total {
            let frame = peer.read_frame().await.unwrap();
            assert_eq!(frame.payload(), i.to_string().as_bytes());
        }
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn test_push_after_close_never_reaches_wire() {
        let (channel, mut peer) = channel_pair("user_1");
        let (listener, _rx) = recorder();
        let _loop = start(&channel, listener);
        wait_active(&channel).await;

        channel.push(b"before".to_vec()).await.unwrap();
        channel.close().unwrap();
        assert!(channel.is_closed());

        let err = channel.push(b"after".to_vec()).await.unwrap_err();
        assert!(matches!(err, RelayError::ChannelClosed(_)));

        assert_eq!(peer.read_frame().await.unwrap(), Frame::binary("before"));
        // Queue drained, transport shut down: the next read hits end of stream.
        assert!(peer.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (channel, _peer) = channel_pair("user_1");
        channel.close().unwrap();
        channel.close().unwrap();
        assert_eq!(channel.state(), ChannelState::Closed);

        let (listener, _rx) = recorder();
        let err = channel.read_loop(listener).await.unwrap_err();
        assert!(matches!(err, RelayError::ChannelClosed(_)));
    }

    #[tokio::test]
    async fn test_reject_sends_close_frame() {
        let (channel, mut peer) = channel_pair("user_1");
        channel.reject("channel id user_1 is repeated").await;

        assert!(channel.is_closed());
        let frame = peer.read_frame().await.unwrap();
        assert_eq!(frame, Frame::close("channel id user_1 is repeated"));
        assert!(peer.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_ping_gets_exactly_one_pong() {
        let (channel, mut peer) = channel_pair("user_1");
        let (listener, _rx) = recorder();
        let _loop = start(&channel, listener);
        wait_active(&channel).await;

        peer.write_frame(OpCode::Ping, &[]).await.unwrap();
        let frame = peer.read_frame().await.unwrap();
        assert_eq!(frame, Frame::pong());

        channel.push(b"app".to_vec()).await.unwrap();
        assert_eq!(peer.read_frame().await.unwrap(), Frame::binary("app"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_overtakes_queued_payloads() {
        // Room for the ping and pong frames but not for a whole data frame.
        let (channel, mut peer) = channel_pair_sized("user_1", 16);
        let (listener, _rx) = recorder();
        let _loop = start(&channel, listener);
        wait_active(&channel).await;

        let payloads: Vec<Vec<u8>> = (1..=4).map(|i| vec![i; 32]).collect();
        for p in &payloads {
            channel.push(p.clone()).await.unwrap();
        }
        // The write task is now stuck on the first frame with the rest queued.
        tokio::time::sleep(Duration::from_millis(50)).await;

        peer.write_frame(OpCode::Ping, &[]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut frames = Vec::new();
        for _ in 0..=payloads.len() {
            frames.push(peer.read_frame().await.unwrap());
        }

        let pongs: Vec<usize> = frames
            .iter()
            .enumerate()
            .filter(|(_, f)| f.op() == OpCode::Pong)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(pongs, [1], "pong must follow the in-flight frame only");
        assert!(frames[1].payload().is_empty());

        let data: Vec<Vec<u8>> = frames
            .into_iter()
            .filter(|f| f.op() == OpCode::Binary)
            .map(Frame::into_payload)
            .collect();
        assert_eq!(data, payloads);

        peer.set_read_deadline(Some(Instant::now() + Duration::from_secs(1)));
        assert!(peer.read_frame().await.unwrap_err().is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_timeout_ends_read_loop() {
        let (channel, mut peer) = channel_pair_sized("user_1", 16);
        channel.set_write_wait(Duration::from_millis(200));
        let (listener, _rx) = recorder();
        let handle = start(&channel, listener);
        wait_active(&channel).await;

        // The peer never drains, so this frame cannot be written in full.
        channel.push(vec![7; 64]).await.unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_timeout());

        // The cut-off frame is followed by end of stream, not by more frames.
        assert!(peer.read_frame().await.is_err());
        assert!(matches!(
            channel.push(b"late".to_vec()).await,
            Err(RelayError::ChannelClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_peer_close_frame_ends_read_loop() {
        let (channel, mut peer) = channel_pair("user_1");
        let (listener, _rx) = recorder();
        let handle = start(&channel, listener);

        peer.write_frame(OpCode::Close, b"bye").await.unwrap();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(RelayError::RemoteClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_read_timeout() {
        let (channel, _peer) = channel_pair("user_1");
        channel.set_read_wait(Duration::from_secs(1));
        let (listener, _rx) = recorder();

        let started = Instant::now();
        let err = channel.read_loop(listener).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_dispatch_and_reply() {
        let (channel, mut peer) = channel_pair("user_1");
        let _loop = start(&channel, Arc::new(Echo));

        peer.write_frame(OpCode::Binary, b"hello").await.unwrap();
        let frame = peer.read_frame().await.unwrap();
        assert_eq!(frame, Frame::binary("hello from server "));
    }

    #[tokio::test]
    async fn test_empty_payloads_are_dropped() {
        let (channel, mut peer) = channel_pair("user_1");
        let (listener, mut rx) = recorder();
        let _loop = start(&channel, listener);

        peer.write_frame(OpCode::Binary, &[]).await.unwrap();
        peer.write_frame(OpCode::Pong, b"ignored").await.unwrap();
        peer.write_frame(OpCode::Text, b"x").await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), b"x".to_vec());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_listener_panic_does_not_stop_read_loop() {
        let (channel, mut peer) = channel_pair("user_1");
        let handle = start(&channel, Arc::new(Panics));

        peer.write_frame(OpCode::Binary, b"boom").await.unwrap();
        peer.write_frame(OpCode::Ping, &[]).await.unwrap();

        // The loop is still alive and answering pings.
        assert_eq!(peer.read_frame().await.unwrap(), Frame::pong());
        assert!(!handle.is_finished());
    }
}
