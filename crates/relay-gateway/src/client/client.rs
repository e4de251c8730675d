//! Dialing-side connection
//!
//! The mirror image of a server channel: one instance connects once, then sends and
//! reads frames directly. A heartbeat task pings the gateway on a fixed interval,
//! sharing the writer lock with `send` so frames never interleave.

use super::dialer::{Dialer, DialerContext};
use crate::error::{RelayError, RelayResult};
use crate::naming::Service;
use crate::protocol::{Frame, OpCode};
use crate::task::spawn_supervised;
use crate::transport::{FrameReader, FrameWriter};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Client timeouts
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Ping interval; zero disables the heartbeat
    pub heartbeat: Duration,
    /// Idle timeout for `read`; zero disables it
    pub read_wait: Duration,
    /// Deadline for each write, pings included; zero disables it
    pub write_wait: Duration,
    /// Budget for connecting and sending the login frame
    pub dial_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(60),
            read_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(60),
            dial_timeout: Duration::from_secs(1),
        }
    }
}

impl ClientOptions {
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = interval;
        self
    }

    pub fn with_read_wait(mut self, wait: Duration) -> Self {
        self.read_wait = wait;
        self
    }

    pub fn with_write_wait(mut self, wait: Duration) -> Self {
        self.write_wait = wait;
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }
}

fn deadline(wait: Duration) -> Option<Instant> {
    (!wait.is_zero()).then(|| Instant::now() + wait)
}

type SharedWriter = Arc<Mutex<Option<Box<dyn FrameWriter>>>>;

pub struct Client {
    id: String,
    name: String,
    meta: HashMap<String, String>,
    options: ClientOptions,
    dialer: Arc<dyn Dialer>,

    /// Set once `connect` has been attempted successfully
    connected: AtomicBool,

    /// Set by `close`; a read in flight drops the read half when it sees this
    closed: AtomicBool,

    reader: Mutex<Option<Box<dyn FrameReader>>>,
    writer: SharedWriter,
    heartbeat: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        dialer: Arc<dyn Dialer>,
        options: ClientOptions,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            meta: HashMap::new(),
            options,
            dialer,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            reader: Mutex::new(None),
            writer: Arc::new(Mutex::new(None)),
            heartbeat: parking_lot::Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Replace the dial strategy; only meaningful before `connect`
    pub fn set_dialer(&mut self, dialer: Arc<dyn Dialer>) {
        self.dialer = dialer;
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Dial `address` and log in
    ///
    /// Succeeds at most once per client. A failed dial leaves the client
    /// unconnected so the call may be retried.
    pub async fn connect(&self, address: &str) -> RelayResult<()> {
        if self
            .connected
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RelayError::AlreadyConnected);
        }

        let ctx = DialerContext {
            id: self.id.clone(),
            name: self.name.clone(),
            address: address.to_string(),
            timeout: self.options.dial_timeout,
        };
        let conn = match self.dialer.dial_and_handshake(&ctx).await {
            Ok(conn) => conn,
            Err(e) => {
                self.connected.store(false, Ordering::Release);
                return Err(e);
            }
        };

        let (reader, writer) = conn.into_split();
        *self.reader.lock().await = Some(reader);
        *self.writer.lock().await = Some(writer);
        tracing::info!(id = %self.id, address = %address, "Client connected");

        if !self.options.heartbeat.is_zero() {
            let handle = spawn_supervised(
                "client-heartbeat",
                heartbeat_loop(
                    self.id.clone(),
                    self.writer.clone(),
                    self.options.heartbeat,
                    self.options.write_wait,
                ),
            );
            *self.heartbeat.lock() = Some(handle);
        }
        Ok(())
    }

    /// Write one binary frame
    pub async fn send(&self, payload: &[u8]) -> RelayResult<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(RelayError::NotConnected)?;
        writer.set_write_deadline(deadline(self.options.write_wait));
        writer.write_frame(OpCode::Binary, payload).await?;
        writer.flush().await
    }

    /// Block for the next frame
    ///
    /// Pongs answering the heartbeat are skipped. A close frame from the gateway is
    /// an error.
    pub async fn read(&self) -> RelayResult<Frame> {
        let mut guard = self.reader.lock().await;
        loop {
            let reader = guard.as_mut().ok_or(RelayError::NotConnected)?;
            reader.set_read_deadline(deadline(self.options.read_wait));
            let result = reader.read_frame().await;
            if self.closed.load(Ordering::Acquire) {
                guard.take();
                return Err(RelayError::NotConnected);
            }
            let frame = result?;
            match frame.op() {
                OpCode::Close => return Err(RelayError::RemoteClosed),
                OpCode::Pong => continue,
                _ => return Ok(frame),
            }
        }
    }

    /// Stop the heartbeat and shut the transport down
    ///
    /// The read half is released here, or by a concurrent `read` as soon as it
    /// returns, which then fails with `NotConnected`.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(handle) = self.heartbeat.lock().take() {
            handle.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.close().await {
                tracing::debug!(id = %self.id, error = %e, "Client close failed");
            }
        }
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        tracing::debug!(id = %self.id, "Client closed");
    }
}

/// Ping on every tick until a write fails or the client closes
async fn heartbeat_loop(id: String, writer: SharedWriter, interval: Duration, write_wait: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    loop {
        ticker.tick().await;

        let mut guard = writer.lock().await;
        let Some(half) = guard.as_mut() else {
            return;
        };
        half.set_write_deadline(deadline(write_wait));
        tracing::trace!(id = %id, "Sending ping");

        let result = match half.write_frame(OpCode::Ping, &[]).await {
            Ok(()) => half.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(id = %id, error = %e, "Heartbeat stopped");
            return;
        }
    }
}

impl Service for Client {
    fn service_id(&self) -> &str {
        &self.id
    }

    fn service_name(&self) -> &str {
        &self.name
    }

    fn meta(&self) -> &HashMap<String, String> {
        &self.meta
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .field("options", &self.options)
            .finish()
    }
}
