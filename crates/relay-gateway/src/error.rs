//! Error types
//!
//! `RelayError` covers everything that can go wrong on a single connection or
//! routing call. `GatewayError` covers process startup.

use relay_common::ConfigError;
use thiserror::Error;

/// Per-connection and protocol errors
#[derive(Debug, Error)]
pub enum RelayError {
    /// Underlying socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A read or write deadline elapsed
    #[error("I/O deadline exceeded")]
    Timeout,

    /// Push or close on a channel that is not active
    #[error("channel {0} has closed")]
    ChannelClosed(String),

    /// Second call to `read_loop`
    #[error("channel {0} has started")]
    AlreadyStarted(String),

    /// Peer sent a close frame
    #[error("remote side closed the channel")]
    RemoteClosed,

    /// Frame length prefix above `MAX_FRAME_SIZE`
    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    /// Unknown opcode byte on the TCP transport
    #[error("invalid opcode: {0:#x}")]
    InvalidOpCode(u8),

    /// Acceptor rejected the handshake
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Another live channel already owns this id
    #[error("channel id {0} is repeated")]
    DuplicateId(String),

    /// No local channel for this id
    #[error("channel {0} not found")]
    ChannelNotFound(String),

    /// Client used before `connect`
    #[error("client is not connected")]
    NotConnected,

    /// Second call to `Client::connect`
    #[error("client has connected")]
    AlreadyConnected,

    /// Dialing or handshake failure
    #[error("dial error: {0}")]
    Dial(String),

    /// WebSocket protocol library error
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Naming backend error
    #[error("naming error: {0}")]
    Naming(String),

    /// Selector was given an empty candidate set
    #[error("no candidate services for {0}")]
    NoCandidates(String),
}

impl RelayError {
    /// Check whether this error came from an elapsed deadline
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    /// Stable machine-readable code
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "IO_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::ChannelClosed(_) => "CHANNEL_CLOSED",
            Self::AlreadyStarted(_) => "ALREADY_STARTED",
            Self::RemoteClosed => "REMOTE_CLOSED",
            Self::FrameTooLarge(_) => "FRAME_TOO_LARGE",
            Self::InvalidOpCode(_) => "INVALID_OPCODE",
            Self::InvalidCredentials(_) => "INVALID_CREDENTIALS",
            Self::DuplicateId(_) => "DUPLICATE_ID",
            Self::ChannelNotFound(_) => "CHANNEL_NOT_FOUND",
            Self::NotConnected => "NOT_CONNECTED",
            Self::AlreadyConnected => "ALREADY_CONNECTED",
            Self::Dial(_) => "DIAL_ERROR",
            Self::WebSocket(_) => "WEBSOCKET_ERROR",
            Self::Naming(_) => "NAMING_ERROR",
            Self::NoCandidates(_) => "NO_CANDIDATES",
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::Io(e) => Self::Io(e),
            WsError::ConnectionClosed | WsError::AlreadyClosed => Self::RemoteClosed,
            other => Self::WebSocket(other.to_string()),
        }
    }
}

impl From<axum::Error> for RelayError {
    fn from(err: axum::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

/// Result type for connection-level operations
pub type RelayResult<T> = Result<T, RelayError>;

/// Startup and orchestration errors
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Server(String),

    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error("container is {0}")]
    InvalidState(&'static str),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl GatewayError {
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Bind { .. } => "BIND_ERROR",
            Self::Server(_) => "SERVER_ERROR",
            Self::MissingCollaborator(_) => "MISSING_COLLABORATOR",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::Relay(e) => e.error_code(),
        }
    }
}

/// Result type for startup operations
pub type GatewayResult<T> = Result<T, GatewayError>;
