//! Frame operation codes

use crate::error::RelayError;

/// Frame operation codes
///
/// Values match RFC 6455 so a frame read from either transport carries the same tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Continuation of a fragmented message
    Continuation = 0x0,
    /// UTF-8 text payload
    Text = 0x1,
    /// Opaque binary payload
    Binary = 0x2,
    /// Peer is closing the connection
    Close = 0x8,
    /// Liveness probe
    Ping = 0x9,
    /// Liveness acknowledgement
    Pong = 0xA,
}

impl OpCode {
    /// Create an `OpCode` from a raw byte
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    /// Get the raw byte value
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Control frames (close, ping, pong) never reach the message listener
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Continuation => "Continuation",
            Self::Text => "Text",
            Self::Binary => "Binary",
            Self::Close => "Close",
            Self::Ping => "Ping",
            Self::Pong => "Pong",
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = RelayError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u8(value).ok_or(RelayError::InvalidOpCode(value))
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:#x})", self.name(), self.as_u8())
    }
}
