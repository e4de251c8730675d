//! Frame envelope

use super::OpCode;

/// Largest payload accepted by the length-prefixed TCP transport (16 MiB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// One discrete message: an opcode plus a payload
///
/// Frames are immutable once built; the payload may be empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    op: OpCode,
    payload: Vec<u8>,
}

impl Frame {
    #[must_use]
    pub fn new(op: OpCode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            op,
            payload: payload.into(),
        }
    }

    #[must_use]
    pub fn binary(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(OpCode::Binary, payload)
    }

    #[must_use]
    pub fn ping() -> Self {
        Self::new(OpCode::Ping, Vec::new())
    }

    #[must_use]
    pub fn pong() -> Self {
        Self::new(OpCode::Pong, Vec::new())
    }

    #[must_use]
    pub fn close(reason: impl Into<Vec<u8>>) -> Self {
        Self::new(OpCode::Close, reason)
    }

    #[must_use]
    pub fn op(&self) -> OpCode {
        self.op
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}
