//! Frame protocol shared by every transport
//!
//! Opcodes mirror the WebSocket opcode space so that TCP and WebSocket
//! connections present the same vocabulary to the application layer.

mod frame;
mod opcode;

pub use frame::{Frame, MAX_FRAME_SIZE};
pub use opcode::OpCode;
