//! Server-side channels
//!
//! A channel owns one authenticated connection and serializes all writes to it.
//! The registry tracks every live channel on this node.

mod channel;
mod registry;

pub use channel::{
    Channel, ChannelState, DEFAULT_READ_WAIT, DEFAULT_WRITE_WAIT, WRITE_QUEUE_CAPACITY,
};
pub use registry::ChannelRegistry;
