//! # relay-gateway
//!
//! Real-time messaging gateway. Accepts TCP or WebSocket connections, authenticates
//! them into channels, relays binary payloads between peers and an application
//! listener, and routes connection ids to their owning node across a cluster.

pub mod channel;
pub mod client;
pub mod container;
pub mod error;
pub mod listener;
pub mod naming;
pub mod protocol;
pub mod selector;
pub mod server;
pub mod task;
pub mod transport;

pub use channel::{Channel, ChannelRegistry, ChannelState};
pub use client::{Client, ClientOptions, Dialer, DialerContext, TcpDialer, WsDialer};
pub use container::{Container, ContainerState};
pub use error::{GatewayError, GatewayResult, RelayError, RelayResult};
pub use listener::{Acceptor, Agent, DefaultAcceptor, MessageListener, StateListener};
pub use naming::{DefaultService, MemoryNaming, Naming, Service, ServiceRegistration};
pub use protocol::{Frame, OpCode};
pub use selector::{hash_code, HashSelector, Header, Selector};
pub use server::{Server, ServerBuilder, ServerOptions};
pub use transport::Conn;
