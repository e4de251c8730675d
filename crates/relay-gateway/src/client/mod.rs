//! Connecting side: client and dial strategies

mod client;
mod dialer;

pub use client::{Client, ClientOptions};
pub use dialer::{Dialer, DialerContext, TcpDialer, WsDialer};
