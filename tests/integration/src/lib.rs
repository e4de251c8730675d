//! Integration test utilities for the relay gateway
//!
//! This crate provides helpers for running end-to-end tests against a gateway
//! listening on a real socket.

pub mod helpers;

pub use helpers::*;
