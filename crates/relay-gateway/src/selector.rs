//! Cluster routing
//!
//! Maps a connection id to the service instance that owns it. The mapping is a
//! plain `crc32(id) mod n`, so it is stable only while the candidate set is.

use crate::naming::Service;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Routing header carried with every forwarded message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub command: String,
    pub channel_id: String,
    #[serde(default)]
    pub sequence: u32,
}

impl Header {
    pub fn new(command: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            channel_id: channel_id.into(),
            sequence: 0,
        }
    }
}

/// Picks the owning instance for a header
pub trait Selector: Send + Sync {
    /// Return the id of the chosen service, or `None` when there are no candidates
    fn lookup(&self, header: &Header, services: &[Arc<dyn Service>]) -> Option<String>;
}

/// CRC32 (IEEE) of `key`
pub fn hash_code(key: &str) -> u32 {
    crc32fast::hash(key.as_bytes())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HashSelector;

impl Selector for HashSelector {
    fn lookup(&self, header: &Header, services: &[Arc<dyn Service>]) -> Option<String> {
        if services.is_empty() {
            return None;
        }
        let index = hash_code(&header.channel_id) as usize % services.len();
        Some(services[index].service_id().to_string())
    }
}
