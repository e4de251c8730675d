//! Service naming and discovery
//!
//! The gateway only publishes its own descriptor and resolves candidate sets for
//! routing; storage and transport of registrations belong to the backend.

mod memory;
mod service;

pub use memory::MemoryNaming;
pub use service::{DefaultService, Service, ServiceRegistration};

use crate::error::RelayResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Called with the full instance list of a service name whenever it changes
pub type SubscribeCallback = Arc<dyn Fn(Vec<Arc<dyn ServiceRegistration>>) + Send + Sync>;

/// Naming backend
#[async_trait]
pub trait Naming: Send + Sync {
    /// Instances of `name` carrying every tag in `tags`; empty when none match
    async fn find(&self, name: &str, tags: &[String]) -> RelayResult<Vec<Arc<dyn ServiceRegistration>>>;

    /// Watch `name`, replacing any previous watcher
    async fn subscribe(&self, name: &str, callback: SubscribeCallback) -> RelayResult<()>;

    async fn unsubscribe(&self, name: &str) -> RelayResult<()>;

    async fn register(&self, service: Arc<dyn ServiceRegistration>) -> RelayResult<()>;

    /// Fails with `RelayError::Naming` when `service_id` is unknown
    async fn deregister(&self, service_id: &str) -> RelayResult<()>;
}
