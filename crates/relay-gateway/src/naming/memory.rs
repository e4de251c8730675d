//! In-process naming backend
//!
//! Keeps registrations in memory. Suitable for a single node and for tests; a
//! clustered deployment plugs in an implementation backed by its discovery system.

use super::{Naming, ServiceRegistration, SubscribeCallback};
use crate::error::{RelayError, RelayResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct MemoryNaming {
    /// Registrations keyed by service id
    services: DashMap<String, Arc<dyn ServiceRegistration>>,

    /// One watcher per service name
    subscribers: DashMap<String, SubscribeCallback>,
}

impl MemoryNaming {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn instances(&self, name: &str) -> Vec<Arc<dyn ServiceRegistration>> {
        let mut found: Vec<_> = self
            .services
            .iter()
            .filter(|r| r.value().service_name() == name)
            .map(|r| r.value().clone())
            .collect();
        found.sort_by(|a, b| a.service_id().cmp(b.service_id()));
        found
    }

    fn notify(&self, name: &str) {
        let Some(callback) = self.subscribers.get(name).map(|r| r.value().clone()) else {
            return;
        };
        let instances = self.instances(name);
        tracing::debug!(service = %name, instances = instances.len(), "Notifying subscriber");
        callback(instances);
    }
}

#[async_trait]
impl Naming for MemoryNaming {
    async fn find(&self, name: &str, tags: &[String]) -> RelayResult<Vec<Arc<dyn ServiceRegistration>>> {
        Ok(self
            .instances(name)
            .into_iter()
            .filter(|s| tags.iter().all(|tag| s.tags().contains(tag)))
            .collect())
    }

    async fn subscribe(&self, name: &str, callback: SubscribeCallback) -> RelayResult<()> {
        self.subscribers.insert(name.to_string(), callback);
        Ok(())
    }

    async fn unsubscribe(&self, name: &str) -> RelayResult<()> {
        self.subscribers.remove(name);
        Ok(())
    }

    async fn register(&self, service: Arc<dyn ServiceRegistration>) -> RelayResult<()> {
        let name = service.service_name().to_string();
        tracing::info!(
            service_id = %service.service_id(),
            service = %name,
            url = %service.dial_url(),
            "Service registered"
        );
        self.services.insert(service.service_id().to_string(), service);
        self.notify(&name);
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> RelayResult<()> {
        let (_, service) = self
            .services
            .remove(service_id)
            .ok_or_else(|| RelayError::Naming(format!("service {service_id} not found")))?;
        tracing::info!(service_id = %service_id, "Service deregistered");
        self.notify(service.service_name());
        Ok(())
    }
}

impl std::fmt::Debug for MemoryNaming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNaming")
            .field("services", &self.services.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::DefaultService;
    use parking_lot::Mutex;

    fn service(id: &str, name: &str) -> Arc<dyn ServiceRegistration> {
        Arc::new(DefaultService::new(id, name).with_endpoint("127.0.0.1", 9000))
    }

    #[tokio::test]
    async fn test_register_and_find() {
        let naming = MemoryNaming::new();
        naming.register(service("chat-2", "chat")).await.unwrap();
        naming.register(service("chat-1", "chat")).await.unwrap();
        naming.register(service("login-1", "login")).await.unwrap();

        let found = naming.find("chat", &[]).await.unwrap();
        let ids: Vec<_> = found.iter().map(|s| s.service_id()).collect();
        assert_eq!(ids, ["chat-1", "chat-2"]);

        assert!(naming.find("missing", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_filters_by_tags() {
        let naming = MemoryNaming::new();
        naming
            .register(Arc::new(DefaultService::new("a", "chat").with_tag("edge")))
            .await
            .unwrap();
        naming.register(service("b", "chat")).await.unwrap();

        let found = naming.find("chat", &["edge".to_string()]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].service_id(), "a");
    }

    #[tokio::test]
    async fn test_deregister() {
        let naming = MemoryNaming::new();
        naming.register(service("chat-1", "chat")).await.unwrap();
        naming.deregister("chat-1").await.unwrap();
        assert!(naming.find("chat", &[]).await.unwrap().is_empty());

        let err = naming.deregister("chat-1").await.unwrap_err();
        assert!(matches!(err, RelayError::Naming(_)));
    }

    #[tokio::test]
    async fn test_subscribe_notifications() {
        let naming = MemoryNaming::new();
        let seen: Arc<Mutex<Vec<usize>>> = Arc::default();

        let sink = seen.clone();
        let callback: SubscribeCallback =
            Arc::new(move |instances: Vec<Arc<dyn ServiceRegistration>>| {
                sink.lock().push(instances.len());
            });
        naming.subscribe("chat", callback).await.unwrap();

        naming.register(service("chat-1", "chat")).await.unwrap();
        naming.register(service("chat-2", "chat")).await.unwrap();
        naming.register(service("login-1", "login")).await.unwrap();
        naming.deregister("chat-1").await.unwrap();
        assert_eq!(*seen.lock(), vec![1, 2, 1]);

        naming.unsubscribe("chat").await.unwrap();
        naming.register(service("chat-3", "chat")).await.unwrap();
        assert_eq!(seen.lock().len(), 3);
    }
}
