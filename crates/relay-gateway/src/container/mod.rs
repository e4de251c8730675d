//! Startup orchestration
//!
//! A `Container` ties a [`Server`] to a naming backend: it starts the server,
//! publishes the server's descriptor, and keeps the candidate set of every
//! dependency service fresh so messages can be routed with a [`Selector`].

use crate::error::{GatewayError, GatewayResult, RelayError, RelayResult};
use crate::naming::{DefaultService, Naming, Service, ServiceRegistration, SubscribeCallback};
use crate::selector::{HashSelector, Header, Selector};
use crate::server::Server;
use crate::task::spawn_supervised;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Container lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContainerState {
    Uninitialized = 0,
    Initialized = 1,
    Started = 2,
    Closed = 3,
}

impl ContainerState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::Initialized,
            2 => Self::Started,
            _ => Self::Closed,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Started => "started",
            Self::Closed => "closed",
        }
    }
}

/// Instances of each dependency, keyed by service name
type Candidates = Arc<DashMap<String, Vec<Arc<dyn Service>>>>;

pub struct Container {
    server: Server,
    naming: Arc<dyn Naming>,
    selector: Arc<dyn Selector>,
    dependencies: BTreeSet<String>,
    state: AtomicU8,
    candidates: Candidates,
    server_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

fn snapshot(instances: &[Arc<dyn ServiceRegistration>]) -> Vec<Arc<dyn Service>> {
    instances
        .iter()
        .map(|s| Arc::new(DefaultService::from_registration(s.as_ref())) as Arc<dyn Service>)
        .collect()
}

impl Container {
    pub fn new(server: Server, naming: Arc<dyn Naming>) -> Self {
        let service = server.service();
        tracing::info!(service_id = %service.id, service = %service.name, "Container initialized");
        Self {
            server,
            naming,
            selector: Arc::new(HashSelector),
            dependencies: BTreeSet::new(),
            state: AtomicU8::new(ContainerState::Initialized as u8),
            candidates: Arc::new(DashMap::new()),
            server_task: parking_lot::Mutex::new(None),
        }
    }

    pub fn with_selector(mut self, selector: Arc<dyn Selector>) -> Self {
        self.selector = selector;
        self
    }

    /// Services this node routes to; duplicates are ignored
    pub fn with_dependencies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn state(&self) -> ContainerState {
        ContainerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(String::as_str)
    }

    fn transition(&self, from: ContainerState, to: ContainerState) -> GatewayResult<()> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|current| GatewayError::InvalidState(ContainerState::from_u8(current).as_str()))
    }

    /// Start serving, resolve dependencies and publish this node
    ///
    /// Bind and naming failures are returned; the server is stopped again in
    /// that case.
    pub async fn start(&self) -> GatewayResult<()> {
        self.transition(ContainerState::Initialized, ContainerState::Started)?;

        let listener = match self.server.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                self.state.store(ContainerState::Closed as u8, Ordering::Release);
                return Err(e);
            }
        };

        let server = self.server.clone();
        let handle = spawn_supervised("gateway-server", async move {
            if let Err(e) = server.serve(listener).await {
                tracing::error!(error = %e, "Gateway server failed");
            }
        });
        *self.server_task.lock() = Some(handle);

        if let Err(e) = self.connect_naming().await {
            tracing::error!(error = %e, "Naming setup failed");
            let _ = self.server.shutdown().await;
            self.state.store(ContainerState::Closed as u8, Ordering::Release);
            return Err(e.into());
        }

        tracing::info!(
            dependencies = ?self.dependencies,
            "Container started"
        );
        Ok(())
    }

    async fn connect_naming(&self) -> RelayResult<()> {
        for name in &self.dependencies {
            let found = self.naming.find(name, &[]).await?;
            tracing::info!(service = %name, instances = found.len(), "Dependency resolved");
            self.candidates.insert(name.clone(), snapshot(&found));

            let candidates = self.candidates.clone();
            let key = name.clone();
            let callback: SubscribeCallback = Arc::new(move |instances: Vec<Arc<dyn ServiceRegistration>>| {
                tracing::debug!(service = %key, instances = instances.len(), "Dependency changed");
                candidates.insert(key.clone(), snapshot(&instances));
            });
            self.naming.subscribe(name, callback).await?;
        }

        let service = self.server.service();
        if service.is_publishable() {
            self.naming.register(service).await?;
        }
        Ok(())
    }

    /// Current instances of a dependency
    pub fn candidates(&self, service_name: &str) -> Vec<Arc<dyn Service>> {
        self.candidates
            .get(service_name)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    /// Id of the `service_name` instance that owns `header.channel_id`
    pub fn lookup(&self, service_name: &str, header: &Header) -> RelayResult<String> {
        let candidates = self.candidates(service_name);
        self.selector
            .lookup(header, &candidates)
            .ok_or_else(|| RelayError::NoCandidates(service_name.to_string()))
    }

    /// Withdraw from naming and stop the server
    pub async fn shutdown(&self) -> GatewayResult<()> {
        self.transition(ContainerState::Started, ContainerState::Closed)?;

        let service = self.server.service();
        if service.is_publishable() {
            if let Err(e) = self.naming.deregister(&service.id).await {
                tracing::warn!(error = %e, "Failed to deregister");
            }
        }
        for name in &self.dependencies {
            if let Err(e) = self.naming.unsubscribe(name).await {
                tracing::warn!(service = %name, error = %e, "Failed to unsubscribe");
            }
        }

        self.server.shutdown().await?;
        let handle = self.server_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        tracing::info!("Container shut down");
        Ok(())
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("server", &self.server)
            .field("state", &self.state())
            .field("dependencies", &self.dependencies)
            .finish()
    }
}
