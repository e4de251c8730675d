//! Service descriptors

use relay_common::Protocol;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Anything addressable by service id and name
pub trait Service: Send + Sync {
    fn service_id(&self) -> &str;

    fn service_name(&self) -> &str;

    fn meta(&self) -> &HashMap<String, String>;
}

/// A service that can be published to a naming backend
pub trait ServiceRegistration: Service {
    fn public_address(&self) -> &str;

    fn public_port(&self) -> u16;

    fn protocol(&self) -> Protocol;

    fn namespace(&self) -> &str;

    fn tags(&self) -> &[String];

    /// URL a peer dials to reach this service
    fn dial_url(&self) -> String {
        match self.protocol() {
            Protocol::Ws => format!("ws://{}:{}", self.public_address(), self.public_port()),
            Protocol::Tcp => format!("{}:{}", self.public_address(), self.public_port()),
        }
    }

    /// Only services with a public endpoint are published
    fn is_publishable(&self) -> bool {
        !self.public_address().is_empty() && self.public_port() != 0
    }
}

/// Plain service descriptor
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DefaultService {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

impl DefaultService {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_endpoint(mut self, address: impl Into<String>, port: u16) -> Self {
        self.address = address.into();
        self.port = port;
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Copy any registration into a plain descriptor
    pub fn from_registration(service: &dyn ServiceRegistration) -> Self {
        Self {
            id: service.service_id().to_string(),
            name: service.service_name().to_string(),
            address: service.public_address().to_string(),
            port: service.public_port(),
            protocol: service.protocol(),
            namespace: service.namespace().to_string(),
            tags: service.tags().to_vec(),
            meta: service.meta().clone(),
        }
    }
}

impl From<&relay_common::RelayConfig> for DefaultService {
    fn from(config: &relay_common::RelayConfig) -> Self {
        let service = &config.service;
        Self {
            id: service.id.clone(),
            name: service.name.clone(),
            address: service.public_address.clone().unwrap_or_default(),
            port: service.public_port.unwrap_or_default(),
            protocol: config.gateway.protocol,
            namespace: service.namespace.clone(),
            tags: Vec::new(),
            meta: HashMap::new(),
        }
    }
}

impl Service for DefaultService {
    fn service_id(&self) -> &str {
        &self.id
    }

    fn service_name(&self) -> &str {
        &self.name
    }

    fn meta(&self) -> &HashMap<String, String> {
        &self.meta
    }
}

impl ServiceRegistration for DefaultService {
    fn public_address(&self) -> &str {
        &self.address
    }

    fn public_port(&self) -> u16 {
        self.port
    }

    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn tags(&self) -> &[String] {
        &self.tags
    }
}

impl fmt::Display for DefaultService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Id:{},Name:{},Address:{},Port:{},Ns:{},Tags:{:?}",
            self.id, self.name, self.address, self.port, self.namespace, self.tags
        )
    }
}
