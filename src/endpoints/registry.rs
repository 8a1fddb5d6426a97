//! # Endpoint registry: name → endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::ConfigurationError;

use super::endpoint::MessageEndpoint;

/// Registers and resolves endpoints by name.
#[async_trait]
pub trait EndpointRegistry: Send + Sync + 'static {
    /// Registers `endpoint` under `name`, replacing any previous entry.
    async fn register_endpoint(
        &self,
        name: &str,
        endpoint: Arc<MessageEndpoint>,
    ) -> Result<(), ConfigurationError>;

    /// Removes and returns the endpoint registered under `name`.
    async fn unregister_endpoint(&self, name: &str) -> Option<Arc<MessageEndpoint>>;

    /// Returns the endpoint registered under `name`.
    async fn lookup_endpoint(&self, name: &str) -> Option<Arc<MessageEndpoint>>;

    /// Sorted names of all registered endpoints.
    async fn endpoint_names(&self) -> Vec<String>;
}

/// Concurrent in-memory [`EndpointRegistry`].
#[derive(Default)]
pub struct DefaultEndpointRegistry {
    endpoints: RwLock<HashMap<String, Arc<MessageEndpoint>>>,
}

impl DefaultEndpointRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an endpoint, naming it; returns the entry it replaced.
    pub async fn insert(
        &self,
        name: &str,
        endpoint: Arc<MessageEndpoint>,
    ) -> Result<Option<Arc<MessageEndpoint>>, ConfigurationError> {
        endpoint.assign_name(name)?;
        Ok(self
            .endpoints
            .write()
            .await
            .insert(name.to_string(), endpoint))
    }
}

#[async_trait]
impl EndpointRegistry for DefaultEndpointRegistry {
    async fn register_endpoint(
        &self,
        name: &str,
        endpoint: Arc<MessageEndpoint>,
    ) -> Result<(), ConfigurationError> {
        self.insert(name, endpoint).await.map(|_| ())
    }

    async fn unregister_endpoint(&self, name: &str) -> Option<Arc<MessageEndpoint>> {
        self.endpoints.write().await.remove(name)
    }

    async fn lookup_endpoint(&self, name: &str) -> Option<Arc<MessageEndpoint>> {
        self.endpoints.read().await.get(name).cloned()
    }

    async fn endpoint_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.endpoints.read().await.keys().cloned().collect();
        names.sort_unstable();
        names
    }
}
