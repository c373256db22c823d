//! Known backend servers and the media pools they form.

use tokio::sync::RwLock;
use voxmux_config::ServerConfig;

use crate::content::GlobalContent;

/// One backend the proxy can attach sessions to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub name: String,
    pub address: String,
    /// Resolved pool tag; never empty.
    pub media_pool: String,
    /// Servers tried, in order, when this one cannot be reached.
    pub fallbacks: Vec<String>,
    /// Registered at runtime rather than configured.
    pub dynamic: bool,
}

impl From<&ServerConfig> for ServerDescriptor {
    fn from(config: &ServerConfig) -> Self {
        Self {
            name: config.name.clone(),
            address: config.address.clone(),
            media_pool: config.pool().to_string(),
            fallbacks: config.fallbacks.clone(),
            dynamic: false,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DirectoryError {
    #[error("server {0:?} already exists")]
    Duplicate(String),
    #[error("media pool {0:?} was not multiplexed at startup")]
    UnknownPool(String),
    #[error("no server named {0:?}")]
    NotFound(String),
    #[error("server {0:?} is configured, not dynamic")]
    NotDynamic(String),
}

/// Ordered server list, shared by every session.
#[derive(Default)]
pub struct ServerDirectory {
    servers: RwLock<Vec<ServerDescriptor>>,
}

impl ServerDirectory {
    pub fn new(servers: Vec<ServerDescriptor>) -> Self {
        Self {
            servers: RwLock::new(servers),
        }
    }

    pub fn from_config(servers: &[ServerConfig]) -> Self {
        Self::new(servers.iter().map(ServerDescriptor::from).collect())
    }

    pub async fn get(&self, name: &str) -> Option<ServerDescriptor> {
        self.servers
            .read()
            .await
            .iter()
            .find(|s| s.name == name)
            .cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        self.servers.read().await.iter().map(|s| s.name.clone()).collect()
    }

    /// Pools in order of first appearance, each with its members in
    /// configuration order.
    pub async fn pools(&self) -> Vec<(String, Vec<ServerDescriptor>)> {
        let servers = self.servers.read().await;
        let mut pools: Vec<(String, Vec<ServerDescriptor>)> = Vec::new();
        for server in servers.iter() {
            match pools.iter_mut().find(|(pool, _)| *pool == server.media_pool) {
                Some((_, members)) => members.push(server.clone()),
                None => pools.push((server.media_pool.clone(), vec![server.clone()])),
            }
        }
        pools
    }

    /// Register a server at runtime. Its pool must already be part of the
    /// merged content, since the namespace is frozen.
    pub async fn add_dynamic(
        &self,
        mut server: ServerDescriptor,
        content: &GlobalContent,
    ) -> Result<(), DirectoryError> {
        if !content.has_pool(&server.media_pool) {
            return Err(DirectoryError::UnknownPool(server.media_pool));
        }
        let mut servers = self.servers.write().await;
        if servers.iter().any(|s| s.name == server.name) {
            return Err(DirectoryError::Duplicate(server.name));
        }
        server.dynamic = true;
        tracing::info!(server = %server.name, pool = %server.media_pool, "dynamic server added");
        servers.push(server);
        Ok(())
    }

    pub async fn remove_dynamic(&self, name: &str) -> Result<(), DirectoryError> {
        let mut servers = self.servers.write().await;
        let Some(index) = servers.iter().position(|s| s.name == name) else {
            return Err(DirectoryError::NotFound(name.to_string()));
        };
        if !servers[index].dynamic {
            return Err(DirectoryError::NotDynamic(name.to_string()));
        }
        servers.remove(index);
        tracing::info!(server = %name, "dynamic server removed");
        Ok(())
    }
}
