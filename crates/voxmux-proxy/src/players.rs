//! Process-wide registry of live player names.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::RwLock;

use crate::client::ClientLink;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("player {0:?} is already connected")]
    AlreadyConnected(String),
}

/// Maps player names to their sessions. A name can be held by at most one
/// live session.
#[derive(Default)]
pub struct PlayerRegistry {
    players: RwLock<HashMap<String, Weak<ClientLink>>>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `name` for `client`. Fails if another live session holds it.
    pub async fn register(&self, name: &str, client: &Arc<ClientLink>) -> Result<(), RegistryError> {
        let mut players = self.players.write().await;
        if players.get(name).is_some_and(|held| held.strong_count() > 0) {
            return Err(RegistryError::AlreadyConnected(name.to_string()));
        }
        players.insert(name.to_string(), Arc::downgrade(client));
        Ok(())
    }

    pub async fn remove(&self, name: &str) {
        self.players.write().await.remove(name);
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.players.read().await.contains_key(name)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<ClientLink>> {
        self.players.read().await.get(name).and_then(Weak::upgrade)
    }

    /// Names of all registered players, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.players.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.players.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.players.read().await.is_empty()
    }
}
