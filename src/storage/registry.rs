use std::collections::BTreeMap;
use std::sync::Arc;

use log::info;

use crate::configuration::types::NodeConfig;
use crate::error_handling::types::StorageError;
use crate::storage::database_storage::SqliteNodeStorage;
use crate::storage::storage_trait::NodeBackend;

/// Node name to backend handle, passed explicitly to everything that queries nodes.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    nodes: BTreeMap<String, Arc<dyn NodeBackend>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens every configured node database.
    pub fn from_config(nodes: &[NodeConfig]) -> Result<Self, StorageError> {
        let mut registry = Self::new();
        for node in nodes {
            let backend = SqliteNodeStorage::open(&node.database)?;
            info!("Registered node {} ({})", node.name, node.database.display());
            registry.register(node.name.clone(), Arc::new(backend));
        }
        Ok(registry)
    }

    pub fn register<S: Into<String>>(&mut self, name: S, backend: Arc<dyn NodeBackend>) {
        self.nodes.insert(name.into(), backend);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn NodeBackend>> {
        self.nodes.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes that are both allow-listed and registered, in name order.
    pub fn authorized(&self, allowlist: &[String]) -> Vec<(String, Arc<dyn NodeBackend>)> {
        self.nodes
            .iter()
            .filter(|(name, _)| allowlist.iter().any(|allowed| allowed == *name))
            .map(|(name, backend)| (name.clone(), Arc::clone(backend)))
            .collect()
    }

    /// First registered node by name.
    pub fn first(&self) -> Option<(String, Arc<dyn NodeBackend>)> {
        self.nodes
            .iter()
            .next()
            .map(|(name, backend)| (name.clone(), Arc::clone(backend)))
    }
}
