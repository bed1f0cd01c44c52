//! Known evaluator and message-store nodes
//!
//! The directory is refreshed by an external collaborator (it pushes JSON
//! lists of `{id, fqdn, url}`); the protocol only reads snapshots of it.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{JodiError, Result};
use crate::utils::hash160;

/// 160-bit node identifier.
pub type NodeId = [u8; 20];

/// A protocol node as seen by providers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub fqdn: String,
    pub address: String,
    pub available: bool,
}

/// Directory entry in the refresh feed.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct DirectoryEntry {
    pub id: String,
    pub fqdn: String,
    pub url: String,
    #[serde(default, rename = "avail", skip_serializing_if = "Option::is_none")]
    pub available: Option<bool>,
}

impl Node {
    /// Node whose identity is derived from its network name.
    pub fn new(fqdn: impl Into<String>, address: impl Into<String>) -> Self {
        let fqdn = fqdn.into();
        Self {
            id: hash160(fqdn.as_bytes()),
            fqdn,
            address: address.into(),
            available: true,
        }
    }

    pub fn id_hex(&self) -> String {
        hex::encode(self.id)
    }

    pub fn to_entry(&self) -> DirectoryEntry {
        DirectoryEntry {
            id: self.id_hex(),
            fqdn: self.fqdn.clone(),
            url: self.address.clone(),
            available: Some(self.available),
        }
    }
}

impl TryFrom<DirectoryEntry> for Node {
    type Error = JodiError;

    fn try_from(entry: DirectoryEntry) -> Result<Self> {
        let bytes = hex::decode(&entry.id)
            .map_err(|e| JodiError::Serialization(format!("node id {:?} is not hex: {}", entry.id, e)))?;
        let id: NodeId = bytes.as_slice().try_into().map_err(|_| {
            JodiError::Serialization(format!(
                "node id must be 20 bytes, got {} for {}",
                bytes.len(),
                entry.fqdn
            ))
        })?;
        Ok(Self {
            id,
            fqdn: entry.fqdn,
            address: entry.url,
            available: entry.available.unwrap_or(true),
        })
    }
}

/// Snapshot of the evaluator and store lists.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeDirectory {
    pub evaluators: Vec<Node>,
    pub stores: Vec<Node>,
}

impl NodeDirectory {
    pub fn new(evaluators: Vec<Node>, stores: Vec<Node>) -> Self {
        Self { evaluators, stores }
    }

    /// Parse the JSON lists pushed by the directory collaborator.
    pub fn from_json(evaluators: &str, stores: &str) -> Result<Self> {
        Ok(Self {
            evaluators: parse_nodes(evaluators)?,
            stores: parse_nodes(stores)?,
        })
    }

    pub fn evaluators_json(&self) -> Result<String> {
        to_json(&self.evaluators)
    }

    pub fn stores_json(&self) -> Result<String> {
        to_json(&self.stores)
    }

    pub fn find(&self, id: &NodeId) -> Option<&Node> {
        self.evaluators
            .iter()
            .chain(self.stores.iter())
            .find(|node| &node.id == id)
    }
}

fn parse_nodes(json: &str) -> Result<Vec<Node>> {
    let entries: Vec<DirectoryEntry> = serde_json::from_str(json)?;
    entries.into_iter().map(Node::try_from).collect()
}

fn to_json(nodes: &[Node]) -> Result<String> {
    let entries: Vec<DirectoryEntry> = nodes.iter().map(Node::to_entry).collect();
    Ok(serde_json::to_string(&entries)?)
}

/// Directory handle shared between the refresher and protocol operations.
#[derive(Clone, Debug, Default)]
pub struct SharedDirectory {
    inner: Arc<RwLock<NodeDirectory>>,
}

impl SharedDirectory {
    pub fn new(directory: NodeDirectory) -> Self {
        Self {
            inner: Arc::new(RwLock::new(directory)),
        }
    }

    /// Consistent copy for the duration of one protocol operation.
    pub async fn snapshot(&self) -> NodeDirectory {
        self.inner.read().await.clone()
    }

    pub async fn replace(&self, directory: NodeDirectory) {
        *self.inner.write().await = directory;
    }

    /// Apply a refresh from the JSON feed; the old snapshot is kept on error.
    pub async fn refresh_from_json(&self, evaluators: &str, stores: &str) -> Result<()> {
        let directory = NodeDirectory::from_json(evaluators, stores)?;
        tracing::debug!(
            evaluators = directory.evaluators.len(),
            stores = directory.stores.len(),
            "node directory refreshed"
        );
        self.replace(directory).await;
        Ok(())
    }
}
