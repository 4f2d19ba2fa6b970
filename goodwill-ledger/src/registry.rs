//! Node registry and leader election
//!
//! The registry is single-writer bookkeeping: nodes are recorded and a
//! leader is picked deterministically, but no node replicates another's
//! chain. Election is the lexicographically smallest registered ID and is
//! re-run after every registration and on load.

use crate::{
    error::{Error, Result},
    storage::Storage,
    types::Node,
};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Why a registration was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// Node ID already registered
    DuplicateId,
    /// Address already registered to another node
    DuplicateAddress,
}

/// Result of `register_node`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Registration {
    /// Node added; carries the leader elected afterwards
    Registered {
        /// Leader after re-election
        leader: Option<String>,
    },
    /// Nothing changed
    Conflict {
        /// Which uniqueness rule was hit
        reason: ConflictReason,
    },
}

#[derive(Debug, Default)]
struct RegistryState {
    nodes: BTreeMap<String, Node>,
    leader: Option<String>,
}

/// Persistent node registry
#[derive(Debug)]
pub struct NodeRegistry {
    storage: Arc<Storage>,
    state: Mutex<RegistryState>,
}

/// Smallest registered ID, if any
pub fn elect(nodes: &BTreeMap<String, Node>) -> Option<String> {
    nodes.keys().next().cloned()
}

impl NodeRegistry {
    /// Load registered nodes and elect a leader
    pub fn load(storage: Arc<Storage>) -> Result<Self> {
        let nodes: BTreeMap<String, Node> = storage
            .all_nodes()?
            .into_iter()
            .map(|node| (node.id.clone(), node))
            .collect();
        let leader = elect(&nodes);

        tracing::info!(nodes = nodes.len(), leader = ?leader, "Node registry loaded");

        Ok(Self {
            storage,
            state: Mutex::new(RegistryState { nodes, leader }),
        })
    }

    /// Register a node; duplicate ID or address is a conflict, not an error
    pub fn register(&self, id: &str, address: &str) -> Result<Registration> {
        let id = id.trim();
        let address = address.trim();
        if id.is_empty() || address.is_empty() {
            return Err(Error::InvalidInput(
                "node id and address must be non-empty".to_string(),
            ));
        }

        let mut state = self.state.lock();

        if state.nodes.contains_key(id) {
            tracing::warn!(node_id = id, "Node registration conflict: duplicate id");
            return Ok(Registration::Conflict {
                reason: ConflictReason::DuplicateId,
            });
        }
        if state.nodes.values().any(|n| n.address == address)
            || self.storage.node_id_for_address(address)?.is_some()
        {
            tracing::warn!(node_id = id, address, "Node registration conflict: duplicate address");
            return Ok(Registration::Conflict {
                reason: ConflictReason::DuplicateAddress,
            });
        }

        let node = Node {
            id: id.to_string(),
            address: address.to_string(),
            registered_at: Utc::now(),
        };

        let mut uow = self.storage.begin();
        uow.put_node(&node)?;
        uow.commit()?;

        state.nodes.insert(node.id.clone(), node);
        state.leader = elect(&state.nodes);

        tracing::info!(node_id = id, address, leader = ?state.leader, "Node registered");

        Ok(Registration::Registered {
            leader: state.leader.clone(),
        })
    }

    /// Re-run election and return the leader
    pub fn elect_leader(&self) -> Option<String> {
        let mut state = self.state.lock();
        state.leader = elect(&state.nodes);
        state.leader.clone()
    }

    /// Current leader
    pub fn leader(&self) -> Option<String> {
        self.state.lock().leader.clone()
    }

    /// Registered nodes, ordered by ID
    pub fn nodes(&self) -> Vec<Node> {
        self.state.lock().nodes.values().cloned().collect()
    }

    /// Number of registered nodes
    pub fn len(&self) -> usize {
        self.state.lock().nodes.len()
    }

    /// Whether no node is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
