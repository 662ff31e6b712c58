//! In-memory property graph
//!
//! Adjacency lists plus a label index and optional B-tree property indexes:
//! - nodes: NodeId -> Node
//! - edges: EdgeId -> Edge
//! - outgoing / incoming: NodeId -> [EdgeId]
//! - label_index: Label -> {NodeId}
//!
//! Ordered maps keep iteration deterministic, so query results over the
//! same graph never depend on hash seeds.

use super::edge::Edge;
use super::index::{IndexKey, IndexRegistry};
use super::node::Node;
use super::property::{PropertyMap, PropertyValue};
use super::types::{EdgeId, NodeId};
use crate::model::{EdgeType, Label};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Errors that can occur during graph operations
#[derive(Error, Debug, PartialEq)]
pub enum GraphError {
    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    #[error("Edge {0} not found")]
    EdgeNotFound(EdgeId),

    #[error("Invalid edge: source node {0} does not exist")]
    InvalidEdgeSource(NodeId),

    #[error("Invalid edge: target node {0} does not exist")]
    InvalidEdgeTarget(NodeId),

    #[error("Cannot delete node {0}: it still has relationships")]
    NodeHasRelationships(NodeId),
}

pub type GraphResult<T> = Result<T, GraphError>;

/// How node lookups by property were served
#[derive(Debug, Default)]
pub struct LookupStats {
    indexed: AtomicU64,
    scanned: AtomicU64,
}

impl LookupStats {
    /// Lookups answered from a property index
    pub fn indexed(&self) -> u64 {
        self.indexed.load(Ordering::Relaxed)
    }

    /// Lookups that had to scan every node of the label
    pub fn scanned(&self) -> u64 {
        self.scanned.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct PropertyGraph {
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeMap<EdgeId, Edge>,
    outgoing: HashMap<NodeId, Vec<EdgeId>>,
    incoming: HashMap<NodeId, Vec<EdgeId>>,
    label_index: HashMap<Label, BTreeSet<NodeId>>,
    indexes: IndexRegistry,
    stats: LookupStats,
    next_node_id: u64,
    next_edge_id: u64,
}

impl PropertyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a node with a label and properties
    pub fn create_node(&mut self, label: Label, properties: PropertyMap) -> NodeId {
        let id = NodeId::new(self.next_node_id);
        self.next_node_id += 1;
        self.insert_node(Node::new(id, label, properties));
        id
    }

    /// Put a previously removed node back, keeping its id
    pub fn restore_node(&mut self, node: Node) {
        self.next_node_id = self.next_node_id.max(node.id.as_u64() + 1);
        self.insert_node(node);
    }

    fn insert_node(&mut self, node: Node) {
        let id = node.id;
        self.label_index.entry(node.label).or_default().insert(id);
        for key in self.indexes.keys_for(node.label) {
            if let Some(value) = node.get_property(&key.property) {
                if let Some(index) = self.indexes.get_mut(&key) {
                    index.insert(value.clone(), id);
                }
            }
        }
        self.outgoing.entry(id).or_default();
        self.incoming.entry(id).or_default();
        self.nodes.insert(id, node);
    }

    /// Remove a node. Fails while relationships still reference it.
    pub fn remove_node(&mut self, id: NodeId) -> GraphResult<Node> {
        if !self.nodes.contains_key(&id) {
            return Err(GraphError::NodeNotFound(id));
        }
        let attached = self.outgoing.get(&id).map_or(0, Vec::len)
            + self.incoming.get(&id).map_or(0, Vec::len);
        if attached > 0 {
            return Err(GraphError::NodeHasRelationships(id));
        }

        let node = self.nodes.remove(&id).ok_or(GraphError::NodeNotFound(id))?;
        if let Some(ids) = self.label_index.get_mut(&node.label) {
            ids.remove(&id);
        }
        for key in self.indexes.keys_for(node.label) {
            if let Some(value) = node.get_property(&key.property) {
                if let Some(index) = self.indexes.get_mut(&key) {
                    index.remove(value, id);
                }
            }
        }
        self.outgoing.remove(&id);
        self.incoming.remove(&id);
        Ok(node)
    }

    /// Create a directed edge between two existing nodes
    pub fn create_edge(
        &mut self,
        source: NodeId,
        target: NodeId,
        edge_type: EdgeType,
    ) -> GraphResult<EdgeId> {
        let id = EdgeId::new(self.next_edge_id);
        let edge = Edge::new(id, source, target, edge_type);
        self.insert_edge(edge)?;
        self.next_edge_id += 1;
        Ok(id)
    }

    /// Put a previously removed edge back, keeping its id
    pub fn restore_edge(&mut self, edge: Edge) -> GraphResult<()> {
        self.insert_edge(edge)?;
        self.next_edge_id = self.next_edge_id.max(edge.id.as_u64() + 1);
        Ok(())
    }

    fn insert_edge(&mut self, edge: Edge) -> GraphResult<()> {
        if !self.nodes.contains_key(&edge.source) {
            return Err(GraphError::InvalidEdgeSource(edge.source));
        }
        if !self.nodes.contains_key(&edge.target) {
            return Err(GraphError::InvalidEdgeTarget(edge.target));
        }
        self.outgoing.entry(edge.source).or_default().push(edge.id);
        self.incoming.entry(edge.target).or_default().push(edge.id);
        self.edges.insert(edge.id, edge);
        Ok(())
    }

    pub fn remove_edge(&mut self, id: EdgeId) -> GraphResult<Edge> {
        let edge = self.edges.remove(&id).ok_or(GraphError::EdgeNotFound(id))?;
        if let Some(adj) = self.outgoing.get_mut(&edge.source) {
            adj.retain(|&eid| eid != id);
        }
        if let Some(adj) = self.incoming.get_mut(&edge.target) {
            adj.retain(|&eid| eid != id);
        }
        Ok(edge)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn edge_ids(&self) -> Vec<EdgeId> {
        self.edges.keys().copied().collect()
    }

    /// Nodes with a label, in id order
    pub fn nodes_by_label(&self, label: Label) -> impl Iterator<Item = &Node> {
        self.label_index
            .get(&label)
            .into_iter()
            .flatten()
            .filter_map(|id| self.nodes.get(id))
    }

    /// Outgoing edges of a node, optionally restricted to one type
    pub fn outgoing(&self, id: NodeId, edge_type: Option<EdgeType>) -> impl Iterator<Item = &Edge> {
        self.adjacent(self.outgoing.get(&id), edge_type)
    }

    /// Incoming edges of a node, optionally restricted to one type
    pub fn incoming(&self, id: NodeId, edge_type: Option<EdgeType>) -> impl Iterator<Item = &Edge> {
        self.adjacent(self.incoming.get(&id), edge_type)
    }

    /// Every edge touching a node, in either direction
    pub fn edges_of(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.outgoing(id, None).chain(self.incoming(id, None))
    }

    fn adjacent<'a>(
        &'a self,
        ids: Option<&'a Vec<EdgeId>>,
        edge_type: Option<EdgeType>,
    ) -> impl Iterator<Item = &'a Edge> + 'a {
        ids.into_iter()
            .flatten()
            .filter_map(move |id| self.edges.get(id))
            .filter(move |edge| edge_type.map_or(true, |t| edge.edge_type == t))
    }

    /// Nodes of `label` whose `property` equals `value`.
    ///
    /// Served from a property index when one exists, otherwise by scanning
    /// the label. `stats()` records which path was taken.
    pub fn find_nodes(&self, label: Label, property: &str, value: &PropertyValue) -> Vec<NodeId> {
        let key = IndexKey::new(label, property);
        if let Some(index) = self.indexes.get(&key) {
            self.stats.indexed.fetch_add(1, Ordering::Relaxed);
            return index.get(value);
        }
        self.stats.scanned.fetch_add(1, Ordering::Relaxed);
        self.nodes_by_label(label)
            .filter(|node| node.get_property(property) == Some(value))
            .map(|node| node.id)
            .collect()
    }

    /// Create a property index and backfill it. Returns `false` if it
    /// already existed.
    pub fn create_index(&mut self, label: Label, property: &str) -> bool {
        let key = IndexKey::new(label, property);
        if !self.indexes.create(key.clone()) {
            return false;
        }
        let entries: Vec<(PropertyValue, NodeId)> = self
            .nodes_by_label(label)
            .filter_map(|node| node.get_property(property).map(|v| (v.clone(), node.id)))
            .collect();
        if let Some(index) = self.indexes.get_mut(&key) {
            for (value, id) in entries {
                index.insert(value, id);
            }
        }
        true
    }

    pub fn drop_index(&mut self, label: Label, property: &str) -> bool {
        self.indexes.drop_index(&IndexKey::new(label, property))
    }

    pub fn has_index(&self, label: Label, property: &str) -> bool {
        self.indexes.contains(&IndexKey::new(label, property))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn count_by_label(&self, label: Label) -> usize {
        self.label_index.get(&label).map_or(0, BTreeSet::len)
    }

    pub fn count_by_type(&self, edge_type: EdgeType) -> usize {
        self.edges.values().filter(|e| e.edge_type == edge_type).count()
    }

    pub fn stats(&self) -> &LookupStats {
        &self.stats
    }
}
