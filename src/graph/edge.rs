//! Directed, typed relationships

use super::types::{EdgeId, NodeId};
use crate::model::EdgeType;
use serde::{Deserialize, Serialize};

/// A directed edge. Relationships in this graph carry no properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub edge_type: EdgeType,
}

impl Edge {
    pub fn new(id: EdgeId, source: NodeId, target: NodeId, edge_type: EdgeType) -> Self {
        Edge {
            id,
            source,
            target,
            edge_type,
        }
    }

    /// The endpoint opposite to `node`, ignoring direction.
    pub fn other_end(&self, node: NodeId) -> NodeId {
        if self.source == node {
            self.target
        } else {
            self.source
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_other_end() {
        let edge = Edge::new(EdgeId::new(1), NodeId::new(10), NodeId::new(20), EdgeType::HasTx);
        assert_eq!(edge.other_end(NodeId::new(10)), NodeId::new(20));
        assert_eq!(edge.other_end(NodeId::new(20)), NodeId::new(10));
    }
}
