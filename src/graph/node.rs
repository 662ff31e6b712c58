//! Graph nodes

use super::property::{PropertyMap, PropertyValue};
use super::types::NodeId;
use crate::model::Label;
use serde::{Deserialize, Serialize};

/// A labelled node with its properties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub label: Label,
    pub properties: PropertyMap,
}

impl Node {
    pub fn new(id: NodeId, label: Label, properties: PropertyMap) -> Self {
        Node {
            id,
            label,
            properties,
        }
    }

    pub fn has_label(&self, label: Label) -> bool {
        self.label == label
    }

    pub fn get_property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    /// The domain `id` property, if it is an integer.
    pub fn domain_id(&self) -> Option<i64> {
        self.get_property("id").and_then(PropertyValue::as_integer)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_id() {
        let mut props = PropertyMap::new();
        props.insert("id".to_string(), PropertyValue::Integer(17));
        let node = Node::new(NodeId::new(1), Label::Customer, props);
        assert_eq!(node.domain_id(), Some(17));
        assert!(node.has_label(Label::Customer));
        assert!(!node.has_label(Label::Terminal));

        let bare = Node::new(NodeId::new(2), Label::Terminal, PropertyMap::new());
        assert_eq!(bare.domain_id(), None);
    }
}
