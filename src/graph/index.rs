//! B-tree property indexes
//!
//! One index per (label, property). Lookups on an indexed key are
//! `O(log n)`; unindexed lookups fall back to a label scan in the store.

use super::property::PropertyValue;
use super::types::NodeId;
use crate::model::Label;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Index for one property of one label
#[derive(Debug, Clone, Default)]
pub struct PropertyIndex {
    index: BTreeMap<PropertyValue, BTreeSet<NodeId>>,
}

impl PropertyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: PropertyValue, node_id: NodeId) {
        self.index.entry(value).or_default().insert(node_id);
    }

    pub fn remove(&mut self, value: &PropertyValue, node_id: NodeId) {
        if let Some(nodes) = self.index.get_mut(value) {
            nodes.remove(&node_id);
            if nodes.is_empty() {
                self.index.remove(value);
            }
        }
    }

    /// Node ids holding `value`, ascending.
    pub fn get(&self, value: &PropertyValue) -> Vec<NodeId> {
        self.index
            .get(value)
            .map(|nodes| nodes.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.index.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Key identifying a property index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexKey {
    pub label: Label,
    pub property: String,
}

impl IndexKey {
    pub fn new(label: Label, property: impl Into<String>) -> Self {
        Self {
            label,
            property: property.into(),
        }
    }
}

/// All property indexes of a graph
#[derive(Debug, Clone, Default)]
pub struct IndexRegistry {
    indices: HashMap<IndexKey, PropertyIndex>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an empty index. Returns `false` if it already existed.
    pub fn create(&mut self, key: IndexKey) -> bool {
        if self.indices.contains_key(&key) {
            return false;
        }
        self.indices.insert(key, PropertyIndex::new());
        true
    }

    pub fn drop_index(&mut self, key: &IndexKey) -> bool {
        self.indices.remove(key).is_some()
    }

    pub fn contains(&self, key: &IndexKey) -> bool {
        self.indices.contains_key(key)
    }

    pub fn get(&self, key: &IndexKey) -> Option<&PropertyIndex> {
        self.indices.get(key)
    }

    pub fn get_mut(&mut self, key: &IndexKey) -> Option<&mut PropertyIndex> {
        self.indices.get_mut(key)
    }

    /// Keys of every index covering `label`
    pub fn keys_for(&self, label: Label) -> Vec<IndexKey> {
        self.indices
            .keys()
            .filter(|key| key.label == label)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
