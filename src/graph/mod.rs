//! In-memory property graph backing the embedded store
//!
//! - Labelled nodes with properties
//! - Directed, typed edges with adjacency lists in both directions
//! - Label index and optional B-tree property indexes

pub mod edge;
pub mod index;
pub mod node;
pub mod property;
pub mod store;
pub mod types;

pub use edge::Edge;
pub use index::{IndexKey, IndexRegistry, PropertyIndex};
pub use node::Node;
pub use property::{PropertyMap, PropertyValue};
pub use store::{GraphError, GraphResult, LookupStats, PropertyGraph};
pub use types::{EdgeId, NodeId};
