//! Error types for loading and querying

use thiserror::Error;

use crate::loader::LoadReport;
use crate::model::EntityKind;
use crate::store::StoreError;

/// A transaction chunk that failed and was rolled back
#[derive(Error, Debug)]
#[error("chunk {index} (rows {start}..{end}): {source}")]
pub struct ChunkFailure {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    #[source]
    pub source: StoreError,
}

/// Errors surfaced by the loader, index manager and query engine
#[derive(Error, Debug)]
pub enum FraudGraphError {
    /// The store could not be reached; fatal for the current operation
    #[error("Connectivity error: {0}")]
    Connectivity(#[source] StoreError),

    /// One chunk rolled back; rows outside `start..end` are unaffected.
    /// `committed` covers everything that did commit before the failure.
    #[error("Chunk {index} (rows {start}..{end}) rolled back: {source}")]
    ChunkWrite {
        index: usize,
        start: usize,
        end: usize,
        #[source]
        source: StoreError,
        committed: Box<LoadReport>,
    },

    /// Chunks that failed during concurrent submission, lowest index first,
    /// with the report of every chunk that committed
    #[error("{} chunk(s) rolled back", .failures.len())]
    ChunksFailed {
        failures: Vec<ChunkFailure>,
        committed: Box<LoadReport>,
    },

    /// Rejected before anything was sent to the store
    #[error("Invalid query parameter: {0}")]
    QueryParameter(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Duplicate {kind} id {id}")]
    DuplicateEntityId { kind: EntityKind, id: i64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[source] StoreError),

    /// A result row did not have the expected shape
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<StoreError> for FraudGraphError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connectivity(_) => FraudGraphError::Connectivity(err),
            other => FraudGraphError::Store(other),
        }
    }
}

impl FraudGraphError {
    /// Chunk failures carried by this error, if any
    pub fn chunk_failures(&self) -> Vec<(usize, usize, usize)> {
        match self {
            FraudGraphError::ChunkWrite {
                index, start, end, ..
            } => vec![(*index, *start, *end)],
            FraudGraphError::ChunksFailed { failures, .. } => {
                failures.iter().map(|f| (f.index, f.start, f.end)).collect()
            }
            _ => Vec::new(),
        }
    }

    /// What was committed before a chunk failure, unmatched rows included
    pub fn committed(&self) -> Option<&LoadReport> {
        match self {
            FraudGraphError::ChunkWrite { committed, .. }
            | FraudGraphError::ChunksFailed { committed, .. } => Some(&**committed),
            _ => None,
        }
    }

    pub(crate) fn committed_mut(&mut self) -> Option<&mut LoadReport> {
        match self {
            FraudGraphError::ChunkWrite { committed, .. }
            | FraudGraphError::ChunksFailed { committed, .. } => Some(&mut **committed),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, FraudGraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_is_split_out() {
        let err: FraudGraphError = StoreError::Connectivity("refused".into()).into();
        assert!(matches!(err, FraudGraphError::Connectivity(_)));

        let err: FraudGraphError = StoreError::Transient("deadlock".into()).into();
        assert!(matches!(err, FraudGraphError::Store(_)));
    }

    #[test]
    fn test_chunk_error_message_names_range() {
        let err = FraudGraphError::ChunkWrite {
            index: 2,
            start: 8,
            end: 10,
            source: StoreError::Transient("lock timeout".into()),
            committed: Box::default(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Chunk 2"));
        assert!(msg.contains("8..10"));
        assert_eq!(err.chunk_failures(), vec![(2, 8, 10)]);
        assert_eq!(err.committed(), Some(&LoadReport::default()));
        assert_eq!(FraudGraphError::Config("x".into()).committed(), None);
    }

    #[test]
    fn test_chunk_failure_keeps_store_cause() {
        use std::error::Error as _;

        let failure = ChunkFailure {
            index: 1,
            start: 4,
            end: 8,
            source: StoreError::Transient("deadlock".into()),
        };
        assert!(failure.to_string().starts_with("chunk 1 (rows 4..8): "));
        assert!(failure.to_string().contains("deadlock"));
        assert!(failure.source().is_some());
    }
}
