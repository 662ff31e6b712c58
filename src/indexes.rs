//! Lookup indexes on entity ids
//!
//! Transaction ingestion matches every row's customer and terminal by id, so
//! both indexes must be online before the first chunk is written.

use std::sync::Arc;
use tracing::info;

use crate::cypher::{IndexSpec, Statement, CUSTOMER_ID_INDEX, TERMINAL_ID_INDEX};
use crate::error::Result;
use crate::store::{run_write, GraphStore};

/// Indexes required before transaction ingestion
pub const REQUIRED_INDEXES: [IndexSpec; 2] = [CUSTOMER_ID_INDEX, TERMINAL_ID_INDEX];

const AWAIT_TIMEOUT_SECS: u64 = 300;

pub struct IndexManager {
    store: Arc<dyn GraphStore>,
}

impl IndexManager {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Create the id indexes if missing and wait until they are online.
    /// Safe to call any number of times.
    pub async fn ensure_indexes(&self) -> Result<()> {
        let statements: Vec<Statement> = REQUIRED_INDEXES
            .iter()
            .map(|spec| Statement::CreateIndex(*spec))
            .collect();
        run_write(self.store.as_ref(), &statements).await?;

        // index creation is schema work; waiting happens in its own transaction
        run_write(
            self.store.as_ref(),
            &[Statement::AwaitIndexes {
                timeout_secs: AWAIT_TIMEOUT_SECS,
            }],
        )
        .await?;

        for spec in REQUIRED_INDEXES {
            info!(index = spec.name, label = %spec.label, property = spec.property, "index online");
        }
        Ok(())
    }
}
