//! Typed statements and their Cypher rendering
//!
//! The loader and query engine never assemble query text themselves. They
//! build a [`Statement`]; the HTTP store renders it with [`Statement::to_cypher`]
//! and the embedded store evaluates it directly.
//!
//! Only the path length of the co-occurrence query is structural, and it is
//! produced from a bounded [`Degree`]. Every scalar (ids, dates, limits,
//! amounts) travels as a bound parameter.

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::model::{EntityKind, Label, TransactionNode};
use crate::query::params::{DateWindow, Degree, Limit, ANOMALY_FACTOR, BASELINE_DAYS};
use crate::store::AccessMode;

/// A lookup index on a node property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexSpec {
    pub name: &'static str,
    pub label: Label,
    pub property: &'static str,
}

pub const CUSTOMER_ID_INDEX: IndexSpec = IndexSpec {
    name: "customer_id",
    label: Label::Customer,
    property: "id",
};

pub const TERMINAL_ID_INDEX: IndexSpec = IndexSpec {
    name: "terminal_id",
    label: Label::Terminal,
    property: "id",
};

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// One node per id, no existence check
    CreateEntities { kind: EntityKind, ids: Vec<i64> },
    /// `CREATE INDEX ... IF NOT EXISTS`
    CreateIndex(IndexSpec),
    /// Block until created indexes are online
    AwaitIndexes { timeout_secs: u64 },
    /// Per row: match customer and terminal, create the transaction and both
    /// edges. Returns one `id` row per transaction created.
    CreateTransactions { rows: Vec<TransactionNode> },
    DeleteAllRelationships,
    /// Fails if any node still has relationships
    DeleteAllNodes,
    CountNodesByLabel,
    CountRelationshipsByType,
    CustomerPayments { window: DateWindow, limit: Limit },
    TerminalAnomalies { window: DateWindow, limit: Limit },
    CustomerCoOccurrence { degree: Degree, limit: Limit },
    PeriodFraudRates { window: DateWindow },
}

/// Rendered query text plus its parameter map
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CypherQuery {
    pub statement: String,
    pub parameters: Map<String, Value>,
}

impl CypherQuery {
    fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            parameters: Map::new(),
        }
    }

    fn param(mut self, name: &str, value: Value) -> Self {
        self.parameters.insert(name.to_string(), value);
        self
    }

    fn window(self, window: &DateWindow) -> Self {
        self.param("start_date", json!(window.start().format("%Y-%m-%d").to_string()))
            .param("end_date", json!(window.end().format("%Y-%m-%d").to_string()))
    }
}

/// Baseline average per terminal, then the strictly-above-threshold
/// transactions in the evaluation window. Leaves `t`, `baseline` and `tx` bound.
const ANOMALY_MATCH: &str = "\
MATCH (t:Terminal)<-[:PAYED_TO]-(tx:Transaction) \
WHERE tx.date >= date($start_date) - duration({days: $baseline_days}) \
AND tx.date < date($start_date) \
WITH t, avg(tx.amount) AS baseline \
MATCH (t)<-[:PAYED_TO]-(tx:Transaction) \
WHERE tx.date >= date($start_date) AND tx.date <= date($end_date) \
AND tx.amount > baseline * $threshold_factor ";

/// Undirected variable-length relationship pattern of exactly `hops` hops
pub fn exact_hops(hops: u32) -> String {
    format!("-[*{hops}]-")
}

impl Statement {
    pub fn access_mode(&self) -> AccessMode {
        match self {
            Statement::CreateEntities { .. }
            | Statement::CreateIndex(_)
            | Statement::AwaitIndexes { .. }
            | Statement::CreateTransactions { .. }
            | Statement::DeleteAllRelationships
            | Statement::DeleteAllNodes => AccessMode::Write,
            _ => AccessMode::Read,
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Statement::CreateEntities { .. } => "create_entities",
            Statement::CreateIndex(_) => "create_index",
            Statement::AwaitIndexes { .. } => "await_indexes",
            Statement::CreateTransactions { .. } => "create_transactions",
            Statement::DeleteAllRelationships => "delete_relationships",
            Statement::DeleteAllNodes => "delete_nodes",
            Statement::CountNodesByLabel => "count_nodes",
            Statement::CountRelationshipsByType => "count_relationships",
            Statement::CustomerPayments { .. } => "customer_payments",
            Statement::TerminalAnomalies { .. } => "terminal_anomalies",
            Statement::CustomerCoOccurrence { .. } => "customer_co_occurrence",
            Statement::PeriodFraudRates { .. } => "period_fraud_rates",
        }
    }

    /// Render as query text plus parameters. Fails only if a row parameter
    /// cannot be serialized.
    pub fn to_cypher(&self) -> Result<CypherQuery, serde_json::Error> {
        let query = match self {
            Statement::CreateEntities { kind, ids } => CypherQuery::new(format!(
                "UNWIND $ids AS id CREATE (:{} {{id: id}}) RETURN count(*) AS created",
                kind.label()
            ))
            .param("ids", json!(ids)),

            Statement::CreateIndex(spec) => CypherQuery::new(format!(
                "CREATE INDEX {} IF NOT EXISTS FOR (n:{}) ON (n.{})",
                spec.name, spec.label, spec.property
            )),

            Statement::AwaitIndexes { timeout_secs } => {
                CypherQuery::new("CALL db.awaitIndexes($timeout)").param("timeout", json!(timeout_secs))
            }

            Statement::CreateTransactions { rows } => CypherQuery::new(
                "UNWIND $rows AS row \
                 MATCH (c:Customer {id: row.customer_id}) \
                 MATCH (t:Terminal {id: row.terminal_id}) \
                 CREATE (tx:Transaction {id: row.id, amount: row.amount, \
                 datetime: localdatetime(row.datetime), date: date(row.date), \
                 period: row.period, is_fraud: row.is_fraud}) \
                 CREATE (c)-[:HAS_TX]->(tx)-[:PAYED_TO]->(t) \
                 RETURN row.id AS id",
            )
            .param("rows", serde_json::to_value(rows)?),

            Statement::DeleteAllRelationships => {
                CypherQuery::new("MATCH ()-[r]->() DELETE r RETURN count(*) AS deleted")
            }

            Statement::DeleteAllNodes => {
                CypherQuery::new("MATCH (n) DELETE n RETURN count(*) AS deleted")
            }

            Statement::CountNodesByLabel => CypherQuery::new(
                "MATCH (n) RETURN labels(n)[0] AS name, count(*) AS count ORDER BY name",
            ),

            Statement::CountRelationshipsByType => CypherQuery::new(
                "MATCH ()-[r]->() RETURN type(r) AS name, count(*) AS count ORDER BY name",
            ),

            Statement::CustomerPayments { window, limit } => CypherQuery::new(
                "MATCH (c:Customer)-[:HAS_TX]->(tx:Transaction) \
                 WHERE tx.date >= date($start_date) AND tx.date <= date($end_date) \
                 RETURN c.id AS customer_id, tx.date AS date, sum(tx.amount) AS total_amount \
                 ORDER BY customer_id, date \
                 LIMIT $limit",
            )
            .window(window)
            .param("limit", json!(limit.get())),

            Statement::TerminalAnomalies { window, limit } => CypherQuery::new(format!(
                "{ANOMALY_MATCH}\
                 RETURN t.id AS terminal_id, count(tx) AS flagged, baseline \
                 ORDER BY terminal_id \
                 LIMIT $limit"
            ))
            .window(window)
            .param("baseline_days", json!(BASELINE_DAYS))
            .param("threshold_factor", json!(ANOMALY_FACTOR))
            .param("limit", json!(limit.get())),

            Statement::CustomerCoOccurrence { degree, limit } => CypherQuery::new(format!(
                "MATCH (c1:Customer){}(c2:Customer) \
                 WHERE c1 <> c2 \
                 RETURN DISTINCT c1.id AS customer_a, c2.id AS customer_b \
                 ORDER BY customer_a, customer_b \
                 LIMIT $limit",
                exact_hops(degree.path_length())
            ))
            .param("limit", json!(limit.get())),

            Statement::PeriodFraudRates { window } => CypherQuery::new(format!(
                "{ANOMALY_MATCH}\
                 WITH tx.period AS period, count(tx) AS flagged \
                 MATCH (period_tx:Transaction) WHERE period_tx.period = period \
                 RETURN period, flagged, count(period_tx) AS total \
                 ORDER BY period"
            ))
            .window(window)
            .param("baseline_days", json!(BASELINE_DAYS))
            .param("threshold_factor", json!(ANOMALY_FACTOR)),
        };
        Ok(query)
    }
}
