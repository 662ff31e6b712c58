//! Statement evaluation against the embedded graph
//!
//! Results mirror what the rendered Cypher returns on a server: same
//! columns, same ordering, same grouping keys.

use chrono::NaiveDate;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

use super::{FaultPlan, Undo};
use crate::cypher::Statement;
use crate::graph::{EdgeId, Node, NodeId, PropertyGraph, PropertyMap, PropertyValue};
use crate::model::{EdgeType, Label, TransactionNode};
use crate::query::params::{DateWindow, Degree, Limit, ANOMALY_FACTOR};
use crate::store::{QueryResult, StoreError, StoreResult};

pub(super) fn write(
    graph: &mut PropertyGraph,
    statement: &Statement,
    journal: &mut Vec<Undo>,
    faults: &FaultPlan,
) -> StoreResult<QueryResult> {
    match statement {
        Statement::CreateEntities { kind, ids } => {
            for id in ids {
                let node = graph.create_node(kind.label(), id_properties(*id));
                journal.push(Undo::NodeCreated(node));
            }
            let mut result = QueryResult::new(&["created"]);
            result.push(vec![json!(ids.len())]);
            Ok(result)
        }
        Statement::CreateIndex(spec) => {
            if graph.create_index(spec.label, spec.property) {
                journal.push(Undo::IndexCreated(spec.label, spec.property));
            }
            Ok(QueryResult::default())
        }
        // index builds are synchronous here
        Statement::AwaitIndexes { .. } => Ok(QueryResult::default()),
        Statement::CreateTransactions { rows } => {
            let mut result = QueryResult::new(&["id"]);
            for row in rows {
                if faults.should_fail(row.id) {
                    return Err(StoreError::Transient(format!(
                        "injected failure at transaction {}",
                        row.id
                    )));
                }
                for created in create_transaction(graph, row, journal)? {
                    result.push(vec![json!(created)]);
                }
            }
            Ok(result)
        }
        Statement::DeleteAllRelationships => {
            let mut deleted = Vec::new();
            for id in graph.edge_ids() {
                deleted.push(graph.remove_edge(id)?);
            }
            let mut result = QueryResult::new(&["deleted"]);
            result.push(vec![json!(deleted.len())]);
            journal.push(Undo::EdgesDeleted(deleted));
            Ok(result)
        }
        Statement::DeleteAllNodes => {
            // check up front so a failing statement leaves nothing half-deleted
            if graph.edge_count() > 0 {
                let blocked = graph
                    .edge_ids()
                    .first()
                    .and_then(|id| graph.edge(*id))
                    .map(|edge| edge.source)
                    .unwrap_or(NodeId::new(0));
                return Err(crate::graph::GraphError::NodeHasRelationships(blocked).into());
            }
            let mut deleted = Vec::new();
            for id in graph.node_ids() {
                deleted.push(graph.remove_node(id)?);
            }
            let mut result = QueryResult::new(&["deleted"]);
            result.push(vec![json!(deleted.len())]);
            journal.push(Undo::NodesDeleted(deleted));
            Ok(result)
        }
        other => read(graph, other),
    }
}

fn id_properties(id: i64) -> PropertyMap {
    let mut properties = PropertyMap::new();
    properties.insert("id".to_string(), PropertyValue::Integer(id));
    properties
}

/// MATCH customer, MATCH terminal, CREATE per match combination.
/// Zero matches on either side creates nothing.
fn create_transaction(
    graph: &mut PropertyGraph,
    row: &TransactionNode,
    journal: &mut Vec<Undo>,
) -> StoreResult<Vec<i64>> {
    let customers = graph.find_nodes(Label::Customer, "id", &PropertyValue::Integer(row.customer_id));
    let terminals = graph.find_nodes(Label::Terminal, "id", &PropertyValue::Integer(row.terminal_id));

    let mut created = Vec::new();
    for &customer in &customers {
        for &terminal in &terminals {
            let mut properties = id_properties(row.id);
            properties.insert("amount".to_string(), PropertyValue::Float(row.amount));
            properties.insert("datetime".to_string(), PropertyValue::DateTime(row.datetime));
            properties.insert("date".to_string(), PropertyValue::Date(row.date));
            properties.insert("period".to_string(), PropertyValue::String(row.period.clone()));
            properties.insert("is_fraud".to_string(), PropertyValue::Boolean(row.is_fraud));

            let tx = graph.create_node(Label::Transaction, properties);
            journal.push(Undo::NodeCreated(tx));
            let has_tx = graph.create_edge(customer, tx, EdgeType::HasTx)?;
            journal.push(Undo::EdgeCreated(has_tx));
            let payed_to = graph.create_edge(tx, terminal, EdgeType::PayedTo)?;
            journal.push(Undo::EdgeCreated(payed_to));
            created.push(row.id);
        }
    }
    Ok(created)
}

pub(super) fn read(graph: &PropertyGraph, statement: &Statement) -> StoreResult<QueryResult> {
    match statement {
        Statement::CountNodesByLabel => {
            let mut result = QueryResult::new(&["name", "count"]);
            for label in [Label::Customer, Label::Terminal, Label::Transaction] {
                let count = graph.count_by_label(label);
                if count > 0 {
                    result.push(vec![json!(label.as_str()), json!(count)]);
                }
            }
            Ok(result)
        }
        Statement::CountRelationshipsByType => {
            let mut result = QueryResult::new(&["name", "count"]);
            for edge_type in [EdgeType::HasTx, EdgeType::PayedTo] {
                let count = graph.count_by_type(edge_type);
                if count > 0 {
                    result.push(vec![json!(edge_type.as_str()), json!(count)]);
                }
            }
            Ok(result)
        }
        Statement::CustomerPayments { window, limit } => Ok(customer_payments(graph, window, limit)),
        Statement::TerminalAnomalies { window, limit } => {
            let mut result = QueryResult::new(&["terminal_id", "flagged", "baseline"]);
            let mut rows: Vec<(Option<i64>, usize, f64)> = flagged_by_terminal(graph, window)
                .into_iter()
                .map(|f| (f.terminal.domain_id(), f.transactions.len(), f.baseline))
                .collect();
            rows.sort_by(|a, b| a.0.cmp(&b.0));
            for (terminal_id, flagged, baseline) in rows.into_iter().take(limit.as_usize()) {
                result.push(vec![json!(terminal_id), json!(flagged), json!(baseline)]);
            }
            Ok(result)
        }
        Statement::CustomerCoOccurrence { degree, limit } => Ok(co_occurrence(graph, degree, limit)),
        Statement::PeriodFraudRates { window } => Ok(period_fraud_rates(graph, window)),
        other => Err(StoreError::ReadOnly(other.name())),
    }
}

fn tx_date(node: &Node) -> Option<NaiveDate> {
    node.get_property("date").and_then(PropertyValue::as_date)
}

fn tx_amount(node: &Node) -> f64 {
    node.get_property("amount")
        .and_then(PropertyValue::as_float)
        .unwrap_or(0.0)
}

fn customer_payments(graph: &PropertyGraph, window: &DateWindow, limit: &Limit) -> QueryResult {
    // grouped on c.id, like the Cypher RETURN
    let mut groups: BTreeMap<(Option<i64>, NaiveDate), f64> = BTreeMap::new();
    for customer in graph.nodes_by_label(Label::Customer) {
        for edge in graph.outgoing(customer.id, Some(EdgeType::HasTx)) {
            let Some(tx) = graph.node(edge.target) else {
                continue;
            };
            let Some(date) = tx_date(tx) else {
                continue;
            };
            if window.contains(date) {
                *groups.entry((customer.domain_id(), date)).or_insert(0.0) += tx_amount(tx);
            }
        }
    }

    let mut result = QueryResult::new(&["customer_id", "date", "total_amount"]);
    for ((customer_id, date), total) in groups.into_iter().take(limit.as_usize()) {
        result.push(vec![
            json!(customer_id),
            PropertyValue::Date(date).to_json(),
            PropertyValue::Float(total).to_json(),
        ]);
    }
    result
}

struct FlaggedTerminal<'a> {
    terminal: &'a Node,
    baseline: f64,
    transactions: Vec<&'a Node>,
}

/// Terminals with a baseline and at least one transaction in the window
/// strictly above `ANOMALY_FACTOR` times that baseline.
fn flagged_by_terminal<'a>(graph: &'a PropertyGraph, window: &DateWindow) -> Vec<FlaggedTerminal<'a>> {
    let mut flagged = Vec::new();
    for terminal in graph.nodes_by_label(Label::Terminal) {
        let payments: Vec<&Node> = graph
            .incoming(terminal.id, Some(EdgeType::PayedTo))
            .filter_map(|edge| graph.node(edge.source))
            .filter(|node| node.has_label(Label::Transaction))
            .collect();

        let (sum, count) = payments
            .iter()
            .filter(|tx| tx_date(tx).is_some_and(|d| window.in_baseline(d)))
            .fold((0.0, 0usize), |(sum, count), tx| (sum + tx_amount(tx), count + 1));
        if count == 0 {
            continue;
        }
        let baseline = sum / count as f64;
        let threshold = baseline * ANOMALY_FACTOR;

        let transactions: Vec<&Node> = payments
            .into_iter()
            .filter(|tx| tx_date(tx).is_some_and(|d| window.contains(d)))
            .filter(|tx| tx_amount(tx) > threshold)
            .collect();
        if !transactions.is_empty() {
            flagged.push(FlaggedTerminal {
                terminal,
                baseline,
                transactions,
            });
        }
    }
    flagged
}

fn period_fraud_rates(graph: &PropertyGraph, window: &DateWindow) -> QueryResult {
    let mut flagged: BTreeMap<String, usize> = BTreeMap::new();
    for terminal in flagged_by_terminal(graph, window) {
        for tx in terminal.transactions {
            if let Some(period) = tx.get_property("period").and_then(PropertyValue::as_string) {
                *flagged.entry(period.to_string()).or_insert(0) += 1;
            }
        }
    }

    let mut totals: BTreeMap<&str, usize> = BTreeMap::new();
    for tx in graph.nodes_by_label(Label::Transaction) {
        if let Some(period) = tx.get_property("period").and_then(PropertyValue::as_string) {
            *totals.entry(period).or_insert(0) += 1;
        }
    }

    let mut result = QueryResult::new(&["period", "flagged", "total"]);
    for (period, count) in flagged {
        let total = totals.get(period.as_str()).copied().unwrap_or(0);
        result.push(vec![json!(period), json!(count), json!(total)]);
    }
    result
}

/// Distinct (a, b) customer id pairs joined by an undirected trail of exactly
/// `4k + 4` relationships (no relationship used twice on one path).
fn co_occurrence(graph: &PropertyGraph, degree: &Degree, limit: &Limit) -> QueryResult {
    let hops = degree.path_length() as usize;
    let limit = limit.as_usize();

    let mut by_id: BTreeMap<Option<i64>, Vec<NodeId>> = BTreeMap::new();
    for customer in graph.nodes_by_label(Label::Customer) {
        by_id.entry(customer.domain_id()).or_default().push(customer.id);
    }

    let mut result = QueryResult::new(&["customer_a", "customer_b"]);
    for (customer_a, starts) in by_id {
        // ORDER BY customer_a, customer_b: finishing a whole `a` group before
        // checking the limit keeps the truncation exact
        let mut partners: BTreeSet<Option<i64>> = BTreeSet::new();
        for start in starts {
            let mut trail = Vec::with_capacity(hops);
            walk(graph, start, start, hops, &mut trail, &mut partners);
        }
        for customer_b in partners {
            if result.len() >= limit {
                return result;
            }
            result.push(vec![json!(customer_a), json!(customer_b)]);
        }
    }
    result
}

fn walk(
    graph: &PropertyGraph,
    start: NodeId,
    at: NodeId,
    remaining: usize,
    trail: &mut Vec<EdgeId>,
    partners: &mut BTreeSet<Option<i64>>,
) {
    if remaining == 0 {
        if at != start {
            if let Some(node) = graph.node(at).filter(|n| n.has_label(Label::Customer)) {
                partners.insert(node.domain_id());
            }
        }
        return;
    }
    for edge in graph.edges_of(at) {
        if trail.contains(&edge.id) {
            continue;
        }
        trail.push(edge.id);
        walk(graph, start, edge.other_end(at), remaining - 1, trail, partners);
        trail.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn row(id: i64, customer_id: i64, terminal_id: i64, amount: f64, at: &str) -> TransactionNode {
        let datetime = NaiveDateTime::parse_from_str(at, "%Y-%m-%d %H:%M:%S").unwrap();
        TransactionNode {
            id,
            customer_id,
            terminal_id,
            amount,
            datetime,
            date: datetime.date(),
            period: datetime.date().to_string(),
            is_fraud: false,
        }
    }

    fn seeded(rows: Vec<TransactionNode>) -> PropertyGraph {
        let mut graph = PropertyGraph::new();
        let mut journal = Vec::new();
        let faults = FaultPlan::default();
        write(
            &mut graph,
            &Statement::CreateEntities {
                kind: crate::model::EntityKind::Customer,
                ids: vec![1, 2, 3],
            },
            &mut journal,
            &faults,
        )
        .unwrap();
        write(
            &mut graph,
            &Statement::CreateEntities {
                kind: crate::model::EntityKind::Terminal,
                ids: vec![10, 20],
            },
            &mut journal,
            &faults,
        )
        .unwrap();
        write(
            &mut graph,
            &Statement::CreateTransactions { rows },
            &mut journal,
            &faults,
        )
        .unwrap();
        graph
    }

    #[test]
    fn test_unmatched_rows_create_nothing() {
        let graph = seeded(vec![
            row(1, 1, 10, 5.0, "2018-06-01 10:00:00"),
            row(2, 99, 10, 5.0, "2018-06-01 10:00:00"),
            row(3, 1, 99, 5.0, "2018-06-01 10:00:00"),
        ]);
        assert_eq!(graph.count_by_label(Label::Transaction), 1);
        assert_eq!(graph.count_by_type(EdgeType::HasTx), 1);
        assert_eq!(graph.count_by_type(EdgeType::PayedTo), 1);
    }

    #[test]
    fn test_co_occurrence_k0_pairs_customers_sharing_a_terminal() {
        let graph = seeded(vec![
            row(1, 1, 10, 5.0, "2018-06-01 10:00:00"),
            row(2, 2, 10, 5.0, "2018-06-01 11:00:00"),
            row(3, 3, 20, 5.0, "2018-06-01 12:00:00"),
        ]);
        let result = co_occurrence(&graph, &Degree::new(0).unwrap(), &Limit::new(10).unwrap());
        assert_eq!(
            result.records,
            vec![vec![json!(1), json!(2)], vec![json!(2), json!(1)]]
        );
    }

    #[test]
    fn test_delete_nodes_refuses_while_edges_exist() {
        let mut graph = seeded(vec![row(1, 1, 10, 5.0, "2018-06-01 10:00:00")]);
        let mut journal = Vec::new();
        let err = write(&mut graph, &Statement::DeleteAllNodes, &mut journal, &FaultPlan::default());
        assert!(err.is_err());
        assert_eq!(graph.node_count(), 6);
        assert!(journal.is_empty());
    }
}
