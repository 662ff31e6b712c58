//! HttpGraphStore: client for a Cypher server's HTTP transactional API
//!
//! Speaks the Neo4j HTTP protocol:
//! - `POST {base}/db/{database}/tx` opens a transaction (response `commit` URL)
//! - `POST {base}/db/{database}/tx/{id}` runs statements inside it
//! - `POST {base}/db/{database}/tx/{id}/commit` commits
//! - `DELETE {base}/db/{database}/tx/{id}` rolls back
//!
//! Results are requested in `row` format, so every record arrives as a JSON
//! array aligned with `columns`.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{AccessMode, GraphStore, QueryResult, StoreError, StoreResult, Transaction};
use crate::config::StoreConfig;
use crate::cypher::{CypherQuery, Statement};

#[derive(Debug, Clone)]
struct Credentials {
    user: String,
    password: String,
}

/// Network store talking to a Cypher server over HTTP
#[derive(Debug, Clone)]
pub struct HttpGraphStore {
    base_url: String,
    database: String,
    credentials: Option<Credentials>,
    http_client: Client,
    closed: Arc<AtomicBool>,
}

impl HttpGraphStore {
    /// Create a store for `base_url` (e.g. `http://localhost:7474`)
    pub fn new(base_url: &str, database: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            database: database.to_string(),
            credentials: None,
            http_client: Client::new(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Build from configuration, with basic auth and request timeout
    pub fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StoreError::Connectivity(e.to_string()))?;
        let mut store = Self::new(&config.uri, &config.database);
        store.http_client = http_client;
        if !config.user.is_empty() {
            store.credentials = Some(Credentials {
                user: config.user.clone(),
                password: config.password.clone(),
            });
        }
        Ok(store)
    }

    fn begin_url(&self) -> String {
        format!("{}/db/{}/tx", self.base_url, self.database)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some(c) => request.basic_auth(&c.user, Some(&c.password)),
            None => request,
        }
    }
}

#[async_trait]
impl GraphStore for HttpGraphStore {
    fn database(&self) -> &str {
        &self.database
    }

    async fn begin(&self, mode: AccessMode) -> StoreResult<Box<dyn Transaction>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        let request = self
            .authorize(self.http_client.post(self.begin_url()))
            .header("access-mode", access_mode_header(mode))
            .json(&TxRequest::default());
        let response = send(request).await?;
        let commit_url = response
            .commit
            .ok_or_else(|| StoreError::Protocol("begin response has no commit URL".to_string()))?;
        let tx_url = transaction_url(&commit_url)?;
        debug!(%tx_url, ?mode, "opened HTTP transaction");

        Ok(Box::new(HttpTransaction {
            store: self.clone(),
            mode,
            tx_url,
            commit_url,
            finished: false,
        }))
    }

    async fn verify_connectivity(&self) -> StoreResult<()> {
        let request = self.authorize(self.http_client.get(format!("{}/", self.base_url)));
        let response = request.send().await.map_err(map_transport)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(StoreError::Connectivity(format!(
                "discovery endpoint returned {}",
                response.status()
            )))
        }
    }

    async fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// A server-side transaction. If dropped unfinished, the server expires it.
pub struct HttpTransaction {
    store: HttpGraphStore,
    mode: AccessMode,
    tx_url: String,
    commit_url: String,
    finished: bool,
}

#[async_trait]
impl Transaction for HttpTransaction {
    fn mode(&self) -> AccessMode {
        self.mode
    }

    async fn run(&mut self, statement: &Statement) -> StoreResult<QueryResult> {
        if self.finished {
            return Err(StoreError::TransactionClosed);
        }
        if self.mode == AccessMode::Read && statement.access_mode() == AccessMode::Write {
            return Err(StoreError::ReadOnly(statement.name()));
        }
        let body = TxRequest::single(statement.to_cypher()?);
        let request = self
            .store
            .authorize(self.store.http_client.post(&self.tx_url))
            .json(&body);
        let response = send(request).await?;
        response
            .results
            .into_iter()
            .next()
            .map(StatementResult::into_query_result)
            .ok_or_else(|| StoreError::Protocol("statement returned no result".to_string()))
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        if self.finished {
            return Err(StoreError::TransactionClosed);
        }
        self.finished = true;
        let request = self
            .store
            .authorize(self.store.http_client.post(&self.commit_url))
            .json(&TxRequest::default());
        send(request).await.map(drop)
    }

    async fn rollback(mut self: Box<Self>) -> StoreResult<()> {
        if self.finished {
            return Err(StoreError::TransactionClosed);
        }
        self.finished = true;
        let request = self.store.authorize(self.store.http_client.delete(&self.tx_url));
        send(request).await.map(drop)
    }
}

fn access_mode_header(mode: AccessMode) -> &'static str {
    match mode {
        AccessMode::Read => "READ",
        AccessMode::Write => "WRITE",
    }
}

/// `.../tx/42/commit` -> `.../tx/42`
fn transaction_url(commit_url: &str) -> StoreResult<String> {
    commit_url
        .strip_suffix("/commit")
        .map(str::to_string)
        .ok_or_else(|| StoreError::Protocol(format!("unexpected commit URL {}", commit_url)))
}

async fn send(request: RequestBuilder) -> StoreResult<TxResponse> {
    let response = request.send().await.map_err(map_transport)?;
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(StoreError::Connectivity(format!("authentication failed ({})", status)));
    }
    if status == StatusCode::NOT_FOUND {
        return Err(StoreError::TransactionClosed);
    }
    let text = response.text().await.map_err(map_transport)?;
    if !status.is_success() && text.trim().is_empty() {
        return Err(StoreError::Protocol(format!("server returned {}", status)));
    }
    parse_response(&text)
}

fn map_transport(err: reqwest::Error) -> StoreError {
    if err.is_connect() || err.is_timeout() {
        StoreError::Connectivity(err.to_string())
    } else {
        StoreError::Protocol(err.to_string())
    }
}

/// Decode a transactional endpoint body, turning server errors into
/// `StoreError`s. `Neo.TransientError.*` codes are retryable.
pub fn parse_response(body: &str) -> StoreResult<TxResponse> {
    let response: TxResponse = if body.trim().is_empty() {
        TxResponse::default()
    } else {
        serde_json::from_str(body)?
    };
    if let Some(error) = response.errors.first() {
        return Err(classify(error));
    }
    Ok(response)
}

fn classify(error: &ServerError) -> StoreError {
    if error.code.starts_with("Neo.TransientError.") {
        StoreError::Transient(format!("{}: {}", error.code, error.message))
    } else if error.code.starts_with("Neo.ClientError.Security.") {
        StoreError::Connectivity(format!("{}: {}", error.code, error.message))
    } else {
        StoreError::Statement {
            code: error.code.clone(),
            message: error.message.clone(),
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct TxRequest {
    statements: Vec<TxStatement>,
}

impl TxRequest {
    fn single(query: CypherQuery) -> Self {
        Self {
            statements: vec![TxStatement {
                statement: query.statement,
                parameters: query.parameters,
                result_data_contents: vec!["row"],
            }],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TxStatement {
    statement: String,
    parameters: serde_json::Map<String, serde_json::Value>,
    result_data_contents: Vec<&'static str>,
}

/// Body of every transactional endpoint response
#[derive(Debug, Default, Deserialize)]
pub struct TxResponse {
    #[serde(default)]
    pub results: Vec<StatementResult>,
    #[serde(default)]
    pub errors: Vec<ServerError>,
    #[serde(default)]
    pub commit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatementResult {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub data: Vec<RowData>,
}

impl StatementResult {
    fn into_query_result(self) -> QueryResult {
        QueryResult {
            columns: self.columns,
            records: self.data.into_iter().map(|d| d.row).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RowData {
    #[serde(default)]
    pub row: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerError {
    pub code: String,
    #[serde(default)]
    pub message: String,
}
