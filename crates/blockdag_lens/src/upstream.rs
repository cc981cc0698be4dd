//! HTTP client for the upstream Kaspa REST API.
//!
//! Every call is a single request with the configured timeout. Failures are
//! logged with the endpoint and returned to the caller; nothing here retries.

use crate::error::{Error, Result};

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Public Kaspa REST API.
pub const DEFAULT_BASE_URL: &str = "https://api.kaspa.org";

/// Default upstream request timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;

/// Used as `lowHash` when the DAG reports no tips.
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// An empty query string, for endpoints that take no parameters.
pub const NO_QUERY: &[(&str, &str)] = &[];

/// Configuration for the upstream client.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the ledger API, without a trailing slash.
    pub base_url: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Value of the `User-Agent` header.
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            user_agent: format!("BlockDAG-Lens-Explorer/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl UpstreamConfig {
    /// Returns the default configuration pointed at another base URL.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Generous timeout for slow local setups.
    pub fn development() -> Self {
        Self {
            timeout_ms: 60_000,
            ..Default::default()
        }
    }

    /// Public API with the default timeout.
    pub fn production() -> Self {
        Self::default()
    }
}

/// Optional query parameters for a single transaction lookup.
#[derive(Debug, Default, Clone, Serialize)]
pub struct TransactionQuery {
    #[serde(rename = "blockHash", skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    pub inputs: bool,
    pub outputs: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolve_previous_outpoints: Option<String>,
}

/// Client for the Kaspa REST API.
#[derive(Debug, Clone)]
pub struct KaspaClient {
    config: UpstreamConfig,
    http: reqwest::Client,
}

impl KaspaClient {
    /// Builds a client with one shared connection pool.
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()?;

        Ok(Self { config, http })
    }

    /// The configured base URL.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Issues a GET request and returns the decoded JSON body.
    pub async fn get<Q>(&self, path: &str, query: &Q) -> Result<Value>
    where
        Q: Serialize + ?Sized,
    {
        let request = self.http.get(self.url(path)).query(query);
        self.send(path, request).await
    }

    /// Issues a POST request with a JSON body and returns the decoded JSON body.
    pub async fn post<Q, B>(&self, path: &str, query: &Q, body: &B) -> Result<Value>
    where
        Q: Serialize + ?Sized,
        B: Serialize + ?Sized,
    {
        let request = self.http.post(self.url(path)).query(query).json(body);
        self.send(path, request).await
    }

    async fn send(&self, path: &str, request: reqwest::RequestBuilder) -> Result<Value> {
        let response = request.send().await.map_err(|e| classify(path, e))?;

        let status = response.status();
        if !status.is_success() {
            log::error!("Kaspa API error for {}: HTTP {}", path, status);
            return Err(Error::UpstreamStatus {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }

        response.json::<Value>().await.map_err(|e| classify(path, e))
    }

    /// `GET /info/{name}`.
    pub async fn info(&self, name: &str) -> Result<Value> {
        self.get(&format!("/info/{}", name), NO_QUERY).await
    }

    /// `GET /info/blockdag`.
    pub async fn blockdag_info(&self) -> Result<Value> {
        self.info("blockdag").await
    }

    /// `GET /blocks?lowHash=..`: the page of blocks starting at `low_hash`.
    pub async fn blocks_from_low_hash(
        &self,
        low_hash: &str,
        include_transactions: bool,
    ) -> Result<Value> {
        let query = [
            ("lowHash", low_hash.to_string()),
            ("includeBlocks", "true".to_string()),
            ("includeTransactions", include_transactions.to_string()),
        ];
        self.get("/blocks", &query).await
    }

    /// Fetches the DAG info, then the page of blocks from its first tip.
    ///
    /// Returns both so callers can reuse the DAG info.
    pub async fn tip_page(&self) -> Result<(Value, Value)> {
        let dag_info = self.blockdag_info().await?;
        let page = self
            .blocks_from_low_hash(first_tip(&dag_info), false)
            .await?;
        Ok((dag_info, page))
    }

    /// `GET /blocks/{hash}`.
    pub async fn block(&self, hash: &str, include_transactions: bool) -> Result<Value> {
        let query = [("includeTransactions", include_transactions.to_string())];
        self.get(&format!("/blocks/{}", hash), &query).await
    }

    /// `GET /blocks-from-bluescore`.
    pub async fn blocks_from_blue_score(
        &self,
        blue_score: u64,
        include_transactions: bool,
    ) -> Result<Value> {
        let query = [
            ("blueScore", blue_score.to_string()),
            ("includeTransactions", include_transactions.to_string()),
        ];
        self.get("/blocks-from-bluescore", &query).await
    }

    /// `GET /transactions/{hash}`.
    pub async fn transaction(&self, hash: &str, query: &TransactionQuery) -> Result<Value> {
        self.get(&format!("/transactions/{}", hash), query).await
    }

    /// `GET /addresses/{address}/balance`.
    pub async fn address_balance(&self, address: &str) -> Result<Value> {
        self.get(&format!("/addresses/{}/balance", address), NO_QUERY)
            .await
    }

    /// `GET /addresses/{address}/full-transactions`.
    pub async fn address_full_transactions(
        &self,
        address: &str,
        limit: Option<u32>,
    ) -> Result<Value> {
        let path = format!("/addresses/{}/full-transactions", address);
        match limit {
            Some(limit) => self.get(&path, &[("limit", limit)]).await,
            None => self.get(&path, NO_QUERY).await,
        }
    }
}

/// The first tip hash reported by `/info/blockdag`, or [`ZERO_HASH`].
pub fn first_tip(dag_info: &Value) -> &str {
    dag_info
        .get("tipHashes")
        .and_then(|tips| tips.get(0))
        .and_then(Value::as_str)
        .unwrap_or(ZERO_HASH)
}

fn classify(path: &str, err: reqwest::Error) -> Error {
    log::error!("Kaspa API error for {}: {}", path, err);
    if err.is_timeout() {
        Error::Timeout(path.to_string())
    } else {
        Error::Upstream(err)
    }
}
