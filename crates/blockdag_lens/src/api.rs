//! REST API and WebSocket handlers.
//!
//! Every route is a thin composition of the upstream client, the normalizer,
//! the metrics aggregator and the layout engine. Handlers log upstream
//! failures with the endpoint, then answer with a generic message.

use crate::error::{Error, Result};
use crate::feed::LiveFeed;
use crate::layout::{
    self, DagLayout, EdgeMode, FilterStatus, Grouping, LayoutOptions, NodeFilter,
};
use crate::metrics::{FailurePolicy, MetricsAggregator, MetricsSnapshot, DEFAULT_NETWORK_NAME};
use crate::normalize::{self, Block, Transaction};
use crate::upstream::{KaspaClient, TransactionQuery, NO_QUERY};

use axum::extract::ws::{Message, WebSocket};
use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Info resources the API is willing to proxy.
pub const INFO_RESOURCES: &[&str] = &[
    "virtual-chain-blue-score",
    "network",
    "blockdag",
    "coinsupply",
    "coinsupply/circulating",
    "coinsupply/total",
    "kaspad",
    "fee-estimate",
    "price",
    "blockreward",
    "halving",
    "hashrate",
    "hashrate/max",
    "hashrate/history",
    "health",
    "marketcap",
];

/// Per-address resources proxied under `/api/addresses/{address}/..`.
const ADDRESS_RESOURCES: &[&str] = &[
    "balance",
    "utxos",
    "name",
    "full-transactions",
    "full-transactions-page",
    "transactions-count",
];

const DEFAULT_BLOCK_LIMIT: usize = 50;
const DEFAULT_DAG_LIMIT: usize = 100;
const ADDRESS_TRANSACTION_LIMIT: u32 = 20;
const UPSTREAM_UNAVAILABLE: &str = "Kaspa network unavailable";

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ApiState {
    pub client: KaspaClient,
    pub metrics: MetricsAggregator,
    pub feed: LiveFeed,
    /// Base options for `/api/dag/layout`; query parameters override them.
    pub layout: LayoutOptions,
}

impl ApiState {
    pub fn new(client: KaspaClient, policy: FailurePolicy, feed_interval: Duration) -> Self {
        let metrics = MetricsAggregator::new(client.clone(), policy);
        Self {
            feed: LiveFeed::new(metrics.clone(), feed_interval),
            metrics,
            client,
            layout: LayoutOptions::default(),
        }
    }

    pub fn with_layout(mut self, layout: LayoutOptions) -> Self {
        self.layout = layout;
        self
    }
}

/// Logs `err` and replaces it with the route's generic 500 message.
fn internal(context: &'static str, message: &'static str) -> impl FnOnce(Error) -> Error {
    move |err| {
        log::error!("Error {}: {}", context, err);
        Error::Internal(message.to_string())
    }
}

/// Logs `err`; a transient failure stays a 500, anything else becomes a 404.
fn missing(context: &'static str, message: &'static str) -> impl FnOnce(Error) -> Error {
    move |err| {
        log::error!("Error {}: {}", context, err);
        if err.is_transient() {
            Error::Internal(UPSTREAM_UNAVAILABLE.to_string())
        } else {
            Error::NotFound(message.to_string())
        }
    }
}

/// Lenient positive integer, falling back to `default`.
fn parse_limit(raw: Option<&str>, default: usize) -> usize {
    raw.and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}

fn is_true(raw: Option<&str>) -> bool {
    raw == Some("true")
}

/// `value`, unless it is missing or null.
fn or_default(value: &Value, default: Value) -> Value {
    match value {
        Value::Null => default,
        other => other.clone(),
    }
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlueScoreQuery {
    pub blue_score: Option<String>,
    pub include_transactions: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionLookupQuery {
    #[serde(rename = "blockHash")]
    pub block_hash: Option<String>,
    pub inputs: Option<String>,
    pub outputs: Option<String>,
    pub resolve_previous_outpoints: Option<String>,
}

/// Query string forwarded to `/transactions/search`.
#[derive(Debug, Deserialize, Serialize)]
pub struct TransactionSearchQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolve_previous_outpoints: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceptance: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSearchBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepting_blue_scores: Option<Value>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptanceBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitQuery {
    pub replace_by_fee: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_orphan: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MassBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<Value>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AddressesBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addresses: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutQuery {
    pub limit: Option<String>,
    pub group_size: Option<String>,
    pub edges: Option<String>,
    pub grouping: Option<String>,
    pub bucket_ms: Option<String>,
    pub depth: Option<String>,
    pub filter: Option<String>,
    pub q: Option<String>,
}

/// Address summary returned by `/api/addresses/{address}`.
#[derive(Debug, Serialize)]
pub struct AddressSummary {
    pub address: String,
    pub balance: u64,
    pub transactions: Vec<Transaction>,
}

/// Result of `/api/search`: at most one block and one transaction.
#[derive(Debug, Serialize)]
pub struct SearchResults {
    pub query: String,
    pub blocks: Vec<Block>,
    pub transactions: Vec<Transaction>,
}

/// Page of blocks with the DAG summary, returned by `/api/dag`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DagPage {
    pub blocks: Vec<Block>,
    pub total_blocks: Value,
    pub tip_hashes: Value,
    pub virtual_parent_hashes: Value,
    pub difficulty: Value,
    pub virtual_daa_score: Value,
    pub pruning_point_hash: Value,
    pub sink: Value,
    pub network_name: Value,
}

/// Creates the API router.
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        // Blocks
        .route("/api/blocks", get(get_blocks))
        .route("/api/blocks/{hash}", get(get_block))
        .route("/api/blocks-from-bluescore", get(get_blocks_from_blue_score))
        // Transactions
        .route("/api/transactions", post(submit_transaction))
        .route("/api/transactions/search", post(search_transactions))
        .route("/api/transactions/acceptance", post(transaction_acceptance))
        .route("/api/transactions/mass", post(transaction_mass))
        .route("/api/transactions/{hash}", get(get_transaction))
        // Addresses
        .route("/api/addresses/distribution", get(address_collection))
        .route("/api/addresses/names", get(address_collection))
        .route("/api/addresses/top", get(address_collection))
        .route("/api/addresses/utxos", post(addresses_batch))
        .route("/api/addresses/active", post(addresses_batch))
        .route("/api/addresses/balances", post(addresses_batch))
        .route("/api/addresses/{address}", get(get_address))
        .route("/api/addresses/{address}/{resource}", get(get_address_resource))
        // Network
        .route("/api/metrics", get(get_metrics))
        .route("/api/info/{*name}", get(get_info))
        .route("/api/virtual-chain", get(get_virtual_chain))
        .route("/api/search", get(search))
        .route("/api/dag", get(get_dag))
        .route("/api/dag/layout", get(get_dag_layout))
        .route("/api/health", get(health))
        .route("/api/sessions", get(get_sessions))
        // WebSocket
        .route("/ws", get(ws_handler))
        .fallback(not_found)
        .with_state(state)
}

async fn get_blocks(
    State(state): State<ApiState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<Block>>> {
    let limit = parse_limit(query.limit.as_deref(), DEFAULT_BLOCK_LIMIT);
    let (_, page) = state
        .client
        .tip_page()
        .await
        .map_err(internal("fetching blocks", "Failed to fetch blocks from Kaspa network"))?;

    Ok(Json(normalize::normalize_page(&page, limit)))
}

async fn get_block(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
) -> Result<Json<Block>> {
    let raw = state
        .client
        .block(&hash, true)
        .await
        .map_err(missing("fetching block", "Block not found"))?;

    Ok(Json(normalize::normalize_block_detail(&raw)))
}

async fn get_blocks_from_blue_score(
    State(state): State<ApiState>,
    Query(query): Query<BlueScoreQuery>,
) -> Result<Json<Vec<Block>>> {
    let blue_score = query
        .blue_score
        .as_deref()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0);
    let include_transactions = is_true(query.include_transactions.as_deref());

    let raw = state
        .client
        .blocks_from_blue_score(blue_score, include_transactions)
        .await
        .map_err(internal(
            "fetching blocks from blue score",
            "Failed to fetch blocks from blue score",
        ))?;

    let blocks = normalize::block_list(&raw)
        .iter()
        .map(|b| {
            if include_transactions {
                normalize::normalize_block_detail(b)
            } else {
                normalize::normalize_block(b)
            }
        })
        .collect();
    Ok(Json(blocks))
}

async fn get_transaction(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
    Query(query): Query<TransactionLookupQuery>,
) -> Result<Json<Transaction>> {
    let upstream_query = TransactionQuery {
        block_hash: query.block_hash,
        inputs: is_true(query.inputs.as_deref()),
        outputs: is_true(query.outputs.as_deref()),
        resolve_previous_outpoints: query.resolve_previous_outpoints,
    };

    let raw = state
        .client
        .transaction(&hash, &upstream_query)
        .await
        .map_err(missing("fetching transaction", "Transaction not found"))?;

    Ok(Json(normalize::normalize_transaction(&raw)))
}

async fn search_transactions(
    State(state): State<ApiState>,
    Query(query): Query<TransactionSearchQuery>,
    Json(body): Json<TransactionSearchBody>,
) -> Result<Json<Vec<Transaction>>> {
    let raw = state
        .client
        .post("/transactions/search", &query, &body)
        .await
        .map_err(internal("searching transactions", "Failed to search transactions"))?;

    Ok(Json(normalize::normalize_transactions(&raw)))
}

async fn transaction_acceptance(
    State(state): State<ApiState>,
    Json(body): Json<AcceptanceBody>,
) -> Result<Json<Value>> {
    state
        .client
        .post("/transactions/acceptance", NO_QUERY, &body)
        .await
        .map(Json)
        .map_err(internal(
            "getting transaction acceptance",
            "Failed to get transaction acceptance",
        ))
}

async fn submit_transaction(
    State(state): State<ApiState>,
    Query(query): Query<SubmitQuery>,
    Json(body): Json<SubmitBody>,
) -> Result<Json<Value>> {
    let replace_by_fee = is_true(query.replace_by_fee.as_deref()).to_string();

    state
        .client
        .post("/transactions", &[("replaceByFee", replace_by_fee)], &body)
        .await
        .map(Json)
        .map_err(|e| {
            log::error!("Error submitting transaction: {}", e);
            Error::BadRequest("Failed to submit transaction".to_string())
        })
}

async fn transaction_mass(
    State(state): State<ApiState>,
    Json(body): Json<MassBody>,
) -> Result<Json<Value>> {
    state
        .client
        .post("/transactions/mass", NO_QUERY, &body)
        .await
        .map(Json)
        .map_err(internal(
            "calculating transaction mass",
            "Failed to calculate transaction mass",
        ))
}

async fn get_address(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> Result<Json<AddressSummary>> {
    let (balance, history) = tokio::try_join!(
        state.client.address_balance(&address),
        state
            .client
            .address_full_transactions(&address, Some(ADDRESS_TRANSACTION_LIMIT)),
    )
    .map_err(missing("fetching address", "Address not found"))?;

    // The history is a bare array, older indexers wrap it.
    let transactions = match &history {
        Value::Array(_) => normalize::normalize_transactions(&history),
        other => normalize::normalize_transactions(normalize::field(other, "transactions")),
    };

    Ok(Json(AddressSummary {
        balance: normalize::uint(normalize::field(&balance, "balance")),
        address,
        transactions,
    }))
}

async fn get_address_resource(
    State(state): State<ApiState>,
    Path((address, resource)): Path<(String, String)>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Value>> {
    if !ADDRESS_RESOURCES.contains(&resource.as_str()) {
        return Err(Error::NotFound("Endpoint not found".to_string()));
    }

    let message = match resource.as_str() {
        "name" => "Address name not found",
        _ => "Address not found",
    };
    let path = format!("/addresses/{}/{}", address, resource);
    state
        .client
        .get(&path, &params)
        .await
        .map(Json)
        .map_err(missing("fetching address resource", message))
}

async fn address_collection(
    State(state): State<ApiState>,
    uri: axum::http::Uri,
) -> Result<Json<Value>> {
    let path = uri.path().trim_start_matches("/api");
    state
        .client
        .get(path, NO_QUERY)
        .await
        .map(Json)
        .map_err(|e| {
            log::error!("Error fetching {}: {}", path, e);
            Error::Internal(format!("Failed to fetch {}", path))
        })
}

async fn addresses_batch(
    State(state): State<ApiState>,
    uri: axum::http::Uri,
    Json(body): Json<AddressesBody>,
) -> Result<Json<Value>> {
    let path = uri.path().trim_start_matches("/api");
    state
        .client
        .post(path, NO_QUERY, &body)
        .await
        .map(Json)
        .map_err(|e| {
            log::error!("Error posting {}: {}", path, e);
            Error::Internal(format!("Failed to fetch {}", path))
        })
}

async fn get_metrics(State(state): State<ApiState>) -> Result<Json<MetricsSnapshot>> {
    state
        .metrics
        .snapshot()
        .await
        .map(Json)
        .map_err(internal("fetching metrics", "Failed to fetch network metrics"))
}

async fn get_info(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<Value>> {
    let name = name.trim_matches('/');
    if !INFO_RESOURCES.contains(&name) {
        return Err(Error::NotFound("Endpoint not found".to_string()));
    }

    state.client.info(name).await.map(Json).map_err(|e| {
        log::error!("Error fetching info/{}: {}", name, e);
        Error::Internal(format!("Failed to fetch {}", name))
    })
}

async fn get_virtual_chain(State(state): State<ApiState>) -> Result<Json<Value>> {
    state
        .client
        .get("/virtual-chain", NO_QUERY)
        .await
        .map(Json)
        .map_err(internal("fetching virtual chain", "Failed to fetch virtual chain"))
}

async fn search(
    State(state): State<ApiState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResults>> {
    let q = query
        .q
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| Error::BadRequest("Search query is required".to_string()))?;

    let block_path = format!("/blocks/{}", q);
    let tx_path = format!("/transactions/{}", q);
    let (block, tx) = tokio::join!(
        state.client.get(&block_path, NO_QUERY),
        state.client.get(&tx_path, NO_QUERY),
    );

    let blocks: Vec<Block> = match block {
        Ok(raw) => vec![normalize::normalize_block(&raw)],
        Err(e) => {
            log::debug!("Search {}: no block: {}", q, e);
            Vec::new()
        }
    };
    let transactions: Vec<Transaction> = match tx {
        Ok(raw) => vec![normalize::normalize_transaction(&raw)],
        Err(e) => {
            log::debug!("Search {}: no transaction: {}", q, e);
            Vec::new()
        }
    };

    Ok(Json(SearchResults {
        query: q,
        blocks,
        transactions,
    }))
}

async fn get_dag(
    State(state): State<ApiState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<DagPage>> {
    let limit = parse_limit(query.limit.as_deref(), DEFAULT_DAG_LIMIT);
    let (dag_info, page) = state
        .client
        .tip_page()
        .await
        .map_err(internal("fetching DAG", "Failed to fetch DAG data"))?;

    let info = &dag_info;
    Ok(Json(DagPage {
        blocks: normalize::normalize_page(&page, limit),
        total_blocks: or_default(&info["blockCount"], json!(0)),
        tip_hashes: or_default(&info["tipHashes"], json!([])),
        virtual_parent_hashes: or_default(&info["virtualParentHashes"], json!([])),
        difficulty: or_default(&info["difficulty"], json!(0)),
        virtual_daa_score: or_default(&info["virtualDaaScore"], json!(0)),
        pruning_point_hash: info["pruningPointHash"].clone(),
        sink: info["sink"].clone(),
        network_name: or_default(&info["networkName"], json!(DEFAULT_NETWORK_NAME)),
    }))
}

async fn get_dag_layout(
    State(state): State<ApiState>,
    Query(query): Query<LayoutQuery>,
) -> Json<DagLayout> {
    let limit = parse_limit(query.limit.as_deref(), DEFAULT_BLOCK_LIMIT);
    let mut options = state.layout.clone();
    if let Some(size) = query.group_size.as_deref() {
        options.group_size = parse_limit(Some(size), options.group_size);
    }
    if let Some(edges) = query.edges.as_deref() {
        options.edge_mode = EdgeMode::from(edges);
    }
    if let Some(grouping) = query.grouping.as_deref() {
        let bucket = query.bucket_ms.as_deref().and_then(|ms| ms.trim().parse().ok());
        options.grouping = Grouping::from_query(grouping, bucket);
    }
    if let Some(depth) = query
        .depth
        .as_deref()
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
    {
        options.depth = depth;
    }

    let blocks = match state.client.tip_page().await {
        Ok((_, page)) => normalize::normalize_page(&page, limit),
        Err(e) => {
            log::warn!("Layout source unavailable, returning empty layout: {}", e);
            Vec::new()
        }
    };

    let dag = layout::layout(&blocks, &options);
    let filter = NodeFilter {
        status: query
            .filter
            .as_deref()
            .map(FilterStatus::from)
            .unwrap_or_default(),
        query: query.q,
    };
    Json(dag.filter(&filter))
}

async fn health(State(state): State<ApiState>) -> Response {
    let client = &state.client;
    match tokio::try_join!(
        client.info("health"),
        client.info("network"),
        client.info("kaspad")
    ) {
        Ok((health, network, kaspad)) => {
            let text = |value: &Value, key: &str, default: &str| {
                normalize::field(value, key)
                    .as_str()
                    .filter(|s| !s.is_empty())
                    .unwrap_or(default)
                    .to_string()
            };
            Json(json!({
                "status": "healthy",
                "kaspaNetwork": "connected",
                "timestamp": chrono::Utc::now(),
                "health": health,
                "networkInfo": {
                    "name": text(&network, "name", "Kaspa"),
                    "version": text(&kaspad, "version", "unknown"),
                    "subnetworkId": text(&network, "subnetworkId", "unknown"),
                },
            }))
            .into_response()
        }
        Err(e) => {
            log::error!("Error checking health: {}", e);
            let err = Error::Unavailable(format!("{}: {}", UPSTREAM_UNAVAILABLE, e));
            (
                err.status_code(),
                Json(json!({
                    "status": "unhealthy",
                    "kaspaNetwork": "disconnected",
                    "error": err.to_string(),
                    "timestamp": chrono::Utc::now(),
                })),
            )
                .into_response()
        }
    }
}

async fn get_sessions(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "sessions": state.feed.registry().count().await,
        "intervalSecs": state.feed.interval().as_secs(),
        "upstream": state.client.base_url(),
    }))
}

async fn not_found() -> Error {
    Error::NotFound("Endpoint not found".to_string())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: ApiState) {
    let (session_id, mut payloads) = state.feed.open_session().await;
    log::info!("WebSocket client connected: {}", session_id);

    let (mut sender, mut receiver) = socket.split();

    // Forward metrics pushes to this client.
    let forward_id = session_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(payload) = payloads.recv().await {
            if let Err(e) = sender.send(Message::Text(payload.into())).await {
                log::debug!("WebSocket send to {} failed: {}", forward_id, e);
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) => {
                log::info!("WebSocket client {} closed gracefully", session_id);
                break;
            }
            Ok(Message::Text(text)) => {
                log::debug!("Received from {}: {}", session_id, text.as_str());
            }
            Err(e) => {
                log::error!("WebSocket error for client {}: {}", session_id, e);
                break;
            }
            _ => {}
        }
    }

    send_task.abort();
    state.feed.close_session(&session_id).await;
    log::info!("WebSocket client disconnected: {}", session_id);
}
