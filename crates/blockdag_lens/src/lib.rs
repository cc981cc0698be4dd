#![doc = include_str!("../README.md")]
//! # BlockDAG Lens - Kaspa Explorer Backend
//!
//! A read-only backend for a Kaspa BlockDAG dashboard.
//!
//! ## Overview
//!
//! This crate polls the public Kaspa REST API, reshapes its answers into
//! stable JSON records, lays out pages of blocks for 2D/3D rendering and
//! pushes network metrics to live clients over WebSocket. It keeps no ledger
//! state of its own: every response is recomputed from the upstream.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 BlockDAG Lens - Explorer Server              │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  upstream ──► normalize ──┬──► metrics ──► feed ──► WS /ws   │
//! │  (Kaspa API)  (Block, Tx) │                                  │
//! │                           └──► layout ──► GET /api/dag/layout │
//! │                                                              │
//! │  api: REST routes composing the above (blocks, transactions, │
//! │       addresses, info passthrough, search, health)           │
//! │                                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use blockdag_lens::{ApiState, FailurePolicy, KaspaClient, LensConfig, LensServer, UpstreamConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> blockdag_lens::Result<()> {
//!     let client = KaspaClient::new(UpstreamConfig::default())?;
//!     let state = ApiState::new(client, FailurePolicy::FailFast, Duration::from_secs(10));
//!     LensServer::new(LensConfig::default(), state)
//!         .start_with_shutdown(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```
//!
//! ## JavaScript Integration
//!
//! ```javascript
//! const ws = new WebSocket('ws://localhost:8080/ws');
//!
//! ws.onmessage = (event) => {
//!   const metrics = JSON.parse(event.data);
//!   updateDashboard(metrics.tps, metrics.tipPoolSize);
//! };
//! ```

/// REST and WebSocket endpoints.
///
/// [`ApiState`] carries the upstream client, the metrics aggregator and the
/// live feed into every handler.
pub mod api;

/// Error types and result aliases.
pub mod error;

/// Per-connection metrics push with cancellable sessions.
pub mod feed;

/// Layered positioning, classification and filtering of block pages.
pub mod layout;

/// Concurrent fan-out over the info endpoints.
pub mod metrics;

/// Raw upstream records to stable [`Block`](normalize::Block) and
/// [`Transaction`](normalize::Transaction) shapes.
pub mod normalize;

/// Server configuration and lifecycle.
pub mod server;

/// Client for the Kaspa REST API.
pub mod upstream;

pub use api::ApiState;
pub use error::{Error, Result};
pub use feed::{LiveFeed, SessionRegistry};
pub use layout::{layout, DagLayout, LayoutOptions};
pub use metrics::{FailurePolicy, MetricsAggregator, MetricsSnapshot};
pub use normalize::{normalize_block, normalize_transaction, Block, Transaction};
pub use server::{LensConfig, LensServer};
pub use upstream::{KaspaClient, UpstreamConfig};

/// Version information from Cargo.toml.
///
/// # Examples
///
/// ```
/// use blockdag_lens::VERSION;
///
/// println!("BlockDAG Lens version: {}", VERSION);
/// ```
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
