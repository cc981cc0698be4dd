//! Network metrics assembled from the Kaspa info endpoints.

use crate::error::Result;
use crate::normalize::{block_list, field, is_tip_raw, number, strings, uint};
use crate::upstream::KaspaClient;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Network name reported when `/info/blockdag` does not carry one.
pub const DEFAULT_NETWORK_NAME: &str = "kaspa-mainnet";

/// How a snapshot reacts when one of its upstream calls fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Any failed call fails the whole snapshot.
    #[default]
    FailFast,
    /// Failed calls are logged and their fields fall back to defaults.
    Isolate,
}

/// A point-in-time summary of network health and economics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub tps: f64,
    pub confirmation_latency: f64,
    /// Blocks in the tip page that have no children.
    pub tip_pool_size: u64,
    pub orphan_rate: f64,
    /// Share of the tip page that lies on the selected chain.
    pub blue_ratio: f64,
    pub total_blocks: u64,
    pub total_transactions: u64,
    pub difficulty: f64,
    pub virtual_daa_score: u64,
    pub circulating_supply: f64,
    pub total_supply: f64,
    pub hashrate: f64,
    pub price: f64,
    pub market_cap: f64,
    pub tip_hashes: Vec<String>,
    pub virtual_parent_hashes: Vec<String>,
    pub network_name: String,
    pub fee_estimate: f64,
    pub block_reward: f64,
    pub halving: f64,
    pub timestamp: DateTime<Utc>,
}

/// Raw responses of the nine info endpoints a snapshot is built from.
#[derive(Debug, Clone, Default)]
pub struct InfoSources {
    pub network: Value,
    pub blockdag: Value,
    pub coin_supply: Value,
    pub hashrate: Value,
    pub price: Value,
    pub fee_estimate: Value,
    pub block_reward: Value,
    pub halving: Value,
    pub market_cap: Value,
}

impl MetricsSnapshot {
    /// Builds a snapshot from already-fetched sources and a tip page.
    pub fn assemble(sources: &InfoSources, tip_page: &Value, timestamp: DateTime<Utc>) -> Self {
        let blocks = block_list(tip_page);
        let tip_pool_size = blocks.iter().filter(|b| is_tip_raw(b)).count() as u64;
        let blue_ratio = if blocks.is_empty() {
            0.0
        } else {
            let chain = blocks
                .iter()
                .filter(|b| {
                    field(field(b, "verboseData"), "isChainBlock")
                        .as_bool()
                        .unwrap_or(false)
                })
                .count();
            chain as f64 / blocks.len() as f64
        };

        let dag = &sources.blockdag;
        Self {
            tps: number(field(&sources.network, "tps")),
            confirmation_latency: number(field(&sources.network, "confirmationLatency")),
            tip_pool_size,
            orphan_rate: number(field(&sources.network, "orphanRate")),
            blue_ratio,
            total_blocks: uint(field(dag, "blockCount")),
            total_transactions: uint(field(dag, "transactionCount")),
            difficulty: number(field(dag, "difficulty")),
            virtual_daa_score: uint(field(dag, "virtualDaaScore")),
            circulating_supply: number(field(&sources.coin_supply, "circulating")),
            total_supply: number(field(&sources.coin_supply, "total")),
            hashrate: number(field(&sources.hashrate, "hashrate")),
            price: number(field(&sources.price, "price")),
            market_cap: number(field(&sources.market_cap, "marketCap")),
            tip_hashes: strings(field(dag, "tipHashes")),
            virtual_parent_hashes: strings(field(dag, "virtualParentHashes")),
            network_name: field(dag, "networkName")
                .as_str()
                .filter(|name| !name.is_empty())
                .unwrap_or(DEFAULT_NETWORK_NAME)
                .to_string(),
            fee_estimate: number(field(&sources.fee_estimate, "feeEstimate")),
            block_reward: number(field(&sources.block_reward, "blockReward")),
            halving: number(field(&sources.halving, "halving")),
            timestamp,
        }
    }
}

/// Fans out to the info endpoints and folds the answers into a [`MetricsSnapshot`].
#[derive(Clone)]
pub struct MetricsAggregator {
    client: KaspaClient,
    policy: FailurePolicy,
}

impl MetricsAggregator {
    pub fn new(client: KaspaClient, policy: FailurePolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Fetches a fresh snapshot.
    pub async fn snapshot(&self) -> Result<MetricsSnapshot> {
        let sources = self.sources().await?;
        let tip = crate::upstream::first_tip(&sources.blockdag).to_string();

        let tip_page = match (self.policy, self.client.blocks_from_low_hash(&tip, false).await) {
            (_, Ok(page)) => page,
            (FailurePolicy::FailFast, Err(e)) => return Err(e),
            (FailurePolicy::Isolate, Err(e)) => {
                log::warn!("Tip page unavailable, tip pool left empty: {}", e);
                Value::Null
            }
        };

        Ok(MetricsSnapshot::assemble(&sources, &tip_page, Utc::now()))
    }

    async fn sources(&self) -> Result<InfoSources> {
        let c = &self.client;
        match self.policy {
            FailurePolicy::FailFast => {
                let (
                    network,
                    blockdag,
                    coin_supply,
                    hashrate,
                    price,
                    fee_estimate,
                    block_reward,
                    halving,
                    market_cap,
                ) = tokio::try_join!(
                    c.info("network"),
                    c.info("blockdag"),
                    c.info("coinsupply"),
                    c.info("hashrate"),
                    c.info("price"),
                    c.info("fee-estimate"),
                    c.info("blockreward"),
                    c.info("halving"),
                    c.info("marketcap"),
                )?;
                Ok(InfoSources {
                    network,
                    blockdag,
                    coin_supply,
                    hashrate,
                    price,
                    fee_estimate,
                    block_reward,
                    halving,
                    market_cap,
                })
            }
            FailurePolicy::Isolate => {
                let (
                    network,
                    blockdag,
                    coin_supply,
                    hashrate,
                    price,
                    fee_estimate,
                    block_reward,
                    halving,
                    market_cap,
                ) = tokio::join!(
                    c.info("network"),
                    c.info("blockdag"),
                    c.info("coinsupply"),
                    c.info("hashrate"),
                    c.info("price"),
                    c.info("fee-estimate"),
                    c.info("blockreward"),
                    c.info("halving"),
                    c.info("marketcap"),
                );
                Ok(InfoSources {
                    network: settle("network", network),
                    blockdag: settle("blockdag", blockdag),
                    coin_supply: settle("coinsupply", coin_supply),
                    hashrate: settle("hashrate", hashrate),
                    price: settle("price", price),
                    fee_estimate: settle("fee-estimate", fee_estimate),
                    block_reward: settle("blockreward", block_reward),
                    halving: settle("halving", halving),
                    market_cap: settle("marketcap", market_cap),
                })
            }
        }
    }
}

fn settle(name: &str, result: Result<Value>) -> Value {
    result.unwrap_or_else(|e| {
        log::warn!("Metric source {} failed, using defaults: {}", name, e);
        Value::Null
    })
}
