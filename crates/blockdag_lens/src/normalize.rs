//! Normalization of raw Kaspa API records into stable shapes.
//!
//! [`normalize_block`] and [`normalize_transaction`] are pure and total: any
//! field the upstream omits, or sends with an unexpected type, falls back to a
//! typed default (numbers to `0`, optional strings to `null`, collections to
//! empty). They are meant for raw upstream payloads only; feeding them an
//! already-normalized record is not supported.
//!
//! # Examples
//!
//! ```
//! use blockdag_lens::normalize::{normalize_block, normalize_transaction, TxStatus};
//! use serde_json::json;
//!
//! let block = normalize_block(&json!({
//!     "header": { "blueWork": "1f", "timestamp": "1700000000000" },
//!     "verboseData": { "hash": "aa", "blueScore": 7, "childrenHashes": [] }
//! }));
//! assert_eq!(block.hash.as_deref(), Some("aa"));
//! assert_eq!(block.weight, 31);
//! assert!(block.is_tip);
//!
//! let tx = normalize_transaction(&json!({ "outputs": [{ "amount": 10 }, { "amount": 5 }] }));
//! assert_eq!(tx.amount, 15);
//! assert_eq!(tx.status, TxStatus::Pending);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Subnetwork id reported when the upstream omits one.
pub const DEFAULT_SUBNETWORK_ID: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Placeholder for `from` / `to` when no input or output carries an address.
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// A block in the stable internal shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Block {
    pub id: Option<String>,
    pub hash: Option<String>,
    /// First direct parent; `None` for genesis.
    pub parent_hash: Option<String>,
    /// All level-0 parents, in upstream order.
    pub parents: Vec<String>,
    pub timestamp: DateTime<Utc>,
    /// Mirrors `blue_score`.
    pub confirmations: u64,
    /// `true` when the upstream reported no children.
    pub is_tip: bool,
    /// The header's cumulative blue work, serialized as a hex string.
    #[serde(with = "work")]
    pub weight: u128,
    pub size: u64,
    pub transaction_count: u64,
    pub blue_score: u64,
    pub difficulty: f64,
    pub daa_score: u64,
    pub selected_parent_hash: Option<String>,
    pub children_hashes: Vec<String>,
    pub is_chain_block: bool,
    pub version: u64,
    pub bits: u64,
    pub nonce: u64,
    pub pruning_point: Option<String>,
    pub hash_merkle_root: Option<String>,
    pub accepted_id_merkle_root: Option<String>,
    pub utxo_commitment: Option<String>,
    /// Explicit layout height, when the payload carries one.
    pub height: Option<u64>,
    /// Attached only on single-block lookups that include transactions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Vec<Transaction>>,
}

impl Default for Block {
    fn default() -> Self {
        Self {
            id: None,
            hash: None,
            parent_hash: None,
            parents: Vec::new(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            confirmations: 0,
            is_tip: true,
            weight: 0,
            size: 0,
            transaction_count: 0,
            blue_score: 0,
            difficulty: 0.0,
            daa_score: 0,
            selected_parent_hash: None,
            children_hashes: Vec::new(),
            is_chain_block: false,
            version: 0,
            bits: 0,
            nonce: 0,
            pruning_point: None,
            hash_merkle_root: None,
            accepted_id_merkle_root: None,
            utxo_commitment: None,
            height: None,
            transactions: None,
        }
    }
}

/// Confirmation state of a transaction. There is no failed or rejected state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Confirmed,
    Pending,
}

/// A transaction in the stable internal shape.
///
/// `from` and `to` only look at the first input and the first output, so
/// multi-party transactions lose information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: Option<String>,
    pub from: String,
    pub to: String,
    /// Sum of every output amount, fee included.
    pub amount: u64,
    pub timestamp: DateTime<Utc>,
    pub block_hash: Option<String>,
    pub status: TxStatus,
    pub fee: u64,
    pub size: u64,
    pub compute_mass: u64,
    pub version: u64,
    pub subnetwork_id: String,
    pub lock_time: u64,
    pub gas: u64,
    pub payload: String,
    pub is_accepted: bool,
    pub accepting_block_hash: Option<String>,
    pub accepting_block_blue_score: u64,
    pub accepting_block_time: u64,
}

/// Maps a raw Kaspa block into a [`Block`].
pub fn normalize_block(raw: &Value) -> Block {
    let header = field(raw, "header");
    let verbose = field(raw, "verboseData");

    let hash = text(verbose, "hash").or_else(|| text(header, "hashMerkleRoot"));
    let parents = strings(
        raw.pointer("/header/parents/0/parentHashes")
            .unwrap_or(&Value::Null),
    );
    let children_hashes = strings(field(verbose, "childrenHashes"));
    let blue_score = uint(field(verbose, "blueScore"));
    let transaction_count = field(raw, "transactions")
        .as_array()
        .map_or(0, |txs| txs.len() as u64);

    Block {
        id: hash.clone(),
        hash,
        parent_hash: parents.first().cloned(),
        parents,
        timestamp: millis(field(header, "timestamp")),
        confirmations: blue_score,
        is_tip: children_hashes.is_empty(),
        weight: blue_work(field(header, "blueWork")),
        size: transaction_count,
        transaction_count,
        blue_score,
        difficulty: difficulty(field(verbose, "difficulty")),
        daa_score: uint(field(header, "daaScore")),
        selected_parent_hash: text(verbose, "selectedParentHash"),
        children_hashes,
        is_chain_block: flag(field(verbose, "isChainBlock")),
        version: uint(field(header, "version")),
        bits: uint(field(header, "bits")),
        nonce: uint(field(header, "nonce")),
        pruning_point: text(header, "pruningPoint"),
        hash_merkle_root: text(header, "hashMerkleRoot"),
        accepted_id_merkle_root: text(header, "acceptedIdMerkleRoot"),
        utxo_commitment: text(header, "utxoCommitment"),
        height: field(raw, "height").as_u64(),
        transactions: None,
    }
}

/// Like [`normalize_block`], but also attaches the block's normalized
/// transactions when the payload carries them.
pub fn normalize_block_detail(raw: &Value) -> Block {
    let mut block = normalize_block(raw);
    block.transactions = field(raw, "transactions")
        .as_array()
        .map(|txs| txs.iter().map(normalize_transaction).collect());
    block
}

/// Maps a raw Kaspa transaction into a [`Transaction`].
///
/// Understands both the node-style shape (`verboseData`, camelCase) and the
/// indexer's snake_case shape returned by the address endpoints.
pub fn normalize_transaction(raw: &Value) -> Transaction {
    let verbose = field(raw, "verboseData");
    let first_input = raw.pointer("/inputs/0").unwrap_or(&Value::Null);
    let first_output = raw.pointer("/outputs/0").unwrap_or(&Value::Null);

    let hash = text(verbose, "transactionId")
        .or_else(|| text(verbose, "hash"))
        .or_else(|| text(raw, "transaction_id"));

    let from = first_input
        .pointer("/previousOutpoint/transactionId")
        .and_then(non_empty)
        .or_else(|| text(first_input, "previous_outpoint_hash"))
        .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string());

    let to = first_output
        .pointer("/verboseData/scriptPublicKeyAddress")
        .and_then(non_empty)
        .or_else(|| text(first_output, "script_public_key_address"))
        .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string());

    let amount = field(raw, "outputs")
        .as_array()
        .map_or(0, |outputs| {
            outputs
                .iter()
                .fold(0u64, |sum, output| sum.saturating_add(uint(field(output, "amount"))))
        });

    // The node shape reports seconds, the indexer shape milliseconds.
    let timestamp = match uint(field(verbose, "blockTime")) {
        0 => millis(field(raw, "block_time")),
        secs => from_millis(secs.saturating_mul(1000)),
    };

    let block_hash = text(verbose, "blockHash").or_else(|| match field(raw, "block_hash") {
        Value::Array(hashes) => hashes.first().and_then(non_empty),
        other => non_empty(other),
    });

    let status = if block_hash.is_some() {
        TxStatus::Confirmed
    } else {
        TxStatus::Pending
    };
    let mass = uint(field(raw, "mass"));

    Transaction {
        hash,
        from,
        to,
        amount,
        timestamp,
        block_hash,
        status,
        fee: mass,
        size: mass,
        compute_mass: uint(field(verbose, "computeMass")),
        version: uint(field(raw, "version")),
        subnetwork_id: text(raw, "subnetworkId")
            .unwrap_or_else(|| DEFAULT_SUBNETWORK_ID.to_string()),
        lock_time: uint(field(raw, "lockTime")),
        gas: uint(field(raw, "gas")),
        payload: text(raw, "payload").unwrap_or_default(),
        is_accepted: flag(field(raw, "is_accepted")),
        accepting_block_hash: text(raw, "accepting_block_hash"),
        accepting_block_blue_score: uint(field(raw, "accepting_block_blue_score")),
        accepting_block_time: uint(field(raw, "accepting_block_time")),
    }
}

/// `true` when a raw block lists no children.
pub fn is_tip_raw(raw: &Value) -> bool {
    field(field(raw, "verboseData"), "childrenHashes")
        .as_array()
        .is_none_or(|children| children.is_empty())
}

/// The raw blocks of an upstream page: either a bare array or `{ "blocks": [..] }`.
pub fn block_list(page: &Value) -> &[Value] {
    page.as_array()
        .or_else(|| field(page, "blocks").as_array())
        .map_or(&[], Vec::as_slice)
}

/// Normalizes every block of an upstream page, keeping at most `limit`.
pub fn normalize_page(page: &Value, limit: usize) -> Vec<Block> {
    block_list(page)
        .iter()
        .take(limit)
        .map(normalize_block)
        .collect()
}

/// Normalizes a list of raw transactions; anything but an array yields nothing.
pub fn normalize_transactions(raw: &Value) -> Vec<Transaction> {
    raw.as_array()
        .map(|txs| txs.iter().map(normalize_transaction).collect())
        .unwrap_or_default()
}

pub(crate) fn field<'a>(value: &'a Value, key: &str) -> &'a Value {
    value.get(key).unwrap_or(&Value::Null)
}

fn non_empty(value: &Value) -> Option<String> {
    value
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn text(value: &Value, key: &str) -> Option<String> {
    non_empty(field(value, key))
}

pub(crate) fn strings(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(non_empty).collect())
        .unwrap_or_default()
}

fn flag(value: &Value) -> bool {
    value.as_bool().unwrap_or(false)
}

/// Unsigned integer from a JSON number or a decimal string.
pub(crate) fn uint(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Blue work is a big integer the API encodes as hex; plain numbers pass through.
fn blue_work(value: &Value) -> u128 {
    match value {
        Value::Number(n) => n.as_u64().map_or(0, u128::from),
        Value::String(s) => {
            let digits = s.trim().trim_start_matches("0x");
            u128::from_str_radix(digits, 16).unwrap_or(0)
        }
        _ => 0,
    }
}

/// Blue work on the wire: lowercase hex, the way the upstream sends it.
///
/// Deserializing accepts hex strings (with or without `0x`) and plain numbers.
pub(crate) mod work {
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(work: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&format_args!("{:x}", work))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        Ok(super::blue_work(&Value::deserialize(deserializer)?))
    }
}

fn difficulty(value: &Value) -> f64 {
    match value {
        Value::Array(items) => items.first().map_or(0.0, number),
        other => number(other),
    }
}

/// Float from a JSON number or a numeric string.
pub(crate) fn number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn from_millis(ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn millis(value: &Value) -> DateTime<Utc> {
    from_millis(uint(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kaspa_block() -> Value {
        json!({
            "header": {
                "version": 1,
                "parents": [{ "parentHashes": ["p1", "p2"] }],
                "hashMerkleRoot": "merkle",
                "acceptedIdMerkleRoot": "accepted",
                "utxoCommitment": "utxo",
                "timestamp": "1700000000000",
                "bits": 453_290_000u64,
                "nonce": "1234567890",
                "daaScore": "98765",
                "blueWork": "0x10",
                "pruningPoint": "prune"
            },
            "transactions": [
                { "outputs": [{ "amount": 1 }] },
                { "outputs": [{ "amount": 2 }] }
            ],
            "verboseData": {
                "hash": "blockhash",
                "difficulty": 1.5e12,
                "selectedParentHash": "p1",
                "blueScore": "4242",
                "childrenHashes": ["c1"],
                "isChainBlock": true
            }
        })
    }

    #[test]
    fn test_normalize_block_full_payload() {
        let block = normalize_block(&kaspa_block());

        assert_eq!(block.id.as_deref(), Some("blockhash"));
        assert_eq!(block.hash.as_deref(), Some("blockhash"));
        assert_eq!(block.parent_hash.as_deref(), Some("p1"));
        assert_eq!(block.parents, vec!["p1", "p2"]);
        assert_eq!(block.timestamp.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(block.confirmations, 4242);
        assert_eq!(block.blue_score, 4242);
        assert!(!block.is_tip);
        assert_eq!(block.weight, 16);
        assert_eq!(block.size, 2);
        assert_eq!(block.transaction_count, 2);
        assert_eq!(block.difficulty, 1.5e12);
        assert_eq!(block.daa_score, 98765);
        assert_eq!(block.nonce, 1_234_567_890);
        assert_eq!(block.bits, 453_290_000);
        assert_eq!(block.version, 1);
        assert!(block.is_chain_block);
        assert_eq!(block.pruning_point.as_deref(), Some("prune"));
        assert!(block.transactions.is_none());
    }

    #[test]
    fn test_normalize_block_defaults() {
        let block = normalize_block(&json!({}));

        assert_eq!(block.id, None);
        assert_eq!(block.hash, None);
        assert_eq!(block.parent_hash, None);
        assert!(block.parents.is_empty());
        assert_eq!(block.timestamp, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(block.confirmations, 0);
        assert!(block.is_tip);
        assert_eq!(block.weight, 0);
        assert_eq!(block.difficulty, 0.0);
        assert!(block.children_hashes.is_empty());
        assert!(!block.is_chain_block);
        assert_eq!(block.height, None);
    }

    #[test]
    fn test_normalize_block_serializes_every_key() {
        let json = serde_json::to_value(normalize_block(&json!({ "header": null }))).unwrap();
        let object = json.as_object().unwrap();

        for key in [
            "id",
            "hash",
            "parentHash",
            "parents",
            "timestamp",
            "confirmations",
            "isTip",
            "weight",
            "size",
            "transactionCount",
            "blueScore",
            "difficulty",
            "daaScore",
            "selectedParentHash",
            "childrenHashes",
            "isChainBlock",
            "version",
            "bits",
            "nonce",
            "pruningPoint",
            "hashMerkleRoot",
            "acceptedIdMerkleRoot",
            "utxoCommitment",
            "height",
        ] {
            assert!(object.contains_key(key), "missing key {}", key);
        }
        assert!(!object.contains_key("transactions"));
        assert_eq!(object["parentHash"], Value::Null);
        assert_eq!(object["childrenHashes"], json!([]));
    }

    #[test]
    fn test_genesis_has_no_parent() {
        let block = normalize_block(&json!({
            "header": { "parents": [] },
            "verboseData": { "hash": "genesis" }
        }));
        assert_eq!(block.parent_hash, None);
    }

    #[test]
    fn test_id_falls_back_to_merkle_root() {
        let block = normalize_block(&json!({
            "header": { "hashMerkleRoot": "merkle" },
            "verboseData": { "hash": "" }
        }));
        assert_eq!(block.id.as_deref(), Some("merkle"));
    }

    #[test]
    fn test_is_tip_from_children_only() {
        let tip = normalize_block(&json!({
            "verboseData": { "childrenHashes": [], "blueScore": 0 }
        }));
        assert!(tip.is_tip);

        let inner = normalize_block(&json!({
            "verboseData": { "childrenHashes": ["x"], "blueScore": 0 }
        }));
        assert!(!inner.is_tip);

        // Confirmations play no part.
        let deep = normalize_block(&json!({
            "verboseData": { "childrenHashes": [], "blueScore": 1_000_000 }
        }));
        assert!(deep.is_tip);
    }

    #[test]
    fn test_is_tip_raw_matches_normalizer() {
        for raw in [
            json!({}),
            json!({ "verboseData": {} }),
            json!({ "verboseData": { "childrenHashes": [] } }),
            json!({ "verboseData": { "childrenHashes": ["a"] } }),
        ] {
            assert_eq!(is_tip_raw(&raw), normalize_block(&raw).is_tip);
        }
    }

    #[test]
    fn test_blue_work_encodings() {
        assert_eq!(blue_work(&json!(42)), 42);
        assert_eq!(blue_work(&json!("ff")), 255);
        assert_eq!(blue_work(&json!("0x0100")), 256);
        assert_eq!(blue_work(&json!("not hex")), 0);
        assert_eq!(blue_work(&json!(null)), 0);
    }

    #[test]
    fn test_lenient_integers() {
        assert_eq!(uint(&json!(7)), 7);
        assert_eq!(uint(&json!("7")), 7);
        assert_eq!(uint(&json!(7.9)), 7);
        assert_eq!(uint(&json!(-3)), 0);
        assert_eq!(uint(&json!("seven")), 0);
        assert_eq!(uint(&json!([7])), 0);
    }

    #[test]
    fn test_detail_attaches_transactions() {
        let block = normalize_block_detail(&kaspa_block());
        let txs = block.transactions.unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[1].amount, 2);
    }

    #[test]
    fn test_transaction_amount_sums_all_outputs() {
        let tx = normalize_transaction(&json!({
            "mass": 3000,
            "outputs": [{ "amount": 10 }, { "amount": 5 }]
        }));
        assert_eq!(tx.amount, 15);
        assert_eq!(tx.fee, 3000);
    }

    #[test]
    fn test_transaction_status_rule() {
        let confirmed = normalize_transaction(&json!({
            "verboseData": { "blockHash": "b1" }
        }));
        assert_eq!(confirmed.status, TxStatus::Confirmed);
        assert_eq!(confirmed.block_hash.as_deref(), Some("b1"));

        let pending = normalize_transaction(&json!({ "verboseData": {} }));
        assert_eq!(pending.status, TxStatus::Pending);
        assert_eq!(pending.block_hash, None);
    }

    #[test]
    fn test_transaction_from_to_heuristic() {
        let tx = normalize_transaction(&json!({
            "inputs": [
                { "previousOutpoint": { "transactionId": "prev1" } },
                { "previousOutpoint": { "transactionId": "prev2" } }
            ],
            "outputs": [
                { "amount": 1, "verboseData": { "scriptPublicKeyAddress": "kaspa:first" } },
                { "amount": 1, "verboseData": { "scriptPublicKeyAddress": "kaspa:second" } }
            ],
            "verboseData": { "transactionId": "tx1", "blockTime": 1_700_000_000 }
        }));

        assert_eq!(tx.hash.as_deref(), Some("tx1"));
        assert_eq!(tx.from, "prev1");
        assert_eq!(tx.to, "kaspa:first");
        assert_eq!(tx.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_transaction_defaults() {
        let tx = normalize_transaction(&json!({}));

        assert_eq!(tx.hash, None);
        assert_eq!(tx.from, "unknown");
        assert_eq!(tx.to, "unknown");
        assert_eq!(tx.amount, 0);
        assert_eq!(tx.timestamp, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(tx.subnetwork_id, DEFAULT_SUBNETWORK_ID);
        assert_eq!(tx.payload, "");
        assert!(!tx.is_accepted);
        assert_eq!(tx.accepting_block_hash, None);

        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["status"], json!("pending"));
        assert_eq!(json["blockHash"], Value::Null);
    }

    #[test]
    fn test_transaction_indexer_shape() {
        let tx = normalize_transaction(&json!({
            "transaction_id": "tx2",
            "block_hash": ["b9"],
            "block_time": 1_700_000_000_123u64,
            "mass": "2036",
            "is_accepted": true,
            "accepting_block_hash": "acc",
            "accepting_block_blue_score": 77,
            "inputs": [{ "previous_outpoint_hash": "prev" }],
            "outputs": [{ "amount": 4, "script_public_key_address": "kaspa:dest" }]
        }));

        assert_eq!(tx.hash.as_deref(), Some("tx2"));
        assert_eq!(tx.block_hash.as_deref(), Some("b9"));
        assert_eq!(tx.status, TxStatus::Confirmed);
        assert_eq!(tx.timestamp.timestamp_millis(), 1_700_000_000_123);
        assert_eq!(tx.fee, 2036);
        assert_eq!(tx.from, "prev");
        assert_eq!(tx.to, "kaspa:dest");
        assert!(tx.is_accepted);
        assert_eq!(tx.accepting_block_blue_score, 77);
    }

    #[test]
    fn test_block_list_shapes() {
        assert_eq!(block_list(&json!([{}, {}])).len(), 2);
        assert_eq!(block_list(&json!({ "blocks": [{}] })).len(), 1);
        assert!(block_list(&json!({ "error": "nope" })).is_empty());
        assert!(block_list(&json!("garbage")).is_empty());
    }

    #[test]
    fn test_normalize_page_limit() {
        let page = json!({ "blocks": [{}, {}, {}, {}] });
        assert_eq!(normalize_page(&page, 2).len(), 2);
        assert_eq!(normalize_page(&page, 50).len(), 4);
    }

    #[test]
    fn test_block_deserializes_partial_json() {
        let block: Block = serde_json::from_value(json!({ "hash": "h", "weight": 9 })).unwrap();
        assert_eq!(block.hash.as_deref(), Some("h"));
        assert_eq!(block.weight, 9);
        assert!(block.parents.is_empty());
    }

    #[test]
    fn test_weight_wider_than_u64_serializes_as_hex() {
        let block = normalize_block(&json!({
            "header": { "blueWork": "3a1f5e9c2b7d4e8f1a2b3c" }
        }));
        assert!(block.weight > u128::from(u64::MAX));

        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["weight"], json!("3a1f5e9c2b7d4e8f1a2b3c"));

        let back: Block = serde_json::from_value(json).unwrap();
        assert_eq!(back.weight, block.weight);
    }
}
