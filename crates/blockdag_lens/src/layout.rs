//! Server-side layered layout of a page of blocks.
//!
//! [`layout`] turns normalized [`Block`]s into a [`DagLayout`]: every block
//! becomes a [`LayoutNode`] with a 3D position, nodes are grouped into layers,
//! consecutive blocks are connected by [`LayoutEdge`]s and a few summary
//! [`LayoutMetrics`] are computed. The result is recomputed per request and
//! never stored.
//!
//! # Quick Start
//!
//! ```
//! use blockdag_lens::layout::{layout, LayoutOptions};
//! use blockdag_lens::normalize::Block;
//!
//! let blocks: Vec<Block> = (0..10)
//!     .map(|i| Block {
//!         hash: Some(format!("h{}", i)),
//!         ..Block::default()
//!     })
//!     .collect();
//!
//! let dag = layout(&blocks, &LayoutOptions::default());
//! assert_eq!(dag.nodes.len(), 10);
//! assert_eq!(dag.edges.len(), 9);
//! assert_eq!(dag.nodes[9].layer, 1);
//! ```
//!
//! # Caveats
//!
//! The default [`EdgeMode::Sequential`] links block `i - 1` to block `i`,
//! which is a stand-in for real parentage. The node colour alternates by
//! index and has nothing to do with GHOSTDAG blue/red classification.

use crate::normalize::{self, Block};
use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Display colour of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeColor {
    Blue,
    Red,
}

impl NodeColor {
    fn for_index(index: usize) -> Self {
        if index % 3 == 0 {
            NodeColor::Blue
        } else {
            NodeColor::Red
        }
    }
}

/// How blocks are assigned to layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Grouping {
    /// Explicit `height`, else `index / group_size`.
    #[default]
    Height,
    /// `timestamp_ms / millis`; one layer per time bucket.
    TimeBucket { millis: u64 },
}

/// Bucket width used when a time grouping names none: one minute.
pub const DEFAULT_BUCKET_MILLIS: u64 = 60_000;

impl Grouping {
    /// Reads a query value. `time` buckets by timestamp, using `bucket_millis`
    /// or [`DEFAULT_BUCKET_MILLIS`] when absent or zero; anything else is
    /// [`Grouping::Height`].
    pub fn from_query(name: &str, bucket_millis: Option<u64>) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "time" | "timestamp" => Grouping::TimeBucket {
                millis: bucket_millis
                    .filter(|ms| *ms > 0)
                    .unwrap_or(DEFAULT_BUCKET_MILLIS),
            },
            _ => Grouping::Height,
        }
    }
}

/// Where edges come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgeMode {
    /// Block `i - 1` links to block `i`.
    #[default]
    Sequential,
    /// Each parent listed by a block, when present in the page, links to it.
    ParentHashes,
}

impl From<&str> for EdgeMode {
    /// Unknown names fall back to [`EdgeMode::Sequential`].
    fn from(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "parents" | "parenthashes" | "parent-hashes" => EdgeMode::ParentHashes,
            _ => EdgeMode::Sequential,
        }
    }
}

/// Tunables for [`layout`].
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutOptions {
    pub group_size: usize,
    pub layer_spacing: f64,
    pub node_spacing: f64,
    /// Amplitude of the z wobble; `0` keeps the layout flat.
    pub depth: f64,
    pub grouping: Grouping,
    pub edge_mode: EdgeMode,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            group_size: 5,
            layer_spacing: 3.0,
            node_spacing: 2.0,
            depth: 0.0,
            grouping: Grouping::Height,
            edge_mode: EdgeMode::Sequential,
        }
    }
}

impl LayoutOptions {
    pub fn group_size(mut self, group_size: usize) -> Self {
        self.group_size = group_size;
        self
    }

    pub fn depth(mut self, depth: f64) -> Self {
        self.depth = depth;
        self
    }

    pub fn grouping(mut self, grouping: Grouping) -> Self {
        self.grouping = grouping;
        self
    }

    pub fn edge_mode(mut self, edge_mode: EdgeMode) -> Self {
        self.edge_mode = edge_mode;
        self
    }
}

/// A positioned block.
///
/// The wrapped block is flattened into the node's JSON, and its `height`
/// carries the computed layout height.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutNode {
    #[serde(flatten)]
    pub block: Block,
    pub index: usize,
    /// The block hash, or `block_{index}` when the block has none.
    pub layout_hash: String,
    pub layer: usize,
    pub color: NodeColor,
    pub position: [f64; 3],
    /// `true` when no node in the page names this one as a parent.
    pub is_orphan: bool,
    #[serde(serialize_with = "crate::normalize::work::serialize")]
    pub blue_work: u128,
    pub parent_ids: Vec<String>,
}

impl LayoutNode {
    pub fn height(&self) -> u64 {
        self.block.height.unwrap_or_default()
    }
}

/// A connection between two nodes, by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutEdge {
    pub from: usize,
    pub to: usize,
}

/// Summary figures of a layout.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutMetrics {
    pub total_blocks: usize,
    pub tips: usize,
    pub orphans: usize,
    pub connections: usize,
    pub avg_parents_per_block: f64,
    pub height_range: u64,
}

/// The full layout of a page.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DagLayout {
    pub nodes: Vec<LayoutNode>,
    pub edges: Vec<LayoutEdge>,
    /// `None` only for the empty layout, which serializes as `{}`.
    #[serde(serialize_with = "metrics_or_empty")]
    pub metrics: Option<LayoutMetrics>,
    /// Layout hash of the node with the most blue work.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sink_block: Option<String>,
}

fn metrics_or_empty<S: Serializer>(
    metrics: &Option<LayoutMetrics>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match metrics {
        Some(metrics) => metrics.serialize(serializer),
        None => serializer.serialize_map(Some(0))?.end(),
    }
}

/// Which nodes [`DagLayout::filter`] keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterStatus {
    #[default]
    All,
    Tips,
    Sink,
    Orphans,
    Blue,
    Red,
}

impl From<&str> for FilterStatus {
    /// Unknown names keep everything.
    fn from(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "tips" => FilterStatus::Tips,
            "sink" => FilterStatus::Sink,
            "orphans" => FilterStatus::Orphans,
            "blue" => FilterStatus::Blue,
            "red" => FilterStatus::Red,
            _ => FilterStatus::All,
        }
    }
}

/// A status filter plus an optional hash search; the search wins when set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeFilter {
    pub status: FilterStatus,
    pub query: Option<String>,
}

impl DagLayout {
    /// Returns a copy holding only the nodes that match `filter`.
    ///
    /// Edges survive when both ends do. Metrics and the sink still describe
    /// the whole page.
    pub fn filter(&self, filter: &NodeFilter) -> DagLayout {
        let query = filter
            .query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_lowercase);

        let nodes: Vec<LayoutNode> = self
            .nodes
            .iter()
            .filter(|node| match &query {
                Some(q) => node.layout_hash.to_lowercase().contains(q.as_str()),
                None => match filter.status {
                    FilterStatus::All => true,
                    FilterStatus::Tips => node.block.is_tip,
                    FilterStatus::Sink => self.sink_block.as_deref() == Some(&node.layout_hash),
                    FilterStatus::Orphans => node.is_orphan,
                    FilterStatus::Blue => node.color == NodeColor::Blue,
                    FilterStatus::Red => node.color == NodeColor::Red,
                },
            })
            .cloned()
            .collect();

        let kept: HashSet<usize> = nodes.iter().map(|n| n.index).collect();
        let edges = self
            .edges
            .iter()
            .filter(|e| kept.contains(&e.from) && kept.contains(&e.to))
            .copied()
            .collect();

        DagLayout {
            nodes,
            edges,
            metrics: self.metrics.clone(),
            sink_block: self.sink_block.clone(),
        }
    }
}

/// Lays out `blocks` in page order.
pub fn layout(blocks: &[Block], options: &LayoutOptions) -> DagLayout {
    if blocks.is_empty() {
        return DagLayout::default();
    }

    let group_size = options.group_size.max(1) as u64;
    let layout_hashes: Vec<String> = blocks
        .iter()
        .enumerate()
        .map(|(i, b)| b.hash.clone().unwrap_or_else(|| format!("block_{}", i)))
        .collect();

    let heights: Vec<u64> = blocks
        .iter()
        .enumerate()
        .map(|(i, b)| match options.grouping {
            Grouping::Height => b.height.unwrap_or(i as u64 / group_size),
            Grouping::TimeBucket { millis } => {
                b.timestamp.timestamp_millis().max(0) as u64 / millis.max(1)
            }
        })
        .collect();

    // Layers in order of first appearance.
    let mut layers: IndexMap<u64, Vec<usize>> = IndexMap::new();
    for (i, height) in heights.iter().enumerate() {
        layers.entry(*height).or_default().push(i);
    }

    let mut placement: Vec<(usize, [f64; 3])> = vec![(0, [0.0; 3]); blocks.len()];
    for (layer, members) in layers.values().enumerate() {
        let center = (members.len() as f64 - 1.0) / 2.0;
        let y = layer as f64 * options.layer_spacing;
        for (slot, &i) in members.iter().enumerate() {
            let x = (slot as f64 - center) * options.node_spacing;
            let z = if options.depth > 0.0 {
                (slot as f64 * 0.5).sin() * options.depth
            } else {
                0.0
            };
            placement[i] = (layer, [x, y, z]);
        }
    }

    let parent_ids: Vec<Vec<String>> = match options.edge_mode {
        EdgeMode::Sequential => (0..blocks.len())
            .map(|i| match i {
                0 => Vec::new(),
                _ => vec![layout_hashes[i - 1].clone()],
            })
            .collect(),
        EdgeMode::ParentHashes => blocks.iter().map(|b| b.parents.clone()).collect(),
    };

    let edges: Vec<LayoutEdge> = match options.edge_mode {
        EdgeMode::Sequential => (1..blocks.len())
            .map(|to| LayoutEdge { from: to - 1, to })
            .collect(),
        EdgeMode::ParentHashes => {
            let by_hash: HashMap<&str, usize> = layout_hashes
                .iter()
                .enumerate()
                .map(|(i, h)| (h.as_str(), i))
                .collect();
            parent_ids
                .iter()
                .enumerate()
                .flat_map(|(to, parents)| {
                    parents
                        .iter()
                        .filter_map(|p| by_hash.get(p.as_str()))
                        .map(move |&from| LayoutEdge { from, to })
                        .collect::<Vec<_>>()
                })
                .collect()
        }
    };

    let referenced: HashSet<&str> = parent_ids
        .iter()
        .flatten()
        .map(String::as_str)
        .collect();
    let orphaned: Vec<bool> = layout_hashes
        .iter()
        .map(|h| !referenced.contains(h.as_str()))
        .collect();

    let mut sink = 0;
    for (i, block) in blocks.iter().enumerate() {
        if block.weight > blocks[sink].weight {
            sink = i;
        }
    }

    let nodes: Vec<LayoutNode> = blocks
        .iter()
        .zip(parent_ids)
        .enumerate()
        .map(|(i, (block, parent_ids))| {
            let (layer, position) = placement[i];
            let mut block = block.clone();
            block.height = Some(heights[i]);
            LayoutNode {
                blue_work: block.weight,
                block,
                index: i,
                layout_hash: layout_hashes[i].clone(),
                layer,
                color: NodeColor::for_index(i),
                position,
                is_orphan: orphaned[i],
                parent_ids,
            }
        })
        .collect();

    let min_height = heights.iter().copied().min().unwrap_or(0);
    let max_height = heights.iter().copied().max().unwrap_or(0);
    let metrics = LayoutMetrics {
        total_blocks: nodes.len(),
        tips: nodes.iter().filter(|n| n.block.is_tip).count(),
        orphans: nodes.iter().filter(|n| n.is_orphan).count(),
        connections: edges.len(),
        avg_parents_per_block: edges.len() as f64 / nodes.len() as f64,
        height_range: max_height - min_height,
    };

    DagLayout {
        sink_block: Some(layout_hashes[sink].clone()),
        nodes,
        edges,
        metrics: Some(metrics),
    }
}

/// Lays out arbitrary JSON.
///
/// Array elements may be raw upstream blocks (recognised by a `header` or
/// `verboseData` key) or already-normalized blocks. Anything else yields the
/// empty layout.
pub fn layout_value(value: &Value, options: &LayoutOptions) -> DagLayout {
    let Some(items) = value.as_array() else {
        log::warn!("Layout input is not an array, returning empty layout");
        return DagLayout::default();
    };

    let blocks: Vec<Block> = items
        .iter()
        .filter_map(|item| {
            if item.get("header").is_some() || item.get("verboseData").is_some() {
                return Some(normalize::normalize_block(item));
            }
            match serde_json::from_value::<Block>(item.clone()) {
                Ok(block) => Some(block),
                Err(e) => {
                    log::warn!("Skipping malformed block in layout input: {}", e);
                    None
                }
            }
        })
        .collect();

    layout(&blocks, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn blocks(n: usize) -> Vec<Block> {
        (0..n)
            .map(|i| Block {
                hash: Some(format!("h{}", i)),
                is_tip: i >= n.saturating_sub(2),
                ..Block::default()
            })
            .collect()
    }

    fn with_weights(weights: &[u128]) -> Vec<Block> {
        weights
            .iter()
            .enumerate()
            .map(|(i, w)| Block {
                hash: Some(format!("w{}", i)),
                weight: *w,
                ..Block::default()
            })
            .collect()
    }

    #[test]
    fn test_empty_layout_shape() {
        let dag = layout(&[], &LayoutOptions::default());
        assert_eq!(
            serde_json::to_value(&dag).unwrap(),
            json!({ "nodes": [], "edges": [], "metrics": {} })
        );
    }

    #[test]
    fn test_ten_blocks_two_layers() {
        let dag = layout(&blocks(10), &LayoutOptions::default());

        assert_eq!(dag.edges.len(), 9);
        assert!(dag.nodes[..5].iter().all(|n| n.layer == 0 && n.height() == 0));
        assert!(dag.nodes[5..].iter().all(|n| n.layer == 1 && n.height() == 1));

        let xs: Vec<f64> = dag.nodes[..5].iter().map(|n| n.position[0]).collect();
        assert_eq!(xs, vec![-4.0, -2.0, 0.0, 2.0, 4.0]);
        assert_eq!(dag.nodes[7].position[1], 3.0);
        assert_eq!(dag.nodes[7].position[2], 0.0);
    }

    #[test]
    fn test_single_block() {
        let dag = layout(&blocks(1), &LayoutOptions::default());

        assert_eq!(dag.nodes[0].position, [0.0, 0.0, 0.0]);
        assert!(dag.edges.is_empty());
        assert_eq!(dag.sink_block.as_deref(), Some("h0"));
        assert!(dag.nodes[0].is_orphan);

        let metrics = dag.metrics.unwrap();
        assert_eq!(metrics.avg_parents_per_block, 0.0);
        assert_eq!(metrics.orphans, 1);
    }

    #[test]
    fn test_sequential_orphan_is_last_block() {
        let dag = layout(&blocks(4), &LayoutOptions::default());

        let orphans: Vec<usize> = dag
            .nodes
            .iter()
            .filter(|n| n.is_orphan)
            .map(|n| n.index)
            .collect();
        assert_eq!(orphans, vec![3]);
        assert_eq!(dag.nodes[2].parent_ids, vec!["h1"]);
        assert!(dag.nodes[0].parent_ids.is_empty());
    }

    #[test]
    fn test_sink_first_max_wins() {
        let dag = layout(&with_weights(&[5, 20, 20, 3]), &LayoutOptions::default());
        assert_eq!(dag.sink_block.as_deref(), Some("w1"));
        assert_eq!(dag.nodes[1].blue_work, 20);
    }

    #[test]
    fn test_metrics() {
        let dag = layout(&blocks(10), &LayoutOptions::default());
        let metrics = dag.metrics.unwrap();

        assert_eq!(metrics.total_blocks, 10);
        assert_eq!(metrics.connections, 9);
        assert!((metrics.avg_parents_per_block - 0.9).abs() < 1e-12);
        assert_eq!(metrics.tips, 2);
        assert_eq!(metrics.height_range, 1);
    }

    #[test]
    fn test_colors_and_fallback_hash() {
        let mut input = blocks(4);
        input[2].hash = None;
        let dag = layout(&input, &LayoutOptions::default());

        let colors: Vec<NodeColor> = dag.nodes.iter().map(|n| n.color).collect();
        assert_eq!(
            colors,
            vec![NodeColor::Blue, NodeColor::Red, NodeColor::Red, NodeColor::Blue]
        );
        assert_eq!(dag.nodes[2].layout_hash, "block_2");
        assert_eq!(dag.nodes[3].parent_ids, vec!["block_2"]);
    }

    #[test]
    fn test_explicit_height_first_appearance_order() {
        let mut input = blocks(3);
        input[0].height = Some(9);
        input[1].height = Some(2);
        input[2].height = Some(9);
        let dag = layout(&input, &LayoutOptions::default());

        assert_eq!(dag.nodes[0].layer, 0);
        assert_eq!(dag.nodes[1].layer, 1);
        assert_eq!(dag.nodes[2].layer, 0);
        assert_eq!(dag.nodes[0].position[0], -1.0);
        assert_eq!(dag.nodes[2].position[0], 1.0);
        assert_eq!(dag.metrics.unwrap().height_range, 7);
    }

    #[test]
    fn test_time_bucket_grouping_with_depth() {
        let input: Vec<Block> = [0i64, 30_000, 61_000]
            .iter()
            .map(|ms| Block {
                timestamp: chrono::DateTime::from_timestamp_millis(*ms).unwrap(),
                ..Block::default()
            })
            .collect();
        let options = LayoutOptions::default()
            .grouping(Grouping::TimeBucket { millis: 60_000 })
            .depth(2.0);
        let dag = layout(&input, &options);

        assert_eq!(dag.nodes[1].layer, 0);
        assert_eq!(dag.nodes[2].layer, 1);
        assert_eq!(dag.nodes[0].position[2], 0.0);
        assert!((dag.nodes[1].position[2] - 0.5f64.sin() * 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_grouping_from_query() {
        assert_eq!(
            Grouping::from_query("time", None),
            Grouping::TimeBucket {
                millis: DEFAULT_BUCKET_MILLIS
            }
        );
        assert_eq!(
            Grouping::from_query("TIME", Some(1_000)),
            Grouping::TimeBucket { millis: 1_000 }
        );
        assert_eq!(
            Grouping::from_query("time", Some(0)),
            Grouping::TimeBucket {
                millis: DEFAULT_BUCKET_MILLIS
            }
        );
        assert_eq!(Grouping::from_query("height", Some(1_000)), Grouping::Height);
        assert_eq!(Grouping::from_query("bogus", None), Grouping::Height);
    }

    #[test]
    fn test_parent_hash_edges() {
        let input = vec![
            Block {
                hash: Some("a".into()),
                ..Block::default()
            },
            Block {
                hash: Some("b".into()),
                parents: vec!["a".into(), "outside".into()],
                ..Block::default()
            },
            Block {
                hash: Some("c".into()),
                parents: vec!["a".into(), "b".into()],
                ..Block::default()
            },
        ];
        let dag = layout(&input, &LayoutOptions::default().edge_mode(EdgeMode::ParentHashes));

        assert_eq!(
            dag.edges,
            vec![
                LayoutEdge { from: 0, to: 1 },
                LayoutEdge { from: 0, to: 2 },
                LayoutEdge { from: 1, to: 2 },
            ]
        );
        assert!(!dag.nodes[0].is_orphan);
        assert!(dag.nodes[2].is_orphan);
    }

    #[test]
    fn test_zero_group_size_does_not_panic() {
        let dag = layout(&blocks(3), &LayoutOptions::default().group_size(0));
        assert_eq!(dag.nodes[2].height(), 2);
    }

    #[test]
    fn test_node_json_is_flattened() {
        let dag = layout(&blocks(2), &LayoutOptions::default());
        let json = serde_json::to_value(&dag).unwrap();
        let node = &json["nodes"][1];

        assert_eq!(node["hash"], json!("h1"));
        assert_eq!(node["layoutHash"], json!("h1"));
        assert_eq!(node["height"], json!(0));
        assert_eq!(node["color"], json!("red"));
        assert_eq!(node["parentIds"], json!(["h0"]));
        assert_eq!(node["position"], json!([1.0, 0.0, 0.0]));
        assert_eq!(json["sinkBlock"], json!("h0"));
    }

    #[test]
    fn test_filter() {
        let dag = layout(&with_weights(&[1, 9, 3, 4, 5, 6, 7]), &LayoutOptions::default());

        let sink = dag.filter(&NodeFilter {
            status: FilterStatus::Sink,
            query: None,
        });
        assert_eq!(sink.nodes.len(), 1);
        assert_eq!(sink.nodes[0].layout_hash, "w1");
        assert!(sink.edges.is_empty());

        let blue = dag.filter(&NodeFilter {
            status: FilterStatus::Blue,
            query: None,
        });
        let indexes: Vec<usize> = blue.nodes.iter().map(|n| n.index).collect();
        assert_eq!(indexes, vec![0, 3, 6]);

        let all = dag.filter(&NodeFilter::default());
        assert_eq!(all.nodes.len(), 7);
        assert_eq!(all.edges.len(), 6);
    }

    #[test]
    fn test_search_wins_over_status() {
        let dag = layout(&with_weights(&[1, 2, 3]), &LayoutOptions::default());
        let found = dag.filter(&NodeFilter {
            status: FilterStatus::Orphans,
            query: Some("W1".into()),
        });

        assert_eq!(found.nodes.len(), 1);
        assert_eq!(found.nodes[0].layout_hash, "w1");
    }

    #[test]
    fn test_lenient_option_names() {
        assert_eq!(FilterStatus::from("Orphans"), FilterStatus::Orphans);
        assert_eq!(FilterStatus::from("bogus"), FilterStatus::All);
        assert_eq!(EdgeMode::from("parents"), EdgeMode::ParentHashes);
        assert_eq!(EdgeMode::from(""), EdgeMode::Sequential);
    }

    #[test]
    fn test_layout_value_is_fail_soft() {
        let options = LayoutOptions::default();
        for input in [json!(null), json!({ "blocks": [] }), json!("x"), json!([])] {
            let dag = layout_value(&input, &options);
            assert!(dag.nodes.is_empty());
            assert!(dag.metrics.is_none());
        }
    }

    #[test]
    fn test_layout_value_accepts_raw_and_normalized() {
        let input = json!([
            { "verboseData": { "hash": "raw" }, "header": { "blueWork": "ff" } },
            { "hash": "plain", "weight": 3 },
            42
        ]);
        let dag = layout_value(&input, &LayoutOptions::default());

        assert_eq!(dag.nodes.len(), 2);
        assert_eq!(dag.nodes[0].layout_hash, "raw");
        assert_eq!(dag.nodes[0].blue_work, 255);
        assert_eq!(dag.nodes[1].layout_hash, "plain");
    }
}
