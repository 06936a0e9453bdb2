//! Asset Dependency Graph
//!
//! Downstream blast radius of a schema change. Edges are loaded into a petgraph
//! snapshot once per traversal, so walking never holds a store lock and never
//! blocks writers. Cycles are handled with a visited-set, not by recursion.

mod impact;
mod walker;

pub use impact::{AffectedAsset, AffectedTeam, ImpactReport};
pub(crate) use impact::affected_teams;
pub use walker::{DependencyGraphWalker, Traversal, VisitedAsset};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashMap;

use crate::model::{AssetId, DependencyEdge, DependencyType};

/// Immutable view of the dependency edges at one instant
///
/// Graph edges point from consumer to producer, matching [`DependencyEdge`].
#[derive(Debug, Default)]
pub struct DependencySnapshot {
    graph: DiGraph<AssetId, DependencyType>,
    node_indices: HashMap<AssetId, NodeIndex>,
}

impl DependencySnapshot {
    pub fn from_edges<'a>(edges: impl IntoIterator<Item = &'a DependencyEdge>) -> Self {
        let mut snapshot = Self::default();
        for edge in edges {
            let consumer = snapshot.node(edge.consumer);
            let producer = snapshot.node(edge.producer);
            if snapshot.graph.find_edge(consumer, producer).is_none() {
                snapshot.graph.add_edge(consumer, producer, edge.dependency_type);
            }
        }
        snapshot
    }

    fn node(&mut self, asset_id: AssetId) -> NodeIndex {
        if let Some(&idx) = self.node_indices.get(&asset_id) {
            return idx;
        }
        let idx = self.graph.add_node(asset_id);
        self.node_indices.insert(asset_id, idx);
        idx
    }

    pub fn asset_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Immediate consumers of an asset, in edge insertion order
    pub fn dependents(&self, asset_id: AssetId) -> Vec<(AssetId, DependencyType)> {
        let Some(&node_idx) = self.node_indices.get(&asset_id) else {
            return Vec::new();
        };

        let mut dependents: Vec<(AssetId, DependencyType)> = self
            .graph
            .edges_directed(node_idx, Direction::Incoming)
            .filter_map(|e| self.graph.node_weight(e.source()).map(|id| (*id, *e.weight())))
            .collect();
        // petgraph yields incoming edges newest first
        dependents.reverse();
        dependents
    }
}
