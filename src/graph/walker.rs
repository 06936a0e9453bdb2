//! Bounded breadth-first walk over consumer edges

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::DependencySnapshot;
use crate::config::ImpactConfig;
use crate::model::{AssetId, DependencyType};

/// An asset reached during traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitedAsset {
    pub asset_id: AssetId,
    /// Hops from the changed asset (direct consumers are at depth 1)
    pub depth: usize,
    /// Type of the edge through which the asset was first reached
    pub dependency_type: DependencyType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Traversal {
    /// Reached assets in breadth-first order, the start asset excluded
    pub visited: Vec<VisitedAsset>,
    pub depth_reached: usize,
    /// Unvisited consumers remained beyond the depth cap
    pub truncated: bool,
}

impl Traversal {
    pub fn contains(&self, asset_id: AssetId) -> bool {
        self.visited.iter().any(|v| v.asset_id == asset_id)
    }
}

pub struct DependencyGraphWalker {
    config: ImpactConfig,
}

impl DependencyGraphWalker {
    pub fn new(config: &ImpactConfig) -> Self {
        Self { config: config.clone() }
    }

    pub fn config(&self) -> &ImpactConfig {
        &self.config
    }

    /// Walk downstream from `start`, at most `max_depth` hops
    /// (configured default when `None`, always clamped to the configured maximum).
    pub fn traverse(
        &self,
        snapshot: &DependencySnapshot,
        start: AssetId,
        max_depth: Option<usize>,
    ) -> Traversal {
        let max_depth = self.config.effective_depth(max_depth);

        let mut seen: HashSet<AssetId> = HashSet::from([start]);
        let mut frontier: VecDeque<(AssetId, usize)> = VecDeque::from([(start, 0)]);
        let mut result = Traversal::default();

        while let Some((current, depth)) = frontier.pop_front() {
            let dependents = snapshot.dependents(current);

            if depth == max_depth {
                if dependents.iter().any(|(id, _)| !seen.contains(id)) {
                    result.truncated = true;
                }
                continue;
            }

            for (next, dependency_type) in dependents {
                if !seen.insert(next) {
                    continue;
                }
                result.visited.push(VisitedAsset {
                    asset_id: next,
                    depth: depth + 1,
                    dependency_type,
                });
                result.depth_reached = result.depth_reached.max(depth + 1);
                frontier.push_back((next, depth + 1));
            }
        }

        if result.truncated {
            warn!(
                asset = %start,
                max_depth,
                visited = result.visited.len(),
                "Dependency traversal truncated at depth cap"
            );
        } else {
            debug!(
                asset = %start,
                visited = result.visited.len(),
                depth = result.depth_reached,
                "Dependency traversal complete"
            );
        }

        result
    }
}
