//! Impact reports: traversal joined with consumer registrations

use std::collections::HashSet;

use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{DependencyGraphWalker, DependencySnapshot, Traversal};
use crate::classify::{classify, ChangeType};
use crate::diff::{compare, Change};
use crate::error::Result;
use crate::model::{AssetId, DependencyType, RegistrationStatus, TeamId};
use crate::schema::SchemaDocument;
use crate::store::{AssetStore, ContractStore, DependencySource, RegistrationStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffectedAsset {
    pub asset_id: AssetId,
    /// Unknown assets referenced only by edges have no FQN
    pub fqn: Option<String>,
    pub depth: usize,
    pub dependency_type: DependencyType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffectedTeam {
    pub team_id: TeamId,
    /// Asset through which the team is affected
    pub asset_id: AssetId,
    /// 0 for consumers registered on the changed asset itself
    pub depth: usize,
    pub pinned_version: Option<Version>,
}

/// Blast radius of a proposed schema. Derived, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactReport {
    pub asset_id: AssetId,
    pub change_type: ChangeType,
    pub breaking_changes: Vec<Change>,
    pub affected_assets: Vec<AffectedAsset>,
    pub affected_teams: Vec<AffectedTeam>,
    pub depth_reached: usize,
    pub truncated: bool,
    pub safe_to_publish: bool,
}

impl ImpactReport {
    pub fn team_ids(&self) -> Vec<TeamId> {
        self.affected_teams.iter().map(|t| t.team_id).collect()
    }
}

impl DependencyGraphWalker {
    /// Diff `proposed` against the asset's active contract and collect every
    /// downstream asset and consumer team within `max_depth` hops.
    ///
    /// With no active contract there is nothing to break: the report is
    /// empty, minor and safe.
    pub fn compute_impact<S>(
        &self,
        store: &S,
        asset_id: AssetId,
        proposed: &SchemaDocument,
        max_depth: Option<usize>,
    ) -> Result<ImpactReport>
    where
        S: AssetStore + ContractStore + RegistrationStore + DependencySource + ?Sized,
    {
        store.get_asset(asset_id)?;

        let Some(active) = store.active_contract(asset_id)? else {
            return Ok(ImpactReport {
                asset_id,
                change_type: ChangeType::Minor,
                breaking_changes: Vec::new(),
                affected_assets: Vec::new(),
                affected_teams: Vec::new(),
                depth_reached: 0,
                truncated: false,
                safe_to_publish: true,
            });
        };

        let classification = classify(
            &compare(&active.schema, proposed),
            active.compatibility_mode,
        );
        let breaking_changes = classification.breaking_changes();

        let edges = store.edges()?;
        let snapshot = DependencySnapshot::from_edges(&edges);
        let traversal = self.traverse(&snapshot, asset_id, max_depth);

        let mut affected_assets = Vec::with_capacity(traversal.visited.len());
        for visit in &traversal.visited {
            let fqn = store.get_asset(visit.asset_id).ok().map(|a| a.fqn);
            affected_assets.push(AffectedAsset {
                asset_id: visit.asset_id,
                fqn,
                depth: visit.depth,
                dependency_type: visit.dependency_type,
            });
        }

        let affected_teams = affected_teams(store, asset_id, &traversal)?;

        debug!(
            asset = %asset_id,
            breaking = breaking_changes.len(),
            assets = affected_assets.len(),
            teams = affected_teams.len(),
            "Computed impact"
        );

        Ok(ImpactReport {
            asset_id,
            change_type: classification.change_type,
            safe_to_publish: breaking_changes.is_empty(),
            breaking_changes,
            affected_assets,
            affected_teams,
            depth_reached: traversal.depth_reached,
            truncated: traversal.truncated,
        })
    }
}

/// Active consumer teams of the start asset and every visited asset,
/// each listed once at its shallowest depth
pub(crate) fn affected_teams<S>(
    store: &S,
    start: AssetId,
    traversal: &Traversal,
) -> Result<Vec<AffectedTeam>>
where
    S: RegistrationStore + ?Sized,
{
    // Breadth-first order means the first sighting of a team is its shallowest
    let mut seen_teams = HashSet::new();
    let mut teams = Vec::new();
    let reached = std::iter::once((start, 0))
        .chain(traversal.visited.iter().map(|v| (v.asset_id, v.depth)));
    for (reached_asset, depth) in reached {
        for registration in store.registrations_for_asset(reached_asset)? {
            if registration.status != RegistrationStatus::Active
                || !seen_teams.insert(registration.consumer_team_id)
            {
                continue;
            }
            teams.push(AffectedTeam {
                team_id: registration.consumer_team_id,
                asset_id: reached_asset,
                depth,
                pinned_version: registration.pinned_version,
            });
        }
    }
    Ok(teams)
}
