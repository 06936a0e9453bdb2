//! Persistence collaborators
//!
//! The core never owns durable storage. It talks to these traits, and
//! [`MemoryStore`] is the in-process implementation used by the CLI and tests.
//!
//! The one primitive a backing store must get right is
//! [`ContractStore::publish`]: a compare-and-swap on the asset's
//! [`ContractHead`] that deprecates the prior contract and activates the new
//! one in a single step.

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ContractError, Result};
use crate::model::{
    Acknowledgment, Asset, AssetId, AuditEntry, Contract, ContractId, ContractStatus,
    DependencyEdge, Proposal, ProposalId, ProposalStatus, Registration, RegistrationStatus, TeamId,
};

/// Versioned pointer to an asset's active contract
///
/// `revision` increments on every successful publish and is the token a
/// writer must present to [`ContractStore::publish`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractHead {
    pub active: Option<ContractId>,
    pub revision: u64,
}

pub trait AssetStore: Send + Sync {
    fn get_asset(&self, id: AssetId) -> Result<Asset>;
    fn put_asset(&self, asset: Asset) -> Result<()>;
}

pub trait ContractStore: Send + Sync {
    fn head(&self, asset_id: AssetId) -> Result<ContractHead>;
    fn get_contract(&self, id: ContractId) -> Result<Contract>;
    /// All contracts for an asset, oldest first
    fn contracts_for_asset(&self, asset_id: AssetId) -> Result<Vec<Contract>>;

    /// Activate `contract` if the asset's head is still at `expected_revision`.
    ///
    /// The previously active contract (if any) is marked deprecated in the same
    /// step. Fails with [`ContractError::Conflict`] when another writer got
    /// there first, and with a validation error when the version is not
    /// strictly greater than every version already published for the asset.
    fn publish(&self, expected_revision: u64, contract: Contract) -> Result<ContractHead>;

    fn active_contract(&self, asset_id: AssetId) -> Result<Option<Contract>> {
        match self.head(asset_id)?.active {
            Some(id) => self.get_contract(id).map(Some),
            None => Ok(None),
        }
    }
}

pub trait ProposalStore: Send + Sync {
    fn insert_proposal(&self, proposal: Proposal) -> Result<()>;
    fn get_proposal(&self, id: ProposalId) -> Result<Proposal>;
    fn update_proposal(&self, proposal: &Proposal) -> Result<()>;
    fn proposals_for_asset(&self, asset_id: AssetId) -> Result<Vec<Proposal>>;
    fn proposals_with_status(&self, status: ProposalStatus) -> Result<Vec<Proposal>>;

    /// Insert or replace the acknowledgment for (proposal, team)
    fn upsert_acknowledgment(&self, ack: Acknowledgment) -> Result<()>;
    /// Every current acknowledgment for a proposal, in first-response order
    fn acknowledgments(&self, proposal_id: ProposalId) -> Result<Vec<Acknowledgment>>;
}

pub trait RegistrationStore: Send + Sync {
    fn put_registration(&self, registration: Registration) -> Result<()>;
    fn registrations_for_asset(&self, asset_id: AssetId) -> Result<Vec<Registration>>;

    /// Teams holding an active registration on the asset
    fn active_consumers(&self, asset_id: AssetId) -> Result<BTreeSet<TeamId>> {
        Ok(self
            .registrations_for_asset(asset_id)?
            .into_iter()
            .filter(|r| r.status == RegistrationStatus::Active)
            .map(|r| r.consumer_team_id)
            .collect())
    }
}

/// Read-only source of dependency edges
pub trait DependencySource: Send + Sync {
    fn edges(&self) -> Result<Vec<DependencyEdge>>;
}

/// Append-only audit trail
pub trait AuditLog: Send + Sync {
    fn append(&self, entry: AuditEntry) -> Result<()>;
    fn entries_for(&self, entity_id: Uuid) -> Result<Vec<AuditEntry>>;
}

/// Everything the orchestrators need from persistence
pub trait Store:
    AssetStore + ContractStore + ProposalStore + RegistrationStore + DependencySource + AuditLog
{
}

impl<T> Store for T where
    T: AssetStore + ContractStore + ProposalStore + RegistrationStore + DependencySource + AuditLog
{
}

#[derive(Default)]
struct Tables {
    assets: HashMap<AssetId, Asset>,
    contracts: HashMap<ContractId, Contract>,
    contracts_by_asset: HashMap<AssetId, Vec<ContractId>>,
    heads: HashMap<AssetId, ContractHead>,
    proposals: IndexMap<ProposalId, Proposal>,
    acknowledgments: HashMap<ProposalId, IndexMap<TeamId, Acknowledgment>>,
    registrations: HashMap<AssetId, Vec<Registration>>,
    edges: Vec<DependencyEdge>,
    audit: Vec<AuditEntry>,
}

/// In-memory store behind a single lock
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_edge(&self, edge: DependencyEdge) {
        let mut tables = self.write();
        if !tables.edges.contains(&edge) {
            tables.edges.push(edge);
        }
    }

    /// Full audit trail in append order
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.read().audit.clone()
    }
}

impl AssetStore for MemoryStore {
    fn get_asset(&self, id: AssetId) -> Result<Asset> {
        self.read()
            .assets
            .get(&id)
            .cloned()
            .ok_or_else(|| ContractError::not_found("asset", id))
    }

    fn put_asset(&self, asset: Asset) -> Result<()> {
        self.write().assets.insert(asset.id, asset);
        Ok(())
    }
}

impl ContractStore for MemoryStore {
    fn head(&self, asset_id: AssetId) -> Result<ContractHead> {
        Ok(self.read().heads.get(&asset_id).copied().unwrap_or_default())
    }

    fn get_contract(&self, id: ContractId) -> Result<Contract> {
        self.read()
            .contracts
            .get(&id)
            .cloned()
            .ok_or_else(|| ContractError::not_found("contract", id))
    }

    fn contracts_for_asset(&self, asset_id: AssetId) -> Result<Vec<Contract>> {
        let tables = self.read();
        Ok(tables
            .contracts_by_asset
            .get(&asset_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.contracts.get(id).cloned())
            .collect())
    }

    fn publish(&self, expected_revision: u64, mut contract: Contract) -> Result<ContractHead> {
        let mut tables = self.write();
        let asset_id = contract.asset_id;
        let head = tables.heads.get(&asset_id).copied().unwrap_or_default();

        if head.revision != expected_revision {
            return Err(ContractError::Conflict {
                asset_id,
                expected: expected_revision,
                actual: head.revision,
            });
        }

        let existing = tables.contracts_by_asset.get(&asset_id).into_iter().flatten();
        for id in existing {
            if let Some(prior) = tables.contracts.get(id) {
                if prior.version >= contract.version {
                    return Err(ContractError::validation(
                        "version",
                        format!(
                            "version {} must be greater than existing version {}",
                            contract.version, prior.version
                        ),
                    ));
                }
            }
        }

        // Both mutations below happen under the same write guard
        if let Some(prior_id) = head.active {
            if let Some(prior) = tables.contracts.get_mut(&prior_id) {
                prior.status = ContractStatus::Deprecated;
            }
        }

        contract.status = ContractStatus::Active;
        let next = ContractHead {
            active: Some(contract.id),
            revision: head.revision + 1,
        };
        tables.contracts_by_asset.entry(asset_id).or_default().push(contract.id);
        tables.contracts.insert(contract.id, contract);
        tables.heads.insert(asset_id, next);
        Ok(next)
    }
}

impl ProposalStore for MemoryStore {
    fn insert_proposal(&self, proposal: Proposal) -> Result<()> {
        self.write().proposals.insert(proposal.id, proposal);
        Ok(())
    }

    fn get_proposal(&self, id: ProposalId) -> Result<Proposal> {
        self.read()
            .proposals
            .get(&id)
            .cloned()
            .ok_or_else(|| ContractError::not_found("proposal", id))
    }

    fn update_proposal(&self, proposal: &Proposal) -> Result<()> {
        let mut tables = self.write();
        match tables.proposals.get_mut(&proposal.id) {
            Some(slot) => {
                *slot = proposal.clone();
                Ok(())
            }
            None => Err(ContractError::not_found("proposal", proposal.id)),
        }
    }

    fn proposals_for_asset(&self, asset_id: AssetId) -> Result<Vec<Proposal>> {
        Ok(self
            .read()
            .proposals
            .values()
            .filter(|p| p.asset_id == asset_id)
            .cloned()
            .collect())
    }

    fn proposals_with_status(&self, status: ProposalStatus) -> Result<Vec<Proposal>> {
        Ok(self
            .read()
            .proposals
            .values()
            .filter(|p| p.status() == status)
            .cloned()
            .collect())
    }

    fn upsert_acknowledgment(&self, ack: Acknowledgment) -> Result<()> {
        let mut tables = self.write();
        if !tables.proposals.contains_key(&ack.proposal_id) {
            return Err(ContractError::not_found("proposal", ack.proposal_id));
        }
        tables
            .acknowledgments
            .entry(ack.proposal_id)
            .or_default()
            .insert(ack.consumer_team_id, ack);
        Ok(())
    }

    fn acknowledgments(&self, proposal_id: ProposalId) -> Result<Vec<Acknowledgment>> {
        Ok(self
            .read()
            .acknowledgments
            .get(&proposal_id)
            .map(|acks| acks.values().cloned().collect())
            .unwrap_or_default())
    }
}

impl RegistrationStore for MemoryStore {
    fn put_registration(&self, registration: Registration) -> Result<()> {
        let mut tables = self.write();
        let registrations = tables.registrations.entry(registration.asset_id).or_default();
        match registrations
            .iter_mut()
            .find(|r| r.consumer_team_id == registration.consumer_team_id)
        {
            Some(existing) => *existing = registration,
            None => registrations.push(registration),
        }
        Ok(())
    }

    fn registrations_for_asset(&self, asset_id: AssetId) -> Result<Vec<Registration>> {
        Ok(self.read().registrations.get(&asset_id).cloned().unwrap_or_default())
    }
}

impl DependencySource for MemoryStore {
    fn edges(&self) -> Result<Vec<DependencyEdge>> {
        Ok(self.read().edges.clone())
    }
}

impl AuditLog for MemoryStore {
    fn append(&self, entry: AuditEntry) -> Result<()> {
        self.write().audit.push(entry);
        Ok(())
    }

    fn entries_for(&self, entity_id: Uuid) -> Result<Vec<AuditEntry>> {
        Ok(self
            .read()
            .audit
            .iter()
            .filter(|e| e.entity_id == entity_id)
            .cloned()
            .collect())
    }
}
