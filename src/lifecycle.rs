//! Contract lifecycle
//!
//! Decides whether a proposed schema is published directly or routed through a
//! [`Proposal`], and owns the one-active-contract-per-asset invariant.
//!
//! Publishing is split in two phases. [`ContractLifecycle::prepare`] reads the
//! asset's [`ContractHead`](crate::store::ContractHead), diffs and classifies
//! against it, and returns a [`PublishPlan`]. Dropping the plan abandons the
//! publish with no side effects. [`ContractLifecycle::commit`] applies it
//! through the store's compare-and-swap; if another writer published in the
//! meantime the commit fails with [`ContractError::Conflict`] and the caller
//! must prepare again against the new head.

use std::sync::Arc;

use chrono::Duration;
use semver::Version;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::classify::{classify, ChangeType, Classification, CompatibilityMode};
use crate::config::CoreConfig;
use crate::diff::{compare, Change};
use crate::error::{ContractError, Result};
use crate::events::{DomainEvent, EventEnvelope, EventSink};
use crate::graph::{self, DependencyGraphWalker, DependencySnapshot, ImpactReport};
use crate::guarantees::{self, GuaranteeChange, GuaranteeMode, Guarantees};
use crate::model::{Actor, Asset, AssetId, AuditAction, AuditEntry, Contract, Proposal};
use crate::schema::SchemaDocument;
use crate::store::Store;
use crate::version::{self, VersionSuggestion};

/// A request to publish a schema for an asset
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub asset_id: AssetId,
    pub schema: SchemaDocument,
    pub guarantees: Guarantees,
    /// Mode stamped on the new contract; inherited from the active contract when unset
    pub compatibility_mode: Option<CompatibilityMode>,
    pub actor: Actor,
    /// Explicit version; suggested from the change type when unset
    pub version: Option<Version>,
    /// Set to force past a breaking verdict
    pub force_reason: Option<String>,
    /// Expire the resulting proposal once all migration deadlines pass
    pub auto_expire: bool,
}

impl PublishRequest {
    pub fn new(asset_id: AssetId, schema: SchemaDocument, actor: Actor) -> Self {
        Self {
            asset_id,
            schema,
            guarantees: Guarantees::default(),
            compatibility_mode: None,
            actor,
            version: None,
            force_reason: None,
            auto_expire: false,
        }
    }

    pub fn with_guarantees(mut self, guarantees: Guarantees) -> Self {
        self.guarantees = guarantees;
        self
    }

    pub fn with_mode(mut self, mode: CompatibilityMode) -> Self {
        self.compatibility_mode = Some(mode);
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn forced(mut self, reason: impl Into<String>) -> Self {
        self.force_reason = Some(reason.into());
        self
    }

    pub fn auto_expire(mut self, enabled: bool) -> Self {
        self.auto_expire = enabled;
        self
    }
}

/// What a prepared publish will do when committed
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Publish { version: Version },
    Propose,
}

/// A publish decision taken against a specific head revision
#[derive(Debug, Clone)]
pub struct PublishPlan {
    request: PublishRequest,
    asset: Asset,
    base: Option<Contract>,
    revision: u64,
    classification: Option<Classification>,
    guarantee_changes: Vec<GuaranteeChange>,
    breaking: bool,
    change_type: Option<ChangeType>,
    decision: Decision,
}

impl PublishPlan {
    pub fn decision(&self) -> &Decision {
        &self.decision
    }

    pub fn is_breaking(&self) -> bool {
        self.breaking
    }

    /// None for an asset's first contract
    pub fn change_type(&self) -> Option<ChangeType> {
        self.change_type
    }

    /// The active contract the plan was diffed against
    pub fn base(&self) -> Option<&Contract> {
        self.base.as_ref()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn changes(&self) -> &[Change] {
        self.classification.as_ref().map(|c| c.changes.as_slice()).unwrap_or_default()
    }

    pub fn guarantee_changes(&self) -> &[GuaranteeChange] {
        &self.guarantee_changes
    }
}

/// Result of a publish decision
#[derive(Debug, Clone)]
pub enum PublishOutcome {
    Published(Contract),
    Proposed(Proposal),
}

impl PublishOutcome {
    pub fn contract(&self) -> Option<&Contract> {
        match self {
            PublishOutcome::Published(contract) => Some(contract),
            PublishOutcome::Proposed(_) => None,
        }
    }

    pub fn proposal(&self) -> Option<&Proposal> {
        match self {
            PublishOutcome::Published(_) => None,
            PublishOutcome::Proposed(proposal) => Some(proposal),
        }
    }
}

pub struct ContractLifecycle<S: Store> {
    store: Arc<S>,
    events: Arc<dyn EventSink>,
    config: CoreConfig,
    walker: DependencyGraphWalker,
}

impl<S: Store> ContractLifecycle<S> {
    pub fn new(store: Arc<S>, events: Arc<dyn EventSink>, config: CoreConfig) -> Self {
        let walker = DependencyGraphWalker::new(&config.impact);
        Self {
            store,
            events,
            config,
            walker,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub(crate) fn emit(&self, event: DomainEvent) {
        self.events.emit(EventEnvelope::new(event));
    }

    /// Decide and apply in one step
    pub fn decide_publish(&self, request: PublishRequest) -> Result<PublishOutcome> {
        let plan = self.prepare(request)?;
        self.commit(plan)
    }

    /// Diff and classify against the current head without writing anything
    pub fn prepare(&self, request: PublishRequest) -> Result<PublishPlan> {
        let asset = self.store.get_asset(request.asset_id)?;
        if let Some(reason) = &request.force_reason {
            if reason.trim().is_empty() {
                return Err(ContractError::validation(
                    "force_reason",
                    "a forced publish needs a reason",
                ));
            }
        }

        let head = self.store.head(asset.id)?;
        let base = match head.active {
            Some(id) => Some(self.store.get_contract(id)?),
            None => None,
        };

        let Some(current) = &base else {
            let version = request.version.clone().unwrap_or_else(version::initial_version);
            debug!(asset = %asset.fqn, %version, "First contract for asset");
            return Ok(PublishPlan {
                request,
                asset,
                base: None,
                revision: head.revision,
                classification: None,
                guarantee_changes: Vec::new(),
                breaking: false,
                change_type: None,
                decision: Decision::Publish { version },
            });
        };

        let classification = classify(
            &compare(&current.schema, &request.schema),
            current.compatibility_mode,
        );
        let guarantee_changes = match asset.guarantee_mode {
            GuaranteeMode::Ignore => Vec::new(),
            _ => guarantees::diff_guarantees(&current.guarantees, &request.guarantees),
        };
        let guarantees_breaking = guarantees::is_breaking(&guarantee_changes, asset.guarantee_mode);

        let breaking = classification.breaking || guarantees_breaking;
        let change_type = if guarantees_breaking {
            ChangeType::Major
        } else {
            classification.change_type
        };

        debug!(
            asset = %asset.fqn,
            mode = %current.compatibility_mode,
            changes = classification.changes.len(),
            breaking,
            %change_type,
            "Classified proposed schema"
        );

        if let Some(requested) = &request.version {
            version::validate_explicit(
                requested,
                Some(&current.version),
                change_type,
                self.config.versioning.mode,
            )?;
        }

        let decision = if breaking && request.force_reason.is_none() {
            Decision::Propose
        } else {
            let version = request
                .version
                .clone()
                .unwrap_or_else(|| version::bump(&current.version, change_type));
            Decision::Publish { version }
        };

        Ok(PublishPlan {
            request,
            asset,
            revision: head.revision,
            base,
            classification: Some(classification),
            guarantee_changes,
            breaking,
            change_type: Some(change_type),
            decision,
        })
    }

    /// Apply a prepared plan
    pub fn commit(&self, plan: PublishPlan) -> Result<PublishOutcome> {
        match plan.decision.clone() {
            Decision::Publish { version } => {
                self.commit_publish(plan, version).map(PublishOutcome::Published)
            }
            Decision::Propose => self.commit_proposal(plan).map(PublishOutcome::Proposed),
        }
    }

    fn commit_publish(&self, plan: PublishPlan, version: Version) -> Result<Contract> {
        let request = plan.request;
        let mode = request
            .compatibility_mode
            .or(plan.base.as_ref().map(|c| c.compatibility_mode))
            .unwrap_or_default();

        let forced = request.force_reason.as_deref();

        let contract = Contract::new(
            plan.asset.id,
            version,
            request.schema,
            request.guarantees,
            mode,
            request.actor.clone(),
        );
        self.activate(
            &plan.asset,
            plan.revision,
            plan.base.as_ref(),
            contract,
            plan.change_type,
            &request.actor,
            forced,
        )
    }

    fn commit_proposal(&self, plan: PublishPlan) -> Result<Proposal> {
        let request = plan.request;
        let asset = plan.asset;
        let mode = request
            .compatibility_mode
            .or(plan.base.as_ref().map(|c| c.compatibility_mode))
            .unwrap_or_default();
        let breaking_changes = plan
            .classification
            .as_ref()
            .map(Classification::breaking_changes)
            .unwrap_or_default();
        let change_type = plan.change_type.unwrap_or(ChangeType::Major);

        let mut proposal = Proposal::new(
            asset.id,
            request.schema,
            request.guarantees,
            mode,
            breaking_changes,
            plan.guarantee_changes,
            change_type,
            request.actor.clone(),
        );
        proposal.requested_version = request.version;
        proposal.auto_expire = request.auto_expire;
        proposal.expires_at = self
            .config
            .proposals
            .default_expiration_days
            .map(|days| proposal.proposed_at + Duration::days(i64::from(days)));

        let snapshot = DependencySnapshot::from_edges(&self.store.edges()?);
        let traversal = self.walker.traverse(&snapshot, asset.id, None);
        let consumer_teams: Vec<_> =
            graph::affected_teams(self.store.as_ref(), asset.id, &traversal)?
                .into_iter()
            .map(|t| t.team_id)
            .collect();

        self.store.insert_proposal(proposal.clone())?;
        self.store.append(AuditEntry::new(
            "proposal",
            proposal.id,
            AuditAction::ProposalCreated,
            Some(&request.actor),
            json!({
                "asset_fqn": asset.fqn,
                "change_type": change_type,
                "breaking_changes": proposal.breaking_changes(),
                "guarantee_changes": proposal.guarantee_changes(),
            }),
        ))?;

        info!(
            asset = %asset.fqn,
            proposal = %proposal.id,
            breaking = proposal.breaking_changes().len(),
            consumers = consumer_teams.len(),
            "Breaking change requires consumer acknowledgment"
        );

        self.emit(DomainEvent::ProposalCreated {
            proposal_id: proposal.id,
            asset_id: asset.id,
            fqn: asset.fqn.clone(),
            breaking_changes: proposal.breaking_changes().to_vec(),
            change_type,
            actor: request.actor,
            consumer_teams,
        });

        Ok(proposal)
    }

    /// Publish an accepted proposal against whatever contract is active now.
    ///
    /// The version is bumped from the current head by the proposal's change
    /// type, or taken from the proposal's requested version.
    pub(crate) fn publish_proposal(
        &self,
        proposal: &Proposal,
        actor: &Actor,
        force_reason: Option<&str>,
    ) -> Result<Contract> {
        let asset = self.store.get_asset(proposal.asset_id)?;
        let head = self.store.head(asset.id)?;
        let base = match head.active {
            Some(id) => Some(self.store.get_contract(id)?),
            None => None,
        };
        let current_version = base.as_ref().map(|c| &c.version);

        let version = match &proposal.requested_version {
            Some(requested) => {
                version::validate_explicit(
                    requested,
                    current_version,
                    proposal.change_type,
                    self.config.versioning.mode,
                )?;
                requested.clone()
            }
            None => current_version
                .map(|v| version::bump(v, proposal.change_type))
                .unwrap_or_else(version::initial_version),
        };

        let contract = Contract::new(
            asset.id,
            version,
            proposal.proposed_schema.clone(),
            proposal.proposed_guarantees.clone(),
            proposal.compatibility_mode,
            actor.clone(),
        );
        self.activate(
            &asset,
            head.revision,
            base.as_ref(),
            contract,
            Some(proposal.change_type),
            actor,
            force_reason,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn activate(
        &self,
        asset: &Asset,
        revision: u64,
        prior: Option<&Contract>,
        contract: Contract,
        change_type: Option<ChangeType>,
        actor: &Actor,
        force_reason: Option<&str>,
    ) -> Result<Contract> {
        if let Some(reason) = force_reason {
            warn!(
                actor = %actor,
                reason,
                asset = %asset.fqn,
                version = %contract.version,
                "Force publishing contract"
            );
        }

        if let Err(err) = self.store.publish(revision, contract.clone()) {
            if let ContractError::Conflict { expected, actual, .. } = &err {
                warn!(
                    asset = %asset.fqn,
                    expected,
                    actual,
                    "Lost publish race; caller must re-diff"
                );
            }
            return Err(err);
        }

        let action = if force_reason.is_some() {
            AuditAction::ContractForcePublished
        } else {
            AuditAction::ContractPublished
        };
        self.store.append(AuditEntry::new(
            "contract",
            contract.id,
            action,
            Some(actor),
            json!({
                "asset_fqn": asset.fqn,
                "version": contract.version.to_string(),
                "change_type": change_type,
                "reason": force_reason,
                "schema_checksum": contract.schema_checksum.as_str(),
            }),
        ))?;
        if let Some(prior) = prior {
            self.store.append(AuditEntry::new(
                "contract",
                prior.id,
                AuditAction::ContractDeprecated,
                Some(actor),
                json!({ "superseded_by": contract.id, "version": prior.version.to_string() }),
            ))?;
        }

        info!(
            asset = %asset.fqn,
            version = %contract.version,
            contract = %contract.id,
            "Published contract"
        );

        self.emit(DomainEvent::ContractPublished {
            asset_id: asset.id,
            fqn: asset.fqn.clone(),
            contract_id: contract.id,
            version: contract.version.clone(),
            change_type,
            actor: actor.clone(),
            forced: force_reason.is_some(),
        });

        Ok(contract)
    }

    /// Suggest the next version for a proposed schema
    pub fn suggest_version(
        &self,
        asset_id: AssetId,
        schema: &SchemaDocument,
    ) -> Result<VersionSuggestion> {
        self.store.get_asset(asset_id)?;
        let Some(current) = self.store.active_contract(asset_id)? else {
            return Ok(version::suggest_version(None, ChangeType::Minor, false));
        };
        let classification =
            classify(&compare(&current.schema, schema), current.compatibility_mode);
        Ok(version::suggest_version(
            Some(&current.version),
            classification.change_type,
            classification.breaking,
        ))
    }

    /// Blast radius of a proposed schema
    pub fn compute_impact(
        &self,
        asset_id: AssetId,
        schema: &SchemaDocument,
        max_depth: Option<usize>,
    ) -> Result<ImpactReport> {
        self.walker.compute_impact(self.store.as_ref(), asset_id, schema, max_depth)
    }
}
