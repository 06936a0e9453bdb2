//! Proposal state machine
//!
//! ```text
//!            acknowledge (recomputed)
//!           ┌──────────┐
//!           ▼          │
//!        pending ──────┴──► approved ──publish──► published
//!         │  │  │              │                      ▲
//!         │  │  └──force───────┴───────force──────────┘
//!         │  ├──withdraw──► withdrawn
//!         │  ├──reject────► rejected
//!         └──┴──expire────► expired
//! ```
//!
//! Every transition for a proposal runs under that proposal's lock and derives
//! the aggregate status from the complete acknowledgment set, so concurrent
//! acknowledgments from different teams cannot lose an update.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::error::{ContractError, Result};
use crate::events::DomainEvent;
use crate::lifecycle::ContractLifecycle;
use crate::model::{
    AckResponse, Acknowledgment, Actor, AuditAction, AuditEntry, Contract, Proposal, ProposalId,
    ProposalStatus, TeamId,
};
use crate::store::Store;

/// Aggregate acknowledgment state for a proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalProgress {
    pub proposal_id: ProposalId,
    pub status: ProposalStatus,
    pub acknowledgments: Vec<Acknowledgment>,
    /// Registered consumers that have not approved yet
    pub pending_teams: Vec<TeamId>,
    pub approved: usize,
    pub blocked: usize,
    pub migrating: usize,
    pub total_consumers: usize,
}

/// Status implied by the current acknowledgments and registered consumers.
///
/// Any block keeps the proposal pending. Otherwise every registered consumer
/// must have approved; responses from unregistered teams never count as coverage.
pub fn aggregate_status(
    consumers: &BTreeSet<TeamId>,
    acknowledgments: &[Acknowledgment],
) -> ProposalStatus {
    if acknowledgments.iter().any(|a| a.response == AckResponse::Blocked) {
        return ProposalStatus::Pending;
    }
    let approved: BTreeSet<TeamId> = acknowledgments
        .iter()
        .filter(|a| a.response == AckResponse::Approved)
        .map(|a| a.consumer_team_id)
        .collect();
    if consumers.is_subset(&approved) {
        ProposalStatus::Approved
    } else {
        ProposalStatus::Pending
    }
}

pub struct ProposalWorkflow<S: Store> {
    lifecycle: Arc<ContractLifecycle<S>>,
    locks: Mutex<HashMap<ProposalId, Arc<Mutex<()>>>>,
}

impl<S: Store> ProposalWorkflow<S> {
    pub fn new(lifecycle: Arc<ContractLifecycle<S>>) -> Self {
        Self {
            lifecycle,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn store(&self) -> &S {
        self.lifecycle.store().as_ref()
    }

    fn lock_for(&self, proposal_id: ProposalId) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(proposal_id)
            .or_default()
            .clone()
    }

    /// Forget the lock of a proposal that reached a terminal status.
    ///
    /// A caller still holding the old lock sees the terminal status on reload
    /// and fails its transition, so a fresh lock cannot race it.
    fn release(&self, proposal_id: ProposalId) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&proposal_id);
    }

    /// Run `f` with the proposal's lock held and a freshly loaded copy
    fn with_proposal<T>(
        &self,
        proposal_id: ProposalId,
        f: impl FnOnce(Proposal) -> Result<T>,
    ) -> Result<T> {
        let lock = self.lock_for(proposal_id);
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let proposal = match self.store().get_proposal(proposal_id) {
            Ok(proposal) => proposal,
            Err(err) => {
                drop(guard);
                self.release(proposal_id);
                return Err(err);
            }
        };

        // Terminal proposals never change again; nothing left to serialize
        let settled = proposal.status().is_terminal();
        let result = f(proposal);
        drop(guard);
        if settled {
            self.release(proposal_id);
        }
        result
    }

    fn fqn(&self, proposal: &Proposal) -> Result<String> {
        Ok(self.store().get_asset(proposal.asset_id)?.fqn)
    }

    fn audit(
        &self,
        proposal: &Proposal,
        action: AuditAction,
        actor: Option<&Actor>,
        payload: serde_json::Value,
    ) -> Result<()> {
        self.store()
            .append(AuditEntry::new("proposal", proposal.id, action, actor, payload))
    }

    fn require_producer(proposal: &Proposal, actor: &Actor, action: &str) -> Result<()> {
        if actor.team_id != proposal.proposed_by.team_id {
            return Err(ContractError::invalid_transition(
                proposal.id,
                proposal.status(),
                format!("{} (only the proposing team may {})", action, action),
            ));
        }
        Ok(())
    }

    /// Apply the aggregate status, returning the previous one
    fn recompute(&self, proposal: &mut Proposal) -> Result<ProposalStatus> {
        let previous = proposal.status();
        let consumers = self.store().active_consumers(proposal.asset_id)?;
        let acknowledgments = self.store().acknowledgments(proposal.id)?;
        let next = aggregate_status(&consumers, &acknowledgments);
        if next == previous {
            return Ok(previous);
        }

        proposal.resolve(next);
        self.store().update_proposal(proposal)?;

        if next == ProposalStatus::Approved {
            self.audit(
                proposal,
                AuditAction::ProposalApproved,
                None,
                json!({ "consumers": consumers }),
            )?;
            info!(
                proposal = %proposal.id,
                consumers = consumers.len(),
                "All consumers approved proposal"
            );
            self.lifecycle.emit(DomainEvent::ProposalApproved {
                proposal_id: proposal.id,
                asset_id: proposal.asset_id,
                fqn: self.fqn(proposal)?,
            });
        } else {
            self.audit(proposal, AuditAction::ProposalReopened, None, json!({}))?;
            info!(proposal = %proposal.id, "Proposal returned to pending");
        }
        Ok(previous)
    }

    /// Record a consumer team's response and recompute the proposal status
    pub fn acknowledge(
        &self,
        proposal_id: ProposalId,
        team_id: TeamId,
        response: AckResponse,
        notes: Option<String>,
    ) -> Result<ProposalStatus> {
        self.with_proposal(proposal_id, |mut proposal| {
            if proposal.status().is_terminal() {
                return Err(ContractError::invalid_transition(
                    proposal.id,
                    proposal.status(),
                    "acknowledge",
                ));
            }

            let ack = Acknowledgment {
                proposal_id,
                consumer_team_id: team_id,
                response: response.clone(),
                responded_at: Utc::now(),
                responded_by: None,
                notes,
            };
            self.store().upsert_acknowledgment(ack.clone())?;
            self.recompute(&mut proposal)?;

            self.audit(
                &proposal,
                AuditAction::ProposalAcknowledged,
                Some(&Actor::team(team_id)),
                json!({
                    "response": response.as_str(),
                    "notes": ack.notes,
                    "status": proposal.status(),
                }),
            )?;
            info!(
                proposal = %proposal_id,
                team = %team_id,
                response = response.as_str(),
                status = %proposal.status(),
                "Acknowledgment recorded"
            );

            self.lifecycle.emit(DomainEvent::ProposalAcknowledged {
                proposal_id,
                asset_id: proposal.asset_id,
                fqn: self.fqn(&proposal)?,
                team_id,
                response,
                status: proposal.status(),
            });
            Ok(proposal.status())
        })
    }

    /// Recompute after registrations changed
    pub fn refresh(&self, proposal_id: ProposalId) -> Result<ProposalStatus> {
        self.with_proposal(proposal_id, |mut proposal| {
            if proposal.status().is_terminal() {
                return Ok(proposal.status());
            }
            self.recompute(&mut proposal)?;
            Ok(proposal.status())
        })
    }

    pub fn withdraw(&self, proposal_id: ProposalId, actor: &Actor) -> Result<Proposal> {
        self.close(proposal_id, actor, ProposalStatus::Withdrawn, None)
    }

    pub fn reject(
        &self,
        proposal_id: ProposalId,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<Proposal> {
        self.close(proposal_id, actor, ProposalStatus::Rejected, reason)
    }

    fn close(
        &self,
        proposal_id: ProposalId,
        actor: &Actor,
        to: ProposalStatus,
        reason: Option<String>,
    ) -> Result<Proposal> {
        let (action, audit_action) = match to {
            ProposalStatus::Withdrawn => ("withdraw", AuditAction::ProposalWithdrawn),
            _ => ("reject", AuditAction::ProposalRejected),
        };

        let closed = self.with_proposal(proposal_id, |mut proposal| {
            if proposal.status() != ProposalStatus::Pending {
                return Err(ContractError::invalid_transition(
                    proposal.id,
                    proposal.status(),
                    action,
                ));
            }
            Self::require_producer(&proposal, actor, action)?;

            proposal.resolve(to);
            self.store().update_proposal(&proposal)?;
            self.audit(&proposal, audit_action, Some(actor), json!({ "reason": reason }))?;
            info!(proposal = %proposal.id, actor = %actor, status = %to, "Proposal closed");

            let fqn = self.fqn(&proposal)?;
            let event = match to {
                ProposalStatus::Withdrawn => DomainEvent::ProposalWithdrawn {
                    proposal_id,
                    asset_id: proposal.asset_id,
                    fqn,
                    actor: actor.clone(),
                },
                _ => DomainEvent::ProposalRejected {
                    proposal_id,
                    asset_id: proposal.asset_id,
                    fqn,
                    actor: actor.clone(),
                },
            };
            self.lifecycle.emit(event);
            Ok(proposal)
        })?;
        self.release(proposal_id);
        Ok(closed)
    }

    /// Publish an approved proposal
    pub fn publish(&self, proposal_id: ProposalId, actor: &Actor) -> Result<Contract> {
        let contract = self.with_proposal(proposal_id, |proposal| {
            if proposal.status() != ProposalStatus::Approved {
                return Err(ContractError::invalid_transition(
                    proposal.id,
                    proposal.status(),
                    "publish",
                ));
            }
            self.finish(proposal, actor, None)
        })?;
        self.release(proposal_id);
        Ok(contract)
    }

    /// Publish regardless of acknowledgment coverage.
    ///
    /// Permission to force is checked by the caller. Outstanding blocks and
    /// migration deadlines do not prevent it.
    pub fn force(&self, proposal_id: ProposalId, actor: &Actor, reason: &str) -> Result<Contract> {
        if reason.trim().is_empty() {
            return Err(ContractError::validation("reason", "a forced publish needs a reason"));
        }
        let contract = self.with_proposal(proposal_id, |proposal| {
            if proposal.status().is_terminal() {
                return Err(ContractError::invalid_transition(
                    proposal.id,
                    proposal.status(),
                    "force",
                ));
            }
            self.finish(proposal, actor, Some(reason))
        })?;
        self.release(proposal_id);
        Ok(contract)
    }

    fn finish(
        &self,
        mut proposal: Proposal,
        actor: &Actor,
        force_reason: Option<&str>,
    ) -> Result<Contract> {
        let from = proposal.status();
        let contract = self.lifecycle.publish_proposal(&proposal, actor, force_reason)?;

        proposal.resolve(ProposalStatus::Published);
        proposal.published_contract_id = Some(contract.id);
        self.store().update_proposal(&proposal)?;

        let fqn = self.fqn(&proposal)?;
        let breaking_changes = proposal.breaking_changes().to_vec();
        match force_reason {
            Some(reason) => {
                self.audit(
                    &proposal,
                    AuditAction::ProposalForcePublished,
                    Some(actor),
                    json!({ "reason": reason, "from": from, "contract_id": contract.id }),
                )?;
                warn!(
                    actor = %actor,
                    reason,
                    asset = %fqn,
                    proposal = %proposal.id,
                    "Proposal force published"
                );
                self.lifecycle.emit(DomainEvent::ProposalForcePublished {
                    proposal_id: proposal.id,
                    asset_id: proposal.asset_id,
                    fqn,
                    contract_id: contract.id,
                    version: contract.version.clone(),
                    change_type: proposal.change_type,
                    breaking_changes,
                    actor: actor.clone(),
                    reason: reason.to_string(),
                });
            }
            None => {
                self.audit(
                    &proposal,
                    AuditAction::ProposalPublished,
                    Some(actor),
                    json!({ "contract_id": contract.id }),
                )?;
                info!(proposal = %proposal.id, version = %contract.version, "Proposal published");
                self.lifecycle.emit(DomainEvent::ProposalPublished {
                    proposal_id: proposal.id,
                    asset_id: proposal.asset_id,
                    fqn,
                    contract_id: contract.id,
                    version: contract.version.clone(),
                    change_type: proposal.change_type,
                    breaking_changes,
                    actor: actor.clone(),
                });
            }
        }
        Ok(contract)
    }

    /// Expire pending proposals that are due at `now`, returning their ids.
    ///
    /// A proposal is due once `expires_at` has passed, or when it was opened
    /// with `auto_expire` and every migrating consumer's deadline has passed.
    pub fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<ProposalId>> {
        if !self.lifecycle.config().proposals.auto_expire_enabled {
            return Ok(Vec::new());
        }

        let mut expired = Vec::new();
        for candidate in self.store().proposals_with_status(ProposalStatus::Pending)? {
            let did_expire = self.with_proposal(candidate.id, |mut proposal| {
                if proposal.status() != ProposalStatus::Pending || !self.is_due(&proposal, now)? {
                    return Ok(false);
                }
                proposal.resolve(ProposalStatus::Expired);
                self.store().update_proposal(&proposal)?;
                self.audit(
                    &proposal,
                    AuditAction::ProposalExpired,
                    None,
                    json!({ "expires_at": proposal.expires_at }),
                )?;
                info!(proposal = %proposal.id, "Proposal expired");
                self.lifecycle.emit(DomainEvent::ProposalExpired {
                    proposal_id: proposal.id,
                    asset_id: proposal.asset_id,
                    fqn: self.fqn(&proposal)?,
                });
                Ok(true)
            })?;
            if did_expire {
                self.release(candidate.id);
                expired.push(candidate.id);
            }
        }
        Ok(expired)
    }

    fn is_due(&self, proposal: &Proposal, now: DateTime<Utc>) -> Result<bool> {
        if proposal.expires_at.is_some_and(|at| at <= now) {
            return Ok(true);
        }
        if !proposal.auto_expire {
            return Ok(false);
        }

        let deadlines: Vec<Option<DateTime<Utc>>> = self
            .store()
            .acknowledgments(proposal.id)?
            .into_iter()
            .filter_map(|a| match a.response {
                AckResponse::Migrating { deadline } => Some(deadline),
                _ => None,
            })
            .collect();
        Ok(!deadlines.is_empty() && deadlines.iter().all(|d| d.is_some_and(|at| at <= now)))
    }

    pub fn progress(&self, proposal_id: ProposalId) -> Result<ProposalProgress> {
        let proposal = self.store().get_proposal(proposal_id)?;
        let consumers = self.store().active_consumers(proposal.asset_id)?;
        let acknowledgments = self.store().acknowledgments(proposal_id)?;

        let count = |pred: fn(&AckResponse) -> bool| {
            acknowledgments
                .iter()
                .filter(|a| pred(&a.response))
                .count()
        };
        let approved_teams: BTreeSet<TeamId> = acknowledgments
            .iter()
            .filter(|a| a.response == AckResponse::Approved)
            .map(|a| a.consumer_team_id)
            .collect();

        Ok(ProposalProgress {
            proposal_id,
            status: proposal.status(),
            pending_teams: consumers.difference(&approved_teams).copied().collect(),
            approved: count(|r| matches!(r, AckResponse::Approved)),
            blocked: count(|r| matches!(r, AckResponse::Blocked)),
            migrating: count(|r| matches!(r, AckResponse::Migrating { .. })),
            total_consumers: consumers.len(),
            acknowledgments,
        })
    }
}
