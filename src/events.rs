//! Domain events
//!
//! The core only records *that* something happened. Delivery is handled by an
//! external collaborator behind [`EventSink`], which may deliver at least once;
//! [`Notification::key`] is stable across redeliveries so receivers can
//! deduplicate.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::ChangeType;
use crate::diff::Change;
use crate::model::{AckResponse, Actor, AssetId, ContractId, ProposalId, ProposalStatus, TeamId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum DomainEvent {
    #[serde(rename = "contract.published")]
    ContractPublished {
        asset_id: AssetId,
        fqn: String,
        contract_id: ContractId,
        version: Version,
        change_type: Option<ChangeType>,
        actor: Actor,
        forced: bool,
    },
    #[serde(rename = "proposal.created")]
    ProposalCreated {
        proposal_id: ProposalId,
        asset_id: AssetId,
        fqn: String,
        breaking_changes: Vec<Change>,
        change_type: ChangeType,
        actor: Actor,
        consumer_teams: Vec<TeamId>,
    },
    #[serde(rename = "proposal.acknowledged")]
    ProposalAcknowledged {
        proposal_id: ProposalId,
        asset_id: AssetId,
        fqn: String,
        team_id: TeamId,
        response: AckResponse,
        status: ProposalStatus,
    },
    #[serde(rename = "proposal.approved")]
    ProposalApproved {
        proposal_id: ProposalId,
        asset_id: AssetId,
        fqn: String,
    },
    #[serde(rename = "proposal.rejected")]
    ProposalRejected {
        proposal_id: ProposalId,
        asset_id: AssetId,
        fqn: String,
        actor: Actor,
    },
    #[serde(rename = "proposal.withdrawn")]
    ProposalWithdrawn {
        proposal_id: ProposalId,
        asset_id: AssetId,
        fqn: String,
        actor: Actor,
    },
    #[serde(rename = "proposal.expired")]
    ProposalExpired {
        proposal_id: ProposalId,
        asset_id: AssetId,
        fqn: String,
    },
    #[serde(rename = "proposal.published")]
    ProposalPublished {
        proposal_id: ProposalId,
        asset_id: AssetId,
        fqn: String,
        contract_id: ContractId,
        version: Version,
        change_type: ChangeType,
        breaking_changes: Vec<Change>,
        actor: Actor,
    },
    #[serde(rename = "proposal.force_published")]
    ProposalForcePublished {
        proposal_id: ProposalId,
        asset_id: AssetId,
        fqn: String,
        contract_id: ContractId,
        version: Version,
        change_type: ChangeType,
        breaking_changes: Vec<Change>,
        actor: Actor,
        reason: String,
    },
}

impl DomainEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::ContractPublished { .. } => "contract.published",
            DomainEvent::ProposalCreated { .. } => "proposal.created",
            DomainEvent::ProposalAcknowledged { .. } => "proposal.acknowledged",
            DomainEvent::ProposalApproved { .. } => "proposal.approved",
            DomainEvent::ProposalRejected { .. } => "proposal.rejected",
            DomainEvent::ProposalWithdrawn { .. } => "proposal.withdrawn",
            DomainEvent::ProposalExpired { .. } => "proposal.expired",
            DomainEvent::ProposalPublished { .. } => "proposal.published",
            DomainEvent::ProposalForcePublished { .. } => "proposal.force_published",
        }
    }

    pub fn asset_id(&self) -> AssetId {
        match self {
            DomainEvent::ContractPublished { asset_id, .. }
            | DomainEvent::ProposalCreated { asset_id, .. }
            | DomainEvent::ProposalAcknowledged { asset_id, .. }
            | DomainEvent::ProposalApproved { asset_id, .. }
            | DomainEvent::ProposalRejected { asset_id, .. }
            | DomainEvent::ProposalWithdrawn { asset_id, .. }
            | DomainEvent::ProposalExpired { asset_id, .. }
            | DomainEvent::ProposalPublished { asset_id, .. }
            | DomainEvent::ProposalForcePublished { asset_id, .. } => *asset_id,
        }
    }

    /// The entity the event is about: the proposal, or the contract for
    /// direct publishes
    pub fn subject_id(&self) -> Uuid {
        match self {
            DomainEvent::ContractPublished { contract_id, .. } => *contract_id,
            DomainEvent::ProposalCreated { proposal_id, .. }
            | DomainEvent::ProposalAcknowledged { proposal_id, .. }
            | DomainEvent::ProposalApproved { proposal_id, .. }
            | DomainEvent::ProposalRejected { proposal_id, .. }
            | DomainEvent::ProposalWithdrawn { proposal_id, .. }
            | DomainEvent::ProposalExpired { proposal_id, .. }
            | DomainEvent::ProposalPublished { proposal_id, .. }
            | DomainEvent::ProposalForcePublished { proposal_id, .. } => *proposal_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: DomainEvent,
}

impl EventEnvelope {
    pub fn new(event: DomainEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            event,
        }
    }
}

/// Receives events after the state change that produced them is stored
pub trait EventSink: Send + Sync {
    fn emit(&self, envelope: EventEnvelope);
}

/// Sink that keeps every event in memory
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<EventEnvelope>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EventEnvelope> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| e.event.kind())
            .collect()
    }
}

impl EventSink for EventLog {
    fn emit(&self, envelope: EventEnvelope) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(envelope);
    }
}

/// Idempotency key for a single notification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationKey {
    pub subject_id: Uuid,
    pub team_id: TeamId,
    pub kind: String,
}

/// One event addressed to one team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub key: NotificationKey,
    pub envelope: EventEnvelope,
}

/// Fan an event out to teams, one notification per distinct team
pub fn notifications(envelope: &EventEnvelope, teams: &[TeamId]) -> Vec<Notification> {
    let mut seen = HashSet::new();
    teams
        .iter()
        .filter(|team| seen.insert(**team))
        .map(|team| Notification {
            key: NotificationKey {
                subject_id: envelope.event.subject_id(),
                team_id: *team,
                kind: envelope.event.kind().to_string(),
            },
            envelope: envelope.clone(),
        })
        .collect()
}

/// Accepts each notification key once
#[derive(Default)]
pub struct Outbox {
    delivered: Mutex<HashSet<NotificationKey>>,
    queue: Mutex<Vec<Notification>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a notification; returns false if its key was already queued
    pub fn enqueue(&self, notification: Notification) -> bool {
        let fresh = self
            .delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(notification.key.clone());
        if fresh {
            self.queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(notification);
        }
        fresh
    }

    /// Take everything queued so far
    pub fn drain(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
