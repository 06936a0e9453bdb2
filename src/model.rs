//! Domain entities
//!
//! Entities here are plain data. Persistence belongs to the [`crate::store`]
//! collaborators and every state change goes through [`crate::lifecycle`] or
//! [`crate::proposal`].

use std::fmt;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::checksum::Checksum;
use crate::classify::{ChangeType, CompatibilityMode};
use crate::diff::Change;
use crate::error::{ContractError, Result};
use crate::guarantees::{GuaranteeChange, GuaranteeMode, Guarantees};
use crate::schema::SchemaDocument;

pub type AssetId = Uuid;
pub type TeamId = Uuid;
pub type ContractId = Uuid;
pub type ProposalId = Uuid;

/// Who performed an operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub team_id: TeamId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl Actor {
    pub fn team(team_id: TeamId) -> Self {
        Self { team_id, user: None }
    }

    pub fn user(team_id: TeamId, user: impl Into<String>) -> Self {
        Self {
            team_id,
            user: Some(user.into()),
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user {
            Some(user) => write!(f, "{} (team {})", user, self.team_id),
            None => write!(f, "team {}", self.team_id),
        }
    }
}

/// Resolved owner of an asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Owner {
    Email(String),
    Name(String),
    Team(String),
    Unowned,
}

impl Owner {
    /// Resolve an owner from loosely-typed adapter metadata.
    ///
    /// Candidates are tried strictly in order email, name, team; blank values
    /// are skipped. An email candidate must look like an address, otherwise it
    /// is skipped rather than reinterpreted as a name.
    pub fn resolve(email: Option<&str>, name: Option<&str>, team: Option<&str>) -> Self {
        let present = |v: Option<&str>| {
            v.map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
        };

        if let Some(email) = present(email).filter(|e| e.contains('@')) {
            return Owner::Email(email);
        }
        if let Some(name) = present(name) {
            return Owner::Name(name);
        }
        if let Some(team) = present(team) {
            return Owner::Team(team);
        }
        Owner::Unowned
    }
}

fn is_valid_fqn(fqn: &str) -> bool {
    fqn.split('.').all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    })
}

/// A data asset whose schema is governed by contracts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    /// Fully-qualified name, e.g. "warehouse.analytics.orders"
    pub fqn: String,
    pub owner_team_id: TeamId,
    pub owner: Owner,
    #[serde(default)]
    pub guarantee_mode: GuaranteeMode,
}

impl Asset {
    pub fn new(fqn: impl Into<String>, owner_team_id: TeamId) -> Result<Self> {
        let fqn = fqn.into();
        if !is_valid_fqn(&fqn) {
            return Err(ContractError::validation(
                "fqn",
                format!("'{}' is not a dotted fully-qualified name", fqn),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            fqn,
            owner_team_id,
            owner: Owner::Unowned,
            guarantee_mode: GuaranteeMode::default(),
        })
    }

    pub fn with_owner(mut self, owner: Owner) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_guarantee_mode(mut self, mode: GuaranteeMode) -> Self {
        self.guarantee_mode = mode;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    Active,
    Deprecated,
    Archived,
}

/// A published, immutable schema version for an asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub asset_id: AssetId,
    pub version: Version,
    pub schema: SchemaDocument,
    pub schema_checksum: Checksum,
    #[serde(default)]
    pub guarantees: Guarantees,
    pub compatibility_mode: CompatibilityMode,
    pub status: ContractStatus,
    pub published_at: DateTime<Utc>,
    pub published_by: Actor,
}

impl Contract {
    pub(crate) fn new(
        asset_id: AssetId,
        version: Version,
        schema: SchemaDocument,
        guarantees: Guarantees,
        compatibility_mode: CompatibilityMode,
        published_by: Actor,
    ) -> Self {
        let schema_checksum = Checksum::of_schema(&schema);
        Self {
            id: Uuid::new_v4(),
            asset_id,
            version,
            schema,
            schema_checksum,
            guarantees,
            compatibility_mode,
            status: ContractStatus::Active,
            published_at: Utc::now(),
            published_by,
        }
    }

    /// Verify the schema still matches the checksum taken at publish time
    pub fn verify_checksum(&self) -> bool {
        self.schema_checksum.matches(&self.schema)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    Withdrawn,
    Published,
    Expired,
}

impl ProposalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProposalStatus::Rejected
                | ProposalStatus::Withdrawn
                | ProposalStatus::Published
                | ProposalStatus::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Withdrawn => "withdrawn",
            ProposalStatus::Published => "published",
            ProposalStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A negotiated breaking change
///
/// The breaking-change snapshot is taken once at creation and is never
/// recomputed, even if the asset's active contract moves on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub asset_id: AssetId,
    pub proposed_schema: SchemaDocument,
    #[serde(default)]
    pub proposed_guarantees: Guarantees,
    pub compatibility_mode: CompatibilityMode,
    breaking_changes: Vec<Change>,
    #[serde(default)]
    guarantee_changes: Vec<GuaranteeChange>,
    pub change_type: ChangeType,
    /// Version the producer asked for, if any
    #[serde(default)]
    pub requested_version: Option<Version>,
    pub(crate) status: ProposalStatus,
    pub proposed_by: Actor,
    pub proposed_at: DateTime<Utc>,
    pub(crate) resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub auto_expire: bool,
    #[serde(default)]
    pub(crate) published_contract_id: Option<ContractId>,
}

impl Proposal {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        asset_id: AssetId,
        proposed_schema: SchemaDocument,
        proposed_guarantees: Guarantees,
        compatibility_mode: CompatibilityMode,
        breaking_changes: Vec<Change>,
        guarantee_changes: Vec<GuaranteeChange>,
        change_type: ChangeType,
        proposed_by: Actor,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            asset_id,
            proposed_schema,
            proposed_guarantees,
            compatibility_mode,
            breaking_changes,
            guarantee_changes,
            change_type,
            requested_version: None,
            status: ProposalStatus::Pending,
            proposed_by,
            proposed_at: Utc::now(),
            resolved_at: None,
            expires_at: None,
            auto_expire: false,
            published_contract_id: None,
        }
    }

    pub fn status(&self) -> ProposalStatus {
        self.status
    }

    pub fn breaking_changes(&self) -> &[Change] {
        &self.breaking_changes
    }

    pub fn guarantee_changes(&self) -> &[GuaranteeChange] {
        &self.guarantee_changes
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    pub fn published_contract_id(&self) -> Option<ContractId> {
        self.published_contract_id
    }

    pub(crate) fn resolve(&mut self, status: ProposalStatus) {
        self.status = status;
        self.resolved_at = if status == ProposalStatus::Pending {
            None
        } else {
            Some(Utc::now())
        };
    }
}

/// A consumer team's answer to a proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "response", rename_all = "snake_case")]
pub enum AckResponse {
    Approved,
    Blocked,
    Migrating {
        #[serde(default)]
        deadline: Option<DateTime<Utc>>,
    },
}

impl AckResponse {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckResponse::Approved => "approved",
            AckResponse::Blocked => "blocked",
            AckResponse::Migrating { .. } => "migrating",
        }
    }
}

/// Unique per (proposal, team); a new response replaces the previous one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgment {
    pub proposal_id: ProposalId,
    pub consumer_team_id: TeamId,
    #[serde(flatten)]
    pub response: AckResponse,
    pub responded_at: DateTime<Utc>,
    #[serde(default)]
    pub responded_by: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Active,
    Migrating,
    Inactive,
}

/// A consumer team's registered dependency on an asset's contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub id: Uuid,
    pub asset_id: AssetId,
    pub consumer_team_id: TeamId,
    pub status: RegistrationStatus,
    #[serde(default)]
    pub pinned_version: Option<Version>,
    pub registered_at: DateTime<Utc>,
}

impl Registration {
    pub fn active(asset_id: AssetId, consumer_team_id: TeamId) -> Self {
        Self {
            id: Uuid::new_v4(),
            asset_id,
            consumer_team_id,
            status: RegistrationStatus::Active,
            pinned_version: None,
            registered_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyType {
    /// Direct data consumption (SELECT FROM)
    #[default]
    Consumes,
    /// Foreign key or reference
    References,
    /// Data transformation (e.g. a dbt model)
    Transforms,
}

/// Directed relation: `consumer` depends on `producer`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub consumer: AssetId,
    pub producer: AssetId,
    #[serde(default)]
    pub dependency_type: DependencyType,
}

impl DependencyEdge {
    pub fn new(consumer: AssetId, producer: AssetId) -> Self {
        Self {
            consumer,
            producer,
            dependency_type: DependencyType::Consumes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ContractPublished,
    ContractForcePublished,
    ContractDeprecated,
    ProposalCreated,
    ProposalAcknowledged,
    ProposalApproved,
    ProposalReopened,
    ProposalRejected,
    ProposalWithdrawn,
    ProposalPublished,
    ProposalForcePublished,
    ProposalExpired,
}

/// An append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    /// "contract" or "proposal"
    pub entity: String,
    pub entity_id: Uuid,
    pub action: AuditAction,
    pub actor: Option<Actor>,
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        entity: &str,
        entity_id: Uuid,
        action: AuditAction,
        actor: Option<&Actor>,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity: entity.to_string(),
            entity_id,
            action,
            actor: actor.cloned(),
            payload,
            occurred_at: Utc::now(),
        }
    }
}
