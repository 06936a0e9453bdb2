//! Error types for contract negotiation

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::model::ProposalStatus;

/// Result type for contract operations
pub type Result<T> = std::result::Result<T, ContractError>;

/// Machine-readable failure kind, stable across error message wording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Conflict,
    InvalidTransition,
    NotFound,
}

/// Contract negotiation errors
#[derive(Error, Debug)]
pub enum ContractError {
    /// Malformed schema, guarantee or version input. `path` points at the offending field.
    #[error("Invalid input at '{path}': {message}")]
    Validation { path: String, message: String },

    /// Lost a publish race; refetch the active contract and re-diff before retrying.
    #[error("Conflicting publish on asset {asset_id}: expected revision {expected}, found {actual}")]
    Conflict {
        asset_id: Uuid,
        expected: u64,
        actual: u64,
    },

    #[error("Cannot {action} proposal {proposal_id} in status '{from}'")]
    InvalidTransition {
        proposal_id: Uuid,
        from: ProposalStatus,
        action: String,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Semver error: {0}")]
    Semver(#[from] semver::Error),
}

impl ContractError {
    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_transition(
        proposal_id: Uuid,
        from: ProposalStatus,
        action: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            proposal_id,
            from,
            action: action.into(),
        }
    }

    /// The machine-readable kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ContractError::Validation { .. }
            | ContractError::Json(_)
            | ContractError::Semver(_) => ErrorKind::Validation,
            ContractError::Conflict { .. } => ErrorKind::Conflict,
            ContractError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            ContractError::NotFound { .. } => ErrorKind::NotFound,
        }
    }

    /// Offending schema path, for validation failures that carry one
    pub fn path(&self) -> Option<&str> {
        match self {
            ContractError::Validation { path, .. } => Some(path),
            _ => None,
        }
    }
}
