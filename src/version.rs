//! Contract versioning utilities

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::classify::ChangeType;
use crate::error::{ContractError, Result};

/// How explicit versions supplied by producers are checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersioningMode {
    /// Suggested versions are used unless the producer supplies a greater one
    #[default]
    Auto,
    /// Explicit versions must carry at least the bump the change type implies
    Enforce,
}

/// Version every asset's first contract is published at
pub fn initial_version() -> Version {
    Version::new(1, 0, 0)
}

/// Bump a version according to a change class
pub fn bump(current: &Version, change_type: ChangeType) -> Version {
    match change_type {
        ChangeType::Major => Version::new(current.major + 1, 0, 0),
        ChangeType::Minor => Version::new(current.major, current.minor + 1, 0),
        ChangeType::Patch => Version::new(current.major, current.minor, current.patch + 1),
    }
}

/// A suggested next version with its rationale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSuggestion {
    pub suggested: Version,
    pub current: Option<Version>,
    pub change_type: ChangeType,
    pub reason: String,
}

pub fn suggest_version(
    current: Option<&Version>,
    change_type: ChangeType,
    breaking: bool,
) -> VersionSuggestion {
    let Some(current) = current else {
        return VersionSuggestion {
            suggested: initial_version(),
            current: None,
            change_type,
            reason: "First contract for this asset".to_string(),
        };
    };

    let reason = match (change_type, breaking) {
        (ChangeType::Major, true) => "Breaking change detected - major version bump required",
        (ChangeType::Major, false) => "Subtractive schema change - major version bump",
        (ChangeType::Minor, _) => "Backward-compatible schema additions - minor version bump",
        (ChangeType::Patch, _) => "No structural schema changes - patch version bump",
    };

    VersionSuggestion {
        suggested: bump(current, change_type),
        current: Some(current.clone()),
        change_type,
        reason: reason.to_string(),
    }
}

/// Check a producer-supplied version against the current one
pub fn validate_explicit(
    requested: &Version,
    current: Option<&Version>,
    change_type: ChangeType,
    mode: VersioningMode,
) -> Result<()> {
    let Some(current) = current else {
        return Ok(());
    };

    if requested <= current {
        return Err(ContractError::validation(
            "version",
            format!("version {} must be greater than current version {}", requested, current),
        ));
    }

    if mode == VersioningMode::Enforce {
        let minimum = bump(current, change_type);
        if requested < &minimum {
            return Err(ContractError::validation(
                "version",
                format!(
                    "{} change requires at least version {}, got {}",
                    change_type, minimum, requested
                ),
            ));
        }
    }

    Ok(())
}
