//! Compatibility classification
//!
//! Turns a change list plus a [`CompatibilityMode`] into a breaking verdict and
//! a semantic version class. Modes follow the Kafka schema registry vocabulary:
//!
//! - `backward`: consumers on the new schema can read data written under the old one
//! - `forward`: consumers still on the old schema can read data written under the new one
//! - `full`: both directions; any structural change is breaking
//! - `none`: nothing is breaking, consumers are only notified

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::diff::{Change, ChangeKind};
use crate::error::ContractError;

/// Compatibility policy attached to a contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompatibilityMode {
    #[default]
    Backward,
    Forward,
    Full,
    None,
}

impl CompatibilityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompatibilityMode::Backward => "backward",
            CompatibilityMode::Forward => "forward",
            CompatibilityMode::Full => "full",
            CompatibilityMode::None => "none",
        }
    }
}

impl fmt::Display for CompatibilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompatibilityMode {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backward" => Ok(CompatibilityMode::Backward),
            "forward" => Ok(CompatibilityMode::Forward),
            "full" => Ok(CompatibilityMode::Full),
            "none" => Ok(CompatibilityMode::None),
            other => Err(ContractError::validation(
                "compatibility_mode",
                format!("unknown compatibility mode '{}'", other),
            )),
        }
    }
}

/// Semantic version class of a change set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Patch,
    Minor,
    Major,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeType::Patch => "patch",
            ChangeType::Minor => "minor",
            ChangeType::Major => "major",
        })
    }
}

/// How a change kind affects the set of valid documents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Admits fewer documents than before
    Subtractive,
    /// Admits more documents than before
    Additive,
    /// New optional property. Old readers skip it; only `full` rejects it
    Extending,
    /// Admits a different set (neither subset nor superset)
    Incomparable,
    /// Default value changes: same documents, different reader behaviour
    Behavioural,
    /// No effect on validity
    Descriptive,
}

fn direction(kind: ChangeKind) -> Direction {
    match kind {
        ChangeKind::PropertyRemoved
        | ChangeKind::RequiredAdded
        | ChangeKind::TypeNarrowed
        | ChangeKind::EnumValuesRemoved
        | ChangeKind::ConstraintTightened
        | ChangeKind::DefaultRemoved
        | ChangeKind::NullableRemoved => Direction::Subtractive,
        ChangeKind::PropertyAdded => Direction::Extending,
        ChangeKind::RequiredRemoved
        | ChangeKind::TypeWidened
        | ChangeKind::EnumValuesAdded
        | ChangeKind::ConstraintRelaxed
        | ChangeKind::DefaultAdded
        | ChangeKind::NullableAdded => Direction::Additive,
        ChangeKind::TypeChanged => Direction::Incomparable,
        ChangeKind::DefaultChanged => Direction::Behavioural,
        ChangeKind::DescriptionChanged => Direction::Descriptive,
    }
}

/// Whether a single change kind is breaking under a mode
pub fn is_breaking(kind: ChangeKind, mode: CompatibilityMode) -> bool {
    let dir = direction(kind);
    match mode {
        CompatibilityMode::None => false,
        CompatibilityMode::Backward => {
            matches!(dir, Direction::Subtractive | Direction::Incomparable)
        }
        CompatibilityMode::Forward => {
            matches!(dir, Direction::Additive | Direction::Incomparable)
        }
        CompatibilityMode::Full => dir != Direction::Descriptive,
    }
}

/// Result of classifying a change list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub breaking: bool,
    pub change_type: ChangeType,
    pub mode: CompatibilityMode,
    /// The input changes with `breaking` assigned per the mode's policy
    pub changes: Vec<Change>,
}

impl Classification {
    pub fn breaking_changes(&self) -> Vec<Change> {
        self.changes.iter().filter(|c| c.breaking).cloned().collect()
    }

    pub fn summary(&self) -> String {
        let breaking = self.changes.iter().filter(|c| c.breaking).count();
        if self.changes.is_empty() {
            "No changes detected".to_string()
        } else if breaking > 0 {
            format!(
                "{} breaking of {} changes under {} compatibility ({})",
                breaking,
                self.changes.len(),
                self.mode,
                self.change_type
            )
        } else {
            format!(
                "{} compatible changes under {} compatibility ({})",
                self.changes.len(),
                self.mode,
                self.change_type
            )
        }
    }
}

/// Classify a change list under a compatibility mode. Total and pure.
pub fn classify(changes: &[Change], mode: CompatibilityMode) -> Classification {
    let changes: Vec<Change> = changes
        .iter()
        .map(|c| Change {
            breaking: is_breaking(c.kind, mode),
            ..c.clone()
        })
        .collect();

    let breaking = changes.iter().any(|c| c.breaking);
    let change_type = change_type(&changes, breaking);

    Classification {
        breaking,
        change_type,
        mode,
        changes,
    }
}

fn change_type(changes: &[Change], breaking: bool) -> ChangeType {
    if breaking {
        return ChangeType::Major;
    }

    // Most severe class wins
    changes
        .iter()
        .map(|c| match direction(c.kind) {
            Direction::Subtractive | Direction::Incomparable => ChangeType::Major,
            Direction::Additive | Direction::Extending => ChangeType::Minor,
            Direction::Behavioural | Direction::Descriptive => ChangeType::Patch,
        })
        .chain(
            // Dropping a requirement changes what producers may emit: always major
            changes
                .iter()
                .filter(|c| c.kind == ChangeKind::RequiredRemoved)
                .map(|_| ChangeType::Major),
        )
        .max()
        .unwrap_or(ChangeType::Patch)
}
