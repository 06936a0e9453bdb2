//! Data guarantees attached to a contract
//!
//! Guarantees are the data-quality promises a producer makes beyond the shape
//! of the schema (not-null columns, uniqueness, accepted values, freshness...).
//! Adding or tightening a guarantee is informational; removing or relaxing one
//! is a warning, and under [`GuaranteeMode::Strict`] a warning blocks publishing
//! the same way a breaking schema change does.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How guarantee changes on an asset are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuaranteeMode {
    /// Report changes, never block
    #[default]
    Notify,
    /// Removing or relaxing a guarantee is breaking
    Strict,
    /// Do not track guarantee changes
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
}

/// A producer's guarantee set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Guarantees {
    /// Columns guaranteed not null
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub nullability: BTreeSet<String>,
    /// Columns guaranteed unique
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub uniqueness: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub accepted_values: BTreeMap<String, BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expressions: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freshness: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuaranteeChangeKind {
    NotNullAdded,
    NotNullRemoved,
    UniqueAdded,
    UniqueRemoved,
    AcceptedValuesAdded,
    AcceptedValuesRemoved,
    AcceptedValuesExpanded,
    AcceptedValuesContracted,
    RelationshipAdded,
    RelationshipRemoved,
    ExpressionAdded,
    ExpressionRemoved,
    ExpressionChanged,
    FreshnessAdded,
    FreshnessRemoved,
    FreshnessChanged,
    VolumeAdded,
    VolumeRemoved,
    VolumeChanged,
    CustomAdded,
    CustomRemoved,
    CustomChanged,
}

impl GuaranteeChangeKind {
    pub fn severity(&self) -> Severity {
        use GuaranteeChangeKind::*;
        match self {
            NotNullAdded | UniqueAdded | AcceptedValuesAdded | AcceptedValuesContracted
            | RelationshipAdded | ExpressionAdded | FreshnessAdded | VolumeAdded | CustomAdded => {
                Severity::Info
            }
            _ => Severity::Warning,
        }
    }
}

impl fmt::Display for GuaranteeChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default();
        f.write_str(&name)
    }
}

/// A detected guarantee change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuaranteeChange {
    pub kind: GuaranteeChangeKind,
    /// e.g. "nullability.user_id" or "accepted_values.status"
    pub path: String,
    pub severity: Severity,
    pub message: String,
}

impl GuaranteeChange {
    fn new(kind: GuaranteeChangeKind, path: String, message: String) -> Self {
        Self {
            kind,
            path,
            severity: kind.severity(),
            message,
        }
    }
}

/// Whether a set of guarantee changes blocks publishing under a mode
pub fn is_breaking(changes: &[GuaranteeChange], mode: GuaranteeMode) -> bool {
    mode == GuaranteeMode::Strict && changes.iter().any(|c| c.severity == Severity::Warning)
}

/// Diff two guarantee sets
pub fn diff_guarantees(old: &Guarantees, new: &Guarantees) -> Vec<GuaranteeChange> {
    use GuaranteeChangeKind::*;
    let mut changes = Vec::new();

    diff_set(
        &old.nullability,
        &new.nullability,
        "nullability",
        (NotNullAdded, NotNullRemoved),
        &mut changes,
    );
    diff_set(
        &old.uniqueness,
        &new.uniqueness,
        "uniqueness",
        (UniqueAdded, UniqueRemoved),
        &mut changes,
    );
    diff_accepted_values(old, new, &mut changes);
    diff_map(
        &old.relationships,
        &new.relationships,
        "relationships",
        (RelationshipAdded, RelationshipRemoved, None),
        &mut changes,
    );
    diff_map(
        &old.expressions,
        &new.expressions,
        "expressions",
        (ExpressionAdded, ExpressionRemoved, Some(ExpressionChanged)),
        &mut changes,
    );
    diff_scalar(
        &old.freshness,
        &new.freshness,
        "freshness",
        (FreshnessAdded, FreshnessRemoved, FreshnessChanged),
        &mut changes,
    );
    diff_scalar(
        &old.volume,
        &new.volume,
        "volume",
        (VolumeAdded, VolumeRemoved, VolumeChanged),
        &mut changes,
    );
    diff_map(
        &old.custom,
        &new.custom,
        "custom",
        (CustomAdded, CustomRemoved, Some(CustomChanged)),
        &mut changes,
    );

    changes
}

fn diff_set(
    old: &BTreeSet<String>,
    new: &BTreeSet<String>,
    section: &str,
    (added, removed): (GuaranteeChangeKind, GuaranteeChangeKind),
    changes: &mut Vec<GuaranteeChange>,
) {
    for column in new.difference(old) {
        changes.push(GuaranteeChange::new(
            added,
            format!("{}.{}", section, column),
            format!("{} guarantee added for column '{}'", section, column),
        ));
    }
    for column in old.difference(new) {
        changes.push(GuaranteeChange::new(
            removed,
            format!("{}.{}", section, column),
            format!("{} guarantee removed for column '{}'", section, column),
        ));
    }
}

fn diff_accepted_values(old: &Guarantees, new: &Guarantees, changes: &mut Vec<GuaranteeChange>) {
    use GuaranteeChangeKind::*;

    for (column, new_values) in &new.accepted_values {
        let path = format!("accepted_values.{}", column);
        let Some(old_values) = old.accepted_values.get(column) else {
            changes.push(GuaranteeChange::new(
                AcceptedValuesAdded,
                path,
                format!("accepted_values guarantee added for column '{}'", column),
            ));
            continue;
        };
        if old_values == new_values {
            continue;
        }
        let added: Vec<&String> = new_values.difference(old_values).collect();
        let removed: Vec<&String> = old_values.difference(new_values).collect();
        // Any newly accepted value can surprise a consumer, so mixed edits count as expansion
        let kind = if added.is_empty() {
            AcceptedValuesContracted
        } else {
            AcceptedValuesExpanded
        };
        changes.push(GuaranteeChange::new(
            kind,
            path,
            format!(
                "accepted_values for '{}' changed: added {:?}, removed {:?}",
                column, added, removed
            ),
        ));
    }

    for column in old.accepted_values.keys() {
        if !new.accepted_values.contains_key(column) {
            changes.push(GuaranteeChange::new(
                AcceptedValuesRemoved,
                format!("accepted_values.{}", column),
                format!("accepted_values guarantee removed for column '{}'", column),
            ));
        }
    }
}

fn diff_map<V: PartialEq>(
    old: &BTreeMap<String, V>,
    new: &BTreeMap<String, V>,
    section: &str,
    (added, removed, changed): (
        GuaranteeChangeKind,
        GuaranteeChangeKind,
        Option<GuaranteeChangeKind>,
    ),
    changes: &mut Vec<GuaranteeChange>,
) {
    for (key, value) in new {
        let path = format!("{}.{}", section, key);
        match old.get(key) {
            None => changes.push(GuaranteeChange::new(
                added,
                path,
                format!("{} guarantee added: {}", section, key),
            )),
            Some(previous) if previous != value => {
                if let Some(kind) = changed {
                    changes.push(GuaranteeChange::new(
                        kind,
                        path,
                        format!("{} guarantee changed: {}", section, key),
                    ));
                }
            }
            Some(_) => {}
        }
    }
    for key in old.keys() {
        if !new.contains_key(key) {
            changes.push(GuaranteeChange::new(
                removed,
                format!("{}.{}", section, key),
                format!("{} guarantee removed: {}", section, key),
            ));
        }
    }
}

fn diff_scalar(
    old: &Option<Value>,
    new: &Option<Value>,
    section: &str,
    (added, removed, changed): (GuaranteeChangeKind, GuaranteeChangeKind, GuaranteeChangeKind),
    changes: &mut Vec<GuaranteeChange>,
) {
    let (kind, message) = match (old, new) {
        (None, None) => return,
        (Some(o), Some(n)) if o == n => return,
        (None, Some(n)) => (added, format!("{} guarantee added: {}", section, n)),
        (Some(o), None) => (removed, format!("{} guarantee removed (was {})", section, o)),
        // Interval formats vary by adapter; treat any change as a relaxation
        (Some(o), Some(n)) => (
            changed,
            format!("{} guarantee changed from {} to {}", section, o, n),
        ),
    };
    changes.push(GuaranteeChange::new(kind, section.to_string(), message));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_identical_guarantees_have_no_changes() {
        let g = Guarantees {
            nullability: set(&["id"]),
            freshness: Some(json!("1 hour")),
            ..Default::default()
        };
        assert!(diff_guarantees(&g, &g).is_empty());
    }

    #[test]
    fn test_added_guarantees_are_info() {
        let old = Guarantees::default();
        let new = Guarantees {
            nullability: set(&["id"]),
            uniqueness: set(&["id"]),
            ..Default::default()
        };
        let changes = diff_guarantees(&old, &new);
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.severity == Severity::Info));
        assert!(!is_breaking(&changes, GuaranteeMode::Strict));
    }

    #[test]
    fn test_removed_guarantee_blocks_only_in_strict_mode() {
        let old = Guarantees {
            nullability: set(&["user_id"]),
            ..Default::default()
        };
        let changes = diff_guarantees(&old, &Guarantees::default());
        assert_eq!(changes[0].kind, GuaranteeChangeKind::NotNullRemoved);
        assert_eq!(changes[0].path, "nullability.user_id");

        assert!(is_breaking(&changes, GuaranteeMode::Strict));
        assert!(!is_breaking(&changes, GuaranteeMode::Notify));
        assert!(!is_breaking(&changes, GuaranteeMode::Ignore));
    }

    #[test]
    fn test_accepted_values_direction() {
        let mut old = Guarantees::default();
        old.accepted_values.insert("status".into(), set(&["a", "b"]));

        let mut contracted = Guarantees::default();
        contracted.accepted_values.insert("status".into(), set(&["a"]));
        let changes = diff_guarantees(&old, &contracted);
        assert_eq!(changes[0].kind, GuaranteeChangeKind::AcceptedValuesContracted);
        assert_eq!(changes[0].severity, Severity::Info);

        let mut expanded = Guarantees::default();
        expanded.accepted_values.insert("status".into(), set(&["a", "c"]));
        let changes = diff_guarantees(&old, &expanded);
        assert_eq!(changes[0].kind, GuaranteeChangeKind::AcceptedValuesExpanded);
        assert_eq!(changes[0].severity, Severity::Warning);
    }

    #[test]
    fn test_expression_and_freshness_changes() {
        let mut old = Guarantees {
            freshness: Some(json!({ "warn_after": "1 hour" })),
            ..Default::default()
        };
        old.expressions.insert("positive_total".into(), "total >= 0".into());

        let mut new = Guarantees {
            freshness: Some(json!({ "warn_after": "6 hours" })),
            ..Default::default()
        };
        new.expressions.insert("positive_total".into(), "total > 0".into());

        let kinds: Vec<GuaranteeChangeKind> =
            diff_guarantees(&old, &new).iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![GuaranteeChangeKind::ExpressionChanged, GuaranteeChangeKind::FreshnessChanged]
        );
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(GuaranteeChangeKind::NotNullRemoved.to_string(), "not_null_removed");
    }
}
