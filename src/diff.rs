//! Structural schema comparison
//!
//! Diffs two [`SchemaDocument`]s into an ordered list of typed [`Change`]s.
//! The comparator never decides whether a change is breaking; that is the
//! classifier's job, so every change leaves here with `breaking == false`.
//!
//! Output order is deterministic. For each node: type, constraints, enum,
//! default, nullable and description changes; then the new schema's properties
//! in declaration order (additions, or changes nested under them); then removed
//! properties in their original order; then required-set changes; then array items.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::schema::{join_path, Bound, SchemaDocument, SchemaNode};

/// Kind of structural change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    PropertyAdded,
    PropertyRemoved,
    /// Every previously valid value is still valid (e.g. integer -> number)
    TypeWidened,
    /// Some previously valid values are no longer valid (e.g. number -> integer)
    TypeNarrowed,
    /// Old and new types are unrelated (e.g. string -> integer)
    TypeChanged,
    RequiredAdded,
    RequiredRemoved,
    EnumValuesAdded,
    EnumValuesRemoved,
    ConstraintTightened,
    ConstraintRelaxed,
    DefaultAdded,
    DefaultRemoved,
    DefaultChanged,
    NullableAdded,
    NullableRemoved,
    DescriptionChanged,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::PropertyAdded => "property_added",
            ChangeKind::PropertyRemoved => "property_removed",
            ChangeKind::TypeWidened => "type_widened",
            ChangeKind::TypeNarrowed => "type_narrowed",
            ChangeKind::TypeChanged => "type_changed",
            ChangeKind::RequiredAdded => "required_added",
            ChangeKind::RequiredRemoved => "required_removed",
            ChangeKind::EnumValuesAdded => "enum_values_added",
            ChangeKind::EnumValuesRemoved => "enum_values_removed",
            ChangeKind::ConstraintTightened => "constraint_tightened",
            ChangeKind::ConstraintRelaxed => "constraint_relaxed",
            ChangeKind::DefaultAdded => "default_added",
            ChangeKind::DefaultRemoved => "default_removed",
            ChangeKind::DefaultChanged => "default_changed",
            ChangeKind::NullableAdded => "nullable_added",
            ChangeKind::NullableRemoved => "nullable_removed",
            ChangeKind::DescriptionChanged => "description_changed",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected change between two schema documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub kind: ChangeKind,
    /// Dotted path to the changed element (e.g. "properties.address.properties.zip")
    pub path: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
    /// Assigned by the classifier
    #[serde(default)]
    pub breaking: bool,
    /// Human-readable description
    pub message: String,
}

impl Change {
    fn new(
        kind: ChangeKind,
        path: String,
        before: Option<Value>,
        after: Option<Value>,
        message: String,
    ) -> Self {
        Self {
            kind,
            path,
            before,
            after,
            breaking: false,
            message,
        }
    }

    /// Compact `kind:path` label used in logs and summaries
    pub fn label(&self) -> String {
        format!("{}:{}", self.kind, self.path)
    }
}

/// Structurally diff two schema documents
pub fn compare(old: &SchemaDocument, new: &SchemaDocument) -> Vec<Change> {
    let mut changes = Vec::new();
    diff_node(old.root(), new.root(), "", &mut changes);
    tracing::debug!(changes = changes.len(), "schema comparison finished");
    changes
}

/// Parse both documents and diff them. Fails with a validation error if
/// either side is not a well-formed schema; nothing is diffed in that case.
pub fn compare_json(old: &Value, new: &Value) -> Result<Vec<Change>> {
    let old = SchemaDocument::from_json(old.clone())?;
    let new = SchemaDocument::from_json(new.clone())?;
    Ok(compare(&old, &new))
}

fn diff_node(old: &SchemaNode, new: &SchemaNode, path: &str, changes: &mut Vec<Change>) {
    let incomparable = diff_type(old, new, path, changes);

    diff_constraints(old, new, path, changes);
    diff_enum(old, new, path, changes);
    diff_default(old, new, path, changes);
    diff_nullable(old, new, path, changes);
    diff_description(old, new, path, changes);

    // Nested structure of unrelated types is not meaningful to compare
    if incomparable {
        return;
    }

    diff_properties(old, new, path, changes);
    diff_required(old, new, path, changes);

    match (&old.items, &new.items) {
        (Some(old_items), Some(new_items)) => {
            diff_node(old_items, new_items, &join_path(path, "items"), changes);
        }
        (None, Some(new_items)) => {
            diff_node(&SchemaNode::default(), new_items, &join_path(path, "items"), changes);
        }
        (Some(old_items), None) => {
            diff_node(old_items, &SchemaNode::default(), &join_path(path, "items"), changes);
        }
        (None, None) => {}
    }
}

/// Returns true when the types are unrelated
fn diff_type(old: &SchemaNode, new: &SchemaNode, path: &str, changes: &mut Vec<Change>) -> bool {
    if old.types == new.types {
        return false;
    }

    let widened = new.types.covers(&old.types);
    let narrowed = old.types.covers(&new.types);

    let (kind, verb) = match (widened, narrowed) {
        // Equivalent sets, e.g. [integer, number] vs number
        (true, true) => return false,
        (true, false) => (ChangeKind::TypeWidened, "widened"),
        (false, true) => (ChangeKind::TypeNarrowed, "narrowed"),
        (false, false) => (ChangeKind::TypeChanged, "changed"),
    };

    changes.push(Change::new(
        kind,
        join_path(path, "type"),
        Some(old.types.to_json()),
        Some(new.types.to_json()),
        format!("Type {} from '{}' to '{}'", verb, old.types, new.types),
    ));

    kind == ChangeKind::TypeChanged
}

fn diff_constraints(old: &SchemaNode, new: &SchemaNode, path: &str, changes: &mut Vec<Change>) {
    for bound in Bound::ALL {
        let old_val = old.constraints.bound(bound);
        let new_val = new.constraints.bound(bound);
        let keyword = bound.keyword();

        let (kind, message) = match (old_val, new_val) {
            (None, None) => continue,
            (Some(o), Some(n)) if o == n => continue,
            (Some(o), None) => (
                ChangeKind::ConstraintRelaxed,
                format!("Constraint '{}' was removed (was {})", keyword, o),
            ),
            (None, Some(n)) => (
                ChangeKind::ConstraintTightened,
                format!("Constraint '{}' was added with value {}", keyword, n),
            ),
            (Some(o), Some(n)) => {
                let increased = n.as_f64().unwrap_or(f64::NAN) > o.as_f64().unwrap_or(f64::NAN);
                if increased == bound.relaxes_on_increase() {
                    (
                        ChangeKind::ConstraintRelaxed,
                        format!("Constraint '{}' relaxed from {} to {}", keyword, o, n),
                    )
                } else {
                    (
                        ChangeKind::ConstraintTightened,
                        format!("Constraint '{}' tightened from {} to {}", keyword, o, n),
                    )
                }
            }
        };

        changes.push(Change::new(
            kind,
            join_path(path, keyword),
            old_val.map(|n| Value::Number(n.clone())),
            new_val.map(|n| Value::Number(n.clone())),
            message,
        ));
    }

    let (old_pattern, new_pattern) = (&old.constraints.pattern, &new.constraints.pattern);
    if old_pattern != new_pattern {
        // Pattern languages are not comparable, so any replacement counts as tightening
        let (kind, message) = match (old_pattern, new_pattern) {
            (Some(o), None) => (
                ChangeKind::ConstraintRelaxed,
                format!("Pattern '{}' was removed", o),
            ),
            (None, Some(n)) => (
                ChangeKind::ConstraintTightened,
                format!("Pattern '{}' was added", n),
            ),
            (o, n) => (
                ChangeKind::ConstraintTightened,
                format!(
                    "Pattern changed from '{}' to '{}'",
                    o.as_deref().unwrap_or_default(),
                    n.as_deref().unwrap_or_default()
                ),
            ),
        };
        changes.push(Change::new(
            kind,
            join_path(path, "pattern"),
            old_pattern.clone().map(Value::String),
            new_pattern.clone().map(Value::String),
            message,
        ));
    }
}

fn diff_enum(old: &SchemaNode, new: &SchemaNode, path: &str, changes: &mut Vec<Change>) {
    let enum_path = join_path(path, "enum");

    match (&old.enum_values, &new.enum_values) {
        (None, None) => {}
        (None, Some(values)) => changes.push(Change::new(
            ChangeKind::ConstraintTightened,
            enum_path,
            None,
            Some(Value::Array(values.clone())),
            "Enum restriction was added".to_string(),
        )),
        (Some(values), None) => changes.push(Change::new(
            ChangeKind::ConstraintRelaxed,
            enum_path,
            Some(Value::Array(values.clone())),
            None,
            "Enum restriction was removed".to_string(),
        )),
        (Some(old_values), Some(new_values)) => {
            let added: Vec<Value> = new_values
                .iter()
                .filter(|v| !old_values.contains(v))
                .cloned()
                .collect();
            let removed: Vec<Value> = old_values
                .iter()
                .filter(|v| !new_values.contains(v))
                .cloned()
                .collect();

            if !added.is_empty() {
                changes.push(Change::new(
                    ChangeKind::EnumValuesAdded,
                    enum_path.clone(),
                    Some(Value::Array(old_values.clone())),
                    Some(Value::Array(new_values.clone())),
                    format!("Enum values added: {}", Value::Array(added)),
                ));
            }
            if !removed.is_empty() {
                changes.push(Change::new(
                    ChangeKind::EnumValuesRemoved,
                    enum_path,
                    Some(Value::Array(old_values.clone())),
                    Some(Value::Array(new_values.clone())),
                    format!("Enum values removed: {}", Value::Array(removed)),
                ));
            }
        }
    }
}

fn diff_default(old: &SchemaNode, new: &SchemaNode, path: &str, changes: &mut Vec<Change>) {
    let (kind, message) = match (&old.default, &new.default) {
        (None, None) => return,
        (Some(o), Some(n)) if o == n => return,
        (Some(o), None) => (
            ChangeKind::DefaultRemoved,
            format!("Default value removed (was {})", o),
        ),
        (None, Some(n)) => (ChangeKind::DefaultAdded, format!("Default value added: {}", n)),
        (Some(o), Some(n)) => (
            ChangeKind::DefaultChanged,
            format!("Default value changed from {} to {}", o, n),
        ),
    };
    changes.push(Change::new(
        kind,
        join_path(path, "default"),
        old.default.clone(),
        new.default.clone(),
        message,
    ));
}

fn diff_nullable(old: &SchemaNode, new: &SchemaNode, path: &str, changes: &mut Vec<Change>) {
    if old.nullable == new.nullable {
        return;
    }
    let (kind, message) = if new.nullable {
        (ChangeKind::NullableAdded, "Field is now nullable")
    } else {
        (ChangeKind::NullableRemoved, "Field is no longer nullable")
    };
    changes.push(Change::new(
        kind,
        join_path(path, "nullable"),
        Some(Value::Bool(old.nullable)),
        Some(Value::Bool(new.nullable)),
        message.to_string(),
    ));
}

fn diff_description(old: &SchemaNode, new: &SchemaNode, path: &str, changes: &mut Vec<Change>) {
    if old.description == new.description {
        return;
    }
    changes.push(Change::new(
        ChangeKind::DescriptionChanged,
        join_path(path, "description"),
        old.description.clone().map(Value::String),
        new.description.clone().map(Value::String),
        "Description changed".to_string(),
    ));
}

fn diff_properties(old: &SchemaNode, new: &SchemaNode, path: &str, changes: &mut Vec<Change>) {
    let props_path = join_path(path, "properties");

    for (name, new_prop) in &new.properties {
        let prop_path = join_path(&props_path, name);
        match old.properties.get(name) {
            Some(old_prop) => diff_node(old_prop, new_prop, &prop_path, changes),
            None => {
                let message = if new.is_required(name) {
                    format!("Required property '{}' was added", name)
                } else {
                    format!("Optional property '{}' was added", name)
                };
                changes.push(Change::new(
                    ChangeKind::PropertyAdded,
                    prop_path,
                    None,
                    Some(describe(new_prop)),
                    message,
                ));
            }
        }
    }

    for (name, old_prop) in &old.properties {
        if !new.properties.contains_key(name) {
            changes.push(Change::new(
                ChangeKind::PropertyRemoved,
                join_path(&props_path, name),
                Some(describe(old_prop)),
                None,
                format!("Property '{}' was removed", name),
            ));
        }
    }
}

fn diff_required(old: &SchemaNode, new: &SchemaNode, path: &str, changes: &mut Vec<Change>) {
    let req_path = join_path(path, "required");

    for name in &new.required {
        if !old.is_required(name) {
            changes.push(Change::new(
                ChangeKind::RequiredAdded,
                join_path(&req_path, name),
                Some(Value::Bool(false)),
                Some(Value::Bool(true)),
                format!("Field '{}' is now required", name),
            ));
        }
    }

    for name in &old.required {
        if !new.is_required(name) {
            changes.push(Change::new(
                ChangeKind::RequiredRemoved,
                join_path(&req_path, name),
                Some(Value::Bool(true)),
                Some(Value::Bool(false)),
                format!("Field '{}' is no longer required", name),
            ));
        }
    }
}

/// Short summary of a property used as before/after payload
fn describe(node: &SchemaNode) -> Value {
    let mut summary = serde_json::Map::new();
    if !node.types.is_unconstrained() {
        summary.insert("type".to_string(), node.types.to_json());
    }
    if node.nullable {
        summary.insert("nullable".to_string(), Value::Bool(true));
    }
    if !node.properties.is_empty() {
        let names = node
            .properties
            .keys()
            .map(|k| Value::String(k.clone()))
            .collect();
        summary.insert("properties".to_string(), Value::Array(names));
    }
    Value::Object(summary)
}
