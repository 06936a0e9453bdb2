//! Algebraic properties of comparison and classification

use proptest::prelude::*;
use schema_contracts::{classify, compare, ChangeType, CompatibilityMode, SchemaDocument};
use serde_json::{json, Map, Value};

const NAMES: [&str; 6] = ["id", "name", "email", "status", "amount", "created_at"];

fn property() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(json!({ "type": "integer" })),
        Just(json!({ "type": "number" })),
        Just(json!({ "type": "boolean" })),
        (1u64..200).prop_map(|max| json!({ "type": "string", "maxLength": max })),
        Just(json!({ "type": "string" })),
        prop::sample::subsequence(vec!["open", "closed", "void"], 1..=3)
            .prop_map(|values| json!({ "type": "string", "enum": values })),
    ]
}

fn schema() -> impl Strategy<Value = SchemaDocument> {
    let field = (prop::sample::select(NAMES.to_vec()), property(), any::<bool>());
    prop::collection::vec(field, 0..6).prop_map(|fields| {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for (name, prop, is_required) in fields {
            if properties.contains_key(name) {
                continue;
            }
            properties.insert(name.to_string(), prop);
            if is_required {
                required.push(Value::from(name));
            }
        }
        SchemaDocument::from_json(json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }))
        .unwrap()
    })
}

fn mode() -> impl Strategy<Value = CompatibilityMode> {
    prop_oneof![
        Just(CompatibilityMode::Backward),
        Just(CompatibilityMode::Forward),
        Just(CompatibilityMode::Full),
        Just(CompatibilityMode::None),
    ]
}

proptest! {
    #[test]
    fn compare_with_self_is_empty(a in schema()) {
        prop_assert!(compare(&a, &a).is_empty());
    }

    #[test]
    fn full_mode_breaks_on_any_structural_change(a in schema(), b in schema()) {
        let changes = compare(&a, &b);
        let result = classify(&changes, CompatibilityMode::Full);
        prop_assert_eq!(result.breaking, !changes.is_empty());
    }

    #[test]
    fn none_mode_never_breaks(a in schema(), b in schema()) {
        prop_assert!(!classify(&compare(&a, &b), CompatibilityMode::None).breaking);
    }

    #[test]
    fn classification_is_a_function_of_inputs(a in schema(), b in schema(), m in mode()) {
        let first = classify(&compare(&a, &b), m);
        let second = classify(&compare(&a, &b), m);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn breaking_implies_major(a in schema(), b in schema(), m in mode()) {
        let result = classify(&compare(&a, &b), m);
        if result.breaking {
            prop_assert_eq!(result.change_type, ChangeType::Major);
        }
        prop_assert_eq!(result.breaking, result.changes.iter().any(|c| c.breaking));
    }

    #[test]
    fn full_is_at_least_as_strict_as_either_direction(a in schema(), b in schema()) {
        let changes = compare(&a, &b);
        let backward = classify(&changes, CompatibilityMode::Backward);
        let forward = classify(&changes, CompatibilityMode::Forward);
        let full = classify(&changes, CompatibilityMode::Full);
        prop_assert_eq!(full.breaking, !changes.is_empty());
        if backward.breaking || forward.breaking {
            prop_assert!(full.breaking);
        }
    }
}
