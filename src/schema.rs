//! Schema documents
//!
//! A [`SchemaDocument`] is the normalized, validated form of a JSON-Schema-like
//! document handed over by ingestion adapters. Parsing resolves local `$ref`
//! indirection up front so that comparison never has to chase pointers.

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::{ContractError, Result};

/// Path label used for errors at the document root
pub const ROOT_PATH: &str = "$";

/// Join a dotted schema path with a segment
pub fn join_path(base: &str, segment: &str) -> String {
    if base.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", base, segment)
    }
}

fn error_path(path: &str) -> &str {
    if path.is_empty() {
        ROOT_PATH
    } else {
        path
    }
}

/// A JSON type keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl JsonType {
    pub fn parse(keyword: &str) -> Option<Self> {
        match keyword {
            "null" => Some(JsonType::Null),
            "boolean" => Some(JsonType::Boolean),
            "integer" => Some(JsonType::Integer),
            "number" => Some(JsonType::Number),
            "string" => Some(JsonType::String),
            "array" => Some(JsonType::Array),
            "object" => Some(JsonType::Object),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JsonType::Null => "null",
            JsonType::Boolean => "boolean",
            JsonType::Integer => "integer",
            JsonType::Number => "number",
            JsonType::String => "string",
            JsonType::Array => "array",
            JsonType::Object => "object",
        }
    }

    /// Whether every value of `other` is also a value of `self`
    pub fn covers(&self, other: &JsonType) -> bool {
        self == other || (*self == JsonType::Number && *other == JsonType::Integer)
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of types a node admits. Empty means unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeSet(Vec<JsonType>);

impl TypeSet {
    pub fn new(mut types: Vec<JsonType>) -> Self {
        types.sort();
        types.dedup();
        Self(types)
    }

    pub fn single(ty: JsonType) -> Self {
        Self(vec![ty])
    }

    pub fn is_unconstrained(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, ty: JsonType) -> bool {
        self.0.contains(&ty)
    }

    pub fn types(&self) -> &[JsonType] {
        &self.0
    }

    /// Whether every value admitted by `other` is admitted by `self`
    pub fn covers(&self, other: &TypeSet) -> bool {
        if self.is_unconstrained() {
            return true;
        }
        if other.is_unconstrained() {
            return false;
        }
        other
            .0
            .iter()
            .all(|theirs| self.0.iter().any(|ours| ours.covers(theirs)))
    }

    pub fn to_json(&self) -> Value {
        match self.0.as_slice() {
            [] => Value::Null,
            [single] => Value::String(single.as_str().to_string()),
            many => Value::Array(
                many.iter()
                    .map(|t| Value::String(t.as_str().to_string()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for TypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("any");
        }
        let names: Vec<&str> = self.0.iter().map(|t| t.as_str()).collect();
        f.write_str(&names.join("|"))
    }
}

/// Numeric bound keywords understood by the comparator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bound {
    MinLength,
    MaxLength,
    MinItems,
    MaxItems,
    Minimum,
    Maximum,
    ExclusiveMinimum,
    ExclusiveMaximum,
}

impl Bound {
    pub const ALL: [Bound; 8] = [
        Bound::MinLength,
        Bound::MaxLength,
        Bound::MinItems,
        Bound::MaxItems,
        Bound::Minimum,
        Bound::Maximum,
        Bound::ExclusiveMinimum,
        Bound::ExclusiveMaximum,
    ];

    pub fn keyword(&self) -> &'static str {
        match self {
            Bound::MinLength => "minLength",
            Bound::MaxLength => "maxLength",
            Bound::MinItems => "minItems",
            Bound::MaxItems => "maxItems",
            Bound::Minimum => "minimum",
            Bound::Maximum => "maximum",
            Bound::ExclusiveMinimum => "exclusiveMinimum",
            Bound::ExclusiveMaximum => "exclusiveMaximum",
        }
    }

    /// Upper bounds admit more values when raised; lower bounds when lowered
    pub fn relaxes_on_increase(&self) -> bool {
        matches!(
            self,
            Bound::MaxLength | Bound::MaxItems | Bound::Maximum | Bound::ExclusiveMaximum
        )
    }
}

/// Value constraints on a node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    pub bounds: BTreeMap<Bound, Number>,
    pub pattern: Option<String>,
}

impl Constraints {
    pub fn bound(&self, bound: Bound) -> Option<&Number> {
        self.bounds.get(&bound)
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty() && self.pattern.is_none()
    }
}

/// A node of the typed schema tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaNode {
    pub types: TypeSet,
    /// Declared properties, in declaration order
    pub properties: IndexMap<String, SchemaNode>,
    /// Required property names, in declaration order
    pub required: Vec<String>,
    pub enum_values: Option<Vec<Value>>,
    pub constraints: Constraints,
    pub items: Option<Box<SchemaNode>>,
    pub default: Option<Value>,
    pub nullable: bool,
    pub description: Option<String>,
}

impl SchemaNode {
    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }
}

/// A validated schema document
///
/// The original JSON is retained verbatim so that a published contract can be
/// returned to consumers exactly as the producer submitted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct SchemaDocument {
    root: SchemaNode,
    source: Value,
}

impl SchemaDocument {
    /// Parse and validate a schema document
    pub fn from_json(value: Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            ContractError::validation(ROOT_PATH, "schema root must be a JSON object")
        })?;

        if object.contains_key("type") {
            let types = parse_types(object.get("type"), "")?;
            if !types.is_unconstrained() && !types.contains(JsonType::Object) {
                return Err(ContractError::validation(
                    "type",
                    format!("schema root must be an object, found '{}'", types),
                ));
            }
        }

        let root = Resolver::new(&value).node(&value, "")?;
        Ok(Self {
            root,
            source: value,
        })
    }

    pub fn parse_str(content: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(content)?;
        Self::from_json(value)
    }

    pub fn root(&self) -> &SchemaNode {
        &self.root
    }

    pub fn as_json(&self) -> &Value {
        &self.source
    }
}

impl TryFrom<Value> for SchemaDocument {
    type Error = ContractError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_json(value)
    }
}

impl From<SchemaDocument> for Value {
    fn from(doc: SchemaDocument) -> Self {
        doc.source
    }
}

fn parse_types(value: Option<&Value>, path: &str) -> Result<TypeSet> {
    let type_path = join_path(path, "type");
    let keyword = |v: &Value| -> Result<JsonType> {
        let name = v.as_str().ok_or_else(|| {
            ContractError::validation(&type_path, "type keyword must be a string")
        })?;
        JsonType::parse(name).ok_or_else(|| {
            ContractError::validation(&type_path, format!("unknown type keyword '{}'", name))
        })
    };

    match value {
        None => Ok(TypeSet::default()),
        Some(Value::Array(items)) => {
            let types = items.iter().map(keyword).collect::<Result<Vec<_>>>()?;
            Ok(TypeSet::new(types))
        }
        Some(single) => Ok(TypeSet::single(keyword(single)?)),
    }
}

/// Walks a raw document, resolving local `$ref`s against the document root
struct Resolver<'a> {
    root: &'a Value,
    /// `$ref` targets currently being expanded, for cycle detection
    expanding: Vec<String>,
}

impl<'a> Resolver<'a> {
    fn new(root: &'a Value) -> Self {
        Self {
            root,
            expanding: Vec::new(),
        }
    }

    fn node(&mut self, value: &'a Value, path: &str) -> Result<SchemaNode> {
        let object = value.as_object().ok_or_else(|| {
            ContractError::validation(error_path(path), "schema node must be a JSON object")
        })?;

        if let Some(reference) = object.get("$ref") {
            return self.follow(reference, path);
        }

        let types = parse_types(object.get("type"), path)?;

        let mut properties = IndexMap::new();
        if let Some(props) = object.get("properties") {
            let props_path = join_path(path, "properties");
            let props = props.as_object().ok_or_else(|| {
                ContractError::validation(&props_path, "properties must be an object")
            })?;
            for (name, prop) in props {
                let prop_path = join_path(&props_path, name);
                properties.insert(name.clone(), self.node(prop, &prop_path)?);
            }
        }

        let mut required = Vec::new();
        if let Some(req) = object.get("required") {
            let req_path = join_path(path, "required");
            let names = req.as_array().ok_or_else(|| {
                ContractError::validation(&req_path, "required must be an array of names")
            })?;
            for name in names {
                let name = name.as_str().ok_or_else(|| {
                    ContractError::validation(&req_path, "required entries must be strings")
                })?;
                if !required.iter().any(|r: &String| r == name) {
                    required.push(name.to_string());
                }
            }
        }

        let enum_values = match object.get("enum") {
            None => None,
            Some(Value::Array(values)) => Some(values.clone()),
            Some(_) => {
                return Err(ContractError::validation(
                    join_path(path, "enum"),
                    "enum must be an array",
                ))
            }
        };

        let constraints = parse_constraints(object, path)?;

        let items = match object.get("items") {
            None => None,
            Some(Value::Array(_)) => {
                return Err(ContractError::validation(
                    join_path(path, "items"),
                    "tuple-form items are not supported",
                ))
            }
            Some(items) => Some(Box::new(self.node(items, &join_path(path, "items"))?)),
        };

        let nullable = match object.get("nullable") {
            None => false,
            Some(Value::Bool(flag)) => *flag,
            Some(_) => {
                return Err(ContractError::validation(
                    join_path(path, "nullable"),
                    "nullable must be a boolean",
                ))
            }
        };

        let description = object
            .get("description")
            .and_then(|d| d.as_str())
            .map(String::from);

        Ok(SchemaNode {
            types,
            properties,
            required,
            enum_values,
            constraints,
            items,
            default: object.get("default").cloned(),
            nullable,
            description,
        })
    }

    fn follow(&mut self, reference: &Value, path: &str) -> Result<SchemaNode> {
        let ref_path = join_path(path, "$ref");
        let target = reference
            .as_str()
            .ok_or_else(|| ContractError::validation(&ref_path, "$ref must be a string"))?;

        let pointer = target.strip_prefix('#').ok_or_else(|| {
            ContractError::validation(
                &ref_path,
                format!("only document-local references are supported, got '{}'", target),
            )
        })?;

        if self.expanding.iter().any(|t| t == target) {
            return Err(ContractError::validation(
                &ref_path,
                format!("cyclic reference through '{}'", target),
            ));
        }

        let resolved = self.root.pointer(pointer).ok_or_else(|| {
            ContractError::validation(&ref_path, format!("unresolvable reference '{}'", target))
        })?;

        self.expanding.push(target.to_string());
        let node = self.node(resolved, path);
        self.expanding.pop();
        node
    }
}

fn parse_constraints(object: &serde_json::Map<String, Value>, path: &str) -> Result<Constraints> {
    let mut constraints = Constraints::default();

    for bound in Bound::ALL {
        match object.get(bound.keyword()) {
            None => {}
            Some(Value::Number(number)) => {
                constraints.bounds.insert(bound, number.clone());
            }
            Some(_) => {
                return Err(ContractError::validation(
                    join_path(path, bound.keyword()),
                    "bound must be a number",
                ))
            }
        }
    }

    if let Some(pattern) = object.get("pattern") {
        let pattern_path = join_path(path, "pattern");
        let pattern = pattern
            .as_str()
            .ok_or_else(|| ContractError::validation(&pattern_path, "pattern must be a string"))?;
        Regex::new(pattern).map_err(|e| {
            ContractError::validation(&pattern_path, format!("invalid pattern: {}", e))
        })?;
        constraints.pattern = Some(pattern.to_string());
    }

    Ok(constraints)
}
