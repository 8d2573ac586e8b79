//! Command descriptors and parameter schemas.
//!
//! A descriptor is built once at startup and never mutated. It declares how
//! a command's parameters are validated, where it may run, whether it
//! mutates editor state, which resource scope it touches, and which handler
//! answers it.

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::error::EditorError;

// ─────────────────────────────────────────────────────────────────────────────
// Descriptor
// ─────────────────────────────────────────────────────────────────────────────

/// Where a command is allowed to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Affinity {
    /// Must run inside the editor executor's tick.
    EditorThread,
    /// May be answered directly on the connection task.
    AnyThread,
}

/// Commands implemented by the server itself rather than the editor model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinCommand {
    ListCommands,
    Authenticate,
}

/// Which handler answers a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerRef {
    /// Delegated to the editor-model collaborator on the editor thread.
    Editor,
    Builtin(BuiltinCommand),
}

/// How a command derives its resource scope from its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeRule {
    /// Touches no editor state that other commands could observe.
    Unscoped,
    /// Conflicts with every scoped command.
    Global,
    /// One asset, named by a parameter: `<kind>:<params[param]>`.
    Asset { kind: String, param: String },
    /// A single fixed asset, e.g. the project-wide tag taxonomy.
    Fixed(String),
    /// Every scope the listed rules resolve to, for commands whose target
    /// may be any of several asset kinds.
    AnyOf(Vec<ScopeRule>),
}

/// Concrete scope of one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceScope {
    Unscoped,
    Global,
    Asset(String),
    /// Several assets claimed together.
    Assets(Vec<String>),
}

impl ResourceScope {
    /// Whether two requests touch overlapping editor state.
    pub fn overlaps(&self, other: &ResourceScope) -> bool {
        match (self, other) {
            (Self::Unscoped, _) | (_, Self::Unscoped) => false,
            (Self::Global, _) | (_, Self::Global) => true,
            _ => {
                let theirs = other.keys();
                self.keys().iter().any(|k| theirs.contains(k))
            }
        }
    }

    fn keys(&self) -> &[String] {
        match self {
            Self::Asset(key) => std::slice::from_ref(key),
            Self::Assets(keys) => keys,
            Self::Unscoped | Self::Global => &[],
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Unscoped => "unscoped".into(),
            Self::Global => "global".into(),
            Self::Asset(key) => key.clone(),
            Self::Assets(keys) => keys.join(","),
        }
    }
}

impl ScopeRule {
    pub fn asset(kind: impl Into<String>, param: impl Into<String>) -> Self {
        Self::Asset {
            kind: kind.into(),
            param: param.into(),
        }
    }

    /// Resolve the scope for validated parameters.
    ///
    /// A missing or non-string scope parameter widens to `Global`.
    pub fn resolve(&self, params: &Value) -> ResourceScope {
        match self {
            Self::Unscoped => ResourceScope::Unscoped,
            Self::Global => ResourceScope::Global,
            Self::Fixed(key) => ResourceScope::Asset(key.clone()),
            Self::Asset { kind, param } => match params.get(param).and_then(Value::as_str) {
                Some(name) => ResourceScope::Asset(format!("{kind}:{name}")),
                None => ResourceScope::Global,
            },
            Self::AnyOf(rules) => {
                let mut keys = Vec::new();
                for rule in rules {
                    match rule.resolve(params) {
                        ResourceScope::Global => return ResourceScope::Global,
                        ResourceScope::Unscoped => {}
                        ResourceScope::Asset(key) => keys.push(key),
                        ResourceScope::Assets(more) => keys.extend(more),
                    }
                }
                match keys.len() {
                    0 => ResourceScope::Unscoped,
                    1 => ResourceScope::Asset(keys.remove(0)),
                    _ => ResourceScope::Assets(keys),
                }
            }
        }
    }

    fn describe(&self) -> Value {
        match self {
            Self::Unscoped => json!({ "type": "unscoped" }),
            Self::Global => json!({ "type": "global" }),
            Self::Fixed(key) => json!({ "type": "fixed", "key": key }),
            Self::Asset { kind, param } => json!({ "type": "asset", "kind": kind, "param": param }),
            Self::AnyOf(rules) => json!({
                "type": "anyOf",
                "scopes": rules.iter().map(ScopeRule::describe).collect::<Vec<_>>(),
            }),
        }
    }
}

/// Registry entry for one command.
#[derive(Debug, Clone)]
pub struct CommandDescriptor {
    pub name: String,
    pub description: String,
    pub params: ParamSchema,
    pub affinity: Affinity,
    pub mutating: bool,
    pub scope: ScopeRule,
    pub handler: HandlerRef,
}

impl CommandDescriptor {
    /// A read-only command answered by the editor model.
    pub fn query(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: ParamSchema::default(),
            affinity: Affinity::EditorThread,
            mutating: false,
            scope: ScopeRule::Global,
            handler: HandlerRef::Editor,
        }
    }

    /// A state-changing command answered by the editor model.
    pub fn mutation(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            mutating: true,
            ..Self::query(name, description)
        }
    }

    /// A command the server answers itself, off the editor thread.
    pub fn builtin(
        name: impl Into<String>,
        description: impl Into<String>,
        builtin: BuiltinCommand,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: ParamSchema::default(),
            affinity: Affinity::AnyThread,
            mutating: false,
            scope: ScopeRule::Unscoped,
            handler: HandlerRef::Builtin(builtin),
        }
    }

    pub fn param(mut self, field: ParamField) -> Self {
        self.params.fields.push(field);
        self
    }

    pub fn scope(mut self, scope: ScopeRule) -> Self {
        self.scope = scope;
        self
    }

    /// Introspection payload published by `listCommands`.
    pub fn describe(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "mutating": self.mutating,
            "affinity": self.affinity,
            "scope": self.scope.describe(),
            "params": self.params.describe(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parameter schema
// ─────────────────────────────────────────────────────────────────────────────

/// Accepted JSON shape for one parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    /// A string restricted to a fixed set of values.
    OneOf(Vec<String>),
    Any,
}

impl ParamKind {
    pub fn one_of(values: &[&str]) -> Self {
        Self::OneOf(values.iter().map(|v| v.to_string()).collect())
    }

    fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::OneOf(_) => "enum",
            Self::Any => "any",
        }
    }

    fn check(&self, value: &Value) -> Result<(), String> {
        let ok = match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
            Self::OneOf(allowed) => {
                return match value.as_str() {
                    Some(s) if allowed.iter().any(|a| a == s) => Ok(()),
                    _ => Err(format!("expected one of [{}]", allowed.join(", "))),
                };
            }
        };
        if ok {
            Ok(())
        } else {
            Err(format!("expected {}", self.name()))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamField {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub description: String,
}

impl ParamField {
    pub fn required(name: impl Into<String>, kind: ParamKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: description.into(),
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParamKind, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// Ordered set of parameter fields. Unknown fields are rejected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSchema {
    pub fields: Vec<ParamField>,
}

impl ParamSchema {
    /// Validate a payload, collecting every issue rather than stopping at the first.
    pub fn validate(&self, params: &Value) -> Result<(), EditorError> {
        let Some(object) = params.as_object() else {
            return Err(EditorError::validation("params must be a JSON object"));
        };

        let mut issues = Vec::new();
        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    issues.push(issue(&field.name, "is required"));
                }
                None | Some(Value::Null) => {}
                Some(value) => {
                    if let Err(problem) = field.kind.check(value) {
                        issues.push(issue(&field.name, &problem));
                    }
                }
            }
        }
        for key in object.keys() {
            if !self.fields.iter().any(|f| &f.name == key) {
                issues.push(issue(key, "is not a recognised parameter"));
            }
        }

        if issues.is_empty() {
            return Ok(());
        }
        let summary = issues
            .iter()
            .filter_map(|i| Some(format!("'{}' {}", i.get("field")?.as_str()?, i.get("problem")?.as_str()?)))
            .collect::<Vec<_>>()
            .join("; ");
        Err(EditorError::validation(format!("invalid params: {summary}"))
            .with_detail(json!({ "issues": issues })))
    }

    fn describe(&self) -> Value {
        let fields: Vec<Value> = self
            .fields
            .iter()
            .map(|f| {
                let mut entry = Map::new();
                entry.insert("name".into(), json!(f.name));
                entry.insert("type".into(), json!(f.kind.name()));
                entry.insert("required".into(), json!(f.required));
                entry.insert("description".into(), json!(f.description));
                if let ParamKind::OneOf(allowed) = &f.kind {
                    entry.insert("enum".into(), json!(allowed));
                }
                Value::Object(entry)
            })
            .collect();
        Value::Array(fields)
    }
}

fn issue(field: &str, problem: &str) -> Value {
    json!({ "field": field, "problem": problem })
}
