//! Gameplay tag taxonomy and gameplay effect definitions.

use std::collections::BTreeMap;

use edl_protocol::EditorError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

// ─────────────────────────────────────────────────────────────────────────────
// Tags
// ─────────────────────────────────────────────────────────────────────────────

/// Project-wide registry of dotted gameplay tags, e.g. `Ability.Fire.Charged`.
#[derive(Debug, Clone, Default)]
pub struct TagTable {
    tags: BTreeMap<String, Option<String>>,
}

impl TagTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tags.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn add(&mut self, tag: &str, comment: Option<String>) -> Result<(), EditorError> {
        validate_tag(tag)?;
        if self.contains(tag) {
            return Err(EditorError::conflict(format!("gameplay tag '{tag}' already exists")));
        }
        self.tags.insert(tag.to_string(), comment);
        Ok(())
    }

    /// Sorted tags starting with `prefix`.
    pub fn list(&self, prefix: Option<&str>) -> Vec<Value> {
        self.tags
            .iter()
            .filter(|(tag, _)| prefix.is_none_or(|p| tag.starts_with(p)))
            .map(|(tag, comment)| match comment {
                Some(comment) => json!({ "tag": tag, "comment": comment }),
                None => json!({ "tag": tag }),
            })
            .collect()
    }

    /// Every tag must already be registered.
    pub fn require_all(&self, tags: &[String]) -> Result<(), EditorError> {
        match tags.iter().find(|t| !self.contains(t)) {
            Some(missing) => Err(EditorError::validation(format!(
                "gameplay tag '{missing}' is not defined in the project"
            ))),
            None => Ok(()),
        }
    }
}

fn validate_tag(tag: &str) -> Result<(), EditorError> {
    let valid_segment =
        |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if tag.split('.').all(valid_segment) {
        Ok(())
    } else {
        Err(EditorError::validation(format!(
            "invalid gameplay tag '{tag}': expected dot-separated alphanumeric segments"
        )))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Effects
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DurationPolicy {
    Instant,
    Infinite,
    HasDuration,
}

impl DurationPolicy {
    /// Case-insensitive, with the short aliases editors commonly accept.
    pub fn parse(input: &str) -> Result<Self, EditorError> {
        match input.to_ascii_lowercase().as_str() {
            "instant" => Ok(Self::Instant),
            "infinite" => Ok(Self::Infinite),
            "hasduration" | "has_duration" | "duration" => Ok(Self::HasDuration),
            _ => Err(EditorError::validation(format!(
                "unknown duration policy '{input}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModifierOp {
    Additive,
    Multiplicative,
    Division,
    Override,
}

impl ModifierOp {
    pub fn parse(input: &str) -> Result<Self, EditorError> {
        match input.to_ascii_lowercase().as_str() {
            "additive" | "add" => Ok(Self::Additive),
            "multiplicative" | "multiply" => Ok(Self::Multiplicative),
            "division" | "divide" => Ok(Self::Division),
            "override" | "set" => Ok(Self::Override),
            _ => Err(EditorError::validation(format!(
                "unknown modifier operation '{input}'"
            ))),
        }
    }
}

/// Attribute reference: `{ "set": "HealthSet", "property": "Health" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRef {
    pub set: String,
    pub property: String,
}

/// Modifier as sent by clients; validated into [`Modifier`].
#[derive(Debug, Clone, Deserialize)]
pub struct ModifierSpec {
    pub attribute: AttributeRef,
    #[serde(default)]
    pub operation: Option<String>,
    pub magnitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Modifier {
    pub attribute: AttributeRef,
    pub operation: ModifierOp,
    pub magnitude: f64,
}

impl ModifierSpec {
    fn validate(self) -> Result<Modifier, EditorError> {
        if self.attribute.set.trim().is_empty() || self.attribute.property.trim().is_empty() {
            return Err(EditorError::validation(
                "modifier attribute needs both 'set' and 'property'",
            ));
        }
        let operation = match self.operation.as_deref() {
            Some(op) => ModifierOp::parse(op)?,
            None => ModifierOp::Additive,
        };
        Ok(Modifier {
            attribute: self.attribute,
            operation,
            magnitude: self.magnitude,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameplayEffect {
    pub path: String,
    pub duration_policy: DurationPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    pub modifiers: Vec<Modifier>,
    pub granted_tags: Vec<String>,
}

/// Raw `createGameplayEffect` settings.
#[derive(Debug, Clone, Default)]
pub struct EffectSpec {
    pub duration_policy: Option<String>,
    pub duration_seconds: Option<f64>,
    pub modifiers: Vec<ModifierSpec>,
    pub granted_tags: Vec<String>,
}

impl EffectSpec {
    /// Validate against the tag table and build the effect stored at `path`.
    pub fn build(self, path: String, tags: &TagTable) -> Result<GameplayEffect, EditorError> {
        let duration_policy = match self.duration_policy.as_deref() {
            Some(policy) => DurationPolicy::parse(policy)?,
            None => DurationPolicy::Instant,
        };
        let duration_seconds = match (duration_policy, self.duration_seconds) {
            (DurationPolicy::HasDuration, None) => {
                return Err(EditorError::validation(
                    "durationSeconds must be provided when durationPolicy is 'HasDuration'",
                ));
            }
            (DurationPolicy::HasDuration, Some(secs)) if secs <= 0.0 => {
                return Err(EditorError::validation("durationSeconds must be positive"));
            }
            (DurationPolicy::HasDuration, secs) => secs,
            _ => None,
        };
        tags.require_all(&self.granted_tags)?;
        let modifiers = self
            .modifiers
            .into_iter()
            .map(ModifierSpec::validate)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(GameplayEffect {
            path,
            duration_policy,
            duration_seconds,
            modifiers,
            granted_tags: self.granted_tags,
        })
    }
}

/// Join a package path and asset name into a `/Game/...` object path.
pub fn effect_path(package_path: &str, name: &str) -> Result<String, EditorError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EditorError::validation("asset name cannot be empty"));
    }
    if name.contains(['/', '.', ' ']) {
        return Err(EditorError::validation(format!("invalid asset name '{name}'")));
    }
    let package = package_path.trim().trim_end_matches('/');
    let package = if package.is_empty() {
        "/Game".to_string()
    } else if package.starts_with('/') {
        package.to_string()
    } else {
        format!("/Game/{package}")
    };
    if package.contains("//") {
        return Err(EditorError::validation(format!("invalid package path '{package}'")));
    }
    Ok(format!("{package}/{name}"))
}
