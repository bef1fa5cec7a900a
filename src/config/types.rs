use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

// ─── Top-Level Config ───────────────────────────────────────────────────────

/// Root configuration produced by the loader.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceConfig {
    pub settings: Settings,
    pub variables: HashMap<String, serde_json::Value>,
    pub resources: Vec<ResourceConfig>,
}

/// Global settings controlling execution behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_state_path")]
    pub state_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            state_path: default_state_path(),
        }
    }
}

fn default_parallelism() -> usize {
    10
}

fn default_state_path() -> String {
    ".converge/state.db".to_string()
}

// ─── Resource ───────────────────────────────────────────────────────────────

/// Raw (uninterpolated) attribute expressions keyed by attribute name.
pub type RawConfig = HashMap<String, Expression>;

/// A resource definition as declared in configuration.
#[derive(Debug, Clone, Default)]
pub struct ResourceConfig {
    pub resource_type: String,
    pub name: String,
    /// Provider alias such as `aws.west`. `None` means the default provider for the type.
    pub provider: Option<String>,
    pub count: Option<Expression>,
    pub depends_on: Vec<String>,
    pub lifecycle: LifecycleConfig,
    pub attributes: RawConfig,
    pub provisioners: Vec<ProvisionerConfig>,
}

impl ResourceConfig {
    pub fn new(resource_type: &str, name: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Canonical id other configuration uses to reference this resource.
    pub fn id(&self) -> String {
        format!("{}.{}", self.resource_type, self.name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LifecycleConfig {
    pub create_before_destroy: bool,
    pub ignore_changes: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProvisionerConfig {
    pub provisioner_type: String,
    pub config: RawConfig,
    pub connection: RawConfig,
}

impl ProvisionerConfig {
    pub fn new(provisioner_type: &str) -> Self {
        Self {
            provisioner_type: provisioner_type.to_string(),
            ..Default::default()
        }
    }
}

// ─── Expression ─────────────────────────────────────────────────────────────

/// An attribute value as written in configuration, before interpolation.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A literal value. Strings nested inside lists and maps may still carry
    /// `${...}` interpolations, which are resolved during evaluation.
    Literal(Value),

    /// A reference path like var.region or null_resource.web.id.
    Reference(Vec<String>),

    /// String template with interpolations: "Hello ${var.name}".
    Template(Vec<TemplatePart>),
}

impl Expression {
    /// Parse a raw string, recognising `${...}` interpolations.
    pub fn parse_str(s: &str) -> Expression {
        if !s.contains("${") {
            return Expression::Literal(Value::String(s.to_string()));
        }

        let parts = parse_template(s);
        match parts.as_slice() {
            [TemplatePart::Interpolation(expr)] => (**expr).clone(),
            _ => Expression::Template(parts),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Literal(String),
    Interpolation(Box<Expression>),
}

/// Split a string into literal and `${...}` parts. An unterminated `${` is kept literally.
pub fn parse_template(s: &str) -> Vec<TemplatePart> {
    let mut parts = Vec::new();
    let mut remaining = s;

    while let Some(start) = remaining.find("${") {
        let Some(end) = remaining[start + 2..].find('}') else {
            break;
        };
        if start > 0 {
            parts.push(TemplatePart::Literal(remaining[..start].to_string()));
        }
        let ref_str = remaining[start + 2..start + 2 + end].trim();
        let path = ref_str.split('.').map(|p| p.trim().to_string()).collect();
        parts.push(TemplatePart::Interpolation(Box::new(Expression::Reference(
            path,
        ))));
        remaining = &remaining[start + 2 + end + 1..];
    }

    if !remaining.is_empty() {
        parts.push(TemplatePart::Literal(remaining.to_string()));
    }
    parts
}

/// The concrete value types.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::json!(*i),
            Value::Float(f) => serde_json::json!(*f),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(|v| v.to_json()).collect())
            }
            Value::Map(entries) => {
                let map: serde_json::Map<String, serde_json::Value> = entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect();
                serde_json::Value::Object(map)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
            Value::List(_) | Value::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}

/// Fully interpolated attribute values, ready to hand to a provider.
pub type ResolvedConfig = BTreeMap<String, serde_json::Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_string_is_literal() {
        assert_eq!(
            Expression::parse_str("hello"),
            Expression::Literal(Value::String("hello".into()))
        );
    }

    #[test]
    fn single_interpolation_is_reference() {
        assert_eq!(
            Expression::parse_str("${null_resource.a.id}"),
            Expression::Reference(vec!["null_resource".into(), "a".into(), "id".into()])
        );
    }

    #[test]
    fn mixed_string_is_template() {
        let expr = Expression::parse_str("web-${var.env}-01");
        let Expression::Template(parts) = expr else {
            panic!("expected template");
        };
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], TemplatePart::Literal("web-".into()));
        assert_eq!(parts[2], TemplatePart::Literal("-01".into()));
    }

    #[test]
    fn config_id_is_type_dot_name() {
        assert_eq!(ResourceConfig::new("widget", "x").id(), "widget.x");
    }
}
