//! Interpolation of raw configuration against graph-wide values.
//!
//! The [`Interpolator`] trait is the seam the apply pipeline and the
//! dependency queries talk to; [`ExpressionEvaluator`] is the implementation
//! used by the engine.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use dashmap::DashMap;

use crate::config::types::{
    parse_template, Expression, RawConfig, ResolvedConfig, TemplatePart, Value,
};
use crate::state::models::InstanceState;

/// The resource being interpolated, used to answer `count.index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    pub resource_type: String,
    pub count_index: i64,
}

/// Everything an expression may refer to besides graph-wide values.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub resource: &'a Resource,
    /// Bound for provisioner configuration, where `self.*` means the new instance.
    pub self_state: Option<&'a InstanceState>,
}

impl<'a> Scope<'a> {
    pub fn resource(resource: &'a Resource) -> Self {
        Self {
            resource,
            self_state: None,
        }
    }

    pub fn with_self(resource: &'a Resource, state: &'a InstanceState) -> Self {
        Self {
            resource,
            self_state: Some(state),
        }
    }
}

/// Resolves expressions and extracts the references they contain.
pub trait Interpolator: Send + Sync {
    /// Names of the other resources an expression refers to.
    fn references(&self, expr: &Expression) -> Vec<String>;

    /// Evaluate a single expression to a concrete value.
    fn evaluate(&self, expr: &Expression, scope: Scope<'_>) -> Result<serde_json::Value>;

    /// References of every expression in a raw config, in attribute-name order.
    fn config_references(&self, raw: &RawConfig) -> Vec<String> {
        let mut keys: Vec<&String> = raw.keys().collect();
        keys.sort();
        keys.into_iter()
            .flat_map(|k| self.references(&raw[k]))
            .collect()
    }

    /// Produce a resolved copy of a raw config.
    fn interpolate(&self, raw: &RawConfig, scope: Scope<'_>) -> Result<ResolvedConfig> {
        let mut resolved = ResolvedConfig::new();
        for (key, expr) in raw {
            let value = self
                .evaluate(expr, scope)
                .map_err(|e| e.context(format!("attribute '{}'", key)))?;
            resolved.insert(key.clone(), value);
        }
        Ok(resolved)
    }
}

// ─── Reference extraction ───────────────────────────────────────────────────

/// Extract resource references from an expression.
/// e.g. Reference(["null_resource", "web", "id"]) → "null_resource.web"
pub fn extract_references(expr: &Expression) -> Vec<String> {
    let mut refs = Vec::new();
    collect_references(expr, &mut refs);
    refs
}

fn collect_references(expr: &Expression, refs: &mut Vec<String>) {
    match expr {
        Expression::Reference(parts) => {
            if let Some(r) = reference_target(parts) {
                refs.push(r);
            }
        }
        Expression::Template(parts) => {
            for part in parts {
                if let TemplatePart::Interpolation(e) = part {
                    collect_references(e, refs);
                }
            }
        }
        Expression::Literal(val) => collect_references_from_value(val, refs),
    }
}

/// Nested lists and maps keep their `${...}` strings as literals, so scan those too.
fn collect_references_from_value(val: &Value, refs: &mut Vec<String>) {
    match val {
        Value::String(s) if s.contains("${") => {
            for part in parse_template(s) {
                if let TemplatePart::Interpolation(e) = part {
                    collect_references(&e, refs);
                }
            }
        }
        Value::List(items) => {
            for item in items {
                collect_references_from_value(item, refs);
            }
        }
        Value::Map(entries) => {
            for (_, v) in entries {
                collect_references_from_value(v, refs);
            }
        }
        _ => {}
    }
}

/// Map a reference path onto the name of the node it points at.
fn reference_target(parts: &[String]) -> Option<String> {
    if parts.len() < 2 {
        return None;
    }
    match parts[0].as_str() {
        "var" | "local" | "each" | "count" | "path" | "terraform" | "self" => None,
        "data" if parts.len() >= 3 => Some(format!("data.{}.{}", parts[1], parts[2])),
        "data" => None,
        "module" => Some(format!("module.{}", parts[1])),
        _ => Some(format!("{}.{}", parts[0], parts[1])),
    }
}

// ─── Evaluation ─────────────────────────────────────────────────────────────

/// Evaluates expressions against variables and the attributes of completed resources.
///
/// Completed resources are published under their state id ("null_resource.web"
/// or "null_resource.web.0") as they finish, so dependents see their values.
#[derive(Debug, Clone, Default)]
pub struct ExpressionEvaluator {
    variables: HashMap<String, serde_json::Value>,
    values: Arc<DashMap<String, serde_json::Value>>,
}

impl ExpressionEvaluator {
    pub fn new(variables: HashMap<String, serde_json::Value>) -> Self {
        Self {
            variables,
            values: Arc::new(DashMap::new()),
        }
    }

    /// Make a resource's attributes visible to later evaluations.
    pub fn publish(&self, state_id: &str, attributes: serde_json::Value) {
        self.values.insert(state_id.to_string(), attributes);
    }

    fn resolve_reference(&self, parts: &[String], scope: Scope<'_>) -> Result<serde_json::Value> {
        let Some(head) = parts.first() else {
            bail!("empty reference");
        };

        match head.as_str() {
            "var" => {
                let Some(name) = parts.get(1) else {
                    bail!("incomplete variable reference");
                };
                match self.variables.get(name) {
                    Some(val) => traverse(val, &parts[2..], &format!("var.{}", name)),
                    None => bail!("unknown variable 'var.{}'", name),
                }
            }
            "count" => match parts.get(1).map(String::as_str) {
                Some("index") => Ok(serde_json::json!(scope.resource.count_index.max(0))),
                _ => bail!("invalid count reference '{}'", parts.join(".")),
            },
            "self" => {
                let Some(state) = scope.self_state else {
                    bail!("'{}' is only valid in provisioner configuration", parts.join("."));
                };
                let attrs = serde_json::to_value(&state.attributes)?;
                traverse(&attrs, &parts[1..], "self")
            }
            "local" | "each" | "path" | "terraform" | "data" | "module" => {
                bail!("unsupported reference '{}'", parts.join("."))
            }
            _ => self.resolve_resource(parts),
        }
    }

    /// TYPE.NAME.ATTR, TYPE.NAME.INDEX.ATTR, or TYPE.NAME.*.ATTR.
    fn resolve_resource(&self, parts: &[String]) -> Result<serde_json::Value> {
        if parts.len() < 3 {
            bail!("reference '{}' does not name an attribute", parts.join("."));
        }
        let base = format!("{}.{}", parts[0], parts[1]);

        if parts[2] == "*" {
            let mut items = Vec::new();
            let mut index = 0;
            while let Some(state) = self.values.get(&format!("{}.{}", base, index)) {
                items.push(traverse(state.value(), &parts[3..], &base)?);
                index += 1;
            }
            if items.is_empty() {
                if let Some(state) = self.values.get(&base) {
                    items.push(traverse(state.value(), &parts[3..], &base)?);
                }
            }
            return Ok(serde_json::Value::Array(items));
        }

        if parts[2].parse::<u64>().is_ok() {
            let key = format!("{}.{}", base, parts[2]);
            if let Some(state) = self.values.get(&key) {
                return traverse(state.value(), &parts[3..], &key);
            }
            bail!("resource '{}' has no recorded values", key);
        }

        match self.values.get(&base) {
            Some(state) => traverse(state.value(), &parts[2..], &base),
            None => bail!("resource '{}' has no recorded values", base),
        }
    }

    fn resolve_value(&self, val: &Value, scope: Scope<'_>) -> Result<serde_json::Value> {
        match val {
            Value::String(s) if s.contains("${") => {
                self.evaluate(&Expression::parse_str(s), scope)
            }
            Value::List(items) => Ok(serde_json::Value::Array(
                items
                    .iter()
                    .map(|v| self.resolve_value(v, scope))
                    .collect::<Result<Vec<_>>>()?,
            )),
            Value::Map(entries) => {
                let mut map = serde_json::Map::new();
                for (k, v) in entries {
                    map.insert(k.clone(), self.resolve_value(v, scope)?);
                }
                Ok(serde_json::Value::Object(map))
            }
            other => Ok(other.to_json()),
        }
    }
}

impl Interpolator for ExpressionEvaluator {
    fn references(&self, expr: &Expression) -> Vec<String> {
        extract_references(expr)
    }

    fn evaluate(&self, expr: &Expression, scope: Scope<'_>) -> Result<serde_json::Value> {
        match expr {
            Expression::Literal(val) => self.resolve_value(val, scope),
            Expression::Reference(parts) => self.resolve_reference(parts, scope),
            Expression::Template(parts) => {
                let mut result = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Literal(s) => result.push_str(s),
                        TemplatePart::Interpolation(expr) => {
                            match self.evaluate(expr, scope)? {
                                serde_json::Value::String(s) => result.push_str(&s),
                                serde_json::Value::Null => {}
                                other => result.push_str(&other.to_string()),
                            }
                        }
                    }
                }
                Ok(serde_json::Value::String(result))
            }
        }
    }
}

/// Traverse a JSON value by attribute path.
/// e.g. ["id"] looks up state["id"], ["triggers", "ami"] looks up state["triggers"]["ami"]
fn traverse(value: &serde_json::Value, path: &[String], origin: &str) -> Result<serde_json::Value> {
    let mut current = value;
    for key in path {
        let next = match current {
            serde_json::Value::Object(map) => map.get(key.as_str()),
            serde_json::Value::Array(arr) => key.parse::<usize>().ok().and_then(|i| arr.get(i)),
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => bail!("'{}' has no attribute '{}'", origin, path.join(".")),
        }
    }
    Ok(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(path: &str) -> Expression {
        Expression::Reference(path.split('.').map(String::from).collect())
    }

    fn web() -> Resource {
        Resource {
            name: "web".into(),
            resource_type: "null_resource".into(),
            count_index: 2,
        }
    }

    #[test]
    fn extracts_resource_data_and_module_references() {
        let expr = Expression::Template(vec![
            TemplatePart::Interpolation(Box::new(reference("null_resource.a.id"))),
            TemplatePart::Literal("-".into()),
            TemplatePart::Interpolation(Box::new(reference("data.null_data.b.out"))),
            TemplatePart::Interpolation(Box::new(reference("module.net.vpc_id"))),
            TemplatePart::Interpolation(Box::new(reference("var.region"))),
            TemplatePart::Interpolation(Box::new(reference("count.index"))),
        ]);
        assert_eq!(
            extract_references(&expr),
            vec!["null_resource.a", "data.null_data.b", "module.net"]
        );
    }

    #[test]
    fn extracts_references_nested_in_literals() {
        let expr = Expression::Literal(Value::Map(vec![(
            "ami".into(),
            Value::List(vec![Value::String("${null_resource.img.id}".into())]),
        )]));
        assert_eq!(extract_references(&expr), vec!["null_resource.img"]);
    }

    #[test]
    fn evaluates_variables_count_and_published_values() {
        let mut vars = HashMap::new();
        vars.insert("env".to_string(), serde_json::json!("prod"));
        let eval = ExpressionEvaluator::new(vars);
        eval.publish("null_resource.base", serde_json::json!({"id": "abc"}));

        let resource = web();
        let scope = Scope::resource(&resource);
        let expr = Expression::parse_str("${var.env}-${count.index}-${null_resource.base.id}");
        assert_eq!(eval.evaluate(&expr, scope).unwrap(), serde_json::json!("prod-2-abc"));
    }

    #[test]
    fn single_reference_keeps_value_type() {
        let eval = ExpressionEvaluator::default();
        eval.publish("null_resource.a.0", serde_json::json!({"tags": {"n": 3}}));
        eval.publish("null_resource.a.1", serde_json::json!({"tags": {"n": 4}}));
        let resource = web();
        let scope = Scope::resource(&resource);

        let indexed = reference("null_resource.a.1.tags.n");
        assert_eq!(eval.evaluate(&indexed, scope).unwrap(), serde_json::json!(4));

        let splat = reference("null_resource.a.*.tags.n");
        assert_eq!(eval.evaluate(&splat, scope).unwrap(), serde_json::json!([3, 4]));
    }

    #[test]
    fn self_requires_bound_state() {
        let eval = ExpressionEvaluator::default();
        let resource = web();
        assert!(eval
            .evaluate(&reference("self.id"), Scope::resource(&resource))
            .is_err());

        let state = InstanceState::new("i-123");
        let value = eval
            .evaluate(&reference("self.id"), Scope::with_self(&resource, &state))
            .unwrap();
        assert_eq!(value, serde_json::json!("i-123"));
    }

    #[test]
    fn unknown_values_are_errors() {
        let eval = ExpressionEvaluator::default();
        let resource = web();
        let scope = Scope::resource(&resource);
        assert!(eval.evaluate(&reference("var.missing"), scope).is_err());
        assert!(eval.evaluate(&reference("null_resource.gone.id"), scope).is_err());
    }

    #[test]
    fn interpolate_names_failing_attribute() {
        let eval = ExpressionEvaluator::default();
        let resource = web();
        let mut raw = RawConfig::new();
        raw.insert("ami".into(), reference("var.nope"));
        let err = eval.interpolate(&raw, Scope::resource(&resource)).unwrap_err();
        assert!(format!("{:#}", err).contains("attribute 'ami'"));
    }
}
