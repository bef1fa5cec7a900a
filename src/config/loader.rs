use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;

use super::types::{
    Expression, LifecycleConfig, ProvisionerConfig, RawConfig, ResourceConfig, Settings,
    TemplatePart, Value, WorkspaceConfig,
};

// ─── YAML Schema ────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlWorkspace {
    #[serde(default)]
    settings: Option<Settings>,
    #[serde(default)]
    variables: HashMap<String, serde_yaml::Value>,
    #[serde(default)]
    resources: Vec<YamlResource>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlResource {
    #[serde(rename = "type")]
    resource_type: String,
    name: String,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    count: Option<serde_yaml::Value>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    lifecycle: YamlLifecycle,
    #[serde(default)]
    attributes: HashMap<String, serde_yaml::Value>,
    #[serde(default)]
    provisioners: Vec<YamlProvisioner>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlLifecycle {
    #[serde(default)]
    create_before_destroy: bool,
    #[serde(default)]
    ignore_changes: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlProvisioner {
    #[serde(rename = "type")]
    provisioner_type: String,
    #[serde(default)]
    config: HashMap<String, serde_yaml::Value>,
    #[serde(default)]
    connection: HashMap<String, serde_yaml::Value>,
}

// ─── Loading ────────────────────────────────────────────────────────────────

/// Load a workspace from a `.yaml`/`.yml` file, or from every such file in a directory.
///
/// Settings come from the first file that defines them; variables and
/// resources are merged across files.
pub fn load_workspace(path: &Path) -> Result<WorkspaceConfig> {
    if path.is_file() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        return parse_workspace(&content)
            .with_context(|| format!("Invalid configuration in {}", path.display()));
    }

    if path.is_dir() {
        let files = find_yaml_files(path)?;
        if files.is_empty() {
            bail!("No .yaml files found in directory: {}", path.display());
        }
        tracing::info!(
            files = ?files.iter().map(|f| f.display().to_string()).collect::<Vec<_>>(),
            "Discovered config files"
        );

        let mut merged = YamlWorkspace::default();
        for file in &files {
            let content = fs::read_to_string(file)
                .with_context(|| format!("Failed to read config file: {}", file.display()))?;
            let doc: YamlWorkspace = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML in: {}", file.display()))?;
            if merged.settings.is_none() {
                merged.settings = doc.settings;
            }
            for (k, v) in doc.variables {
                merged.variables.entry(k).or_insert(v);
            }
            merged.resources.extend(doc.resources);
        }
        return convert(merged);
    }

    bail!(
        "Config not found: '{}'. Pass a .yaml file or a directory containing one",
        path.display()
    )
}

/// Parse and validate YAML content into a workspace.
pub fn parse_workspace(content: &str) -> Result<WorkspaceConfig> {
    let doc: YamlWorkspace =
        serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;
    convert(doc)
}

fn find_yaml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| {
            p.is_file()
                && matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
        })
        .collect();
    files.sort();
    Ok(files)
}

fn convert(doc: YamlWorkspace) -> Result<WorkspaceConfig> {
    let variables = doc
        .variables
        .iter()
        .map(|(k, v)| Ok::<_, anyhow::Error>((k.clone(), serde_json::to_value(v)?)))
        .collect::<Result<HashMap<_, _>>>()?;

    let resources = doc
        .resources
        .into_iter()
        .map(|r| -> Result<ResourceConfig> {
            let id = format!("{}.{}", r.resource_type, r.name);
            let provisioners = r
                .provisioners
                .into_iter()
                .map(|p| -> Result<ProvisionerConfig> {
                    Ok(ProvisionerConfig {
                        provisioner_type: p.provisioner_type,
                        config: raw_config(&p.config)?,
                        connection: raw_config(&p.connection)?,
                    })
                })
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("Invalid provisioner in {}", id))?;
            Ok(ResourceConfig {
                resource_type: r.resource_type,
                name: r.name,
                provider: r.provider,
                count: r.count.as_ref().map(yaml_value_to_expression).transpose()?,
                depends_on: r.depends_on,
                lifecycle: LifecycleConfig {
                    create_before_destroy: r.lifecycle.create_before_destroy,
                    ignore_changes: r.lifecycle.ignore_changes,
                },
                attributes: raw_config(&r.attributes)
                    .with_context(|| format!("Invalid attributes in {}", id))?,
                provisioners,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let workspace = WorkspaceConfig {
        settings: doc.settings.unwrap_or_default(),
        variables,
        resources,
    };
    validate(&workspace)?;
    Ok(workspace)
}

fn raw_config(map: &HashMap<String, serde_yaml::Value>) -> Result<RawConfig> {
    map.iter()
        .map(|(k, v)| Ok::<_, anyhow::Error>((k.clone(), yaml_value_to_expression(v)?)))
        .collect()
}

/// Convert a serde_yaml::Value into an Expression.
fn yaml_value_to_expression(value: &serde_yaml::Value) -> Result<Expression> {
    Ok(match value {
        serde_yaml::Value::String(s) => Expression::parse_str(s),
        other => Expression::Literal(yaml_value_to_value(other)?),
    })
}

fn yaml_value_to_value(value: &serde_yaml::Value) -> Result<Value> {
    Ok(match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(*b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(f) = n.as_f64() {
                Value::Float(f)
            } else {
                Value::Null
            }
        }
        serde_yaml::Value::String(s) => Value::String(s.clone()),
        serde_yaml::Value::Sequence(seq) => Value::List(
            seq.iter()
                .map(yaml_value_to_value)
                .collect::<Result<Vec<_>>>()?,
        ),
        serde_yaml::Value::Mapping(map) => Value::Map(
            map.iter()
                .map(|(k, v)| -> Result<(String, Value)> {
                    let Some(key) = k.as_str() else {
                        bail!("map keys must be strings, got {:?}", k);
                    };
                    Ok((key.to_string(), yaml_value_to_value(v)?))
                })
                .collect::<Result<Vec<_>>>()?,
        ),
        serde_yaml::Value::Tagged(tagged) => yaml_value_to_value(&tagged.value)?,
    })
}

// ─── Validation ─────────────────────────────────────────────────────────────

fn validate(workspace: &WorkspaceConfig) -> Result<()> {
    // Dots would make "x.0" collide with index 0 of a counted "x" in the store.
    let identifier = Regex::new(r"^[A-Za-z0-9_-]+$")?;
    let mut ids = HashSet::new();
    for resource in &workspace.resources {
        for (field, value) in [("type", &resource.resource_type), ("name", &resource.name)] {
            if !identifier.is_match(value) {
                bail!(
                    "Resource {} '{}' must be non-empty and use only letters, digits, '_' or '-'",
                    field,
                    value
                );
            }
        }
        if !ids.insert(resource.id()) {
            bail!(
                "Duplicate resource '{}'. Resource ids must be unique.",
                resource.id()
            );
        }
    }

    for resource in &workspace.resources {
        for dep in &resource.depends_on {
            if !ids.contains(dep) {
                bail!(
                    "Resource '{}' depends on '{}', which does not exist",
                    resource.id(),
                    dep
                );
            }
        }
    }

    validate_variable_references(workspace)
}

/// Every `${var.NAME}` must name a declared variable.
fn validate_variable_references(workspace: &WorkspaceConfig) -> Result<()> {
    let var_ref = Regex::new(r"\$\{\s*var\.([^.}\s]+)")?;
    for resource in &workspace.resources {
        let exprs = resource
            .attributes
            .iter()
            .chain(resource.provisioners.iter().flat_map(|p| p.config.iter().chain(&p.connection)))
            .map(|(k, e)| (k.as_str(), e))
            .chain(resource.count.iter().map(|e| ("count", e)));

        for (key, expr) in exprs {
            let text = expression_text(expr);
            for cap in var_ref.captures_iter(&text) {
                let name = &cap[1];
                if !workspace.variables.contains_key(name) {
                    bail!(
                        "Resource '{}' attribute '{}' references undefined variable 'var.{}'",
                        resource.id(),
                        key,
                        name
                    );
                }
            }
        }
    }
    Ok(())
}

/// Render an expression back to `${...}` text so references can be scanned uniformly.
fn expression_text(expr: &Expression) -> String {
    match expr {
        Expression::Literal(v) => v.to_string(),
        Expression::Reference(parts) => format!("${{{}}}", parts.join(".")),
        Expression::Template(parts) => parts
            .iter()
            .map(|p| match p {
                TemplatePart::Literal(s) => s.clone(),
                TemplatePart::Interpolation(e) => expression_text(e),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORKSPACE: &str = r#"
settings:
  parallelism: 4
variables:
  env: prod
resources:
  - type: null_resource
    name: base
    attributes:
      triggers:
        env: "${var.env}"
  - type: null_resource
    name: web
    count: 2
    depends_on: [null_resource.base]
    lifecycle:
      create_before_destroy: true
      ignore_changes: [tags]
    attributes:
      name: "web-${count.index}"
      base: "${null_resource.base.id}"
    provisioners:
      - type: local-exec
        config:
          command: "echo ${self.id}"
"#;

    #[test]
    fn parses_resources_and_settings() {
        let ws = parse_workspace(WORKSPACE).unwrap();
        assert_eq!(ws.settings.parallelism, 4);
        assert_eq!(ws.settings.state_path, ".converge/state.db");
        assert_eq!(ws.variables["env"], serde_json::json!("prod"));
        assert_eq!(ws.resources.len(), 2);

        let web = &ws.resources[1];
        assert_eq!(web.id(), "null_resource.web");
        assert_eq!(web.count, Some(Expression::Literal(Value::Int(2))));
        assert!(web.lifecycle.create_before_destroy);
        assert_eq!(web.lifecycle.ignore_changes, vec!["tags"]);
        assert_eq!(
            web.attributes["base"],
            Expression::Reference(vec!["null_resource".into(), "base".into(), "id".into()])
        );
        assert_eq!(web.provisioners[0].provisioner_type, "local-exec");
        assert!(matches!(
            web.provisioners[0].config["command"],
            Expression::Template(_)
        ));
    }

    #[test]
    fn rejects_duplicate_resources() {
        let yaml = r#"
resources:
  - { type: null_resource, name: a }
  - { type: null_resource, name: a }
"#;
        let err = parse_workspace(yaml).unwrap_err();
        assert!(err.to_string().contains("Duplicate resource"));
    }

    #[test]
    fn rejects_names_that_collide_with_counted_instances() {
        let yaml = r#"
resources:
  - { type: null_resource, name: x, count: 1 }
  - { type: null_resource, name: "x.0" }
"#;
        let err = parse_workspace(yaml).unwrap_err();
        assert!(err.to_string().contains("'x.0'"));

        let yaml = r#"
resources:
  - { type: "null.resource", name: a }
"#;
        assert!(parse_workspace(yaml).is_err());
    }

    #[test]
    fn rejects_non_string_map_keys() {
        let yaml = r#"
resources:
  - type: null_resource
    name: a
    attributes:
      triggers:
        1: one
"#;
        let err = parse_workspace(yaml).unwrap_err();
        assert!(format!("{:#}", err).contains("map keys must be strings"));
    }

    #[test]
    fn rejects_unknown_depends_on() {
        let yaml = r#"
resources:
  - { type: null_resource, name: a, depends_on: [null_resource.ghost] }
"#;
        assert!(parse_workspace(yaml).is_err());
    }

    #[test]
    fn rejects_undefined_variable() {
        let yaml = r#"
resources:
  - type: null_resource
    name: a
    attributes:
      triggers: { x: "${var.missing}" }
"#;
        let err = parse_workspace(yaml).unwrap_err();
        assert!(err.to_string().contains("var.missing"));
    }

    #[test]
    fn loads_directory_of_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.yaml"),
            "resources:\n  - { type: null_resource, name: a }\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("b.yml"),
            "resources:\n  - { type: null_resource, name: b, depends_on: [null_resource.a] }\n",
        )
        .unwrap();
        let ws = load_workspace(dir.path()).unwrap();
        assert_eq!(ws.resources.len(), 2);
    }
}
