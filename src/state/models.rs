use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ─── Instance-Level State ───────────────────────────────────────────────────

/// The recorded attributes of one real-world object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceState {
    pub id: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// Set when creation or provisioning failed part way; the object exists but
    /// must be replaced.
    #[serde(default)]
    pub tainted: bool,
}

impl InstanceState {
    pub fn new(id: &str) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert("id".to_string(), serde_json::Value::String(id.to_string()));
        Self {
            id: id.to_string(),
            attributes,
            tainted: false,
        }
    }

    pub fn with_attribute(mut self, key: &str, value: serde_json::Value) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    /// An instance without an id does not correspond to anything real.
    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }

    /// Attributes as a JSON object, for publishing to dependents.
    pub fn attributes_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

// ─── Resource-Level State ───────────────────────────────────────────────────

/// Everything recorded for one state id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub resource_type: String,
    /// Provider identity that manages this resource.
    #[serde(default)]
    pub provider: String,
    /// Names this resource depended on when last written.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub primary: Option<InstanceState>,
    /// Instances set aside by create-before-destroy, oldest first.
    #[serde(default)]
    pub deposed: Vec<InstanceState>,
}

impl ResourceState {
    pub fn new(resource_type: &str, provider: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            provider: provider.to_string(),
            ..Default::default()
        }
    }

    /// No primary and nothing deposed: the record can be dropped.
    pub fn is_vacant(&self) -> bool {
        self.primary.is_none() && self.deposed.is_empty()
    }
}
