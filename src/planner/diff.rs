use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The planned change to a single attribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttrDiff {
    #[serde(default)]
    pub old: serde_json::Value,
    #[serde(default)]
    pub new: serde_json::Value,
    /// The new value is only known after apply.
    #[serde(default)]
    pub new_computed: bool,
    #[serde(default)]
    pub new_removed: bool,
    /// Changing this attribute cannot be done in place.
    #[serde(default)]
    pub requires_new: bool,
}

impl AttrDiff {
    pub fn change(old: serde_json::Value, new: serde_json::Value) -> Self {
        Self {
            old,
            new,
            ..Default::default()
        }
    }

    pub fn computed() -> Self {
        Self {
            new_computed: true,
            ..Default::default()
        }
    }

    pub fn forces_new(mut self) -> Self {
        self.requires_new = true;
        self
    }
}

/// A planned set of attribute changes for one resource instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceDiff {
    #[serde(default)]
    pub attributes: BTreeMap<String, AttrDiff>,
    #[serde(default)]
    pub destroy: bool,
}

impl InstanceDiff {
    pub fn new() -> Self {
        Self::default()
    }

    /// A diff that only destroys the instance.
    pub fn destroy_only() -> Self {
        Self {
            attributes: BTreeMap::new(),
            destroy: true,
        }
    }

    pub fn with_attribute(mut self, key: &str, attr: AttrDiff) -> Self {
        self.attributes.insert(key.to_string(), attr);
        self
    }

    /// True when any attribute change forces a new instance.
    pub fn requires_new(&self) -> bool {
        self.attributes.values().any(|a| a.requires_new)
    }

    /// Nothing to do: no attribute changes and no destroy.
    pub fn is_empty(&self) -> bool {
        !self.destroy && self.attributes.is_empty()
    }

    /// Drop attributes whose changes should not be acted on.
    pub fn ignore(&mut self, keys: &[String]) {
        for key in keys {
            let prefix = format!("{}.", key);
            self.attributes
                .retain(|k, _| k != key && !k.starts_with(&prefix));
        }
    }

    /// Describe how `live` departs from this (saved) diff, or `None` when they agree.
    ///
    /// A computed attribute in the saved diff matches any live value, or its absence.
    pub fn divergence(&self, live: &InstanceDiff) -> Option<String> {
        if self.destroy != live.destroy {
            return Some(format!(
                "diff: Destroy; old: {}, new: {}",
                self.destroy, live.destroy
            ));
        }

        for (key, old) in &self.attributes {
            let Some(new) = live.attributes.get(key) else {
                if old.new_removed || old.new_computed {
                    continue;
                }
                return Some(format!("attribute mismatch: {}", key));
            };

            if old.requires_new != new.requires_new {
                return Some(format!(
                    "diff RequiresNew; old: {}, new: {}",
                    old.requires_new, new.requires_new
                ));
            }
            if old.new_removed != new.new_removed {
                return Some(format!(
                    "diff NewRemoved; old: {}, new: {}",
                    old.new_removed, new.new_removed
                ));
            }
            if !old.new_computed && old.new != new.new {
                return Some(format!(
                    "value mismatch: {}; old: {}, new: {}",
                    key, old.new, new.new
                ));
            }
        }

        let extra: Vec<&str> = live
            .attributes
            .keys()
            .filter(|k| !self.attributes.contains_key(*k))
            .map(String::as_str)
            .collect();
        if !extra.is_empty() {
            return Some(format!("extra attributes: {}", extra.join(", ")));
        }

        None
    }
}
