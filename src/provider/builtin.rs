//! The `null` provider: resources that exist only in state.
//!
//! `null_resource` accepts a single `triggers` map. Any change to it replaces
//! the instance, which makes it the usual anchor for provisioners.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::{
    local_exec::LocalExec, ApplyResult, InstanceInfo, ProviderRegistry, ProvisionerRegistry,
    ResourceProvider, Validation,
};
use crate::config::types::ResolvedConfig;
use crate::planner::diff::{AttrDiff, InstanceDiff};
use crate::state::models::InstanceState;

pub const NULL_PROVIDER: &str = "null";
const NULL_RESOURCE: &str = "null_resource";
const TRIGGERS: &str = "triggers";

#[derive(Debug, Default)]
pub struct NullProvider;

impl NullProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResourceProvider for NullProvider {
    async fn validate_resource(&self, resource_type: &str, config: &ResolvedConfig) -> Validation {
        if resource_type != NULL_RESOURCE {
            return Validation::error(format!(
                "provider 'null' does not support resource type '{}'",
                resource_type
            ));
        }

        let mut validation = Validation::ok();
        for (key, value) in config {
            if key != TRIGGERS {
                validation
                    .errors
                    .push(format!("{}: unsupported attribute '{}'", resource_type, key));
            } else if !value.is_object() && !value.is_null() {
                validation
                    .errors
                    .push(format!("{}: 'triggers' must be a map", resource_type));
            }
        }
        validation
    }

    async fn diff(
        &self,
        _info: &InstanceInfo,
        state: Option<&InstanceState>,
        config: &ResolvedConfig,
    ) -> Result<Option<InstanceDiff>> {
        let desired = config
            .get(TRIGGERS)
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        let Some(state) = state.filter(|s| !s.is_empty()) else {
            let mut diff = InstanceDiff::new().with_attribute("id", AttrDiff::computed());
            if !desired.is_null() {
                diff = diff.with_attribute(
                    TRIGGERS,
                    AttrDiff::change(serde_json::Value::Null, desired).forces_new(),
                );
            }
            return Ok(Some(diff));
        };

        let current = state
            .attributes
            .get(TRIGGERS)
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        if current == desired {
            return Ok(None);
        }

        Ok(Some(
            InstanceDiff::new()
                .with_attribute(TRIGGERS, AttrDiff::change(current, desired).forces_new())
                .with_attribute("id", AttrDiff::computed()),
        ))
    }

    async fn apply(
        &self,
        info: &InstanceInfo,
        state: Option<&InstanceState>,
        diff: &InstanceDiff,
    ) -> ApplyResult {
        if diff.destroy && diff.attributes.is_empty() {
            debug!(id = %info.id, "Destroying null resource");
            return ApplyResult::default();
        }

        let existing = state.filter(|s| !s.is_empty());
        let replace = existing.is_none() || diff.destroy || diff.requires_new();

        let mut next = match existing {
            Some(current) if !replace => current.clone(),
            _ => InstanceState::new(&uuid::Uuid::new_v4().to_string()),
        };
        if let Some(triggers) = diff.attributes.get(TRIGGERS) {
            if triggers.new.is_null() {
                next.attributes.remove(TRIGGERS);
            } else {
                next.attributes.insert(TRIGGERS.to_string(), triggers.new.clone());
            }
        }

        debug!(id = %info.id, instance = %next.id, create_new = replace, "Applied null resource");
        ApplyResult {
            state: Some(next),
            create_new: replace,
            error: None,
        }
    }
}

/// Register the built-in provider and provisioner.
pub async fn register_builtins(providers: &ProviderRegistry, provisioners: &ProvisionerRegistry) {
    providers
        .register(NULL_PROVIDER, Arc::new(NullProvider::new()))
        .await;
    provisioners
        .register(super::local_exec::LOCAL_EXEC, Arc::new(LocalExec::new()))
        .await;
}
