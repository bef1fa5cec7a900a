//! The ordered apply sequence for one resource instance.
//!
//! Re-validates and re-diffs the resource against the live world, checks the
//! result against the saved plan, applies it, persists state before anything
//! else can fail, runs provisioners on new instances and rolls
//! create-before-destroy back when the replacement did not come up.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::error::{ApplyError, ApplyOutcome};
use super::hook::Hook;
use crate::config::address::ResourceAddress;
use crate::config::types::{ResolvedConfig, ResourceConfig};
use crate::interpolate::{Interpolator, Resource, Scope};
use crate::planner::diff::InstanceDiff;
use crate::provider::{InstanceInfo, ProviderRegistry, ProvisionerRegistry, ResourceProvider};
use crate::state::models::{InstanceState, ResourceState};
use crate::state::{DiffStore, StateStore};

/// Collaborators shared by every pipeline in a run.
#[derive(Clone)]
pub struct ApplyContext {
    pub state: Arc<dyn StateStore>,
    pub diffs: Arc<dyn DiffStore>,
    pub providers: Arc<ProviderRegistry>,
    pub provisioners: Arc<ProvisionerRegistry>,
    pub hooks: Arc<dyn Hook>,
}

/// Pipeline steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    InstanceInfo,
    ReadDiff,
    EarlyExit,
    Depose,
    Interpolate,
    GetProvider,
    ReadState,
    Validate,
    Diff,
    CompareDiff,
    Refresh,
    Apply,
    WriteState,
    Provision,
    Finalize,
    ClearDiff,
    PostApply,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::InstanceInfo => "instance-info",
            Step::ReadDiff => "read-diff",
            Step::EarlyExit => "early-exit",
            Step::Depose => "depose",
            Step::Interpolate => "interpolate",
            Step::GetProvider => "get-provider",
            Step::ReadState => "read-state",
            Step::Validate => "validate",
            Step::Diff => "diff",
            Step::CompareDiff => "compare-diff",
            Step::Refresh => "refresh",
            Step::Apply => "apply",
            Step::WriteState => "write-state",
            Step::Provision => "provision",
            Step::Finalize => "finalize",
            Step::ClearDiff => "clear-diff",
            Step::PostApply => "post-apply",
        };
        f.write_str(name)
    }
}

/// A single resource instance's apply, built from an enriched graph node.
pub struct ApplyPipeline {
    address: ResourceAddress,
    config: Arc<ResourceConfig>,
    provider: String,
    dependencies: Vec<String>,
    interpolator: Arc<dyn Interpolator>,
}

impl ApplyPipeline {
    pub fn new(
        address: ResourceAddress,
        config: Arc<ResourceConfig>,
        provider: String,
        dependencies: Vec<String>,
        interpolator: Arc<dyn Interpolator>,
    ) -> Self {
        Self {
            address,
            config,
            provider,
            dependencies,
            interpolator,
        }
    }

    pub fn address(&self) -> &ResourceAddress {
        &self.address
    }

    /// Run every step in order. Returns the captured apply/provision error, if
    /// any, only after state has been persisted and the saved diff cleared.
    pub async fn run(&self, ctx: &ApplyContext) -> Result<ApplyOutcome, ApplyError> {
        let info = InstanceInfo {
            id: self.address.state_id(),
            module_path: self.address.path().to_vec(),
            resource_type: self.config.resource_type.clone(),
        };
        let id = info.id.as_str();
        trace(id, Step::InstanceInfo);

        trace(id, Step::ReadDiff);
        let saved = ctx.diffs.read_diff(id).await.map_err(ApplyError::store(id))?;

        trace(id, Step::EarlyExit);
        let mut diff = match saved {
            None => {
                debug!(id = %id, "No diff recorded, nothing to apply");
                return Ok(ApplyOutcome::NoOp);
            }
            Some(d) if d.destroy && d.attributes.is_empty() => {
                debug!(id = %id, "Destroy-only diff is handled elsewhere");
                return Ok(ApplyOutcome::NoOp);
            }
            Some(mut d) => {
                d.destroy = false;
                d
            }
        };

        let create_before_destroy = self.config.lifecycle.create_before_destroy
            && (diff.destroy || diff.requires_new());
        if create_before_destroy {
            trace(id, Step::Depose);
            let deposed = ctx.state.depose(id).await.map_err(ApplyError::store(id))?;
            debug!(id = %id, deposed = deposed, "Create before destroy");
        }

        trace(id, Step::Interpolate);
        let resource = Resource {
            name: self.config.name.clone(),
            resource_type: self.config.resource_type.clone(),
            count_index: self.address.index(),
        };
        let resolved = self
            .interpolator
            .interpolate(&self.config.attributes, Scope::resource(&resource))
            .map_err(|source| ApplyError::Interpolation {
                id: id.to_string(),
                source,
            })?;

        trace(id, Step::GetProvider);
        let provider = self.provider(ctx, id).await?;

        trace(id, Step::ReadState);
        let state = ctx.state.read_state(id).await.map_err(ApplyError::store(id))?;

        trace(id, Step::Validate);
        let validation = provider
            .validate_resource(&info.resource_type, &resolved)
            .await;
        for warning in &validation.warnings {
            debug!(id = %id, warning = %warning, "Ignoring validation warning");
        }
        if !validation.errors.is_empty() {
            return Err(ApplyError::Validation {
                id: id.to_string(),
                errors: validation.errors,
            });
        }

        trace(id, Step::Diff);
        diff = self
            .live_diff(provider.as_ref(), &info, state.as_ref(), &resolved)
            .await?;

        trace(id, Step::CompareDiff);
        let saved = ctx.diffs.read_diff(id).await.map_err(ApplyError::store(id))?;
        if let Some(reason) = self.compare(saved, &diff) {
            return Err(ApplyError::PlanConsistency {
                id: id.to_string(),
                reason,
            });
        }

        trace(id, Step::Refresh);
        let provider = self.provider(ctx, id).await?;
        let state = ctx.state.read_state(id).await.map_err(ApplyError::store(id))?;

        trace(id, Step::Apply);
        let mut errors = Vec::new();
        let (mut new_state, create_new) = if diff.is_empty() {
            debug!(id = %id, "Live diff is empty, skipping apply");
            (state.clone(), false)
        } else {
            ctx.hooks.pre_apply(&info, state.as_ref(), &diff);
            let result = provider.apply(&info, state.as_ref(), &diff).await;
            if let Some(source) = result.error {
                errors.push(ApplyError::Apply {
                    id: id.to_string(),
                    source,
                });
            }
            let mut applied = result.state.filter(|s| !s.is_empty());
            if let Some(s) = applied.as_mut() {
                s.attributes
                    .insert("id".to_string(), serde_json::Value::String(s.id.clone()));
            }
            let had_instance = state.as_ref().map(|s| !s.is_empty()).unwrap_or(false);
            let create_new = result.create_new
                || (!had_instance && !diff.destroy)
                || diff.requires_new();
            (applied, create_new)
        };

        trace(id, Step::WriteState);
        if let Err(e) = self.write_state(ctx, id, new_state.as_ref()).await {
            return Err(with_captured(errors, e));
        }

        if create_new {
            trace(id, Step::Provision);
            self.provision(ctx, &info, &resource, &mut new_state, &mut errors)
                .await;
        }

        trace(id, Step::Finalize);
        let finalized = if create_before_destroy && !errors.is_empty() {
            warn!(id = %id, "Replacement failed, restoring the deposed instance");
            match ctx.state.undepose(id, new_state.as_ref()).await {
                Ok(true) => Ok(()),
                // Nothing was deposed, so the replacement stays primary.
                Ok(false) => self.write_state(ctx, id, new_state.as_ref()).await,
                Err(e) => Err(ApplyError::store(id)(e)),
            }
        } else {
            self.write_state(ctx, id, new_state.as_ref()).await
        };
        if let Err(e) = finalized {
            return Err(with_captured(errors, e));
        }

        trace(id, Step::ClearDiff);
        if let Err(e) = ctx
            .diffs
            .write_diff(id, None)
            .await
            .map_err(ApplyError::store(id))
        {
            return Err(with_captured(errors, e));
        }

        trace(id, Step::PostApply);
        let error = ApplyError::combine(errors);
        ctx.hooks.post_apply(&info, new_state.as_ref(), error.as_ref());
        ctx.hooks.post_state_update(&info, new_state.as_ref());

        match error {
            Some(e) => Err(e),
            None => Ok(ApplyOutcome::Applied {
                state: new_state,
                create_new,
            }),
        }
    }

    async fn provider(
        &self,
        ctx: &ApplyContext,
        id: &str,
    ) -> Result<Arc<dyn ResourceProvider>, ApplyError> {
        ctx.providers
            .get(&self.provider)
            .await
            .ok_or_else(|| ApplyError::ProviderNotFound {
                id: id.to_string(),
                provider: self.provider.clone(),
            })
    }

    /// The diff the provider would make right now.
    async fn live_diff(
        &self,
        provider: &dyn ResourceProvider,
        info: &InstanceInfo,
        state: Option<&InstanceState>,
        resolved: &ResolvedConfig,
    ) -> Result<InstanceDiff, ApplyError> {
        let mut diff = provider
            .diff(info, state, resolved)
            .await
            .map_err(|source| ApplyError::Diff {
                id: info.id.clone(),
                source,
            })?
            .unwrap_or_default();

        let has_instance = state.map(|s| !s.is_empty()).unwrap_or(false);
        if diff.requires_new() && has_instance {
            diff.destroy = true;
        }
        if !diff.requires_new() {
            diff.ignore(&self.config.lifecycle.ignore_changes);
        }
        Ok(diff)
    }

    /// Describe how the live diff departs from the saved plan.
    fn compare(&self, saved: Option<InstanceDiff>, live: &InstanceDiff) -> Option<String> {
        let mut saved = saved.unwrap_or_default();
        let mut live = live.clone();
        if !saved.requires_new() {
            saved.ignore(&self.config.lifecycle.ignore_changes);
        }
        for diff in [&mut saved, &mut live] {
            diff.destroy = false;
            diff.attributes.remove("id");
        }
        saved.divergence(&live)
    }

    async fn write_state(
        &self,
        ctx: &ApplyContext,
        id: &str,
        state: Option<&InstanceState>,
    ) -> Result<(), ApplyError> {
        let mut meta = ResourceState::new(&self.config.resource_type, &self.provider);
        meta.dependencies = self.dependencies.clone();
        ctx.state
            .write_state(id, &meta, state)
            .await
            .map_err(ApplyError::store(id))
    }

    /// Run each declared provisioner in order against a newly created instance.
    /// Failures taint the instance and are captured into `errors`.
    async fn provision(
        &self,
        ctx: &ApplyContext,
        info: &InstanceInfo,
        resource: &Resource,
        new_state: &mut Option<InstanceState>,
        errors: &mut Vec<ApplyError>,
    ) {
        let Some(state) = new_state.as_mut() else {
            return;
        };
        if !errors.is_empty() {
            debug!(id = %info.id, "Apply failed, tainting instead of provisioning");
            state.tainted = true;
            return;
        }

        for declared in &self.config.provisioners {
            let kind = declared.provisioner_type.as_str();
            debug!(id = %info.id, provisioner = kind, "Provisioning");

            let Some(provisioner) = ctx.provisioners.get(kind).await else {
                errors.push(ApplyError::ProvisionerNotFound {
                    id: info.id.clone(),
                    provisioner: kind.to_string(),
                });
                state.tainted = true;
                return;
            };

            let scope = Scope::with_self(resource, state);
            let resolved = self
                .interpolator
                .interpolate(&declared.config, scope)
                .and_then(|config| {
                    let connection = self.interpolator.interpolate(&declared.connection, scope)?;
                    Ok((config, connection))
                });
            let (config, connection) = match resolved {
                Ok(pair) => pair,
                Err(source) => {
                    errors.push(ApplyError::Interpolation {
                        id: info.id.clone(),
                        source,
                    });
                    state.tainted = true;
                    return;
                }
            };

            if let Err(source) = provisioner
                .provision(info, state, &config, &connection)
                .await
            {
                errors.push(ApplyError::Provision {
                    id: info.id.clone(),
                    provisioner: kind.to_string(),
                    source,
                });
                state.tainted = true;
                return;
            }
        }
    }
}

fn trace(id: &str, step: Step) {
    debug!(id = %id, step = %step, "Apply step");
}

/// A store failure during housekeeping still reports what was captured before it.
fn with_captured(mut errors: Vec<ApplyError>, err: ApplyError) -> ApplyError {
    if errors.is_empty() {
        return err;
    }
    errors.push(err);
    ApplyError::Multiple(errors)
}
