use std::sync::Arc;
use std::time::Instant;

use colored::Colorize;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::error::{error_chain, ApplyError};
use crate::planner::diff::InstanceDiff;
use crate::provider::InstanceInfo;
use crate::state::models::InstanceState;

/// Observer notified as a pipeline makes progress.
///
/// Calls are fire-and-forget and may arrive concurrently from different nodes.
pub trait Hook: Send + Sync {
    fn pre_apply(
        &self,
        _info: &InstanceInfo,
        _state: Option<&InstanceState>,
        _diff: &InstanceDiff,
    ) {
    }

    fn post_apply(
        &self,
        _info: &InstanceInfo,
        _state: Option<&InstanceState>,
        _error: Option<&ApplyError>,
    ) {
    }

    fn post_state_update(&self, _info: &InstanceInfo, _state: Option<&InstanceState>) {}
}

/// Fans every event out to a list of hooks.
#[derive(Default, Clone)]
pub struct Hooks {
    hooks: Vec<Arc<dyn Hook>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hooks.push(hook);
        self
    }
}

impl Hook for Hooks {
    fn pre_apply(&self, info: &InstanceInfo, state: Option<&InstanceState>, diff: &InstanceDiff) {
        for hook in &self.hooks {
            hook.pre_apply(info, state, diff);
        }
    }

    fn post_apply(
        &self,
        info: &InstanceInfo,
        state: Option<&InstanceState>,
        error: Option<&ApplyError>,
    ) {
        for hook in &self.hooks {
            hook.post_apply(info, state, error);
        }
    }

    fn post_state_update(&self, info: &InstanceInfo, state: Option<&InstanceState>) {
        for hook in &self.hooks {
            hook.post_state_update(info, state);
        }
    }
}

/// Structured log lines for each event.
#[derive(Debug, Default)]
pub struct LogHook;

impl Hook for LogHook {
    fn pre_apply(&self, info: &InstanceInfo, state: Option<&InstanceState>, diff: &InstanceDiff) {
        debug!(
            id = %info.id,
            attributes = diff.attributes.len(),
            requires_new = diff.requires_new(),
            has_state = state.is_some(),
            "Applying"
        );
    }

    fn post_apply(
        &self,
        info: &InstanceInfo,
        state: Option<&InstanceState>,
        error: Option<&ApplyError>,
    ) {
        match error {
            Some(err) => warn!(id = %info.id, error = %error_chain(err), "Apply failed"),
            None => info!(
                id = %info.id,
                instance = state.map(|s| s.id.as_str()).unwrap_or(""),
                "Apply complete"
            ),
        }
    }

    fn post_state_update(&self, info: &InstanceInfo, state: Option<&InstanceState>) {
        debug!(
            id = %info.id,
            tainted = state.map(|s| s.tainted).unwrap_or(false),
            "State updated"
        );
    }
}

/// Terminal progress lines, with elapsed time per instance.
#[derive(Debug, Default)]
pub struct UiHook {
    started: DashMap<String, (Instant, &'static str)>,
}

impl UiHook {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Hook for UiHook {
    fn pre_apply(&self, info: &InstanceInfo, state: Option<&InstanceState>, diff: &InstanceDiff) {
        let exists = state.map(|s| !s.is_empty()).unwrap_or(false);
        let (progress, past) = if diff.destroy && diff.attributes.is_empty() {
            ("Destroying", "Destruction")
        } else if !exists || diff.requires_new() {
            ("Creating", "Creation")
        } else {
            ("Modifying", "Modifications")
        };
        self.started.insert(info.id.clone(), (Instant::now(), past));
        println!("{}: {}...", info.id, progress.cyan());
    }

    fn post_apply(
        &self,
        info: &InstanceInfo,
        state: Option<&InstanceState>,
        error: Option<&ApplyError>,
    ) {
        // No pre_apply means there was nothing to change.
        let Some((_, (start, past))) = self.started.remove(&info.id) else {
            return;
        };
        let elapsed = format_duration(start.elapsed().as_secs());

        match error {
            None => {
                let id_suffix = state
                    .filter(|s| !s.is_empty())
                    .map(|s| format!(" [id={}]", s.id))
                    .unwrap_or_default();
                println!(
                    "{}: {} after {}{}",
                    info.id,
                    format!("{} complete", past).green().bold(),
                    elapsed.bold(),
                    id_suffix,
                );
            }
            Some(err) => {
                println!(
                    "{}: {} after {}: {}",
                    info.id.bold(),
                    "FAILED".red().bold(),
                    elapsed,
                    error_chain(err).red(),
                );
            }
        }
    }
}

/// Format seconds into a human-readable duration string.
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else {
        let mins = secs / 60;
        let remaining = secs % 60;
        if remaining == 0 {
            format!("{}m", mins)
        } else {
            format!("{}m{}s", mins, remaining)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Hook for Recorder {
        fn pre_apply(&self, info: &InstanceInfo, _: Option<&InstanceState>, _: &InstanceDiff) {
            self.events.lock().unwrap().push(format!("pre {}", info.id));
        }
        fn post_apply(
            &self,
            info: &InstanceInfo,
            _: Option<&InstanceState>,
            e: Option<&ApplyError>,
        ) {
            self.events
                .lock()
                .unwrap()
                .push(format!("post {} {}", info.id, e.is_some()));
        }
    }

    #[test]
    fn hooks_fan_out_in_order() {
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let hooks = Hooks::new().with(a.clone()).with(b.clone());
        let info = InstanceInfo {
            id: "null_resource.x".into(),
            module_path: vec![],
            resource_type: "null_resource".into(),
        };
        hooks.pre_apply(&info, None, &InstanceDiff::new());
        hooks.post_apply(&info, None, None);
        hooks.post_state_update(&info, None);

        for recorder in [a, b] {
            assert_eq!(
                *recorder.events.lock().unwrap(),
                vec!["pre null_resource.x", "post null_resource.x false"]
            );
        }
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(5), "5s");
        assert_eq!(format_duration(120), "2m");
        assert_eq!(format_duration(75), "1m15s");
    }
}
