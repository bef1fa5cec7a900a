//! Typed failures of a single resource's apply pipeline.

use crate::state::models::InstanceState;

/// Why an apply pipeline did not succeed.
///
/// `Validation` and `PlanConsistency` abort the pipeline where they occur.
/// `Apply` and `Provision` are captured and only surfaced after the state has
/// been persisted and the saved diff cleared.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("{id}: configuration is invalid: {}", errors.join("; "))]
    Validation { id: String, errors: Vec<String> },

    #[error(
        "{id}: diffs didn't match during apply ({reason}). This is a bug in the \
         provider; the plan no longer describes the change that would be made"
    )]
    PlanConsistency { id: String, reason: String },

    #[error("{id}: apply failed")]
    Apply {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{id}: provisioner '{provisioner}' failed")]
    Provision {
        id: String,
        provisioner: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{address}: no configuration attached; the apply pipeline needs one")]
    MissingConfig { address: String },

    #[error("{id}: interpolation failed")]
    Interpolation {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{id}: provider could not compute a diff")]
    Diff {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{id}: provider '{provider}' is not available")]
    ProviderNotFound { id: String, provider: String },

    #[error("{id}: provisioner '{provisioner}' is not available")]
    ProvisionerNotFound { id: String, provisioner: String },

    #[error("{id}: state store error")]
    Store {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{} errors occurred:\n{}", .0.len(), bullets(.0))]
    Multiple(Vec<ApplyError>),
}

impl ApplyError {
    pub fn store(id: &str) -> impl FnOnce(anyhow::Error) -> ApplyError + '_ {
        move |source| ApplyError::Store {
            id: id.to_string(),
            source,
        }
    }

    /// Fold captured errors into one, or `None` when nothing failed.
    pub fn combine(mut errors: Vec<ApplyError>) -> Option<ApplyError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(ApplyError::Multiple(errors)),
        }
    }
}

fn bullets(errors: &[ApplyError]) -> String {
    errors
        .iter()
        .map(|e| format!("  * {}", error_chain(e)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render an error with its full source chain on one line.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}

/// Successful result of an apply pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// Nothing was planned for this instance; no store was written.
    NoOp,
    Applied {
        /// The instance as persisted; `None` when it no longer exists.
        state: Option<InstanceState>,
        create_new: bool,
    },
}

impl ApplyOutcome {
    pub fn state(&self) -> Option<&InstanceState> {
        match self {
            ApplyOutcome::NoOp => None,
            ApplyOutcome::Applied { state, .. } => state.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_single_and_many() {
        assert!(ApplyError::combine(vec![]).is_none());

        let one = ApplyError::combine(vec![ApplyError::Apply {
            id: "a".into(),
            source: anyhow::anyhow!("boom"),
        }])
        .unwrap();
        assert!(matches!(one, ApplyError::Apply { .. }));
        assert_eq!(error_chain(&one), "a: apply failed: boom");

        let many = ApplyError::combine(vec![
            ApplyError::Apply {
                id: "a".into(),
                source: anyhow::anyhow!("boom"),
            },
            ApplyError::Provision {
                id: "a".into(),
                provisioner: "local-exec".into(),
                source: anyhow::anyhow!("exit 1"),
            },
        ])
        .unwrap();
        let text = many.to_string();
        assert!(text.starts_with("2 errors occurred"));
        assert!(text.contains("local-exec' failed: exit 1"));
    }

    #[test]
    fn consistency_error_names_reason() {
        let err = ApplyError::PlanConsistency {
            id: "a".into(),
            reason: "value mismatch: size".into(),
        };
        let text = err.to_string();
        assert!(text.contains("diffs didn't match"));
        assert!(text.contains("value mismatch: size"));
    }
}
