//! Error types for the reconciliation engine

use std::fmt;

use thiserror::Error;

use crate::core::StepResult;

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Which step entry point produced an error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepPhase {
    Setup,
    Reconcile,
    Finalize,
}

impl fmt::Display for StepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepPhase::Setup => f.write_str("setup"),
            StepPhase::Reconcile => f.write_str("reconcile"),
            StepPhase::Finalize => f.write_str("finalize"),
        }
    }
}

/// Engine error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Object does not exist (benign at fetch and delete boundaries)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Template or data-shape error
    #[error("Render error: {0}")]
    Render(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// API discovery error
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Random source failure
    #[error("Random generation error: {0}")]
    Random(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Failure inside a named step
    #[error("error in {step} step {phase}: {source}")]
    Step {
        step: String,
        phase: StepPhase,
        #[source]
        source: Box<Error>,
    },

    /// Metadata or status persistence failure at the end of a pass
    #[error("error patching {what}: {source}")]
    Patch {
        what: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// Step failure that still carries requeue hints for the pass
    #[error("{source}")]
    WithResult {
        result: StepResult,
        #[source]
        source: Box<Error>,
    },

    /// Several step failures from one pass
    #[error("{}", format_aggregate(.0))]
    Aggregate(Vec<Error>),
}

fn format_aggregate(errors: &[Error]) -> String {
    let mut msg = String::from("Multiple errors:\n");
    for e in errors {
        msg.push_str("  ");
        msg.push_str(&e.to_string());
        msg.push('\n');
    }
    msg
}

impl Error {
    /// Create a render error
    pub fn render(msg: impl Into<String>) -> Self {
        Error::Render(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    /// Create a discovery error
    pub fn discovery(msg: impl Into<String>) -> Self {
        Error::Discovery(msg.into())
    }

    /// Wrap an error with the step that produced it
    pub fn in_step(self, step: impl Into<String>, phase: StepPhase) -> Self {
        Error::Step {
            step: step.into(),
            phase,
            source: Box::new(self),
        }
    }

    /// Attach a step result to a failure; the engine merges it like a successful one
    pub fn with_result(self, result: StepResult) -> Self {
        match self {
            Error::WithResult { source, .. } => Error::WithResult { result, source },
            other => Error::WithResult {
                result,
                source: Box::new(other),
            },
        }
    }

    /// Split off the step result carried by the error, if any
    pub fn into_parts(self) -> (StepResult, Error) {
        match self {
            Error::WithResult { result, source } => (result, *source),
            other => (StepResult::default(), other),
        }
    }

    /// True for our own NotFound and for 404 responses from the API server
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            Error::Step { source, .. } | Error::Patch { source, .. } | Error::WithResult { source, .. } => {
                source.is_not_found()
            }
            _ => false,
        }
    }

    /// Collapse a list of errors: none, one passed through, or an aggregate
    pub fn combine(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Aggregate(errors)),
        }
    }
}
