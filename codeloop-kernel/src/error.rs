//! The closed set of error kinds the whole crate can produce.
//!
//! Every fallible boundary (validator, applier, transport, command runner,
//! state store) has its own local error enum; each of those converges into
//! [`RunError`] via `From`, so the orchestrator only ever has to branch on
//! this one type to decide whether to retry, prompt the model, or abort.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("malformed patch envelope: {0}")]
    MalformedEnvelope(String),
    #[error("schema violation: {0}")]
    SchemaViolation(String),
    #[error("unsafe path: {0}")]
    UnsafePath(String),
    #[error("forbidden mode: {0}")]
    ForbiddenMode(String),
    #[error("missing content: {0}")]
    MissingContent(String),

    #[error("precondition failed for {path}: {reason}")]
    PreconditionFailure { path: String, reason: String },

    #[error("transport timed out after {0:?}")]
    TransportTimeout(Duration),
    #[error("transient transport failure: {0}")]
    TransportTransient(String),
    #[error("transport authentication failed: {0}")]
    TransportAuth(String),
    #[error("browser transport failure: {0}")]
    TransportUIFailure(String),
    #[error("model reply violated the transport protocol: {0}")]
    ProtocolViolation(String),

    #[error("verification command failed (exit {exit_code:?}): {tail}")]
    CommandFailed { exit_code: Option<i32>, tail: String },
    #[error("verification command timed out after {0:?}")]
    CommandTimeout(Duration),
    #[error("verification command never passed within budget ({attempts} attempt(s)); last tail: {tail}")]
    VerificationExhausted { attempts: u32, tail: String },

    #[error("git index corrupt: {0}")]
    GitIndexCorrupt(String),
    #[error("resource already in use: {0}")]
    ResourceInUse(String),
    #[error("configuration error: {0}")]
    ConfigError(String),
    #[error("push to remote failed: {0}")]
    PushFailed(String),

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),
}

/// How the orchestrator is allowed to react to an error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Translate into a model-facing retry prompt; never bubbles past the orchestrator.
    RetryWithModel,
    /// Retried internally (backoff) by the component that raised it.
    RetryInternal,
    /// Not an error at all from the run's perspective — recorded and the run proceeds.
    Graceful,
    /// Abort the run with a non-zero exit; resume state is left intact.
    Fatal,
}

impl RunError {
    pub fn disposition(&self) -> Disposition {
        use Disposition::*;
        match self {
            RunError::MalformedEnvelope(_)
            | RunError::SchemaViolation(_)
            | RunError::UnsafePath(_)
            | RunError::ForbiddenMode(_)
            | RunError::MissingContent(_)
            | RunError::PreconditionFailure { .. } => RetryWithModel,

            RunError::TransportTimeout(_) | RunError::TransportTransient(_) => RetryInternal,

            RunError::TransportAuth(_)
            | RunError::TransportUIFailure(_)
            | RunError::ProtocolViolation(_)
            | RunError::GitIndexCorrupt(_)
            | RunError::ResourceInUse(_)
            | RunError::ConfigError(_)
            | RunError::PushFailed(_)
            | RunError::VerificationExhausted { .. } => Fatal,

            RunError::CommandFailed { .. } | RunError::CommandTimeout(_) => RetryWithModel,

            RunError::BudgetExceeded(_) => Graceful,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.disposition() == Disposition::Fatal
    }

    /// Maps a terminal `RunError` onto the exit codes the CLI surface promises.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::UnsafePath(_) => 3,
            RunError::TransportAuth(_)
            | RunError::TransportUIFailure(_)
            | RunError::ProtocolViolation(_)
            | RunError::TransportTimeout(_)
            | RunError::TransportTransient(_) => 4,
            RunError::VerificationExhausted { .. } => 5,
            RunError::ConfigError(_) => 2,
            _ => 1,
        }
    }
}
