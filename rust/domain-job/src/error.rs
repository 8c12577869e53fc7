use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::kinds::AsyncJobKind;

/// A job holder that prevented admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blocker {
    /// API label of the holder.
    pub api: String,
    /// Name of the job kind being held.
    pub kind: String,
    /// How long the holder has had the job.
    pub held_for: Duration,
}

/// Holders reported when admission fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blockers {
    /// Holder of the primary (or async) channel blocking the request.
    pub monitor: Option<Blocker>,
    /// Holder of the agent channel blocking the request.
    pub agent: Option<Blocker>,
}

impl Blockers {
    pub fn is_empty(&self) -> bool {
        self.monitor.is_none() && self.agent.is_none()
    }
}

impl fmt::Display for Blocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} for {}s)",
            self.api,
            self.kind,
            self.held_for.as_secs()
        )
    }
}

impl fmt::Display for Blockers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.monitor, &self.agent) {
            (Some(monitor), Some(agent)) => {
                write!(f, " (held by monitor={monitor} agent={agent})")
            }
            (Some(monitor), None) => write!(f, " (held by monitor={monitor})"),
            (None, Some(agent)) => write!(f, " (held by agent={agent})"),
            (None, None) => Ok(()),
        }
    }
}

/// Errors raised by job admission, release and persistence.
#[derive(Error, Debug)]
pub enum JobError {
    /// The wait budget expired before the job could be admitted.
    #[error("Timed out during operation: cannot acquire state change lock{blockers}")]
    LockTimeout { blockers: Blockers },

    /// Too many callers are already queued on the domain.
    #[error("Operation failed: cannot acquire state change lock{blockers} due to max_queued limit")]
    QueueLimitExceeded { blockers: Blockers },

    /// Waiting machinery failed.
    #[error("Unable to acquire job: {0}")]
    SystemFailure(String),

    /// A nested job named an async kind other than the active one.
    #[error("Internal error: unexpected async job {requested} type expected {active}")]
    ProtocolMismatch {
        requested: AsyncJobKind,
        active: AsyncJobKind,
    },

    /// The persisted job element could not be understood.
    #[error("Internal error: {0}")]
    CorruptPersistedState(String),

    #[error("Status I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for job operations
pub type JobResult<T> = Result<T, JobError>;

impl JobError {
    pub fn corrupt(message: impl Into<String>) -> Self {
        JobError::CorruptPersistedState(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        JobError::Config(message.into())
    }

    /// Holders reported by an admission failure, if any.
    pub fn blockers(&self) -> Option<&Blockers> {
        match self {
            JobError::LockTimeout { blockers } | JobError::QueueLimitExceeded { blockers } => {
                Some(blockers)
            }
            _ => None,
        }
    }

    /// Whether retrying the same request later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            JobError::LockTimeout { .. } | JobError::QueueLimitExceeded { .. }
        )
    }
}

impl From<config::ConfigError> for JobError {
    fn from(err: config::ConfigError) -> Self {
        JobError::Config(err.to_string())
    }
}
