//! Error types for lessonforge
//!
//! This module provides the error taxonomy for the generation engine:
//! - Entry-guard errors (missing credentials, blank topic, concurrent run)
//! - Provider outcome errors (malformed output, credential exhaustion, fatal call failure)
//! - Storage errors propagated from the resumable store
//! - A [`Remediation`] mapping so callers can tell "fix your credentials" apart
//!   from "try again later" and "the prompt/schema contract is broken"

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::FailureClass;
use crate::types::Stage;

/// Result type alias for lessonforge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for lessonforge
#[derive(Debug, Error)]
pub enum Error {
    /// No provider credentials are configured
    #[error("at least one provider credential is required")]
    CredentialsRequired,

    /// The topic string is blank or otherwise unusable
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    /// A generation-type operation is already in flight
    #[error("a generation run is already in progress")]
    AlreadyRunning,

    /// The provider answered but the content did not match the expected shape
    #[error("provider returned malformed output during {stage}: {message}")]
    InvalidFormat {
        /// Stage whose output could not be parsed
        stage: Stage,
        /// Parser or schema error
        message: String,
    },

    /// The provider answered with a well-formed but empty result where one is required
    #[error("provider returned no content during {stage}")]
    EmptyOutput {
        /// Stage that produced nothing
        stage: Stage,
    },

    /// Every credential in the pool failed with a rotatable error
    #[error("all {attempts} credentials exhausted during {stage} ({cause})")]
    AllCredentialsExhausted {
        /// Stage that was being generated
        stage: Stage,
        /// Number of provider calls made
        attempts: usize,
        /// Which failure class dominated
        cause: ExhaustionCause,
    },

    /// An unclassified provider failure ended the attempt
    #[error("{stage} failed: {message}")]
    OperationFailed {
        /// Stage that was being generated
        stage: Stage,
        /// Underlying provider message
        message: String,
    },

    /// A stage was requested before the artifact it depends on exists
    #[error("cannot run {stage}: {missing} is missing")]
    MissingPrerequisite {
        /// Stage that was requested
        stage: Stage,
        /// Human-readable name of the missing artifact
        missing: String,
    },

    /// Requested topic or chapter does not exist in the store
    #[error("not found: {0}")]
    NotFound(String),

    /// Resumable store failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "provider.model")
        key: Option<String>,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The background run task panicked or was aborted
    #[error("generation task ended unexpectedly: {0}")]
    TaskFailed(String),
}

/// Resumable store errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to open or reach the backing store
    #[error("failed to connect to store: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Read or write failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// A stored value could not be decoded
    #[error("stored value for `{key}` is corrupt: {reason}")]
    Corrupt {
        /// Key of the unreadable value
        key: String,
        /// Decoder message
        reason: String,
    },
}

/// Dominant failure class when the credential pool is exhausted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionCause {
    /// Every attempt hit a quota or rate limit
    AllQuota,
    /// Every attempt was rejected as an invalid credential
    AllInvalid,
    /// A mix of quota and invalid-credential failures
    Mixed,
}

impl ExhaustionCause {
    /// Derive the cause from per-class failure counters
    pub fn from_counts(quota: usize, invalid: usize) -> Self {
        match (quota, invalid) {
            (_, 0) => ExhaustionCause::AllQuota,
            (0, _) => ExhaustionCause::AllInvalid,
            _ => ExhaustionCause::Mixed,
        }
    }

    /// Record the class of one failed attempt into a pair of counters
    pub(crate) fn tally(class: FailureClass, quota: &mut usize, invalid: &mut usize) {
        match class {
            FailureClass::Quota => *quota += 1,
            FailureClass::InvalidCredential => *invalid += 1,
            FailureClass::MalformedOutput | FailureClass::Unknown => {}
        }
    }
}

impl std::fmt::Display for ExhaustionCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExhaustionCause::AllQuota => write!(f, "all credentials rate limited"),
            ExhaustionCause::AllInvalid => write!(f, "all credentials rejected"),
            ExhaustionCause::Mixed => write!(f, "credentials rate limited or rejected"),
        }
    }
}

/// What the user should do about a failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Remediation {
    /// Add or replace provider credentials
    FixCredentials,
    /// Wait for quota to refill and try again
    RetryLater,
    /// The provider returned garbage; likely a prompt/schema bug
    ProviderOutput,
    /// The storage layer is broken
    Storage,
    /// The request itself is invalid (topic, chapter index, configuration)
    FixRequest,
    /// Another run is in flight
    Busy,
    /// Anything else
    Internal,
}

/// Serializable failure summary attached to terminal events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "credentials_exhausted")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Suggested remediation
    pub remediation: Remediation,
}

impl Error {
    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::CredentialsRequired => "credentials_required",
            Error::InvalidTopic(_) => "invalid_topic",
            Error::AlreadyRunning => "already_running",
            Error::InvalidFormat { .. } => "invalid_format",
            Error::EmptyOutput { .. } => "empty_output",
            Error::AllCredentialsExhausted { .. } => "credentials_exhausted",
            Error::OperationFailed { .. } => "operation_failed",
            Error::MissingPrerequisite { .. } => "missing_prerequisite",
            Error::NotFound(_) => "not_found",
            Error::Storage(_) => "storage_failure",
            Error::Config { .. } => "config_error",
            Error::Serialization(_) => "serialization_error",
            Error::TaskFailed(_) => "task_failed",
        }
    }

    /// Map the error to the action a user should take
    pub fn remediation(&self) -> Remediation {
        match self {
            Error::CredentialsRequired => Remediation::FixCredentials,
            Error::AllCredentialsExhausted { cause, .. } => match cause {
                ExhaustionCause::AllQuota => Remediation::RetryLater,
                ExhaustionCause::AllInvalid | ExhaustionCause::Mixed => {
                    Remediation::FixCredentials
                }
            },
            Error::InvalidFormat { .. } | Error::EmptyOutput { .. } => Remediation::ProviderOutput,
            Error::Storage(_) | Error::Serialization(_) => Remediation::Storage,
            Error::InvalidTopic(_)
            | Error::MissingPrerequisite { .. }
            | Error::NotFound(_)
            | Error::Config { .. } => Remediation::FixRequest,
            Error::AlreadyRunning => Remediation::Busy,
            Error::OperationFailed { .. } | Error::TaskFailed(_) => Remediation::Internal,
        }
    }

    /// Build the serializable summary of this error
    pub fn detail(&self) -> ErrorDetail {
        ErrorDetail {
            code: self.error_code().to_string(),
            message: self.to_string(),
            remediation: self.remediation(),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Storage(StorageError::QueryFailed(e.to_string()))
    }
}
