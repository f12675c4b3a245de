//! Reconciliation error types
//!
//! Two layers: [`DirectoryError`] is what a directory collaborator reports for
//! a single call, [`ReconcileError`] is what a reconciliation pass reports to
//! its caller. Validation variants are raised before any remote call is made.

use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

use crate::operation::Operation;

/// Result type for directory collaborator calls.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Result type for reconciliation operations.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Error reported by a directory collaborator for one call.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The addressed object does not exist. Authoritative, never retried.
    #[error("object not found: {object_id}")]
    NotFound { object_id: String },

    /// The edge or credential being added is already present.
    #[error("object reference already exists: {object_id}")]
    AlreadyExists { object_id: String },

    /// Temporary failure (throttling, 5xx, connection loss). The transport
    /// has already spent its own retry budget when this surfaces.
    #[error("transient directory error: {message}")]
    Transient {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The directory refused the request.
    #[error("directory rejected request: {message}")]
    Rejected {
        code: Option<String>,
        message: String,
    },
}

impl DirectoryError {
    /// Create a not found error.
    pub fn not_found(object_id: impl Into<String>) -> Self {
        Self::NotFound {
            object_id: object_id.into(),
        }
    }

    /// Create a transient error without an underlying source.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            source: None,
        }
    }

    /// Create a rejection without an error code.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            code: None,
            message: message.into(),
        }
    }

    /// Check if the addressed object is absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if the error is a temporary condition.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// A pass stopped part way through its operation list.
///
/// Nothing is rolled back: `applied` is what the directory now reflects,
/// `failed` is the operation that errored and `remaining` were never issued.
/// Re-running the pass is safe because the next diff skips applied work.
#[derive(Debug)]
pub struct PartialApplyError {
    pub owner_id: String,
    pub applied: Vec<Operation>,
    pub failed: Operation,
    pub remaining: Vec<Operation>,
    pub source: DirectoryError,
}

impl fmt::Display for PartialApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed for {} after {} applied operation(s), {} not issued: {}",
            self.failed,
            self.owner_id,
            self.applied.len(),
            self.remaining.len(),
            self.source
        )
    }
}

impl std::error::Error for PartialApplyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Error that can occur during a reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    // Validation errors (no remote call has been made)
    /// An identifier failed shape validation or composite decoding.
    #[error("malformed identifier {value:?}: {reason}")]
    MalformedIdentifier { value: String, reason: String },

    /// Mutually exclusive settings were both supplied.
    #[error("conflicting configuration: {message}")]
    ConflictingConfiguration { message: String },

    /// A timestamp was not valid RFC3339.
    #[error("invalid timestamp for {field}: {value:?}")]
    InvalidTimestamp {
        field: &'static str,
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    /// A relative duration could not be parsed or is not positive.
    #[error("invalid duration {value:?}: {reason}")]
    InvalidDuration { value: String, reason: String },

    /// The resolved validity window is empty or inverted.
    #[error("invalid credential window: end {end} is not after start {start}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// Credential key material could not be decoded.
    #[error("invalid credential value: {message}")]
    InvalidCredential { message: String },

    /// Engine configuration is invalid.
    #[error("invalid configuration: {message}")]
    Configuration { message: String },

    // Pre-flight errors
    /// Another object already carries the requested display name.
    #[error("display name {display_name:?} is already used by: {}", .object_ids.join(", "))]
    DuplicateName {
        display_name: String,
        object_ids: Vec<String>,
    },

    /// A credential with the requested key id already exists and must be
    /// imported rather than created.
    #[error("credential {key_id} already exists on {owner_id}, import it as {owner_id}/{key_id}")]
    CredentialAlreadyExists { owner_id: String, key_id: String },

    /// The pass would leave the owner object in a forbidden state, or the
    /// directory answered in a way the pass cannot accept. `applied` lists
    /// mutations already made when the violation was detected.
    #[error("invariant violation on {owner_id}: {message}")]
    InvariantViolation {
        owner_id: String,
        message: String,
        applied: Vec<Operation>,
    },

    // Remote errors
    /// The owner object does not exist.
    #[error("{kind} {object_id} not found")]
    NotFound { kind: String, object_id: String },

    /// A collaborator call outside the apply phase failed.
    #[error("directory call {operation} failed for {owner_id}: {source}")]
    Directory {
        owner_id: String,
        operation: String,
        #[source]
        source: DirectoryError,
    },

    /// A mutation failed mid-pass.
    #[error(transparent)]
    PartialApply(Box<PartialApplyError>),

    /// A created credential never became visible on read-back. The create
    /// itself succeeded and is listed in `applied`.
    #[error("credential {key_id} on {owner_id} not visible after {attempts} read-back attempt(s)")]
    VerificationFailed {
        owner_id: String,
        key_id: String,
        attempts: u32,
        applied: Vec<Operation>,
        /// Last read-back failure, if the final attempt errored.
        #[source]
        last_error: Option<DirectoryError>,
    },

    /// Cancellation was observed between operations.
    #[error("pass on {owner_id} cancelled after {} applied operation(s)", .applied.len())]
    Cancelled {
        owner_id: String,
        applied: Vec<Operation>,
    },

    /// Wraps an error with the owner and sub-identifier it concerns.
    #[error("{owner_id}/{subject}: {source}")]
    Context {
        owner_id: String,
        subject: String,
        #[source]
        source: Box<ReconcileError>,
    },
}

impl ReconcileError {
    /// Create a malformed identifier error.
    pub fn malformed(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedIdentifier {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a conflicting configuration error.
    pub fn conflicting(message: impl Into<String>) -> Self {
        Self::ConflictingConfiguration {
            message: message.into(),
        }
    }

    /// Create an invalid duration error.
    pub fn invalid_duration(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDuration {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid credential error.
    pub fn invalid_credential(message: impl Into<String>) -> Self {
        Self::InvalidCredential {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invariant violation.
    pub fn invariant(owner_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            owner_id: owner_id.into(),
            message: message.into(),
            applied: Vec::new(),
        }
    }

    /// Record mutations that were already applied when this error arose.
    #[must_use]
    pub fn with_applied(self, ops: Vec<Operation>) -> Self {
        match self {
            Self::InvariantViolation {
                owner_id, message, ..
            } => Self::InvariantViolation {
                owner_id,
                message,
                applied: ops,
            },
            Self::Context {
                owner_id,
                subject,
                source,
            } => Self::Context {
                owner_id,
                subject,
                source: Box::new((*source).with_applied(ops)),
            },
            other => other,
        }
    }

    /// Create a directory call error.
    pub fn directory(
        owner_id: impl Into<String>,
        operation: impl Into<String>,
        source: DirectoryError,
    ) -> Self {
        Self::Directory {
            owner_id: owner_id.into(),
            operation: operation.into(),
            source,
        }
    }

    /// Attach the owner id and sub-identifier to this error.
    #[must_use]
    pub fn with_context(self, owner_id: impl Into<String>, subject: impl Into<String>) -> Self {
        Self::Context {
            owner_id: owner_id.into(),
            subject: subject.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through [`ReconcileError::Context`].
    #[must_use]
    pub fn root(&self) -> &ReconcileError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this error was raised before any remote call.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self.root(),
            Self::MalformedIdentifier { .. }
                | Self::ConflictingConfiguration { .. }
                | Self::InvalidTimestamp { .. }
                | Self::InvalidDuration { .. }
                | Self::InvalidWindow { .. }
                | Self::InvalidCredential { .. }
                | Self::Configuration { .. }
        )
    }

    /// Check if the underlying directory error is transient.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self.root() {
            Self::Directory { source, .. } => source.is_transient(),
            Self::PartialApply(partial) => partial.source.is_transient(),
            _ => false,
        }
    }

    /// Check if this error reports a missing object.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self.root() {
            Self::NotFound { .. } => true,
            Self::Directory { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Operations the directory reflects despite the error.
    #[must_use]
    pub fn applied_operations(&self) -> &[Operation] {
        match self.root() {
            Self::PartialApply(partial) => &partial.applied,
            Self::Cancelled { applied, .. }
            | Self::InvariantViolation { applied, .. }
            | Self::VerificationFailed { applied, .. } => applied,
            _ => &[],
        }
    }
}

impl From<PartialApplyError> for ReconcileError {
    fn from(err: PartialApplyError) -> Self {
        Self::PartialApply(Box::new(err))
    }
}
