//! Error types for promoflow.
//!
//! Store failures are kept separate from reconciliation failures so the
//! driver can tell a broken phase apart from a failed status write.

use std::fmt;
use thiserror::Error;

use crate::reconciler::ReconcilePhase;

/// Errors reported by the resource store and the analysis-run client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The requested object does not exist (or is not visible yet).
    #[error("{kind} {name:?} not found")]
    NotFound {
        /// Kind of the object.
        kind: String,
        /// Name of the object, qualified by namespace where relevant.
        name: String,
    },

    /// An object with the same name already exists.
    #[error("{kind} {name:?} already exists")]
    AlreadyExists {
        /// Kind of the object.
        kind: String,
        /// Name of the object.
        name: String,
    },

    /// The write carried a stale resource version.
    #[error("conflict writing {kind} {name:?}: the object has been modified")]
    Conflict {
        /// Kind of the object.
        kind: String,
        /// Name of the object.
        name: String,
    },

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Any other store failure.
    #[error("store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Creates an already-exists error.
    #[must_use]
    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Creates a conflict error.
    #[must_use]
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Returns true for not-found errors.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true for already-exists errors.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Returns true for optimistic-concurrency conflicts.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns true when retrying the same call may succeed: conflicts and
    /// objects that are not visible yet.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::NotFound { .. })
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field holds an invalid value.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// The offending field.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The configuration document could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// The configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The tracing subscriber could not be installed.
    #[error("failed to initialize logging: {0}")]
    Logging(String),
}

impl ConfigError {
    /// Creates an invalid-value error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// The main error type for promoflow operations.
#[derive(Debug, Error)]
pub enum PromoflowError {
    /// A store call failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A referenced object is missing.
    #[error("{kind} {name:?} in namespace {namespace:?} not found")]
    NotFound {
        /// Kind of the missing object.
        kind: String,
        /// Namespace searched.
        namespace: String,
        /// Name of the missing object.
        name: String,
    },

    /// A reconciliation phase failed.
    #[error("error reconciling {phase} for Stage {stage:?}: {source}")]
    Phase {
        /// The phase that failed.
        phase: ReconcilePhase,
        /// The Stage being reconciled.
        stage: String,
        /// The underlying failure.
        #[source]
        source: Box<PromoflowError>,
    },

    /// Persisting the Stage status failed after the phase itself succeeded.
    #[error("error updating status of Stage {stage:?}: {source}")]
    StatusPatch {
        /// The Stage whose status could not be written.
        stage: String,
        /// The store failure.
        #[source]
        source: StoreError,
    },

    /// Some items of a batch failed while the rest were applied.
    #[error("failed to {action} for {failed} of {total} Freight")]
    PartialFailure {
        /// What the batch was doing.
        action: String,
        /// Number of failed items.
        failed: usize,
        /// Number of attempted items.
        total: usize,
    },

    /// Several independent steps failed.
    #[error("{}", AggregateDisplay(.0))]
    Aggregate(Vec<PromoflowError>),

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PromoflowError {
    /// Creates a not-found error for a namespaced object.
    #[must_use]
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Wraps an error as a failure of a reconciliation phase.
    #[must_use]
    pub fn phase(phase: ReconcilePhase, stage: impl Into<String>, source: Self) -> Self {
        Self::Phase {
            phase,
            stage: stage.into(),
            source: Box::new(source),
        }
    }

    /// Folds a list of errors into one, flattening nested aggregates.
    ///
    /// Returns `None` for an empty list and the error itself for a list of one.
    #[must_use]
    pub fn aggregate(errors: Vec<Self>) -> Option<Self> {
        let mut flat = Vec::with_capacity(errors.len());
        for err in errors {
            match err {
                Self::Aggregate(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(Self::Aggregate(flat)),
        }
    }

    /// Returns true when the error (or the error it wraps) is a not-found.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Store(err) => err.is_not_found(),
            Self::Phase { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

struct AggregateDisplay<'a>(&'a [PromoflowError]);

impl fmt::Display for AggregateDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() == 1 {
            return write!(f, "{}", self.0[0]);
        }
        write!(f, "[")?;
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{err}")?;
        }
        write!(f, "]")
    }
}
