//! Diagnostic error types for the larder engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]`
//! derives, providing error codes and help text. The taxonomy drives retry
//! behavior in the job layer: only [`MutationError::Transient`] is ever
//! retried; validation, conflict, schema, and timeout failures are terminal.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the larder engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full
/// diagnostic chain (error codes, help text, sources) through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum LarderError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Partition(#[from] PartitionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Mutation(#[from] MutationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
}

/// Convenience alias for functions returning larder results.
pub type LarderResult<T> = std::result::Result<T, LarderError>;

// ---------------------------------------------------------------------------
// Fact store errors (schema violations)
// ---------------------------------------------------------------------------

/// Schema violations raised by the fact store on `add_triple`.
///
/// These indicate either malformed instance data (during a graph build) or a
/// bug in the mutation pipeline (during normal operation) — they are never
/// retried.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("predicate \"{predicate}\" is not declared in the schema")]
    #[diagnostic(
        code(larder::store::undeclared_predicate),
        help(
            "Only properties declared in the base schema may appear in triples. \
             Check the property name against the schema vocabulary."
        )
    )]
    UndeclaredPredicate { predicate: String },

    #[error("class \"{class}\" is not declared in the schema")]
    #[diagnostic(
        code(larder::store::undeclared_class),
        help("Type triples must reference a class from the fixed hierarchy.")
    )]
    UndeclaredClass { class: String },

    #[error(
        "object of \"{predicate}\" on {subject} has the wrong type: expected {expected}, got {actual}"
    )]
    #[diagnostic(
        code(larder::store::range_mismatch),
        help(
            "The object of this triple does not match the declared range of the \
             predicate. Literal kinds and instance classes are both checked."
        )
    )]
    RangeMismatch {
        subject: String,
        predicate: String,
        expected: String,
        actual: String,
    },

    #[error("{subject} already has type {existing}; cannot also declare it as {requested}")]
    #[diagnostic(
        code(larder::store::type_conflict),
        help(
            "Every subject has exactly one most-specific declared class. \
             Re-declaring the same class is a no-op; declaring a different \
             class is a violation."
        )
    )]
    TypeConflict {
        subject: String,
        existing: String,
        requested: String,
    },

    #[error("\"{predicate}\" is functional but {subject} already carries a different value")]
    #[diagnostic(
        code(larder::store::functional_conflict),
        help(
            "Functional properties hold at most one value per subject. Remove \
             the old triple before adding a new value."
        )
    )]
    FunctionalConflict { subject: String, predicate: String },

    #[error("{subject} references {object} which has no declared type")]
    #[diagnostic(
        code(larder::store::dangling_reference),
        help(
            "Object references must point at an existing, typed subject. \
             Insert the referenced subject's type triple first."
        )
    )]
    DanglingReference { subject: String, object: String },
}

/// Result type for fact-store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Durable partition errors
// ---------------------------------------------------------------------------

/// Errors from the durable instance partition (redb).
#[derive(Debug, Error, Diagnostic)]
pub enum PartitionError {
    #[error("I/O error: {source}")]
    #[diagnostic(
        code(larder::partition::io),
        help(
            "A filesystem operation failed. Check that the data directory \
             exists, has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(larder::partition::redb),
        help(
            "The embedded database encountered a transaction error. This may \
             indicate corruption — try rebuilding from a fresh data directory."
        )
    )]
    Redb { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(larder::partition::serde),
        help(
            "Failed to encode or decode a recipe record. This usually means \
             the stored format changed between versions; re-ingest your data."
        )
    )]
    Serialization { message: String },
}

/// Result type for partition operations.
pub type PartitionResult<T> = std::result::Result<T, PartitionError>;

// ---------------------------------------------------------------------------
// Graph build errors
// ---------------------------------------------------------------------------

/// Errors from the full graph build (base schema + instance snapshot).
///
/// A build failure is atomic: the previous store is left untouched.
#[derive(Debug, Error, Diagnostic)]
pub enum BuildError {
    #[error("failed to replay recipe \"{id}\" into the graph")]
    #[diagnostic(
        code(larder::build::replay),
        help(
            "A persisted recipe record no longer passes schema validation. \
             The previous store stays published; inspect the record and fix \
             or delete it."
        )
    )]
    Replay {
        id: String,
        #[source]
        #[diagnostic_source]
        source: StoreError,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Partition(#[from] PartitionError),
}

// ---------------------------------------------------------------------------
// Query errors
// ---------------------------------------------------------------------------

/// Errors from criteria validation.
///
/// "No results" is not an error — evaluation returns an empty sequence.
#[derive(Debug, Error, Diagnostic)]
pub enum QueryError {
    #[error("invalid criteria: {field} {message}")]
    #[diagnostic(
        code(larder::query::invalid_criteria),
        help("Thresholds must be finite and non-negative; fix the named field.")
    )]
    InvalidCriteria { field: &'static str, message: String },
}

/// Result type for query operations.
pub type QueryResult<T> = std::result::Result<T, QueryError>;

// ---------------------------------------------------------------------------
// Mutation errors
// ---------------------------------------------------------------------------

/// Errors from mutation jobs (create / update / delete / rebuild).
#[derive(Debug, Error, Diagnostic)]
pub enum MutationError {
    #[error("validation failed: {message}")]
    #[diagnostic(
        code(larder::mutation::validation),
        help("The draft or patch violates a recipe invariant. Fix the input and resubmit.")
    )]
    Validation { message: String },

    #[error("recipe identifier \"{id}\" already exists")]
    #[diagnostic(
        code(larder::mutation::conflict),
        help(
            "Another recipe already derived this identifier from its title. \
             Rename the draft, or use an update on the existing recipe."
        )
    )]
    Conflict { id: String },

    #[error("recipe \"{id}\" not found")]
    #[diagnostic(
        code(larder::mutation::not_found),
        help("The update target does not exist. Create it first, or check the identifier.")
    )]
    NotFound { id: String },

    #[error("schema violation while applying mutation")]
    #[diagnostic(
        code(larder::mutation::schema),
        help(
            "The mutation pipeline produced triples the schema rejects. This \
             indicates a bug in the pipeline; the partial write was rolled back."
        )
    )]
    Schema {
        #[source]
        #[diagnostic_source]
        source: StoreError,
    },

    #[error("store temporarily unavailable: {reason}")]
    #[diagnostic(
        code(larder::mutation::transient),
        help("A rebuild is in progress or a lock was contended. The job is retried with backoff.")
    )]
    Transient { reason: String },

    #[error("job exceeded its time budget of {budget_ms}ms (ran {elapsed_ms}ms)")]
    #[diagnostic(
        code(larder::mutation::timeout),
        help(
            "Partial effects were rolled back. Increase the job timeout in the \
             engine config, or split the workload."
        )
    )]
    Timeout { elapsed_ms: u64, budget_ms: u64 },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Partition(#[from] PartitionError),
}

impl MutationError {
    /// Whether the job layer should requeue this failure with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, MutationError::Transient { .. })
    }
}

impl From<StoreError> for MutationError {
    fn from(source: StoreError) -> Self {
        MutationError::Schema { source }
    }
}

/// Result type for mutation operations.
pub type MutationResult<T> = std::result::Result<T, MutationError>;

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(larder::engine::invalid_config),
        help("Check the EngineConfig fields. {message}")
    )]
    InvalidConfig { message: String },

    #[error("data directory error: {path}")]
    #[diagnostic(
        code(larder::engine::data_dir),
        help(
            "The data directory could not be accessed. Ensure the path exists \
             and has read/write permissions."
        )
    )]
    DataDir { path: String },

    #[error("engine is shutting down; job queue no longer accepts submissions")]
    #[diagnostic(
        code(larder::engine::shutdown),
        help("Submissions after shutdown are rejected. Create a new engine instance.")
    )]
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_converts_to_larder_error() {
        let err = StoreError::UndeclaredPredicate {
            predicate: "bogus".into(),
        };
        let top: LarderError = err.into();
        assert!(matches!(
            top,
            LarderError::Store(StoreError::UndeclaredPredicate { .. })
        ));
    }

    #[test]
    fn schema_violation_wraps_into_mutation_error() {
        let err = StoreError::FunctionalConflict {
            subject: "recipe:oat_bowl".into(),
            predicate: "title".into(),
        };
        let mutation: MutationError = err.into();
        assert!(matches!(mutation, MutationError::Schema { .. }));
        assert!(!mutation.is_transient());
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(MutationError::Transient {
            reason: "rebuild in progress".into()
        }
        .is_transient());
        assert!(!MutationError::Validation {
            message: "empty title".into()
        }
        .is_transient());
        assert!(!MutationError::Conflict {
            id: "recipe:oat_bowl".into()
        }
        .is_transient());
        assert!(!MutationError::Timeout {
            elapsed_ms: 21_000,
            budget_ms: 20_000
        }
        .is_transient());
    }

    #[test]
    fn error_display_messages_are_descriptive() {
        let err = MutationError::Timeout {
            elapsed_ms: 25_000,
            budget_ms: 20_000,
        };
        let msg = format!("{err}");
        assert!(msg.contains("25000"));
        assert!(msg.contains("20000"));
    }
}
