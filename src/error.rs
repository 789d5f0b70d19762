//! Error types shared across the engine.

use thiserror::Error;

/// Errors raised while registering mocks.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A query or header constraint is not a valid regular expression.
    #[error("invalid {kind} pattern for {name:?}: {source}")]
    InvalidPattern {
        kind: PatternKind,
        name: String,
        #[source]
        source: regex::Error,
    },
}

/// Which part of an expectation a pattern belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Query,
    Header,
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternKind::Query => f.write_str("query"),
            PatternKind::Header => f.write_str("header"),
        }
    }
}

/// A delay string that could not be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DelayError {
    #[error("empty duration")]
    Empty,
    #[error("invalid duration {0:?}")]
    Invalid(String),
    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { unit: String, input: String },
}

/// A REST store operation that could not be applied.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("no resource with identifier {0:?}")]
    NotFound(String),
    #[error("a resource with identifier {0:?} already exists")]
    Conflict(String),
}

/// Failure reported by a [`Forwarder`](crate::dispatch::Forwarder).
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid target url {0:?}")]
    InvalidTarget(String),
    #[error("upstream request failed: {0}")]
    Upstream(String),
}
