use thiserror::Error;

/// Failures reported by a [`HostDocument`](crate::host::HostDocument).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HostError {
    /// Reading from the document failed
    #[error("host read failed: {0}")]
    Read(String),

    /// Writing to the document failed
    #[error("host write failed: {0}")]
    Write(String),

    /// Token source enumeration failed
    #[error("token source enumeration failed: {0}")]
    Catalog(String),

    /// The node does not expose the requested color property
    #[error("node {node} has no {property} property")]
    MissingProperty { node: String, property: String },
}

/// Why a token source could not be resolved to a concrete color.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("alias chain from {0} exceeds the maximum depth")]
    AliasDepthExceeded(String),

    #[error("alias chain from {0} loops back on itself")]
    AliasCycle(String),

    #[error("alias target {0} does not exist")]
    MissingTarget(String),

    #[error("variable {0} has no value for its collection's default mode")]
    MissingMode(String),

    #[error("variable {0} belongs to an unknown collection")]
    MissingCollection(String),

    #[error("variable {0} does not hold a color")]
    NotAColor(String),

    #[error("style {0} has no solid paint")]
    NoSolidPaint(String),
}
