//! Error types for topology construction
//!
//! None of these are fatal to a construction pass: callers log them and
//! skip the offending sample.

/// Result type alias for resolution operations
pub type Result<T> = std::result::Result<T, ResolveError>;

/// Failures while interpreting a single metric sample
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// Identifier is empty or not slash-delimited
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// Known platform tag with an unexpected number of segments
    #[error("unexpected segment count {count} for {platform} identifier: {id}")]
    SegmentCount {
        platform: &'static str,
        count: usize,
        id: String,
    },

    /// Platform tag not supported by this resolver
    #[error("unknown platform in identifier: {0}")]
    UnknownPlatform(String),

    /// Address could not be split into a host/port pair
    #[error("failed to split {0:?} to ip:port pair")]
    InvalidAddress(String),

    /// Histogram bucket boundary label is not numeric
    #[error("invalid histogram bucket boundary: {0:?}")]
    InvalidBucket(String),
}
