//! Engine error taxonomy.
//!
//! Configuration errors (out-of-range parameters) never appear here —
//! they clamp at the point of assignment. Resource exhaustion is
//! handled internally by voice stealing. What remains is missing
//! entities, bad routing, and device failure.

use thiserror::Error;

/// Errors surfaced by the engine's command interface.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The referenced track, clip, effect, or voice does not exist.
    /// No partial mutation has occurred.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The requested routing change would create a feedback cycle.
    #[error("routing would create a cycle")]
    InvalidRouting,

    /// The output device is unavailable; the engine is running in
    /// silent fallback mode.
    #[error("audio engine unavailable")]
    EngineUnavailable,

    /// An upstream collaborator handed us data we cannot use.
    #[error("decode failed: {0}")]
    DecodeFailed(String),
}
