//! Engine error types
//!
//! Per-pattern failures (state lost, duration exceeded, timeout) are not errors:
//! they are reported as `MatchEvent::Failed` on the event stream. The variants
//! here are contract violations surfaced synchronously to the caller.

use thiserror::Error;

/// Errors returned by the gesture engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Frame delivered with a non-increasing frame number or a timestamp that
    /// goes backwards. The buffer is left unchanged.
    #[error(
        "out-of-order frame: #{got_frame} @ {got_ts}ms after #{last_frame} @ {last_ts}ms"
    )]
    OutOfOrderFrame {
        last_frame: u64,
        last_ts: u64,
        got_frame: u64,
        got_ts: u64,
    },

    /// No pattern registered under this id
    #[error("pattern not found: {0}")]
    PatternNotFound(String),

    /// Pattern definition rejected at registration
    #[error("invalid pattern '{id}': {reason}")]
    InvalidPattern { id: String, reason: String },

    /// Frame or tick delivered while the engine is stopped
    #[error("engine is not running")]
    NotRunning,
}

impl EngineError {
    pub(crate) fn invalid(id: &str, reason: impl Into<String>) -> Self {
        EngineError::InvalidPattern {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
