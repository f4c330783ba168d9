//! Engine errors

use selser_dom::DomError;
use selser_html::HtmlError;

/// Result type for engine passes
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine errors
///
/// Malformed input never ends up here: it is recorded as a
/// [`crate::Diagnostic`] and the pass continues. These variants are for
/// exhausted budgets and for broken internal invariants.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("resource limit exceeded: {resource} used {used} of {limit}")]
    ResourceLimitExceeded {
        resource: String,
        used: u64,
        limit: u64,
    },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("no DOM fragment registered for {0:?}")]
    MissingFragment(String),

    #[error("DOM fragment {0:?} removed while it still has children")]
    UnconsumedFragment(String),

    #[error("DOM error: {0}")]
    Dom(#[from] DomError),

    #[error("HTML error: {0}")]
    Html(#[from] HtmlError),
}

impl EngineError {
    /// Budget errors abort the remaining passes but are expected in
    /// production; hosts usually retry with a smaller input
    pub fn is_resource_limit(&self) -> bool {
        matches!(self, EngineError::ResourceLimitExceeded { .. })
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        EngineError::InvariantViolation(msg.into())
    }
}
