//! DOM errors

use crate::NodeId;

/// Result type for DOM operations
pub type DomResult<T> = Result<T, DomError>;

/// DOM operation errors
#[derive(Debug, thiserror::Error)]
pub enum DomError {
    #[error("node {0} not found")]
    NotFound(NodeId),

    #[error("cannot insert {child} under {parent}: hierarchy request error")]
    HierarchyRequest { parent: NodeId, child: NodeId },

    #[error("node {child} is not a child of {parent}")]
    NotAChild { parent: NodeId, child: NodeId },

    #[error("node {0} is not an element")]
    NotAnElement(NodeId),

    #[error("invalid {attr} attribute: {source}")]
    InvalidDataAttribute {
        attr: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown change marker: {0:?}")]
    UnknownDiffMark(String),
}
