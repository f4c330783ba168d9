//! selser DOM - arena tree for the wikitext/HTML round trip
//!
//! Nodes live in a single arena and are addressed by [`NodeId`].
//! Everything that the conversion passes need to know about a node
//! beyond its tag, attributes and text is kept in side tables on the
//! [`Document`]: provenance (`data-parsoid`), construct metadata
//! (`data-mw`), about-group ids and change markers.

mod comment;
mod constructs;
mod data;
mod diff;
mod document;
mod error;
mod node;
mod query;
mod tree;

pub use comment::{decode_comment, decoded_comment_length, encode_comment};
pub use constructs::{ConstructMarker, ConstructType};
pub use data::{
    ArgInfo, DataMw, DomSourceRange, Invocation, ParamInfo, Part, Provenance, SourceSpan, Target,
    TempData,
};
pub use diff::{DiffMark, DiffMarks, DiffStore};
pub use document::{Document, StoreOptions, PARSOID_ABOUT_PREFIX};
pub use error::{DomError, DomResult};
pub use node::{Attribute, ElementData, Node, NodeData};
pub use tree::{Children, Descendants, DomTree};

use std::fmt;

/// Node identifier (index into arena)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Root node ID
    pub const ROOT: NodeId = NodeId(0);

    /// Sentinel for missing links
    pub const NONE: NodeId = NodeId(u32::MAX);

    /// Check if this ID points at a node
    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::NONE
    }

    /// Arena index
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub(crate) fn to_option(self) -> Option<NodeId> {
        if self.is_valid() { Some(self) } else { None }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "n{}", self.0)
        } else {
            f.write_str("n-")
        }
    }
}
