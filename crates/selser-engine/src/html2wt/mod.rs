//! HTML -> markup passes: normalization and selective serialization

pub mod changes;
mod normalizer;
mod selser;

pub use changes::{apply_changes, parse_change_tree, Change, STATIC_RANDOM_STRING};
pub use normalizer::{normalize, DomNormalizer};
pub use selser::{
    html_to_wikitext, serialize_document, LiteralHtmlEmitter, NodeEmitter, SelectiveSerializer,
};
