//! Selective serialization
//!
//! Walks a normalized document and emits markup. In selser mode an
//! element without change markers and with a valid source range is
//! copied verbatim from the page source, so an unedited document comes
//! back byte for byte. Encapsulated units (template output and the like)
//! are emitted as a whole: reused when untouched, otherwise rebuilt from
//! their part list. Elements that must be re-emitted go through a
//! [`NodeEmitter`].

use std::fmt::Write as _;

use selser_dom::{decode_comment, Document, NodeId};
use selser_html::HtmlParser;

use super::normalize;
use crate::{EngineResult, Env};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Per-tag markup emission for elements whose source cannot be reused
pub trait NodeEmitter {
    /// Markup for `node`; `content` is the already serialized markup of
    /// its children
    fn emit_element(&mut self, doc: &Document, node: NodeId, content: &str) -> String;
}

/// Emits every element as literal HTML tags
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralHtmlEmitter;

impl NodeEmitter for LiteralHtmlEmitter {
    fn emit_element(&mut self, doc: &Document, node: NodeId, content: &str) -> String {
        let Some(elem) = doc.tree.element(node) else {
            return content.to_string();
        };
        let mut out = format!("<{}", elem.name);
        for attr in &elem.attrs {
            let _ = write!(
                out,
                " {}=\"{}\"",
                attr.name,
                html_escape::encode_double_quoted_attribute(&attr.value)
            );
        }
        out.push('>');
        if VOID_ELEMENTS.contains(&elem.name.as_str()) {
            return out;
        }
        out.push_str(content);
        let _ = write!(out, "</{}>", elem.name);
        out
    }
}

#[derive(Debug, Default)]
pub struct SelectiveSerializer<E = LiteralHtmlEmitter> {
    emitter: E,
}

impl SelectiveSerializer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<E: NodeEmitter> SelectiveSerializer<E> {
    pub fn with_emitter(emitter: E) -> Self {
        Self { emitter }
    }

    /// Markup for the document body
    pub fn serialize(&mut self, doc: &Document, env: &Env) -> String {
        let mut out = String::new();
        self.serialize_children(doc, env, doc.body(), &mut out);
        tracing::debug!(bytes = out.len(), selser = env.selser_mode(), "Serialized document");
        out
    }

    fn serialize_children(&mut self, doc: &Document, env: &Env, parent: NodeId, out: &mut String) {
        let mut child = doc.tree.first_child(parent);
        while let Some(c) = child {
            child = self.serialize_node(doc, env, c, out);
        }
    }

    /// Emit `node` (and its about group); returns the next node to emit
    fn serialize_node(&mut self, doc: &Document, env: &Env, node: NodeId, out: &mut String) -> Option<NodeId> {
        let tree = &doc.tree;
        if let Some(text) = tree.text(node) {
            out.push_str(text);
            return tree.next_sibling(node);
        }
        if let Some(comment) = tree.comment(node) {
            let _ = write!(out, "<!--{}-->", decode_comment(comment));
            return tree.next_sibling(node);
        }
        if !tree.is_element(node) || tree.is_diff_marker(node, None) {
            return tree.next_sibling(node);
        }

        if tree.is_first_encapsulation_wrapper(node) {
            return self.serialize_encapsulated(doc, env, node, out);
        }

        if let Some(src) = reusable_source(doc, env, node) {
            out.push_str(src);
            return tree.next_sibling(node);
        }

        let mut content = String::new();
        self.serialize_children(doc, env, node, &mut content);
        out.push_str(&self.emitter.emit_element(doc, node, &content));
        tree.next_sibling(node)
    }

    fn serialize_encapsulated(&mut self, doc: &Document, env: &Env, node: NodeId, out: &mut String) -> Option<NodeId> {
        let group = doc.about_siblings(node);
        let next = group.last().and_then(|&l| doc.tree.next_sibling(l));

        let untouched = group.iter().all(|&n| !doc.has_diff_markers(n));
        if untouched {
            if let Some(src) = reusable_source(doc, env, node) {
                out.push_str(src);
                return next;
            }
        }

        if let Some(mw) = doc.data_mw(node).filter(|mw| !mw.parts.is_empty()) {
            let pi = doc
                .provenance(node)
                .and_then(|dp| dp.pi.as_deref())
                .unwrap_or_default();
            out.push_str(&mw.reconstruct(pi));
            return next;
        }

        if let Some(src) = doc.provenance(node).and_then(|dp| dp.src.as_deref()) {
            out.push_str(src);
            return next;
        }

        tracing::trace!(node = %node, "Encapsulated unit without source, emitting members");
        for &member in &group {
            let mut content = String::new();
            self.serialize_children(doc, env, member, &mut content);
            out.push_str(&self.emitter.emit_element(doc, member, &content));
        }
        next
    }
}

/// Original source of an unchanged element, in selser mode only
fn reusable_source<'e>(doc: &Document, env: &'e Env, node: NodeId) -> Option<&'e str> {
    if !env.selser_mode() || doc.has_diff_markers(node) || doc.is_new_elt(node) {
        return None;
    }
    doc.dsr(node)
        .filter(|d| d.is_valid())
        .and_then(|d| d.substr(env.page_src()))
}

/// Normalize and serialize an already parsed document
pub fn serialize_document(doc: &mut Document, env: &mut Env) -> EngineResult<String> {
    if env.selser_mode() && doc.diff().is_empty() {
        tracing::debug!("No change markers, reusing page source");
        return Ok(env.page_src().to_string());
    }
    let body = doc.body();
    normalize(doc, env, body)?;
    Ok(SelectiveSerializer::new().serialize(doc, env))
}

/// Convert edited HTML back to markup
pub fn html_to_wikitext(html: &str, env: &mut Env) -> EngineResult<String> {
    env.bump_html2wt_resource_use("htmlSize", html.len() as u64)?;
    let mut doc = HtmlParser::new().parse_body(html)?;
    serialize_document(&mut doc, env)
}
