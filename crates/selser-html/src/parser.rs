//! HTML5 Parser implementation
//!
//! Uses html5ever's RcDom and converts the `<body>` subtree into the
//! selser arena. Whitespace-only text is kept: separators matter for
//! source ranges and round trips.

use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Handle, NodeData as RcNodeData, RcDom};
use selser_dom::{Document, DomTree, NodeId};

use crate::HtmlError;

/// HTML5 parser
pub struct HtmlParser {
    load_data_attribs: bool,
}

impl HtmlParser {
    /// Parser that moves data attributes into the side tables
    pub fn new() -> Self {
        Self {
            load_data_attribs: true,
        }
    }

    /// Parser that leaves every attribute on its element
    pub fn raw() -> Self {
        Self {
            load_data_attribs: false,
        }
    }

    /// The returned dom owns the tree; dropping it empties `body`
    fn parse_rc(html: &str) -> Result<(RcDom, Handle), HtmlError> {
        let dom = parse_document(RcDom::default(), Default::default()).one(html);
        let body = find_body(&dom.document).ok_or(HtmlError::MissingBody)?;
        Ok((dom, body))
    }

    /// Parse a document; only the `<body>` subtree is kept
    pub fn parse_body(&self, html: &str) -> Result<Document, HtmlError> {
        tracing::debug!("Parsing HTML document ({} bytes)", html.len());

        let (_dom, body) = Self::parse_rc(html)?;
        let mut doc = Document::new();
        let target = doc.body();

        copy_attrs(&body, &mut doc.tree, target)?;
        for child in body.children.borrow().iter() {
            convert_node(child, &mut doc.tree, target)?;
        }
        if self.load_data_attribs {
            doc.load_data_attribs_deep(target)?;
        }

        tracing::debug!("Parsed {} nodes", doc.tree.len());
        Ok(doc)
    }

    /// Parse `html` as body content into a new fragment container of `doc`
    pub fn parse_fragment(&self, doc: &mut Document, html: &str) -> Result<NodeId, HtmlError> {
        let (_dom, body) = Self::parse_rc(html)?;
        let frag = doc.tree.create_fragment();
        for child in body.children.borrow().iter() {
            convert_node(child, &mut doc.tree, frag)?;
        }
        if self.load_data_attribs {
            doc.load_data_attribs_deep(frag)?;
        }
        Ok(frag)
    }
}

impl Default for HtmlParser {
    fn default() -> Self {
        Self::new()
    }
}

fn find_body(handle: &Handle) -> Option<Handle> {
    if let RcNodeData::Element { name, .. } = &handle.data {
        if name.local.as_ref() == "body" {
            return Some(handle.clone());
        }
    }
    handle.children.borrow().iter().find_map(find_body)
}

fn copy_attrs(handle: &Handle, tree: &mut DomTree, id: NodeId) -> Result<(), HtmlError> {
    if let RcNodeData::Element { attrs, .. } = &handle.data {
        for attr in attrs.borrow().iter() {
            tree.set_attr(id, attr.name.local.as_ref(), attr.value.to_string())?;
        }
    }
    Ok(())
}

/// Convert an RcDom node to our DOM format
fn convert_node(handle: &Handle, tree: &mut DomTree, parent: NodeId) -> Result<(), HtmlError> {
    match &handle.data {
        RcNodeData::Text { contents } => {
            let id = tree.create_text(&contents.borrow());
            tree.append_child(parent, id)?;
        }
        RcNodeData::Comment { contents } => {
            let id = tree.create_comment(contents);
            tree.append_child(parent, id)?;
        }
        RcNodeData::Element { name, .. } => {
            let id = tree.create_element(&name.local.to_ascii_lowercase());
            copy_attrs(handle, tree, id)?;
            tree.append_child(parent, id)?;
            for child in handle.children.borrow().iter() {
                convert_node(child, tree, id)?;
            }
        }
        RcNodeData::Document => {
            for child in handle.children.borrow().iter() {
                convert_node(child, tree, parent)?;
            }
        }
        RcNodeData::Doctype { .. } | RcNodeData::ProcessingInstruction { .. } => {}
    }
    Ok(())
}
