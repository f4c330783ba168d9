//! HTML serialization of the selser DOM
//!
//! Side-table data is written back as `about`, `data-parsoid`, `data-mw`
//! and `data-parsoid-diff` attributes only when the serializer is built
//! with [`StoreOptions`].

use std::fmt::Write as _;

use selser_dom::{Document, NodeData, NodeId, StoreOptions};

use crate::HtmlError;

/// Elements that never have an end tag
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Elements whose text is emitted unescaped
const RAW_TEXT_ELEMENTS: &[&str] = &[
    "script", "style", "xmp", "iframe", "noembed", "noframes", "plaintext",
];

/// HTML serializer
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlSerializer {
    store: Option<StoreOptions>,
}

impl HtmlSerializer {
    /// Serializer that emits element attributes only
    pub fn new() -> Self {
        Self { store: None }
    }

    /// Serializer that also emits the side-table data of each element
    pub fn with_data_attributes(opts: StoreOptions) -> Self {
        Self { store: Some(opts) }
    }

    /// Markup of `id` itself
    pub fn serialize_outer(&self, doc: &Document, id: NodeId) -> Result<String, HtmlError> {
        let mut out = String::new();
        self.write_node(doc, id, &mut out)?;
        Ok(out)
    }

    /// Markup of the children of `id`
    pub fn serialize_inner(&self, doc: &Document, id: NodeId) -> Result<String, HtmlError> {
        let mut out = String::new();
        for child in doc.tree.children(id) {
            self.write_node(doc, child, &mut out)?;
        }
        Ok(out)
    }

    /// Markup of the body content
    pub fn serialize_body(&self, doc: &Document) -> Result<String, HtmlError> {
        self.serialize_inner(doc, doc.body())
    }

    fn write_node(&self, doc: &Document, id: NodeId, out: &mut String) -> Result<(), HtmlError> {
        let Some(node) = doc.tree.get(id) else {
            return Ok(());
        };
        match &node.data {
            NodeData::Text(t) => {
                let raw = doc
                    .tree
                    .parent(id)
                    .and_then(|p| doc.tree.tag_name(p))
                    .is_some_and(|t| RAW_TEXT_ELEMENTS.contains(&t));
                if raw {
                    out.push_str(t);
                } else {
                    out.push_str(&html_escape::encode_text(t));
                }
            }
            NodeData::Comment(c) => {
                let _ = write!(out, "<!--{c}-->");
            }
            NodeData::Element(elem) => {
                out.push('<');
                out.push_str(&elem.name);
                for attr in &elem.attrs {
                    write_attr(out, &attr.name, &attr.value);
                }
                if let Some(opts) = self.store {
                    for attr in doc.data_attributes(id, opts)? {
                        write_attr(out, &attr.name, &attr.value);
                    }
                }
                out.push('>');

                if VOID_ELEMENTS.contains(&elem.name.as_str()) {
                    return Ok(());
                }
                for child in doc.tree.children(id) {
                    self.write_node(doc, child, out)?;
                }
                let _ = write!(out, "</{}>", elem.name);
            }
            NodeData::Document | NodeData::Fragment => {
                for child in doc.tree.children(id) {
                    self.write_node(doc, child, out)?;
                }
            }
        }
        Ok(())
    }
}

fn write_attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    out.push_str(&html_escape::encode_double_quoted_attribute(value));
    out.push('"');
}
