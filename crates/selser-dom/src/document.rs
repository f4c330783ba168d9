//! Document - tree plus node-keyed side tables
//!
//! Side tables replace per-node data attributes while a document is being
//! processed. `load_data_attribs` moves `data-parsoid`, `data-mw`, `about`
//! and `data-parsoid-diff` from element attributes into the tables;
//! `data_attributes` produces them again for serialization.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    Attribute, DataMw, DiffMark, DiffMarks, DiffStore, DomError, DomResult, DomSourceRange,
    DomTree, NodeId, Provenance,
};

/// About ids minted by the pipeline start with this prefix
pub const PARSOID_ABOUT_PREFIX: &str = "#mwt";

#[derive(Serialize, Deserialize)]
struct DiffAttr {
    diff: Vec<String>,
}

/// Options for [`Document::data_attributes`]
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreOptions {
    /// Keep pipeline-internal `tmp` data in `data-parsoid`
    pub keep_tmp: bool,
    /// Emit change markers as `data-parsoid-diff`
    pub store_diff_marks: bool,
}

/// HTML Document
#[derive(Debug, Clone)]
pub struct Document {
    /// The DOM tree
    pub tree: DomTree,
    body: NodeId,
    provenance: HashMap<NodeId, Provenance>,
    data_mw: HashMap<NodeId, DataMw>,
    abouts: HashMap<NodeId, String>,
    diff: DiffStore,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty document with a `<body>`
    pub fn new() -> Self {
        let (tree, body) = DomTree::with_root_element("body");
        Self {
            tree,
            body,
            provenance: HashMap::new(),
            data_mw: HashMap::new(),
            abouts: HashMap::new(),
            diff: DiffStore::new(),
        }
    }

    /// Get `<body>` element
    pub fn body(&self) -> NodeId {
        self.body
    }

    /// `<body>`, a fragment container or the document root
    pub fn at_the_top(&self, id: NodeId) -> bool {
        id == self.body || id == NodeId::ROOT || self.tree.is_fragment(id)
    }

    // ------------------------------------------------------------------
    // Provenance
    // ------------------------------------------------------------------

    pub fn provenance(&self, id: NodeId) -> Option<&Provenance> {
        self.provenance.get(&id)
    }

    /// Provenance record, created empty on first access
    pub fn provenance_mut(&mut self, id: NodeId) -> &mut Provenance {
        self.provenance.entry(id).or_default()
    }

    pub fn set_provenance(&mut self, id: NodeId, dp: Provenance) {
        self.provenance.insert(id, dp);
    }

    pub fn dsr(&self, id: NodeId) -> Option<DomSourceRange> {
        self.provenance(id).and_then(|dp| dp.dsr)
    }

    pub fn is_literal_html(&self, id: NodeId) -> bool {
        self.tree.is_element(id) && self.provenance(id).is_some_and(Provenance::is_literal_html)
    }

    // ------------------------------------------------------------------
    // data-mw
    // ------------------------------------------------------------------

    pub fn data_mw(&self, id: NodeId) -> Option<&DataMw> {
        self.data_mw.get(&id)
    }

    pub fn set_data_mw(&mut self, id: NodeId, mw: DataMw) {
        self.data_mw.insert(id, mw);
    }

    pub fn take_data_mw(&mut self, id: NodeId) -> Option<DataMw> {
        self.data_mw.remove(&id)
    }

    // ------------------------------------------------------------------
    // About groups
    // ------------------------------------------------------------------

    pub fn about(&self, id: NodeId) -> Option<&str> {
        self.abouts.get(&id).map(String::as_str)
    }

    pub fn set_about(&mut self, id: NodeId, about: &str) {
        self.abouts.insert(id, about.to_string());
    }

    pub fn remove_about(&mut self, id: NodeId) -> Option<String> {
        self.abouts.remove(&id)
    }

    pub fn has_parsoid_about_id(&self, id: NodeId) -> bool {
        self.about(id)
            .is_some_and(|a| a.starts_with(PARSOID_ABOUT_PREFIX))
    }

    /// `id` plus the following siblings in the same about group.
    ///
    /// Whitespace in fosterable positions does not break the group, but
    /// trailing whitespace is not part of it.
    pub fn about_siblings(&self, id: NodeId) -> Vec<NodeId> {
        let mut nodes = vec![id];
        let Some(about) = self.about(id) else {
            return nodes;
        };

        let mut n = self.tree.next_sibling(id);
        while let Some(x) = n {
            let same_group = self.tree.is_element(x) && self.about(x) == Some(about);
            let fostered_ws = self.tree.is_fosterable_position(x)
                && !self.tree.is_element(x)
                && self.tree.is_iew(x);
            if !(same_group || fostered_ws) {
                break;
            }
            nodes.push(x);
            n = self.tree.next_sibling(x);
        }

        while nodes.len() > 1 && nodes.last().is_some_and(|&l| self.tree.is_iew(l)) {
            nodes.pop();
        }
        nodes
    }

    /// Sibling after the about group that `id` starts
    pub fn skip_over_encapsulated_content(&self, id: NodeId) -> Option<NodeId> {
        if self.tree.is_element(id) && self.about(id).is_some() {
            let group = self.about_siblings(id);
            group.last().and_then(|&l| self.tree.next_sibling(l))
        } else {
            self.tree.next_sibling(id)
        }
    }

    /// Walk back over the about group to the wrapper carrying the
    /// construct type
    pub fn find_first_encapsulation_wrapper(&self, id: NodeId) -> Option<NodeId> {
        if !self.has_parsoid_about_id(id) {
            return None;
        }
        let about = self.about(id)?;
        let mut node = id;
        while let Some(prev) = self.tree.previous_non_deleted_sibling(node) {
            if self.tree.is_element(prev) && self.about(prev) == Some(about) {
                node = prev;
            } else {
                break;
            }
        }
        self.tree
            .is_first_encapsulation_wrapper(node)
            .then_some(node)
    }

    pub fn is_encapsulation_wrapper(&self, id: NodeId) -> bool {
        self.tree.is_element(id) && self.find_first_encapsulation_wrapper(id).is_some()
    }

    /// Node added by an edit; for generated content the wrapper decides
    pub fn is_new_elt(&self, id: NodeId) -> bool {
        if !self.tree.is_element(id) {
            return false;
        }
        let node = self.find_first_encapsulation_wrapper(id).unwrap_or(id);
        self.provenance(node).is_some_and(Provenance::is_new)
    }

    // ------------------------------------------------------------------
    // Links and rendering-transparent nodes
    // ------------------------------------------------------------------

    fn rel_tokens(&self, id: NodeId) -> impl Iterator<Item = &str> {
        self.tree
            .get_attr(id, "rel")
            .unwrap_or_default()
            .split_ascii_whitespace()
    }

    pub fn is_category_link(&self, id: NodeId) -> bool {
        self.tree.is_tag(id, "link")
            && self
                .rel_tokens(id)
                .any(|t| t.split('#').next() == Some("mw:PageProp/Category"))
    }

    /// Category, redirect and language links: they do not start a new line
    pub fn is_sol_transparent_link(&self, id: NodeId) -> bool {
        self.tree.is_tag(id, "link")
            && self.rel_tokens(id).any(|t| {
                t.strip_prefix("mw:PageProp/")
                    .and_then(|rest| rest.split('#').next())
                    .is_some_and(|name| matches!(name, "Category" | "redirect" | "Language"))
            })
    }

    /// Nodes that produce no rendered output
    pub fn is_rendering_transparent(&self, id: NodeId) -> bool {
        if self.tree.is_comment(id) || self.is_sol_transparent_link(id) {
            return true;
        }
        if self.tree.is_tag(id, "meta") {
            let shadow_tag = self
                .tree
                .type_of_tokens(id)
                .any(|t| t == "mw:StartTag" || t == "mw:EndTag");
            return shadow_tag || !self.is_literal_html(id);
        }
        self.tree.is_tag(id, "span") && self.tree.has_type_of(id, "mw:FallbackId")
    }

    // ------------------------------------------------------------------
    // Change markers
    // ------------------------------------------------------------------

    pub fn diff(&self) -> &DiffStore {
        &self.diff
    }

    pub fn diff_mut(&mut self) -> &mut DiffStore {
        &mut self.diff
    }

    pub fn has_diff_mark(&self, id: NodeId, mark: DiffMark) -> bool {
        self.diff.has(id, mark)
    }

    pub fn has_diff_markers(&self, id: NodeId) -> bool {
        self.diff.has_any(id)
    }

    /// Record a change marker. A deletion also leaves a
    /// `mw:DiffMarker/deleted` meta in the node's place.
    pub fn add_diff_mark(&mut self, id: NodeId, mark: DiffMark) -> DomResult<()> {
        if mark == DiffMark::Deleted {
            if let Some(parent) = self.tree.parent(id) {
                let meta = self.tree.create_element("meta");
                self.tree.set_attr(meta, "typeof", "mw:DiffMarker/deleted")?;
                self.tree.insert_before(parent, meta, Some(id))?;
            }
        }
        tracing::trace!(node = %id, mark = ?mark, "Adding diff mark");
        self.diff.add(id, mark);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Wrapping
    // ------------------------------------------------------------------

    /// Wrap every run of text/comment children of `parent` in a `<span>`
    /// flagged as a pipeline wrapper, starting at `start_at` if given.
    /// Returns the new wrappers.
    pub fn add_span_wrappers(
        &mut self,
        parent: NodeId,
        start_at: Option<NodeId>,
    ) -> DomResult<Vec<NodeId>> {
        let children: Vec<NodeId> = self.tree.children(parent).collect();
        let mut started = start_at.is_none();
        let mut accum = Vec::new();
        let mut wrappers = Vec::new();

        for child in children {
            if !started {
                if Some(child) != start_at {
                    continue;
                }
                started = true;
            }
            if self.tree.is_text(child) || self.tree.is_comment(child) {
                accum.push(child);
            } else if !accum.is_empty() {
                wrappers.push(self.wrap_accum(parent, &accum)?);
                accum.clear();
            }
        }
        if !accum.is_empty() {
            wrappers.push(self.wrap_accum(parent, &accum)?);
        }
        Ok(wrappers)
    }

    fn wrap_accum(&mut self, parent: NodeId, nodes: &[NodeId]) -> DomResult<NodeId> {
        let span = self.tree.create_element("span");
        self.tree.insert_before(parent, span, nodes.first().copied())?;
        for &n in nodes {
            self.tree.append_child(span, n)?;
        }
        self.provenance_mut(span).tmp.wrapper = true;
        Ok(span)
    }

    // ------------------------------------------------------------------
    // Data attributes
    // ------------------------------------------------------------------

    /// Move data attributes of one element into the side tables
    pub fn load_data_attribs(&mut self, id: NodeId) -> DomResult<()> {
        let Some(elem) = self.tree.element_mut(id) else {
            return Ok(());
        };
        let dp = elem.remove_attr("data-parsoid");
        let mw = elem.remove_attr("data-mw");
        let about = elem.remove_attr("about");
        let diff = elem.remove_attr("data-parsoid-diff");

        if let Some(json) = dp {
            let dp: Provenance = serde_json::from_str(&json).map_err(|source| {
                DomError::InvalidDataAttribute {
                    attr: "data-parsoid",
                    source,
                }
            })?;
            self.provenance.insert(id, dp);
        }
        if let Some(json) = mw {
            let mw: DataMw = serde_json::from_str(&json).map_err(|source| {
                DomError::InvalidDataAttribute {
                    attr: "data-mw",
                    source,
                }
            })?;
            self.data_mw.insert(id, mw);
        }
        if let Some(about) = about {
            self.abouts.insert(id, about);
        }
        if let Some(json) = diff {
            let parsed: DiffAttr = serde_json::from_str(&json).map_err(|source| {
                DomError::InvalidDataAttribute {
                    attr: "data-parsoid-diff",
                    source,
                }
            })?;
            let marks = DiffMarks::parse_list(parsed.diff.iter().map(String::as_str))?;
            self.diff.set(id, marks);
        }
        Ok(())
    }

    /// [`Self::load_data_attribs`] for `id` and its whole subtree
    pub fn load_data_attribs_deep(&mut self, id: NodeId) -> DomResult<()> {
        self.load_data_attribs(id)?;
        let nodes: Vec<NodeId> = self.tree.descendants(id).collect();
        for n in nodes {
            if let Err(e) = self.load_data_attribs(n) {
                tracing::debug!(node = %n, error = %e, "Rejected data attributes");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Side-table data of `id` rendered as attributes
    pub fn data_attributes(&self, id: NodeId, opts: StoreOptions) -> DomResult<Vec<Attribute>> {
        let mut attrs = Vec::new();
        if !self.tree.is_element(id) {
            return Ok(attrs);
        }

        if let Some(about) = self.about(id) {
            attrs.push(Attribute {
                name: "about".to_string(),
                value: about.to_string(),
            });
        }
        if let Some(dp) = self.provenance(id) {
            let dp = if opts.keep_tmp {
                dp.clone()
            } else {
                dp.without_tmp()
            };
            if dp != Provenance::default() {
                let value = serde_json::to_string(&dp).map_err(|source| {
                    DomError::InvalidDataAttribute {
                        attr: "data-parsoid",
                        source,
                    }
                })?;
                attrs.push(Attribute {
                    name: "data-parsoid".to_string(),
                    value,
                });
            }
        }
        if let Some(mw) = self.data_mw(id) {
            let value = serde_json::to_string(mw).map_err(|source| {
                DomError::InvalidDataAttribute {
                    attr: "data-mw",
                    source,
                }
            })?;
            attrs.push(Attribute {
                name: "data-mw".to_string(),
                value,
            });
        }
        let marks = self.diff.marks(id);
        if opts.store_diff_marks && !marks.is_empty() {
            let value = serde_json::to_string(&DiffAttr {
                diff: marks.names().into_iter().map(String::from).collect(),
            })
            .map_err(|source| DomError::InvalidDataAttribute {
                attr: "data-parsoid-diff",
                source,
            })?;
            attrs.push(Attribute {
                name: "data-parsoid-diff".to_string(),
                value,
            });
        }
        Ok(attrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn el(doc: &mut Document, parent: NodeId, tag: &str) -> NodeId {
        let id = doc.tree.create_element(tag);
        doc.tree.append_child(parent, id).unwrap();
        id
    }

    #[test]
    fn test_new_document_has_body() {
        let doc = Document::new();
        assert_eq!(doc.tree.parent(doc.body()), Some(NodeId::ROOT));
        assert!(doc.tree.is_tag(doc.body(), "body"));
        assert!(doc.at_the_top(doc.body()));
    }

    #[test]
    fn test_about_siblings_and_skip() {
        let mut doc = Document::new();
        let body = doc.body();
        let a = el(&mut doc, body, "p");
        let b = el(&mut doc, body, "div");
        let c = el(&mut doc, body, "p");
        doc.set_about(a, "#mwt1");
        doc.set_about(b, "#mwt1");
        doc.tree.set_attr(a, "typeof", "mw:Transclusion").unwrap();

        assert_eq!(doc.about_siblings(a), vec![a, b]);
        assert_eq!(doc.skip_over_encapsulated_content(a), Some(c));
        assert_eq!(doc.find_first_encapsulation_wrapper(b), Some(a));
        assert!(doc.is_encapsulation_wrapper(b));
        assert!(!doc.is_encapsulation_wrapper(c));
    }

    #[test]
    fn test_about_siblings_drops_trailing_whitespace() {
        let mut doc = Document::new();
        let body = doc.body();
        let table = el(&mut doc, body, "table");
        let tbody = el(&mut doc, table, "tbody");
        let tr1 = el(&mut doc, tbody, "tr");
        let ws = doc.tree.create_text("\n");
        doc.tree.append_child(tbody, ws).unwrap();
        let tr2 = el(&mut doc, tbody, "tr");
        let ws2 = doc.tree.create_text("\n");
        doc.tree.append_child(tbody, ws2).unwrap();
        doc.set_about(tr1, "#mwt2");
        doc.set_about(tr2, "#mwt2");

        assert_eq!(doc.about_siblings(tr1), vec![tr1, ws, tr2]);
    }

    #[test]
    fn test_is_new_elt_uses_wrapper() {
        let mut doc = Document::new();
        let body = doc.body();
        let a = el(&mut doc, body, "span");
        let b = el(&mut doc, body, "span");
        doc.set_about(a, "#mwt3");
        doc.set_about(b, "#mwt3");
        doc.tree.set_attr(a, "typeof", "mw:Transclusion").unwrap();
        doc.provenance_mut(a).tmp.is_new = true;
        assert!(doc.is_new_elt(b));
    }

    #[test]
    fn test_links() {
        let mut doc = Document::new();
        let body = doc.body();
        let link = el(&mut doc, body, "link");
        doc.tree.set_attr(link, "rel", "mw:PageProp/Category").unwrap();
        assert!(doc.is_category_link(link));
        assert!(doc.is_sol_transparent_link(link));
        assert!(doc.is_rendering_transparent(link));

        doc.tree.set_attr(link, "rel", "mw:PageProp/redirect").unwrap();
        assert!(!doc.is_category_link(link));
        assert!(doc.is_sol_transparent_link(link));
    }

    #[test]
    fn test_add_deleted_mark_leaves_meta() {
        let mut doc = Document::new();
        let body = doc.body();
        let p = el(&mut doc, body, "p");
        doc.add_diff_mark(p, DiffMark::Deleted).unwrap();
        let prev = doc.tree.prev_sibling(p).unwrap();
        assert!(doc.tree.is_diff_marker(prev, Some(DiffMark::Deleted)));
        assert!(doc.has_diff_mark(p, DiffMark::Deleted));
    }

    #[test]
    fn test_span_wrappers() {
        let mut doc = Document::new();
        let body = doc.body();
        let t1 = doc.tree.create_text("a");
        let c1 = doc.tree.create_comment("c");
        doc.tree.append_child(body, t1).unwrap();
        doc.tree.append_child(body, c1).unwrap();
        let b = el(&mut doc, body, "b");
        let t2 = doc.tree.create_text("z");
        doc.tree.append_child(body, t2).unwrap();

        let wrappers = doc.add_span_wrappers(body, None).unwrap();
        assert_eq!(wrappers.len(), 2);
        assert_eq!(doc.tree.children(wrappers[0]).collect::<Vec<_>>(), vec![t1, c1]);
        assert_eq!(doc.tree.next_sibling(wrappers[0]), Some(b));
        assert!(doc.provenance(wrappers[1]).unwrap().tmp.wrapper);
    }

    #[test]
    fn test_load_and_store_data_attribs() {
        let mut doc = Document::new();
        let body = doc.body();
        let span = el(&mut doc, body, "span");
        doc.tree
            .set_attr(span, "data-parsoid", r#"{"dsr":[0,3,null,null],"tmp":{"wrapper":true}}"#)
            .unwrap();
        doc.tree.set_attr(span, "about", "#mwt9").unwrap();
        doc.tree
            .set_attr(span, "data-parsoid-diff", r#"{"diff":["inserted"]}"#)
            .unwrap();
        doc.load_data_attribs(span).unwrap();

        assert!(doc.tree.element(span).unwrap().attrs.is_empty());
        assert_eq!(doc.dsr(span), Some(DomSourceRange::new(0, 3)));
        assert_eq!(doc.about(span), Some("#mwt9"));
        assert!(doc.has_diff_mark(span, DiffMark::Inserted));

        let attrs = doc.data_attributes(span, StoreOptions::default()).unwrap();
        let names: Vec<_> = attrs.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["about", "data-parsoid"]);
        assert_eq!(attrs[1].value, r#"{"dsr":[0,3,null,null]}"#);

        let kept = doc
            .data_attributes(
                span,
                StoreOptions {
                    keep_tmp: true,
                    store_diff_marks: true,
                },
            )
            .unwrap();
        assert!(kept[1].value.contains("\"wrapper\":true"));
        assert_eq!(kept[2].value, r#"{"diff":["inserted"]}"#);
    }

    #[test]
    fn test_load_rejects_unknown_diff_mark() {
        let mut doc = Document::new();
        let body = doc.body();
        let span = el(&mut doc, body, "span");
        doc.tree
            .set_attr(span, "data-parsoid-diff", r#"{"diff":["renamed"]}"#)
            .unwrap();
        assert!(matches!(
            doc.load_data_attribs(span),
            Err(DomError::UnknownDiffMark(_))
        ));
    }

    #[test]
    fn test_load_deep_stops_at_nested_bad_marker() {
        let mut doc = Document::new();
        let body = doc.body();
        let p = el(&mut doc, body, "p");
        let span = el(&mut doc, p, "span");
        doc.tree
            .set_attr(span, "data-parsoid-diff", r#"{"diff":["renamed"]}"#)
            .unwrap();
        assert!(matches!(
            doc.load_data_attribs_deep(p),
            Err(DomError::UnknownDiffMark(ref name)) if name == "renamed"
        ));
        assert!(!doc.has_diff_markers(span));
    }
}
