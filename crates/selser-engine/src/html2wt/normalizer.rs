//! DOM normalization before serialization
//!
//! Edited HTML can contain several DOM shapes that serialize to the same
//! markup. The normalizer rewrites them into one canonical shape so the
//! serializer emits the most compact markup:
//!
//! - adjacent similar formatting elements are merged,
//!   `<b>X</b><b>Y</b>` becomes `<b>XY</b>`
//! - a formatting element wrapping a single similar child is swapped
//!   with it when that lets the child merge with a neighbour
//! - with `scrub_wikitext`, empty quotes and headings are removed, links
//!   are hoisted out of headings, trailing spaces move out of links and
//!   a few other simplifications apply
//!
//! In selective-serialization mode every rewrite leaves change markers
//! so that only the touched nodes lose their original source.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use selser_dom::{DiffMark, Document, NodeId};

use crate::{EngineError, EngineResult, Env};

static BIDI_AROUND_CATEGORY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([\x{200e}\x{200f}]+\n)?[\x{200e}\x{200f}]+$").expect("valid regex")
});

static TRAILING_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\t\n\x0B\x0C\r ]+$").expect("valid regex"));

// Cell content that would read as a row, caption or table-end marker
static ESCAPABLE_CELL_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-+}]").expect("valid regex"));

/// Attributes that do not affect whether two links are similar
const IGNORABLE_ATTRS: &[&str] = &["id", "title"];

const PHP_TRIM_CHARS: &[char] = &[' ', '\t', '\n', '\r', '\0', '\x0B'];

/// Normalize the subtree rooted at `root`
pub fn normalize(doc: &mut Document, env: &mut Env, root: NodeId) -> EngineResult<()> {
    DomNormalizer::new(doc, env).normalize(root)
}

pub struct DomNormalizer<'a> {
    doc: &'a mut Document,
    env: &'a mut Env,
    selser_mode: bool,
    in_inserted_content: bool,
}

impl<'a> DomNormalizer<'a> {
    pub fn new(doc: &'a mut Document, env: &'a mut Env) -> Self {
        let selser_mode = env.selser_mode();
        Self {
            doc,
            env,
            selser_mode,
            in_inserted_content: false,
        }
    }

    pub fn normalize(&mut self, root: NodeId) -> EngineResult<()> {
        tracing::trace!(%root, selser = self.selser_mode, "Normalizing DOM");
        self.process_node(root, true)?;
        Ok(())
    }

    fn scrub(&self) -> bool {
        self.env.config().scrub_wikitext
    }

    // ------------------------------------------------------------------
    // Similarity
    // ------------------------------------------------------------------

    fn attribs_equals(&self, a: NodeId, b: NodeId, ignorable: &[&str]) -> bool {
        let tree = &self.doc.tree;
        let (Some(ea), Some(eb)) = (tree.element(a), tree.element(b)) else {
            return false;
        };
        let collect = |attrs: &[selser_dom::Attribute]| -> BTreeMap<String, String> {
            attrs
                .iter()
                .filter(|at| !ignorable.contains(&at.name.as_str()))
                .map(|at| (at.name.clone(), at.value.clone()))
                .collect()
        };
        collect(&ea.attrs) == collect(&eb.attrs)
            && self.doc.data_mw(a) == self.doc.data_mw(b)
            && self.doc.about(a) == self.doc.about(b)
    }

    fn similar(&self, a: NodeId, b: NodeId) -> bool {
        if self.doc.tree.is_tag(a, "a") {
            return self.doc.tree.is_element(b) && self.attribs_equals(a, b, IGNORABLE_ATTRS);
        }
        let a_html = self.doc.is_literal_html(a);
        let b_html = self.doc.is_literal_html(b);
        (!a_html && !b_html) || (a_html && b_html && self.attribs_equals(a, b, &[]))
    }

    fn mergable(&self, a: NodeId, b: NodeId) -> bool {
        self.doc.tree.node_name(a) == self.doc.tree.node_name(b) && self.similar(a, b)
    }

    /// Can `a` be swapped with its only child so that the child merges
    /// with `b`?
    fn swappable(&self, a: NodeId, b: NodeId) -> bool {
        let tree = &self.doc.tree;
        if tree.num_non_deleted_children(a) != 1 {
            return false;
        }
        tree.first_non_deleted_child(a)
            .is_some_and(|c| self.similar(a, c) && self.mergable(c, b))
    }

    fn rewriteable_pair(&self, a: NodeId, b: NodeId) -> bool {
        // Pairs the edit did not touch serialize from their original source
        if self.selser_mode && !self.is_modified(a) && !self.is_modified(b) {
            return false;
        }
        let tree = &self.doc.tree;
        if tree.is_quote_tag(a) {
            return tree.is_quote_tag(b);
        }
        // Links are only rewritten when scrubbing, and only if one of
        // them was added by the edit
        self.scrub()
            && tree.is_tag(a, "a")
            && tree.is_tag(b, "a")
            && (self.doc.is_new_elt(a) || self.doc.is_new_elt(b))
    }

    fn is_modified(&self, node: NodeId) -> bool {
        self.doc.has_diff_markers(node) || self.doc.is_new_elt(node) || self.is_inserted_content(node)
    }

    /// Unmodified nodes whose source can be reused where they sit are
    /// left as they are in selser mode
    fn keeps_original_source(&self, node: NodeId) -> bool {
        self.selser_mode
            && !self.doc.at_the_top(node)
            && !self.is_modified(node)
            && self.orig_src_valid_in_edited_context(node)
    }

    fn is_inserted_content(&self, node: NodeId) -> bool {
        let mut cur = Some(node);
        while let Some(n) = cur {
            if self.doc.at_the_top(n) {
                return false;
            }
            if self.doc.tree.is_element(n) && self.doc.has_diff_mark(n, DiffMark::Inserted) {
                return true;
            }
            cur = self.doc.tree.parent(n);
        }
        false
    }

    // ------------------------------------------------------------------
    // Change markers
    // ------------------------------------------------------------------

    fn add_diff_marks(&mut self, node: NodeId, mark: DiffMark, dont_recurse: bool) -> EngineResult<()> {
        if !self.selser_mode || self.doc.has_diff_mark(node, mark) {
            return Ok(());
        }
        // Inserted content is serialized from scratch anyway
        if mark == DiffMark::Inserted && self.in_inserted_content {
            return Ok(());
        }

        if !self.doc.is_new_elt(node) {
            self.doc.add_diff_mark(node, mark)?;
            if matches!(mark, DiffMark::Inserted | DiffMark::Deleted) {
                if let Some(parent) = self.doc.tree.parent(node) {
                    self.add_diff_marks(parent, DiffMark::ChildrenChanged, true)?;
                }
            }
        }

        if dont_recurse {
            return Ok(());
        }
        let mut cur = self.doc.tree.parent(node);
        while let Some(p) = cur {
            if !self.doc.tree.is_element(p) || self.doc.at_the_top(p) {
                break;
            }
            if self.doc.has_diff_mark(p, DiffMark::SubtreeChanged) {
                return Ok(());
            }
            if !self.doc.is_new_elt(p) {
                self.doc.diff_mut().add(p, DiffMark::SubtreeChanged);
            }
            cur = self.doc.tree.parent(p);
        }
        Ok(())
    }

    fn mark_parent(&mut self, node: NodeId, mark: DiffMark, dont_recurse: bool) -> EngineResult<()> {
        match self.doc.tree.parent(node) {
            Some(p) => self.add_diff_marks(p, mark, dont_recurse),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Rewrites
    // ------------------------------------------------------------------

    /// Move the content of `b` into `a` and drop `b`
    fn merge(&mut self, a: NodeId, b: NodeId) -> EngineResult<NodeId> {
        let sentinel = self.doc.tree.first_child(b);

        // Deletion markers between the two end up inside `a`
        if let Some(next) = self.doc.tree.next_sibling(a).filter(|&n| n != b) {
            self.doc.tree.append_child(a, next)?;
        }

        self.doc.tree.migrate_children(b, a, None)?;
        self.doc.tree.detach(b);
        self.doc.tree.normalize_text(a);

        // Merged text goes away during text normalization
        if let Some(s) = sentinel.filter(|&s| self.doc.tree.parent(s).is_some()) {
            self.add_diff_marks(s, DiffMark::Moved, true)?;
        }
        self.add_diff_marks(a, DiffMark::ChildrenChanged, true)?;
        if let Some(next) = self.doc.tree.next_sibling(a) {
            self.add_diff_marks(next, DiffMark::Moved, false)?;
        }
        self.mark_parent(a, DiffMark::ChildrenChanged, false)?;
        Ok(a)
    }

    /// Make `b` (the only child of `a`) the parent of `a`
    fn swap(&mut self, a: NodeId, b: NodeId) -> EngineResult<NodeId> {
        let parent = self
            .doc
            .tree
            .parent(a)
            .ok_or_else(|| EngineError::invariant(format!("swap of detached node {a}")))?;
        self.doc.tree.migrate_children(b, a, None)?;
        self.doc.tree.insert_before(parent, b, Some(a))?;
        self.doc.tree.append_child(b, a)?;

        if let Some(fc) = self.doc.tree.first_child(a) {
            self.add_diff_marks(fc, DiffMark::Moved, true)?;
        }
        self.add_diff_marks(a, DiffMark::Moved, true)?;
        self.add_diff_marks(b, DiffMark::Moved, true)?;
        self.add_diff_marks(a, DiffMark::ChildrenChanged, true)?;
        self.add_diff_marks(b, DiffMark::ChildrenChanged, true)?;
        self.mark_parent(b, DiffMark::ChildrenChanged, false)?;
        Ok(b)
    }

    fn outer_child(&self, node: NodeId, rtl: bool) -> Option<NodeId> {
        if rtl {
            self.doc.tree.last_non_deleted_child(node)
        } else {
            self.doc.tree.first_non_deleted_child(node)
        }
    }

    /// Move category and other rendering-transparent links at the edge
    /// of `node` out of it
    fn hoist_links(&mut self, node: NodeId, rtl: bool) -> EngineResult<()> {
        let mut sibling = self.outer_child(node, rtl);
        let mut has_hoistable = false;
        while let Some(s) = sibling {
            let next = if rtl {
                self.doc.tree.previous_non_deleted_sibling(s)
            } else {
                self.doc.tree.next_non_deleted_sibling(s)
            };
            if self.doc.tree.is_content_node(s) {
                if !self.doc.is_rendering_transparent(s) || self.doc.is_encapsulation_wrapper(s) {
                    break;
                }
                has_hoistable = true;
            }
            sibling = next;
        }
        if !has_hoistable {
            return Ok(());
        }
        let Some(parent) = self.doc.tree.parent(node) else {
            return Ok(());
        };

        let first_moved = self.outer_child(node, rtl);
        let mut mv = first_moved;
        while let Some(m) = mv.filter(|&m| Some(m) != sibling) {
            let reference = if rtl {
                self.doc.tree.next_non_deleted_sibling(node)
            } else {
                Some(node)
            };
            self.doc.tree.insert_before(parent, m, reference)?;
            mv = self.outer_child(node, rtl);
        }

        if let Some(s) = sibling {
            if let Some(text) = self.doc.tree.text(s) {
                let trimmed = if rtl {
                    text.trim_end_matches(PHP_TRIM_CHARS)
                } else {
                    text.trim_start_matches(PHP_TRIM_CHARS)
                }
                .to_string();
                self.doc.tree.set_text(s, trimmed)?;
            }
        }

        if let Some(m) = first_moved {
            self.add_diff_marks(m, DiffMark::Moved, true)?;
        }
        if let Some(s) = sibling {
            self.add_diff_marks(s, DiffMark::Moved, true)?;
        }
        self.add_diff_marks(node, DiffMark::ChildrenChanged, true)?;
        self.add_diff_marks(parent, DiffMark::ChildrenChanged, false)
    }

    fn strip_if_empty(&mut self, node: NodeId) -> EngineResult<Option<NodeId>> {
        let next = self.doc.tree.next_non_deleted_sibling(node);
        if !self.doc.tree.node_essentially_empty(node, false) {
            return Ok(Some(node));
        }
        self.add_diff_marks(node, DiffMark::Deleted, true)?;
        self.doc.tree.detach(node);
        Ok(next)
    }

    fn move_trailing_spaces_out(&mut self, node: NodeId) -> EngineResult<()> {
        let tree = &self.doc.tree;
        let next = tree.next_non_deleted_sibling(node);
        let Some(last) = tree.last_non_deleted_child(node) else {
            return Ok(());
        };
        let Some(text) = tree.text(last) else {
            return Ok(());
        };
        let Some(m) = TRAILING_WHITESPACE.find(text) else {
            return Ok(());
        };
        let trailing = m.as_str().to_string();
        let kept = text[..m.start()].to_string();
        self.doc.tree.set_text(last, kept)?;

        if let Some(n) = next {
            let next_text = self.doc.tree.text(n).map(str::to_string);
            let starts_with_space = next_text
                .as_deref()
                .is_some_and(|t| t.starts_with(|c: char| c.is_ascii_whitespace()));
            if !starts_with_space {
                let target = match next_text {
                    Some(_) => n,
                    None => {
                        let parent = self.doc.tree.parent(n).ok_or_else(|| {
                            EngineError::invariant(format!("sibling {n} has no parent"))
                        })?;
                        let t = self.doc.tree.create_text("");
                        self.doc.tree.insert_before(parent, t, Some(n))?;
                        t
                    }
                };
                let merged = format!("{trailing}{}", self.doc.tree.text(target).unwrap_or_default());
                self.doc.tree.set_text(target, merged)?;
                self.add_diff_marks(target, DiffMark::Inserted, true)?;
            }
        }

        self.add_diff_marks(last, DiffMark::Inserted, true)?;
        self.mark_parent(node, DiffMark::ChildrenChanged, false)
    }

    fn strip_brs(&mut self, node: NodeId) -> EngineResult<()> {
        let children: Vec<NodeId> = self.doc.tree.children(node).collect();
        for child in children {
            if self.doc.tree.is_tag(child, "br") {
                let space = self.doc.tree.create_text(" ");
                self.doc.tree.replace_child(node, space, child)?;
            } else if self.doc.tree.is_element(child) {
                self.strip_brs(child)?;
            }
        }
        Ok(())
    }

    fn strip_bidi_chars_around_categories(&mut self, node: NodeId) -> EngineResult<Option<NodeId>> {
        let tree = &self.doc.tree;
        let Some(text) = tree.text(node) else {
            return Ok(Some(node));
        };
        let prev_is_cat = tree
            .prev_sibling(node)
            .is_some_and(|p| self.doc.is_category_link(p));
        let next = tree.next_sibling(node);
        let next_is_cat = next.is_some_and(|n| self.doc.is_category_link(n));
        if !prev_is_cat && !next_is_cat {
            return Ok(Some(node));
        }
        if next.is_some() && !next_is_cat {
            return Ok(Some(node));
        }

        let stripped = BIDI_AROUND_CATEGORY.replace(text, "");
        if stripped.len() == text.len() {
            return Ok(Some(node));
        }
        let stripped = stripped.into_owned();
        self.env.warn(
            "html2wt/bidi",
            "LRM/RLM unicode chars stripped around categories",
        );

        if stripped.is_empty() {
            let next = self.doc.tree.next_non_deleted_sibling(node);
            self.add_diff_marks(node, DiffMark::Deleted, false)?;
            self.doc.tree.detach(node);
            return Ok(next);
        }
        self.doc.tree.set_text(node, stripped)?;
        self.add_diff_marks(node, DiffMark::Inserted, false)?;
        Ok(Some(node))
    }

    /// `<a href="./Foo"><b>Foo</b></a>` becomes `<b><a href="./Foo">Foo</a></b>`
    fn move_format_tag_outside_a_tag(&mut self, node: NodeId) -> EngineResult<Option<NodeId>> {
        if let Some(sibling) = self.doc.tree.next_non_deleted_sibling(node) {
            self.normalize_sibling_pair(node, sibling)?;
        }

        let tree = &self.doc.tree;
        let first_child = tree.first_non_deleted_child(node);
        let Some(href) = tree.get_attr(node, "href").map(str::to_string) else {
            let html = selser_html::HtmlSerializer::new()
                .serialize_outer(self.doc, node)
                .unwrap_or_else(|_| node.to_string());
            self.env
                .error("normalize/href", format!("href is missing from a tag: {html}"));
            return Ok(Some(node));
        };

        let Some(fc) = first_child.filter(|&c| tree.is_element(c)) else {
            return Ok(Some(node));
        };
        let single = tree.next_non_deleted_sibling(fc).is_none();
        let styled = ["color", "style", "class"]
            .iter()
            .any(|a| tree.has_attr(node, a));
        let target = href.strip_prefix("./").unwrap_or(&href);
        if !single || styled || tree.text_content(node) != target {
            return Ok(Some(node));
        }

        while let Some(child) = self
            .doc
            .tree
            .first_non_deleted_child(node)
            .filter(|&c| self.doc.tree.is_formatting_elt(c))
        {
            self.swap(node, child)?;
        }
        Ok(Some(fc))
    }

    /// Can the original source of an unmodified node be reused where it
    /// now sits?
    fn orig_src_valid_in_edited_context(&self, node: NodeId) -> bool {
        let tree = &self.doc.tree;
        let is_redirect = tree.is_tag(node, "link")
            && tree
                .get_attr(node, "rel")
                .is_some_and(|r| r.split_ascii_whitespace().any(|t| t == "mw:PageProp/redirect"));
        if is_redirect {
            return tree.parent(node) == Some(self.doc.body()) && tree.prev_sibling(node).is_none();
        }

        if tree.is_tag(node, "td") || tree.is_tag(node, "th") {
            // The first cell on a line is written differently
            let Some(prev) = tree.prev_sibling(node) else {
                return true;
            };
            if !tree.is_diff_marker(prev, None)
                && !(tree.is_element(prev) && self.doc.has_diff_mark(prev, DiffMark::Inserted))
                && !self.doc.has_diff_mark(prev, DiffMark::ChildrenChanged)
            {
                return true;
            }
            return self
                .doc
                .provenance(node)
                .and_then(|dp| dp.stx.as_deref())
                != Some("row");
        }

        if tree.is_tag(node, "tr") {
            let has_start_tag_src = self
                .doc
                .provenance(node)
                .is_some_and(|dp| dp.extra.contains_key("startTagSrc"));
            if !has_start_tag_src {
                // Only valid while it stays the first row
                let mut prev = tree.prev_sibling(node);
                while let Some(p) = prev.filter(|&p| !tree.is_content_node(p)) {
                    prev = tree.prev_sibling(p);
                }
                return prev.is_none();
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Driver
    // ------------------------------------------------------------------

    /// Rewrite one node; returns the node processing continues with
    fn normalize_node(&mut self, node: NodeId) -> EngineResult<Option<NodeId>> {
        let tree = &self.doc.tree;
        if tree.is_tag(node, "td") || tree.is_tag(node, "th") {
            if let Some(v) = self.doc.provenance(node).and_then(|dp| dp.stx_v.clone()) {
                self.doc.provenance_mut(node).stx = Some(v);
            }
        }

        if !self.scrub() {
            return Ok(Some(node));
        }

        if self.env.config().scrub_bidi_chars && self.doc.tree.is_text(node) {
            let next = self.strip_bidi_chars_around_categories(node)?;
            if next != Some(node) {
                return Ok(next);
            }
        }

        if self.keeps_original_source(node) {
            return Ok(Some(node));
        }

        let tree = &self.doc.tree;
        if tree.is_heading(node) {
            self.hoist_links(node, false)?;
            self.hoist_links(node, true)?;
            self.strip_brs(node)?;
            return self.strip_if_empty(node);
        }

        if tree.is_quote_tag(node) {
            return self.strip_if_empty(node);
        }

        if tree.is_tag(node, "a") {
            if tree.get_attr(node, "rel") == Some("mw:WikiLink") {
                let next = self.strip_if_empty(node)?;
                if next != Some(node) {
                    return Ok(next);
                }
            }
            self.move_trailing_spaces_out(node)?;
            return self.move_format_tag_outside_a_tag(node);
        }

        if tree.is_tag(node, "td") {
            let stx = self.doc.provenance(node).and_then(|dp| dp.stx.clone());
            let first_in_row = tree.parent(node).and_then(|p| tree.first_non_sep_child(p)) == Some(node);
            if stx.as_deref() == Some("html") || (!first_in_row && stx.as_deref() == Some("row")) {
                return Ok(Some(node));
            }
            if let Some(first) = tree.first_non_deleted_child(node) {
                if let Some(text) = tree.text(first).filter(|t| ESCAPABLE_CELL_PREFIX.is_match(t)) {
                    let escaped = format!(" {text}");
                    self.doc.tree.set_text(first, escaped)?;
                    self.add_diff_marks(first, DiffMark::Inserted, false)?;
                }
            }
            return Ok(Some(node));
        }

        if tree.is_tag(node, "font") && tree.element(node).is_some_and(|e| e.attrs.is_empty()) {
            let next = tree.next_non_deleted_sibling(node);
            if let Some(parent) = tree.parent(node) {
                self.doc.tree.migrate_children(node, parent, Some(node))?;
                self.doc.tree.detach(node);
            }
            return Ok(next);
        }

        let empty_p = tree.is_tag(node, "p")
            && !self.doc.is_literal_html(node)
            && tree.has_n_children(node, 0, true)
            && tree.parent(node).is_some_and(|p| !tree.has_n_children(p, 1, false));
        if empty_p {
            // Two newlines are a paragraph break, so an empty paragraph
            // followed by another one becomes a line break in it
            let next = tree.next_non_sep_sibling(node);
            if let Some(n) = next.filter(|&n| tree.is_tag(n, "p") && !self.doc.is_literal_html(n)) {
                let br = self.doc.tree.create_element("br");
                let first = self.doc.tree.first_child(n);
                self.doc.tree.insert_before(n, br, first)?;
                if !self.is_inserted_content(n) {
                    self.add_diff_marks(br, DiffMark::Inserted, false)?;
                }
                self.add_diff_marks(node, DiffMark::Deleted, false)?;
                self.doc.tree.detach(node);
            }
            return Ok(next);
        }

        Ok(Some(node))
    }

    fn normalize_sibling_pair(&mut self, a: NodeId, b: NodeId) -> EngineResult<NodeId> {
        if !self.rewriteable_pair(a, b) {
            return Ok(b);
        }

        if self.mergable(a, b) {
            let a = self.merge(a, b)?;
            // The merged children may now be mergable themselves
            self.process_subtree(a, false)?;
            return Ok(a);
        }

        if self.swappable(a, b) {
            let child = self
                .doc
                .tree
                .first_non_deleted_child(a)
                .ok_or_else(|| EngineError::invariant(format!("swappable {a} has no child")))?;
            let a = self.swap(a, child)?;
            let a = self.merge(a, b)?;
            self.process_subtree(a, false)?;
            return Ok(a);
        }

        if self.swappable(b, a) {
            let child = self
                .doc
                .tree
                .first_non_deleted_child(b)
                .ok_or_else(|| EngineError::invariant(format!("swappable {b} has no child")))?;
            let b = self.swap(b, child)?;
            let a = self.merge(a, b)?;
            self.process_subtree(a, false)?;
            return Ok(a);
        }

        Ok(b)
    }

    fn process_subtree(&mut self, node: NodeId, recurse: bool) -> EngineResult<()> {
        let Some(first) = self.doc.tree.first_non_deleted_child(node) else {
            return Ok(());
        };
        let mut a = self.process_node(first, recurse)?;
        while let Some(cur) = a {
            let Some(b) = self.doc.tree.next_non_deleted_sibling(cur) else {
                return Ok(());
            };
            let b = self.process_node(b, recurse)?;
            a = match b {
                // `b` may have been removed or replaced while processing
                Some(b) if self.doc.tree.previous_non_deleted_sibling(b) == Some(cur) => {
                    Some(self.normalize_sibling_pair(cur, b)?)
                }
                other => other,
            };
        }
        Ok(())
    }

    fn process_node(&mut self, node: NodeId, recurse: bool) -> EngineResult<Option<NodeId>> {
        let mut node = Some(node);
        loop {
            // Generated content is left alone
            while let Some(n) = node.filter(|&n| self.doc.tree.is_first_encapsulation_wrapper(n)) {
                node = self.doc.skip_over_encapsulated_content(n);
            }
            let Some(n) = node else {
                return Ok(None);
            };

            // Neither the element nor its subtree is rewritten
            if self.doc.tree.is_element(n) && self.keeps_original_source(n) {
                tracing::trace!(node = %n, "Keeping unmodified subtree");
                return Ok(Some(n));
            }

            let inserted_subtree =
                self.doc.tree.is_element(n) && self.doc.has_diff_mark(n, DiffMark::Inserted);
            if inserted_subtree {
                if self.in_inserted_content {
                    return Err(EngineError::invariant(format!(
                        "inserted node {n} nested inside inserted content"
                    )));
                }
                self.in_inserted_content = true;
            }

            let result = self.process_children_then_node(n, recurse);
            if inserted_subtree {
                self.in_inserted_content = false;
            }
            let next = result?;

            if next == Some(n) {
                return Ok(next);
            }
            node = next;
        }
    }

    fn process_children_then_node(&mut self, node: NodeId, recurse: bool) -> EngineResult<Option<NodeId>> {
        if recurse && self.doc.tree.is_element(node) {
            self.process_subtree(node, true)?;
        }
        self.normalize_node(node)
    }
}
