//! Structural predicates and sibling helpers over the tree
//!
//! "Deleted" siblings are `mw:DiffMarker/*` metas left in place of removed
//! nodes; the `*_non_deleted_*` helpers step over them. "Separators" are
//! inter-element whitespace, comments and diff markers.

use crate::{ConstructMarker, DiffMark, DomTree, NodeId};

/// Parents whose children are moved out by table foster parenting
const FOSTERABLE_PARENTS: &[&str] = &["table", "thead", "tbody", "tfoot", "tr"];

const FORMATTING_TAGS: &[&str] = &[
    "b", "big", "code", "em", "font", "i", "kbd", "nobr", "s", "small", "strike", "strong",
    "tt", "u",
];

const QUOTE_TAGS: &[&str] = &["i", "b"];

const TABLE_TAGS: &[&str] = &[
    "table", "tbody", "thead", "tfoot", "tr", "td", "th", "caption",
];

fn is_html_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0c')
}

impl DomTree {
    /// Is `id` a child of a table-structure element that does not allow
    /// text content?
    pub fn is_fosterable_position(&self, id: NodeId) -> bool {
        self.parent(id)
            .and_then(|p| self.tag_name(p))
            .is_some_and(|t| FOSTERABLE_PARENTS.contains(&t))
    }

    /// Inter-element whitespace: a text node with only HTML whitespace
    pub fn is_iew(&self, id: NodeId) -> bool {
        self.text(id)
            .is_some_and(|t| t.chars().all(is_html_whitespace))
    }

    pub fn is_formatting_elt(&self, id: NodeId) -> bool {
        self.tag_name(id).is_some_and(|t| FORMATTING_TAGS.contains(&t))
    }

    /// `<i>` and `<b>`, the tags wikitext quotes produce
    pub fn is_quote_tag(&self, id: NodeId) -> bool {
        self.tag_name(id).is_some_and(|t| QUOTE_TAGS.contains(&t))
    }

    pub fn is_heading(&self, id: NodeId) -> bool {
        self.tag_name(id).is_some_and(|t| {
            let b = t.as_bytes();
            b.len() == 2 && b[0] == b'h' && (b'1'..=b'6').contains(&b[1])
        })
    }

    pub fn is_table_tag(&self, id: NodeId) -> bool {
        self.tag_name(id).is_some_and(|t| TABLE_TAGS.contains(&t))
    }

    // ------------------------------------------------------------------
    // typeof
    // ------------------------------------------------------------------

    /// Whitespace-separated `typeof` tokens
    pub fn type_of_tokens(&self, id: NodeId) -> impl Iterator<Item = &str> {
        self.get_attr(id, "typeof")
            .unwrap_or_default()
            .split_ascii_whitespace()
    }

    pub fn has_type_of(&self, id: NodeId, token: &str) -> bool {
        self.type_of_tokens(id).any(|t| t == token)
    }

    /// Add a `typeof` token (no-op if present or not an element)
    pub fn add_type_of(&mut self, id: NodeId, token: &str) {
        if self.has_type_of(id, token) {
            return;
        }
        let value = match self.get_attr(id, "typeof") {
            Some(v) if !v.trim().is_empty() => format!("{v} {token}"),
            _ => token.to_string(),
        };
        if let Some(e) = self.element_mut(id) {
            e.set_attr("typeof", value);
        }
    }

    /// Drop every `typeof` token matching `pred`; removes the attribute when empty
    pub fn remove_type_of_where(&mut self, id: NodeId, pred: impl Fn(&str) -> bool) {
        let Some(current) = self.get_attr(id, "typeof") else {
            return;
        };
        let kept = current
            .split_ascii_whitespace()
            .filter(|t| !pred(t))
            .collect::<Vec<_>>()
            .join(" ");
        if let Some(e) = self.element_mut(id) {
            if kept.is_empty() {
                e.remove_attr("typeof");
            } else {
                e.set_attr("typeof", kept);
            }
        }
    }

    /// Construct markers present in `typeof`
    pub fn construct_markers(&self, id: NodeId) -> impl Iterator<Item = ConstructMarker> + '_ {
        self.type_of_tokens(id).filter_map(ConstructMarker::parse)
    }

    /// Transclusion/param marker token on any element
    pub fn match_tpl_type(&self, id: NodeId) -> Option<ConstructMarker> {
        self.construct_markers(id)
            .find(|m| m.kind.is_template_range())
    }

    /// `<meta>` start or end marker of a transclusion or parameter
    pub fn is_tpl_marker_meta(&self, id: NodeId) -> bool {
        self.is_tag(id, "meta") && self.match_tpl_type(id).is_some()
    }

    pub fn is_tpl_start_marker_meta(&self, id: NodeId) -> bool {
        self.is_tag(id, "meta") && self.match_tpl_type(id).is_some_and(|m| !m.is_end)
    }

    pub fn is_tpl_end_marker_meta(&self, id: NodeId) -> bool {
        self.is_tag(id, "meta") && self.match_tpl_type(id).is_some_and(|m| m.is_end)
    }

    /// Carries a first-encapsulation-wrapper type
    pub fn is_first_encapsulation_wrapper(&self, id: NodeId) -> bool {
        self.construct_markers(id)
            .any(|m| !m.is_end && m.kind.is_encapsulation())
    }

    // ------------------------------------------------------------------
    // Diff markers and sibling helpers
    // ------------------------------------------------------------------

    /// `<meta typeof="mw:DiffMarker/...">`, optionally of one kind
    pub fn is_diff_marker(&self, id: NodeId, mark: Option<DiffMark>) -> bool {
        if !self.is_tag(id, "meta") {
            return false;
        }
        self.type_of_tokens(id).any(|t| match t.strip_prefix("mw:DiffMarker/") {
            Some(kind) => mark.is_none_or(|m| m.as_str() == kind),
            None => false,
        })
    }

    /// Not a comment, whitespace or diff marker
    pub fn is_content_node(&self, id: NodeId) -> bool {
        !self.is_comment(id) && !self.is_iew(id) && !self.is_diff_marker(id, None)
    }

    fn is_separator(&self, id: NodeId) -> bool {
        !self.is_content_node(id)
    }

    pub fn next_non_deleted_sibling(&self, id: NodeId) -> Option<NodeId> {
        let mut n = self.next_sibling(id);
        while let Some(x) = n.filter(|&x| self.is_diff_marker(x, None)) {
            n = self.next_sibling(x);
        }
        n
    }

    pub fn previous_non_deleted_sibling(&self, id: NodeId) -> Option<NodeId> {
        let mut n = self.prev_sibling(id);
        while let Some(x) = n.filter(|&x| self.is_diff_marker(x, None)) {
            n = self.prev_sibling(x);
        }
        n
    }

    pub fn first_non_deleted_child(&self, id: NodeId) -> Option<NodeId> {
        let c = self.first_child(id)?;
        if self.is_diff_marker(c, None) {
            self.next_non_deleted_sibling(c)
        } else {
            Some(c)
        }
    }

    pub fn last_non_deleted_child(&self, id: NodeId) -> Option<NodeId> {
        let c = self.last_child(id)?;
        if self.is_diff_marker(c, None) {
            self.previous_non_deleted_sibling(c)
        } else {
            Some(c)
        }
    }

    pub fn num_non_deleted_children(&self, id: NodeId) -> usize {
        self.children(id)
            .filter(|&c| !self.is_diff_marker(c, None))
            .count()
    }

    pub fn next_non_sep_sibling(&self, id: NodeId) -> Option<NodeId> {
        let mut n = self.next_sibling(id);
        while let Some(x) = n.filter(|&x| self.is_separator(x)) {
            n = self.next_sibling(x);
        }
        n
    }

    pub fn first_non_sep_child(&self, id: NodeId) -> Option<NodeId> {
        let c = self.first_child(id)?;
        if self.is_separator(c) {
            self.next_non_sep_sibling(c)
        } else {
            Some(c)
        }
    }

    /// Exactly `n` children; diff markers are only counted on request
    pub fn has_n_children(&self, id: NodeId, n: usize, count_diff_markers: bool) -> bool {
        self.children(id)
            .filter(|&c| count_diff_markers || !self.is_diff_marker(c, None))
            .count()
            == n
    }

    /// Only diff markers and blank (space/tab) text below `id`; with
    /// `strict`, any text counts as content
    pub fn node_essentially_empty(&self, id: NodeId, strict: bool) -> bool {
        self.children(id).all(|c| {
            if self.is_element(c) {
                self.is_diff_marker(c, None)
            } else if let Some(t) = self.text(c) {
                !strict && t.chars().all(|ch| ch == ' ' || ch == '\t')
            } else {
                !self.is_comment(c)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn el(tree: &mut DomTree, parent: NodeId, tag: &str) -> NodeId {
        let id = tree.create_element(tag);
        tree.append_child(parent, id).unwrap();
        id
    }

    fn txt(tree: &mut DomTree, parent: NodeId, s: &str) -> NodeId {
        let id = tree.create_text(s);
        tree.append_child(parent, id).unwrap();
        id
    }

    #[test]
    fn test_fosterable_position() {
        let mut tree = DomTree::new();
        let table = el(&mut tree, NodeId::ROOT, "table");
        let tbody = el(&mut tree, table, "tbody");
        let tr = el(&mut tree, tbody, "tr");
        let td = el(&mut tree, tr, "td");
        let ws = txt(&mut tree, tbody, "\n");
        let inner = txt(&mut tree, td, "x");

        assert!(tree.is_fosterable_position(tbody));
        assert!(tree.is_fosterable_position(ws));
        assert!(tree.is_fosterable_position(td));
        assert!(!tree.is_fosterable_position(inner));
        assert!(tree.is_iew(ws));
        assert!(!tree.is_iew(inner));
    }

    #[test]
    fn test_type_of_helpers() {
        let mut tree = DomTree::new();
        let meta = el(&mut tree, NodeId::ROOT, "meta");
        tree.add_type_of(meta, "mw:Transclusion");
        tree.add_type_of(meta, "mw:Transclusion");
        tree.add_type_of(meta, "mw:Foo");
        assert_eq!(tree.get_attr(meta, "typeof"), Some("mw:Transclusion mw:Foo"));
        assert!(tree.is_tpl_start_marker_meta(meta));
        assert!(tree.is_first_encapsulation_wrapper(meta));

        tree.remove_type_of_where(meta, |t| t.starts_with("mw:"));
        assert_eq!(tree.get_attr(meta, "typeof"), None);
        assert!(!tree.is_tpl_marker_meta(meta));

        tree.add_type_of(meta, "mw:Param/End");
        assert!(tree.is_tpl_end_marker_meta(meta));
        assert!(!tree.is_first_encapsulation_wrapper(meta));
    }

    #[test]
    fn test_non_deleted_helpers() {
        let mut tree = DomTree::new();
        let p = el(&mut tree, NodeId::ROOT, "p");
        let marker = el(&mut tree, p, "meta");
        tree.set_attr(marker, "typeof", "mw:DiffMarker/deleted").unwrap();
        let b = el(&mut tree, p, "b");
        let marker2 = el(&mut tree, p, "meta");
        tree.set_attr(marker2, "typeof", "mw:DiffMarker/moved").unwrap();

        assert_eq!(tree.first_non_deleted_child(p), Some(b));
        assert_eq!(tree.last_non_deleted_child(p), Some(b));
        assert_eq!(tree.num_non_deleted_children(p), 1);
        assert!(tree.has_n_children(p, 1, false));
        assert!(tree.has_n_children(p, 3, true));
        assert!(tree.is_diff_marker(marker, Some(DiffMark::Deleted)));
        assert!(!tree.is_diff_marker(marker, Some(DiffMark::Moved)));
        assert_eq!(tree.next_non_deleted_sibling(b), None);
        assert_eq!(tree.previous_non_deleted_sibling(b), None);
    }

    #[test]
    fn test_essentially_empty() {
        let mut tree = DomTree::new();
        let h = el(&mut tree, NodeId::ROOT, "h2");
        txt(&mut tree, h, "  \t");
        assert!(tree.node_essentially_empty(h, false));
        assert!(!tree.node_essentially_empty(h, true));
        let c = tree.create_comment("x");
        tree.append_child(h, c).unwrap();
        assert!(!tree.node_essentially_empty(h, false));
        assert!(tree.is_heading(h));
    }
}
