//! Test-fixture edits
//!
//! Applies a change tree to a parsed document the way an editor would,
//! so the round trip of partially edited documents can be tested. A
//! change tree is a JSON array with one entry per child node:
//!
//! | entry   | effect                                          |
//! |---------|-------------------------------------------------|
//! | `0`     | no change                                       |
//! | `1`     | add a random `data-foobar` attribute            |
//! | `2`     | insert a new node before the child              |
//! | `3`     | delete the child                                |
//! | `4`     | replace the child with a new node               |
//! | `[...]` | apply the nested change tree to the child       |
//!
//! The single-entry tree `[5]` appends a comment with known content to
//! the body instead. Every edit records the matching change markers.

use serde::{Deserialize, Serialize};
use selser_dom::{DiffMark, Document, NodeId};

use crate::{EngineResult, Env};

/// Comment appended by the `[5]` change tree
pub const STATIC_RANDOM_STRING: &str = "ahseeyooxooZ8Oon0boh";

const KIND: &str = "selser/changes";

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "h1", "h2", "h3", "h4", "h5", "h6", "pre", "blockquote", "table", "ul", "ol",
    "dl", "hr", "center",
];

/// One entry of a change tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Change {
    Code(u8),
    Nested(Vec<Change>),
}

/// Parse a change tree from its JSON form, e.g. `[0, [2], 3]`
pub fn parse_change_tree(json: &str) -> Result<Vec<Change>, serde_json::Error> {
    serde_json::from_str(json)
}

/// Deterministic string source seeded from the change tree
#[derive(Debug)]
struct RandomStrings {
    state: u64,
}

impl RandomStrings {
    fn seeded(seed: &str) -> Self {
        // FNV-1a
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for b in seed.bytes() {
            h ^= u64::from(b);
            h = h.wrapping_mul(0x0100_0000_01b3);
        }
        Self { state: h | 1 }
    }

    fn next_u32(&mut self) -> u32 {
        // xorshift64*
        self.state ^= self.state >> 12;
        self.state ^= self.state << 25;
        self.state ^= self.state >> 27;
        (self.state.wrapping_mul(0x2545_f491_4f6c_dd1d) >> 32) as u32
    }

    /// Base-36 rendering of the next value
    fn next_string(&mut self) -> String {
        let mut n = self.next_u32();
        if n == 0 {
            return "0".to_string();
        }
        let mut digits = Vec::new();
        while n > 0 {
            let d = (n % 36) as u8;
            digits.push(if d < 10 { b'0' + d } else { b'a' + d - 10 });
            n /= 36;
        }
        digits.reverse();
        String::from_utf8_lossy(&digits).into_owned()
    }
}

struct ChangeApplier<'a> {
    doc: &'a mut Document,
    env: &'a mut Env,
    rng: RandomStrings,
}

/// Apply `changes` to the body of `doc`
pub fn apply_changes(doc: &mut Document, env: &mut Env, changes: &[Change], seed: &str) -> EngineResult<()> {
    let body = doc.body();
    let tree_json = serde_json::to_string(changes).unwrap_or_default();
    tracing::debug!(changes = %tree_json, "Applying change tree");

    if changes == [Change::Code(5)] {
        let comment = doc.tree.create_comment(STATIC_RANDOM_STRING);
        doc.tree.append_child(body, comment)?;
        doc.add_diff_mark(comment, DiffMark::Inserted)?;
        doc.diff_mut().add(body, DiffMark::ChildrenChanged);
        return Ok(());
    }
    if changes.is_empty() {
        return Ok(());
    }

    let mut applier = ChangeApplier {
        doc,
        env,
        rng: RandomStrings::seeded(&format!("{tree_json}{seed}")),
    };
    applier.apply(body, changes)
}

impl ChangeApplier<'_> {
    fn apply(&mut self, node: NodeId, changes: &[Change]) -> EngineResult<()> {
        let children: Vec<NodeId> = self.doc.tree.children(node).collect();
        if children.len() < changes.len() {
            self.env.warn(
                KIND,
                format!(
                    "more changes ({}) than nodes ({}) to apply them to; ignoring the rest",
                    changes.len(),
                    children.len()
                ),
            );
        }

        for (&child, change) in children.iter().zip(changes) {
            match change {
                Change::Nested(nested) => self.apply(child, nested)?,
                Change::Code(0) => {}
                Change::Code(1) => {
                    if self.doc.tree.is_element(child) {
                        let value = self.rng.next_string();
                        self.doc.tree.set_attr(child, "data-foobar", value)?;
                        self.mark_changed(child)?;
                    } else {
                        self.env.error(
                            KIND,
                            "Buggy changetree. changetype 1 (modify attribute) cannot be applied on text/comment nodes.",
                        );
                    }
                }
                Change::Code(2) => self.insert_new_node(child)?,
                Change::Code(3) => self.remove_node(child)?,
                Change::Code(4) => {
                    self.insert_new_node(child)?;
                    self.remove_node(child)?;
                }
                Change::Code(other) => {
                    self.env.warn(KIND, format!("unknown change type {other}"));
                }
            }
        }
        Ok(())
    }

    /// Insert a node before `n` that fits its container
    fn insert_new_node(&mut self, n: NodeId) -> EngineResult<()> {
        let tree = &self.doc.tree;
        let mut n = n;
        // Keep legacy anchor spans next to their heading
        if tree.is_tag(n, "span") && tree.has_type_of(n, "mw:FallbackId") {
            match tree.next_sibling(n).or_else(|| tree.parent(n)) {
                Some(x) => n = x,
                None => return Ok(()),
            }
        }
        let Some(parent) = tree.parent(n) else {
            return Ok(());
        };

        let wrapper = match tree.tag_name(parent) {
            Some("ol" | "ul") => Some("li".to_string()),
            Some("dl") => Some("dd".to_string()),
            Some("tr") => {
                let prev = tree.children(parent).take_while(|&c| c != n).filter(|&c| tree.is_element(c)).last();
                let next = std::iter::successors(tree.next_sibling(n), |&c| tree.next_sibling(c))
                    .find(|&c| tree.is_element(c));
                let name = prev
                    .or(next)
                    .and_then(|c| tree.tag_name(c))
                    .unwrap_or("td");
                Some(name.to_string())
            }
            Some("body") => Some("p".to_string()),
            _ if self.is_block_node_with_visible_wt(n) => Some("p".to_string()),
            _ => None,
        };
        let fostered = tree.is_fosterable_position(n) && !tree.is_tag(parent, "tr");

        let text = self.rng.next_string();
        let new_node = if fostered {
            self.doc.tree.create_comment(&text)
        } else if let Some(name) = wrapper {
            let el = self.doc.tree.create_element(&name);
            let t = self.doc.tree.create_text(&text);
            self.doc.tree.append_child(el, t)?;
            el
        } else {
            self.doc.tree.create_text(&text)
        };
        self.doc.tree.insert_before(parent, new_node, Some(n))?;

        self.doc.add_diff_mark(new_node, DiffMark::Inserted)?;
        self.mark_parent(new_node)
    }

    fn remove_node(&mut self, n: NodeId) -> EngineResult<()> {
        let parent = self.doc.tree.parent(n);
        self.doc.add_diff_mark(n, DiffMark::Deleted)?;
        self.doc.tree.detach(n);
        match parent {
            Some(p) => self.mark_subtree_changed(p, true),
            None => Ok(()),
        }
    }

    fn is_block_node_with_visible_wt(&self, n: NodeId) -> bool {
        self.doc
            .tree
            .tag_name(n)
            .is_some_and(|t| BLOCK_TAGS.contains(&t))
            && !self.doc.is_literal_html(n)
    }

    /// An element whose own markup changed
    fn mark_changed(&mut self, node: NodeId) -> EngineResult<()> {
        self.doc.diff_mut().add(node, DiffMark::SubtreeChanged);
        match self.doc.tree.parent(node) {
            Some(p) => self.mark_subtree_changed(p, false),
            None => Ok(()),
        }
    }

    fn mark_parent(&mut self, node: NodeId) -> EngineResult<()> {
        match self.doc.tree.parent(node) {
            Some(p) => self.mark_subtree_changed(p, true),
            None => Ok(()),
        }
    }

    /// Flag `node` (children-changed when its child list changed) and
    /// every ancestor below the body as subtree-changed
    fn mark_subtree_changed(&mut self, node: NodeId, children_changed: bool) -> EngineResult<()> {
        if children_changed {
            self.doc.diff_mut().add(node, DiffMark::ChildrenChanged);
        }
        let mut cur = Some(node);
        while let Some(n) = cur {
            if self.doc.at_the_top(n) {
                break;
            }
            self.doc.diff_mut().add(n, DiffMark::SubtreeChanged);
            cur = self.doc.tree.parent(n);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use selser_html::HtmlParser;

    fn setup(html: &str) -> (Document, Env) {
        let doc = HtmlParser::new().parse_body(html).unwrap();
        (doc, Env::new(Config::default(), "").with_selser_mode(true))
    }

    #[test]
    fn test_parse_change_tree() {
        let tree = parse_change_tree("[0, [2, 0], 3]").unwrap();
        assert_eq!(
            tree,
            vec![
                Change::Code(0),
                Change::Nested(vec![Change::Code(2), Change::Code(0)]),
                Change::Code(3),
            ]
        );
    }

    #[test]
    fn test_random_strings_are_deterministic() {
        let mut a = RandomStrings::seeded("[1]x");
        let mut b = RandomStrings::seeded("[1]x");
        let first = a.next_string();
        assert_eq!(first, b.next_string());
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a.next_string(), first);
    }

    #[test]
    fn test_modify_attribute() {
        let (mut doc, mut env) = setup("<p>a</p><p>b</p>");
        apply_changes(&mut doc, &mut env, &[Change::Code(0), Change::Code(1)], "t").unwrap();
        let body = doc.body();
        let second = doc.tree.last_child(body).unwrap();
        assert!(doc.tree.has_attr(second, "data-foobar"));
        assert!(doc.has_diff_mark(second, DiffMark::SubtreeChanged));
        let first = doc.tree.first_child(body).unwrap();
        assert!(!doc.has_diff_markers(first));
    }

    #[test]
    fn test_modify_attribute_on_text_is_reported() {
        let (mut doc, mut env) = setup("<p>a</p>");
        let changes = parse_change_tree("[[1]]").unwrap();
        apply_changes(&mut doc, &mut env, &changes, "t").unwrap();
        assert_eq!(env.diagnostics_of_kind(KIND).count(), 1);
    }

    #[test]
    fn test_insert_in_body_wraps_in_paragraph() {
        let (mut doc, mut env) = setup("<p>a</p>");
        apply_changes(&mut doc, &mut env, &[Change::Code(2)], "t").unwrap();
        let body = doc.body();
        let first = doc.tree.first_child(body).unwrap();
        assert!(doc.tree.is_tag(first, "p"));
        assert!(doc.has_diff_mark(first, DiffMark::Inserted));
        assert_eq!(doc.tree.num_children(body), 2);
    }

    #[test]
    fn test_insert_in_list_uses_list_item() {
        let (mut doc, mut env) = setup("<ul><li>a</li></ul>");
        let changes = parse_change_tree("[[2]]").unwrap();
        apply_changes(&mut doc, &mut env, &changes, "t").unwrap();
        let ul = doc.tree.first_child(doc.body()).unwrap();
        let inserted = doc.tree.first_child(ul).unwrap();
        assert!(doc.tree.is_tag(inserted, "li"));
        assert!(doc.has_diff_mark(ul, DiffMark::ChildrenChanged));
    }

    #[test]
    fn test_delete_leaves_marker() {
        let (mut doc, mut env) = setup("<p>a</p><p>b</p>");
        apply_changes(&mut doc, &mut env, &[Change::Code(3)], "t").unwrap();
        let body = doc.body();
        let first = doc.tree.first_child(body).unwrap();
        assert!(doc.tree.is_diff_marker(first, Some(DiffMark::Deleted)));
        assert_eq!(doc.tree.text_content(body), "b");
    }

    #[test]
    fn test_replace() {
        let (mut doc, mut env) = setup("<p>a<b>x</b></p>");
        let changes = parse_change_tree("[[0, 4]]").unwrap();
        apply_changes(&mut doc, &mut env, &changes, "t").unwrap();
        let p = doc.tree.first_child(doc.body()).unwrap();
        assert!(!doc.tree.tree_has_element(p, "b"));
        assert!(doc.has_diff_mark(p, DiffMark::ChildrenChanged));
        let inserted = doc.tree.children(p).find(|&c| doc.has_diff_mark(c, DiffMark::Inserted)).unwrap();
        assert!(doc.tree.is_text(inserted));
    }

    #[test]
    fn test_surplus_changes_are_ignored() {
        let (mut doc, mut env) = setup("<p>a</p>");
        apply_changes(&mut doc, &mut env, &[Change::Code(0), Change::Code(3)], "t").unwrap();
        assert_eq!(env.diagnostics_of_kind(KIND).count(), 1);
        assert_eq!(doc.tree.text_content(doc.body()), "a");
    }

    #[test]
    fn test_known_comment_is_appended() {
        let (mut doc, mut env) = setup("<p>a</p>");
        apply_changes(&mut doc, &mut env, &[Change::Code(5)], "t").unwrap();
        let last = doc.tree.last_child(doc.body()).unwrap();
        assert_eq!(doc.tree.comment(last), Some(STATIC_RANDOM_STRING));
    }
}
