//! DOM Tree (arena-based allocation)
//!
//! Nodes are never freed: a removed node is only unlinked, so its id
//! (and any side-table record keyed by it) stays valid for the lifetime
//! of the tree.

use crate::{DomError, DomResult, ElementData, Node, NodeData, NodeId};

/// Arena-based DOM tree
#[derive(Debug, Clone)]
pub struct DomTree {
    nodes: Vec<Node>,
}

impl Default for DomTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DomTree {
    /// Create a tree holding only the document root
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::document()],
        }
    }

    /// Create a tree whose root has a single element child
    pub fn with_root_element(name: &str) -> (Self, NodeId) {
        let mut root = Node::document();
        let mut child = Node::element(name);
        let id = NodeId(1);
        root.first_child = id;
        root.last_child = id;
        child.parent = NodeId::ROOT;
        (
            Self {
                nodes: vec![root, child],
            },
            id,
        )
    }

    /// Root (document) node
    #[inline]
    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Get a node by ID
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// Get a mutable node by ID
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index())
    }

    fn node(&self, id: NodeId) -> DomResult<&Node> {
        self.get(id).ok_or(DomError::NotFound(id))
    }

    fn node_mut(&mut self, id: NodeId) -> DomResult<&mut Node> {
        self.get_mut(id).ok_or(DomError::NotFound(id))
    }

    /// Number of nodes ever allocated
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if tree is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Allocate a detached element
    pub fn create_element(&mut self, name: &str) -> NodeId {
        self.push(Node::element(name))
    }

    /// Allocate a detached text node
    pub fn create_text(&mut self, content: &str) -> NodeId {
        self.push(Node::text(content))
    }

    /// Allocate a detached comment node (value is DOM-escaped)
    pub fn create_comment(&mut self, content: &str) -> NodeId {
        self.push(Node::comment(content))
    }

    /// Allocate an empty fragment container
    pub fn create_fragment(&mut self) -> NodeId {
        self.push(Node::fragment())
    }

    // ------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.parent.to_option())
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.first_child.to_option())
    }

    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.last_child.to_option())
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.next_sibling.to_option())
    }

    pub fn prev_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.prev_sibling.to_option())
    }

    /// Iterate over the children of a node
    pub fn children(&self, id: NodeId) -> Children<'_> {
        Children {
            tree: self,
            next: self.first_child(id),
        }
    }

    /// Pre-order iterator over all descendants (not including `id`)
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        Descendants {
            tree: self,
            root: id,
            next: self.first_child(id),
        }
    }

    pub fn num_children(&self, id: NodeId) -> usize {
        self.children(id).count()
    }

    pub fn has_children(&self, id: NodeId) -> bool {
        self.first_child(id).is_some()
    }

    /// A node that has been unlinked has no parent
    pub fn is_attached(&self, id: NodeId) -> bool {
        self.parent(id).is_some()
    }

    // ------------------------------------------------------------------
    // Node data
    // ------------------------------------------------------------------

    pub fn is_element(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(Node::is_element)
    }

    pub fn is_text(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(Node::is_text)
    }

    pub fn is_comment(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(Node::is_comment)
    }

    pub fn is_fragment(&self, id: NodeId) -> bool {
        self.get(id)
            .is_some_and(|n| matches!(n.data, NodeData::Fragment))
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        self.get(id).and_then(Node::as_element)
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut ElementData> {
        self.get_mut(id).and_then(Node::as_element_mut)
    }

    /// Lowercase tag name for elements
    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|e| e.name.as_str())
    }

    /// Check that `id` is an element named `tag`
    pub fn is_tag(&self, id: NodeId, tag: &str) -> bool {
        self.tag_name(id) == Some(tag)
    }

    /// DOM-style node name
    pub fn node_name(&self, id: NodeId) -> &str {
        match self.get(id).map(|n| &n.data) {
            Some(NodeData::Element(e)) => &e.name,
            Some(NodeData::Text(_)) => "#text",
            Some(NodeData::Comment(_)) => "#comment",
            Some(NodeData::Fragment) => "#document-fragment",
            Some(NodeData::Document) => "#document",
            None => "",
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        self.get(id).and_then(Node::as_text)
    }

    pub fn comment(&self, id: NodeId) -> Option<&str> {
        self.get(id).and_then(Node::as_comment)
    }

    /// Replace the value of a text or comment node
    pub fn set_text(&mut self, id: NodeId, value: impl Into<String>) -> DomResult<()> {
        match &mut self.node_mut(id)?.data {
            NodeData::Text(t) | NodeData::Comment(t) => {
                *t = value.into();
                Ok(())
            }
            _ => Err(DomError::NotFound(id)),
        }
    }

    pub fn get_attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id).and_then(|e| e.get_attr(name))
    }

    pub fn has_attr(&self, id: NodeId, name: &str) -> bool {
        self.element(id).is_some_and(|e| e.has_attr(name))
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: impl Into<String>) -> DomResult<()> {
        self.element_mut(id)
            .ok_or(DomError::NotAnElement(id))?
            .set_attr(name, value);
        Ok(())
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Option<String> {
        self.element_mut(id).and_then(|e| e.remove_attr(name))
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    fn unlink(&mut self, id: NodeId) {
        let Some(node) = self.get(id) else {
            return;
        };
        let (parent, prev, next) = (node.parent, node.prev_sibling, node.next_sibling);
        if !parent.is_valid() {
            return;
        }

        if let Some(p) = self.get_mut(prev) {
            p.next_sibling = next;
        } else if let Some(p) = self.get_mut(parent) {
            p.first_child = next;
        }
        if let Some(n) = self.get_mut(next) {
            n.prev_sibling = prev;
        } else if let Some(p) = self.get_mut(parent) {
            p.last_child = prev;
        }

        if let Some(node) = self.get_mut(id) {
            node.parent = NodeId::NONE;
            node.prev_sibling = NodeId::NONE;
            node.next_sibling = NodeId::NONE;
        }
    }

    /// Unlink a node from its parent; the subtree stays intact
    pub fn detach(&mut self, id: NodeId) {
        self.unlink(id);
    }

    fn check_insertable(&self, parent: NodeId, child: NodeId) -> DomResult<()> {
        self.node(parent)?;
        self.node(child)?;
        if child == NodeId::ROOT || self.is_ancestor_of(child, parent) || child == parent {
            return Err(DomError::HierarchyRequest { parent, child });
        }
        Ok(())
    }

    /// Append `child` as the last child of `parent`, moving it if attached
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> DomResult<()> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` before `reference` (or append when `None`)
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> DomResult<()> {
        if reference == Some(child) {
            return Ok(());
        }
        self.check_insertable(parent, child)?;
        if let Some(r) = reference {
            if self.parent(r) != Some(parent) {
                return Err(DomError::NotAChild { parent, child: r });
            }
        }

        self.unlink(child);

        let prev = match reference {
            Some(r) => self.node(r)?.prev_sibling,
            None => self.node(parent)?.last_child,
        };
        let next = reference.unwrap_or(NodeId::NONE);

        {
            let node = self.node_mut(child)?;
            node.parent = parent;
            node.prev_sibling = prev;
            node.next_sibling = next;
        }
        match self.get_mut(prev) {
            Some(p) => p.next_sibling = child,
            None => self.node_mut(parent)?.first_child = child,
        }
        match self.get_mut(next) {
            Some(n) => n.prev_sibling = child,
            None => self.node_mut(parent)?.last_child = child,
        }
        Ok(())
    }

    /// Replace `old_child` with `new_child`
    pub fn replace_child(
        &mut self,
        parent: NodeId,
        new_child: NodeId,
        old_child: NodeId,
    ) -> DomResult<()> {
        if new_child == old_child {
            return Ok(());
        }
        if self.parent(old_child) != Some(parent) {
            return Err(DomError::NotAChild {
                parent,
                child: old_child,
            });
        }
        self.insert_before(parent, new_child, Some(old_child))?;
        self.unlink(old_child);
        Ok(())
    }

    /// Move every child of `from` under `to`, before `before` (or at the end)
    pub fn migrate_children(
        &mut self,
        from: NodeId,
        to: NodeId,
        before: Option<NodeId>,
    ) -> DomResult<()> {
        while let Some(child) = self.first_child(from) {
            self.insert_before(to, child, before)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Structure queries
    // ------------------------------------------------------------------

    /// The node followed by all its ancestors
    pub fn path_to_root(&self, id: NodeId) -> Vec<NodeId> {
        let mut path = vec![id];
        let mut cur = id;
        while let Some(p) = self.parent(cur) {
            path.push(p);
            cur = p;
        }
        path
    }

    /// Is `ancestor` a proper ancestor of `node`?
    pub fn is_ancestor_of(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cur = self.parent(node);
        while let Some(p) = cur {
            if p == ancestor {
                return true;
            }
            cur = self.parent(p);
        }
        false
    }

    /// True if `b` is `a` or one of `a`'s following siblings
    pub fn in_sibling_order(&self, a: NodeId, b: NodeId) -> bool {
        let mut cur = Some(a);
        while let Some(n) = cur {
            if n == b {
                return true;
            }
            cur = self.next_sibling(n);
        }
        false
    }

    /// Concatenated text of all descendant text nodes
    pub fn text_content(&self, id: NodeId) -> String {
        if let Some(t) = self.text(id) {
            return t.to_string();
        }
        self.descendants(id)
            .filter_map(|d| self.text(d))
            .collect()
    }

    /// Is there an element named `tag` anywhere below `id`?
    pub fn tree_has_element(&self, id: NodeId, tag: &str) -> bool {
        self.descendants(id).any(|d| self.is_tag(d, tag))
    }

    /// Merge adjacent text nodes and drop empty ones, recursively
    pub fn normalize_text(&mut self, id: NodeId) {
        let mut child = self.first_child(id);
        while let Some(c) = child {
            let next = self.next_sibling(c);
            match self.get(c).map(|n| &n.data) {
                Some(NodeData::Text(_)) => {
                    let mut merged = self.text(c).unwrap_or_default().to_string();
                    let mut after = next;
                    while let Some(n) = after.filter(|&n| self.is_text(n)) {
                        merged.push_str(self.text(n).unwrap_or_default());
                        after = self.next_sibling(n);
                        self.unlink(n);
                    }
                    if merged.is_empty() {
                        self.unlink(c);
                    } else if let Some(NodeData::Text(t)) = self.get_mut(c).map(|n| &mut n.data) {
                        *t = merged;
                    }
                    child = after;
                    continue;
                }
                Some(NodeData::Element(_)) => self.normalize_text(c),
                _ => {}
            }
            child = next;
        }
    }
}

/// Iterator over the children of a node
pub struct Children<'a> {
    tree: &'a DomTree,
    next: Option<NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let cur = self.next?;
        self.next = self.tree.next_sibling(cur);
        Some(cur)
    }
}

/// Pre-order iterator over a subtree
pub struct Descendants<'a> {
    tree: &'a DomTree,
    root: NodeId,
    next: Option<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let cur = self.next?;
        self.next = match self.tree.first_child(cur) {
            Some(c) => Some(c),
            None => {
                let mut n = cur;
                loop {
                    if n == self.root {
                        break None;
                    }
                    if let Some(s) = self.tree.next_sibling(n) {
                        break Some(s);
                    }
                    match self.tree.parent(n) {
                        Some(p) if p != self.root => n = p,
                        _ => break None,
                    }
                }
            }
        };
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build() -> (DomTree, NodeId, NodeId, NodeId, NodeId) {
        let mut tree = DomTree::new();
        let body = tree.create_element("body");
        tree.append_child(tree.root(), body).unwrap();
        let a = tree.create_element("b");
        let t = tree.create_text("x");
        let c = tree.create_element("i");
        tree.append_child(body, a).unwrap();
        tree.append_child(a, t).unwrap();
        tree.append_child(body, c).unwrap();
        (tree, body, a, t, c)
    }

    #[test]
    fn test_append_and_links() {
        let (tree, body, a, t, c) = build();
        assert_eq!(tree.first_child(body), Some(a));
        assert_eq!(tree.last_child(body), Some(c));
        assert_eq!(tree.next_sibling(a), Some(c));
        assert_eq!(tree.prev_sibling(c), Some(a));
        assert_eq!(tree.parent(t), Some(a));
        assert_eq!(tree.children(body).collect::<Vec<_>>(), vec![a, c]);
    }

    #[test]
    fn test_with_root_element_links_child() {
        let (tree, body) = DomTree::with_root_element("body");
        assert_eq!(tree.parent(body), Some(NodeId::ROOT));
        assert_eq!(tree.first_child(NodeId::ROOT), Some(body));
        assert_eq!(tree.last_child(NodeId::ROOT), Some(body));
        assert_eq!(tree.tag_name(body), Some("body"));
    }

    #[test]
    fn test_insert_before_moves_node() {
        let (mut tree, body, a, t, c) = build();
        tree.insert_before(body, t, Some(a)).unwrap();
        assert_eq!(tree.children(body).collect::<Vec<_>>(), vec![t, a, c]);
        assert!(!tree.has_children(a));
    }

    #[test]
    fn test_hierarchy_error() {
        let (mut tree, body, a, _, _) = build();
        assert!(matches!(
            tree.append_child(a, body),
            Err(DomError::HierarchyRequest { .. })
        ));
    }

    #[test]
    fn test_replace_and_migrate() {
        let (mut tree, body, a, t, c) = build();
        let span = tree.create_element("span");
        tree.replace_child(body, span, a).unwrap();
        assert!(!tree.is_attached(a));
        tree.migrate_children(a, span, None).unwrap();
        assert_eq!(tree.parent(t), Some(span));
        assert_eq!(tree.children(body).collect::<Vec<_>>(), vec![span, c]);
    }

    #[test]
    fn test_descendants_preorder() {
        let (tree, body, a, t, c) = build();
        assert_eq!(tree.descendants(body).collect::<Vec<_>>(), vec![a, t, c]);
        assert_eq!(tree.descendants(a).collect::<Vec<_>>(), vec![t]);
    }

    #[test]
    fn test_sibling_order_and_paths() {
        let (tree, body, a, t, c) = build();
        assert!(tree.in_sibling_order(a, c));
        assert!(!tree.in_sibling_order(c, a));
        assert!(tree.in_sibling_order(a, a));
        assert_eq!(tree.path_to_root(t), vec![t, a, body, NodeId::ROOT]);
        assert!(tree.is_ancestor_of(body, t));
        assert!(!tree.is_ancestor_of(c, t));
    }

    #[test]
    fn test_normalize_text() {
        let mut tree = DomTree::new();
        let p = tree.create_element("p");
        tree.append_child(tree.root(), p).unwrap();
        for s in ["a", "", "b"] {
            let t = tree.create_text(s);
            tree.append_child(p, t).unwrap();
        }
        let empty = tree.create_text("");
        let em = tree.create_element("em");
        tree.append_child(p, em).unwrap();
        tree.append_child(em, empty).unwrap();

        tree.normalize_text(p);
        let kids: Vec<_> = tree.children(p).collect();
        assert_eq!(kids.len(), 2);
        assert_eq!(tree.text(kids[0]), Some("ab"));
        assert!(!tree.has_children(em));
        assert_eq!(tree.text_content(p), "ab");
    }
}
