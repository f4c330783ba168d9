//! Document-order walker whose handler may restructure the tree
//!
//! The handler sees every node below the root in pre-order and tells the
//! walker where to go next, so it can replace or remove the node it was
//! given without invalidating the walk.

use selser_dom::{Document, DomTree, NodeId};

use crate::{EngineResult, Env};

/// Where the walk continues after a handler call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Visit the node's children, then move on
    Descend,
    /// Continue at this node (it is visited too)
    Goto(NodeId),
    /// Continue after this node's subtree
    SkipPast(NodeId),
    /// End the walk
    Stop,
}

/// Next node in document order that is not inside `id`, never leaving `root`
pub fn next_after(tree: &DomTree, id: NodeId, root: NodeId) -> Option<NodeId> {
    let mut cur = id;
    loop {
        if cur == root {
            return None;
        }
        if let Some(next) = tree.next_sibling(cur) {
            return Some(next);
        }
        cur = tree.parent(cur)?;
    }
}

/// Next node in pre-order, never leaving `root`
pub fn next_node(tree: &DomTree, id: NodeId, root: NodeId) -> Option<NodeId> {
    tree.first_child(id).or_else(|| next_after(tree, id, root))
}

/// Walk the descendants of `root` in pre-order
pub fn traverse<F>(doc: &mut Document, env: &mut Env, root: NodeId, mut handler: F) -> EngineResult<()>
where
    F: FnMut(&mut Document, &mut Env, NodeId) -> EngineResult<Flow>,
{
    let mut node = doc.tree.first_child(root);
    while let Some(n) = node {
        node = match handler(doc, env, n)? {
            Flow::Descend => next_node(&doc.tree, n, root),
            Flow::Goto(x) => Some(x),
            Flow::SkipPast(x) => next_after(&doc.tree, x, root),
            Flow::Stop => None,
        };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    #[test]
    fn test_preorder_and_skip() {
        let mut doc = Document::new();
        let body = doc.body();
        let div = doc.tree.create_element("div");
        let b = doc.tree.create_element("b");
        let p = doc.tree.create_element("p");
        doc.tree.append_child(body, div).unwrap();
        doc.tree.append_child(div, b).unwrap();
        doc.tree.append_child(body, p).unwrap();
        let mut env = Env::new(Config::default(), "");

        let mut seen = Vec::new();
        traverse(&mut doc, &mut env, body, |_, _, n| {
            seen.push(n);
            Ok(Flow::Descend)
        })
        .unwrap();
        assert_eq!(seen, vec![div, b, p]);

        seen.clear();
        traverse(&mut doc, &mut env, body, |_, _, n| {
            seen.push(n);
            Ok(if n == div { Flow::SkipPast(div) } else { Flow::Descend })
        })
        .unwrap();
        assert_eq!(seen, vec![div, p]);
    }

    #[test]
    fn test_handler_can_remove_node() {
        let mut doc = Document::new();
        let body = doc.body();
        let a = doc.tree.create_element("span");
        let b = doc.tree.create_element("i");
        doc.tree.append_child(body, a).unwrap();
        doc.tree.append_child(body, b).unwrap();
        let mut env = Env::new(Config::default(), "");

        let mut seen = Vec::new();
        traverse(&mut doc, &mut env, body, |doc, _, n| {
            seen.push(n);
            if n == a {
                let next = doc.tree.next_sibling(a);
                doc.tree.detach(a);
                return Ok(next.map_or(Flow::Stop, Flow::Goto));
            }
            Ok(Flow::Descend)
        })
        .unwrap();
        assert_eq!(seen, vec![a, b]);
        assert_eq!(doc.tree.num_children(body), 1);
    }
}
