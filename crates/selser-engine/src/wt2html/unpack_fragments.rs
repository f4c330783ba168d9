//! Fragment Unpacker
//!
//! Nested conversions (link text, captions, extension output) are built as
//! separate fragments and left in the page as `mw:DOMFragment` placeholder
//! elements. This pass splices each fragment in place of its placeholder.
//!
//! An `<a>` placeholder parent whose fragment contains another `<a>` cannot
//! be spliced as is. The parent is serialized with the fragment markup in
//! the placeholder's position and re-parsed, letting the HTML5 tree
//! builder split the nesting. Everything from the nested anchor onward
//! gets a zero-width source range and the `misnested` flag.

use std::collections::HashMap;

use selser_dom::{Document, DomSourceRange, NodeId, StoreOptions};
use selser_html::{HtmlParser, HtmlSerializer};

use crate::traverse::{next_after, traverse, Flow};
use crate::{EngineError, EngineResult, Env};

/// Stands in for the placeholder while the parent is serialized
const SPLICE_TOKEN_PREFIX: &str = "\u{fffc}mw-splice-";

/// Unpack every fragment placeholder below `<body>`
pub fn unpack_dom_fragments(doc: &mut Document, env: &mut Env) -> EngineResult<()> {
    let body = doc.body();
    traverse(doc, env, body, unpack_fragment)
}

/// Walker handler: unpack `placeholder` if it is a fragment placeholder
pub fn unpack_fragment(doc: &mut Document, env: &mut Env, placeholder: NodeId) -> EngineResult<Flow> {
    if !doc.tree.is_element(placeholder) || !doc.tree.has_type_of(placeholder, "mw:DOMFragment") {
        return Ok(Flow::Descend);
    }

    let dp = doc.provenance(placeholder).cloned().unwrap_or_default();
    let frag_id = dp.html.clone().unwrap_or_default();
    if !frag_id.starts_with("mwf") {
        return Err(EngineError::invariant(format!(
            "placeholder {placeholder} has no fragment id (got {frag_id:?})"
        )));
    }
    let fragment = env
        .dom_fragment(&frag_id)
        .ok_or_else(|| EngineError::MissingFragment(frag_id.clone()))?;
    let parent = doc
        .tree
        .parent(placeholder)
        .ok_or_else(|| EngineError::invariant(format!("placeholder {placeholder} is detached")))?;

    tracing::trace!(fragment = %frag_id, node = ?placeholder, "Unpacking DOM fragment");

    if doc.tree.has_type_of(placeholder, "mw:Transclusion") {
        doc.add_span_wrappers(fragment, None)?;
        let content = first_element_child(doc, fragment, &frag_id)?;
        let mw = doc.data_mw(placeholder).cloned().unwrap_or_default();
        doc.set_data_mw(content, mw);
        doc.tree.add_type_of(content, "mw:Transclusion");
        doc.provenance_mut(content).pi = dp.pi.clone();
    }

    // Cached, setDSR and fostered content gets the placeholder's range
    if let Some(pdsr) = dp.dsr {
        if dp.tmp.set_dsr || dp.tmp.from_cache || dp.fostered {
            let content = first_element_child(doc, fragment, &frag_id)?;
            let dsr = if doc.tree.has_type_of(content, "mw:Transclusion") {
                DomSourceRange {
                    start: pdsr.start,
                    end: pdsr.end,
                    open_width: None,
                    close_width: None,
                }
            } else if doc.tree.type_of_tokens(content).any(is_nowiki_or_extension) {
                pdsr
            } else {
                DomSourceRange {
                    start: pdsr.start,
                    end: pdsr.end,
                    open_width: Some(2),
                    close_width: Some(2),
                }
            };
            doc.provenance_mut(content).dsr = Some(dsr);
        }
    }

    if dp.tmp.from_cache {
        let mut about_map = HashMap::new();
        fix_abouts(doc, env, fragment, &mut about_map);
    }

    if let Some(about) = doc.about(placeholder).filter(|a| !a.is_empty()).map(str::to_string) {
        make_children_encap_wrappers(doc, fragment, &about)?;
    }

    let flow = if has_bad_nesting(doc, parent, fragment) {
        splice_misnested(doc, env, placeholder, parent, fragment, &frag_id)?
    } else {
        let next = doc.tree.next_sibling(placeholder);
        doc.tree.migrate_children(fragment, parent, Some(placeholder))?;
        doc.tree.detach(placeholder);
        next.map_or(Flow::SkipPast(parent), Flow::Goto)
    };

    env.remove_dom_fragment(doc, &frag_id)?;
    Ok(flow)
}

fn is_nowiki_or_extension(token: &str) -> bool {
    token == "mw:Nowiki"
        || token
            .strip_prefix("mw:Extension/")
            .is_some_and(|name| !name.is_empty())
}

fn first_element_child(doc: &Document, fragment: NodeId, frag_id: &str) -> EngineResult<NodeId> {
    doc.tree
        .first_child(fragment)
        .filter(|&c| doc.tree.is_element(c))
        .ok_or_else(|| {
            EngineError::invariant(format!("fragment {frag_id} does not start with an element"))
        })
}

/// `<a>` parents cannot hold fragments with anchors anywhere inside
fn has_bad_nesting(doc: &Document, parent: NodeId, fragment: NodeId) -> bool {
    doc.tree.is_tag(parent, "a") && doc.tree.tree_has_element(fragment, "a")
}

/// Give every about id in a cached fragment a fresh page-unique id
fn fix_abouts(doc: &mut Document, env: &mut Env, node: NodeId, map: &mut HashMap<String, String>) {
    let children: Vec<NodeId> = doc.tree.children(node).collect();
    for c in children {
        if !doc.tree.is_element(c) {
            continue;
        }
        if let Some(old) = doc.about(c).map(str::to_string) {
            let new = map
                .entry(old)
                .or_insert_with(|| env.new_about_id())
                .clone();
            doc.set_about(c, &new);
        }
        fix_abouts(doc, env, c, map);
    }
}

/// Span-wrap the fragment's top level and put every child in `about`'s group
fn make_children_encap_wrappers(doc: &mut Document, fragment: NodeId, about: &str) -> EngineResult<()> {
    doc.add_span_wrappers(fragment, None)?;
    let children: Vec<NodeId> = doc.tree.children(fragment).collect();
    for c in children {
        doc.set_about(c, about);
    }
    Ok(())
}

/// Zero the source range of every fragment element from the first nested
/// `<a>` onward so selser never reuses source for the split region
fn fix_up_misnested_tag_dsr(
    doc: &mut Document,
    env: &mut Env,
    target: NodeId,
    fragment: NodeId,
) -> EngineResult<()> {
    if !doc.tree.is_tag(target, "a") {
        return Ok(());
    }

    // Wrap unconditionally; wrappers before the anchor are stripped again
    doc.add_span_wrappers(fragment, None)?;

    let mut reset = false;
    let mut new_offset = doc.dsr(target).and_then(|d| d.end);

    traverse(doc, env, fragment, |doc, _, node| {
        if !doc.tree.is_element(node) {
            return Ok(Flow::Descend);
        }
        if !reset && doc.tree.is_tag(node, "a") {
            reset = true;
            if let Some(p) = doc.tree.parent(node) {
                doc.add_span_wrappers(p, Some(node))?;
            }
            // Revisit the anchor itself with `reset` set
            return Ok(Flow::Goto(node));
        }
        if reset {
            if new_offset.is_none() {
                // Target inside encapsulated content has no range of its own
                new_offset = doc.dsr(node).and_then(|d| d.start);
            }
            let dp = doc.provenance_mut(node);
            dp.dsr = Some(DomSourceRange::zero_width(new_offset));
            dp.misnested = true;
        } else if doc.provenance(node).is_some_and(|dp| dp.tmp.wrapper) {
            let after = next_after(&doc.tree, node, fragment);
            let next = doc.tree.first_child(node).or(after);
            if let Some(p) = doc.tree.parent(node) {
                doc.tree.migrate_children(node, p, Some(node))?;
            }
            doc.tree.detach(node);
            return Ok(next.map_or(Flow::Stop, Flow::Goto));
        }
        Ok(Flow::Descend)
    })
}

/// Splice via serialize + re-parse; returns where the walk resumes
fn splice_misnested(
    doc: &mut Document,
    env: &mut Env,
    placeholder: NodeId,
    parent: NodeId,
    fragment: NodeId,
    frag_id: &str,
) -> EngineResult<Flow> {
    let grandparent = doc
        .tree
        .parent(parent)
        .ok_or_else(|| EngineError::invariant(format!("misnested parent {parent} is detached")))?;

    let token = format!("{SPLICE_TOKEN_PREFIX}{frag_id}");
    let token_node = doc.tree.create_text(&token);
    doc.tree.replace_child(parent, token_node, placeholder)?;

    if let Some(about) = doc.about(parent).filter(|a| !a.is_empty()).map(str::to_string) {
        make_children_encap_wrappers(doc, fragment, &about)?;
    }

    fix_up_misnested_tag_dsr(doc, env, parent, fragment)?;

    let fragment_html = HtmlSerializer::with_data_attributes(StoreOptions {
        keep_tmp: true,
        store_diff_marks: false,
    })
    .serialize_inner(doc, fragment)?;

    // Everything is in `fragment_html` now
    let children: Vec<NodeId> = doc.tree.children(fragment).collect();
    for c in children {
        doc.tree.detach(c);
    }

    let marker = doc.tree.prev_sibling(parent);
    let parent_html = HtmlSerializer::with_data_attributes(StoreOptions::default())
        .serialize_outer(doc, parent)?;
    let combined = parent_html.replace(&token, &fragment_html);

    let reparsed = HtmlParser::new().parse_fragment(doc, &combined)?;
    doc.tree.migrate_children(reparsed, grandparent, Some(parent))?;

    let first_new = match marker {
        Some(m) => doc.tree.next_sibling(m),
        None => doc.tree.first_child(grandparent),
    }
    .filter(|&n| n != parent);
    let after = next_after(&doc.tree, parent, NodeId::ROOT);

    doc.tree.detach(parent);
    env.warn(
        "unpack/misnested",
        format!("fragment {frag_id} nests <a> inside <a>; re-parsed {parent}"),
    );

    Ok(first_new.or(after).map_or(Flow::Stop, Flow::Goto))
}
