//! Range Resolver
//!
//! Template and parameter output is bracketed by start/end marker metas
//! that share an about id. Resolution happens in two steps:
//!
//! 1. [`find_wrappable_template_ranges`] pairs the markers and widens each
//!    pair to a run of siblings under their lowest common ancestor.
//! 2. [`find_top_level_non_overlapping_ranges`] classifies the ranges as
//!    nested, overlapping or independent. Nested and overlapping ranges
//!    fold their invocation data into the range that absorbs them, so
//!    only non-overlapping top-level ranges remain.
//!
//! `start_elem`/`end_elem` are the marker elements; `start`/`end` the DOM
//! boundary nodes after widening and merging.

use std::collections::{HashMap, HashSet};

use selser_dom::{
    decoded_comment_length, Document, DomSourceRange, Invocation, NodeId, ParamInfo,
};

use crate::{EngineError, EngineResult, Env};

/// A resolved template range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomRange {
    /// About id shared by the markers
    pub id: String,
    pub start_elem: NodeId,
    pub end_elem: NodeId,
    pub start: NodeId,
    pub end: NodeId,
    /// Source offset of the start marker's token
    pub start_offset: usize,
    /// `end` precedes `start` in the DOM (foster parenting)
    pub flipped: bool,
    /// Table found after an end marker that was seen before its start
    pub foster_table: Option<NodeId>,
}

/// One entry of a range's compound template data, in source order
#[derive(Debug, Clone, PartialEq)]
pub enum TplInfo {
    /// Literal source between or around invocations
    Wikitext(String),
    Invocation {
        dsr: DomSourceRange,
        args: Invocation,
        param_infos: Vec<ParamInfo>,
    },
}

impl TplInfo {
    pub fn dsr(&self) -> Option<DomSourceRange> {
        match self {
            TplInfo::Wikitext(_) => None,
            TplInfo::Invocation { dsr, .. } => Some(*dsr),
        }
    }
}

/// Output of range classification
#[derive(Debug, Default)]
pub struct ClassifiedRanges {
    /// Top-level, non-overlapping ranges in source order
    pub ranges: Vec<DomRange>,
    /// Compound template data keyed by range id
    pub tpl_arrays: HashMap<String, Vec<TplInfo>>,
}

#[derive(Debug, Default)]
struct TplMarkers {
    start: Option<NodeId>,
    end: Option<NodeId>,
    foster_table: Option<NodeId>,
}

const KIND: &str = "tplwrap/findranges";

/// Pair up start/end markers below `root` and compute their DOM ranges
pub fn find_wrappable_template_ranges(
    doc: &mut Document,
    env: &mut Env,
    root: NodeId,
) -> EngineResult<Vec<DomRange>> {
    let mut tpls = HashMap::new();
    let mut ranges = Vec::new();
    find_ranges_in(doc, env, root, &mut tpls, &mut ranges)?;

    let mut dangling: Vec<(String, TplMarkers)> = tpls
        .into_iter()
        .filter(|(_, m)| m.start.is_none() && m.end.is_some())
        .collect();
    dangling.sort_by(|a, b| a.0.cmp(&b.0));
    for (about, markers) in dangling {
        if let Some(table) = markers.foster_table {
            doc.remove_about(table);
        }
        env.warn(KIND, format!("end marker for {about} has no start marker"));
    }
    Ok(ranges)
}

fn find_ranges_in(
    doc: &mut Document,
    env: &mut Env,
    root: NodeId,
    tpls: &mut HashMap<String, TplMarkers>,
    out: &mut Vec<DomRange>,
) -> EngineResult<()> {
    let mut elem = doc.tree.first_child(root);
    while let Some(e) = elem {
        // Encapsulation may remove `e`
        let next_sibling = doc.tree.next_sibling(e);
        if !doc.tree.is_element(e) {
            elem = next_sibling;
            continue;
        }

        // Markers without tsr are nested in other generated content and
        // are never wrapped themselves; end markers may lack it on bad input
        let marker = doc.tree.match_tpl_type(e).filter(|m| {
            m.is_end || doc.provenance(e).is_some_and(|dp| dp.tsr.is_some())
        });
        let Some(marker) = marker else {
            find_ranges_in(doc, env, e, tpls, out)?;
            elem = next_sibling;
            continue;
        };

        let about = doc.about(e).unwrap_or_default().to_string();
        if !marker.is_end {
            match tpls.get_mut(&about) {
                Some(entry) => {
                    entry.start = Some(e);
                    let Some(end) = entry.end else {
                        return Err(EngineError::invariant(format!(
                            "start marker for {about} found after its content"
                        )));
                    };
                    // End marker was fostered out ahead of the start
                    let foster_table = entry.foster_table;
                    let ee = foster_table.unwrap_or(end);
                    if let Some(mut range) = get_dom_range(doc, env, e, end, ee)? {
                        range.foster_table = foster_table;
                        out.push(range);
                    }
                }
                None => {
                    tpls.insert(
                        about,
                        TplMarkers {
                            start: Some(e),
                            ..Default::default()
                        },
                    );
                }
            }
        } else if let Some(sm) = tpls.get(&about).and_then(|m| m.start) {
            let ee = fostered_content_table(doc, sm, e, &about).unwrap_or(e);
            if let Some(range) = get_dom_range(doc, env, sm, e, ee)? {
                out.push(range);
            }
        } else {
            let table = following_table(doc, e);
            if let Some(t) = table {
                tracing::debug!(about = %about, table = ?t, "End marker ahead of its start; table kept as foster evidence");
                doc.set_about(t, &about);
            }
            tpls.insert(
                about,
                TplMarkers {
                    start: None,
                    end: Some(e),
                    foster_table: table,
                },
            );
        }

        elem = next_sibling;
    }
    Ok(())
}

fn skip_newline(doc: &Document, n: Option<NodeId>) -> Option<NodeId> {
    match n {
        Some(x) if doc.tree.text(x) == Some("\n") => doc.tree.next_sibling(x),
        other => other,
    }
}

/// Whole template output fostered out of a table in a `<p>`: the end
/// marker's parent is followed by the table and the start marker's parent
/// is flagged as fostered
fn fostered_content_table(doc: &mut Document, sm: NodeId, em: NodeId, about: &str) -> Option<NodeId> {
    let tbl = skip_newline(doc, doc.tree.parent(em).and_then(|p| doc.tree.next_sibling(p)))?;
    let sm_parent = doc.tree.parent(sm).filter(|&p| !doc.at_the_top(p))?;
    let dp = doc.provenance(sm_parent)?;
    if !doc.tree.is_tag(tbl, "table") || !dp.fostered {
        return None;
    }

    let tsr_start = dp.tsr.and_then(|t| t.start);
    if let (Some(ts), Some(dsr)) = (tsr_start, doc.provenance_mut(tbl).dsr.as_mut()) {
        if dsr.start.is_none() {
            dsr.start = Some(ts);
        }
    }
    doc.set_about(tbl, about);
    Some(tbl)
}

/// Table following an end marker, or following the marker's parent
fn following_table(doc: &Document, end: NodeId) -> Option<NodeId> {
    let is_table = |n: &NodeId| doc.tree.is_tag(*n, "table");
    skip_newline(doc, doc.tree.next_sibling(end))
        .filter(is_table)
        .or_else(|| {
            let parent = doc.tree.parent(end).filter(|&p| !doc.at_the_top(p))?;
            skip_newline(doc, doc.tree.next_sibling(parent)).filter(is_table)
        })
}

/// Copy the start marker's source range to the first node of a range
/// without shrinking a bigger end offset already on it
fn update_dsr_for_first_tpl_node(doc: &mut Document, target: NodeId, source: NodeId) {
    let src_dp = doc.provenance(source).cloned().unwrap_or_default();
    let tgt = doc.provenance_mut(target);
    match (src_dp.dsr.and_then(|d| d.end), tgt.dsr.and_then(|d| d.end)) {
        (Some(src_end), Some(tgt_end)) if tgt_end > src_end => {
            if let Some(dsr) = tgt.dsr.as_mut() {
                dsr.start = src_dp.dsr.and_then(|d| d.start);
            }
        }
        _ => {
            tgt.dsr = src_dp.dsr;
            tgt.src = src_dp.src;
        }
    }
}

/// Source range of a range's last node. A trailing text or comment node
/// gets one extrapolated from the closest preceding element.
pub fn get_range_end_dsr(doc: &Document, range: &DomRange) -> Option<DomSourceRange> {
    let end = range.end;
    if doc.tree.is_element(end) {
        return doc.dsr(end);
    }

    let node_len = |n: NodeId| match doc.tree.text(n) {
        Some(t) => t.len(),
        None => decoded_comment_length(&doc.tree, n),
    };

    let mut offset = 0;
    let mut n = doc.tree.prev_sibling(end);
    while let Some(x) = n.filter(|&x| !doc.tree.is_element(x)) {
        offset += node_len(x);
        n = doc.tree.prev_sibling(x);
    }

    let dsr = n.and_then(|x| doc.dsr(x))?;
    match dsr.end {
        Some(e) => {
            let start = e + offset;
            Some(DomSourceRange {
                start: Some(start),
                end: Some(start + node_len(end)),
                open_width: None,
                close_width: None,
            })
        }
        None => Some(dsr),
    }
}

/// Compute the DOM range for a marker pair; `None` if the markers share
/// no ancestor
fn get_dom_range(
    doc: &mut Document,
    env: &mut Env,
    start_elem: NodeId,
    end_meta: NodeId,
    end_elem: NodeId,
) -> EngineResult<Option<DomRange>> {
    let id = doc.about(start_elem).unwrap_or_default().to_string();
    let start_offset = doc
        .provenance(start_elem)
        .and_then(|dp| dp.tsr)
        .and_then(|t| t.start)
        .unwrap_or(0);

    // Lowest common ancestor of the markers
    let start_ancestors = doc.tree.path_to_root(start_elem);
    let mut elem = end_elem;
    let mut parent = doc.tree.parent(end_elem);
    let mut bounds = None;
    while let Some(p) = parent.filter(|&p| p != NodeId::ROOT) {
        if let Some(i) = start_ancestors.iter().position(|&a| a == p) {
            bounds = if i == 0 {
                // Widen to the full subtree
                doc.tree
                    .first_child(start_elem)
                    .zip(doc.tree.last_child(start_elem))
            } else {
                Some((start_ancestors[i - 1], elem))
            };
            break;
        }
        elem = p;
        parent = doc.tree.parent(p);
    }
    let Some((mut start, mut end)) = bounds else {
        env.warn(
            KIND,
            format!("markers of {id} ({start_elem}, {end_elem}) have no common ancestor; range dropped"),
        );
        return Ok(None);
    };

    let starts_in_fosterable = doc.tree.is_fosterable_position(start);
    let next = doc.tree.next_sibling(start);

    if doc.tree.is_tpl_marker_meta(start) && next == Some(end_elem) {
        // Empty content
        if start != start_elem {
            return Err(EngineError::invariant(format!(
                "empty range {id} does not start at its start marker"
            )));
        }
        let parent = doc
            .tree
            .parent(start)
            .ok_or_else(|| EngineError::invariant(format!("start marker of {id} is detached")))?;
        if starts_in_fosterable {
            start = parent;
            end = parent;
        } else {
            let span = doc.tree.create_element("span");
            doc.tree.insert_before(parent, span, Some(end_elem))?;
        }
    } else if starts_in_fosterable
        && (!doc.tree.is_element(start)
            || (doc.tree.is_tpl_marker_meta(start)
                && next.is_none_or(|n| !doc.tree.is_element(n) || doc.tree.is_tpl_marker_meta(n))))
    {
        // Marker metas come from comments, so they can sit in fosterable
        // positions: move leading whitespace/comments into the first table
        // content node or widen the range to the table part
        let start_parent = doc
            .tree
            .parent(start)
            .ok_or_else(|| EngineError::invariant(format!("range start of {id} is detached")))?;

        let mut no_ws = true;
        let mut to_migrate = Vec::new();
        let mut new_start = Some(start);
        let mut n = if doc.tree.is_element(start) { next } else { Some(start) };
        while let Some(x) = n.filter(|&x| !doc.tree.is_element(x)) {
            if doc.tree.is_text(x) {
                no_ws = false;
            }
            to_migrate.push(x);
            n = doc.tree.next_sibling(x);
            new_start = n;
        }

        // Whitespace only goes into tbody/tr where it cannot change rendering
        let target = new_start.filter(|&ns| {
            no_ws || matches!(doc.tree.tag_name(ns), Some("tbody" | "tr"))
        });
        match target {
            Some(ns) => {
                let insert_at = doc.tree.first_child(ns);
                for x in to_migrate {
                    doc.tree.insert_before(ns, x, insert_at)?;
                }
                start = ns;
                update_dsr_for_first_tpl_node(doc, ns, start_elem);
            }
            None => {
                start = start_parent;
                end = start_parent;
            }
        }
    }

    // Provenance attaches to elements only
    if !doc.tree.is_element(start) {
        let parent = doc
            .tree
            .parent(start)
            .ok_or_else(|| EngineError::invariant(format!("range start of {id} is detached")))?;
        let span = doc.tree.create_element("span");
        doc.tree.insert_before(parent, span, Some(start))?;
        doc.tree.append_child(span, start)?;
        update_dsr_for_first_tpl_node(doc, span, start_elem);
        if end == start {
            end = span;
        }
        start = span;
    }

    if doc.tree.is_tag(start, "table") {
        // Include fostered content
        while let Some(prev) = doc.tree.prev_sibling(start).filter(|&p| {
            doc.tree.is_element(p) && doc.provenance(p).is_some_and(|dp| dp.fostered)
        }) {
            start = prev;
        }
    }

    if start == start_elem {
        if let Some(ns) = doc.tree.next_sibling(start).filter(|&n| doc.tree.is_element(n)) {
            update_dsr_for_first_tpl_node(doc, ns, start_elem);
        }
    }

    // start == end is not flipped
    let flipped = !doc.tree.in_sibling_order(start, end);

    tracing::trace!(range = %id, flipped, offset = start_offset, start = ?start, end = ?end, "Found range");

    Ok(Some(DomRange {
        id,
        start_elem,
        end_elem: end_meta,
        start,
        end,
        start_offset,
        flipped,
        foster_table: None,
    }))
}

/// Remove a start marker: metas go away, other elements lose their `mw:*` types
fn strip_start_meta(doc: &mut Document, meta: NodeId) {
    if doc.tree.is_tag(meta, "meta") {
        doc.tree.detach(meta);
    } else {
        doc.tree.remove_type_of_where(meta, |t| t.starts_with("mw:"));
    }
}

/// Follow subsumption links to the outermost range
fn find_toplevel_enclosing_range(
    nesting: &HashMap<String, String>,
    start: Option<&str>,
) -> EngineResult<Option<String>> {
    let Some(mut r_id) = start else {
        return Ok(None);
    };
    let mut visited = HashSet::new();
    while let Some(next) = nesting.get(r_id) {
        if !visited.insert(r_id) {
            return Err(EngineError::invariant(format!(
                "cycle in template range nesting at {r_id}"
            )));
        }
        r_id = next;
    }
    Ok(Some(r_id.to_string()))
}

/// Would linking `start` under `end` close a cycle?
fn introduces_cycle(start: &str, end: &str, nesting: &HashMap<String, String>) -> bool {
    let mut visited = HashSet::from([start]);
    let mut elt = nesting.get(end);
    while let Some(e) = elt {
        if !visited.insert(e.as_str()) {
            return true;
        }
        elt = nesting.get(e);
    }
    false
}

/// `prev` and `curr` are in source order; after range finding,
/// intersecting ranges have their boundaries on the same level
fn ranges_overlap(doc: &Document, prev: &DomRange, curr: &DomRange) -> bool {
    let prev_end = if prev.flipped { prev.start } else { prev.end };
    let curr_start = if curr.flipped { curr.end } else { curr.start };
    doc.tree.in_sibling_order(curr_start, prev_end)
}

fn source_slice(src: &str, start: usize, end: usize) -> String {
    src.get(start..end).unwrap_or_default().to_string()
}

/// Append `r`'s invocation (and any literal source since the previous one)
/// to the compound data of `compound_id`
fn record_template_info(
    doc: &Document,
    env: &Env,
    compound: &mut HashMap<String, Vec<TplInfo>>,
    compound_id: &str,
    r: &DomRange,
    args: Invocation,
    param_infos: Vec<ParamInfo>,
) {
    let tpl_array = compound.entry(compound_id.to_string()).or_default();
    let dp = doc.provenance(r.start_elem).cloned().unwrap_or_default();
    let dsr = dp.dsr.unwrap_or_default();

    let prev_end = tpl_array.last().and_then(TplInfo::dsr).and_then(|d| d.end);
    if let (Some(prev_end), Some(start)) = (prev_end, dsr.start) {
        if prev_end < start {
            tpl_array.push(TplInfo::Wikitext(source_slice(env.page_src(), prev_end, start)));
        }
    }

    if let Some(wt) = dp.unwrapped_wt.filter(|wt| !wt.is_empty()) {
        tpl_array.push(TplInfo::Wikitext(wt));
    }

    tpl_array.push(TplInfo::Invocation {
        dsr,
        args,
        param_infos,
    });
}

/// Classify ranges as nested, overlapping or independent and merge them
/// into top-level, non-overlapping ranges. Marker elements of absorbed
/// ranges are removed.
pub fn find_top_level_non_overlapping_ranges(
    doc: &mut Document,
    env: &mut Env,
    root: NodeId,
    mut ranges: Vec<DomRange>,
) -> EngineResult<ClassifiedRanges> {
    // Ranges covering each top-level element
    let mut node_ranges: HashMap<NodeId, Vec<usize>> = HashMap::new();
    for (i, r) in ranges.iter().enumerate() {
        let (mut n, e) = if r.flipped {
            (Some(r.end), r.start)
        } else {
            (Some(r.start), r.end)
        };
        while let Some(x) = n {
            if doc.tree.is_element(x) {
                let tags = node_ranges.entry(x).or_default();
                if !tags.contains(&i) {
                    tags.push(i);
                }
            }
            if x == e {
                break;
            }
            n = doc.tree.next_sibling(x);
        }
    }

    // First pass records nesting only; the merge pass below adds overlap
    // links so nested ranges find their top-level range through them
    let mut subsumed: HashMap<String, String> = HashMap::new();
    for r in &ranges {
        let mut n = Some(r.start);
        while let Some(x) = n.filter(|&x| x != root) {
            if let Some(tags) = node_ranges.get(&x).filter(|t| !t.is_empty()) {
                if x != r.start {
                    // Nested: record the outermost enclosing range
                    if let Some(&outer) = tags.iter().min_by_key(|&&j| ranges[j].start_offset) {
                        subsumed.insert(r.id.clone(), ranges[outer].id.clone());
                    }
                    break;
                }

                // Same level: nested only if another range covers both
                // our start and our end
                let e_tags = node_ranges.get(&r.end);
                let mut best: Option<usize> = None;
                for &j in tags {
                    let other = &ranges[j];
                    let covers_end = e_tags.is_some_and(|t| t.contains(&j));
                    // Identical ranges: the one with the larger offset is subsumed
                    let distinct = r.start != other.start
                        || r.end != other.end
                        || other.start_offset < r.start_offset;
                    if other.id == r.id || !covers_end || !distinct {
                        continue;
                    }
                    if introduces_cycle(&r.id, &other.id, &subsumed) {
                        env.warn(
                            "tplwrap/cycle",
                            format!("not nesting {} in {}: would create a cycle", r.id, other.id),
                        );
                        continue;
                    }
                    if best.is_none_or(|b| other.start_offset < ranges[b].start_offset) {
                        best = Some(j);
                    }
                }
                if let Some(b) = best {
                    subsumed.insert(r.id.clone(), ranges[b].id.clone());
                    break;
                }
            }
            n = doc.tree.parent(x);
        }
    }

    // Source order; stable for equal offsets
    ranges.sort_by_key(|r| r.start_offset);

    let mut out = ClassifiedRanges::default();
    let mut prev: Option<usize> = None;

    for r in ranges {
        let tmp = doc
            .provenance(r.start_elem)
            .map(|dp| dp.tmp.clone())
            .unwrap_or_default();
        if tmp.arg_info.is_none() && !tmp.from_foster {
            return Err(EngineError::invariant(format!(
                "template range {} has no argument info",
                r.id
            )));
        }
        let arg_info = tmp.arg_info.map(|ai| (ai.dict, ai.param_infos));

        let enclosing =
            find_toplevel_enclosing_range(&subsumed, subsumed.get(&r.id).map(String::as_str))?;

        let (start_to_strip, end_to_remove) = if let Some(enclosing) = enclosing {
            tracing::trace!(range = %r.id, enclosing = %enclosing, "Nested range");
            if let Some((args, pi)) = arg_info {
                record_template_info(doc, env, &mut out.tpl_arrays, &enclosing, &r, args, pi);
            }
            (r.start_elem, r.end_elem)
        } else if let Some(p) = prev.filter(|&p| ranges_overlap(doc, &out.ranges[p], &r)) {
            tracing::trace!(range = %r.id, into = %out.ranges[p].id, "Overlapping range");
            let prev_id = out.ranges[p].id.clone();
            subsumed.insert(r.id.clone(), prev_id.clone());
            if r.flipped {
                return Err(EngineError::invariant(format!(
                    "flipped range {} overlaps {prev_id}",
                    r.id
                )));
            }

            let end_to_remove = out.ranges[p].end_elem;
            out.ranges[p].end = r.end;
            out.ranges[p].end_elem = r.end_elem;
            if let Some((args, pi)) = arg_info {
                record_template_info(doc, env, &mut out.tpl_arrays, &prev_id, &r, args, pi);
            }
            (r.start_elem, end_to_remove)
        } else {
            if let Some((args, pi)) = arg_info {
                record_template_info(doc, env, &mut out.tpl_arrays, &r.id, &r, args, pi);
            }
            out.ranges.push(r);
            prev = Some(out.ranges.len() - 1);
            continue;
        };

        doc.tree.detach(end_to_remove);
        strip_start_meta(doc, start_to_strip);
    }

    Ok(out)
}
