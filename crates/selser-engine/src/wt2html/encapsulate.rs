//! Encapsulator
//!
//! Turns each top-level template range into one encapsulated unit: every
//! top-level node of the range gets the range's about id, a single target
//! element receives the construct type, the combined source range and the
//! part list, and the marker metas are removed.

use std::collections::HashMap;

use selser_dom::{Document, DomSourceRange, NodeId, Part, StoreOptions};
use selser_html::HtmlSerializer;

use super::range_builder::{
    find_top_level_non_overlapping_ranges, find_wrappable_template_ranges, get_range_end_dsr,
    DomRange, TplInfo,
};
use crate::{EngineResult, Env};

const KIND: &str = "tplwrap/encap";

/// Find, classify and encapsulate all template ranges below `root`
pub fn wrap_templates(doc: &mut Document, env: &mut Env, root: NodeId) -> EngineResult<()> {
    let ranges = find_wrappable_template_ranges(doc, env, root)?;
    if ranges.is_empty() {
        return Ok(());
    }
    let classified = find_top_level_non_overlapping_ranges(doc, env, root, ranges)?;
    tracing::debug!(ranges = classified.ranges.len(), "Encapsulating template ranges");
    encapsulate_templates(doc, env, &classified.ranges, &classified.tpl_arrays)
}

/// Outer HTML with data attributes, for diagnostics
fn outer_html(doc: &Document, id: NodeId) -> String {
    let opts = StoreOptions {
        keep_tmp: false,
        store_diff_marks: false,
    };
    HtmlSerializer::with_data_attributes(opts)
        .serialize_outer(doc, id)
        .unwrap_or_else(|_| id.to_string())
}

/// Give every top-level node of the range the range's about id. Bare
/// text and comments get a span, except in fosterable positions where a
/// span would be fostered out again.
fn ensure_elements_in_range(doc: &mut Document, range: &DomRange) -> EngineResult<()> {
    let about = doc.about(range.start_elem).unwrap_or_default().to_string();
    let mut n = Some(range.start);
    while let Some(mut x) = n {
        let next = doc.tree.next_sibling(x);
        if doc.tree.is_element(x) {
            doc.set_about(x, &about);
        } else if !doc.tree.is_fosterable_position(x) {
            if let Some(parent) = doc.tree.parent(x) {
                let span = doc.tree.create_element("span");
                doc.set_about(span, &about);
                doc.tree.replace_child(parent, span, x)?;
                doc.tree.append_child(span, x)?;
                x = span;
            }
        }

        if x == range.end {
            break;
        }
        n = next;
    }
    Ok(())
}

/// First element of the range that is not a marker meta
fn find_encap_target(doc: &Document, range: &DomRange) -> Option<NodeId> {
    let mut target = range.start;
    while doc.tree.is_tpl_marker_meta(target) || !doc.tree.is_element(target) {
        if target == range.end
            || (!doc.tree.is_element(target) && !doc.tree.is_fosterable_position(target))
        {
            return None;
        }
        target = doc.tree.next_sibling(target)?;
    }
    Some(target)
}

/// Name of the first node that came from markup, with its syntax flavour.
/// Recorded when literal text precedes the first invocation so the
/// serializer can place newlines relative to it.
fn find_first_templated_node(doc: &Document, range: &DomRange) -> Option<String> {
    let mut first = range.start;
    if doc.tree.is_tpl_marker_meta(first) {
        first = doc.tree.next_sibling(first)?;
    }

    // Fostered nodes came from inside a table
    while doc.provenance(first).is_some_and(|dp| dp.fostered) {
        first = doc.tree.next_sibling(first).filter(|&n| doc.tree.is_element(n))?;
    }

    if doc.tree.is_tag(first, "meta") {
        return None;
    }
    let name = doc.tree.node_name(first).to_uppercase();
    match doc.provenance(first).and_then(|dp| dp.stx.as_deref()) {
        Some(stx) => Some(format!("{name}_{stx}")),
        None => Some(name),
    }
}

fn source_slice(src: &str, start: usize, end: usize) -> String {
    src.get(start..end).unwrap_or_default().to_string()
}

fn dsr_json(dsr: Option<DomSourceRange>, missing: &str) -> String {
    match dsr {
        Some(d) => serde_json::to_string(&d).unwrap_or_else(|_| missing.to_string()),
        None => format!("{missing:?}"),
    }
}

/// Build the part list for a valid range, adding literal text for gaps
/// between the combined range and the recorded invocations
fn build_parts(
    doc: &mut Document,
    env: &Env,
    range: &DomRange,
    target: NodeId,
    combined: DomSourceRange,
    mut tpl_array: Vec<TplInfo>,
) {
    let src = env.page_src();
    let first_start = tpl_array.iter().find_map(TplInfo::dsr).and_then(|d| d.start);
    if let (Some(first), Some(start)) = (first_start, combined.start) {
        if first > start {
            if let Some(ftn) = find_first_templated_node(doc, range) {
                doc.provenance_mut(target).first_wikitext_node = Some(ftn);
            }
            tpl_array.insert(0, TplInfo::Wikitext(source_slice(src, start, first)));
        }
    }

    let last_end = tpl_array.iter().rev().find_map(TplInfo::dsr).and_then(|d| d.end);
    if let (Some(last), Some(end)) = (last_end, combined.end) {
        if last < end {
            tpl_array.push(TplInfo::Wikitext(source_slice(src, last, end)));
        }
    }

    let is_param = doc.tree.has_type_of(range.start_elem, "mw:Param");
    let mut pi = Vec::new();
    let mut parts = Vec::new();
    for info in tpl_array {
        match info {
            TplInfo::Wikitext(wt) => {
                if !wt.is_empty() {
                    parts.push(Part::Wikitext(wt));
                }
            }
            TplInfo::Invocation {
                mut args,
                param_infos,
                ..
            } => {
                args.i = Some(pi.len());
                pi.push(param_infos);
                parts.push(if is_param {
                    Part::TemplateArg { templatearg: args }
                } else {
                    Part::Template { template: args }
                });
            }
        }
    }

    // Keep extension keys already on the target
    let mut mw = doc.take_data_mw(target).unwrap_or_default();
    mw.parts = parts;
    doc.set_data_mw(target, mw);

    let marker_ftn = doc
        .provenance(range.start_elem)
        .and_then(|dp| dp.first_wikitext_node.clone());
    let dp = doc.provenance_mut(target);
    dp.pi = Some(pi);
    if dp.first_wikitext_node.is_none() {
        dp.first_wikitext_node = marker_ftn;
    }
}

fn remove_markers(doc: &mut Document, range: &DomRange) {
    if doc.tree.is_tpl_marker_meta(range.start_elem) {
        doc.tree.detach(range.start_elem);
    }
    doc.tree.detach(range.end_elem);
}

/// Encapsulate classified ranges. A range that cannot be encapsulated is
/// reported and left without construct metadata.
pub fn encapsulate_templates(
    doc: &mut Document,
    env: &mut Env,
    ranges: &[DomRange],
    tpl_arrays: &HashMap<String, Vec<TplInfo>>,
) -> EngineResult<()> {
    for (i, range) in ranges.iter().enumerate() {
        ensure_elements_in_range(doc, range)?;

        let Some(target) = find_encap_target(doc, range) else {
            env.error(
                KIND,
                format!(
                    "cannot encapsulate transclusion; start={}",
                    outer_html(doc, range.start_elem)
                ),
            );
            remove_markers(doc, range);
            continue;
        };

        // Always carry the construct type so the content stays protected
        // even if encapsulation fails below
        if range.start_elem != target {
            let t1 = doc.tree.get_attr(range.start_elem, "typeof").unwrap_or_default();
            let t2 = doc.tree.get_attr(target, "typeof").unwrap_or_default();
            let merged = [t1, t2]
                .iter()
                .filter(|t| !t.is_empty())
                .copied()
                .collect::<Vec<_>>()
                .join(" ");
            doc.tree.set_attr(target, "typeof", merged)?;
        }

        // Combined range: end extends to the range end; a table end whose
        // content was fostered out ahead of it also moves the start back
        let dp1 = doc.provenance(range.start).cloned().unwrap_or_default();
        let dsr2 = get_range_end_dsr(doc, range);
        let mut dsr1 = dp1.dsr;
        let mut valid = false;
        if let Some(d1) = dsr1.as_mut() {
            if let Some(d2) = dsr2 {
                if let Some(e2) = d2.end {
                    if d1.end.is_none_or(|e1| e2 > e1) {
                        d1.end = Some(e2);
                    }
                }
                if let Some(s2) = d2.start {
                    if doc.tree.is_tag(range.end, "table")
                        && (d1.start.is_some_and(|s1| s2 < s1) || dp1.fostered)
                    {
                        d1.start = Some(s2);
                    }
                }
            }
            valid = d1.is_valid();
        }

        let tpl_array = tpl_arrays.get(&range.id).filter(|a| !a.is_empty());
        match (valid, tpl_array, dsr1) {
            (true, Some(tpl_array), Some(d1)) => {
                build_parts(doc, env, range, target, d1, tpl_array.clone());
            }
            (_, tpl_array, _) => {
                let reason = if tpl_array.is_none() {
                    "no parts recorded for range"
                } else {
                    "no valid source range"
                };
                let msg = format!(
                    "Do not have necessary info. to encapsulate Tpl: {i} ({reason})\n\
                     Start Elt : {}\nEnd Elt   : {}\nStart DSR : {}\nEnd   DSR : {}",
                    outer_html(doc, range.start_elem),
                    outer_html(doc, range.end_elem),
                    dsr_json(dsr1, "no-start-dsr"),
                    dsr_json(dsr2, "[]"),
                );
                env.error(KIND, msg);
                valid = false;
            }
        }

        // Fostered content has no width of its own unless the unit also
        // captured the table it was fostered from
        if dp1.fostered {
            let parts = doc.data_mw(target).map_or(0, |mw| mw.parts.len());
            if parts <= 1 {
                if let Some(d1) = dsr1.as_mut() {
                    d1.end = d1.start;
                }
            }
        }

        if valid {
            if let Some(d1) = dsr1 {
                let src = d1.substr(env.page_src()).map(str::to_string);
                let dp = doc.provenance_mut(target);
                match dp.dsr.as_mut() {
                    Some(dsr) => {
                        dsr.start = d1.start;
                        dsr.end = d1.end;
                    }
                    None => dp.dsr = Some(d1),
                }
                dp.src = src;
            }
        }

        tracing::trace!(range = %range.id, target = ?target, valid, "Encapsulated range");
        remove_markers(doc, range);
    }
    Ok(())
}
