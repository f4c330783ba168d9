//! Comprehensive tests for selser-engine
//!
//! Forward post-processing, normalization and selective serialization
//! through the public API.

use std::collections::HashSet;

use pretty_assertions::assert_eq;
use selser_engine::dom::{DiffMark, Document, DomSourceRange, NodeId};
use selser_engine::html::{HtmlParser, HtmlSerializer};
use selser_engine::html2wt::{apply_changes, html_to_wikitext, normalize, Change};
use selser_engine::wt2html::{
    find_top_level_non_overlapping_ranges, find_wrappable_template_ranges, unpack_dom_fragments,
};
use selser_engine::{Config, Engine, Env};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn start_meta(about: &str, target: &str, s: usize, e: usize) -> String {
    format!(
        r#"<meta typeof="mw:Transclusion" about="{about}" data-parsoid='{{"tsr":[{s},{e}],"dsr":[{s},{e},null,null],"tmp":{{"tplarginfo":{{"dict":{{"target":{{"wt":"{target}"}}}},"paramInfos":[]}}}}}}'>"#
    )
}

fn end_meta(about: &str) -> String {
    format!(r#"<meta typeof="mw:Transclusion/End" about="{about}">"#)
}

fn body_html(doc: &Document) -> String {
    HtmlSerializer::new().serialize_body(doc).unwrap()
}

/// `a\n{{echo|hi}}` after the markup -> HTML conversion
fn echo_page() -> (String, &'static str) {
    let src = "a\n{{echo|hi}}";
    let start = r##"<meta typeof="mw:Transclusion" about="#mwt1" data-parsoid='{"tsr":[2,13],"dsr":[2,13,null,null],"tmp":{"tplarginfo":{"dict":{"target":{"wt":"echo"},"arguments":{"1":{"wt":"hi"}},"argumentOrder":["1"]},"paramInfos":[{"k":"1"}]}}}'>"##;
    let html = format!(
        r#"<p data-parsoid='{{"dsr":[0,1,0,0]}}'>a</p>{}{}<p>hi</p>{}"#,
        "\n",
        start,
        end_meta("#mwt1")
    );
    (html, src)
}

// ============================================================================
// NORMALIZER SCENARIOS
// ============================================================================

#[test]
fn test_scenario_a_adjacent_emphasis_merges() {
    let mut env = Env::new(Config::default(), "");
    let out = html_to_wikitext("<p><b>X</b><b>Y</b></p>", &mut env).unwrap();
    assert_eq!(out, "<p><b>XY</b></p>");
}

#[test]
fn test_scenario_b_nested_emphasis_is_rotated_and_merged() {
    let mut doc = HtmlParser::new()
        .parse_body("<p><i>A</i><b><i>X</i></b><b><i>Y</i></b><i>Z</i></p>")
        .unwrap();
    let mut env = Env::new(Config::default(), "");
    let body = doc.body();
    normalize(&mut doc, &mut env, body).unwrap();
    assert_eq!(body_html(&doc), "<p><i>A<b>XY</b>Z</i></p>");
}

#[test]
fn test_merge_convergence_reduces_siblings() {
    let html: String = (1..=9).map(|i| format!("<b>{i}</b>")).collect();
    let mut doc = HtmlParser::new().parse_body(&format!("<p>{html}</p>")).unwrap();
    let mut env = Env::new(Config::default(), "");
    let body = doc.body();
    let p = doc.tree.first_child(body).unwrap();
    let before = doc.tree.num_children(p);

    normalize(&mut doc, &mut env, body).unwrap();
    assert!(doc.tree.num_children(p) <= before);
    assert_eq!(body_html(&doc), "<p><b>123456789</b></p>");

    // A second run changes nothing
    normalize(&mut doc, &mut env, body).unwrap();
    assert_eq!(body_html(&doc), "<p><b>123456789</b></p>");
}

#[test]
fn test_scrub_mode_cleanups() {
    let engine = Engine::new(Config::default().with_scrub_wikitext(true));
    let out = engine
        .html2wt(
            r#"<p>a<i></i><font>b</font><a rel="mw:WikiLink" href="./X"></a>c</p>"#,
            "",
            false,
        )
        .unwrap();
    assert_eq!(out, "<p>abc</p>");
}

// ============================================================================
// RANGE RESOLVER SCENARIOS
// ============================================================================

#[test]
fn test_scenario_c_simple_range() {
    let html = format!(
        "<p>x</p>{}<b>a</b><i>b</i>{}",
        start_meta("#mwt1", "t", 1, 6),
        end_meta("#mwt1")
    );
    let mut doc = HtmlParser::new().parse_body(&html).unwrap();
    let mut env = Env::new(Config::default(), "x{{t}}");
    let body = doc.body();
    let ranges = find_wrappable_template_ranges(&mut doc, &mut env, body).unwrap();

    assert_eq!(ranges.len(), 1);
    assert!(!ranges[0].flipped);
    let covered: Vec<NodeId> = std::iter::successors(Some(ranges[0].start), |&n| {
        (n != ranges[0].end).then(|| doc.tree.next_sibling(n)).flatten()
    })
    .filter(|&n| !doc.tree.is_tag(n, "meta"))
    .collect();
    let names: Vec<&str> = covered.iter().map(|&n| doc.tree.node_name(n)).collect();
    assert_eq!(names, vec!["b", "i"]);
}

#[test]
fn test_scenario_d_end_marker_before_table() {
    let html = format!(
        "<p>x</p>{}<table><tbody><tr><td>{}a</td></tr></tbody></table>",
        end_meta("#mwt1"),
        start_meta("#mwt1", "t", 1, 6)
    );
    let mut doc = HtmlParser::new().parse_body(&html).unwrap();
    let mut env = Env::new(Config::default(), "x{{t}}");
    let body = doc.body();
    let table = doc.tree.children(body).find(|&n| doc.tree.is_tag(n, "table")).unwrap();

    let ranges = find_wrappable_template_ranges(&mut doc, &mut env, body).unwrap();
    assert_eq!(ranges.len(), 1);
    let r = &ranges[0];
    assert_eq!(r.start, table);
    assert_eq!(r.end, table);
    assert_eq!(r.foster_table, Some(table));
    assert!(!r.flipped);
    assert_eq!(doc.about(table), Some("#mwt1"));
}

#[test]
fn test_top_level_ranges_do_not_overlap() {
    let html = format!(
        "<p>x</p>{}<b>a</b>{}{}<i>b</i>{}",
        start_meta("#mwt1", "t", 1, 6),
        end_meta("#mwt1"),
        start_meta("#mwt2", "u", 6, 11),
        end_meta("#mwt2")
    );
    let mut doc = HtmlParser::new().parse_body(&html).unwrap();
    let mut env = Env::new(Config::default(), "x{{t}}{{u}}");
    let body = doc.body();
    let ranges = find_wrappable_template_ranges(&mut doc, &mut env, body).unwrap();
    let classified = find_top_level_non_overlapping_ranges(&mut doc, &mut env, body, ranges).unwrap();
    assert_eq!(classified.ranges.len(), 2);

    let mut seen = HashSet::new();
    for r in &classified.ranges {
        let mut n = Some(r.start);
        while let Some(x) = n {
            assert!(seen.insert(x), "node {x} is in two ranges");
            if x == r.end {
                break;
            }
            n = doc.tree.next_sibling(x);
        }
    }
}

// ============================================================================
// FRAGMENT UNPACKER
// ============================================================================

#[test]
fn test_scenario_e_nested_anchor_fragment() {
    let mut doc = HtmlParser::new()
        .parse_body(r#"<p><a href="x" data-parsoid='{"dsr":[0,20,null,null]}'>foo <span typeof="mw:DOMFragment" data-parsoid='{"html":"mwf1"}'></span></a></p>"#)
        .unwrap();
    let mut env = Env::new(Config::default(), "");
    let frag = HtmlParser::new()
        .parse_fragment(&mut doc, r#"<a href="y">bar</a>"#)
        .unwrap();
    env.set_dom_fragment("mwf1", frag);

    unpack_dom_fragments(&mut doc, &mut env).unwrap();

    let p = doc.tree.first_child(doc.body()).unwrap();
    let anchors: Vec<NodeId> = doc.tree.descendants(p).filter(|&n| doc.tree.is_tag(n, "a")).collect();
    assert_eq!(anchors.len(), 2);
    // No anchor inside another
    for &a in &anchors {
        assert!(!doc.tree.tree_has_element(a, "a"));
    }
    let relocated = anchors[1];
    assert!(doc.provenance(relocated).unwrap().misnested);
    assert_eq!(doc.dsr(relocated), Some(DomSourceRange::zero_width(Some(20))));
    assert_eq!(env.pending_fragments(), 0);
}

// ============================================================================
// FULL PIPELINE
// ============================================================================

#[test]
fn test_unedited_page_round_trips_exactly() {
    init_tracing();
    let (html, src) = echo_page();
    let engine = Engine::new(Config::default());
    let mut page = engine.wt2html(&html, src).unwrap();
    assert!(page.diagnostics().is_empty());
    assert_eq!(page.to_wikitext().unwrap(), src);
}

#[test]
fn test_round_trip_through_html() {
    let (html, src) = echo_page();
    let engine = Engine::new(Config::default());
    let page = engine.wt2html(&html, src).unwrap();
    let stored = page.to_html().unwrap();
    assert!(stored.contains(r##"about="#mwt1""##));
    assert!(stored.contains("data-mw="));

    assert_eq!(engine.html2wt(&stored, src, true).unwrap(), src);
    // Without source reuse the unit is rebuilt from its part list
    assert_eq!(engine.html2wt(&stored, src, false).unwrap(), "<p>a</p>\n{{echo|hi}}");
}

#[test]
fn test_part_list_reconstructs_source_range() {
    let src = "x{{t}}{{u}}";
    let html = format!(
        r#"<p data-parsoid='{{"dsr":[0,1,0,0]}}'>x</p>{}<b>a</b><i>c</i>{}{}<u>b</u>{}"#,
        start_meta("#mwt1", "t", 1, 6),
        end_meta("#mwt1"),
        start_meta("#mwt2", "u", 6, 11),
        end_meta("#mwt2")
    );
    let page = Engine::default().wt2html(&html, src).unwrap();
    let doc = &page.document;

    let units: Vec<NodeId> = doc
        .tree
        .children(doc.body())
        .filter(|&n| doc.data_mw(n).is_some())
        .collect();
    assert_eq!(units.len(), 2);
    for &unit in &units {
        let dsr = doc.dsr(unit).unwrap();
        let pi = doc.provenance(unit).and_then(|dp| dp.pi.as_deref()).unwrap_or_default();
        let rebuilt = doc.data_mw(unit).unwrap().reconstruct(pi);
        assert_eq!(Some(rebuilt.as_str()), dsr.substr(src));
    }
}

#[test]
fn test_about_groups_are_contiguous() {
    let src = "x{{t}}{{u}}";
    let html = format!(
        r#"<p data-parsoid='{{"dsr":[0,1,0,0]}}'>x</p>{}<b>a</b><i>c</i>{}{}<u>b</u>{}"#,
        start_meta("#mwt1", "t", 1, 6),
        end_meta("#mwt1"),
        start_meta("#mwt2", "u", 6, 11),
        end_meta("#mwt2")
    );
    let mut page = Engine::default().wt2html(&html, src).unwrap();
    let doc = &page.document;

    let abouts: Vec<Option<String>> = doc
        .tree
        .children(doc.body())
        .map(|n| doc.about(n).map(str::to_string))
        .collect();
    let mut closed = HashSet::new();
    let mut current: Option<&String> = None;
    for about in abouts.iter().flatten() {
        if current != Some(about) {
            assert!(closed.insert(about.clone()), "{about} is split");
            current = Some(about);
        }
    }
    assert_eq!(closed.len(), 2);

    assert_eq!(page.to_wikitext().unwrap(), src);
}

#[test]
fn test_edited_node_is_reserialized_others_reused() {
    let (html, src) = echo_page();
    let mut page = Engine::default().wt2html(&html, src).unwrap();
    apply_changes(&mut page.document, &mut page.env, &[Change::Code(1)], "edit").unwrap();

    let out = page.to_wikitext().unwrap();
    assert!(out.starts_with("<p data-foobar=\""), "{out}");
    assert!(out.ends_with("\">a</p>\n{{echo|hi}}"), "{out}");
}

#[test]
fn test_deleted_unit_disappears() {
    let (html, src) = echo_page();
    let mut page = Engine::default().wt2html(&html, src).unwrap();
    let changes = [Change::Code(0), Change::Code(0), Change::Code(3)];
    apply_changes(&mut page.document, &mut page.env, &changes, "edit").unwrap();

    let body = page.document.body();
    assert!(page.document.has_diff_mark(body, DiffMark::ChildrenChanged));
    assert_eq!(page.to_wikitext().unwrap(), "a\n");
}

// ============================================================================
// UNEDITED CONTENT
// ============================================================================

const ADJACENT_BOLD_SRC: &str = "'''X''''''Y'''";
const ADJACENT_BOLD_HTML: &str = r#"<p data-parsoid='{"dsr":[0,14,0,0]}'><b data-parsoid='{"dsr":[0,7,3,3]}'>X</b><b data-parsoid='{"dsr":[7,14,3,3]}'>Y</b></p>"#;

#[test]
fn test_post_processed_page_keeps_its_content() {
    let page = Engine::default()
        .wt2html("<div><p>a <b>b</b></p></div>", "a '''b'''")
        .unwrap();
    let html = page.to_html().unwrap();
    assert!(!html.is_empty());
    assert!(html.contains("<b>b</b>"), "{html}");
}

#[test]
fn test_unedited_adjacent_emphasis_round_trips_exactly() {
    init_tracing();
    let engine = Engine::default();
    let mut page = engine.wt2html(ADJACENT_BOLD_HTML, ADJACENT_BOLD_SRC).unwrap();
    assert_eq!(page.to_wikitext().unwrap(), ADJACENT_BOLD_SRC);
    assert_eq!(
        engine.html2wt(ADJACENT_BOLD_HTML, ADJACENT_BOLD_SRC, true).unwrap(),
        ADJACENT_BOLD_SRC
    );
}

#[test]
fn test_unedited_nested_emphasis_round_trips_exactly() {
    let src = "''A'''''X''''''''''Y''''''Z''";
    let html = format!(
        r#"<p data-parsoid='{{"dsr":[0,{},0,0]}}'><i>A</i><b><i>X</i></b><b><i>Y</i></b><i>Z</i></p>"#,
        src.len()
    );
    let engine = Engine::default();
    assert_eq!(engine.html2wt(&html, src, true).unwrap(), src);

    // An edit elsewhere leaves the paragraph's source untouched
    let edited = format!(r#"{html}<p data-parsoid-diff='{{"diff":["inserted"]}}'>z</p>"#);
    assert_eq!(engine.html2wt(&edited, src, true).unwrap(), format!("{src}<p>z</p>"));
}

#[test]
fn test_only_the_edited_sibling_is_normalized() {
    let src = format!("{ADJACENT_BOLD_SRC}\n\n''A''");
    let html = format!(
        r#"{ADJACENT_BOLD_HTML}{}<p data-parsoid='{{"dsr":[16,21,0,0]}}' data-parsoid-diff='{{"diff":["children-changed"]}}'><i data-parsoid='{{"dsr":[16,21,2,2]}}'>A</i><i data-parsoid-diff='{{"diff":["inserted"]}}'>B</i></p>"#,
        "\n\n"
    );
    let out = Engine::default().html2wt(&html, &src, true).unwrap();
    assert_eq!(out, format!("{ADJACENT_BOLD_SRC}\n\n<p><i>AB</i></p>"));
}
