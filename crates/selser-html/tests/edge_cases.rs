//! Edge case tests for selser-html
//!
//! Malformed input, comments and escaping.

use selser_html::{parse, HtmlError, HtmlParser, HtmlSerializer};

// ============================================================================
// EMPTY AND MINIMAL INPUT
// ============================================================================

#[test]
fn test_parse_empty_string() {
    let doc = parse("").unwrap();
    assert!(!doc.tree.has_children(doc.body()));
}

#[test]
fn test_parse_only_whitespace_text() {
    let doc = parse("<p> </p>").unwrap();
    let p = doc.tree.first_child(doc.body()).unwrap();
    let t = doc.tree.first_child(p).unwrap();
    assert!(doc.tree.is_iew(t));
}

// ============================================================================
// MALFORMED HTML
// ============================================================================

#[test]
fn test_unclosed_tags_are_closed() {
    let doc = parse("<div><p><span>text").unwrap();
    let html = HtmlSerializer::new().serialize_body(&doc).unwrap();
    assert_eq!(html, "<div><p><span>text</span></p></div>");
}

#[test]
fn test_nested_anchor_is_split_by_parser() {
    let doc = parse(r#"<a href="x">a<a href="y">b</a></a>"#).unwrap();
    assert_eq!(doc.tree.num_children(doc.body()), 2);
}

#[test]
fn test_invalid_data_parsoid_is_an_error() {
    let err = parse("<p data-parsoid='{nope'>x</p>").unwrap_err();
    assert!(matches!(err, HtmlError::Dom(_)));

    // raw parsing leaves the attribute alone
    assert!(HtmlParser::raw().parse_body("<p data-parsoid='{nope'>x</p>").is_ok());
}

// ============================================================================
// COMMENTS AND ESCAPING
// ============================================================================

#[test]
fn test_comment_body_kept_encoded() {
    let doc = parse("<p>x</p><!--&#x2D;&#x2D;&gt;-->").unwrap();
    let c = doc.tree.last_child(doc.body()).unwrap();
    assert_eq!(doc.tree.comment(c), Some("&#x2D;&#x2D;&gt;"));
}

#[test]
fn test_text_escaping() {
    let doc = parse("<p>&lt;b&gt; &amp;</p>").unwrap();
    let p = doc.tree.first_child(doc.body()).unwrap();
    assert_eq!(doc.tree.text_content(p), "<b> &");
    let html = HtmlSerializer::new().serialize_body(&doc).unwrap();
    assert_eq!(html, "<p>&lt;b&gt; &amp;</p>");
}

#[test]
fn test_raw_text_not_escaped() {
    let doc = parse("<div><style>a > b {}</style></div>").unwrap();
    let html = HtmlSerializer::new().serialize_outer(&doc, doc.body()).unwrap();
    assert!(html.contains("a > b {}"));
}
