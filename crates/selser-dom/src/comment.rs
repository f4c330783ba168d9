//! Comment encoding between wikitext and the DOM
//!
//! Wikitext comments may contain anything but `-->`. DOM comments must not
//! contain `--`, end in `-`, or start with `>`. The DOM form therefore
//! entity-encodes `-`, `>` and `&`. To make `-->` expressible in wikitext,
//! the wikitext form writes it as `--&gt;` and adds one `amp;` to every
//! existing `--&(amp;)*gt;` sequence, which keeps the mapping one-to-one.
//!
//! | comment text | wikitext         | DOM                          |
//! |--------------|------------------|------------------------------|
//! | `& - >`      | `& - >`          | `&amp; &#x2D; &gt;`          |
//! | `-->`        | `--&gt;`         | `&#x2D;&#x2D;&gt;`           |
//! | `--&gt;`     | `--&amp;gt;`     | `&#x2D;&#x2D;&amp;gt;`       |

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::{DomTree, NodeId};

static WT_ESCAPED_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--&(?:amp;)*gt;").expect("valid regex"));

static TRUE_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--(?:&(?:amp;)*gt;|>)").expect("valid regex"));

static DOM_UNSAFE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[->&]").expect("valid regex"));

fn decode_entities(s: &str) -> Cow<'_, str> {
    html_escape::decode_html_entities(s)
}

/// Map a wikitext-escaped comment body to its DOM-escaped form
pub fn encode_comment(comment: &str) -> String {
    let true_value = WT_ESCAPED_CLOSE.replace_all(comment, |caps: &Captures<'_>| {
        decode_entities(&caps[0]).into_owned()
    });
    DOM_UNSAFE
        .replace_all(&true_value, |caps: &Captures<'_>| match &caps[0] {
            "-" => "&#x2D;",
            ">" => "&gt;",
            _ => "&amp;",
        })
        .into_owned()
}

/// Map a DOM-escaped comment body back to wikitext
pub fn decode_comment(comment: &str) -> String {
    let true_value = decode_entities(comment);
    TRUE_CLOSE
        .replace_all(&true_value, |caps: &Captures<'_>| {
            let s = &caps[0];
            if s == "-->" {
                "--&gt;".to_string()
            } else {
                format!("--&amp;{}", &s[3..])
            }
        })
        .into_owned()
}

/// Source width of a comment node: `<!--` + decoded body + `-->`
pub fn decoded_comment_length(tree: &DomTree, id: NodeId) -> usize {
    tree.comment(id)
        .map(|c| decode_comment(c).len() + 7)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_table() {
        assert_eq!(encode_comment("& - >"), "&amp; &#x2D; &gt;");
        assert_eq!(encode_comment("--&gt;"), "&#x2D;&#x2D;&gt;");
        assert_eq!(encode_comment("--&amp;gt;"), "&#x2D;&#x2D;&amp;gt;");
        assert_eq!(encode_comment("Use &gt; here"), "Use &amp;gt; here");
    }

    #[test]
    fn test_decode_table() {
        assert_eq!(decode_comment("&amp; &#x2D; &gt;"), "& - >");
        assert_eq!(decode_comment("&#x2D;&#x2D;&gt;"), "--&gt;");
        assert_eq!(decode_comment("&#x2D;&#x2D;&amp;gt;"), "--&amp;gt;");
        assert_eq!(decode_comment("&#43;&#43;&gt;"), "++>");
    }

    #[test]
    fn test_wikitext_round_trip() {
        for wt in [
            "",
            " plain ",
            "a -- b",
            "--&gt;",
            "--&amp;gt;",
            "--&amp;amp;gt;",
            "x&y<z",
            "trailing-",
            "ünïcödé ✓ ok",
        ] {
            assert_eq!(decode_comment(&encode_comment(wt)), wt, "wikitext {wt:?}");
        }
    }

    #[test]
    fn test_dom_round_trip() {
        for dom in ["&#x2D;&#x2D;&gt;", "&amp;", "a &#x2D; b"] {
            assert_eq!(encode_comment(&decode_comment(dom)), dom, "dom {dom:?}");
        }
    }

    #[test]
    fn test_decoded_comment_length() {
        let mut tree = DomTree::new();
        let c = tree.create_comment(&encode_comment(" x "));
        assert_eq!(decoded_comment_length(&tree, c), " x ".len() + 7);
        let t = tree.create_text("x");
        assert_eq!(decoded_comment_length(&tree, t), 0);
    }
}
