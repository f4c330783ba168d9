//! Per-node records stored in the document side tables
//!
//! [`Provenance`] is what ends up in the `data-parsoid` attribute and
//! [`DataMw`] is the `data-mw` attribute. Both keep unknown keys in a
//! flattened `extra` map so a load/store round trip is lossless.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn is_false(b: &bool) -> bool {
    !*b
}

/// Source range of a DOM node: byte offsets into the original source plus
/// the widths of the opening and closing tags.
///
/// Serialized as `[start, end, openWidth, closeWidth]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Option<usize>>", into = "[Option<usize>; 4]")]
pub struct DomSourceRange {
    pub start: Option<usize>,
    pub end: Option<usize>,
    pub open_width: Option<usize>,
    pub close_width: Option<usize>,
}

impl DomSourceRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            open_width: None,
            close_width: None,
        }
    }

    pub fn with_widths(start: usize, end: usize, open: usize, close: usize) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            open_width: Some(open),
            close_width: Some(close),
        }
    }

    /// Zero-width range at `offset`
    pub fn zero_width(offset: Option<usize>) -> Self {
        Self {
            start: offset,
            end: offset,
            open_width: None,
            close_width: None,
        }
    }

    /// Both offsets known and ordered
    pub fn is_valid(&self) -> bool {
        matches!((self.start, self.end), (Some(s), Some(e)) if s <= e)
    }

    pub fn len(&self) -> Option<usize> {
        match (self.start, self.end) {
            (Some(s), Some(e)) if s <= e => Some(e - s),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Slice the covered text out of `src`
    pub fn substr<'a>(&self, src: &'a str) -> Option<&'a str> {
        match (self.start, self.end) {
            (Some(s), Some(e)) if s <= e => src.get(s..e),
            _ => None,
        }
    }
}

impl From<Vec<Option<usize>>> for DomSourceRange {
    fn from(v: Vec<Option<usize>>) -> Self {
        let at = |i: usize| v.get(i).copied().flatten();
        Self {
            start: at(0),
            end: at(1),
            open_width: at(2),
            close_width: at(3),
        }
    }
}

impl From<DomSourceRange> for [Option<usize>; 4] {
    fn from(r: DomSourceRange) -> Self {
        [r.start, r.end, r.open_width, r.close_width]
    }
}

/// Token source span, serialized as `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Option<usize>>", into = "[Option<usize>; 2]")]
pub struct SourceSpan {
    pub start: Option<usize>,
    pub end: Option<usize>,
}

impl SourceSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }
}

impl From<Vec<Option<usize>>> for SourceSpan {
    fn from(v: Vec<Option<usize>>) -> Self {
        Self {
            start: v.first().copied().flatten(),
            end: v.get(1).copied().flatten(),
        }
    }
}

impl From<SourceSpan> for [Option<usize>; 2] {
    fn from(s: SourceSpan) -> Self {
        [s.start, s.end]
    }
}

/// Order and spacing of one invocation argument
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParamInfo {
    pub k: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub named: bool,
    /// Whitespace before the key, after the key, after `=`, after the value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spc: Option<[String; 4]>,
}

impl ParamInfo {
    pub fn positional(k: impl Into<String>) -> Self {
        Self {
            k: k.into(),
            named: false,
            spc: None,
        }
    }

    pub fn named(k: impl Into<String>) -> Self {
        Self {
            k: k.into(),
            named: true,
            spc: None,
        }
    }
}

/// Invocation target (template name as written)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Target {
    pub wt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

/// One generated-construct invocation inside a part list
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    pub target: Target,
    /// Argument name to `{"wt": ...}`, in source order
    #[serde(default)]
    pub arguments: Map<String, Value>,
    #[serde(default)]
    pub argument_order: Vec<String>,
    /// Index among the unit's invocations (matches the provenance `pi` entry)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub i: Option<usize>,
}

impl Invocation {
    pub fn new(target: &str) -> Self {
        Self {
            target: Target {
                wt: target.to_string(),
                href: None,
            },
            ..Default::default()
        }
    }

    /// Append an argument, keeping `argumentOrder` in sync
    pub fn with_argument(mut self, name: &str, wt: &str) -> Self {
        let mut value = Map::new();
        value.insert("wt".to_string(), Value::String(wt.to_string()));
        self.arguments.insert(name.to_string(), Value::Object(value));
        self.argument_order.push(name.to_string());
        self
    }

    /// Wikitext value of an argument
    pub fn argument_wt(&self, name: &str) -> Option<&str> {
        self.arguments.get(name)?.get("wt")?.as_str()
    }

    /// Rebuild the original invocation text.
    ///
    /// `param_infos` carries spacing and the named/positional split; when it
    /// is empty, `argumentOrder` is used and numeric keys are positional.
    pub fn to_wikitext(&self, param_infos: &[ParamInfo], is_param: bool) -> String {
        let (open, close) = if is_param { ("{{{", "}}}") } else { ("{{", "}}") };
        let mut out = String::from(open);
        out.push_str(&self.target.wt);

        let fallback: Vec<ParamInfo>;
        let infos = if param_infos.is_empty() {
            fallback = self
                .argument_order
                .iter()
                .map(|k| {
                    if k.parse::<usize>().is_ok() {
                        ParamInfo::positional(k.as_str())
                    } else {
                        ParamInfo::named(k.as_str())
                    }
                })
                .collect();
            &fallback
        } else {
            param_infos
        };

        for info in infos {
            let value = self.argument_wt(&info.k).unwrap_or_default();
            out.push('|');
            if info.named {
                match &info.spc {
                    Some([a, b, c, d]) => {
                        out.push_str(a);
                        out.push_str(&info.k);
                        out.push_str(b);
                        out.push('=');
                        out.push_str(c);
                        out.push_str(value);
                        out.push_str(d);
                    }
                    None => {
                        out.push_str(&info.k);
                        out.push('=');
                        out.push_str(value);
                    }
                }
            } else {
                out.push_str(value);
            }
        }
        out.push_str(close);
        out
    }
}

/// Argument information recorded on a start marker by the template handler
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgInfo {
    pub dict: Invocation,
    #[serde(default)]
    pub param_infos: Vec<ParamInfo>,
}

/// One entry of a part list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    /// Literal source text
    Wikitext(String),
    Template { template: Invocation },
    TemplateArg { templatearg: Invocation },
}

impl Part {
    pub fn invocation(&self) -> Option<&Invocation> {
        match self {
            Part::Wikitext(_) => None,
            Part::Template { template } => Some(template),
            Part::TemplateArg { templatearg } => Some(templatearg),
        }
    }

    /// Original text of this part
    pub fn to_wikitext(&self, pi: &[Vec<ParamInfo>]) -> String {
        match self {
            Part::Wikitext(wt) => wt.clone(),
            Part::Template { template: inv } | Part::TemplateArg { templatearg: inv } => {
                let infos = inv
                    .i
                    .and_then(|i| pi.get(i))
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                inv.to_wikitext(infos, matches!(self, Part::TemplateArg { .. }))
            }
        }
    }
}

/// Construct metadata (`data-mw`)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataMw {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<Part>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DataMw {
    pub fn with_parts(parts: Vec<Part>) -> Self {
        Self {
            parts,
            extra: Map::new(),
        }
    }

    /// Number of invocation entries in the part list
    pub fn invocation_count(&self) -> usize {
        self.parts.iter().filter(|p| p.invocation().is_some()).count()
    }

    /// Concatenate every part's original text
    pub fn reconstruct(&self, pi: &[Vec<ParamInfo>]) -> String {
        self.parts.iter().map(|p| p.to_wikitext(pi)).collect()
    }
}

/// Pipeline-internal data, only serialized on request
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TempData {
    /// Node added by an editor after parsing
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_new: bool,
    /// Span wrapper synthesized by the pipeline
    #[serde(default, skip_serializing_if = "is_false")]
    pub wrapper: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub from_cache: bool,
    #[serde(default, rename = "setDSR", skip_serializing_if = "is_false")]
    pub set_dsr: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub from_foster: bool,
    #[serde(default, rename = "tplarginfo", skip_serializing_if = "Option::is_none")]
    pub arg_info: Option<ArgInfo>,
}

impl TempData {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Provenance record (`data-parsoid`)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dsr: Option<DomSourceRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tsr: Option<SourceSpan>,
    /// Syntax flavour; `"html"` marks literal markup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stx: Option<String>,
    /// Legacy single-row flag on table cells
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stx_v: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub fostered: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub misnested: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_inserted_start: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_inserted_end: bool,
    /// Cached original source of an encapsulated unit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    /// Parameter infos, one array per invocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pi: Option<Vec<Vec<ParamInfo>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_wikitext_node: Option<String>,
    #[serde(default, rename = "unwrappedWT", skip_serializing_if = "Option::is_none")]
    pub unwrapped_wt: Option<String>,
    /// Fragment id carried by a DOM fragment placeholder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "TempData::is_empty")]
    pub tmp: TempData,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Provenance {
    /// Was this node written as literal HTML in the source?
    pub fn is_literal_html(&self) -> bool {
        self.stx.as_deref() == Some("html")
    }

    /// Was this node inserted by an edit?
    pub fn is_new(&self) -> bool {
        self.tmp.is_new
    }

    pub fn has_valid_dsr(&self) -> bool {
        self.dsr.is_some_and(|d| d.is_valid())
    }

    /// Copy without pipeline-internal data
    pub fn without_tmp(&self) -> Self {
        Self {
            tmp: TempData::default(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dsr_json_shape() {
        let dsr = DomSourceRange::with_widths(0, 10, 3, 4);
        assert_eq!(serde_json::to_string(&dsr).unwrap(), "[0,10,3,4]");

        let parsed: DomSourceRange = serde_json::from_str("[5,9]").unwrap();
        assert_eq!(parsed, DomSourceRange::new(5, 9));

        let partial: DomSourceRange = serde_json::from_str("[null,9,null,null]").unwrap();
        assert!(!partial.is_valid());
    }

    #[test]
    fn test_dsr_substr() {
        let src = "abc{{x}}def";
        assert_eq!(DomSourceRange::new(3, 8).substr(src), Some("{{x}}"));
        assert_eq!(DomSourceRange::new(3, 80).substr(src), None);
    }

    #[test]
    fn test_provenance_keeps_unknown_keys() {
        let json = r#"{"dsr":[0,5,0,0],"stx":"html","a":{"b":1},"tmp":{"isNew":true}}"#;
        let dp: Provenance = serde_json::from_str(json).unwrap();
        assert!(dp.is_literal_html());
        assert!(dp.is_new());
        assert_eq!(dp.extra.get("a"), Some(&serde_json::json!({"b": 1})));

        let out = serde_json::to_string(&dp.without_tmp()).unwrap();
        assert_eq!(out, r#"{"dsr":[0,5,0,0],"stx":"html","a":{"b":1}}"#);
    }

    #[test]
    fn test_part_list_json_keeps_argument_order() {
        let inv = Invocation::new("echo")
            .with_argument("z", "1")
            .with_argument("a", "2");
        let mw = DataMw::with_parts(vec![
            Part::Wikitext("x ".into()),
            Part::Template { template: inv },
        ]);
        let json = serde_json::to_string(&mw).unwrap();
        assert!(json.find("\"z\"").unwrap() < json.find("\"a\"").unwrap());

        let back: DataMw = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mw);
        assert_eq!(
            back.parts[1].invocation().unwrap().argument_order,
            vec!["z".to_string(), "a".to_string()]
        );
    }

    #[test]
    fn test_invocation_to_wikitext() {
        let inv = Invocation::new("echo")
            .with_argument("1", "foo")
            .with_argument("k", "v");
        assert_eq!(inv.to_wikitext(&[], false), "{{echo|foo|k=v}}");

        let spaced = ParamInfo {
            k: "k".into(),
            named: true,
            spc: Some([" ".into(), " ".into(), " ".into(), "\n".into()]),
        };
        let infos = vec![ParamInfo::positional("1"), spaced];
        assert_eq!(inv.to_wikitext(&infos, false), "{{echo|foo| k = v\n}}");
        assert_eq!(Invocation::new("p").to_wikitext(&[], true), "{{{p}}}");
    }

    #[test]
    fn test_data_mw_reconstruct() {
        let mut inv = Invocation::new("t").with_argument("1", "a");
        inv.i = Some(0);
        let mw = DataMw::with_parts(vec![
            Part::Wikitext("pre ".into()),
            Part::Template { template: inv },
            Part::Wikitext(" post".into()),
        ]);
        assert_eq!(mw.invocation_count(), 1);
        assert_eq!(mw.reconstruct(&[vec![ParamInfo::positional("1")]]), "pre {{t|a}} post");
    }
}
