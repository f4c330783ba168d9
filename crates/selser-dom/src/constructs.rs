//! Generated-construct type vocabulary carried in `typeof`

use std::fmt;

/// Kind of generated construct
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstructType {
    /// `mw:Transclusion` (template invocation)
    Transclusion,
    /// `mw:Param` (template parameter substitution)
    Param,
    /// `mw:LanguageVariant`
    LanguageVariant,
    /// `mw:Extension/<name>`
    Extension(String),
    /// `mw:DOMFragment` placeholder for a pre-built fragment
    DomFragment,
    /// `mw:DOMFragment/sealed/<name>`; never unpacked here
    SealedFragment(String),
}

impl ConstructType {
    /// The `typeof` token for this construct
    pub fn type_of(&self) -> String {
        match self {
            ConstructType::Transclusion => "mw:Transclusion".to_string(),
            ConstructType::Param => "mw:Param".to_string(),
            ConstructType::LanguageVariant => "mw:LanguageVariant".to_string(),
            ConstructType::Extension(name) => format!("mw:Extension/{name}"),
            ConstructType::DomFragment => "mw:DOMFragment".to_string(),
            ConstructType::SealedFragment(name) => format!("mw:DOMFragment/sealed/{name}"),
        }
    }

    /// Types that mark the first wrapper of encapsulated content
    pub fn is_encapsulation(&self) -> bool {
        matches!(
            self,
            ConstructType::Transclusion
                | ConstructType::Param
                | ConstructType::LanguageVariant
                | ConstructType::Extension(_)
        )
    }

    /// Types delimited by start/end marker metas and resolved into ranges
    pub fn is_template_range(&self) -> bool {
        matches!(self, ConstructType::Transclusion | ConstructType::Param)
    }
}

impl fmt::Display for ConstructType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_of())
    }
}

/// A parsed `typeof` token: construct type plus the `/End` flag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstructMarker {
    pub kind: ConstructType,
    pub is_end: bool,
}

impl ConstructMarker {
    /// Parse one `typeof` token, returning `None` for anything outside
    /// the construct vocabulary
    pub fn parse(token: &str) -> Option<Self> {
        let rest = token.strip_prefix("mw:")?;
        let (rest, is_end) = match rest.strip_suffix("/End") {
            Some(r) => (r, true),
            None => (rest, false),
        };
        let kind = match rest {
            "Transclusion" => ConstructType::Transclusion,
            "Param" => ConstructType::Param,
            "LanguageVariant" => ConstructType::LanguageVariant,
            "DOMFragment" => ConstructType::DomFragment,
            _ => {
                if let Some(name) = rest.strip_prefix("DOMFragment/sealed/") {
                    ConstructType::SealedFragment(name.to_string())
                } else if let Some(name) = rest.strip_prefix("Extension/") {
                    if name.is_empty() || name.contains(char::is_whitespace) {
                        return None;
                    }
                    ConstructType::Extension(name.to_string())
                } else {
                    return None;
                }
            }
        };
        Some(Self { kind, is_end })
    }

    pub fn start(kind: ConstructType) -> Self {
        Self {
            kind,
            is_end: false,
        }
    }

    pub fn end(kind: ConstructType) -> Self {
        Self { kind, is_end: true }
    }
}

impl fmt::Display for ConstructMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if self.is_end {
            f.write_str("/End")?;
        }
        Ok(())
    }
}
