//! Per-document environment
//!
//! Holds everything the passes share for one conversion: configuration,
//! the page source, id counters, the DOM fragment map, resource usage and
//! the diagnostics collected along the way. Nothing here outlives the
//! document.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use selser_dom::{Document, NodeId, PARSOID_ABOUT_PREFIX};

use crate::{Config, EngineError, EngineResult};

/// Severity of a [`Diagnostic`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Warning,
    Error,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticLevel::Warning => f.write_str("warning"),
            DiagnosticLevel::Error => f.write_str("error"),
        }
    }
}

/// A recoverable problem found while processing a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    /// Log channel, e.g. `tplwrap/encap`
    pub kind: &'static str,
    pub message: String,
}

/// Per-document environment
#[derive(Debug)]
pub struct Env {
    config: Config,
    page_src: String,
    selser_mode: bool,
    uid: u32,
    fid: u32,
    fragments: HashMap<String, NodeId>,
    wt2html_usage: BTreeMap<String, u64>,
    html2wt_usage: BTreeMap<String, u64>,
    diagnostics: Vec<Diagnostic>,
}

impl Env {
    pub fn new(config: Config, page_src: impl Into<String>) -> Self {
        Self {
            config,
            page_src: page_src.into(),
            selser_mode: false,
            uid: 1,
            fid: 1,
            fragments: HashMap::new(),
            wt2html_usage: BTreeMap::new(),
            html2wt_usage: BTreeMap::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Original markup of the page
    pub fn page_src(&self) -> &str {
        &self.page_src
    }

    pub fn selser_mode(&self) -> bool {
        self.selser_mode
    }

    pub fn set_selser_mode(&mut self, on: bool) {
        self.selser_mode = on;
    }

    pub fn with_selser_mode(mut self, on: bool) -> Self {
        self.selser_mode = on;
        self
    }

    // ------------------------------------------------------------------
    // Ids
    // ------------------------------------------------------------------

    /// Fresh about id (`#mwt<n>`)
    pub fn new_about_id(&mut self) -> String {
        let id = format!("{PARSOID_ABOUT_PREFIX}{}", self.uid);
        self.uid += 1;
        id
    }

    /// Fresh fragment id (`mwf<n>`)
    pub fn new_fragment_id(&mut self) -> String {
        let id = format!("mwf{}", self.fid);
        self.fid += 1;
        id
    }

    // ------------------------------------------------------------------
    // DOM fragments
    // ------------------------------------------------------------------

    /// Register a fragment container under `id`
    pub fn set_dom_fragment(&mut self, id: impl Into<String>, fragment: NodeId) {
        self.fragments.insert(id.into(), fragment);
    }

    pub fn dom_fragment(&self, id: &str) -> Option<NodeId> {
        self.fragments.get(id).copied()
    }

    /// Drop a fragment whose content has been spliced into the page
    pub fn remove_dom_fragment(&mut self, doc: &Document, id: &str) -> EngineResult<()> {
        let Some(fragment) = self.fragments.remove(id) else {
            return Err(EngineError::MissingFragment(id.to_string()));
        };
        if doc.tree.has_children(fragment) {
            return Err(EngineError::UnconsumedFragment(id.to_string()));
        }
        Ok(())
    }

    pub fn pending_fragments(&self) -> usize {
        self.fragments.len()
    }

    // ------------------------------------------------------------------
    // Resource limits
    // ------------------------------------------------------------------

    /// Add to a markup -> HTML counter; false once over its limit
    pub fn bump_wt2html_resource_use(&mut self, resource: &str, count: u64) -> bool {
        let used = self.wt2html_usage.entry(resource.to_string()).or_insert(0);
        *used += count;
        match self.config.wt2html_limits.get(resource) {
            Some(&limit) => *used <= limit,
            None => true,
        }
    }

    /// Add to an HTML -> markup counter; errors once over its limit
    pub fn bump_html2wt_resource_use(&mut self, resource: &str, count: u64) -> EngineResult<()> {
        let used = self.html2wt_usage.entry(resource.to_string()).or_insert(0);
        *used += count;
        match self.config.html2wt_limits.get(resource) {
            Some(&limit) if *used > limit => Err(EngineError::ResourceLimitExceeded {
                resource: resource.to_string(),
                used: *used,
                limit,
            }),
            _ => Ok(()),
        }
    }

    /// Checkpoint between passes: fail if any markup -> HTML counter is over
    pub fn check_resource_limits(&self) -> EngineResult<()> {
        for (resource, &used) in &self.wt2html_usage {
            if let Some(&limit) = self.config.wt2html_limits.get(resource) {
                if used > limit {
                    tracing::warn!(resource = %resource, used, limit, "Resource limit exceeded");
                    return Err(EngineError::ResourceLimitExceeded {
                        resource: resource.clone(),
                        used,
                        limit,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn wt2html_usage(&self, resource: &str) -> u64 {
        self.wt2html_usage.get(resource).copied().unwrap_or(0)
    }

    pub fn html2wt_usage(&self, resource: &str) -> u64 {
        self.html2wt_usage.get(resource).copied().unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    pub fn warn(&mut self, kind: &'static str, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(kind, "{message}");
        self.diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Warning,
            kind,
            message,
        });
    }

    pub fn error(&mut self, kind: &'static str, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(kind, "{message}");
        self.diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Error,
            kind,
            message,
        });
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn diagnostics_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.kind == kind)
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_sequential() {
        let mut env = Env::new(Config::default(), "");
        assert_eq!(env.new_about_id(), "#mwt1");
        assert_eq!(env.new_about_id(), "#mwt2");
        assert_eq!(env.new_fragment_id(), "mwf1");
    }

    #[test]
    fn test_wt2html_limits() {
        let config = Config::default().with_wt2html_limit("wikitextSize", 10);
        let mut env = Env::new(config, "");
        assert!(env.bump_wt2html_resource_use("wikitextSize", 10));
        assert!(env.check_resource_limits().is_ok());
        assert!(!env.bump_wt2html_resource_use("wikitextSize", 1));
        let err = env.check_resource_limits().unwrap_err();
        assert!(err.is_resource_limit());
        assert!(env.bump_wt2html_resource_use("unlimited", 1_000));
    }

    #[test]
    fn test_html2wt_limit_errors() {
        let config = Config::default().with_html2wt_limit("htmlSize", 3);
        let mut env = Env::new(config, "");
        assert!(env.bump_html2wt_resource_use("htmlSize", 3).is_ok());
        assert!(matches!(
            env.bump_html2wt_resource_use("htmlSize", 1),
            Err(EngineError::ResourceLimitExceeded { used: 4, limit: 3, .. })
        ));
    }

    #[test]
    fn test_fragment_removal_requires_empty() {
        let mut doc = Document::new();
        let mut env = Env::new(Config::default(), "");
        let frag = doc.tree.create_fragment();
        let t = doc.tree.create_text("x");
        doc.tree.append_child(frag, t).unwrap();
        env.set_dom_fragment("mwf1", frag);

        assert!(matches!(
            env.remove_dom_fragment(&doc, "mwf1"),
            Err(EngineError::UnconsumedFragment(_))
        ));
        assert!(matches!(
            env.remove_dom_fragment(&doc, "mwf1"),
            Err(EngineError::MissingFragment(_))
        ));
    }

    #[test]
    fn test_diagnostics_are_recorded() {
        let mut env = Env::new(Config::default(), "");
        env.warn("tplwrap/findranges", "dangling end marker");
        env.error("tplwrap/encap", "no target");
        assert_eq!(env.diagnostics().len(), 2);
        assert_eq!(env.diagnostics_of_kind("tplwrap/encap").count(), 1);
        assert_eq!(env.diagnostics()[0].level, DiagnosticLevel::Warning);
    }
}
