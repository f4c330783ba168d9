//! Page - one converted document and its environment

use selser_dom::{Document, StoreOptions};
use selser_html::HtmlSerializer;

use crate::html2wt::serialize_document;
use crate::{Diagnostic, EngineResult, Env};

/// A post-processed document
#[derive(Debug)]
pub struct Page {
    pub document: Document,
    pub env: Env,
}

impl Page {
    /// HTML with provenance, data-mw and about ids written back
    pub fn to_html(&self) -> EngineResult<String> {
        let serializer = HtmlSerializer::with_data_attributes(StoreOptions::default());
        Ok(serializer.serialize_body(&self.document)?)
    }

    /// Serialize back to markup, reusing the original source of every
    /// unedited node
    pub fn to_wikitext(&mut self) -> EngineResult<String> {
        self.env.set_selser_mode(true);
        serialize_document(&mut self.document, &mut self.env)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.env.diagnostics()
    }
}
