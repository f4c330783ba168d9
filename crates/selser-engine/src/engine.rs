//! Engine - conversion entry points

use selser_html::HtmlParser;

use crate::html2wt::html_to_wikitext;
use crate::wt2html::post_process;
use crate::{Config, EngineResult, Env, Page};

/// Conversion engine; one [`Env`] is created per document
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: Config,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Post-process the HTML produced for `page_src`
    pub fn wt2html(&self, html: &str, page_src: &str) -> EngineResult<Page> {
        tracing::info!(bytes = page_src.len(), "Post-processing document");
        let mut document = HtmlParser::new().parse_body(html)?;
        let mut env = Env::new(self.config.clone(), page_src);
        post_process(&mut document, &mut env)?;
        Ok(Page { document, env })
    }

    /// Convert (possibly edited) HTML back to markup. With `selser`, nodes
    /// without change markers reuse their original source from `page_src`.
    pub fn html2wt(&self, html: &str, page_src: &str, selser: bool) -> EngineResult<String> {
        tracing::info!(bytes = html.len(), selser, "Serializing document");
        let mut env = Env::new(self.config.clone(), page_src).with_selser_mode(selser);
        html_to_wikitext(html, &mut env)
    }
}
