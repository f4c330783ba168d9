//! selser HTML
//!
//! HTML5 parsing built on html5ever, converted into the selser arena DOM,
//! and the matching serializer. Data attributes are moved into the
//! document side tables on parse and written back on request when
//! serializing.

mod parser;
mod serializer;

pub use parser::HtmlParser;
pub use serializer::HtmlSerializer;

use selser_dom::{Document, DomError};

/// Parse an HTML string into a document, loading data attributes
pub fn parse(html: &str) -> Result<Document, HtmlError> {
    HtmlParser::new().parse_body(html)
}

/// HTML layer error
#[derive(Debug, thiserror::Error)]
pub enum HtmlError {
    #[error("DOM error: {0}")]
    Dom(#[from] DomError),

    #[error("Parsed document has no body element")]
    MissingBody,
}
