//! selser Engine
//!
//! Post-processing of markup-to-HTML output and the reverse HTML-to-markup
//! serialization with source reuse.
//!
//! # Forward
//! Placeholder fragments are spliced into the document, then the output
//! of each template invocation is grouped into one encapsulated unit
//! carrying its source range and part list.
//!
//! # Reverse
//! Edited HTML is normalized into its canonical shape and serialized.
//! In selser mode every node without change markers is emitted from the
//! original source.
//!
//! # Example
//! ```rust,ignore
//! use selser_engine::{Config, Engine};
//!
//! let engine = Engine::new(Config::default());
//! let mut page = engine.wt2html(&html, &wikitext)?;
//! assert_eq!(page.to_wikitext()?, wikitext);
//! ```

mod config;
mod engine;
mod env;
mod error;
mod page;
pub mod html2wt;
pub mod traverse;
pub mod wt2html;

pub use config::Config;
pub use engine::Engine;
pub use env::{Diagnostic, DiagnosticLevel, Env};
pub use error::{EngineError, EngineResult};
pub use page::Page;

// Re-export sub-crates for advanced usage
pub use selser_dom as dom;
pub use selser_html as html;

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
