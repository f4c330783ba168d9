//! DOM post-processing pipeline
//!
//! Runs the forward passes over a freshly built document in a fixed order:
//! text normalization, fragment unpacking, then template encapsulation.
//! Resource limits are checked between passes so an oversized document
//! stops early with [`EngineError::ResourceLimitExceeded`].
//!
//! [`EngineError::ResourceLimitExceeded`]: crate::EngineError::ResourceLimitExceeded

use selser_dom::{Document, NodeId};

use super::{unpack_dom_fragments, wrap_templates};
use crate::{EngineResult, Env};

type PassFn = fn(&mut Document, &mut Env, NodeId) -> EngineResult<()>;

/// One registered pass
#[derive(Clone, Copy)]
pub struct Pass {
    pub name: &'static str,
    /// Omitted when processing template content; the enclosing
    /// document wraps the template as a whole
    pub skip_nested: bool,
    /// Check resource limits after this pass
    pub checkpoint: bool,
    run: PassFn,
}

impl std::fmt::Debug for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pass")
            .field("name", &self.name)
            .field("skip_nested", &self.skip_nested)
            .field("checkpoint", &self.checkpoint)
            .finish()
    }
}

fn normalize(doc: &mut Document, _env: &mut Env, root: NodeId) -> EngineResult<()> {
    doc.tree.normalize_text(root);
    Ok(())
}

fn unpack(doc: &mut Document, env: &mut Env, _root: NodeId) -> EngineResult<()> {
    unpack_dom_fragments(doc, env)
}

/// Ordered forward passes
#[derive(Debug, Clone)]
pub struct PostProcessor {
    passes: Vec<Pass>,
    at_top_level: bool,
}

impl Default for PostProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl PostProcessor {
    /// Default pipeline for a top-level document
    pub fn new() -> Self {
        Self {
            passes: vec![
                Pass {
                    name: "normalize",
                    skip_nested: false,
                    checkpoint: false,
                    run: normalize,
                },
                Pass {
                    name: "dom-unpack",
                    skip_nested: false,
                    checkpoint: true,
                    run: unpack,
                },
                Pass {
                    name: "tplwrap",
                    skip_nested: true,
                    checkpoint: true,
                    run: wrap_templates,
                },
            ],
            at_top_level: true,
        }
    }

    /// Pipeline for template content processed as its own document
    pub fn nested() -> Self {
        Self {
            at_top_level: false,
            ..Self::new()
        }
    }

    /// Names of the passes that will run
    pub fn passes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.passes
            .iter()
            .filter(|p| self.at_top_level || !p.skip_nested)
            .map(|p| p.name)
    }

    /// Run every pass on the document body
    pub fn process(&self, doc: &mut Document, env: &mut Env) -> EngineResult<()> {
        let size = env.page_src().len() as u64;
        env.bump_wt2html_resource_use("wikitextSize", size);
        env.check_resource_limits()?;

        let body = doc.body();
        for pass in &self.passes {
            if pass.skip_nested && !self.at_top_level {
                continue;
            }
            tracing::debug!(pass = pass.name, top_level = self.at_top_level, "Running DOM pass");
            (pass.run)(doc, env, body)?;
            if pass.checkpoint {
                env.check_resource_limits()?;
            }
        }
        Ok(())
    }
}

/// Run the default pipeline on a top-level document
pub fn post_process(doc: &mut Document, env: &mut Env) -> EngineResult<()> {
    PostProcessor::new().process(doc, env)
}
