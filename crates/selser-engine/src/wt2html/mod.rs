//! Markup -> HTML post-processing passes

mod encapsulate;
mod post_processor;
mod range_builder;
mod unpack_fragments;

pub use encapsulate::{encapsulate_templates, wrap_templates};
pub use post_processor::{post_process, Pass, PostProcessor};
pub use range_builder::{
    find_top_level_non_overlapping_ranges, find_wrappable_template_ranges, get_range_end_dsr,
    ClassifiedRanges, DomRange, TplInfo,
};
pub use unpack_fragments::{unpack_dom_fragments, unpack_fragment};
