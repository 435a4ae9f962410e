//! Page frontend
//!
//! Caches whole rendered pages, keyed by request URI and request variables.

mod page;
mod rules;

pub use page::{
    CachedPage, DEBUG_HEADER_MESSAGE, PageCache, PageCapture, PageRequest, PageStart,
};
pub use rules::{PageRule, PageRules, RequestVariables, VariableFlags};
