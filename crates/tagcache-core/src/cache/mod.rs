//! Cache core module

mod lifetime;
mod manager;

pub use lifetime::Lifetime;
pub use manager::{Core, DEFAULT_PRIORITY, MAX_PRIORITY};
