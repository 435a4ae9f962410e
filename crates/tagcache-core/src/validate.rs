//! Identifier validation for cache ids and tags

use crate::error::CacheError;

/// Prefix reserved for backend bookkeeping entries
pub const RESERVED_ID_PREFIX: &str = "internal-";

/// Whether `value` is a non-empty run of `[a-zA-Z0-9_]`
pub fn is_identifier(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validate a cache id or tag.
///
/// The reserved prefix is checked first so that it is reported as such
/// rather than as a grammar violation.
pub fn validate_id_or_tag(value: &str) -> Result<(), CacheError> {
    if value.starts_with(RESERVED_ID_PREFIX) {
        return Err(CacheError::ReservedIdPrefix(value.to_string()));
    }
    if !is_identifier(value) {
        return Err(CacheError::InvalidIdentifier(value.to_string()));
    }
    Ok(())
}

pub fn validate_tags(tags: &[String]) -> Result<(), CacheError> {
    tags.iter().try_for_each(|tag| validate_id_or_tag(tag))
}
