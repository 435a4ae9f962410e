//! Storage backend trait

use bytes::Bytes;
use std::fmt;
use std::str::FromStr;

use crate::error::StorageError;

/// Error type for parsing a cleaning mode
#[derive(Debug, Clone)]
pub struct ParseCleaningModeError(String);

impl fmt::Display for ParseCleaningModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid cleaning mode: {}", self.0)
    }
}

impl std::error::Error for ParseCleaningModeError {}

/// Which entries a `clean` call removes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CleaningMode {
    /// Every entry
    All,
    /// Entries whose lifetime has run out
    Old,
    /// Entries carrying every one of the given tags
    MatchingTag,
    /// Entries carrying none of the given tags
    NotMatchingTag,
    /// Entries carrying at least one of the given tags
    MatchingAnyTag,
}

impl CleaningMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleaningMode::All => "all",
            CleaningMode::Old => "old",
            CleaningMode::MatchingTag => "matchingTag",
            CleaningMode::NotMatchingTag => "notMatchingTag",
            CleaningMode::MatchingAnyTag => "matchingAnyTag",
        }
    }

    /// Whether this mode selects entries by tag
    pub fn uses_tags(&self) -> bool {
        matches!(
            self,
            CleaningMode::MatchingTag | CleaningMode::NotMatchingTag | CleaningMode::MatchingAnyTag
        )
    }
}

impl fmt::Display for CleaningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CleaningMode {
    type Err = ParseCleaningModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(CleaningMode::All),
            "old" => Ok(CleaningMode::Old),
            "matchingTag" => Ok(CleaningMode::MatchingTag),
            "notMatchingTag" => Ok(CleaningMode::NotMatchingTag),
            "matchingAnyTag" => Ok(CleaningMode::MatchingAnyTag),
            _ => Err(ParseCleaningModeError(s.to_string())),
        }
    }
}

/// What a backend is able to do
///
/// The cache core reads this before calling any of the optional parts of
/// the [`Backend`] contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// `clean(Old)` is meaningful and cheap enough to run inline
    pub automatic_cleaning: bool,
    /// Entries can be tagged and queried by tag
    pub tags: bool,
    /// `load` can return expired entries when asked to skip validity checks
    pub expired_read: bool,
    /// The priority hint passed to `save` is honored
    pub priority: bool,
    /// Entries may be stored without an expiry
    pub infinite_lifetime: bool,
    /// All stored ids can be listed
    pub get_list: bool,
}

/// Settings the core pushes down to its backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Directives {
    /// Default lifetime in seconds, `None` for unlimited
    pub lifetime: Option<u64>,
    pub logging: bool,
}

/// Per-entry metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Unix timestamp after which the entry is stale, `None` if it never expires
    pub expire: Option<i64>,
    pub tags: Vec<String>,
    /// Unix timestamp of the last write or touch
    pub mtime: i64,
}

/// Storage backend trait
///
/// A backend persists opaque payloads under already-validated ids. Policy
/// (id grammar, serialization, write control, automatic cleaning) belongs
/// to the cache core; a backend only has to store, find and forget.
///
/// The listing and tag queries are optional. Their default implementations
/// return [`StorageError::Unsupported`]; a backend that implements them
/// must say so through [`Backend::capabilities`].
pub trait Backend: Send {
    /// Receive the core's settings. Called when the backend is installed
    /// and whenever the matching options change.
    fn set_directives(&mut self, _directives: Directives) -> Result<(), StorageError> {
        Ok(())
    }

    /// Fetch a payload. Expired entries are skipped unless
    /// `do_not_test_validity` is set.
    fn load(&self, id: &str, do_not_test_validity: bool) -> Result<Option<Bytes>, StorageError>;

    /// Last-modified timestamp of a live entry
    fn test(&self, id: &str) -> Result<Option<i64>, StorageError>;

    /// Store a payload, replacing any previous entry with the same id
    fn save(
        &mut self,
        data: Bytes,
        id: &str,
        tags: &[String],
        lifetime: Option<u64>,
        priority: u8,
    ) -> Result<bool, StorageError>;

    /// Forget an entry
    fn remove(&mut self, id: &str) -> Result<bool, StorageError>;

    fn clean(&mut self, mode: CleaningMode, tags: &[String]) -> Result<bool, StorageError>;

    fn capabilities(&self) -> Capabilities;

    fn ids(&self) -> Result<Vec<String>, StorageError> {
        Err(StorageError::Unsupported("ids".to_string()))
    }

    fn tags(&self) -> Result<Vec<String>, StorageError> {
        Err(StorageError::Unsupported("tags".to_string()))
    }

    fn ids_matching_tags(&self, _tags: &[String]) -> Result<Vec<String>, StorageError> {
        Err(StorageError::Unsupported("ids_matching_tags".to_string()))
    }

    fn ids_not_matching_tags(&self, _tags: &[String]) -> Result<Vec<String>, StorageError> {
        Err(StorageError::Unsupported("ids_not_matching_tags".to_string()))
    }

    fn ids_matching_any_tags(&self, _tags: &[String]) -> Result<Vec<String>, StorageError> {
        Err(StorageError::Unsupported("ids_matching_any_tags".to_string()))
    }

    fn metadatas(&self, _id: &str) -> Result<Option<Metadata>, StorageError> {
        Err(StorageError::Unsupported("metadatas".to_string()))
    }

    /// Push the expiry of a live entry further out
    fn touch(&mut self, _id: &str, _extra_lifetime: u64) -> Result<bool, StorageError> {
        Err(StorageError::Unsupported("touch".to_string()))
    }

    /// How full the backend is, 0 to 100
    fn filling_percentage(&self) -> Result<u8, StorageError> {
        Err(StorageError::Unsupported("filling_percentage".to_string()))
    }
}
