//! In-process memory backend
//!
//! Keeps payloads in a hash map and tags in a [`TagIndex`]. Nothing
//! survives the process; the backend exists to exercise the full contract
//! (expiry, tags, listing) without touching the filesystem.

use bytes::Bytes;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::backend::{Backend, Capabilities, CleaningMode, Metadata};
use crate::error::StorageError;
use crate::index::TagIndex;

/// Source of the current Unix time in seconds
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

#[derive(Debug, Clone)]
struct Entry {
    data: Bytes,
    mtime: i64,
    expire: Option<i64>,
}

/// `base + secs`, or `None` (never expires) when that overflows
fn expire_at(base: i64, secs: u64) -> Option<i64> {
    i64::try_from(secs).ok().and_then(|secs| base.checked_add(secs))
}

impl Entry {
    fn is_live(&self, now: i64) -> bool {
        self.expire.is_none_or(|expire| now <= expire)
    }
}

/// Memory storage backend
pub struct MemoryBackend {
    entries: HashMap<String, Entry>,
    index: TagIndex,
    max_entries: Option<usize>,
    clock: Clock,
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("entries", &self.entries.len())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty backend using the wall clock
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            index: TagIndex::new(),
            max_entries: None,
            clock: Arc::new(|| Utc::now().timestamp()),
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Nominal capacity, only used by `filling_percentage`
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    fn live_entry(&self, id: &str) -> Option<&Entry> {
        let now = self.now();
        self.entries.get(id).filter(|entry| entry.is_live(now))
    }

    fn live_ids(&self, ids: BTreeSet<String>) -> Vec<String> {
        let now = self.now();
        ids.into_iter()
            .filter(|id| self.entries.get(id).is_some_and(|e| e.is_live(now)))
            .collect()
    }

    fn remove_ids<I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut removed = 0;
        for id in ids {
            if self.entries.remove(&id).is_some() {
                self.index.remove(&id);
                removed += 1;
            }
        }
        removed
    }
}

impl Backend for MemoryBackend {
    fn load(&self, id: &str, do_not_test_validity: bool) -> Result<Option<Bytes>, StorageError> {
        let entry = if do_not_test_validity {
            self.entries.get(id)
        } else {
            self.live_entry(id)
        };
        Ok(entry.map(|e| e.data.clone()))
    }

    fn test(&self, id: &str) -> Result<Option<i64>, StorageError> {
        Ok(self.live_entry(id).map(|e| e.mtime))
    }

    fn save(
        &mut self,
        data: Bytes,
        id: &str,
        tags: &[String],
        lifetime: Option<u64>,
        _priority: u8,
    ) -> Result<bool, StorageError> {
        let now = self.now();
        let expire = lifetime.and_then(|secs| expire_at(now, secs));

        debug!("Storing {} ({} bytes, expire: {:?})", id, data.len(), expire);

        self.entries.insert(
            id.to_string(),
            Entry {
                data,
                mtime: now,
                expire,
            },
        );
        self.index.insert(id, tags);
        Ok(true)
    }

    fn remove(&mut self, id: &str) -> Result<bool, StorageError> {
        self.index.remove(id);
        Ok(self.entries.remove(id).is_some())
    }

    fn clean(&mut self, mode: CleaningMode, tags: &[String]) -> Result<bool, StorageError> {
        let removed = match mode {
            CleaningMode::All => {
                let count = self.entries.len();
                self.entries.clear();
                self.index.clear();
                count
            }
            CleaningMode::Old => {
                let now = self.now();
                let expired: Vec<String> = self
                    .entries
                    .iter()
                    .filter(|(_, entry)| !entry.is_live(now))
                    .map(|(id, _)| id.clone())
                    .collect();
                self.remove_ids(expired)
            }
            CleaningMode::MatchingTag => {
                let ids = self.index.matching_all(tags);
                self.remove_ids(ids)
            }
            CleaningMode::NotMatchingTag => {
                let ids = self.index.not_matching(tags, self.entries.keys());
                self.remove_ids(ids)
            }
            CleaningMode::MatchingAnyTag => {
                let ids = self.index.matching_any(tags);
                self.remove_ids(ids)
            }
        };

        debug!("Cleaned {} entries (mode: {})", removed, mode);
        Ok(true)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            automatic_cleaning: true,
            tags: true,
            expired_read: true,
            priority: false,
            infinite_lifetime: true,
            get_list: true,
        }
    }

    fn ids(&self) -> Result<Vec<String>, StorageError> {
        let now = self.now();
        let mut ids: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn tags(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.index.tags())
    }

    fn ids_matching_tags(&self, tags: &[String]) -> Result<Vec<String>, StorageError> {
        Ok(self.live_ids(self.index.matching_all(tags)))
    }

    fn ids_not_matching_tags(&self, tags: &[String]) -> Result<Vec<String>, StorageError> {
        Ok(self.live_ids(self.index.not_matching(tags, self.entries.keys())))
    }

    fn ids_matching_any_tags(&self, tags: &[String]) -> Result<Vec<String>, StorageError> {
        Ok(self.live_ids(self.index.matching_any(tags)))
    }

    fn metadatas(&self, id: &str) -> Result<Option<Metadata>, StorageError> {
        Ok(self.entries.get(id).map(|entry| Metadata {
            expire: entry.expire,
            tags: self.index.tags_of(id),
            mtime: entry.mtime,
        }))
    }

    fn touch(&mut self, id: &str, extra_lifetime: u64) -> Result<bool, StorageError> {
        let now = self.now();
        match self.entries.get_mut(id) {
            Some(entry) if entry.is_live(now) => {
                entry.expire = entry
                    .expire
                    .and_then(|expire| expire_at(expire, extra_lifetime));
                entry.mtime = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn filling_percentage(&self) -> Result<u8, StorageError> {
        let Some(max) = self.max_entries.filter(|max| *max > 0) else {
            return Ok(0);
        };
        let percent = (self.entries.len() * 100 / max).min(100);
        Ok(percent as u8)
    }
}
