//! Recording backend decorator
//!
//! Wraps another backend, appends every call to a shared journal and then
//! delegates. Tests keep a [`Journal`] handle after handing the backend to
//! a cache core and assert on the exact sequence of calls.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::backend::{Backend, Capabilities, CleaningMode, Directives, Metadata};
use crate::error::StorageError;
use crate::memory::MemoryBackend;

/// One backend call, with its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SetDirectives(Directives),
    Load {
        id: String,
        do_not_test_validity: bool,
    },
    Test {
        id: String,
    },
    Save {
        data: Bytes,
        id: String,
        tags: Vec<String>,
        lifetime: Option<u64>,
        priority: u8,
    },
    Remove {
        id: String,
    },
    Clean {
        mode: CleaningMode,
        tags: Vec<String>,
    },
    Ids,
    Tags,
    IdsMatchingTags(Vec<String>),
    IdsNotMatchingTags(Vec<String>),
    IdsMatchingAnyTags(Vec<String>),
    Metadatas {
        id: String,
    },
    Touch {
        id: String,
        extra_lifetime: u64,
    },
    FillingPercentage,
}

impl Call {
    /// Short name of the backend method
    pub fn method(&self) -> &'static str {
        match self {
            Call::SetDirectives(_) => "set_directives",
            Call::Load { .. } => "load",
            Call::Test { .. } => "test",
            Call::Save { .. } => "save",
            Call::Remove { .. } => "remove",
            Call::Clean { .. } => "clean",
            Call::Ids => "ids",
            Call::Tags => "tags",
            Call::IdsMatchingTags(_) => "ids_matching_tags",
            Call::IdsNotMatchingTags(_) => "ids_not_matching_tags",
            Call::IdsMatchingAnyTags(_) => "ids_matching_any_tags",
            Call::Metadatas { .. } => "metadatas",
            Call::Touch { .. } => "touch",
            Call::FillingPercentage => "filling_percentage",
        }
    }
}

/// Shared, append-only record of backend calls
#[derive(Debug, Clone, Default)]
pub struct Journal {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Journal {
    fn push(&self, call: Call) {
        self.calls.lock().push(call);
    }

    /// Snapshot of every call so far
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn last(&self) -> Option<Call> {
        self.calls.lock().last().cloned()
    }

    /// The last `n` calls, oldest first
    pub fn tail(&self, n: usize) -> Vec<Call> {
        let calls = self.calls.lock();
        let start = calls.len().saturating_sub(n);
        calls[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

/// Backend decorator that journals every call
pub struct RecordingBackend<B = MemoryBackend> {
    inner: B,
    journal: Journal,
    capabilities: Option<Capabilities>,
    corrupt_reads: bool,
    failing_saves: bool,
}

impl RecordingBackend<MemoryBackend> {
    /// Record calls made against a fresh [`MemoryBackend`]
    pub fn new() -> Self {
        Self::wrap(MemoryBackend::new())
    }
}

impl Default for RecordingBackend<MemoryBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> RecordingBackend<B> {
    pub fn wrap(inner: B) -> Self {
        Self {
            inner,
            journal: Journal::default(),
            capabilities: None,
            corrupt_reads: false,
            failing_saves: false,
        }
    }

    /// Handle on the journal, valid after the backend has been moved
    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    /// Advertise these capabilities instead of the inner backend's
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Make every successful `load` return bytes that differ from what
    /// was stored, as a torn write would
    pub fn with_corrupted_reads(mut self) -> Self {
        self.corrupt_reads = true;
        self
    }

    /// Make `save` report failure without storing anything
    pub fn with_failing_saves(mut self) -> Self {
        self.failing_saves = true;
        self
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

impl<B: Backend> Backend for RecordingBackend<B> {
    fn set_directives(&mut self, directives: Directives) -> Result<(), StorageError> {
        self.journal.push(Call::SetDirectives(directives));
        self.inner.set_directives(directives)
    }

    fn load(&self, id: &str, do_not_test_validity: bool) -> Result<Option<Bytes>, StorageError> {
        self.journal.push(Call::Load {
            id: id.to_string(),
            do_not_test_validity,
        });
        let data = self.inner.load(id, do_not_test_validity)?;
        if self.corrupt_reads {
            return Ok(data.map(|mut bytes| {
                let mut torn = bytes.split_to(bytes.len() / 2).to_vec();
                torn.extend_from_slice(b"\0torn");
                Bytes::from(torn)
            }));
        }
        Ok(data)
    }

    fn test(&self, id: &str) -> Result<Option<i64>, StorageError> {
        self.journal.push(Call::Test { id: id.to_string() });
        self.inner.test(id)
    }

    fn save(
        &mut self,
        data: Bytes,
        id: &str,
        tags: &[String],
        lifetime: Option<u64>,
        priority: u8,
    ) -> Result<bool, StorageError> {
        self.journal.push(Call::Save {
            data: data.clone(),
            id: id.to_string(),
            tags: tags.to_vec(),
            lifetime,
            priority,
        });
        if self.failing_saves {
            return Ok(false);
        }
        self.inner.save(data, id, tags, lifetime, priority)
    }

    fn remove(&mut self, id: &str) -> Result<bool, StorageError> {
        self.journal.push(Call::Remove { id: id.to_string() });
        self.inner.remove(id)
    }

    fn clean(&mut self, mode: CleaningMode, tags: &[String]) -> Result<bool, StorageError> {
        self.journal.push(Call::Clean {
            mode,
            tags: tags.to_vec(),
        });
        self.inner.clean(mode, tags)
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
            .unwrap_or_else(|| self.inner.capabilities())
    }

    fn ids(&self) -> Result<Vec<String>, StorageError> {
        self.journal.push(Call::Ids);
        self.inner.ids()
    }

    fn tags(&self) -> Result<Vec<String>, StorageError> {
        self.journal.push(Call::Tags);
        self.inner.tags()
    }

    fn ids_matching_tags(&self, tags: &[String]) -> Result<Vec<String>, StorageError> {
        self.journal.push(Call::IdsMatchingTags(tags.to_vec()));
        self.inner.ids_matching_tags(tags)
    }

    fn ids_not_matching_tags(&self, tags: &[String]) -> Result<Vec<String>, StorageError> {
        self.journal.push(Call::IdsNotMatchingTags(tags.to_vec()));
        self.inner.ids_not_matching_tags(tags)
    }

    fn ids_matching_any_tags(&self, tags: &[String]) -> Result<Vec<String>, StorageError> {
        self.journal.push(Call::IdsMatchingAnyTags(tags.to_vec()));
        self.inner.ids_matching_any_tags(tags)
    }

    fn metadatas(&self, id: &str) -> Result<Option<Metadata>, StorageError> {
        self.journal.push(Call::Metadatas { id: id.to_string() });
        self.inner.metadatas(id)
    }

    fn touch(&mut self, id: &str, extra_lifetime: u64) -> Result<bool, StorageError> {
        self.journal.push(Call::Touch {
            id: id.to_string(),
            extra_lifetime,
        });
        self.inner.touch(id, extra_lifetime)
    }

    fn filling_percentage(&self) -> Result<u8, StorageError> {
        self.journal.push(Call::FillingPercentage);
        self.inner.filling_percentage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_survives_move() {
        let backend = RecordingBackend::new();
        let journal = backend.journal();

        let mut boxed: Box<dyn Backend> = Box::new(backend);
        boxed.save(Bytes::from("data"), "foo", &[], None, 8).unwrap();
        boxed.load("foo", false).unwrap();

        let methods: Vec<&str> = journal.calls().iter().map(Call::method).collect();
        assert_eq!(methods, vec!["save", "load"]);
    }

    #[test]
    fn test_corrupted_reads_differ() {
        let mut backend = RecordingBackend::new().with_corrupted_reads();
        backend.save(Bytes::from("payload"), "foo", &[], None, 8).unwrap();
        let read = backend.load("foo", true).unwrap().unwrap();
        assert_ne!(read, Bytes::from("payload"));
        assert_eq!(backend.load("missing", true).unwrap(), None);
    }

    #[test]
    fn test_failing_saves_store_nothing() {
        let mut backend = RecordingBackend::new().with_failing_saves();
        assert!(!backend.save(Bytes::from("payload"), "foo", &[], None, 8).unwrap());
        assert!(backend.inner().is_empty());
        assert_eq!(backend.journal().len(), 1);
    }

    #[test]
    fn test_tail() {
        let mut backend = RecordingBackend::new();
        let journal = backend.journal();
        backend.remove("a").unwrap();
        backend.remove("b").unwrap();
        backend.remove("c").unwrap();

        assert_eq!(
            journal.tail(2),
            vec![
                Call::Remove { id: "b".to_string() },
                Call::Remove { id: "c".to_string() },
            ]
        );
        assert_eq!(journal.tail(10).len(), 3);
    }
}
