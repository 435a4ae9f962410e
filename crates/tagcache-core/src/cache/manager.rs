//! Cache core implementation

use bytes::Bytes;
use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tagcache_storage::{Backend, Capabilities, CleaningMode, Directives, Metadata};
use tracing::{Level, debug, info};

use super::lifetime::Lifetime;
use crate::error::CacheError;
use crate::logger::{CacheLogger, TracingLogger};
use crate::options::CoreOptions;
use crate::validate::{validate_id_or_tag, validate_tags};

/// Priority used when the caller does not pass one
pub const DEFAULT_PRIORITY: u8 = 8;

/// Highest accepted priority
pub const MAX_PRIORITY: u8 = 10;

/// Cache core
///
/// Applies caching policy on top of a single, exclusively owned backend:
/// id and tag validation, the `caching` gate, storage-level id prefixing,
/// lifetimes, automatic cleaning, serialization and write control.
pub struct Core {
    options: CoreOptions,
    backend: Option<Box<dyn Backend>>,
    logger: Option<Arc<dyn CacheLogger>>,
}

impl fmt::Debug for Core {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Core")
            .field("options", &self.options)
            .field("has_backend", &self.backend.is_some())
            .field("has_logger", &self.logger.is_some())
            .finish()
    }
}

impl Default for Core {
    fn default() -> Self {
        Self::new(CoreOptions::default())
    }
}

impl Core {
    /// Create a cache core. A backend must be installed with
    /// [`Core::set_backend`] before any operation reaches storage.
    pub fn new(options: CoreOptions) -> Self {
        debug!(
            "Initializing cache core (caching: {}, lifetime: {:?}, write_control: {}, cleaning factor: {})",
            options.caching,
            options.lifetime,
            options.write_control,
            options.automatic_cleaning_factor
        );

        let mut core = Self {
            options,
            backend: None,
            logger: None,
        };
        core.ensure_logger();
        core
    }

    pub fn options(&self) -> &CoreOptions {
        &self.options
    }

    /// Set one option by name. Unknown names are ignored.
    ///
    /// If the backend rejects the resulting directives the previous
    /// options are restored.
    pub fn set_option(&mut self, name: &str, value: impl Into<Value>) -> Result<(), CacheError> {
        let previous = self.options.clone();
        self.options.set(name, value.into())?;

        if self.directives() != previous.directives() {
            if let Err(e) = self.push_directives() {
                self.options = previous;
                return Err(e);
            }
        }
        self.ensure_logger();
        Ok(())
    }

    pub fn get_option(&self, name: &str) -> Option<Value> {
        self.options.get(name)
    }

    /// Change the default lifetime; `None` means unlimited
    pub fn set_lifetime(&mut self, lifetime: Option<u64>) -> Result<(), CacheError> {
        let previous = std::mem::replace(&mut self.options.lifetime, lifetime);
        if let Err(e) = self.push_directives() {
            self.options.lifetime = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Install the backend, replacing any previous one
    pub fn set_backend<B>(&mut self, backend: B) -> Result<(), CacheError>
    where
        B: Backend + 'static,
    {
        let mut backend: Box<dyn Backend> = Box::new(backend);
        backend.set_directives(self.directives())?;

        let capabilities = backend.capabilities();
        info!(
            "Installed cache backend (tags: {}, automatic_cleaning: {}, get_list: {})",
            capabilities.tags, capabilities.automatic_cleaning, capabilities.get_list
        );

        self.backend = Some(backend);
        Ok(())
    }

    pub fn backend(&self) -> Option<&dyn Backend> {
        self.backend.as_deref()
    }

    /// Replace the logger. It is only consulted while `logging` is on.
    pub fn set_logger(&mut self, logger: Arc<dyn CacheLogger>) {
        self.logger = Some(logger);
    }

    pub fn logger(&self) -> Option<&Arc<dyn CacheLogger>> {
        self.logger.as_ref()
    }

    /// Store `data` under `id` with the default lifetime and priority
    pub fn save<T>(&mut self, data: &T, id: &str, tags: &[&str]) -> Result<bool, CacheError>
    where
        T: Serialize + ?Sized,
    {
        self.save_with(data, id, tags, Lifetime::Default, DEFAULT_PRIORITY)
    }

    /// Store `data` under `id`.
    ///
    /// Returns `Ok(false)` when the backend refused the write or write
    /// control found the stored bytes differ from what was written; in
    /// both cases the entry has been removed.
    pub fn save_with<T>(
        &mut self,
        data: &T,
        id: &str,
        tags: &[&str],
        lifetime: Lifetime,
        priority: u8,
    ) -> Result<bool, CacheError>
    where
        T: Serialize + ?Sized,
    {
        if !self.options.caching {
            return Ok(true);
        }

        validate_id_or_tag(id)?;
        let tags = owned_tags(tags)?;
        if priority > MAX_PRIORITY {
            return Err(CacheError::Configuration(format!(
                "Priority must be between 0 and {}, got {}",
                MAX_PRIORITY, priority
            )));
        }

        let payload = self.encode(data)?;
        let id = self.storage_id(id);
        let lifetime = lifetime.resolve(self.options.lifetime);

        self.maybe_clean()?;

        if self.options.ignore_user_abort {
            debug!("Saving {} with ignore_user_abort set", id);
        }

        let saved = self
            .backend_mut()?
            .save(payload.clone(), &id, &tags, lifetime, priority)?;

        if !saved {
            self.log(
                Level::WARN,
                &format!("Core::save(): failed to save item '{}' -> removing it", id),
            );
            self.backend_mut()?.remove(&id)?;
            return Ok(false);
        }

        if self.options.write_control {
            let stored = self.backend_ref()?.load(&id, true)?;
            if stored.as_ref() != Some(&payload) {
                self.log(
                    Level::WARN,
                    &format!("Core::save(): write control of item '{}' failed -> removing it", id),
                );
                self.backend_mut()?.remove(&id)?;
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Fetch the entry stored under `id`.
    ///
    /// With `automatic_serialization` the payload is decoded back into a
    /// JSON value unless `do_not_unserialize` is set; otherwise the stored
    /// string is returned as [`Value::String`].
    pub fn load(
        &self,
        id: &str,
        do_not_test_cache_validity: bool,
        do_not_unserialize: bool,
    ) -> Result<Option<Value>, CacheError> {
        if !self.options.caching {
            return Ok(None);
        }

        validate_id_or_tag(id)?;
        let id = self.storage_id(id);

        let Some(raw) = self.backend_ref()?.load(&id, do_not_test_cache_validity)? else {
            return Ok(None);
        };

        if self.options.automatic_serialization && !do_not_unserialize {
            return Ok(Some(serde_json::from_slice(&raw)?));
        }

        String::from_utf8(raw.to_vec())
            .map(|s| Some(Value::String(s)))
            .map_err(|_| {
                CacheError::InvalidDataType(format!("Payload of '{}' is not valid UTF-8", id))
            })
    }

    /// Fetch and decode the entry stored under `id`
    pub fn load_as<T>(&self, id: &str) -> Result<Option<T>, CacheError>
    where
        T: DeserializeOwned,
    {
        match self.load(id, false, false)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Last-modified timestamp of a live entry
    pub fn test(&self, id: &str) -> Result<Option<i64>, CacheError> {
        if !self.options.caching {
            return Ok(None);
        }

        validate_id_or_tag(id)?;
        let id = self.storage_id(id);
        Ok(self.backend_ref()?.test(&id)?)
    }

    pub fn remove(&mut self, id: &str) -> Result<bool, CacheError> {
        if !self.options.caching {
            return Ok(true);
        }

        validate_id_or_tag(id)?;
        let id = self.storage_id(id);
        Ok(self.backend_mut()?.remove(&id)?)
    }

    /// Remove entries selected by `mode`. Tag modes need at least one tag.
    pub fn clean(&mut self, mode: CleaningMode, tags: &[&str]) -> Result<bool, CacheError> {
        if !self.options.caching {
            return Ok(true);
        }

        let tags = owned_tags(tags)?;
        if mode.uses_tags() {
            if tags.is_empty() {
                return Err(CacheError::MissingArgument(format!(
                    "Cleaning mode '{}' needs at least one tag",
                    mode
                )));
            }
            self.require(|c| c.tags, "tags")?;
        }

        debug!("Cleaning cache (mode: {}, tags: {:?})", mode, tags);
        Ok(self.backend_mut()?.clean(mode, &tags)?)
    }

    /// Every stored id, in the caller's id space
    pub fn get_ids(&self) -> Result<Vec<String>, CacheError> {
        self.require(|c| c.get_list, "get_list")?;
        let ids = self.backend_ref()?.ids()?;
        Ok(self.strip_prefix(ids))
    }

    /// Ids carrying all of `tags`
    pub fn get_ids_matching_tags(&self, tags: &[&str]) -> Result<Vec<String>, CacheError> {
        let tags = self.tag_query(tags)?;
        let ids = self.backend_ref()?.ids_matching_tags(&tags)?;
        Ok(self.strip_prefix(ids))
    }

    /// Ids carrying none of `tags`
    pub fn get_ids_not_matching_tags(&self, tags: &[&str]) -> Result<Vec<String>, CacheError> {
        let tags = self.tag_query(tags)?;
        let ids = self.backend_ref()?.ids_not_matching_tags(&tags)?;
        Ok(self.strip_prefix(ids))
    }

    /// Ids carrying at least one of `tags`
    pub fn get_ids_matching_any_tags(&self, tags: &[&str]) -> Result<Vec<String>, CacheError> {
        let tags = self.tag_query(tags)?;
        let ids = self.backend_ref()?.ids_matching_any_tags(&tags)?;
        Ok(self.strip_prefix(ids))
    }

    pub fn get_tags(&self) -> Result<Vec<String>, CacheError> {
        self.require(|c| c.tags, "tags")?;
        Ok(self.backend_ref()?.tags()?)
    }

    pub fn get_metadatas(&self, id: &str) -> Result<Option<Metadata>, CacheError> {
        validate_id_or_tag(id)?;
        let id = self.storage_id(id);
        Ok(self.backend_ref()?.metadatas(&id)?)
    }

    /// Extend the lifetime of a live entry by `extra_lifetime` seconds
    pub fn touch(&mut self, id: &str, extra_lifetime: u64) -> Result<bool, CacheError> {
        validate_id_or_tag(id)?;
        let id = self.storage_id(id);
        Ok(self.backend_mut()?.touch(&id, extra_lifetime)?)
    }

    pub fn get_filling_percentage(&self) -> Result<u8, CacheError> {
        Ok(self.backend_ref()?.filling_percentage()?)
    }

    fn directives(&self) -> Directives {
        self.options.directives()
    }

    fn push_directives(&mut self) -> Result<(), CacheError> {
        let directives = self.directives();
        if let Some(backend) = self.backend.as_deref_mut() {
            backend.set_directives(directives)?;
        }
        Ok(())
    }

    fn ensure_logger(&mut self) {
        if self.options.logging && self.logger.is_none() {
            self.logger = Some(Arc::new(TracingLogger));
        }
    }

    fn log(&self, level: Level, message: &str) {
        if !self.options.logging {
            return;
        }
        if let Some(logger) = &self.logger {
            logger.log(level, message);
        }
    }

    fn backend_ref(&self) -> Result<&dyn Backend, CacheError> {
        self.backend
            .as_deref()
            .ok_or_else(|| CacheError::Configuration("No backend has been set".to_string()))
    }

    fn backend_mut(&mut self) -> Result<&mut (dyn Backend + 'static), CacheError> {
        match self.backend.as_deref_mut() {
            Some(backend) => Ok(backend),
            None => Err(CacheError::Configuration("No backend has been set".to_string())),
        }
    }

    fn require(&self, has: impl Fn(&Capabilities) -> bool, name: &str) -> Result<(), CacheError> {
        if has(&self.backend_ref()?.capabilities()) {
            Ok(())
        } else {
            Err(CacheError::Unsupported(format!(
                "backend does not provide the '{}' capability",
                name
            )))
        }
    }

    fn tag_query(&self, tags: &[&str]) -> Result<Vec<String>, CacheError> {
        let tags = owned_tags(tags)?;
        self.require(|c| c.tags, "tags")?;
        Ok(tags)
    }

    fn storage_id(&self, id: &str) -> String {
        match self.options.cache_id_prefix.as_deref() {
            Some(prefix) => format!("{}{}", prefix, id),
            None => id.to_string(),
        }
    }

    /// Ids outside the prefix namespace are passed through unchanged
    fn strip_prefix(&self, ids: Vec<String>) -> Vec<String> {
        let Some(prefix) = self.options.cache_id_prefix.as_deref() else {
            return ids;
        };
        ids.into_iter()
            .map(|id| match id.strip_prefix(prefix) {
                Some(rest) => rest.to_string(),
                None => id,
            })
            .collect()
    }

    fn encode<T>(&self, data: &T) -> Result<Bytes, CacheError>
    where
        T: Serialize + ?Sized,
    {
        if self.options.automatic_serialization {
            return Ok(Bytes::from(serde_json::to_vec(data)?));
        }

        match serde_json::to_value(data)? {
            Value::String(s) => Ok(Bytes::from(s)),
            other => Err(CacheError::InvalidDataType(format!(
                "Data must be a string or automatic_serialization must be on, got {}",
                value_kind(&other)
            ))),
        }
    }

    fn maybe_clean(&mut self) -> Result<(), CacheError> {
        let factor = self.options.automatic_cleaning_factor;
        if factor == 0 || rand::rng().random_range(1..=factor) != 1 {
            return Ok(());
        }

        if self.backend_ref()?.capabilities().automatic_cleaning {
            debug!("Automatic cleaning triggered");
            self.backend_mut()?.clean(CleaningMode::Old, &[])?;
        } else {
            self.log(
                Level::WARN,
                "Core::save(): automatic cleaning is not available/necessary with current backend",
            );
        }
        Ok(())
    }
}

fn owned_tags(tags: &[&str]) -> Result<Vec<String>, CacheError> {
    let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
    validate_tags(&tags)?;
    Ok(tags)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use tagcache_storage::{Call, Journal, MemoryBackend, RecordingBackend, StorageError};

    #[derive(Default)]
    struct RecordingLogger {
        entries: Mutex<Vec<(Level, String)>>,
    }

    impl CacheLogger for RecordingLogger {
        fn log(&self, level: Level, message: &str) {
            self.entries.lock().push((level, message.to_string()));
        }
    }

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn core_with(backend: RecordingBackend) -> (Core, Journal) {
        let journal = backend.journal();
        let mut core = Core::new(
            CoreOptions::from_map([("automatic_cleaning_factor", json!(0))]).unwrap(),
        );
        core.set_backend(backend).unwrap();
        journal.clear();
        (core, journal)
    }

    fn setup() -> (Core, Journal) {
        core_with(RecordingBackend::new())
    }

    fn seed_fixture(core: &mut Core) {
        for (id, pair) in [
            ("id1", ["tag1", "tag2"]),
            ("id2", ["tag1", "tag2"]),
            ("id3", ["tag3", "tag4"]),
            ("id4", ["tag3", "tag4"]),
            ("id5", ["tag5", "tag6"]),
            ("id6", ["tag5", "tag6"]),
        ] {
            assert!(core.save("data", id, &pair).unwrap());
        }
    }

    #[test]
    fn test_constructor_rejects_bad_option_name() {
        let result = CoreOptions::from_map([("0", json!("bar")), ("lifetime", json!(3600))]);
        assert!(matches!(result, Err(CacheError::Configuration(_))));
    }

    #[test]
    fn test_set_backend_pushes_directives() {
        let backend = RecordingBackend::new();
        let journal = backend.journal();
        let mut core = Core::new(CoreOptions::default());
        core.set_backend(backend).unwrap();

        assert_eq!(
            journal.last(),
            Some(Call::SetDirectives(Directives {
                lifetime: Some(3600),
                logging: false,
            }))
        );

        core.set_lifetime(Some(60)).unwrap();
        assert_eq!(
            journal.last(),
            Some(Call::SetDirectives(Directives {
                lifetime: Some(60),
                logging: false,
            }))
        );
    }

    #[test]
    fn test_set_option() {
        let (mut core, _) = setup();
        core.set_option("caching", false).unwrap();
        assert_eq!(core.get_option("caching"), Some(json!(false)));

        // Unknown options are silently ignored
        core.set_option("foo", 1200).unwrap();
        assert!(matches!(
            core.set_option("", 1200),
            Err(CacheError::Configuration(_))
        ));
    }

    #[test]
    fn test_operations_without_backend_fail() {
        let mut core = Core::default();
        assert!(matches!(
            core.save("data", "foo", &[]),
            Err(CacheError::Configuration(_))
        ));
        assert!(matches!(core.load("foo", false, false), Err(CacheError::Configuration(_))));
    }

    #[test]
    fn test_save_bad_id() {
        let (mut core, journal) = setup();
        assert!(matches!(
            core.save("data", "foo bar", &[]),
            Err(CacheError::InvalidIdentifier(_))
        ));
        assert!(journal.is_empty());
    }

    #[test]
    fn test_save_bad_tag() {
        let (mut core, journal) = setup();
        assert!(matches!(
            core.save("data", "foobar", &["tag1", "foo bar"]),
            Err(CacheError::InvalidIdentifier(_))
        ));
        assert!(journal.is_empty());
    }

    #[test]
    fn test_save_non_string_without_serialization() {
        let (mut core, journal) = setup();
        assert!(matches!(
            core.save(&vec!["data"], "foobar", &[]),
            Err(CacheError::InvalidDataType(_))
        ));
        assert!(journal.is_empty());
    }

    #[test]
    fn test_save_reserved_id() {
        let (mut core, journal) = setup();
        assert!(matches!(
            core.save("data", "internal-foo", &[]),
            Err(CacheError::ReservedIdPrefix(_))
        ));
        assert!(journal.is_empty());
    }

    #[test]
    fn test_save_bad_priority() {
        let (mut core, journal) = setup();
        assert!(matches!(
            core.save_with("data", "foo", &[], Lifetime::Default, 11),
            Err(CacheError::Configuration(_))
        ));
        assert!(journal.is_empty());
    }

    #[test]
    fn test_save_no_caching() {
        let (mut core, journal) = setup();
        core.set_option("caching", false).unwrap();
        journal.clear();

        assert!(core.save("data", "foo", &[]).unwrap());
        assert!(journal.is_empty());
    }

    #[test]
    fn test_save_no_write_control() {
        let (mut core, journal) = setup();
        core.set_option("write_control", false).unwrap();

        assert!(core.save("data", "foo", &["tag1", "tag2"]).unwrap());
        assert_eq!(
            journal.calls(),
            vec![Call::Save {
                data: Bytes::from("data"),
                id: "foo".to_string(),
                tags: tags(&["tag1", "tag2"]),
                lifetime: Some(3600),
                priority: DEFAULT_PRIORITY,
            }]
        );
    }

    #[test]
    fn test_save_with_write_control() {
        let (mut core, journal) = setup();

        assert!(core.save("data", "foo", &["tag1"]).unwrap());
        let methods: Vec<&str> = journal.calls().iter().map(Call::method).collect();
        assert_eq!(methods, vec!["save", "load"]);
        assert_eq!(
            journal.last(),
            Some(Call::Load {
                id: "foo".to_string(),
                do_not_test_validity: true,
            })
        );
    }

    #[test]
    fn test_save_write_control_detects_corruption() {
        let (mut core, journal) = core_with(RecordingBackend::new().with_corrupted_reads());

        assert!(!core.save("data", "foo", &["tag1", "tag2"]).unwrap());
        let tail = journal.tail(3);
        assert_eq!(tail[0].method(), "save");
        assert_eq!(
            tail[1],
            Call::Load {
                id: "foo".to_string(),
                do_not_test_validity: true,
            }
        );
        assert_eq!(tail[2], Call::Remove { id: "foo".to_string() });
    }

    #[test]
    fn test_save_failed_backend_write_removes_entry() {
        let (mut core, journal) = core_with(RecordingBackend::new().with_failing_saves());
        core.set_option("cache_id_prefix", "cacheIdPrefix").unwrap();

        assert!(!core.save("data", "false", &["tag1", "tag2"]).unwrap());
        assert_eq!(
            journal.calls(),
            vec![
                Call::Save {
                    data: Bytes::from("data"),
                    id: "cacheIdPrefixfalse".to_string(),
                    tags: tags(&["tag1", "tag2"]),
                    lifetime: Some(3600),
                    priority: DEFAULT_PRIORITY,
                },
                Call::Remove {
                    id: "cacheIdPrefixfalse".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_save_with_automatic_cleaning() {
        let (mut core, journal) = setup();
        core.set_option("automatic_cleaning_factor", 1).unwrap();

        for _ in 0..3 {
            journal.clear();
            assert!(core.save("data", "foo", &[]).unwrap());
            let methods: Vec<&str> = journal.calls().iter().map(Call::method).collect();
            assert_eq!(methods, vec!["clean", "save", "load"]);
            assert_eq!(
                journal.calls()[0],
                Call::Clean {
                    mode: CleaningMode::Old,
                    tags: vec![],
                }
            );
        }
    }

    #[test]
    fn test_automatic_cleaning_unavailable_is_logged() {
        let backend = RecordingBackend::new().with_capabilities(Capabilities {
            automatic_cleaning: false,
            ..MemoryBackend::new().capabilities()
        });
        let (mut core, journal) = core_with(backend);
        let logger = Arc::new(RecordingLogger::default());
        core.set_logger(logger.clone());
        core.set_option("logging", true).unwrap();
        core.set_option("automatic_cleaning_factor", 1).unwrap();
        journal.clear();

        assert!(core.save("data", "foo", &[]).unwrap());
        assert!(journal.calls().iter().all(|call| call.method() != "clean"));

        let entries = logger.entries.lock();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, Level::WARN);
        assert!(entries[0].1.contains("automatic cleaning"));
    }

    #[test]
    fn test_save_lifetimes() {
        let (mut core, journal) = setup();
        core.set_option("write_control", false).unwrap();

        let lifetime_of_last_save = |journal: &Journal| match journal.last() {
            Some(Call::Save { lifetime, .. }) => lifetime,
            other => panic!("expected a save, got {:?}", other),
        };

        core.save_with("data", "foo", &[], Lifetime::Seconds(10), 3).unwrap();
        assert_eq!(lifetime_of_last_save(&journal), Some(10));

        core.save_with("data", "foo", &[], Lifetime::Unlimited, 3).unwrap();
        assert_eq!(lifetime_of_last_save(&journal), None);

        core.set_option("lifetime", "").unwrap();
        core.save("data", "foo", &[]).unwrap();
        assert_eq!(lifetime_of_last_save(&journal), None);
    }

    #[test]
    fn test_huge_lifetime_round_trip() {
        let (mut core, _) = setup();
        assert!(
            core.save_with("data", "foo", &[], Lifetime::Seconds(u64::MAX), 8)
                .unwrap()
        );
        assert_eq!(core.load("foo", false, false).unwrap(), Some(json!("data")));

        core.set_option("lifetime", u64::MAX).unwrap();
        assert!(core.save("data", "bar", &[]).unwrap());
        assert_eq!(core.load("bar", false, false).unwrap(), Some(json!("data")));
    }

    /// Memory backend that refuses a zero default lifetime
    #[derive(Default)]
    struct PickyBackend {
        inner: MemoryBackend,
    }

    impl Backend for PickyBackend {
        fn set_directives(&mut self, directives: Directives) -> Result<(), StorageError> {
            if directives.lifetime == Some(0) {
                return Err(StorageError::Backend("lifetime 0 refused".to_string()));
            }
            self.inner.set_directives(directives)
        }

        fn load(
            &self,
            id: &str,
            do_not_test_validity: bool,
        ) -> Result<Option<Bytes>, StorageError> {
            self.inner.load(id, do_not_test_validity)
        }

        fn test(&self, id: &str) -> Result<Option<i64>, StorageError> {
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
            self.inner.save(data, id, tags, lifetime, priority)
        }

        fn remove(&mut self, id: &str) -> Result<bool, StorageError> {
            self.inner.remove(id)
        }

        fn clean(&mut self, mode: CleaningMode, tags: &[String]) -> Result<bool, StorageError> {
            self.inner.clean(mode, tags)
        }

        fn capabilities(&self) -> Capabilities {
            self.inner.capabilities()
        }
    }

    #[test]
    fn test_rejected_directives_restore_options() {
        let mut core = Core::new(CoreOptions::default());
        core.set_backend(PickyBackend::default()).unwrap();

        assert!(matches!(
            core.set_option("lifetime", 0),
            Err(CacheError::Storage(StorageError::Backend(_)))
        ));
        assert_eq!(core.get_option("lifetime"), Some(json!(3600)));

        assert!(core.set_lifetime(Some(0)).is_err());
        assert_eq!(core.options().lifetime, Some(3600));

        core.set_option("lifetime", 60).unwrap();
        assert_eq!(core.options().lifetime, Some(60));
    }

    #[test]
    fn test_round_trip_string() {
        let (mut core, _) = setup();
        assert!(core.save("some data", "foo", &["tag1"]).unwrap());
        assert_eq!(core.load("foo", false, false).unwrap(), Some(json!("some data")));
        assert_eq!(core.load_as::<String>("foo").unwrap().as_deref(), Some("some data"));
    }

    #[test]
    fn test_round_trip_with_automatic_serialization() {
        let (mut core, _) = setup();
        core.set_option("automatic_serialization", true).unwrap();

        let data = json!({"list": ["foo", 1, true], "nested": {"a": null}});
        assert!(core.save(&data, "foo", &[]).unwrap());
        assert_eq!(core.load("foo", false, false).unwrap(), Some(data.clone()));

        // The raw stored form is handed back untouched when asked
        let raw = core.load("foo", false, true).unwrap().unwrap();
        assert_eq!(raw, Value::String(serde_json::to_string(&data).unwrap()));

        assert!(core.save(&vec!["foo"], "list", &[]).unwrap());
        assert_eq!(
            core.load_as::<Vec<String>>("list").unwrap(),
            Some(vec!["foo".to_string()])
        );
    }

    #[test]
    fn test_load_no_caching() {
        let (mut core, journal) = setup();
        core.save("data", "foo", &[]).unwrap();
        core.set_option("caching", false).unwrap();
        journal.clear();

        assert_eq!(core.load("foo", false, false).unwrap(), None);
        assert!(journal.is_empty());
    }

    #[test]
    fn test_load_bad_id() {
        let (core, journal) = setup();
        assert!(matches!(
            core.load("foo bar", false, false),
            Err(CacheError::InvalidIdentifier(_))
        ));
        assert!(journal.is_empty());
    }

    #[test]
    fn test_load_missing() {
        let (core, journal) = setup();
        assert_eq!(core.load("false", false, false).unwrap(), None);
        assert_eq!(
            journal.last(),
            Some(Call::Load {
                id: "false".to_string(),
                do_not_test_validity: false,
            })
        );
    }

    #[test]
    fn test_test_operation() {
        let (mut core, journal) = setup();
        assert_eq!(core.test("foo").unwrap(), None);

        core.save("data", "foo", &[]).unwrap();
        assert!(core.test("foo").unwrap().is_some());
        assert_eq!(journal.last(), Some(Call::Test { id: "foo".to_string() }));

        assert!(matches!(core.test("foo bar"), Err(CacheError::InvalidIdentifier(_))));

        core.set_option("caching", false).unwrap();
        journal.clear();
        assert_eq!(core.test("foo").unwrap(), None);
        assert!(journal.is_empty());
    }

    #[test]
    fn test_remove() {
        let (mut core, journal) = setup();
        core.save("data", "foo", &[]).unwrap();

        assert!(core.remove("foo").unwrap());
        assert_eq!(journal.last(), Some(Call::Remove { id: "foo".to_string() }));
        assert_eq!(core.load("foo", false, false).unwrap(), None);

        assert!(matches!(core.remove("foo bar"), Err(CacheError::InvalidIdentifier(_))));
    }

    #[test]
    fn test_remove_no_caching() {
        let (mut core, journal) = setup();
        core.set_option("caching", false).unwrap();
        journal.clear();

        assert!(core.remove("foo").unwrap());
        assert!(journal.is_empty());
    }

    #[test]
    fn test_clean_bad_calls() {
        let (mut core, journal) = setup();
        assert!(matches!(
            core.clean(CleaningMode::MatchingTag, &["foo bar", "foo"]),
            Err(CacheError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            core.clean(CleaningMode::MatchingAnyTag, &[]),
            Err(CacheError::MissingArgument(_))
        ));
        let bad_mode: Result<CleaningMode, CacheError> = "foo".parse::<CleaningMode>().map_err(CacheError::from);
        assert!(matches!(bad_mode, Err(CacheError::Configuration(_))));
        assert!(journal.is_empty());
    }

    #[test]
    fn test_clean_no_caching() {
        let (mut core, journal) = setup();
        core.set_option("caching", false).unwrap();
        journal.clear();

        assert!(core.clean(CleaningMode::All, &[]).unwrap());
        assert!(journal.is_empty());
    }

    #[test]
    fn test_clean_matching_tag() {
        let (mut core, journal) = setup();
        seed_fixture(&mut core);

        assert!(core.clean(CleaningMode::MatchingTag, &["tag1", "tag2"]).unwrap());
        assert_eq!(
            journal.last(),
            Some(Call::Clean {
                mode: CleaningMode::MatchingTag,
                tags: tags(&["tag1", "tag2"]),
            })
        );
        assert_eq!(core.get_ids().unwrap(), tags(&["id3", "id4", "id5", "id6"]));
    }

    #[test]
    fn test_clean_not_matching_and_any() {
        let (mut core, _) = setup();
        seed_fixture(&mut core);

        core.clean(CleaningMode::NotMatchingTag, &["tag3", "tag5"]).unwrap();
        assert_eq!(core.get_ids().unwrap(), tags(&["id3", "id4", "id5", "id6"]));

        core.clean(CleaningMode::MatchingAnyTag, &["tag4", "tag6"]).unwrap();
        assert!(core.get_ids().unwrap().is_empty());
    }

    #[test]
    fn test_tag_operations_need_tag_capability() {
        let backend = RecordingBackend::new().with_capabilities(Capabilities::default());
        let (mut core, journal) = core_with(backend);

        assert!(matches!(
            core.clean(CleaningMode::MatchingTag, &["tag1"]),
            Err(CacheError::Unsupported(_))
        ));
        assert!(matches!(
            core.get_ids_matching_tags(&["tag1"]),
            Err(CacheError::Unsupported(_))
        ));
        assert!(matches!(core.get_ids(), Err(CacheError::Unsupported(_))));
        assert!(matches!(core.get_tags(), Err(CacheError::Unsupported(_))));
        assert!(journal.is_empty());

        // Non-tag modes do not depend on the capability
        assert!(core.clean(CleaningMode::All, &[]).unwrap());
    }

    #[test]
    fn test_get_ids_strips_prefix() {
        let (mut core, _) = setup();
        core.set_option("cache_id_prefix", "prefix_").unwrap();
        seed_fixture(&mut core);

        let ids = core.get_ids().unwrap();
        assert!(ids.contains(&"id1".to_string()));
        assert!(ids.contains(&"id2".to_string()));
        assert!(ids.iter().all(|id| !id.starts_with("prefix_")));
    }

    #[test]
    fn test_get_ids_by_tags() {
        let (mut core, _) = setup();
        core.set_option("cache_id_prefix", "prefix_").unwrap();
        seed_fixture(&mut core);

        assert_eq!(
            core.get_ids_matching_tags(&["tag1", "tag2"]).unwrap(),
            tags(&["id1", "id2"])
        );
        assert_eq!(
            core.get_ids_not_matching_tags(&["tag3", "tag4"]).unwrap(),
            tags(&["id1", "id2", "id5", "id6"])
        );
        assert_eq!(
            core.get_ids_matching_any_tags(&["tag5", "tag6"]).unwrap(),
            tags(&["id5", "id6"])
        );
        assert_eq!(core.get_tags().unwrap().len(), 6);
        assert!(matches!(
            core.get_ids_matching_tags(&["bad tag"]),
            Err(CacheError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_prefix_applied_at_storage_layer() {
        let (mut core, journal) = setup();
        core.set_option("cache_id_prefix", "pfx_").unwrap();
        core.set_option("write_control", false).unwrap();

        core.save("data", "foo", &[]).unwrap();
        match journal.last() {
            Some(Call::Save { id, .. }) => assert_eq!(id, "pfx_foo"),
            other => panic!("expected a save, got {:?}", other),
        }
        assert_eq!(core.get_ids().unwrap(), tags(&["foo"]));
        assert_eq!(core.load_as::<String>("foo").unwrap().as_deref(), Some("data"));
    }

    #[test]
    fn test_metadatas_and_touch() {
        let (mut core, _) = setup();
        core.set_option("cache_id_prefix", "pfx_").unwrap();
        core.save("data", "foo", &["tag1"]).unwrap();

        let metadata = core.get_metadatas("foo").unwrap().unwrap();
        assert_eq!(metadata.tags, tags(&["tag1"]));
        let expire = metadata.expire.unwrap();

        assert!(core.touch("foo", 100).unwrap());
        assert_eq!(core.get_metadatas("foo").unwrap().unwrap().expire, Some(expire + 100));
        assert!(!core.touch("missing", 100).unwrap());
        assert_eq!(core.get_filling_percentage().unwrap(), 0);
    }

    #[test]
    fn test_logger_sanity() {
        let core = Core::new(CoreOptions::from_map([("logging", json!(true))]).unwrap());
        assert!(core.logger().is_some());

        let mut core = Core::default();
        assert!(core.logger().is_none());
        core.set_option("logging", true).unwrap();
        assert!(core.logger().is_some());
    }
}
