//! Full page caching
//!
//! [`PageCache::start`] looks the request up. On a hit the stored body is
//! written to the output right away; on a miss the caller receives a
//! [`PageCapture`] to render into, and [`PageCapture::finish`] stores the
//! captured body before emitting it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{self, Write};
use tagcache_storage::Backend;
use tracing::{debug, warn};

use super::rules::{PageRule, PageRules, RequestVariables};
use crate::cache::Core;
use crate::error::CacheError;
use crate::options::{CoreOptions, expect_bool, normalize_option_name};

/// Banner written before a cached body when `debug_header` is on
pub const DEBUG_HEADER_MESSAGE: &str = "DEBUG HEADER : This is a cached page !";

/// Header memorized when `content_type_memorization` is on
const CONTENT_TYPE: &str = "Content-Type";

/// The parts of an incoming request that page caching looks at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Request URI, query string included
    pub uri: String,
    pub get: BTreeMap<String, String>,
    pub post: BTreeMap<String, String>,
    pub session: BTreeMap<String, String>,
    pub files: BTreeMap<String, String>,
    pub cookie: BTreeMap<String, String>,
}

impl PageRequest {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }

    pub fn with_variable(
        mut self,
        family: RequestVariables,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.variables_mut(family).insert(name.into(), value.into());
        self
    }

    pub fn with_get(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_variable(RequestVariables::Get, name, value)
    }

    pub fn with_post(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_variable(RequestVariables::Post, name, value)
    }

    pub fn with_cookie(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_variable(RequestVariables::Cookie, name, value)
    }

    pub fn variables(&self, family: RequestVariables) -> &BTreeMap<String, String> {
        match family {
            RequestVariables::Get => &self.get,
            RequestVariables::Post => &self.post,
            RequestVariables::Session => &self.session,
            RequestVariables::Files => &self.files,
            RequestVariables::Cookie => &self.cookie,
        }
    }

    fn variables_mut(&mut self, family: RequestVariables) -> &mut BTreeMap<String, String> {
        match family {
            RequestVariables::Get => &mut self.get,
            RequestVariables::Post => &mut self.post,
            RequestVariables::Session => &mut self.session,
            RequestVariables::Files => &mut self.files,
            RequestVariables::Cookie => &mut self.cookie,
        }
    }

    /// URI without its query string
    pub fn path(&self) -> &str {
        self.uri
            .split_once('?')
            .map_or(self.uri.as_str(), |(path, _)| path)
    }
}

/// What is stored for a cached page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedPage {
    pub data: String,
    /// Memorized response headers, replayed on a hit
    pub headers: Vec<(String, String)>,
}

/// Outcome of [`PageCache::start`]
#[derive(Debug)]
pub enum PageStart<'a, W: Write> {
    /// Nothing usable in cache; render the page into the capture
    Miss(PageCapture<'a, W>),
    /// The cached body has already been written to the output
    Hit {
        headers: Vec<(String, String)>,
        /// The caller should stop producing output
        halt: bool,
    },
}

impl<W: Write> PageStart<'_, W> {
    pub fn is_miss(&self) -> bool {
        matches!(self, PageStart::Miss(_))
    }

    pub fn is_hit(&self) -> bool {
        !self.is_miss()
    }
}

/// Page cache frontend on top of a [`Core`]
#[derive(Debug)]
pub struct PageCache {
    core: Core,
    debug_header: bool,
    memorize_headers: Vec<String>,
    default_options: PageRule,
    regexps: PageRules,
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new(CoreOptions::default())
    }
}

impl PageCache {
    /// Pages are stored as structured entries, so serialization is forced on
    pub fn new(mut options: CoreOptions) -> Self {
        options.automatic_serialization = true;
        Self {
            core: Core::new(options),
            debug_header: false,
            memorize_headers: Vec::new(),
            default_options: PageRule::default(),
            regexps: PageRules::default(),
        }
    }

    /// Build from a flat map mixing page and core options
    pub fn from_map<I, K>(entries: I) -> Result<Self, CacheError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        let mut page = Self::default();
        for (name, value) in entries {
            page.set_option(name.as_ref(), value)?;
        }
        Ok(page)
    }

    /// Set a page option, or forward it to the core when it is not one
    pub fn set_option(&mut self, name: &str, value: impl Into<Value>) -> Result<(), CacheError> {
        let value = value.into();
        let name = normalize_option_name(name)?;

        match name.as_str() {
            "debug_header" => self.debug_header = expect_bool(&name, &value)?,
            "http_conditional" => {
                if expect_bool(&name, &value)? {
                    return Err(CacheError::Configuration(
                        "http_conditional is not implemented".to_string(),
                    ));
                }
            }
            "memorize_headers" => self.memorize_headers = parse_header_names(&value)?,
            "content_type_memorization" => {
                let memorize = expect_bool(&name, &value)?;
                self.memorize_headers
                    .retain(|h| !h.eq_ignore_ascii_case(CONTENT_TYPE));
                if memorize {
                    self.memorize_headers.push(CONTENT_TYPE.to_string());
                }
            }
            "default_options" => {
                let Value::Object(overrides) = &value else {
                    return Err(CacheError::Configuration(format!(
                        "default_options expects a map, got {}",
                        value
                    )));
                };
                let mut defaults = self.default_options.clone();
                defaults.apply(overrides)?;
                self.default_options = defaults;
            }
            "regexps" => self.regexps = PageRules::from_value(&value)?,
            "automatic_serialization" => {
                if !expect_bool(&name, &value)? {
                    return Err(CacheError::Configuration(
                        "automatic_serialization cannot be disabled for page caching"
                            .to_string(),
                    ));
                }
            }
            _ => self.core.set_option(&name, value)?,
        }

        Ok(())
    }

    pub fn core(&self) -> &Core {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut Core {
        &mut self.core
    }

    pub fn set_backend<B>(&mut self, backend: B) -> Result<(), CacheError>
    where
        B: Backend + 'static,
    {
        self.core.set_backend(backend)
    }

    pub fn default_options(&self) -> &PageRule {
        &self.default_options
    }

    pub fn memorize_headers(&self) -> &[String] {
        &self.memorize_headers
    }

    /// Options in force for `request`
    pub fn active_options(&self, request: &PageRequest) -> Result<PageRule, CacheError> {
        self.regexps.resolve(&self.default_options, &request.uri)
    }

    /// Page id for `request` under `rule`, `None` when the request carries
    /// variables the rule does not allow caching with
    pub fn make_id(
        &self,
        request: &PageRequest,
        rule: &PageRule,
    ) -> Result<Option<String>, CacheError> {
        let mut hasher = Sha256::new();
        hasher.update(request.path().as_bytes());

        for family in RequestVariables::ALL {
            let vars = request.variables(family);
            if rule.cache_with.get(family) {
                if rule.make_id_with.get(family) {
                    hasher.update(serde_json::to_vec(vars)?);
                }
            } else if !vars.is_empty() {
                return Ok(None);
            }
        }

        Ok(Some(hex::encode(hasher.finalize())))
    }

    /// Look `request` up.
    ///
    /// `id` overrides the computed page id. On a hit the cached body (after
    /// the debug banner, when enabled) is written to `out`, and `halt` is
    /// set unless `do_not_die` is.
    pub fn start<'a, W: Write>(
        &'a mut self,
        request: &PageRequest,
        id: Option<&str>,
        out: &'a mut W,
        do_not_die: bool,
    ) -> Result<PageStart<'a, W>, CacheError> {
        let rule = self.active_options(request)?;

        if !rule.cache {
            debug!("Page caching disabled for {}", request.uri);
            return Ok(PageStart::Miss(self.capture(out, None, rule)));
        }

        let id = match id {
            Some(id) => Some(id.to_string()),
            None => self.make_id(request, &rule)?,
        };
        let Some(id) = id else {
            debug!("Request variables prevent caching {}", request.uri);
            return Ok(PageStart::Miss(self.capture(out, None, rule)));
        };

        if let Some(page) = self.core.load_as::<CachedPage>(&id)? {
            debug!("Page cache hit for {} ({})", request.uri, id);
            if self.debug_header {
                out.write_all(DEBUG_HEADER_MESSAGE.as_bytes())?;
            }
            out.write_all(page.data.as_bytes())?;
            out.flush()?;
            return Ok(PageStart::Hit {
                headers: page.headers,
                halt: !do_not_die,
            });
        }

        debug!("Page cache miss for {} ({})", request.uri, id);
        Ok(PageStart::Miss(self.capture(out, Some(id), rule)))
    }

    fn capture<'a, W: Write>(
        &'a mut self,
        out: &'a mut W,
        id: Option<String>,
        rule: PageRule,
    ) -> PageCapture<'a, W> {
        PageCapture {
            memorize_headers: self.memorize_headers.clone(),
            core: &mut self.core,
            out,
            id,
            rule,
            buffer: Vec::new(),
            cancelled: false,
            finished: false,
        }
    }
}

fn parse_header_names(value: &Value) -> Result<Vec<String>, CacheError> {
    let Value::Array(items) = value else {
        return Err(CacheError::Configuration(format!(
            "memorize_headers expects a list of header names, got {}",
            value
        )));
    };

    items
        .iter()
        .map(|item| {
            item.as_str().map(str::to_string).ok_or_else(|| {
                CacheError::Configuration(format!("Header name must be a string, got {}", item))
            })
        })
        .collect()
}

/// Output capture for a page being rendered.
///
/// Dropping an unfinished capture emits what was written without caching it.
#[derive(Debug)]
pub struct PageCapture<'a, W: Write> {
    core: &'a mut Core,
    out: &'a mut W,
    id: Option<String>,
    rule: PageRule,
    memorize_headers: Vec<String>,
    buffer: Vec<u8>,
    cancelled: bool,
    finished: bool,
}

impl<W: Write> PageCapture<'_, W> {
    /// Id the page will be stored under, `None` when it will not be cached
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn options(&self) -> &PageRule {
        &self.rule
    }

    /// Keep capturing but do not store the result
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// Store the captured page and write it to the output.
    ///
    /// `headers` are the response headers; those listed in
    /// `memorize_headers` are stored alongside the body. Returns whether
    /// the page was stored, which is never the case with `caching` off.
    pub fn finish(mut self, headers: &[(&str, &str)]) -> Result<bool, CacheError> {
        self.finished = true;
        let buffer = std::mem::take(&mut self.buffer);

        let saved = match (self.id.take(), self.cancelled) {
            (Some(id), false) => self.store(&id, &buffer, headers),
            _ => Ok(false),
        };

        self.out.write_all(&buffer)?;
        self.out.flush()?;
        saved
    }

    fn store(
        &mut self,
        id: &str,
        body: &[u8],
        headers: &[(&str, &str)],
    ) -> Result<bool, CacheError> {
        if !self.core.options().caching {
            debug!("Caching is off, not storing page {}", id);
            return Ok(false);
        }

        let Ok(data) = std::str::from_utf8(body) else {
            warn!("Page {} is not valid UTF-8, not caching it", id);
            return Ok(false);
        };

        let page = CachedPage {
            data: data.to_string(),
            headers: headers
                .iter()
                .filter(|(name, _)| {
                    self.memorize_headers
                        .iter()
                        .any(|h| h.eq_ignore_ascii_case(name))
                })
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        };

        let tags: Vec<&str> = self.rule.tags.iter().map(String::as_str).collect();
        self.core.save_with(
            &page,
            id,
            &tags,
            self.rule.specific_lifetime,
            self.rule.priority,
        )
    }
}

impl<W: Write> Write for PageCapture<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: Write> Drop for PageCapture<'_, W> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.out.write_all(&self.buffer).and_then(|_| self.out.flush()) {
            warn!("Failed to emit uncached page output: {}", e);
        }
    }
}
