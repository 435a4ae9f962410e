//! Per-route page caching rules
//!
//! A rule is a set of overrides on top of the default page options. Rules
//! are keyed by a regular expression over the request URI; when several
//! match, the one registered last wins.

use regex::Regex;
use serde_json::{Map, Value};

use crate::cache::{DEFAULT_PRIORITY, Lifetime, MAX_PRIORITY};
use crate::error::CacheError;
use crate::options::{expect_bool, expect_u64, normalize_option_name};
use crate::validate::validate_tags;

/// Request variable families that can feed the page id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestVariables {
    Get,
    Post,
    Session,
    Files,
    Cookie,
}

impl RequestVariables {
    pub const ALL: [RequestVariables; 5] = [
        RequestVariables::Get,
        RequestVariables::Post,
        RequestVariables::Session,
        RequestVariables::Files,
        RequestVariables::Cookie,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestVariables::Get => "get",
            RequestVariables::Post => "post",
            RequestVariables::Session => "session",
            RequestVariables::Files => "files",
            RequestVariables::Cookie => "cookie",
        }
    }

    fn from_option_suffix(name: &str, prefix: &str) -> Option<Self> {
        let family = name.strip_prefix(prefix)?.strip_suffix("_variables")?;
        Self::ALL.into_iter().find(|v| v.as_str() == family)
    }
}

/// One flag per request variable family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableFlags {
    pub get: bool,
    pub post: bool,
    pub session: bool,
    pub files: bool,
    pub cookie: bool,
}

impl VariableFlags {
    pub const fn all(value: bool) -> Self {
        Self {
            get: value,
            post: value,
            session: value,
            files: value,
            cookie: value,
        }
    }

    pub fn get(&self, family: RequestVariables) -> bool {
        match family {
            RequestVariables::Get => self.get,
            RequestVariables::Post => self.post,
            RequestVariables::Session => self.session,
            RequestVariables::Files => self.files,
            RequestVariables::Cookie => self.cookie,
        }
    }

    pub fn set(&mut self, family: RequestVariables, value: bool) {
        match family {
            RequestVariables::Get => self.get = value,
            RequestVariables::Post => self.post = value,
            RequestVariables::Session => self.session = value,
            RequestVariables::Files => self.files = value,
            RequestVariables::Cookie => self.cookie = value,
        }
    }
}

/// Options in force for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRule {
    /// Whether the page is cached at all
    pub cache: bool,
    /// Cache even when the request carries variables of this family
    pub cache_with: VariableFlags,
    /// Mix variables of this family into the page id
    pub make_id_with: VariableFlags,
    pub specific_lifetime: Lifetime,
    pub tags: Vec<String>,
    pub priority: u8,
}

impl Default for PageRule {
    fn default() -> Self {
        Self {
            cache: true,
            cache_with: VariableFlags::all(false),
            make_id_with: VariableFlags::all(true),
            specific_lifetime: Lifetime::Default,
            tags: Vec::new(),
            priority: DEFAULT_PRIORITY,
        }
    }
}

impl PageRule {
    /// Overlay the options found in `overrides`.
    ///
    /// Keys must be option names; unknown names are ignored.
    pub fn apply(&mut self, overrides: &Map<String, Value>) -> Result<(), CacheError> {
        for (key, value) in overrides {
            let name = normalize_option_name(key)?;

            let cache_with = RequestVariables::from_option_suffix(&name, "cache_with_");
            let make_id_with = RequestVariables::from_option_suffix(&name, "make_id_with_");

            if name == "cache" {
                self.cache = expect_bool(&name, value)?;
            } else if let Some(family) = cache_with {
                self.cache_with.set(family, expect_bool(&name, value)?);
            } else if let Some(family) = make_id_with {
                self.make_id_with.set(family, expect_bool(&name, value)?);
            } else if name == "specific_lifetime" {
                self.specific_lifetime = match value {
                    Value::Bool(false) => Lifetime::Default,
                    Value::Null => Lifetime::Unlimited,
                    other => Lifetime::Seconds(expect_u64(&name, other)?),
                };
            } else if name == "tags" {
                self.tags = parse_tags(value)?;
            } else if name == "priority" {
                self.priority = match value {
                    Value::Null => DEFAULT_PRIORITY,
                    other => parse_priority(&name, other)?,
                };
            }
        }
        Ok(())
    }
}

fn parse_tags(value: &Value) -> Result<Vec<String>, CacheError> {
    let Value::Array(items) = value else {
        return Err(CacheError::Configuration(format!(
            "Page option 'tags' expects a list, got {}",
            value
        )));
    };

    let tags = items
        .iter()
        .map(|item| {
            item.as_str().map(str::to_string).ok_or_else(|| {
                CacheError::Configuration(format!("Page tag must be a string, got {}", item))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    validate_tags(&tags)?;
    Ok(tags)
}

fn parse_priority(name: &str, value: &Value) -> Result<u8, CacheError> {
    let priority = expect_u64(name, value)?;
    if priority > u64::from(MAX_PRIORITY) {
        return Err(CacheError::Configuration(format!(
            "Priority must be between 0 and {}, got {}",
            MAX_PRIORITY, priority
        )));
    }
    Ok(priority as u8)
}

/// Ordered set of URI rules
#[derive(Debug, Clone, Default)]
pub struct PageRules {
    rules: Vec<(Regex, Map<String, Value>)>,
}

impl PageRules {
    /// Parse a map of `regex → overrides`, keeping insertion order
    pub fn from_value(value: &Value) -> Result<Self, CacheError> {
        let Value::Object(entries) = value else {
            return Err(CacheError::Configuration(format!(
                "Page option 'regexps' expects a map of regex to options, got {}",
                value
            )));
        };

        let mut rules = Vec::with_capacity(entries.len());
        for (pattern, overrides) in entries {
            let Value::Object(overrides) = overrides else {
                return Err(CacheError::Configuration(format!(
                    "Options for regex '{}' must be a map, got {}",
                    pattern, overrides
                )));
            };

            let regex = Regex::new(pattern).map_err(|e| {
                CacheError::Configuration(format!("Invalid regex '{}': {}", pattern, e))
            })?;

            // Reject bad keys or values now rather than on the first request
            PageRule::default().apply(overrides)?;

            rules.push((regex, overrides.clone()));
        }

        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Overrides of the last rule whose regex matches `uri`
    pub fn find_match(&self, uri: &str) -> Option<&Map<String, Value>> {
        self.rules
            .iter()
            .rev()
            .find(|(regex, _)| regex.is_match(uri))
            .map(|(_, overrides)| overrides)
    }

    /// Options in force for `uri`
    pub fn resolve(&self, defaults: &PageRule, uri: &str) -> Result<PageRule, CacheError> {
        let mut active = defaults.clone();
        if let Some(overrides) = self.find_match(uri) {
            active.apply(overrides)?;
        }
        Ok(active)
    }
}
