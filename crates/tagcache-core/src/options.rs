//! Cache core options
//!
//! The options bag is flat: each option has a fixed name and type. Values
//! arrive either as a TOML file or one at a time through
//! [`CoreOptions::set`]; both paths run the same validation. Unknown
//! option names are ignored so a shared configuration file can carry
//! frontend-specific keys.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tagcache_storage::Directives;
use tracing::{debug, info};

use crate::error::CacheError;
use crate::validate::is_identifier;

/// Options recognized by the cache core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreOptions {
    /// Enable the caching pipeline; when off every operation is a local no-op
    #[serde(default = "default_caching")]
    pub caching: bool,
    /// Default lifetime in seconds, `None` for unlimited
    #[serde(default = "default_lifetime")]
    pub lifetime: Option<u64>,
    /// Route policy messages to the cache logger
    #[serde(default)]
    pub logging: bool,
    /// Re-read every entry right after writing it
    #[serde(default = "default_write_control")]
    pub write_control: bool,
    /// Serialize payloads to JSON on save and back on load
    #[serde(default)]
    pub automatic_serialization: bool,
    /// One save in N cleans expired entries first; 0 disables
    #[serde(default = "default_automatic_cleaning_factor")]
    pub automatic_cleaning_factor: u32,
    /// Prepended to every id at the storage layer
    #[serde(default)]
    pub cache_id_prefix: Option<String>,
    /// Finish an in-flight save even if the caller is interrupted
    #[serde(default)]
    pub ignore_user_abort: bool,
}

fn default_caching() -> bool {
    true
}

fn default_lifetime() -> Option<u64> {
    Some(3600)
}

fn default_write_control() -> bool {
    true
}

fn default_automatic_cleaning_factor() -> u32 {
    10
}

impl Default for CoreOptions {
    fn default() -> Self {
        Self {
            caching: default_caching(),
            lifetime: default_lifetime(),
            logging: false,
            write_control: default_write_control(),
            automatic_serialization: false,
            automatic_cleaning_factor: default_automatic_cleaning_factor(),
            cache_id_prefix: None,
            ignore_user_abort: false,
        }
    }
}

/// Normalize an option name: lowercase, and it must look like an identifier
pub(crate) fn normalize_option_name(name: &str) -> Result<String, CacheError> {
    let name = name.trim().to_lowercase();
    let starts_ok = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !starts_ok || !is_identifier(&name) {
        return Err(CacheError::Configuration(format!(
            "Incorrect option name: {:?}",
            name
        )));
    }
    Ok(name)
}

pub(crate) fn expect_bool(name: &str, value: &Value) -> Result<bool, CacheError> {
    value.as_bool().ok_or_else(|| {
        CacheError::Configuration(format!("Option '{}' expects a boolean, got {}", name, value))
    })
}

pub(crate) fn expect_u64(name: &str, value: &Value) -> Result<u64, CacheError> {
    value.as_u64().ok_or_else(|| {
        CacheError::Configuration(format!(
            "Option '{}' expects a non-negative integer, got {}",
            name, value
        ))
    })
}

/// `null` and `""` both mean "no lifetime"
pub(crate) fn expect_lifetime(name: &str, value: &Value) -> Result<Option<u64>, CacheError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.is_empty() => Ok(None),
        other => expect_u64(name, other).map(Some),
    }
}

impl CoreOptions {
    /// Set one option by name.
    ///
    /// Returns `Ok(false)` when the name is not a core option; such names
    /// are ignored.
    pub fn set(&mut self, name: &str, value: Value) -> Result<bool, CacheError> {
        let name = normalize_option_name(name)?;

        match name.as_str() {
            "caching" => self.caching = expect_bool(&name, &value)?,
            "lifetime" => self.lifetime = expect_lifetime(&name, &value)?,
            "logging" => self.logging = expect_bool(&name, &value)?,
            "write_control" => self.write_control = expect_bool(&name, &value)?,
            "automatic_serialization" => {
                self.automatic_serialization = expect_bool(&name, &value)?
            }
            "automatic_cleaning_factor" => {
                let factor = expect_u64(&name, &value)?;
                self.automatic_cleaning_factor = u32::try_from(factor).map_err(|_| {
                    CacheError::Configuration(format!(
                        "automatic_cleaning_factor out of range: {}",
                        factor
                    ))
                })?;
            }
            "cache_id_prefix" => {
                self.cache_id_prefix = match &value {
                    Value::Null => None,
                    Value::String(s) if s.is_empty() => None,
                    Value::String(s) if is_identifier(s) => Some(s.clone()),
                    other => {
                        return Err(CacheError::Configuration(format!(
                            "cache_id_prefix must match [a-zA-Z0-9_]+, got {}",
                            other
                        )));
                    }
                }
            }
            "ignore_user_abort" => self.ignore_user_abort = expect_bool(&name, &value)?,
            _ => {
                debug!("Ignoring unknown cache option '{}'", name);
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// The subset of options pushed down to the backend
    pub fn directives(&self) -> Directives {
        Directives {
            lifetime: self.lifetime,
            logging: self.logging,
        }
    }

    /// Current value of a core option, `None` for unknown names
    pub fn get(&self, name: &str) -> Option<Value> {
        let name = name.trim().to_lowercase();
        let value = match name.as_str() {
            "caching" => Value::from(self.caching),
            "lifetime" => self.lifetime.map(Value::from).unwrap_or(Value::Null),
            "logging" => Value::from(self.logging),
            "write_control" => Value::from(self.write_control),
            "automatic_serialization" => Value::from(self.automatic_serialization),
            "automatic_cleaning_factor" => Value::from(self.automatic_cleaning_factor),
            "cache_id_prefix" => self
                .cache_id_prefix
                .clone()
                .map(Value::from)
                .unwrap_or(Value::Null),
            "ignore_user_abort" => Value::from(self.ignore_user_abort),
            _ => return None,
        };
        Some(value)
    }

    /// Build options from a flat map of name → value
    pub fn from_map<I, K>(entries: I) -> Result<Self, CacheError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        let mut options = Self::default();
        for (name, value) in entries {
            options.set(name.as_ref(), value)?;
        }
        Ok(options)
    }

    /// Parse a flat TOML table of options
    pub fn from_toml_str(content: &str) -> Result<Self, CacheError> {
        let table: toml::Table = toml::from_str(content)
            .map_err(|e| CacheError::Configuration(format!("Failed to parse options: {}", e)))?;

        let entries = table
            .into_iter()
            .map(|(name, value)| -> Result<(String, Value), CacheError> {
                Ok((name, serde_json::to_value(value)?))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_map(entries)
    }

    /// Load options from a TOML file, falling back to defaults when the
    /// file does not exist
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref();

        if !path.exists() {
            info!("Cache options file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            CacheError::Configuration(format!("Failed to read options file {:?}: {}", path, e))
        })?;

        let options = Self::from_toml_str(&content)?;
        info!("Loaded cache options from {:?}", path);
        Ok(options)
    }
}
