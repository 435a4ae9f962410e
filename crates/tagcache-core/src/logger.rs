//! Logger capability used when the `logging` option is on

use tracing::Level;

/// Receives the cache core's policy messages (failed writes, skipped
/// automatic cleaning, ...).
pub trait CacheLogger: Send + Sync {
    fn log(&self, level: Level, message: &str);
}

/// Default logger, forwarding to `tracing` under the `tagcache` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl CacheLogger for TracingLogger {
    fn log(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!(target: "tagcache", "{}", message),
            Level::WARN => tracing::warn!(target: "tagcache", "{}", message),
            Level::INFO => tracing::info!(target: "tagcache", "{}", message),
            Level::DEBUG => tracing::debug!(target: "tagcache", "{}", message),
            _ => tracing::trace!(target: "tagcache", "{}", message),
        }
    }
}
