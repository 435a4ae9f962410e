//! Per-entry lifetime overrides

/// Lifetime requested for a single save
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifetime {
    /// Use the core's `lifetime` option
    #[default]
    Default,
    /// Expire after this many seconds
    Seconds(u64),
    /// Never expire
    Unlimited,
}

impl Lifetime {
    /// Resolve against the configured default; `None` means unlimited
    pub fn resolve(self, default: Option<u64>) -> Option<u64> {
        match self {
            Lifetime::Default => default,
            Lifetime::Seconds(secs) => Some(secs),
            Lifetime::Unlimited => None,
        }
    }
}

impl From<Option<u64>> for Lifetime {
    fn from(value: Option<u64>) -> Self {
        match value {
            Some(secs) => Lifetime::Seconds(secs),
            None => Lifetime::Unlimited,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        assert_eq!(Lifetime::Default.resolve(Some(3600)), Some(3600));
        assert_eq!(Lifetime::Default.resolve(None), None);
        assert_eq!(Lifetime::Seconds(10).resolve(Some(3600)), Some(10));
        assert_eq!(Lifetime::Unlimited.resolve(Some(3600)), None);
        assert_eq!(Lifetime::from(None), Lifetime::Unlimited);
    }
}
