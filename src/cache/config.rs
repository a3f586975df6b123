//! Cache configuration.

use std::num::NonZeroUsize;

const DEFAULT_CAPACITY: usize = 1024;
const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Process cache limits, resolved from the `[cache]` settings section.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of keys held before least-recently-used eviction.
    pub capacity: NonZeroUsize,
    /// Largest response body the middleware will buffer for hashing or rewriting.
    pub max_body_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: NonZeroUsize::new(DEFAULT_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            capacity: settings.capacity,
            max_body_bytes: settings.max_body_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.capacity.get(), 1024);
        assert_eq!(config.max_body_bytes, 2 * 1024 * 1024);
    }
}
