//! Cache configuration.
//!
//! Controls artifact TTLs and the key schema version via `pressroom.toml`.

use std::time::Duration;

use serde::Deserialize;

use crate::domain::types::ArtifactType;

const DEFAULT_BINARY_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_SOURCE_TTL_SECS: u64 = 12 * 60 * 60;
pub const DEFAULT_SCHEMA_VERSION: u32 = 1;

/// Cache configuration from `pressroom.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Disable to bypass the cache entirely (every lookup misses, nothing is stored).
    pub enabled: bool,
    /// TTL for compiled binary artifacts (pdf, docx).
    pub binary_ttl_secs: u64,
    /// TTL for intermediate source text (latex).
    pub source_ttl_secs: u64,
    /// Mixed into every digest; bump to invalidate all prior keys.
    pub schema_version: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary_ttl_secs: DEFAULT_BINARY_TTL_SECS,
            source_ttl_secs: DEFAULT_SOURCE_TTL_SECS,
            schema_version: DEFAULT_SCHEMA_VERSION,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            binary_ttl_secs: settings.binary_ttl.as_secs(),
            source_ttl_secs: settings.source_ttl.as_secs(),
            schema_version: settings.schema_version,
        }
    }
}

impl CacheConfig {
    pub fn ttl_for(&self, artifact: ArtifactType) -> Duration {
        if artifact.is_binary() {
            Duration::from_secs(self.binary_ttl_secs)
        } else {
            Duration::from_secs(self.source_ttl_secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.binary_ttl_secs, 86_400);
        assert_eq!(config.source_ttl_secs, 43_200);
        assert_eq!(config.schema_version, 1);
    }

    #[test]
    fn binary_artifacts_outlive_source() {
        let config = CacheConfig::default();
        assert!(config.ttl_for(ArtifactType::Pdf) > config.ttl_for(ArtifactType::Latex));
        assert_eq!(
            config.ttl_for(ArtifactType::Docx),
            config.ttl_for(ArtifactType::Pdf)
        );
    }
}
