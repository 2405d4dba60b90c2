//! Pressroom artifact cache.
//!
//! Content-addressed: two logically identical build requests, from any client, collapse to one
//! entry. Entries live in the shared key-value store under `{pdf,latex,docx}:` namespaces and
//! expire by store-enforced TTL.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! binary_ttl_seconds = 86400
//! source_ttl_seconds = 43200
//! schema_version = 1
//! ```

mod config;
mod document;
mod keys;
mod metrics;

pub use config::{CacheConfig, DEFAULT_SCHEMA_VERSION};
pub use document::DocumentCache;
pub use keys::{CacheKey, CacheKeyer, SerializationError, canonical_json};
pub use metrics::CacheMetricsSnapshot;
