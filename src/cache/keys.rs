//! Content-addressed cache keys.
//!
//! A key is `{prefix}:{document_kind}:{output_format}:{digest16}` where the digest covers a
//! canonical JSON rendering of the data, template, kind, format, layout and schema version.
//! Object keys are sorted recursively, so insertion order and formatting never reach the digest.

use std::fmt;

use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::domain::documents::DocumentRequest;
use crate::domain::types::{ArtifactType, OutputFormat};

const DIGEST_LEN: usize = 16;

#[derive(Debug, Error)]
#[error("cache input is not JSON-representable: {source}")]
pub struct SerializationError {
    #[from]
    source: serde_json::Error,
}

/// Opaque, namespaced cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pure key derivation. Bumping `schema_version` orphans every previously issued key.
#[derive(Debug, Clone, Copy)]
pub struct CacheKeyer {
    schema_version: u32,
}

impl CacheKeyer {
    pub fn new(schema_version: u32) -> Self {
        Self { schema_version }
    }

    pub fn key<T>(
        &self,
        data: &T,
        template: &str,
        document_kind: &str,
        output_format: OutputFormat,
        layout_variant: &str,
        prefix: ArtifactType,
    ) -> Result<CacheKey, SerializationError>
    where
        T: Serialize + ?Sized,
    {
        let data = serde_json::to_value(data)?;
        let envelope = json!({
            "data": data,
            "template": template,
            "document_kind": document_kind,
            "output_format": output_format.as_str(),
            "layout_variant": layout_variant,
            "schema_version": self.schema_version,
        });

        let mut canonical = String::new();
        write_canonical(&envelope, &mut canonical)?;

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let digest = hex::encode(hasher.finalize());

        Ok(CacheKey(format!(
            "{prefix}:{document_kind}:{output_format}:{}",
            &digest[..DIGEST_LEN]
        )))
    }

    /// Key for a request, namespaced by the artifact type of its output format.
    pub fn key_for(&self, request: &DocumentRequest) -> Result<CacheKey, SerializationError> {
        self.key(
            &request.data,
            &request.template_name,
            &request.document_kind,
            request.output_format,
            &request.layout_variant,
            request.output_format.artifact_type(),
        )
    }
}

/// Serialize with recursively sorted object keys and no insignificant whitespace.
pub fn canonical_json(value: &Value) -> Result<String, SerializationError> {
    let mut out = String::new();
    write_canonical(value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut String) -> Result<(), SerializationError> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (index, (key, value)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(value, out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use super::*;

    fn keyer() -> CacheKeyer {
        CacheKeyer::new(1)
    }

    fn pdf_key(data: &Value) -> CacheKey {
        keyer()
            .key(
                data,
                "classic",
                "invoice",
                OutputFormat::Pdf,
                "normal",
                ArtifactType::Pdf,
            )
            .expect("key")
    }

    #[test]
    fn insertion_order_does_not_change_the_key() {
        let first: Value =
            serde_json::from_str(r#"{"b": 1, "a": {"y": [1, 2], "x": "z"}}"#).expect("json");
        let second: Value =
            serde_json::from_str(r#"{"a": {"x": "z", "y": [1, 2]}, "b": 1}"#).expect("json");

        assert_eq!(pdf_key(&first), pdf_key(&second));
    }

    #[test]
    fn content_changes_change_the_key() {
        let first = json!({"total": 10});
        let second = json!({"total": 11});
        assert_ne!(pdf_key(&first), pdf_key(&second));
    }

    #[test]
    fn array_order_is_significant() {
        assert_ne!(pdf_key(&json!([1, 2])), pdf_key(&json!([2, 1])));
    }

    #[test]
    fn key_has_namespaced_shape() {
        let key = pdf_key(&json!({}));
        let parts: Vec<&str> = key.as_str().split(':').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(&parts[..3], &["pdf", "invoice", "pdf"]);
        assert_eq!(parts[3].len(), 16);
        assert!(parts[3].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn schema_version_busts_keys() {
        let data = json!({"a": 1});
        let v1 = CacheKeyer::new(1)
            .key(&data, "t", "k", OutputFormat::Latex, "normal", ArtifactType::Latex)
            .expect("key");
        let v2 = CacheKeyer::new(2)
            .key(&data, "t", "k", OutputFormat::Latex, "normal", ArtifactType::Latex)
            .expect("key");
        assert_ne!(v1, v2);
    }

    #[test]
    fn layout_variant_participates_in_digest() {
        let data = json!({"a": 1});
        let normal = keyer()
            .key(&data, "t", "k", OutputFormat::Pdf, "normal", ArtifactType::Pdf)
            .expect("key");
        let compact = keyer()
            .key(&data, "t", "k", OutputFormat::Pdf, "compact", ArtifactType::Pdf)
            .expect("key");
        assert_ne!(normal, compact);
    }

    #[test]
    fn typed_maps_hash_like_their_json_equivalent() {
        let mut typed = BTreeMap::new();
        typed.insert("b", 2);
        typed.insert("a", 1);
        let from_typed = keyer()
            .key(&typed, "t", "k", OutputFormat::Pdf, "normal", ArtifactType::Pdf)
            .expect("key");
        let from_json = keyer()
            .key(
                &json!({"a": 1, "b": 2}),
                "t",
                "k",
                OutputFormat::Pdf,
                "normal",
                ArtifactType::Pdf,
            )
            .expect("key");
        assert_eq!(from_typed, from_json);
    }

    #[test]
    fn non_string_map_keys_are_rejected() {
        let mut data = HashMap::new();
        data.insert((1, 2), "tuple keys are not JSON");
        let result = keyer().key(&data, "t", "k", OutputFormat::Pdf, "normal", ArtifactType::Pdf);
        assert!(result.is_err());
    }

    #[test]
    fn canonical_json_sorts_nested_objects() {
        let value = json!({"z": {"b": true, "a": null}, "m": [ {"d": 1, "c": 2} ]});
        assert_eq!(
            canonical_json(&value).expect("canonical"),
            r#"{"m":[{"c":2,"d":1}],"z":{"a":null,"b":true}}"#
        );
    }
}
