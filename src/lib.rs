//! Schema compiler and validator (component A of the pipeline).
//!
//! Owns a compiler instance keyed by schema URI. `add_schema` compiles and
//! registers a schema document, fetching any external `$ref` it names over
//! HTTPS (single-flighted across concurrent callers). `validate` runs a
//! previously registered schema against a payload and classifies the
//! outcome the way the partition worker needs to decide whether a failure
//! is retriable, a bad payload, or an internal bug.

pub mod error;
mod fetch;
mod resolver;

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

pub use error::{CompileError, FetchError, ValidateError};
use fetch::RemoteFetcher;
use resolver::CachingResolver;

/// Outcome of `Validate`. Polymorphic over `{valid, errors}` per the
/// contract: a `false` result always carries at least one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    fn invalid(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }
}

struct CompiledSchema {
    validator: jsonschema::JSONSchema,
    ref_cache: Arc<DashMap<String, Arc<Value>>>,
}

/// Thread-safe, shareable schema validator. Typically constructed once per
/// process and cloned (it's an `Arc` internally) into every partition worker.
pub struct SchemaValidator {
    fetcher: RemoteFetcher,
    schemas: DashMap<String, Arc<CompiledSchema>>,
    default_base_uri: Option<url::Url>,
}

impl SchemaValidator {
    pub fn new() -> Self {
        Self {
            fetcher: RemoteFetcher::new(),
            schemas: DashMap::new(),
            default_base_uri: None,
        }
    }

    /// Construct with `schemaValidator.defaultBaseURI`: the base a relative
    /// `$ref` (one with no scheme of its own) is resolved against before
    /// being fetched.
    pub fn with_base_uri(base_uri: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            fetcher: RemoteFetcher::new(),
            schemas: DashMap::new(),
            default_base_uri: Some(url::Url::parse(base_uri)?),
        })
    }

    /// Compile `bytes` as a JSON Schema document and register it under
    /// `uri`. Any `$ref` the document points at an absolute `http(s)` URL is
    /// fetched (recursively, single-flight) before compilation so resolution
    /// never blocks inside the synchronous compiler.
    pub async fn add_schema(&self, uri: &str, bytes: &[u8]) -> Result<(), CompileError> {
        let doc: Value = serde_json::from_slice(bytes)?;

        let ref_cache: Arc<DashMap<String, Arc<Value>>> = Arc::new(DashMap::new());
        fetch::prefetch_refs(&self.fetcher, &doc, &ref_cache, self.default_base_uri.as_ref())
            .await
            .map_err(|e| CompileError::Fetch {
                uri: uri.to_string(),
                source: e,
            })?;

        let resolver = Arc::new(CachingResolver::new(ref_cache.clone()));
        let validator = jsonschema::JSONSchema::options()
            .with_resolver(resolver)
            .compile(&doc)
            .map_err(|e| CompileError::Compile(e.to_string()))?;

        self.schemas.insert(
            uri.to_string(),
            Arc::new(CompiledSchema {
                validator,
                ref_cache,
            }),
        );

        Ok(())
    }

    /// Validate `payload` against the schema registered under `uri`.
    ///
    /// - Unregistered `uri` → `SchemaUnavailable` (retriable: the caller may
    ///   be racing a still-in-flight `add_schema`, or the registry hasn't
    ///   pushed the schema yet).
    /// - Registered schema, non-conforming payload → `Ok` with
    ///   `valid: false` (not an error — the schema applied fine).
    /// - Compiler-internal failure → `InternalCompilerError`.
    pub fn validate(&self, uri: &str, payload: &Value) -> Result<ValidationResult, ValidateError> {
        let compiled = self.schemas.get(uri).ok_or_else(|| {
            ValidateError::SchemaUnavailable(
                uri.to_string(),
                FetchError::Status {
                    uri: uri.to_string(),
                    status: 404,
                },
            )
        })?;

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            compiled.validator.validate(payload)
        }));

        match result {
            Ok(Ok(())) => Ok(ValidationResult::ok()),
            Ok(Err(errors)) => {
                let messages = errors.map(|e| e.to_string()).collect();
                Ok(ValidationResult::invalid(messages))
            }
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic in schema compiler".to_string());
                Err(ValidateError::InternalCompilerError(uri.to_string(), msg))
            }
        }
    }

    /// Returns the schema's `$ref` cache size, exposed for tests that assert
    /// single-flight fetching happened exactly once per referenced URI.
    #[cfg(test)]
    fn ref_cache_len(&self, uri: &str) -> Option<usize> {
        self.schemas.get(uri).map(|c| c.ref_cache.len())
    }
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn add_schema_then_validate_accepts_conforming_payload() {
        let validator = SchemaValidator::new();
        let schema = json!({
            "type": "object",
            "required": ["id"],
            "properties": { "id": { "type": "string" } }
        });
        validator
            .add_schema("mem://order.v1", schema.to_string().as_bytes())
            .await
            .unwrap();

        let result = validator
            .validate("mem://order.v1", &json!({"id": "abc"}))
            .unwrap();
        assert!(result.valid);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn validate_rejects_nonconforming_payload_without_erroring() {
        let validator = SchemaValidator::new();
        let schema = json!({
            "type": "object",
            "required": ["id"],
        });
        validator
            .add_schema("mem://order.v1", schema.to_string().as_bytes())
            .await
            .unwrap();

        let result = validator.validate("mem://order.v1", &json!({})).unwrap();
        assert!(!result.valid);
        assert!(!result.errors.is_empty());
    }

    #[tokio::test]
    async fn validate_unregistered_uri_is_schema_unavailable() {
        let validator = SchemaValidator::new();
        let err = validator.validate("mem://missing", &json!({})).unwrap_err();
        assert!(matches!(err, ValidateError::SchemaUnavailable(_, _)));
    }

    #[tokio::test]
    async fn add_schema_rejects_invalid_json() {
        let validator = SchemaValidator::new();
        let err = validator
            .add_schema("mem://bad", b"not json")
            .await
            .unwrap_err();
        assert!(matches!(err, CompileError::Json(_)));
    }

    /// A relative `$ref` resolves against `schemaValidator.defaultBaseURI`
    /// and is fetched (single-flighted) before the compiler runs.
    #[tokio::test]
    async fn add_schema_resolves_relative_ref_against_default_base_uri() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/schemas/address.json"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(json!({"type": "string"})))
            .mount(&server)
            .await;

        let validator = SchemaValidator::with_base_uri(&format!("{}/schemas/", server.uri())).unwrap();
        let schema = json!({
            "type": "object",
            "properties": { "addr": { "$ref": "address.json" } }
        });
        validator
            .add_schema("mem://order.v2", schema.to_string().as_bytes())
            .await
            .unwrap();

        let ok = validator
            .validate("mem://order.v2", &json!({"addr": "123 Main St"}))
            .unwrap();
        assert!(ok.valid);

        let bad = validator
            .validate("mem://order.v2", &json!({"addr": 5}))
            .unwrap();
        assert!(!bad.valid);
    }
}
