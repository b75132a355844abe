use thiserror::Error;

/// Errors raised while compiling and registering a schema with `AddSchema`.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("schema body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema failed to compile: {0}")]
    Compile(String),

    #[error("fetching referenced schema {uri} failed: {source}")]
    Fetch {
        uri: String,
        #[source]
        source: FetchError,
    },
}

/// Errors raised while fetching a remote `$ref` over HTTP.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("request error: {0}")]
    Request(String),

    #[error("server returned non-2xx status {status} for {uri}")]
    Status { uri: String, status: u16 },

    #[error("response body was not valid JSON: {0}")]
    InvalidJson(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Request(e.to_string())
    }
}

/// The classification `Validate` callers (the partition worker in
/// particular) use to decide whether a failure is retriable or an internal
/// bug that should escalate rather than be swallowed per-record. A
/// non-conforming payload is not an error here — `validate` reports that as
/// `Ok(ValidationResult { valid: false, .. })` instead, since the schema
/// applied correctly and the payload's non-conformance is exactly what the
/// caller asked to find out.
#[derive(Error, Debug, Clone)]
pub enum ValidateError {
    /// The schema named by `schemaURI` isn't registered and/or one of its
    /// `$ref`s could not be fetched. Retriable: the caller may re-attempt
    /// once the registry/network issue clears.
    #[error("schema {0} is unavailable: {1}")]
    SchemaUnavailable(String, FetchError),

    /// The compiler itself errored in a way unrelated to the payload or
    /// fetch (e.g. a poisoned lock, a panic caught at the boundary). Escalate.
    #[error("internal compiler error for schema {0}: {1}")]
    InternalCompilerError(String, String),
}
