use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RegistryError, Result};
use crate::repository::{schema_key, Repository};
use crate::semver::Semver;

pub struct AppState {
    pub repository: Arc<dyn Repository>,
}

/// Accepts either `{"schema": <raw>}` or `{"content": <raw>}` — the original
/// registry's two observed body shapes (`content` on the write path,
/// `schema` on the read response) collapsed into one request type.
#[derive(Deserialize)]
pub struct SchemaBody {
    #[serde(alias = "content")]
    pub schema: Value,
}

#[derive(Serialize)]
pub struct SchemaResponse {
    pub name: String,
    pub version: String,
    pub schema: Value,
}

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn create_schema(
    State(state): State<Arc<AppState>>,
    Path((name, version)): Path<(String, String)>,
    Json(body): Json<SchemaBody>,
) -> Result<StatusCode> {
    let version: Semver = version
        .parse()
        .map_err(|e| RegistryError::InvalidJson(format!("invalid version: {e}")))?;

    jsonschema::JSONSchema::compile(&body.schema)
        .map_err(|e| RegistryError::DoesNotCompile(e.to_string()))?;

    let key = schema_key(&name, &version);
    state.repository.set(&key, &body.schema.to_string()).await?;

    Ok(StatusCode::CREATED)
}

pub async fn get_schema(
    State(state): State<Arc<AppState>>,
    Path((name, version)): Path<(String, String)>,
) -> Result<Json<SchemaResponse>> {
    let version: Semver = version
        .parse()
        .map_err(|e| RegistryError::InvalidJson(format!("invalid version: {e}")))?;

    let key = schema_key(&name, &version);
    let raw = state
        .repository
        .get(&key)
        .await?
        .ok_or_else(|| RegistryError::NotFound(key.clone()))?;

    let schema: Value = serde_json::from_str(&raw).map_err(|e| RegistryError::InvalidJson(e.to_string()))?;

    Ok(Json(SchemaResponse {
        name,
        version: version.to_string(),
        schema,
    }))
}

pub async fn delete_schema(
    State(state): State<Arc<AppState>>,
    Path((name, version)): Path<(String, String)>,
) -> Result<StatusCode> {
    let version: Semver = version
        .parse()
        .map_err(|e| RegistryError::InvalidJson(format!("invalid version: {e}")))?;

    let key = schema_key(&name, &version);
    state.repository.del(&key).await?;

    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::Mutex as TokioMutex;

    struct InMemoryRepository {
        store: TokioMutex<HashMap<String, String>>,
    }

    impl InMemoryRepository {
        fn new() -> Self {
            Self {
                store: TokioMutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl Repository for InMemoryRepository {
        async fn set(&self, key: &str, value: &str) -> std::result::Result<(), redis::RedisError> {
            self.store.lock().await.insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn get(&self, key: &str) -> std::result::Result<Option<String>, redis::RedisError> {
            Ok(self.store.lock().await.get(key).cloned())
        }

        async fn del(&self, key: &str) -> std::result::Result<(), redis::RedisError> {
            self.store.lock().await.remove(key);
            Ok(())
        }
    }

    fn state() -> Arc<AppState> {
        Arc::new(AppState {
            repository: Arc::new(InMemoryRepository::new()),
        })
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let state = state();
        let schema = serde_json::json!({"type": "object"});

        create_schema(
            State(state.clone()),
            Path(("order".to_string(), "1.0.0".to_string())),
            Json(SchemaBody { schema: schema.clone() }),
        )
        .await
        .unwrap();

        let Json(response) = get_schema(
            State(state.clone()),
            Path(("order".to_string(), "1.0.0".to_string())),
        )
        .await
        .unwrap();

        assert_eq!(response.name, "order");
        assert_eq!(response.schema, schema);
    }

    #[tokio::test]
    async fn create_rejects_schema_that_does_not_compile() {
        let state = state();
        let not_a_schema = serde_json::json!({"type": "not-a-real-type"});

        let err = create_schema(
            State(state),
            Path(("order".to_string(), "1.0.0".to_string())),
            Json(SchemaBody { schema: not_a_schema }),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RegistryError::DoesNotCompile(_)));
    }

    #[tokio::test]
    async fn get_missing_schema_is_not_found() {
        let state = state();
        let err = get_schema(
            State(state),
            Path(("missing".to_string(), "1.0.0".to_string())),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let state = state();
        let schema = serde_json::json!({"type": "object"});
        create_schema(
            State(state.clone()),
            Path(("order".to_string(), "1.0.0".to_string())),
            Json(SchemaBody { schema }),
        )
        .await
        .unwrap();

        delete_schema(
            State(state.clone()),
            Path(("order".to_string(), "1.0.0".to_string())),
        )
        .await
        .unwrap();

        let err = get_schema(
            State(state),
            Path(("order".to_string(), "1.0.0".to_string())),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }
}
