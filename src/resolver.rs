use std::sync::Arc;

use dashmap::DashMap;
use jsonschema::{SchemaResolver, SchemaResolverError};
use serde_json::Value;
use url::Url;

/// A `jsonschema::SchemaResolver` backed by a plain map of already-fetched
/// documents. Resolution itself is synchronous (the trait requires it); all
/// the actual network work happens ahead of time in `fetch::prefetch_refs`,
/// so by the time the compiler calls `resolve` the answer is already local.
pub struct CachingResolver {
    cache: Arc<DashMap<String, Arc<Value>>>,
}

impl CachingResolver {
    pub fn new(cache: Arc<DashMap<String, Arc<Value>>>) -> Self {
        Self { cache }
    }
}

impl SchemaResolver for CachingResolver {
    fn resolve(
        &self,
        _root_schema: &Value,
        url: &Url,
        _original_reference: &str,
    ) -> Result<Arc<Value>, SchemaResolverError> {
        let key = {
            let mut u = url.clone();
            u.set_fragment(None);
            u.to_string()
        };
        self.cache
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| anyhow::anyhow!("schema {key} was not prefetched").into())
    }
}
