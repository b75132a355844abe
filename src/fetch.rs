use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use rand::Rng;
use serde_json::Value;

use crate::error::FetchError;

const MAX_ATTEMPTS: u8 = 4;
const BASE_DELAY_MS: u64 = 50;
const MAX_DELAY_MS: u64 = 5_000;

type FetchFuture = Shared<BoxFuture<'static, Result<Value, FetchError>>>;

/// Fetches remote `$ref` schema documents over HTTPS, coalescing concurrent
/// requests for the same URL into a single in-flight request so that a burst
/// of records referencing the same not-yet-cached schema triggers one GET,
/// not N.
pub struct RemoteFetcher {
    client: reqwest::Client,
    inflight: DashMap<String, FetchFuture>,
}

impl RemoteFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .use_rustls_tls()
            .build()
            .expect("static reqwest client configuration is valid");

        Self {
            client,
            inflight: DashMap::new(),
        }
    }

    /// Fetch and parse `uri`, single-flighting concurrent calls for the same
    /// URI. The winner performs the request; every caller (winner included)
    /// awaits the same shared future and gets the same result.
    pub async fn fetch(&self, uri: &str) -> Result<Value, FetchError> {
        if let Some(existing) = self.inflight.get(uri) {
            return existing.value().clone().await;
        }

        let client = self.client.clone();
        let owned_uri = uri.to_string();
        let fut: FetchFuture = async move { Self::fetch_with_retry(&client, &owned_uri).await }
            .boxed()
            .shared();

        let fut = match self.inflight.entry(uri.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(e) => e.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(fut.clone());
                fut
            }
        };

        let result = fut.await;
        self.inflight.remove(uri);
        result
    }

    async fn fetch_with_retry(client: &reqwest::Client, uri: &str) -> Result<Value, FetchError> {
        let mut last_err = None;

        for attempt in 0..MAX_ATTEMPTS {
            match Self::fetch_once(client, uri).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < MAX_ATTEMPTS {
                        let base = BASE_DELAY_MS * 2_u64.pow(attempt as u32);
                        let jitter = rand::thread_rng().gen_range(0..=base / 2);
                        let delay = (base + jitter).min(MAX_DELAY_MS);
                        tracing::debug!(uri, attempt, delay_ms = delay, "retrying schema fetch");
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                }
            }
        }

        Err(last_err.expect("loop runs at least once"))
    }

    async fn fetch_once(client: &reqwest::Client, uri: &str) -> Result<Value, FetchError> {
        let resp = client.get(uri).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                uri: uri.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| FetchError::InvalidJson(e.to_string()))
    }
}

impl Default for RemoteFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk a schema document, single-flight-fetching every `$ref` it finds
/// (recursively, into the fetched documents too) that resolves to an
/// `http(s)` URL, and populate `cache` with each resolved document keyed
/// by that URL. `jsonschema`'s resolver trait is synchronous, so every
/// reference a compile pass might need has to already be in `cache` by the
/// time `compile` runs.
///
/// A `$ref` with no scheme (e.g. `"order-address.json"`) is resolved
/// against `base_uri` — the compiler's configured `schemaValidator.
/// defaultBaseURI` — before fetching; a pure-fragment ref (`"#/defs/x"`)
/// stays local and is left for the compiler's own same-document resolution.
pub async fn prefetch_refs(
    fetcher: &RemoteFetcher,
    doc: &Value,
    cache: &DashMap<String, Arc<Value>>,
    base_uri: Option<&url::Url>,
) -> Result<(), FetchError> {
    let mut seen = std::collections::HashSet::new();
    let mut frontier: Vec<Value> = vec![doc.clone()];

    while let Some(node) = frontier.pop() {
        for raw_ref in find_ref_uris(&node) {
            let Some(uri) = resolve_ref(&raw_ref, base_uri) else {
                continue;
            };
            if !seen.insert(uri.clone()) || cache.contains_key(&uri) {
                continue;
            }
            let fetched = fetcher.fetch(&uri).await?;
            frontier.push(fetched.clone());
            cache.insert(uri, Arc::new(fetched));
        }
    }

    Ok(())
}

/// Resolve a raw `$ref` string to a fetchable absolute `http(s)` URL, or
/// `None` if it's a local fragment-only ref or can't be resolved without a
/// base URI that wasn't configured.
fn resolve_ref(raw_ref: &str, base_uri: Option<&url::Url>) -> Option<String> {
    let without_fragment = raw_ref.split('#').next().unwrap_or(raw_ref);
    if without_fragment.is_empty() {
        return None;
    }
    if without_fragment.starts_with("http://") || without_fragment.starts_with("https://") {
        return Some(without_fragment.to_string());
    }
    let base = base_uri?;
    let joined = base.join(without_fragment).ok()?;
    if joined.scheme() == "http" || joined.scheme() == "https" {
        Some(joined.to_string())
    } else {
        None
    }
}

fn find_ref_uris(node: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_ref_uris(node, &mut out);
    out
}

fn collect_ref_uris(node: &Value, out: &mut Vec<String>) {
    match node {
        Value::Object(map) => {
            if let Some(Value::String(r)) = map.get("$ref") {
                out.push(r.clone());
            }
            for v in map.values() {
                collect_ref_uris(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_ref_uris(v, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Testable property 7: N concurrent `fetch` calls for the same URI
    /// issue exactly one HTTP GET; every caller gets the same body.
    #[tokio::test]
    async fn concurrent_fetches_of_same_uri_single_flight() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/schemas/shared.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"type": "string"})))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = Arc::new(RemoteFetcher::new());
        let uri = format!("{}/schemas/shared.json", server.uri());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let fetcher = fetcher.clone();
            let uri = uri.clone();
            handles.push(tokio::spawn(async move { fetcher.fetch(&uri).await }));
        }

        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result, serde_json::json!({"type": "string"}));
        }

        // `expect(1)` above is checked on drop; an explicit verify here
        // makes the failure message point at this test instead of teardown.
        server.verify().await;
    }

    #[tokio::test]
    async fn non_2xx_response_maps_to_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/schemas/missing.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = RemoteFetcher::new();
        let uri = format!("{}/schemas/missing.json", server.uri());
        let err = fetcher.fetch(&uri).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
    }

    #[test]
    fn resolve_ref_leaves_absolute_http_refs_untouched() {
        let resolved = resolve_ref("https://schemas.example/order.json#/defs/x", None);
        assert_eq!(resolved.as_deref(), Some("https://schemas.example/order.json"));
    }

    #[test]
    fn resolve_ref_joins_relative_refs_against_base_uri() {
        let base = url::Url::parse("https://schemas.example/v1/").unwrap();
        let resolved = resolve_ref("order-address.json", Some(&base));
        assert_eq!(
            resolved.as_deref(),
            Some("https://schemas.example/v1/order-address.json")
        );
    }

    #[test]
    fn resolve_ref_without_base_uri_is_unresolvable() {
        assert_eq!(resolve_ref("order-address.json", None), None);
    }

    #[test]
    fn resolve_ref_pure_fragment_is_local() {
        assert_eq!(resolve_ref("#/defs/x", None), None);
    }
}
