//! HTTP API client with batched, cached GETs
//!
//! [`HttpApi`] is created once per logical request. Every GET goes through a
//! [`DataLoader`] keyed by the fully built path, so concurrent reads of the
//! same path collapse into one request and repeated reads are served from
//! cache. Mutations go straight to the transport.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::dataloaders::{BatchLoader, DataLoader};
use crate::http_error::JsonApiError;
use crate::pagination::{connection_from_slice, to_connection, Connection, ConnectionArgs};
use crate::path::{absolute_url, build_path, Args};
use crate::transport::{HttpMethod, Transport};
use crate::{ApiError, Result};

/// Keys per request for chunked loaders; sized for UUID keys
pub const DEFAULT_NUM_KEYS_PER_CHUNK: usize = 25;

/// HTTP API configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpApiConfig {
    /// Origin used for requests, e.g. `https://gateway`
    pub origin: String,
    /// Path prefix of every endpoint, e.g. `/v1`
    pub api_base: String,
    /// Origin for URLs handed to clients; falls back to `origin`
    pub external_origin: String,
    /// Keys per request for chunked loaders
    pub num_keys_per_chunk: usize,
    /// Coalescing window for batched GETs, in milliseconds
    pub batch_delay_ms: u64,
}

impl Default for HttpApiConfig {
    fn default() -> Self {
        Self {
            origin: String::new(),
            api_base: String::new(),
            external_origin: String::new(),
            num_keys_per_chunk: DEFAULT_NUM_KEYS_PER_CHUNK,
            batch_delay_ms: 1,
        }
    }
}

impl HttpApiConfig {
    pub fn new(origin: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            api_base: api_base.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_external_origin(mut self, origin: impl Into<String>) -> Self {
        self.external_origin = origin.into();
        self
    }

    #[must_use]
    pub fn with_num_keys_per_chunk(mut self, num_keys: usize) -> Self {
        self.num_keys_per_chunk = num_keys;
        self
    }

    #[must_use]
    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    fn external_origin(&self) -> &str {
        if self.external_origin.is_empty() {
            &self.origin
        } else {
            &self.external_origin
        }
    }
}

/// Outcome of a validation endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<JsonApiError>,
}

/// Transport plus URL building, shared by the API and its loaders
pub(crate) struct RestClient {
    transport: Arc<dyn Transport>,
    config: HttpApiConfig,
}

impl RestClient {
    fn url(&self, path: &str) -> String {
        absolute_url(&self.config.origin, &self.config.api_base, path)
    }

    async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        data: Option<&Value>,
    ) -> Result<Option<Value>> {
        let url = self.url(path);
        debug!(%method, %url, "REST request");
        self.transport.request(method, &url, data).await
    }
}

/// The `data` member of a response body; bodies without one are returned whole
pub(crate) fn response_data(body: Option<Value>) -> Option<Value> {
    match body? {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").filter(|data| !data.is_null())
        }
        Value::Null => None,
        other => Some(other),
    }
}

/// Loads full response bodies by path, one GET per path
pub struct PathLoader {
    client: Arc<RestClient>,
}

#[async_trait]
impl BatchLoader<String, Option<Value>> for PathLoader {
    async fn load_batch(&self, paths: &[String]) -> HashMap<String, Result<Option<Value>>> {
        // Don't fail the entire batch on a single failed request.
        let requests = paths.iter().map(|path| async move {
            let result = self.client.request(HttpMethod::Get, path, None).await;
            if let Err(err) = &result {
                warn!(%path, error = %err, "GET failed");
            }
            (path.clone(), result)
        });

        join_all(requests).await.into_iter().collect()
    }
}

type PathFn = Box<dyn Fn(&[String]) -> String + Send + Sync>;
type KeyFn = Box<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// Loads lists of items for many keys with one chunked list request
///
/// Items in the combined response are assigned back to the key returned by
/// `get_key`; keys without matches resolve to an empty list.
pub struct KeyedListLoader {
    client: Arc<RestClient>,
    get_path: PathFn,
    get_key: KeyFn,
    chunk_size: usize,
}

impl KeyedListLoader {
    async fn fetch_chunk(&self, keys: &[String]) -> Result<Vec<Value>> {
        let path = (self.get_path)(keys);
        let body = self.client.request(HttpMethod::Get, &path, None).await?;

        match response_data(body) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(ApiError::UnexpectedShape(format!(
                "expected `GET {}` to return a list, got {}",
                path,
                json_type(&other)
            ))),
        }
    }
}

#[async_trait]
impl BatchLoader<String, Vec<Value>> for KeyedListLoader {
    async fn load_batch(&self, keys: &[String]) -> HashMap<String, Result<Vec<Value>>> {
        let chunks: Vec<&[String]> = keys.chunks(self.chunk_size.max(1)).collect();
        debug!(keys = keys.len(), chunks = chunks.len(), "loading keyed lists");

        let responses = join_all(
            chunks
                .into_iter()
                .map(|chunk| async move { (chunk, self.fetch_chunk(chunk).await) }),
        )
        .await;

        let mut by_key: HashMap<String, Result<Vec<Value>>> =
            keys.iter().map(|key| (key.clone(), Ok(Vec::new()))).collect();
        let mut items = Vec::new();

        for (chunk, response) in responses {
            match response {
                Ok(chunk_items) => items.extend(chunk_items),
                Err(err) => {
                    warn!(keys = chunk.len(), error = %err, "chunk request failed");
                    for key in chunk {
                        by_key.insert(key.clone(), Err(err.clone()));
                    }
                }
            }
        }

        for item in items {
            let Some(key) = (self.get_key)(&item) else {
                continue;
            };
            if let Some(Ok(bucket)) = by_key.get_mut(&key) {
                bucket.push(item);
            }
        }

        by_key
    }
}

/// Loader created by [`HttpApi::create_arg_loader`]
pub type ArgLoader = DataLoader<String, Vec<Value>, KeyedListLoader>;

/// An HTTP request helper oriented towards well structured REST endpoints,
/// with batching and caching of GETs.
pub struct HttpApi {
    client: Arc<RestClient>,
    loader: DataLoader<String, Option<Value>, PathLoader>,
}

impl HttpApi {
    pub fn new(config: HttpApiConfig, transport: Arc<dyn Transport>) -> Self {
        let delay = config.batch_delay();
        let client = Arc::new(RestClient { transport, config });
        let loader = DataLoader::new(PathLoader {
            client: Arc::clone(&client),
        })
        .with_delay(delay);

        Self { client, loader }
    }

    pub fn config(&self) -> &HttpApiConfig {
        &self.client.config
    }

    /// Raw response body for `path`, batched and cached
    pub async fn get_body(&self, path: &str, args: &Args) -> Result<Option<Value>> {
        self.loader.load(self.make_path(path, args)).await
    }

    /// GET a resource, returning the response `data`
    ///
    /// `None` for 204/404 or a null `data` member.
    pub async fn get(&self, path: &str, args: &Args) -> Result<Option<Value>> {
        Ok(response_data(self.get_body(path, args).await?))
    }

    /// Fetch one page from a cursor-paginated endpoint
    ///
    /// Arguments are validated before any request is made.
    pub async fn get_paginated_connection(
        &self,
        path: &str,
        args: &ConnectionArgs,
        filters: &Args,
    ) -> Result<Option<Connection<Value>>> {
        args.validate()?;
        let body = self
            .get_body(path, &filters.merged(&args.query_args()))
            .await?;
        to_connection(body, args)
    }

    /// Fetch a complete list and slice it into a connection
    pub async fn get_unpaginated_connection(
        &self,
        path: &str,
        args: &ConnectionArgs,
        filters: &Args,
    ) -> Result<Option<Connection<Value>>> {
        if args.before.is_some() || args.last.is_some() {
            return Err(ApiError::InvalidArgument(
                "unpaginated connections only support `first` and `after`".to_string(),
            ));
        }
        args.validate()?;

        match self.get(path, filters).await? {
            None => Ok(None),
            Some(Value::Array(items)) => connection_from_slice(items, args).map(Some),
            Some(other) => Err(ApiError::UnexpectedShape(format!(
                "expected `GET` to return a list of items, got {} instead",
                json_type(&other)
            ))),
        }
    }

    /// GET a validation endpoint; 422 and 409 responses become an invalid result
    pub async fn get_validation_result(&self, path: &str, args: &Args) -> Result<ValidationResult> {
        match self.get(path, args).await {
            Ok(_) => Ok(ValidationResult {
                valid: true,
                errors: Vec::new(),
            }),
            Err(ApiError::Http(err)) if err.status == 422 || err.status == 409 => {
                Ok(ValidationResult {
                    valid: false,
                    errors: err.errors,
                })
            }
            Err(err) => Err(err),
        }
    }

    pub async fn post(&self, path: &str, data: Option<&Value>) -> Result<Option<Value>> {
        self.mutate(HttpMethod::Post, path, data).await
    }

    pub async fn put(&self, path: &str, data: Option<&Value>) -> Result<Option<Value>> {
        self.mutate(HttpMethod::Put, path, data).await
    }

    pub async fn patch(&self, path: &str, data: Option<&Value>) -> Result<Option<Value>> {
        self.mutate(HttpMethod::Patch, path, data).await
    }

    pub async fn delete(&self, path: &str) -> Result<Option<Value>> {
        self.mutate(HttpMethod::Delete, path, None).await
    }

    async fn mutate(
        &self,
        method: HttpMethod,
        path: &str,
        data: Option<&Value>,
    ) -> Result<Option<Value>> {
        let body = self.client.request(method, path, data).await?;
        Ok(response_data(body))
    }

    pub fn make_path(&self, path: &str, args: &Args) -> String {
        build_path(path, args)
    }

    /// Create a loader batching lookups on one query parameter
    ///
    /// ```rust,ignore
    /// let by_salad = api.create_arg_loader("dressings", "saladId");
    /// let (a, b) = tokio::join!(by_salad.load("1".into()), by_salad.load("2".into()));
    /// // GET /dressings?saladId=1,2
    /// ```
    pub fn create_arg_loader(&self, path: &str, key: &str) -> ArgLoader {
        let path = path.to_string();
        let param = key.to_string();
        let field = key.to_string();

        self.create_loader(
            move |keys| build_path(&path, &Args::new().with(param.as_str(), keys)),
            move |item| match item.get(&field)? {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            },
        )
    }

    /// Create a data loader that makes chunked list requests
    pub fn create_loader<P, K>(&self, get_path: P, get_key: K) -> ArgLoader
    where
        P: Fn(&[String]) -> String + Send + Sync + 'static,
        K: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        DataLoader::new(KeyedListLoader {
            client: Arc::clone(&self.client),
            get_path: Box::new(get_path),
            get_key: Box::new(get_key),
            chunk_size: self.client.config.num_keys_per_chunk,
        })
        .with_delay(self.client.config.batch_delay())
    }

    /// Absolute URL for requests
    pub fn get_url(&self, path: &str, args: &Args) -> String {
        self.client.url(&self.make_path(path, args))
    }

    /// Absolute URL on the external origin, for links handed to clients
    pub fn get_external_url(&self, path: &str, args: &Args) -> String {
        let config = &self.client.config;
        absolute_url(
            config.external_origin(),
            &config.api_base,
            &self.make_path(path, args),
        )
    }
}

impl fmt::Debug for HttpApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpApi")
            .field("config", &self.client.config)
            .finish_non_exhaustive()
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_api, MockResponse, MockTransport};
    use serde_json::json;

    #[test]
    fn test_make_path() {
        let api = test_api(MockTransport::new());
        assert_eq!(
            api.make_path("foo/1?bar=1", &Args::new().with("baz", "quz")),
            "foo/1?bar=1&baz=quz"
        );
    }

    #[test]
    fn test_urls() {
        let api = test_api(MockTransport::new());
        assert_eq!(
            api.get_url("foo/1", &Args::new().with("bar", 1)),
            "https://gateway/v1/foo/1?bar=1"
        );
        assert_eq!(
            api.get_external_url("foo/1", &Args::new().with("bar", 1)),
            "https://example.com/v1/foo/1?bar=1"
        );
    }

    #[test]
    fn test_config_defaults() {
        let config: HttpApiConfig =
            serde_json::from_value(json!({"origin": "https://gateway"})).unwrap();
        assert_eq!(config.num_keys_per_chunk, 25);
        assert_eq!(config.batch_delay(), Duration::from_millis(1));
        assert_eq!(config.external_origin(), "https://gateway");
    }

    #[tokio::test]
    async fn test_caches_gets() {
        let transport = MockTransport::new();
        transport.on_get("https://gateway/v1/foo/1", json!({"data": {"id": 1}}));
        let api = test_api(transport.clone());

        let args = Args::new();
        let (a, b, c) = tokio::join!(
            api.get("foo/1", &args),
            api.get("foo/1", &args),
            api.get("foo/1", &args),
        );
        for result in [a, b, c] {
            assert_eq!(result.unwrap(), Some(json!({"id": 1})));
        }

        // Served from cache afterwards
        api.get("foo/1", &Args::new()).await.unwrap();
        assert_eq!(transport.call_count("https://gateway/v1/foo/1"), 1);
    }

    #[tokio::test]
    async fn test_arg_order_shares_cache_entry() {
        let transport = MockTransport::new();
        transport.on_get("https://gateway/v1/foo?a=1&b=2", json!({"data": []}));
        let api = test_api(transport.clone());

        api.get("foo", &Args::new().with("a", 1).with("b", 2)).await.unwrap();
        api.get("foo", &Args::new().with("b", 2).with("a", 1)).await.unwrap();
        api.get("foo?b=2", &Args::new().with("a", 1)).await.unwrap();

        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_rethrows_get_errors() {
        let transport = MockTransport::new();
        transport.on(
            HttpMethod::Get,
            "https://gateway/v1/foo/1",
            MockResponse::Status(409, json!({})),
        );
        let api = test_api(transport.clone());

        let err = api.get("foo/1", &Args::new()).await.unwrap_err();
        assert_eq!(err.status(), Some(409));

        // Not cached: the next call asks again
        tokio_test::assert_err!(api.get("foo/1", &Args::new()).await);
        assert_eq!(transport.call_count("https://gateway/v1/foo/1"), 2);
    }

    #[tokio::test]
    async fn test_partial_failure_isolation() {
        let transport = MockTransport::new();
        transport.on(
            HttpMethod::Get,
            "https://gateway/v1/bad",
            MockResponse::Status(500, json!("boom")),
        );
        transport.on_get("https://gateway/v1/good", json!({"data": {"ok": true}}));
        let api = test_api(transport);

        let args = Args::new();
        let (bad, good) = tokio::join!(api.get("bad", &args), api.get("good", &args));
        tokio_test::assert_err!(bad);
        assert_eq!(good.unwrap(), Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn test_not_found_is_none() {
        let api = test_api(MockTransport::new());
        assert_eq!(api.get("missing", &Args::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_arg_loader_demultiplexes() {
        let transport = MockTransport::new();
        transport.on_get(
            "https://gateway/v1/dressings?saladId=1,2",
            json!({"data": [{"saladId": "1"}, {"saladId": "1"}]}),
        );
        let api = test_api(transport.clone());
        let loader = api.create_arg_loader("dressings", "saladId");

        let (a, again, b) = tokio::join!(
            loader.load("1".to_string()),
            loader.load("1".to_string()),
            loader.load("2".to_string()),
        );

        let expected = vec![json!({"saladId": "1"}), json!({"saladId": "1"})];
        assert_eq!(a.unwrap(), expected);
        assert_eq!(again.unwrap(), expected);
        assert_eq!(b.unwrap(), Vec::<Value>::new());
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_arg_loader_empty_set() {
        let transport = MockTransport::new();
        transport.on_get("https://gateway/v1/dressings?saladId=1", json!({"data": null}));
        let api = test_api(transport);
        let loader = api.create_arg_loader("dressings", "saladId");

        assert_eq!(loader.load("1".to_string()).await.unwrap(), Vec::<Value>::new());
    }

    #[tokio::test]
    async fn test_arg_loader_chunks_requests() {
        let transport = MockTransport::new();
        let api = test_api(transport.clone());
        let chunk_size = api.config().num_keys_per_chunk;

        let keys: Vec<String> = (0..chunk_size + 5).map(|i| i.to_string()).collect();
        let (first, second) = keys.split_at(chunk_size);
        for chunk in [first, second] {
            let data: Vec<Value> = chunk.iter().map(|k| json!({"saladId": k})).collect();
            transport.on_get(
                &format!("https://gateway/v1/dressings?saladId={}", chunk.join(",")),
                json!({"data": data}),
            );
        }

        let loader = api.create_arg_loader("dressings", "saladId");
        let results = loader.load_many(keys.clone()).await;

        for (key, result) in keys.iter().zip(results) {
            assert_eq!(result.unwrap(), vec![json!({"saladId": key})]);
        }
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_arg_loader_failed_chunk_is_isolated() {
        let transport = MockTransport::new();
        let api = test_api(transport.clone());
        let loader = DataLoader::new(KeyedListLoader {
            client: Arc::clone(&api.client),
            get_path: Box::new(|keys| build_path("dressings", &Args::new().with("saladId", keys))),
            get_key: Box::new(|item| item.get("saladId")?.as_str().map(str::to_string)),
            chunk_size: 1,
        });

        transport.on(
            HttpMethod::Get,
            "https://gateway/v1/dressings?saladId=1",
            MockResponse::Status(503, json!("down")),
        );
        transport.on_get(
            "https://gateway/v1/dressings?saladId=2",
            json!({"data": [{"saladId": "2"}]}),
        );

        let results = loader.load_many(vec!["1".to_string(), "2".to_string()]).await;
        assert_eq!(results[0].as_ref().unwrap_err().status(), Some(503));
        assert_eq!(results[1].as_ref().unwrap(), &vec![json!({"saladId": "2"})]);
    }

    #[tokio::test]
    async fn test_paginated_connection_request() {
        let transport = MockTransport::new();
        transport.on_get(
            "https://gateway/v1/salads?cursor=1&limit=2&pageSize=2&spicy=true",
            json!({
                "data": [{"spicy": true}, {"spicy": true}],
                "meta": {"cursors": ["1", "2"], "hasNextPage": true}
            }),
        );
        let api = test_api(transport.clone());

        let conn = api
            .get_paginated_connection(
                "salads",
                &ConnectionArgs::forward(Some(2), Some("1".into())),
                &Args::new().with("spicy", true),
            )
            .await
            .unwrap()
            .unwrap();

        assert!(conn.page_info.has_previous_page);
        assert_eq!(conn.edges.len(), 2);
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_args_issue_no_request() {
        let transport = MockTransport::new();
        let api = test_api(transport.clone());

        let args = ConnectionArgs {
            after: Some("x".into()),
            before: Some("y".into()),
            ..Default::default()
        };
        let err = api
            .get_paginated_connection("salads", &args, &Args::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::InvalidArgument(_)));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unpaginated_connection() {
        let transport = MockTransport::new();
        transport.on_get(
            "https://gateway/v1/salads",
            json!({"data": [{"id": 1}, {"id": 2}, {"id": 3}]}),
        );
        let api = test_api(transport);

        let conn = api
            .get_unpaginated_connection("salads", &ConnectionArgs::forward(Some(2), None), &Args::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(conn.edges.len(), 2);
        assert!(conn.page_info.has_next_page);
        assert_eq!(conn.meta, json!({}));
    }

    #[tokio::test]
    async fn test_unpaginated_connection_requires_list() {
        let transport = MockTransport::new();
        transport.on_get("https://gateway/v1/salad", json!({"data": {"id": 1}}));
        let api = test_api(transport);

        let err = api
            .get_unpaginated_connection("salad", &ConnectionArgs::default(), &Args::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UnexpectedShape(_)));
    }

    #[tokio::test]
    async fn test_validation_result() {
        let transport = MockTransport::new();
        transport.on(
            HttpMethod::Get,
            "https://gateway/v1/validate?name=x",
            MockResponse::Status(422, json!({"errors": [{"code": "invalid", "detail": "bad name"}]})),
        );
        transport.on_get("https://gateway/v1/validate?name=y", json!({"data": null}));
        let api = test_api(transport);

        let invalid = api
            .get_validation_result("validate", &Args::new().with("name", "x"))
            .await
            .unwrap();
        assert!(!invalid.valid);
        assert_eq!(invalid.errors[0].detail.as_deref(), Some("bad name"));

        let valid = api
            .get_validation_result("validate", &Args::new().with("name", "y"))
            .await
            .unwrap();
        assert!(valid.valid);
    }

    #[tokio::test]
    async fn test_mutations_are_not_cached() {
        let transport = MockTransport::new();
        transport.on(
            HttpMethod::Post,
            "https://gateway/v1/salads",
            MockResponse::Json(json!({"data": {"id": 1}})),
        );
        let api = test_api(transport.clone());

        let body = json!({"spicy": true});
        api.post("salads", Some(&body)).await.unwrap();
        let created = api.post("salads", Some(&body)).await.unwrap();

        assert_eq!(created, Some(json!({"id": 1})));
        assert_eq!(transport.call_count("https://gateway/v1/salads"), 2);
        assert_eq!(transport.calls()[0].data, Some(body));
    }
}
