//! Test doubles

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::api::{HttpApi, HttpApiConfig};
use crate::http_error::HttpError;
use crate::transport::{HttpMethod, Transport};
use crate::Result;

#[derive(Debug, Clone)]
pub(crate) enum MockResponse {
    Json(Value),
    NoContent,
    Status(u16, Value),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Call {
    pub method: HttpMethod,
    pub url: String,
    pub data: Option<Value>,
}

/// Records every request and answers from canned routes.
///
/// Unknown GET routes answer like a 404 (no content); unknown mutations fail.
#[derive(Default)]
pub(crate) struct MockTransport {
    routes: Mutex<HashMap<(HttpMethod, String), MockResponse>>,
    calls: Mutex<Vec<Call>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, method: HttpMethod, url: &str, response: MockResponse) {
        self.routes
            .lock()
            .unwrap()
            .insert((method, url.to_string()), response);
    }

    pub fn on_get(&self, url: &str, body: Value) {
        self.on(HttpMethod::Get, url, MockResponse::Json(body));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls().iter().filter(|c| c.url == url).count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        data: Option<&Value>,
    ) -> Result<Option<Value>> {
        self.calls.lock().unwrap().push(Call {
            method,
            url: url.to_string(),
            data: data.cloned(),
        });

        let response = self
            .routes
            .lock()
            .unwrap()
            .get(&(method, url.to_string()))
            .cloned();

        match response {
            Some(MockResponse::Json(body)) => Ok(Some(body)),
            Some(MockResponse::NoContent) => Ok(None),
            Some(MockResponse::Status(status, body)) => {
                Err(HttpError::new(status, body.to_string()).into())
            }
            None if method == HttpMethod::Get => Ok(None),
            None => Err(HttpError::new(404, "").into()),
        }
    }
}

pub(crate) fn test_config() -> HttpApiConfig {
    HttpApiConfig::new("https://gateway", "/v1").with_external_origin("https://example.com")
}

pub(crate) fn test_api(transport: Arc<MockTransport>) -> HttpApi {
    HttpApi::new(test_config(), transport)
}
