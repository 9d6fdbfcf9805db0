//! HTTP transport abstraction
//!
//! The loader only needs `request(method, url, data) -> json | null`.
//! [`ReqwestTransport`] is the production implementation.

use std::fmt;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::debug;

use crate::http_error::HttpError;
use crate::{ApiError, Result};

/// HTTP verbs used against REST resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Issues a single HTTP request and returns the decoded JSON body
///
/// `Ok(None)` means "no content": a 204, or a 404 answering a GET.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        data: Option<&Value>,
    ) -> Result<Option<Value>>;
}

/// [`Transport`] backed by `reqwest`
///
/// Request bodies are wrapped as `{"data": ...}`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    headers: HeaderMap,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        Self { client, headers }
    }

    /// Add a header sent with every request
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add a bearer token header
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl AsRef<str>) -> Self {
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token.as_ref())) {
            self.headers.insert(AUTHORIZATION, value);
        }
        self
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        data: Option<&Value>,
    ) -> Result<Option<Value>> {
        debug!(%method, url, "sending request");

        let mut request = self
            .client
            .request(method.into(), url)
            .headers(self.headers.clone());
        if let Some(data) = data {
            request = request.json(&json!({ "data": data }));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let status = response.status();

        if status == StatusCode::NO_CONTENT
            || (status == StatusCode::NOT_FOUND && method == HttpMethod::Get)
        {
            return Ok(None);
        }

        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(HttpError::new(status.as_u16(), body).into());
        }

        if body.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| ApiError::UnexpectedShape(format!("invalid JSON body: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{delete, get, post};
    use axum::{Json, Router};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn backend() -> Router {
        Router::new()
            .route(
                "/v1/salads/5/",
                get(|| async { Json(json!({"data": {"spicy": true}})) })
                    .delete(|| async { AxumStatus::NO_CONTENT }),
            )
            .route(
                "/v1/salads/",
                post(|Json(body): Json<Value>| async move {
                    Json(json!({"data": body["data"].clone()}))
                }),
            )
            .route(
                "/v1/conflict/",
                get(|| async {
                    (
                        AxumStatus::CONFLICT,
                        Json(json!({"errors": [{"code": "taken", "detail": "name taken"}]})),
                    )
                }),
            )
            .route("/v1/empty/", delete(|| async { AxumStatus::OK }))
    }

    #[tokio::test]
    async fn test_get_json() {
        let origin = serve(backend()).await;
        let transport = ReqwestTransport::new();

        let body = transport
            .request(HttpMethod::Get, &format!("{}/v1/salads/5/", origin), None)
            .await
            .unwrap();
        assert_eq!(body, Some(json!({"data": {"spicy": true}})));
    }

    #[tokio::test]
    async fn test_get_not_found_is_none() {
        let origin = serve(backend()).await;
        let transport = ReqwestTransport::new();

        let body = transport
            .request(HttpMethod::Get, &format!("{}/v1/missing/", origin), None)
            .await
            .unwrap();
        assert_eq!(body, None);
    }

    #[tokio::test]
    async fn test_mutation_not_found_is_error() {
        let origin = serve(backend()).await;
        let transport = ReqwestTransport::new();

        let err = transport
            .request(
                HttpMethod::Post,
                &format!("{}/v1/missing/", origin),
                Some(&json!({})),
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn test_post_wraps_data() {
        let origin = serve(backend()).await;
        let transport = ReqwestTransport::new();

        let body = transport
            .request(
                HttpMethod::Post,
                &format!("{}/v1/salads/", origin),
                Some(&json!({"spicy": false})),
            )
            .await
            .unwrap();
        assert_eq!(body, Some(json!({"data": {"spicy": false}})));
    }

    #[tokio::test]
    async fn test_no_content() {
        let origin = serve(backend()).await;
        let transport = ReqwestTransport::new();

        let body = transport
            .request(HttpMethod::Delete, &format!("{}/v1/salads/5/", origin), None)
            .await
            .unwrap();
        assert_eq!(body, None);

        let body = transport
            .request(HttpMethod::Delete, &format!("{}/v1/empty/", origin), None)
            .await
            .unwrap();
        assert_eq!(body, None);
    }

    #[tokio::test]
    async fn test_error_status_carries_errors() {
        let origin = serve(backend()).await;
        let transport = ReqwestTransport::new().with_bearer_token("token");

        let err = transport
            .request(HttpMethod::Get, &format!("{}/v1/conflict/", origin), None)
            .await
            .unwrap_err();

        match err {
            ApiError::Http(http) => {
                assert_eq!(http.status, 409);
                assert_eq!(http.errors[0].code.as_deref(), Some("taken"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_failure_is_transport_error() {
        let transport = ReqwestTransport::new();
        let err = transport
            .request(HttpMethod::Get, "http://127.0.0.1:1/v1/", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
    }
}
