//! Upstream HTTP errors

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// JSON:API style error object returned by a REST backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonApiError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ErrorSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSource {
    pub pointer: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<JsonApiError>,
}

/// A non-2xx response from the backend
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HttpError {
    /// HTTP status code
    pub status: u16,
    /// Raw response body
    pub body: String,
    /// Structured errors parsed from the body, if any
    pub errors: Vec<JsonApiError>,
    message: String,
}

impl HttpError {
    /// Build from a status code and raw body; `errors` are parsed when the
    /// body is JSON with an `errors` array.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        let errors = serde_json::from_str::<ErrorBody>(&body)
            .map(|parsed| parsed.errors)
            .unwrap_or_default();

        let message = if errors.is_empty() {
            format!(
                "HttpError({status}): The network resource returned the following message:\n\n{body}"
            )
        } else {
            let rendered = serde_json::to_string_pretty(&errors).unwrap_or_default();
            format!(
                "HttpError({status}): The network resource returned the following errors:\n\n{rendered}"
            )
        };

        Self {
            status,
            body,
            errors,
            message,
        }
    }

    /// Extensions exposed to GraphQL clients
    pub fn extensions(&self) -> Value {
        json!({
            "upstream": {
                "status": self.status,
                "errors": self.errors,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_error_list() {
        let err = HttpError::new(
            409,
            r#"{"errors":[{"code":"conflict","detail":"name taken","source":{"pointer":"/data/name"}}]}"#,
        );
        assert_eq!(err.status, 409);
        assert_eq!(err.errors.len(), 1);
        assert_eq!(err.errors[0].code.as_deref(), Some("conflict"));
        assert_eq!(
            err.errors[0].source,
            Some(ErrorSource {
                pointer: "/data/name".to_string()
            })
        );
        assert!(err
            .to_string()
            .starts_with("HttpError(409): The network resource returned the following errors"));
    }

    #[test]
    fn test_plain_body_message() {
        let err = HttpError::new(500, "upstream exploded");
        assert!(err.errors.is_empty());
        assert_eq!(
            err.to_string(),
            "HttpError(500): The network resource returned the following message:\n\nupstream exploded"
        );
    }

    #[test]
    fn test_extensions() {
        let err = HttpError::new(422, r#"{"errors":[{"code":"invalid"}]}"#);
        assert_eq!(
            err.extensions(),
            json!({"upstream": {"status": 422, "errors": [{"code": "invalid"}]}})
        );
    }
}
