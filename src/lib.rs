//! # pleme-rest-loader
//!
//! Batched REST data access for Pleme GraphQL services.
//!
//! ## Features
//!
//! - **Request coalescing** - at most one in-flight GET per path within a batch window
//! - **Arg loaders** - many lookups by filter value folded into one chunked list request
//! - **Relay Connections** - REST pagination envelopes translated to `edges`/`pageInfo`
//! - **Resources** - CRUD facades over one REST endpoint
//! - **Request scoping** - per-request resource sets with their own loader cache
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pleme_rest_loader::{Args, ConnectionArgs, HttpApi, HttpApiConfig, HttpResource, ReqwestTransport};
//!
//! let config = HttpApiConfig::new("https://gateway", "/v1");
//! let api = Arc::new(HttpApi::new(config, Arc::new(ReqwestTransport::new())));
//! let salads = HttpResource::paginated(api, "salads");
//!
//! let page = salads
//!     .get_connection(&ConnectionArgs::forward(Some(10), None), &Args::new())
//!     .await?;
//! ```

pub mod api;
pub mod cache;
pub mod context;
pub mod dataloaders;
pub mod handler;
pub mod http_error;
pub mod pagination;
pub mod path;
pub mod registry;
pub mod resource;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ArgLoader, HttpApi, HttpApiConfig, ValidationResult};
pub use cache::ResourceCache;
pub use context::{ContextFactory, RequestContext};
pub use dataloaders::{BatchLoader, DataLoader};
pub use handler::{graphql_handler, request_context, resource};
pub use http_error::{HttpError, JsonApiError};
pub use pagination::{
    connection_from_slice, to_connection, Connection, ConnectionArgs, CursorCodec, Edge,
    PageInfo, PaginationEnvelope,
};
pub use path::{build_path, url_join, ArgValue, Args};
pub use registry::ResourceRegistry;
pub use resource::{Endpoint, HttpResource, Pagination, Resource};
pub use transport::{HttpMethod, ReqwestTransport, Transport};

use async_graphql::ErrorExtensions;
use thiserror::Error;

/// REST loader errors
///
/// `Clone` so a single failure can be handed to every caller awaiting the
/// same coalesced key.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected response shape: {0}")]
    UnexpectedShape(String),

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Batch load dropped key: {0}")]
    BatchDropped(String),
}

impl ApiError {
    /// Upstream status code, for HTTP errors
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http(err) => Some(err.status),
            _ => None,
        }
    }
}

impl ErrorExtensions for ApiError {
    fn extend(&self) -> async_graphql::Error {
        async_graphql::Error::new(self.to_string()).extend_with(|_, e| match self {
            ApiError::Http(http) => {
                let upstream = http.extensions()["upstream"].clone();
                if let Ok(upstream) = async_graphql::Value::from_json(upstream) {
                    e.set("upstream", upstream);
                }
            }
            ApiError::InvalidArgument(_) => e.set("code", "BAD_USER_INPUT"),
            _ => {}
        })
    }
}

/// Result type for REST loader operations
pub type Result<T> = std::result::Result<T, ApiError>;
