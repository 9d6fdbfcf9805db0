//! CRUD facade over a single REST resource

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::api::HttpApi;
use crate::pagination::{Connection, ConnectionArgs};
use crate::path::{url_join, Args};
use crate::Result;

/// Anything that can fetch a record (or the collection root) by id
#[async_trait]
pub trait Resource: Send + Sync + 'static {
    async fn get(&self, id: Option<&str>) -> Result<Option<Value>>;
}

/// Where a resource lives
#[derive(Clone)]
pub enum Endpoint {
    /// Base path; ids are appended as path segments
    Path(String),
    /// Builds the full path from an optional id
    Custom(Arc<dyn Fn(Option<&str>) -> String + Send + Sync>),
}

impl Endpoint {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(Option<&str>) -> String + Send + Sync + 'static,
    {
        Endpoint::Custom(Arc::new(f))
    }

    fn path(&self, id: Option<&str>) -> String {
        match self {
            Endpoint::Path(base) => url_join([base.as_str(), id.unwrap_or("")]),
            Endpoint::Custom(f) => f(id),
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Endpoint::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl From<&str> for Endpoint {
    fn from(path: &str) -> Self {
        Endpoint::Path(path.to_string())
    }
}

impl From<String> for Endpoint {
    fn from(path: String) -> Self {
        Endpoint::Path(path)
    }
}

/// How a resource turns its collection into a connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Pagination {
    /// Fetch the full list once and slice it locally
    #[default]
    Unpaginated,
    /// The backend returns cursor pagination envelopes
    Cursor,
}

/// REST resource bound to one [`HttpApi`]
///
/// Reads go through the API's batched loader; mutations are sent as-is.
#[derive(Debug, Clone)]
pub struct HttpResource {
    api: Arc<HttpApi>,
    endpoint: Endpoint,
    pagination: Pagination,
}

impl HttpResource {
    pub fn new(api: Arc<HttpApi>, endpoint: impl Into<Endpoint>) -> Self {
        Self {
            api,
            endpoint: endpoint.into(),
            pagination: Pagination::Unpaginated,
        }
    }

    /// Resource whose list endpoint supports cursor pagination
    pub fn paginated(api: Arc<HttpApi>, endpoint: impl Into<Endpoint>) -> Self {
        Self::new(api, endpoint).with_pagination(Pagination::Cursor)
    }

    #[must_use]
    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn api(&self) -> &Arc<HttpApi> {
        &self.api
    }

    /// Path of the record `id`, or of the collection when `id` is `None`
    pub fn path(&self, id: Option<&str>) -> String {
        self.endpoint.path(id)
    }

    /// Path of a sub-resource of record `id`
    pub fn sub_path(&self, id: &str, sub: &str) -> String {
        url_join([self.path(Some(id)).as_str(), sub])
    }

    pub async fn get(&self, id: Option<&str>) -> Result<Option<Value>> {
        self.api.get(&self.path(id), &Args::new()).await
    }

    /// Connection over the collection, filtered by `filters`
    ///
    /// Unpaginated resources only page forward: `before` or `last` is an
    /// [`ApiError::InvalidArgument`](crate::ApiError::InvalidArgument)
    /// rather than being ignored.
    pub async fn get_connection(
        &self,
        args: &ConnectionArgs,
        filters: &Args,
    ) -> Result<Option<Connection<Value>>> {
        let path = self.path(None);
        match self.pagination {
            Pagination::Cursor => self.api.get_paginated_connection(&path, args, filters).await,
            Pagination::Unpaginated => {
                self.api
                    .get_unpaginated_connection(&path, args, filters)
                    .await
            }
        }
    }

    pub async fn create(&self, data: &Value) -> Result<Option<Value>> {
        self.api.post(&self.path(None), Some(data)).await
    }

    /// Partial update (`PATCH`)
    pub async fn update(&self, id: &str, data: Option<&Value>) -> Result<Option<Value>> {
        self.api.patch(&self.path(Some(id)), data).await
    }

    /// Full replacement (`PUT`)
    pub async fn set(&self, id: &str, data: Option<&Value>) -> Result<Option<Value>> {
        self.api.put(&self.path(Some(id)), data).await
    }

    pub async fn delete(&self, id: &str) -> Result<Option<Value>> {
        self.api.delete(&self.path(Some(id))).await
    }
}

#[async_trait]
impl Resource for HttpResource {
    async fn get(&self, id: Option<&str>) -> Result<Option<Value>> {
        HttpResource::get(self, id).await
    }
}
