//! Relay-style cursor pagination over REST envelopes
//!
//! REST list endpoints answer with `{data: [...], meta: {cursors, hasNextPage}}`
//! (or the legacy `{data: [...], links: {next}}`). This module turns those
//! envelopes into Relay connections, and slices plain arrays for endpoints
//! that do not paginate at all.

use async_graphql::{InputObject, Json, Object, SimpleObject};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::form_urlencoded;

use crate::path::{ArgValue, Args};
use crate::{ApiError, Result};

const ARRAY_CURSOR_PREFIX: &str = "arrayconnection:";

/// Page information
#[derive(SimpleObject, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

/// Edge in a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge<T> {
    pub cursor: String,
    pub node: T,
}

#[Object]
impl<T: async_graphql::OutputType> Edge<T> {
    async fn cursor(&self) -> &str {
        &self.cursor
    }

    async fn node(&self) -> &T {
        &self.node
    }
}

/// Connection (paginated result)
///
/// `meta` carries whatever the backend put in its pagination `meta` besides
/// `cursors` and `hasNextPage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection<T> {
    pub edges: Vec<Edge<T>>,
    pub page_info: PageInfo,
    pub meta: Value,
}

#[Object]
impl<T: async_graphql::OutputType> Connection<T> {
    async fn edges(&self) -> &[Edge<T>] {
        &self.edges
    }

    async fn page_info(&self) -> &PageInfo {
        &self.page_info
    }

    async fn meta(&self) -> Json<Value> {
        Json(self.meta.clone())
    }
}

impl<T> Connection<T> {
    /// Create a connection from edges; start/end cursors are derived from them
    pub fn new(edges: Vec<Edge<T>>, has_previous_page: bool, has_next_page: bool) -> Self {
        let start_cursor = edges.first().map(|e| e.cursor.clone());
        let end_cursor = edges.last().map(|e| e.cursor.clone());

        Self {
            edges,
            page_info: PageInfo {
                has_next_page,
                has_previous_page,
                start_cursor,
                end_cursor,
            },
            meta: Value::Object(Map::new()),
        }
    }

    #[must_use]
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }

    /// Nodes in edge order
    pub fn nodes(&self) -> impl Iterator<Item = &T> {
        self.edges.iter().map(|e| &e.node)
    }

    /// Convert every node, keeping cursors and page info
    pub fn try_map_nodes<U, F>(self, mut f: F) -> Result<Connection<U>>
    where
        F: FnMut(T) -> Result<U>,
    {
        let edges = self
            .edges
            .into_iter()
            .map(|edge| {
                Ok(Edge {
                    cursor: edge.cursor,
                    node: f(edge.node)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Connection {
            edges,
            page_info: self.page_info,
            meta: self.meta,
        })
    }
}

impl Connection<Value> {
    /// Deserialize JSON nodes into a typed node
    pub fn deserialize_nodes<U: DeserializeOwned>(self) -> Result<Connection<U>> {
        self.try_map_nodes(|node| {
            serde_json::from_value(node)
                .map_err(|e| ApiError::UnexpectedShape(format!("node: {}", e)))
        })
    }
}

/// Cursor encoding/decoding
pub struct CursorCodec;

impl CursorCodec {
    /// Encode cursor to base64
    pub fn encode(value: &str) -> String {
        BASE64.encode(value.as_bytes())
    }

    /// Decode cursor from base64
    pub fn decode(cursor: &str) -> Result<String> {
        let bytes = BASE64
            .decode(cursor.as_bytes())
            .map_err(|e| ApiError::InvalidCursor(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| ApiError::InvalidCursor(e.to_string()))
    }

    /// Positional cursor, compatible with graphql-relay array connections
    pub fn encode_offset(offset: usize) -> String {
        Self::encode(&format!("{}{}", ARRAY_CURSOR_PREFIX, offset))
    }

    /// Offset stored in a positional cursor
    pub fn decode_offset(cursor: &str) -> Result<usize> {
        let decoded = Self::decode(cursor)?;
        decoded
            .strip_prefix(ARRAY_CURSOR_PREFIX)
            .and_then(|offset| offset.parse().ok())
            .ok_or_else(|| ApiError::InvalidCursor(format!("not an array cursor: {}", cursor)))
    }
}

/// Pagination direction implied by the connection arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Connection arguments for GraphQL queries
///
/// Follows the Relay Cursor Connections Specification:
/// https://relay.dev/graphql/connections.htm
#[derive(InputObject, Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionArgs {
    /// Number of items to return (forward pagination)
    pub first: Option<i32>,

    /// Cursor to start from (forward pagination)
    pub after: Option<String>,

    /// Number of items to return (backward pagination)
    pub last: Option<i32>,

    /// Cursor to end at (backward pagination)
    pub before: Option<String>,
}

impl ConnectionArgs {
    pub fn forward(first: Option<i32>, after: Option<String>) -> Self {
        Self {
            first,
            after,
            ..Self::default()
        }
    }

    pub fn backward(last: Option<i32>, before: impl Into<String>) -> Self {
        Self {
            last,
            before: Some(before.into()),
            ..Self::default()
        }
    }

    /// Validate connection arguments
    ///
    /// Backward pagination is only supported from an explicit `before`
    /// cursor, so `last` on its own is rejected.
    pub fn validate(&self) -> Result<()> {
        if self.after.is_some() && self.before.is_some() {
            return Err(ApiError::InvalidArgument(
                "`after` and `before` cursors cannot be specified together".to_string(),
            ));
        }

        if self.first.is_some() && self.last.is_some() {
            return Err(ApiError::InvalidArgument(
                "`first` and `last` cannot be specified together".to_string(),
            ));
        }

        if self.last.is_some() && self.before.is_none() {
            return Err(ApiError::InvalidArgument(
                "`last` requires a `before` cursor".to_string(),
            ));
        }

        for (name, value) in [("first", self.first), ("last", self.last)] {
            if value.is_some_and(|v| v < 0) {
                return Err(ApiError::InvalidArgument(format!(
                    "`{}` must be non-negative",
                    name
                )));
            }
        }

        Ok(())
    }

    pub fn direction(&self) -> Direction {
        if self.before.is_some() {
            Direction::Backward
        } else {
            Direction::Forward
        }
    }

    /// Page size for the current direction
    pub fn limit(&self) -> Option<i32> {
        match self.direction() {
            Direction::Forward => self.first,
            Direction::Backward => self.last,
        }
    }

    /// Query parameters sent upstream
    ///
    /// Absent values are emitted as `Null` so they also unset anything
    /// inherited from the base path.
    pub fn query_args(&self) -> Args {
        let limit = ArgValue::from(self.limit());
        Args::new()
            .with("cursor", self.after.clone())
            .with("before", self.before.clone())
            .with("limit", limit.clone())
            .with("pageSize", limit)
    }
}

/// `meta` member of a pagination envelope
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageMeta {
    #[serde(default)]
    pub cursors: Vec<String>,

    #[serde(default, rename = "hasNextPage", alias = "has_next_page")]
    pub has_next_page: Option<bool>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Legacy `links` member of a pagination envelope
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageLinks {
    #[serde(default)]
    pub next: Option<String>,
}

/// Raw REST pagination envelope
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaginationEnvelope {
    #[serde(default)]
    pub data: Option<Vec<Value>>,
    #[serde(default)]
    pub meta: Option<PageMeta>,
    #[serde(default)]
    pub links: Option<PageLinks>,
}

struct BackendPage {
    cursors: Vec<String>,
    has_more: bool,
    next_cursor: Option<String>,
    meta: Map<String, Value>,
}

impl BackendPage {
    fn from_meta(meta: PageMeta, len: usize) -> Result<Self> {
        if meta.cursors.len() != len {
            return Err(ApiError::UnexpectedShape(format!(
                "expected {} cursors in `meta`, got {}",
                len,
                meta.cursors.len()
            )));
        }

        Ok(Self {
            cursors: meta.cursors,
            has_more: meta.has_next_page.unwrap_or(false),
            next_cursor: None,
            meta: meta.extra,
        })
    }

    // Legacy envelopes carry no per-item cursors.
    fn from_links(links: PageLinks, len: usize) -> Self {
        let next_cursor = links.next.as_deref().and_then(cursor_param);

        Self {
            cursors: (0..len).map(CursorCodec::encode_offset).collect(),
            has_more: links.next.is_some(),
            next_cursor,
            meta: Map::new(),
        }
    }
}

fn cursor_param(url: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "cursor")
        .map(|(_, value)| value.into_owned())
}

impl PaginationEnvelope {
    /// Parse a raw response body
    pub fn from_value(body: Value) -> Result<Self> {
        serde_json::from_value(body).map_err(|e| {
            ApiError::UnexpectedShape(format!(
                "`GET` should return a list of items with pagination `meta`: {}",
                e
            ))
        })
    }

    /// Translate into a Relay connection
    ///
    /// `None` when the envelope has no `data`, which is distinct from an
    /// empty page.
    pub fn into_connection(self, args: &ConnectionArgs) -> Result<Option<Connection<Value>>> {
        args.validate()?;

        let Some(data) = self.data else {
            return Ok(None);
        };

        let page = match (self.meta, self.links) {
            (Some(meta), _) => BackendPage::from_meta(meta, data.len())?,
            (None, Some(links)) => BackendPage::from_links(links, data.len()),
            (None, None) => {
                return Err(ApiError::UnexpectedShape(
                    "`GET` should return a list of items with a `meta` property containing \
                     an array of cursors and `hasNextPage`"
                        .to_string(),
                ))
            }
        };

        let edges: Vec<Edge<Value>> = data
            .into_iter()
            .zip(page.cursors)
            .map(|(node, cursor)| Edge { cursor, node })
            .collect();

        // A page anchored by `after` always has items before it. Backward
        // pages mirror the backend flag and can never rule out later items.
        let (has_previous_page, has_next_page) = match args.direction() {
            Direction::Forward => (args.after.is_some(), page.has_more),
            Direction::Backward => (page.has_more, true),
        };

        let mut connection = Connection::new(edges, has_previous_page, has_next_page)
            .with_meta(Value::Object(page.meta));
        if !connection.edges.is_empty() {
            if let Some(next) = page.next_cursor {
                connection.page_info.end_cursor = Some(next);
            }
        }

        Ok(Some(connection))
    }
}

/// Translate a raw response body into a Relay connection
pub fn to_connection(
    body: Option<Value>,
    args: &ConnectionArgs,
) -> Result<Option<Connection<Value>>> {
    args.validate()?;
    match body {
        None => Ok(None),
        Some(body) => PaginationEnvelope::from_value(body)?.into_connection(args),
    }
}

/// Slice a complete list into a forward Relay connection
///
/// Same semantics as graphql-relay's `connectionFromArray` for `first` and
/// `after`; an unreadable `after` cursor starts from the beginning.
pub fn connection_from_slice<T>(items: Vec<T>, args: &ConnectionArgs) -> Result<Connection<T>> {
    if args.before.is_some() || args.last.is_some() {
        return Err(ApiError::InvalidArgument(
            "unpaginated connections only support `first` and `after`".to_string(),
        ));
    }
    args.validate()?;

    let len = items.len();
    let start = args
        .after
        .as_deref()
        .and_then(|cursor| CursorCodec::decode_offset(cursor).ok())
        .map_or(0, |offset| offset.saturating_add(1))
        .min(len);
    let end = match args.first {
        Some(first) => start.saturating_add(first.unsigned_abs() as usize).min(len),
        None => len,
    };

    let edges = items
        .into_iter()
        .enumerate()
        .skip(start)
        .take(end - start)
        .map(|(offset, node)| Edge {
            cursor: CursorCodec::encode_offset(offset),
            node,
        })
        .collect();

    let has_next_page = args.first.is_some() && end < len;
    Ok(Connection::new(edges, false, has_next_page))
}
