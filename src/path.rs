//! REST path and query string building
//!
//! Paths built here double as loader keys, so serialization is
//! deterministic: keys are emitted in sorted order no matter how the
//! arguments were inserted.

use std::collections::btree_map::{self, BTreeMap};

use serde_json::Value;
use url::form_urlencoded;

/// A single query parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// Removes the parameter from the resulting query
    Null,
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Serialized comma-joined: `ids=1,2,3`
    List(Vec<String>),
}

impl ArgValue {
    /// Render the raw (unencoded) value, `None` when the key should be dropped
    fn render(&self) -> Option<String> {
        match self {
            ArgValue::Null => None,
            ArgValue::String(s) => Some(s.clone()),
            ArgValue::Int(i) => Some(i.to_string()),
            ArgValue::Float(f) => Some(f.to_string()),
            ArgValue::Bool(b) => Some(b.to_string()),
            ArgValue::List(items) if items.is_empty() => None,
            ArgValue::List(items) => Some(items.join(",")),
        }
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::String(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        ArgValue::String(value)
    }
}

impl From<&String> for ArgValue {
    fn from(value: &String) -> Self {
        ArgValue::String(value.clone())
    }
}

impl From<i32> for ArgValue {
    fn from(value: i32) -> Self {
        ArgValue::Int(i64::from(value))
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        ArgValue::Int(value)
    }
}

impl From<u32> for ArgValue {
    fn from(value: u32) -> Self {
        ArgValue::Int(i64::from(value))
    }
}

impl From<usize> for ArgValue {
    fn from(value: usize) -> Self {
        i64::try_from(value).map_or_else(|_| ArgValue::String(value.to_string()), ArgValue::Int)
    }
}

impl From<f64> for ArgValue {
    fn from(value: f64) -> Self {
        ArgValue::Float(value)
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        ArgValue::Bool(value)
    }
}

impl From<Vec<String>> for ArgValue {
    fn from(value: Vec<String>) -> Self {
        ArgValue::List(value)
    }
}

impl From<Vec<&str>> for ArgValue {
    fn from(value: Vec<&str>) -> Self {
        ArgValue::List(value.into_iter().map(str::to_string).collect())
    }
}

impl From<&[String]> for ArgValue {
    fn from(value: &[String]) -> Self {
        ArgValue::List(value.to_vec())
    }
}

impl<T: Into<ArgValue>> From<Option<T>> for ArgValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(ArgValue::Null, Into::into)
    }
}

impl From<&Value> for ArgValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => ArgValue::Null,
            Value::Bool(b) => ArgValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ArgValue::Int(i),
                None => ArgValue::String(n.to_string()),
            },
            Value::String(s) => ArgValue::String(s.clone()),
            Value::Array(items) => ArgValue::List(
                items
                    .iter()
                    .filter_map(|item| ArgValue::from(item).render())
                    .collect(),
            ),
            Value::Object(_) => ArgValue::String(value.to_string()),
        }
    }
}

/// Query arguments for a REST request
///
/// Pagination keys (`after`, `before`, `first`, `last`) are handled by
/// [`ConnectionArgs`](crate::pagination::ConnectionArgs); everything here is
/// forwarded to the backend as-is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(BTreeMap<String, ArgValue>);

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ArgValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ArgValue> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ArgValue> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, ArgValue> {
        self.0.iter()
    }

    /// Merge `other` on top of `self`; `other` wins on collisions
    #[must_use]
    pub fn merged(&self, other: &Args) -> Args {
        let mut merged = self.clone();
        for (key, value) in other.iter() {
            merged.0.insert(key.clone(), value.clone());
        }
        merged
    }
}

impl<K, V> FromIterator<(K, V)> for Args
where
    K: Into<String>,
    V: Into<ArgValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Args(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<&serde_json::Map<String, Value>> for Args {
    fn from(map: &serde_json::Map<String, Value>) -> Self {
        map.iter().map(|(k, v)| (k.clone(), ArgValue::from(v))).collect()
    }
}

impl<'a> IntoIterator for &'a Args {
    type Item = (&'a String, &'a ArgValue);
    type IntoIter = btree_map::Iter<'a, String, ArgValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Build a path with query string from a base path and arguments.
///
/// An existing query string on `base` is parsed and `args` are merged on
/// top of it. `Null` values remove the key. With no args the base path is
/// returned untouched.
pub fn build_path(base: &str, args: &Args) -> String {
    if args.is_empty() {
        return base.to_string();
    }

    let (path, query) = split_query(base);
    let merged = parse_query(query.unwrap_or("")).merged(args);
    let search = serialize_query(&merged);

    if search.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{search}")
    }
}

/// Parse a query string into [`Args`]
///
/// Never fails: undecodable input is decoded lossily. Repeated keys are
/// collected into a list.
pub fn parse_query(query: &str) -> Args {
    let mut args = Args::new();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        let key = key.into_owned();
        let value = value.into_owned();
        let next = match args.remove(&key) {
            Some(ArgValue::List(mut items)) => {
                items.push(value);
                ArgValue::List(items)
            }
            Some(ArgValue::String(previous)) => ArgValue::List(vec![previous, value]),
            _ => ArgValue::String(value),
        };
        args.insert(key, next);
    }
    args
}

/// Serialize args as `key=value` pairs in key order, dropping `Null` values
pub fn serialize_query(args: &Args) -> String {
    args.iter()
        .filter_map(|(key, value)| {
            value
                .render()
                .map(|rendered| format!("{}={}", encode(key), encode(&rendered)))
        })
        .collect::<Vec<_>>()
        .join("&")
}

// Commas stay literal so list values read `ids=1,2` and re-parse identically.
fn encode(raw: &str) -> String {
    form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace("%2C", ",")
}

fn split_query(path: &str) -> (&str, Option<&str>) {
    match path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path, None),
    }
}

/// Join path segments with single slashes, a leading slash and a trailing slash.
///
/// ```
/// use pleme_rest_loader::path::url_join;
///
/// assert_eq!(url_join(["//foo", "5", "/"]), "/foo/5/");
/// ```
pub fn url_join<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut url = String::new();
    for part in parts {
        for segment in part.as_ref().split('/').filter(|s| !s.is_empty()) {
            url.push('/');
            url.push_str(segment);
        }
    }
    url.push('/');
    url
}

/// Absolute URL for `path` below `origin` and `api_base`.
///
/// The query string and the trailing slash of `path` are preserved.
pub fn absolute_url(origin: &str, api_base: &str, path: &str) -> String {
    let (path, query) = split_query(path);
    let mut url = origin.trim_end_matches('/').to_string();

    for segment in api_base
        .split('/')
        .chain(path.split('/'))
        .filter(|s| !s.is_empty())
    {
        url.push('/');
        url.push_str(segment);
    }

    let trailing = if path.is_empty() {
        api_base.ends_with('/')
    } else {
        path.ends_with('/')
    };
    if trailing || url.len() == origin.trim_end_matches('/').len() {
        url.push('/');
    }

    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}
