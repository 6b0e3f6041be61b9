//! Request descriptors and their normalization.
//!
//! A [`RequestDescriptor`] is what callers hand to the dispatcher. It keeps
//! the loose shape callers are used to (legacy `uri`/`body`/`qs` aliases,
//! headers that may carry absent values, textual timeouts) and is turned into
//! a fresh [`PreparedRequest`] before anything goes on the wire. The caller's
//! descriptor is never mutated.

use anyhow::Result;
use futures_util::future::BoxFuture;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::http::TransportError;
use crate::sanitize;

pub const CONTENT_TYPE: &str = "Content-Type";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// HTTP verbs understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Head,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Options => "OPTIONS",
            Method::Head => "HEAD",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "PATCH" => Ok(Method::Patch),
            "OPTIONS" => Ok(Method::Options),
            "HEAD" => Ok(Method::Head),
            _ => anyhow::bail!("Unknown HTTP method: {}", s),
        }
    }
}

/// Ordered header list whose values may be absent.
///
/// Insertion order is kept because it feeds the cache fingerprint. Names are
/// stored as given; lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, Option<String>)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a header, replacing an existing entry with exactly the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: Option<String>) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    /// Case-insensitive lookup of a present header value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_deref()))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut (String, Option<String>)> {
        self.0.iter_mut()
    }

    /// Headers that carry a value, in insertion order.
    pub fn present(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .filter_map(|(n, v)| v.as_deref().map(|v| (n.as_str(), v)))
    }

    /// Copy with every absent-valued header removed.
    pub fn without_absent(&self) -> Self {
        Self(self.0.iter().filter(|(_, v)| v.is_some()).cloned().collect())
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, Some(value.into()));
        }
        headers
    }
}

// Absent values are left out entirely, the same way a JSON encoder drops
// undefined members.
impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (name, value) in self.present() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Request timeout as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Timeout {
    Millis(u64),
    Text(String),
}

impl Timeout {
    /// Numeric coercion of the timeout, in milliseconds.
    ///
    /// Text that does not parse as a non-negative finite number yields `None`.
    pub fn as_millis(&self) -> Option<u64> {
        match self {
            Timeout::Millis(ms) => Some(*ms),
            Timeout::Text(text) => text
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|ms| ms.is_finite() && *ms >= 0.0)
                .map(|ms| ms.round() as u64),
        }
    }
}

impl From<u64> for Timeout {
    fn from(ms: u64) -> Self {
        Timeout::Millis(ms)
    }
}

impl From<&str> for Timeout {
    fn from(text: &str) -> Self {
        Timeout::Text(text.to_string())
    }
}

/// Resolver invoked with the (redacted) terminal error and the caller's descriptor.
pub type ResolverFn =
    dyn Fn(TransportError, RequestDescriptor) -> BoxFuture<'static, Result<Value>> + Send + Sync;

/// What to hand back instead of a terminal failure.
#[derive(Clone)]
pub enum Fallback {
    Literal(Value),
    Resolver(Arc<ResolverFn>),
}

impl Fallback {
    pub fn literal(value: impl Into<Value>) -> Self {
        Fallback::Literal(value.into())
    }

    pub fn resolver<F, Fut>(resolve: F) -> Self
    where
        F: Fn(TransportError, RequestDescriptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Fallback::Resolver(Arc::new(
            move |error: TransportError,
                  descriptor: RequestDescriptor|
                  -> BoxFuture<'static, Result<Value>> {
                Box::pin(resolve(error, descriptor))
            },
        ))
    }
}

impl fmt::Debug for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fallback::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Fallback::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

// Resolvers have no textual form and never reach the serializer; the
// descriptor skips them.
impl Serialize for Fallback {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Fallback::Literal(value) => value.serialize(serializer),
            Fallback::Resolver(_) => serializer.serialize_none(),
        }
    }
}

/// A caller's request, before normalization.
///
/// Serialization follows field order and skips absent fields; the result is
/// what the cache fingerprint is computed over.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Legacy alias of `url`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Legacy alias of `data`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Legacy alias of `params`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qs: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Timeout>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retry: Option<u32>,
    /// Cache TTL in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<u64>,
    #[serde(skip_serializing_if = "not_literal")]
    pub fallback_response: Option<Fallback>,
}

fn not_literal(fallback: &Option<Fallback>) -> bool {
    !matches!(fallback, Some(Fallback::Literal(_)))
}

impl RequestDescriptor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, Some(value.into()));
        self
    }

    /// Adds a header whose value may be absent. Absent headers are dropped
    /// before the request is sent.
    pub fn optional_header(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn params(mut self, params: impl Into<Value>) -> Self {
        self.params = Some(params.into());
        self
    }

    pub fn timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = Some(max_retry);
        self
    }

    pub fn cache(mut self, ttl_seconds: u64) -> Self {
        self.cache = Some(ttl_seconds);
        self
    }

    pub fn fallback(mut self, fallback: Fallback) -> Self {
        self.fallback_response = Some(fallback);
        self
    }

    /// Number of additional attempts after the first one.
    pub fn retries(&self) -> u32 {
        self.max_retry.unwrap_or(0)
    }

    /// Cache TTL, if caching is enabled for this request.
    pub fn cache_ttl(&self) -> Option<u64> {
        self.cache.filter(|ttl| *ttl > 0)
    }

    /// Normalizes the descriptor into a fresh request for `method`.
    pub fn prepare(&self, method: Method) -> PreparedRequest {
        let url = self
            .url
            .clone()
            .filter(|u| !u.is_empty())
            .or_else(|| self.uri.clone())
            .unwrap_or_default();
        let data = self
            .data
            .clone()
            .filter(|d| !d.is_null())
            .or_else(|| self.body.clone());
        let params = self
            .params
            .clone()
            .filter(|p| !p.is_null())
            .or_else(|| self.qs.clone());

        let timeout = self.timeout.as_ref().and_then(|t| {
            let ms = t.as_millis();
            if ms.is_none() {
                log::warn!("Ignoring non-numeric timeout {:?} for {}", t, url);
            }
            // Zero means no timeout.
            ms.filter(|ms| *ms > 0).map(Duration::from_millis)
        });

        let mut headers = self.headers.without_absent();
        if !headers.contains(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, Some(JSON_CONTENT_TYPE.to_string()));
        }

        PreparedRequest {
            method,
            url,
            headers,
            data,
            params,
            timeout,
        }
    }

    /// Copy that is safe to write to logs.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        sanitize::redact_headers(&mut copy.headers);
        copy
    }
}

/// A normalized request, ready for the transport.
///
/// Also serves as the transport configuration recorded on a [`TransportError`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_timeout"
    )]
    pub timeout: Option<Duration>,
}

fn serialize_timeout<S: Serializer>(timeout: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match timeout {
        Some(t) => s.serialize_u64(t.as_millis() as u64),
        None => s.serialize_none(),
    }
}
