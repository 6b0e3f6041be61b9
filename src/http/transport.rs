//! Transport seam: a single attempt of a prepared request.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::config::Config;
use crate::descriptor::{Headers, Method, PreparedRequest};

/// Header carrying the application identifier on every request.
pub const APPLICATION_ID_HEADER: &str = "X-Application-ID";

/// What was actually put on the wire for a failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestContext {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
}

/// Status and decoded body of a non-success response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub data: Value,
}

/// Failure of a single transport attempt.
///
/// `request` and `config` may hold credential headers until
/// [`crate::sanitize::redact`] has run over the error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransportError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<PreparedRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ErrorResponse>,
}

impl TransportError {
    /// A failure that never produced a response.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            request: None,
            config: None,
            response: None,
        }
    }

    /// A non-success HTTP response.
    pub fn status(status: u16, data: Value) -> Self {
        Self {
            message: format!("Request failed with status code {}", status),
            request: None,
            config: None,
            response: Some(ErrorResponse { status, data }),
        }
    }

    pub fn with_contexts(mut self, request: RequestContext, config: PreparedRequest) -> Self {
        self.request = Some(request);
        self.config = Some(config);
        self
    }

    pub fn status_code(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.response {
            Some(response) => write!(f, "{}: {}", self.message, response.data),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for TransportError {}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs exactly one attempt and returns the decoded response body.
    async fn send(&self, request: &PreparedRequest) -> Result<Value, TransportError>;
}

/// [`Transport`] backed by a reqwest [`Client`].
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    default_headers: Headers,
}

impl ReqwestTransport {
    /// Wraps an existing client. Every request also carries `default_headers`
    /// unless it sets the same header itself.
    pub fn new(client: Client, default_headers: Headers) -> Self {
        Self {
            client,
            default_headers,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        let default_headers: Headers = [(APPLICATION_ID_HEADER, config.application_id.as_str())]
            .into_iter()
            .collect();
        Ok(Self::new(client, default_headers))
    }

    fn headers_for(&self, request: &PreparedRequest) -> Headers {
        let mut headers = request.headers.clone();
        for (name, value) in self.default_headers.present() {
            if !headers.contains(name) {
                headers.insert(name, Some(value.to_string()));
            }
        }
        headers
    }

    fn build(&self, request: &PreparedRequest, headers: &Headers) -> Result<reqwest::Request> {
        let mut builder = self.client.request(request.method.into(), &request.url);

        for (name, value) in headers.present() {
            builder = builder.header(name, value);
        }

        if let Some(params) = &request.params {
            builder = builder.query(&query_pairs(params));
        }

        if let Some(data) = &request.data {
            builder = match data {
                Value::String(text) => builder.body(text.clone()),
                other => builder.body(
                    serde_json::to_vec(other).context("Failed to serialize request body")?,
                ),
            };
        }

        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        builder.build().context("Invalid request")
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[tracing::instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn send(&self, request: &PreparedRequest) -> Result<Value, TransportError> {
        let headers = self.headers_for(request);
        let context = RequestContext {
            method: request.method,
            url: request.url.clone(),
            headers: headers.clone(),
        };
        let fail = |error: TransportError| error.with_contexts(context.clone(), request.clone());

        let outgoing = self
            .build(request, &headers)
            .map_err(|e| fail(TransportError::network(format!("{:#}", e))))?;

        debug!("{} {}...", request.method, request.url);

        let response = self
            .client
            .execute(outgoing)
            .await
            .map_err(|e| fail(TransportError::network(e.to_string())))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| fail(TransportError::network(e.to_string())))?;
        let body = decode_body(text);

        if status.is_success() {
            Ok(body)
        } else {
            debug!("{} {} answered {}", request.method, request.url, status);
            Err(fail(TransportError::status(status.as_u16(), body)))
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
            Method::Patch => reqwest::Method::PATCH,
            Method::Options => reqwest::Method::OPTIONS,
            Method::Head => reqwest::Method::HEAD,
        }
    }
}

/// Bodies that are not JSON come back as JSON strings.
fn decode_body(text: String) -> Value {
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

/// Flattens a params object into query pairs. Arrays repeat the key, nulls
/// are dropped, and non-object params are ignored.
fn query_pairs(params: &Value) -> Vec<(String, String)> {
    let Value::Object(map) = params else {
        debug!("Ignoring non-object query params: {}", params);
        return Vec::new();
    };

    let mut pairs = Vec::new();
    for (key, value) in map {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                pairs.extend(items.iter().filter_map(|item| {
                    scalar_text(item).map(|text| (key.clone(), text))
                }));
            }
            other => {
                if let Some(text) = scalar_text(other) {
                    pairs.push((key.clone(), text));
                }
            }
        }
    }
    pairs
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
