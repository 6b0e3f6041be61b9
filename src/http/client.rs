//! Request dispatcher with retries, fallbacks and response caching.

use anyhow::Result;
use log::{info, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::retry::RetryPolicy;
use super::transport::{ReqwestTransport, Transport};
use crate::cache::{CacheStore, LocalStore, PrimaryStore};
use crate::config::{Config, DEFAULT_RETRY_DELAY};
use crate::descriptor::{Fallback, Method, RequestDescriptor};
use crate::fingerprint::fingerprint;
use crate::sanitize;

/// Entry point for outbound requests.
///
/// Cheap to clone; clones share the transport and cache.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    cache: CacheStore,
    retry_delay: Duration,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("cache", &self.cache)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>, cache: CacheStore) -> Self {
        Self {
            transport,
            cache,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Builds a reqwest-backed client. Without a `primary` store, responses
    /// are cached in process only.
    pub fn from_config(config: &Config, primary: Option<Arc<dyn PrimaryStore>>) -> Result<Self> {
        let transport = ReqwestTransport::from_config(config)?;
        let local = LocalStore::new(config.local_capacity);
        let cache = match primary {
            Some(primary) => CacheStore::new(primary, local),
            None => CacheStore::local_only(local),
        };
        Ok(Self::new(Arc::new(transport), cache).with_retry_delay(config.retry_delay))
    }

    /// Fixed delay between retry attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub async fn get(&self, descriptor: RequestDescriptor) -> Result<Value> {
        self.dispatch(Method::Get, descriptor).await
    }

    pub async fn post(&self, descriptor: RequestDescriptor) -> Result<Value> {
        self.dispatch(Method::Post, descriptor).await
    }

    pub async fn put(&self, descriptor: RequestDescriptor) -> Result<Value> {
        self.dispatch(Method::Put, descriptor).await
    }

    pub async fn delete(&self, descriptor: RequestDescriptor) -> Result<Value> {
        self.dispatch(Method::Delete, descriptor).await
    }

    pub async fn patch(&self, descriptor: RequestDescriptor) -> Result<Value> {
        self.dispatch(Method::Patch, descriptor).await
    }

    /// Sends `descriptor` as a `method` request and returns the response body.
    ///
    /// With a cache TTL set, the whole operation (retries and fallback
    /// included) is cached under the descriptor's fingerprint. A terminal
    /// failure without a fallback comes back as a redacted
    /// [`TransportError`](super::TransportError).
    #[tracing::instrument(skip(self, descriptor), fields(method = %method))]
    pub async fn dispatch(&self, method: Method, descriptor: RequestDescriptor) -> Result<Value> {
        match descriptor.cache_ttl() {
            Some(ttl) => {
                let key = fingerprint(&descriptor)?;
                self.cache
                    .get_or_compute(&key, ttl, || self.send_with_retry(method, descriptor))
                    .await
            }
            None => self.send_with_retry(method, descriptor).await,
        }
    }

    async fn send_with_retry(&self, method: Method, descriptor: RequestDescriptor) -> Result<Value> {
        let request = descriptor.prepare(method);
        let policy = RetryPolicy::new(descriptor.retries(), self.retry_delay);
        let mut retries_done = 0;

        let mut error = loop {
            match self.transport.send(&request).await {
                Ok(body) => return Ok(body),
                Err(e) if policy.should_retry(retries_done, method, &e) => {
                    retries_done += 1;
                    // Not redacted yet: log the message only, never the contexts.
                    warn!(
                        "{} {}: attempt {}/{} failed ({}), retrying in {}ms...",
                        method,
                        request.url,
                        retries_done,
                        policy.max_retries + 1,
                        e.message,
                        policy.delay.as_millis()
                    );
                    tokio::time::sleep(policy.delay).await;
                }
                Err(e) => break e,
            }
        };

        sanitize::redact(&mut error);

        warn!(
            "Failed by max retries {} reached {} or error {}",
            policy.max_retries,
            to_log_json(&descriptor.redacted()),
            to_log_json(&error)
        );

        match descriptor.fallback_response.clone() {
            Some(Fallback::Literal(value)) => {
                info!(
                    "Returning fallback response: {} uri: {}",
                    value, request.url
                );
                Ok(value)
            }
            Some(Fallback::Resolver(resolve)) => {
                info!("Resolving fallback response uri: {}", request.url);
                resolve(error, descriptor).await
            }
            None => Err(anyhow::Error::new(error)),
        }
    }
}

fn to_log_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("<unserializable: {}>", e))
}
