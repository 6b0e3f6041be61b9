//! HTTP request helper with bounded retries, fallback responses, a two-tier
//! response cache and credential redaction of failures.
//!
//! ```no_run
//! use http_request_retry::{Client, Config, PrimaryStore, RequestDescriptor, RedisConnection};
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::from_env();
//! let redis: Arc<dyn PrimaryStore> = RedisConnection::connect(&config.store).await?;
//! let client = Client::from_config(&config, Some(redis))?;
//!
//! let body = client
//!     .get(RequestDescriptor::new("https://example.com/status").max_retry(2).cache(60))
//!     .await?;
//! println!("{}", body);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod descriptor;
pub mod fingerprint;
pub mod http;
pub mod sanitize;

pub use cache::{CacheStore, LocalStore, PrimaryStore, RedisConnection};
pub use config::Config;
pub use descriptor::{Fallback, Headers, Method, PreparedRequest, RequestDescriptor, Timeout};
pub use http::{Client, Transport, TransportError};
