//! Runtime configuration for the request helper.
//!
//! Values come from the process environment with local defaults, so a
//! helper built with no environment at all talks to `localhost:6379` and
//! degrades to the in-process cache when nothing is listening there.

use std::env;
use std::time::Duration;

/// Environment variable holding the primary store host.
pub const REDIS_HOST_VAR: &str = "REDIS_HOST";

/// Environment variable holding the primary store port.
pub const REDIS_PORT_VAR: &str = "REDIS_PORT";

/// Environment variable holding the value of the `X-Application-ID` header.
pub const APPLICATION_ID_VAR: &str = "x_application_id";

pub const DEFAULT_REDIS_HOST: &str = "localhost";
pub const DEFAULT_REDIS_PORT: u16 = 6379;
pub const DEFAULT_APPLICATION_ID: &str = "x_application_id";

/// Interval between connection attempts while the primary store is unreachable.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(60);

/// Fixed delay between retry attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Upper bound on entries held by the local fallback tier.
pub const DEFAULT_LOCAL_CAPACITY: u64 = 10_000;

/// Connection settings for the primary (Redis) store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub reconnect_interval: Duration,
}

impl StoreConfig {
    /// Connection URL understood by the redis client.
    pub fn url(&self) -> String {
        format!("redis://{}:{}/0", self.host, self.port)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_REDIS_HOST.to_string(),
            port: DEFAULT_REDIS_PORT,
            reconnect_interval: RECONNECT_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub store: StoreConfig,
    /// Sent as `X-Application-ID` on every outbound request.
    pub application_id: String,
    pub retry_delay: Duration,
    pub local_capacity: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            application_id: DEFAULT_APPLICATION_ID.to_string(),
            retry_delay: DEFAULT_RETRY_DELAY,
            local_capacity: DEFAULT_LOCAL_CAPACITY,
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    ///
    /// Empty values count as unset. A port that does not parse falls back to
    /// the default with a warning rather than failing startup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(host) = get(REDIS_HOST_VAR) {
            config.store.host = host;
        }

        if let Some(port) = get(REDIS_PORT_VAR) {
            match port.trim().parse::<u16>() {
                Ok(port) => config.store.port = port,
                Err(e) => log::warn!(
                    "Ignoring invalid {} value {:?} ({}), using {}",
                    REDIS_PORT_VAR,
                    port,
                    e,
                    DEFAULT_REDIS_PORT
                ),
            }
        }

        if let Some(id) = get(APPLICATION_ID_VAR) {
            config.application_id = id;
        }

        config
    }
}
