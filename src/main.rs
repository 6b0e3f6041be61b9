use anyhow::{Context, Result};
use clap::Parser;
use http_request_retry::{
    Client, Config, Fallback, Method, PrimaryStore, RedisConnection, RequestDescriptor,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// http-request-retry - send one HTTP request with retries and caching
///
/// The response body is printed as JSON. Cached responses are kept in Redis
/// (REDIS_HOST / REDIS_PORT) when it is reachable, in memory otherwise.
///
/// Examples:
///   http-request-retry get https://example.com/status --max-retry 2
///   http-request-retry post https://example.com/items -d '{"name":"x"}' -H 'x-api-key: k'
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// HTTP method (get, post, put, delete, patch)
    #[arg(value_name = "METHOD", value_parser = parse_method)]
    method: Method,

    #[arg(value_name = "URL")]
    url: String,

    /// Request header, as "Name: value" (repeatable)
    #[arg(long = "header", short = 'H', value_name = "HEADER")]
    headers: Vec<String>,

    /// Request body; sent as text if it is not valid JSON
    #[arg(long, short = 'd', value_name = "BODY")]
    data: Option<String>,

    /// Query parameter, as "key=value" (repeatable)
    #[arg(long = "param", short = 'p', value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// Request timeout in milliseconds (0 for none)
    #[arg(long, value_name = "MS")]
    timeout: Option<u64>,

    /// Additional attempts on 502-504 responses
    #[arg(long, default_value_t = 0)]
    max_retry: u32,

    /// Cache the response for this many seconds
    #[arg(long, value_name = "SECONDS")]
    cache: Option<u64>,

    /// JSON value to print instead of failing
    #[arg(long, value_name = "JSON")]
    fallback: Option<String>,

    /// Delay between retries in milliseconds
    #[arg(long, env = "HTTP_REQUEST_RETRY_DELAY_MS", value_name = "MS")]
    retry_delay: Option<u64>,

    /// Do not connect to Redis; cache in memory only
    #[arg(long)]
    local_only: bool,
}

fn parse_method(s: &str) -> Result<Method, String> {
    s.parse::<Method>().map_err(|e| e.to_string())
}

impl Cli {
    fn descriptor(&self) -> Result<RequestDescriptor> {
        let mut descriptor = RequestDescriptor::new(&self.url).max_retry(self.max_retry);

        for header in &self.headers {
            let (name, value) = header
                .split_once(':')
                .with_context(|| format!("Invalid header {:?}, expected \"Name: value\"", header))?;
            descriptor = descriptor.header(name.trim(), value.trim());
        }

        if let Some(data) = &self.data {
            descriptor = descriptor.data(parse_json_or_text(data));
        }

        if !self.params.is_empty() {
            let mut params = Map::new();
            for param in &self.params {
                let (key, value) = param
                    .split_once('=')
                    .with_context(|| format!("Invalid param {:?}, expected key=value", param))?;
                params.insert(key.to_string(), Value::String(value.to_string()));
            }
            descriptor = descriptor.params(Value::Object(params));
        }

        if let Some(timeout) = self.timeout {
            descriptor = descriptor.timeout(timeout);
        }

        if let Some(cache) = self.cache {
            descriptor = descriptor.cache(cache);
        }

        if let Some(fallback) = &self.fallback {
            descriptor = descriptor.fallback(Fallback::literal(parse_json_or_text(fallback)));
        }

        Ok(descriptor)
    }
}

fn parse_json_or_text(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(ms) = cli.retry_delay {
        config.retry_delay = Duration::from_millis(ms);
    }

    let primary = if cli.local_only {
        None
    } else {
        let redis: Arc<dyn PrimaryStore> = RedisConnection::connect(&config.store).await?;
        Some(redis)
    };

    let client = Client::from_config(&config, primary)?;
    let body = client.dispatch(cli.method, cli.descriptor()?).await?;

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cli_minimal_parsing() {
        let cli = Cli::try_parse_from(["http-request-retry", "get", "http://example.test"]).unwrap();
        assert_eq!(cli.method, Method::Get);
        assert_eq!(cli.url, "http://example.test");
        assert_eq!(cli.max_retry, 0);
        assert!(!cli.local_only);
    }

    #[test]
    fn test_cli_rejects_unknown_method() {
        let result = Cli::try_parse_from(["http-request-retry", "fetch", "http://example.test"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_builds_descriptor() {
        let cli = Cli::try_parse_from([
            "http-request-retry",
            "POST",
            "http://example.test",
            "-H",
            "x-api-key: secret",
            "-d",
            r#"{"name":"x"}"#,
            "-p",
            "page=2",
            "--timeout",
            "1500",
            "--max-retry",
            "2",
            "--cache",
            "60",
            "--fallback",
            r#"{"message":"failed"}"#,
        ])
        .unwrap();

        let descriptor = cli.descriptor().unwrap();
        assert_eq!(descriptor.url.as_deref(), Some("http://example.test"));
        assert_eq!(descriptor.headers.get("x-api-key"), Some("secret"));
        assert_eq!(descriptor.data, Some(json!({"name": "x"})));
        assert_eq!(descriptor.params, Some(json!({"page": "2"})));
        assert_eq!(descriptor.retries(), 2);
        assert_eq!(descriptor.cache_ttl(), Some(60));
        assert!(matches!(
            descriptor.fallback_response,
            Some(Fallback::Literal(ref v)) if *v == json!({"message": "failed"})
        ));
    }

    #[test]
    fn test_cli_rejects_malformed_header() {
        let cli = Cli::try_parse_from([
            "http-request-retry",
            "get",
            "http://example.test",
            "-H",
            "no-colon",
        ])
        .unwrap();
        assert!(cli.descriptor().is_err());
    }

    #[test]
    fn test_non_json_body_is_sent_as_text() {
        assert_eq!(parse_json_or_text("plain words"), json!("plain words"));
        assert_eq!(parse_json_or_text("[1,2]"), json!([1, 2]));
    }
}
