//! HTTP base query built on reqwest.
//!
//! Request descriptors are either a bare path string or an object:
//!
//! ```json
//! { "path": "/posts", "method": "POST", "body": {...}, "headers": {...}, "params": {...} }
//! ```
//!
//! `url` may be given instead of `path` to bypass the configured base URL.

use super::{base_query::BaseQuery, errors::QueryError, QueryContext};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Method};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{sync::Arc, time::Duration};
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpBaseQueryConfig {
    /// Prefix joined with descriptor paths.
    pub base_url: String,
    /// Maximum number of concurrent HTTP requests (default: 64)
    #[serde(default = "default_concurrent_limit")]
    pub concurrent_limit: usize,
    /// Connect timeout in milliseconds (default: 5000)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Headers sent with every request.
    #[serde(default)]
    pub default_headers: Vec<(String, String)>,
}

fn default_concurrent_limit() -> usize {
    64
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

impl HttpBaseQueryConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            concurrent_limit: default_concurrent_limit(),
            connect_timeout_ms: default_connect_timeout_ms(),
            default_headers: Vec::new(),
        }
    }
}

/// [`BaseQuery`] that performs JSON-over-HTTP requests.
pub struct HttpBaseQuery {
    client: Client,
    concurrent_limit: Arc<Semaphore>,
    config: HttpBaseQueryConfig,
}

/// A descriptor resolved into concrete request parts.
#[derive(Debug, PartialEq)]
struct HttpRequestParts {
    method: Method,
    url: String,
    body: Option<Value>,
    headers: Vec<(String, String)>,
    params: Vec<(String, String)>,
}

impl HttpBaseQuery {
    /// # Errors
    ///
    /// Returns [`QueryError::Network`] if the underlying reqwest client fails to build.
    pub fn new(config: HttpBaseQueryConfig) -> Result<Self, QueryError> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .use_rustls_tls()
            .user_agent(concat!("spectra/", env!("CARGO_PKG_VERSION")))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                QueryError::network(format!("HTTP client build failed: {e}"))
            })?;

        Ok(Self {
            client,
            concurrent_limit: Arc::new(Semaphore::new(config.concurrent_limit.max(1))),
            config,
        })
    }

    /// Maps reqwest failures onto short messages that do not leak URLs or addresses.
    fn sanitize_network_error(error: &reqwest::Error) -> String {
        if error.is_connect() {
            "connection refused or unreachable".to_string()
        } else if error.is_timeout() {
            "connection timed out".to_string()
        } else if error.is_request() {
            "request failed".to_string()
        } else if error.is_body() {
            "response body error".to_string()
        } else if error.is_redirect() {
            "too many redirects".to_string()
        } else {
            "network error".to_string()
        }
    }

    fn resolve(&self, descriptor: &Value) -> Result<HttpRequestParts, QueryError> {
        let invalid = |reason: &str| {
            QueryError::custom(serde_json::json!({ "error": "invalid request descriptor", "reason": reason }))
        };

        let object = match descriptor {
            Value::String(path) => {
                return Ok(HttpRequestParts {
                    method: Method::GET,
                    url: self.join(path),
                    body: None,
                    headers: Vec::new(),
                    params: Vec::new(),
                })
            }
            Value::Object(object) => object,
            _ => return Err(invalid("expected a path string or an object")),
        };

        let url = match (object.get("url"), object.get("path")) {
            (Some(Value::String(url)), _) => url.clone(),
            (_, Some(Value::String(path))) => self.join(path),
            _ => return Err(invalid("missing url or path")),
        };

        let method = match object.get("method") {
            None | Some(Value::Null) => Method::GET,
            Some(Value::String(m)) => {
                Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(|_| invalid("bad method"))?
            }
            Some(_) => return Err(invalid("method must be a string")),
        };

        Ok(HttpRequestParts {
            method,
            url,
            body: object.get("body").filter(|b| !b.is_null()).cloned(),
            headers: string_pairs(object.get("headers")),
            params: string_pairs(object.get("params")),
        })
    }

    fn join(&self, path: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        if path.is_empty() {
            base.to_string()
        } else if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }
}

fn string_pairs(value: Option<&Value>) -> Vec<(String, String)> {
    let Some(Value::Object(map)) = value else {
        return Vec::new();
    };
    map_to_pairs(map)
}

fn map_to_pairs(map: &Map<String, Value>) -> Vec<(String, String)> {
    map.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let rendered = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), rendered)
        })
        .collect()
}

#[async_trait]
impl BaseQuery for HttpBaseQuery {
    async fn execute(&self, request: Value, ctx: &QueryContext) -> Result<Value, QueryError> {
        let parts = self.resolve(&request)?;

        let _permit = Arc::clone(&self.concurrent_limit)
            .acquire_owned()
            .await
            .map_err(|_| QueryError::network("http client closed"))?;

        tracing::trace!(
            endpoint = %ctx.endpoint,
            request_id = %ctx.request_id,
            method = %parts.method,
            "http request started"
        );

        let mut builder = self.client.request(parts.method, &parts.url);
        for (name, value) in self.config.default_headers.iter().chain(parts.headers.iter()) {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !parts.params.is_empty() {
            builder = builder.query(&parts.params);
        }
        if let Some(body) = &parts.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                QueryError::Timeout
            } else {
                QueryError::network(Self::sanitize_network_error(&e))
            }
        })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| QueryError::network(Self::sanitize_network_error(&e)))?;

        let decoded = if bytes.is_empty() {
            Ok(Value::Null)
        } else {
            serde_json::from_slice::<Value>(&bytes)
        };

        if status.is_success() {
            decoded.map_err(|e| QueryError::parsing(e.to_string()))
        } else {
            let body =
                decoded.unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
            Err(QueryError::http(status.as_u16(), body))
        }
    }
}
