//! Bearer-authenticated HTTP client for Microsoft Graph

use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::auth::error::LifecycleError;

pub const GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Build the shared HTTP client. Every outbound call is bounded by `timeout`.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .user_agent(concat!("graph-playground/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

/// What came back from a resource call.
#[derive(Debug, Clone)]
pub struct ResourceResponse {
    pub status: u16,
    /// JSON body, or the raw text as a JSON string when it is not JSON
    pub body: serde_json::Value,
    pub latency_ms: u64,
}

impl ResourceResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A network failure, with the time spent before it happened.
#[derive(Debug)]
pub struct ResourceFailure {
    pub error: LifecycleError,
    pub latency_ms: u64,
}

/// Client for Graph resource calls.
#[derive(Clone)]
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
}

impl GraphClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: GRAPH_BASE.to_string(),
        }
    }

    /// Override the base URL (for testing with wiremock).
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// URL of the signed-in user's profile.
    pub fn me_url(&self) -> String {
        format!("{}/me", self.base_url)
    }

    /// GET `url` with a bearer credential, timing the round trip.
    pub async fn authenticated_get(
        &self,
        url: &str,
        bearer: &str,
    ) -> Result<ResourceResponse, ResourceFailure> {
        tracing::debug!("Graph GET {}", url);
        let started = Instant::now();

        let sent = self.http.get(url).bearer_auth(bearer).send().await;
        let resp = match sent {
            Ok(resp) => resp,
            Err(e) => {
                return Err(ResourceFailure {
                    error: e.into(),
                    latency_ms: elapsed_ms(started),
                })
            }
        };

        let status = resp.status().as_u16();
        let text = match resp.text().await {
            Ok(text) => text,
            Err(e) => {
                return Err(ResourceFailure {
                    error: e.into(),
                    latency_ms: elapsed_ms(started),
                })
            }
        };
        Ok(ResourceResponse {
            status,
            body: parse_body(&text),
            latency_ms: elapsed_ms(started),
        })
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Parse a response body as JSON, keeping non-JSON text as a string value.
pub(crate) fn parse_body(text: &str) -> serde_json::Value {
    if text.trim().is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_string()))
}

/// Base URL of a local port with nothing listening on it.
#[cfg(test)]
pub(crate) fn closed_port_uri() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

/// Base URL of a one-shot server that promises a longer body than it sends.
#[cfg(test)]
pub(crate) async fn truncated_body_uri() -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = socket.read(&mut buf).await;
        let _ = socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 100\r\n\r\n{\"id\"")
            .await;
        let _ = socket.shutdown().await;
    });
    format!("http://{}", addr)
}
