//! Forward an arbitrary request to a resource server with a bearer token
//!
//! Used by the API explorer. The relay knows nothing about the token's
//! lifecycle; it attaches whatever credential it is given.

use std::collections::BTreeMap;
use std::time::Instant;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use super::client::{elapsed_ms, parse_body, GraphClient};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Token is required")]
    MissingToken,

    #[error("URL is required")]
    MissingUrl,

    #[error("Unsupported method: {0}")]
    InvalidMethod(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid header {0}")]
    InvalidHeader(String),

    #[error("No value given for path parameter {{{0}}}")]
    MissingParameter(String),

    #[error("{message}")]
    Network { message: String, response_time: u64 },
}

/// A request to forward.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    #[serde(default = "default_method")]
    pub method: String,
    /// Absolute URL, or a path relative to the Graph base
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub token: Option<String>,
    /// Values for `{name}` placeholders in `url`
    #[serde(default)]
    pub path_params: BTreeMap<String, String>,
    /// Appended to the query string
    #[serde(default)]
    pub query: BTreeMap<String, String>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// What the resource server answered.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
    pub data: serde_json::Value,
    pub response_time: u64,
    /// Set when the server answered with an error status
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
}

/// Names of the `{name}` placeholders in `template`, in order of appearance.
pub fn path_parameters(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else { break };
        let name = after[..close].trim();
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
        rest = &after[close + 1..];
    }
    names
}

/// Substitute every placeholder in `template`.
pub fn expand_path(
    template: &str,
    params: &BTreeMap<String, String>,
) -> Result<String, RelayError> {
    let mut expanded = template.to_string();
    for name in path_parameters(template) {
        let value = params
            .get(&name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RelayError::MissingParameter(name.clone()))?;
        let encoded: String = url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
        expanded = expanded.replace(&format!("{{{}}}", name), &encoded);
    }
    Ok(expanded)
}

/// Resolve `path` against `base` unless it is already absolute, then append `query`.
pub fn resolve_url(
    base: &str,
    path: &str,
    query: &BTreeMap<String, String>,
) -> Result<Url, RelayError> {
    let path = path.trim();
    let joined = if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };

    let mut url = Url::parse(&joined).map_err(|e| RelayError::InvalidUrl(format!("{}: {}", joined, e)))?;
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query.iter());
    }
    Ok(url)
}

fn build_headers(token: &str, extra: &BTreeMap<String, String>) -> Result<HeaderMap, RelayError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| RelayError::InvalidHeader("Authorization".to_string()))?;
    headers.insert(AUTHORIZATION, bearer);

    for (name, value) in extra {
        let header = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| RelayError::InvalidHeader(name.clone()))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| RelayError::InvalidHeader(name.clone()))?;
        headers.insert(header, value);
    }
    Ok(headers)
}

fn carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

impl GraphClient {
    /// Forward `request`. Error statuses are answered, not failed; only
    /// transport failures return [`RelayError::Network`].
    pub async fn relay(&self, request: RelayRequest) -> Result<RelayResponse, RelayError> {
        let token = request
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(RelayError::MissingToken)?;
        if request.url.trim().is_empty() {
            return Err(RelayError::MissingUrl);
        }

        let method = Method::from_bytes(request.method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| RelayError::InvalidMethod(request.method.clone()))?;
        let path = expand_path(&request.url, &request.path_params)?;
        let url = resolve_url(self.base_url(), &path, &request.query)?;
        let headers = build_headers(token, &request.headers)?;

        let mut builder = self.http().request(method.clone(), url.clone()).headers(headers);
        match request.body {
            Some(serde_json::Value::Null) | None => {}
            Some(_) if !carries_body(&method) => {}
            Some(serde_json::Value::String(text)) => builder = builder.body(text),
            Some(body) => builder = builder.body(body.to_string()),
        }

        tracing::info!("Making {} request to {}", method, url);
        let started = Instant::now();
        let resp = builder.send().await.map_err(|e| {
            tracing::warn!("Request error: {}", e);
            RelayError::Network {
                message: e.to_string(),
                response_time: elapsed_ms(started),
            }
        })?;

        let status = resp.status();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let text = resp.text().await.map_err(|e| {
            tracing::warn!("Failed to read response body: {}", e);
            RelayError::Network {
                message: e.to_string(),
                response_time: elapsed_ms(started),
            }
        })?;
        let response_time = elapsed_ms(started);

        if status.is_success() {
            tracing::info!("Request successful: {}", status.as_u16());
        } else {
            tracing::warn!("Request failed with status: {}", status.as_u16());
        }

        Ok(RelayResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            data: parse_body(&text),
            response_time,
            error: !status.is_success(),
        })
    }
}
