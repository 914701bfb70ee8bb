//! HTTP client for relaying requests to third-party APIs.
//!
//! The relay never interprets, retries or reshapes what comes back: status,
//! content type and body bytes are handed to the caller as-is. Header values
//! are forwarded verbatim and never logged.

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use reqwest::header::{HeaderMap, InvalidHeaderValue};
use reqwest::Method;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("upstream unreachable")]
    Unreachable,
    #[error("upstream timed out")]
    Timeout,
    #[error("upstream returned invalid JSON")]
    InvalidJson,
}

impl RelayError {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            RelayError::Unreachable => "unreachable",
            RelayError::Timeout => "timeout",
            RelayError::InvalidJson => "invalid_json",
        }
    }
}

/// Outbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayBody {
    Empty,
    Json(serde_json::Value),
    /// `application/x-www-form-urlencoded` fields, used by the OAuth code exchange.
    Form(Vec<(String, String)>),
}

/// One outbound call. Built per request, never stored.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: RelayBody,
}

impl RelayRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: RelayBody::Empty,
        }
    }

    pub fn post_json(url: Url, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            url,
            headers: HeaderMap::new(),
            body: RelayBody::Json(body),
        }
    }

    /// Attach `Authorization: Bearer <key>`, marked sensitive so it is
    /// redacted from any `Debug` output.
    pub fn bearer(mut self, key: &str) -> Result<Self, InvalidHeaderValue> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", key))?;
        value.set_sensitive(true);
        self.headers.insert(header::AUTHORIZATION, value);
        Ok(self)
    }
}

/// What the upstream answered, unmodified.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Decode the body as JSON, for the few places the gateway must read it.
    pub fn json(&self) -> Result<serde_json::Value, RelayError> {
        serde_json::from_slice(&self.body).map_err(|_| RelayError::InvalidJson)
    }
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let content_type = self
            .content_type
            .as_deref()
            .and_then(|ct| HeaderValue::from_str(ct).ok())
            .unwrap_or(HeaderValue::from_static("application/json"));

        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, content_type);
        response
    }
}

#[derive(Clone)]
pub struct RelayClient {
    client: reqwest::Client,
}

impl RelayClient {
    /// `timeout` bounds the whole exchange, body included.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(32)
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .user_agent(concat!("autogate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub async fn relay(&self, req: RelayRequest) -> Result<UpstreamResponse, RelayError> {
        let RelayRequest {
            method,
            url,
            headers,
            body,
        } = req;

        tracing::debug!(
            method = %method,
            host = url.host_str().unwrap_or(""),
            path = url.path(),
            headers = ?headers.keys().map(|k| k.as_str()).collect::<Vec<_>>(),
            "relaying upstream request"
        );

        let builder = self.client.request(method, url).headers(headers);
        let builder = match body {
            RelayBody::Empty => builder,
            RelayBody::Json(value) => builder.json(&value),
            RelayBody::Form(fields) => builder.form(&fields),
        };

        let resp = builder.send().await.map_err(classify)?;

        let status = StatusCode::from_u16(resp.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = resp.bytes().await.map_err(classify)?;

        tracing::debug!(status = status.as_u16(), bytes = body.len(), "upstream responded");

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}

fn classify(e: reqwest::Error) -> RelayError {
    if e.is_timeout() {
        tracing::warn!("upstream request timed out");
        RelayError::Timeout
    } else {
        // Webhook URLs may embed tokens in the query string.
        tracing::warn!("upstream request failed: {}", e.without_url());
        RelayError::Unreachable
    }
}
