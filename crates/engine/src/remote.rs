// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Remote API abstraction.
//!
//! Provides a trait-based client layer that enables:
//! - Real HTTP requests for production
//! - Mock clients for unit testing
//!
//! Network failures are errors; HTTP error statuses are responses. The
//! drain loop classifies the two differently (retry vs. drop), so the
//! client must never collapse them.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use beat_core::Method;

/// Error type for remote API operations: the request never produced an
/// HTTP response.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Connection failed or was interrupted.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The request timed out client-side.
    #[error("timed out: {0}")]
    Timeout(String),
}

/// Result type for remote API operations.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// A single request to the remote API.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base URL.
    pub path: String,
    pub body: Option<serde_json::Value>,
    /// Idempotency token, sent as the `Idempotency-Key` header. The same
    /// token is resent on every delivery attempt of the same queue entry.
    pub idempotency_key: Option<String>,
}

impl ApiRequest {
    /// A GET request with no body.
    pub fn get(path: impl Into<String>) -> Self {
        ApiRequest {
            method: Method::Get,
            path: path.into(),
            body: None,
            idempotency_key: None,
        }
    }

    /// A request carrying a JSON body.
    pub fn with_body(method: Method, path: impl Into<String>, body: serde_json::Value) -> Self {
        ApiRequest {
            method,
            path: path.into(),
            body: Some(body),
            idempotency_key: None,
        }
    }

    /// Attach an idempotency token.
    pub fn idempotent(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// An HTTP response from the remote API.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    /// Parsed JSON body, or `Null` when the body is empty or not JSON.
    pub body: serde_json::Value,
}

impl ApiResponse {
    /// 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The session is no longer valid.
    pub fn is_auth_expired(&self) -> bool {
        self.status == 401
    }

    /// 5xx: the server failed, the operation may succeed later.
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}

/// Remote API trait.
///
/// This trait abstracts over the actual HTTP mechanism, allowing for easy
/// testing with mock implementations.
pub trait RemoteApi: Send + Sync {
    /// Perform a request against the remote API.
    fn request(
        &self,
        req: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = ApiResult<ApiResponse>> + Send + '_>>;
}

/// HTTP client implementation using reqwest.
pub struct HttpApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpApi {
    /// Create a client for the given API base URL.
    ///
    /// The connect timeout is deliberately short: a dead network should be
    /// classified quickly so queued work waits for the next cycle instead
    /// of stalling this one.
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        HttpApi {
            base_url: base_url.into(),
            client,
        }
    }
}

impl RemoteApi for HttpApi {
    fn request(
        &self,
        req: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = ApiResult<ApiResponse>> + Send + '_>> {
        Box::pin(async move {
            let url = format!(
                "{}/{}",
                self.base_url.trim_end_matches('/'),
                req.path.trim_start_matches('/')
            );

            let mut builder = match req.method {
                Method::Get => self.client.get(&url),
                Method::Post => self.client.post(&url),
                Method::Put => self.client.put(&url),
            };

            if let Some(key) = &req.idempotency_key {
                builder = builder.header("Idempotency-Key", key.as_str());
            }
            if let Some(body) = &req.body {
                builder = builder.json(body);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    ApiError::Timeout(e.to_string())
                } else {
                    ApiError::Unreachable(e.to_string())
                }
            })?;

            let status = response.status().as_u16();
            let body = response
                .json::<serde_json::Value>()
                .await
                .unwrap_or(serde_json::Value::Null);

            Ok(ApiResponse { status, body })
        })
    }
}

#[cfg(test)]
#[path = "remote_tests.rs"]
mod tests;
