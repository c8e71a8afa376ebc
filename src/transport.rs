//! GET-only HTTP transport
//!
//! The client never talks to `reqwest` directly; it goes through
//! [`Transport`] so tests can script responses and failures.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Client, Url};
use thiserror::Error;

/// Status and body of a completed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failures that happen before a status code is available
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// No complete response within the allotted time
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Could not reach the remote host
    #[error("connection failed: {0}")]
    Connect(String),

    /// Any other transport-level failure
    #[error("transport failure: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(Duration::ZERO)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

/// Issues GET requests
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn get(
        &self,
        url: &Url,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;
}

/// [`Transport`] backed by a `reqwest` client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestTransport {
    /// Create a transport with a default HTTP client
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Create a transport with a custom HTTP client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(
        &self,
        url: &Url,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let classify = |err: reqwest::Error| match TransportError::from(err) {
            TransportError::Timeout(_) => TransportError::Timeout(timeout),
            other => other,
        };

        let response = self
            .client
            .get(url.clone())
            .headers(headers.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(classify)?;

        Ok(TransportResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, USER_AGENT};

    #[test]
    fn test_success_range() {
        assert!(TransportResponse::new(200, "ok").is_success());
        assert!(TransportResponse::new(204, "").is_success());
        assert!(!TransportResponse::new(304, "").is_success());
        assert!(!TransportResponse::new(429, "").is_success());
        assert!(!TransportResponse::new(503, "").is_success());
    }

    #[tokio::test]
    async fn test_reqwest_transport_returns_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/cards/random")
            .match_header("user-agent", "steadyfetch-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"name":"Llanowar Elves"}"#)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/cards/random", server.url())).expect("valid url");
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("steadyfetch-test"));

        let response = ReqwestTransport::new()
            .get(&url, &headers, Duration::from_secs(5))
            .await
            .expect("request should succeed");

        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], br#"{"name":"Llanowar Elves"}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_reqwest_transport_passes_error_status_through() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .with_body("not found")
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/missing", server.url())).expect("valid url");
        let response = ReqwestTransport::new()
            .get(&url, &HeaderMap::new(), Duration::from_secs(5))
            .await
            .expect("status codes are not transport errors");

        assert_eq!(response.status, 404);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_reqwest_transport_reports_connection_failure() {
        // Port 9 (discard) on localhost is not expected to be listening
        let url = Url::parse("http://127.0.0.1:9/").expect("valid url");
        let err = ReqwestTransport::new()
            .get(&url, &HeaderMap::new(), Duration::from_secs(5))
            .await
            .expect_err("nothing is listening");

        assert!(matches!(
            err,
            TransportError::Connect(_) | TransportError::Other(_) | TransportError::Timeout(_)
        ));
    }
}
