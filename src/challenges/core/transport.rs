//! Transport abstraction used by every remote call.
//!
//! The recovery layer never talks to `reqwest` directly. It hands a
//! [`SignedRequest`] to an [`HttpTransport`] and receives a
//! [`TransportResponse`], which keeps the protocol logic testable with stub
//! transports.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::timeout;
use url::Url;

use super::types::SignedRequest;

/// Contract that abstracts the HTTP primitive.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: &SignedRequest) -> Result<TransportResponse, TransportError>;
}

/// Minimal response representation returned by the transport abstraction.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub url: Url,
}

impl TransportResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_slice(&self.body).map_err(|err| TransportError::Decode(err.to_string()))
    }
}

/// Failures below the protocol layer: connection, deadline, or body decoding.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http transport error: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to decode response body: {0}")]
    Decode(String),
    #[error("invalid header '{0}'")]
    InvalidHeader(String),
}

/// Runs a request under an explicit deadline.
pub async fn execute_with_deadline(
    transport: &dyn HttpTransport,
    request: &SignedRequest,
    deadline: Duration,
) -> Result<TransportResponse, TransportError> {
    match timeout(deadline, transport.execute(request)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    struct SlowTransport;

    #[async_trait]
    impl HttpTransport for SlowTransport {
        async fn execute(
            &self,
            request: &SignedRequest,
        ) -> Result<TransportResponse, TransportError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(TransportResponse {
                status: 200,
                headers: HeaderMap::new(),
                body: Bytes::new(),
                url: request.url.clone(),
            })
        }
    }

    #[tokio::test]
    async fn deadline_maps_to_timeout() {
        let request = SignedRequest::get(
            Url::parse("https://example.com/note").unwrap(),
            HeaderMap::new(),
        );
        let err = execute_with_deadline(&SlowTransport, &request, Duration::from_millis(20))
            .await
            .expect_err("should time out");
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[test]
    fn json_and_header_helpers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-trace-id", HeaderValue::from_static("trace-1"));
        let response = TransportResponse {
            status: 200,
            headers,
            body: Bytes::from_static(br#"{"retcode":0}"#),
            url: Url::parse("https://example.com").unwrap(),
        };
        assert_eq!(response.header("x-trace-id"), Some("trace-1"));
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["retcode"], 0);

        let broken = TransportResponse {
            body: Bytes::from_static(b"<html>"),
            ..response
        };
        assert!(matches!(
            broken.json::<serde_json::Value>(),
            Err(TransportError::Decode(_))
        ));
    }
}
