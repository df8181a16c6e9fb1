//! Reqwest-based implementation of the `HttpTransport` trait.
//!
//! Provides a thin adapter around `reqwest::Client` that converts between the
//! shared HTTP representations used by the signing layer and the concrete
//! transport.

use async_trait::async_trait;
use http::{
    HeaderMap as HttpHeaderMap, HeaderName as HttpHeaderName, HeaderValue as HttpHeaderValue,
};
use reqwest::{Client, Method, header::HeaderMap};

use super::transport::{HttpTransport, TransportError, TransportResponse};
use super::types::SignedRequest;

/// Reqwest-backed transport used for all platform calls.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Creates a new client. The cookie jar is disabled because every request
    /// carries an explicit, per-account `Cookie` header.
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .cookie_store(false)
            .build()
            .map_err(|err| TransportError::Transport(err.to_string()))?;

        Ok(Self { client })
    }

    /// Wrap an existing reqwest client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &SignedRequest) -> Result<TransportResponse, TransportError> {
        let req_method = Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|err| TransportError::Transport(err.to_string()))?;
        let req_headers = convert_headers(&request.headers)?;

        let mut builder = self
            .client
            .request(req_method, request.url.as_str())
            .headers(req_headers);

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|err| TransportError::Transport(err.to_string()))?;

        to_transport_response(response).await
    }
}

fn convert_headers(headers: &HttpHeaderMap) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers.iter() {
        let name = reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes())
            .map_err(|_| TransportError::InvalidHeader(name.to_string()))?;
        let value = reqwest::header::HeaderValue::from_bytes(value.as_bytes())
            .map_err(|_| TransportError::InvalidHeader(name.to_string()))?;
        map.insert(name, value);
    }
    Ok(map)
}

async fn to_transport_response(
    response: reqwest::Response,
) -> Result<TransportResponse, TransportError> {
    let status = response.status().as_u16();
    let headers = convert_back_headers(response.headers())?;
    let url = response.url().clone();
    let body = response
        .bytes()
        .await
        .map_err(|err| TransportError::Transport(err.to_string()))?;

    Ok(TransportResponse {
        status,
        headers,
        body,
        url,
    })
}

fn convert_back_headers(map: &HeaderMap) -> Result<HttpHeaderMap, TransportError> {
    let mut headers = HttpHeaderMap::new();
    for (name, value) in map.iter() {
        let http_name = HttpHeaderName::from_bytes(name.as_str().as_bytes())
            .map_err(|_| TransportError::InvalidHeader(name.to_string()))?;
        let http_value = HttpHeaderValue::from_bytes(value.as_bytes())
            .map_err(|_| TransportError::InvalidHeader(name.to_string()))?;
        headers.append(http_name, http_value);
    }
    Ok(headers)
}
