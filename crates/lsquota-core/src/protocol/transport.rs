//! HTTP transport used by [`ProtocolClient`](super::ProtocolClient).

use std::future::Future;
use std::time::Duration;

use super::ProtocolError;

/// A single POST request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Full URL including scheme, host and port
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
    pub timeout: Duration,
}

/// Status and body of a response, whatever the status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Sends POST requests; swapped for a scripted fake in tests
pub trait HttpTransport: Send + Sync {
    fn post(
        &self,
        request: &HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, ProtocolError>> + Send;
}

/// reqwest-backed transport.
///
/// The language server serves HTTPS with a self-signed certificate on
/// loopback, so certificate verification is disabled. Proxies are bypassed.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, ProtocolError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .no_proxy()
            .build()
            .map_err(|e| ProtocolError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    async fn post(&self, request: &HttpRequest) -> Result<HttpResponse, ProtocolError> {
        let mut builder = self
            .client
            .post(&request.url)
            .timeout(request.timeout)
            // Content-Type comes with the caller's headers
            .body(request.body.to_string());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProtocolError::Timeout {
                    url: request.url.clone(),
                    timeout: request.timeout,
                }
            } else {
                ProtocolError::Transport {
                    url: request.url.clone(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ProtocolError::Transport {
                url: request.url.clone(),
                message: e.to_string(),
            })?;

        Ok(HttpResponse { status, body })
    }
}
