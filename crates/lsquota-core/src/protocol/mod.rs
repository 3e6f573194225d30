//! Request primitive for the language server's Connect-JSON API.
//!
//! The server listens on HTTPS on some machines and plaintext HTTP on
//! others. Every request tries HTTPS first and falls back to HTTP on the
//! same port; the protocol that answered is remembered per `host:port`.

mod transport;

pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Service prefix shared by all language server RPCs
pub const SERVICE_PATH: &str = "/exa.language_server_pb.LanguageServerService";

/// Cheap RPC used to check that a port and token are live
pub const VERIFY_PATH: &str = "/exa.language_server_pb.LanguageServerService/GetUnleashData";

/// RPC returning the user's plan and model quotas
pub const USER_STATUS_PATH: &str = "/exa.language_server_pb.LanguageServerService/GetUserStatus";

/// Header carrying the CSRF token from the process command line
pub const CSRF_HEADER: &str = "X-Codeium-Csrf-Token";

/// Scheme a response arrived over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Https,
    Http,
}

impl Protocol {
    pub fn scheme(self) -> &'static str {
        match self {
            Protocol::Https => "https",
            Protocol::Http => "http",
        }
    }

    /// The protocol to fall back to
    pub fn other(self) -> Self {
        match self {
            Protocol::Https => Protocol::Http,
            Protocol::Http => Protocol::Https,
        }
    }
}

/// Transport-level failure; HTTP error statuses are not errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Connection refused, TLS mismatch, reset, ...
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    /// No response within the per-attempt timeout
    #[error("request to {url} timed out after {}ms", timeout.as_millis())]
    Timeout { url: String, timeout: Duration },

    /// The HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Headers required by every language server RPC
pub fn service_headers(csrf_token: &str) -> Vec<(String, String)> {
    vec![
        ("Content-Type".to_string(), "application/json".to_string()),
        ("Connect-Protocol-Version".to_string(), "1".to_string()),
        (CSRF_HEADER.to_string(), csrf_token.to_string()),
    ]
}

/// Request body carrying the client metadata the server expects
pub fn metadata_body() -> serde_json::Value {
    serde_json::json!({
        "metadata": {
            "ideName": "antigravity",
            "extensionName": "antigravity",
            "locale": "en"
        }
    })
}

/// Response of a [`ProtocolClient::request`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolResponse {
    pub status_code: u16,
    pub data: String,
    pub protocol: Protocol,
}

impl ProtocolResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// 401/403: the port is right but the token was rejected
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status_code, 401 | 403)
    }
}

/// Which protocol last produced a response, keyed by `host:port`
#[derive(Debug, Default)]
pub struct ProtocolCache {
    entries: Mutex<HashMap<String, Protocol>>,
}

static GLOBAL_CACHE: Lazy<Arc<ProtocolCache>> = Lazy::new(|| Arc::new(ProtocolCache::default()));

impl ProtocolCache {
    /// Process-wide cache shared by all clients created with [`ProtocolClient::new`]
    pub fn global() -> Arc<Self> {
        GLOBAL_CACHE.clone()
    }

    pub fn get(&self, host: &str, port: u16) -> Option<Protocol> {
        self.entries.lock().get(&cache_key(host, port)).copied()
    }

    pub fn remember(&self, host: &str, port: u16, protocol: Protocol) {
        self.entries.lock().insert(cache_key(host, port), protocol);
    }

    pub fn forget(&self, host: &str, port: u16) {
        self.entries.lock().remove(&cache_key(host, port));
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

fn cache_key(host: &str, port: u16) -> String {
    format!("{}:{}", host, port)
}

/// Issues POST requests with HTTPS→HTTP fallback
pub struct ProtocolClient<T> {
    transport: T,
    cache: Arc<ProtocolCache>,
}

impl ProtocolClient<ReqwestTransport> {
    /// Client over reqwest using the process-wide protocol cache
    pub fn system() -> Result<Self, ProtocolError> {
        Ok(Self::new(ReqwestTransport::new()?))
    }
}

impl<T: HttpTransport> ProtocolClient<T> {
    /// Client using the process-wide protocol cache
    pub fn new(transport: T) -> Self {
        Self::with_cache(transport, ProtocolCache::global())
    }

    /// Client with its own cache (tests)
    pub fn with_cache(transport: T, cache: Arc<ProtocolCache>) -> Self {
        Self { transport, cache }
    }

    pub fn cache(&self) -> &ProtocolCache {
        &self.cache
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// POST `body` to `host:port` + `path`.
    ///
    /// Tries the remembered protocol (HTTPS if none), then the other one.
    /// `timeout` bounds each attempt separately. Any HTTP status counts as a
    /// response; only transport failures trigger the fallback.
    pub async fn request(
        &self,
        host: &str,
        port: u16,
        path: &str,
        headers: &[(String, String)],
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<ProtocolResponse, ProtocolError> {
        let first = self.cache.get(host, port).unwrap_or(Protocol::Https);

        let first_err = match self
            .attempt(first, host, port, path, headers, body, timeout)
            .await
        {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };
        debug!(
            "{} to {}:{} failed ({}), trying {}",
            first.scheme(),
            host,
            port,
            first_err,
            first.other().scheme()
        );

        match self
            .attempt(first.other(), host, port, path, headers, body, timeout)
            .await
        {
            Ok(response) => Ok(response),
            Err(e) => {
                self.cache.forget(host, port);
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        protocol: Protocol,
        host: &str,
        port: u16,
        path: &str,
        headers: &[(String, String)],
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<ProtocolResponse, ProtocolError> {
        let request = HttpRequest {
            url: format!("{}://{}:{}{}", protocol.scheme(), host, port, path),
            headers: headers.to_vec(),
            body: body.clone(),
            timeout,
        };

        let response = match tokio::time::timeout(timeout, self.transport.post(&request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ProtocolError::Timeout {
                    url: request.url,
                    timeout,
                })
            }
        };

        self.cache.remember(host, port, protocol);
        Ok(ProtocolResponse {
            status_code: response.status,
            data: response.body,
            protocol,
        })
    }
}
