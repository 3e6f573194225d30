//! Fetch quota data from a verified language server.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

use super::parser::parse_user_status;
use super::types::QuotaSnapshot;
use crate::protocol::{
    metadata_body, service_headers, HttpTransport, ProtocolClient, ProtocolError, USER_STATUS_PATH,
};
use crate::types::ConnectionDescriptor;

/// Sender for quota snapshot updates
pub type QuotaSnapshotSender = watch::Sender<QuotaSnapshot>;
/// Receiver for quota snapshot updates
pub type QuotaSnapshotReceiver = watch::Receiver<QuotaSnapshot>;

/// Create a watch channel for quota data
pub fn quota_channel() -> (QuotaSnapshotSender, QuotaSnapshotReceiver) {
    watch::channel(QuotaSnapshot::default())
}

/// Why a quota fetch failed
#[derive(Debug, Error)]
pub enum QuotaError {
    /// Token rejected; the server restarted with a new token
    #[error("language server rejected the token (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("language server returned HTTP {status}")]
    Status { status: u16 },

    #[error(transparent)]
    Transport(#[from] ProtocolError),

    #[error("invalid GetUserStatus response: {0}")]
    Parse(#[from] serde_json::Error),
}

impl QuotaError {
    /// The descriptor is stale and discovery must run again
    pub fn needs_rediscovery(&self) -> bool {
        matches!(self, QuotaError::Unauthorized { .. } | QuotaError::Transport(_))
    }
}

/// Issues `GetUserStatus` requests
pub struct QuotaClient<T> {
    client: ProtocolClient<T>,
    path: String,
    timeout: Duration,
}

impl<T: HttpTransport> QuotaClient<T> {
    pub fn new(client: ProtocolClient<T>) -> Self {
        Self {
            client,
            path: USER_STATUS_PATH.to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetch the current quotas from `host` using a verified descriptor
    pub async fn fetch(
        &self,
        host: &str,
        descriptor: &ConnectionDescriptor,
    ) -> Result<QuotaSnapshot, QuotaError> {
        let response = self
            .client
            .request(
                host,
                descriptor.port(),
                &self.path,
                &service_headers(descriptor.csrf_token()),
                &metadata_body(),
                self.timeout,
            )
            .await?;

        if response.is_auth_failure() {
            return Err(QuotaError::Unauthorized {
                status: response.status_code,
            });
        }
        if !response.is_success() {
            return Err(QuotaError::Status {
                status: response.status_code,
            });
        }

        let snapshot = parse_user_status(&response.data)?;
        debug!(
            "Quota fetch: {} model(s) from {}:{} over {}",
            snapshot.models.len(),
            host,
            descriptor.port(),
            response.protocol.scheme()
        );
        Ok(snapshot)
    }
}
