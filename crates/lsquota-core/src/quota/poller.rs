//! Periodic quota polling with rediscovery.

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use super::fetcher::{quota_channel, QuotaClient, QuotaSnapshotReceiver, QuotaSnapshotSender};
use super::types::QuotaSnapshot;
use crate::finder::{DetectOptions, ProcessFinder};
use crate::protocol::HttpTransport;
use crate::runner::CommandRunner;
use crate::types::ConnectionDescriptor;

/// Upper bound of the extra delay added after consecutive errors
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// A verified server and the host it answered on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub descriptor: ConnectionDescriptor,
}

/// Polls quotas, rediscovering the server when its descriptor goes stale
pub struct QuotaPoller<R, T> {
    finder: ProcessFinder<R, T>,
    client: QuotaClient<T>,
    options: DetectOptions,
    interval: Duration,
    endpoint: Option<Endpoint>,
}

impl<R, T> QuotaPoller<R, T>
where
    R: CommandRunner + 'static,
    T: HttpTransport + 'static,
{
    pub fn new(
        finder: ProcessFinder<R, T>,
        client: QuotaClient<T>,
        options: DetectOptions,
        interval: Duration,
    ) -> Self {
        Self {
            finder,
            client,
            options,
            interval,
            endpoint: None,
        }
    }

    /// Endpoint currently in use
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// Start polling in the background
    pub fn start(self) -> QuotaSnapshotReceiver {
        let (tx, rx) = quota_channel();
        tokio::spawn(async move {
            self.run(tx).await;
        });
        rx
    }

    /// Run the polling loop until every receiver is dropped
    pub async fn run(mut self, tx: QuotaSnapshotSender) {
        let mut backoff = Duration::ZERO;

        loop {
            tx.send_modify(|s| s.fetching = true);

            match self.poll_once().await {
                Ok(snapshot) => {
                    backoff = Duration::ZERO;
                    if tx.send(snapshot).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    warn!("Quota poll failed: {}", message);
                    tx.send_modify(|s| {
                        s.fetching = false;
                        s.error = Some(message);
                    });
                    backoff = if backoff.is_zero() {
                        self.interval
                    } else {
                        (backoff * 2).min(MAX_BACKOFF)
                    };
                }
            }

            if tx.is_closed() {
                break;
            }
            let delay = self.interval.saturating_add(backoff);
            debug!("Next quota poll in {}ms", delay.as_millis());
            tokio::time::sleep(delay).await;
        }
    }

    /// Discover the server if needed, then fetch quotas once
    pub async fn poll_once(&mut self) -> Result<QuotaSnapshot> {
        let endpoint = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => {
                let endpoint = self.discover().await?;
                self.endpoint = Some(endpoint.clone());
                endpoint
            }
        };

        match self.client.fetch(&endpoint.host, &endpoint.descriptor).await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                if e.needs_rediscovery() {
                    info!("Quota fetch failed ({}), rediscovering on next poll", e);
                    self.endpoint = None;
                }
                Err(e.into())
            }
        }
    }

    async fn discover(&self) -> Result<Endpoint> {
        match self.finder.detect(&self.options).await {
            Ok(detection) => {
                // The last probe is the one that succeeded
                let host = detection
                    .diagnostics
                    .attempts
                    .last()
                    .map(|a| a.host.clone())
                    .unwrap_or_else(|| self.finder.settings().host.clone());
                info!(
                    "Language server found on {}:{}",
                    host,
                    detection.descriptor.port()
                );
                Ok(Endpoint {
                    host,
                    descriptor: detection.descriptor,
                })
            }
            Err(failure) => anyhow::bail!(
                "{} ({})",
                failure.reason.user_message(),
                failure.reason
            ),
        }
    }
}
