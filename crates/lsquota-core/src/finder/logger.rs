//! Logging capability handed to the finder.

use tracing::{debug, error, info, warn};

/// Sink for discovery progress messages
pub trait DiscoveryLogger: Send + Sync {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Discards everything; the default when no logger is supplied
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl DiscoveryLogger for NoopLogger {
    fn debug(&self, _message: &str) {}
    fn info(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

/// Forwards to `tracing` under the `lsquota::discovery` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl DiscoveryLogger for TracingLogger {
    fn debug(&self, message: &str) {
        debug!(target: "lsquota::discovery", "{}", message);
    }

    fn info(&self, message: &str) {
        info!(target: "lsquota::discovery", "{}", message);
    }

    fn warn(&self, message: &str) {
        warn!(target: "lsquota::discovery", "{}", message);
    }

    fn error(&self, message: &str) {
        error!(target: "lsquota::discovery", "{}", message);
    }
}
