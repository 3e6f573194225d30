//! Core library for lsquota.
//!
//! Finds the language server process spawned by the host IDE, verifies which
//! of its listening ports accepts the CSRF token from its command line, and
//! fetches model quota data from it.

pub mod config;
pub mod finder;
pub mod platform;
pub mod protocol;
pub mod quota;
pub mod retry;
pub mod runner;
pub mod types;
pub mod workspace;

#[cfg(test)]
pub(crate) mod testing;

pub use finder::{
    DetectFailure, DetectOptions, DetectOutcome, Detection, DiscoveryLogger, FinderSettings,
    NoopLogger, ProcessFinder, ProcessIdentity, TracingLogger,
};
pub use platform::Platform;
pub use protocol::{Protocol, ProtocolCache, ProtocolClient, ReqwestTransport};
pub use types::{
    AttemptRecord, ConnectionDescriptor, DiscoveryDiagnostics, FailureReason, PortSource,
    ProcessCandidate,
};
