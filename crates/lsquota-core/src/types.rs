//! Data model shared by discovery, verification and reporting.

use std::fmt;

use serde::Serialize;

use crate::protocol::Protocol;

/// A process that plausibly is the language server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessCandidate {
    /// Process ID
    pub pid: u32,
    /// Parent process ID, when the listing tool reports it
    pub ppid: Option<u32>,
    /// Port from `--extension_server_port` (0 = unknown, discover via port listing)
    pub extension_port: u16,
    /// Value of `--csrf_token` (never empty)
    pub csrf_token: String,
    /// Value of `--workspace_id`, if present
    pub workspace_id: Option<String>,
    /// Value of `--app_data_dir`, if present
    pub app_data_dir: Option<String>,
}

impl ProcessCandidate {
    /// Port declared on the command line, if any
    pub fn declared_port(&self) -> Option<u16> {
        (self.extension_port != 0).then_some(self.extension_port)
    }
}

/// Verified `(port, token)` pair sufficient to issue authenticated requests.
///
/// Fields are read-only once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionDescriptor {
    port: u16,
    csrf_token: String,
}

impl ConnectionDescriptor {
    /// Returns `None` for port 0 or an empty token
    pub fn new(port: u16, csrf_token: impl Into<String>) -> Option<Self> {
        let csrf_token = csrf_token.into();
        if port == 0 || csrf_token.is_empty() {
            return None;
        }
        Some(Self { port, csrf_token })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn csrf_token(&self) -> &str {
        &self.csrf_token
    }
}

/// Where a probed port came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortSource {
    /// `--extension_server_port` on the process command line
    Cmdline,
    /// OS port listing (lsof / ss / netstat)
    Netstat,
}

/// One verification probe, kept for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub pid: u32,
    pub port: u16,
    /// Host the probe was sent to (loopback or WSL gateway)
    pub host: String,
    /// HTTP status, `None` when neither protocol produced a response
    pub status_code: Option<u16>,
    /// Protocol that produced the response
    pub protocol: Option<Protocol>,
    pub port_source: PortSource,
    pub error: Option<String>,
}

/// Categorized reason for a failed discovery cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No candidate process found by any enumeration strategy
    NoProcess,
    /// Reserved; the ranking always resolves to a single path
    Ambiguous,
    /// Candidates found, but no port accepted the handshake
    NoPort,
    /// A port answered but rejected the token (401/403)
    AuthFailed,
    /// All candidates belong to a different workspace
    WorkspaceMismatch,
}

impl FailureReason {
    /// Actionable one-line message for notifications
    pub fn user_message(&self) -> &'static str {
        match self {
            FailureReason::NoProcess => {
                "Language server not found. Make sure the IDE is running with a workspace open."
            }
            FailureReason::Ambiguous => {
                "Several language servers are running and none could be chosen."
            }
            FailureReason::NoPort => {
                "Language server found, but none of its ports answered. It may still be starting."
            }
            FailureReason::AuthFailed => {
                "Language server rejected the CSRF token. Restart the IDE and try again."
            }
            FailureReason::WorkspaceMismatch => {
                "Language servers are running, but none belongs to this workspace."
            }
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::NoProcess => "no_process",
            FailureReason::Ambiguous => "ambiguous",
            FailureReason::NoPort => "no_port",
            FailureReason::AuthFailed => "auth_failed",
            FailureReason::WorkspaceMismatch => "workspace_mismatch",
        };
        f.write_str(s)
    }
}

/// Summary of one discovery cycle for support output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryDiagnostics {
    /// `None` on success
    pub reason: Option<FailureReason>,
    pub candidate_count: usize,
    /// First 8 characters of the first candidate's token
    pub token_prefix: Option<String>,
    /// Ports taken from the command line
    pub cmdline_port_count: usize,
    /// Ports taken from the OS port listing
    pub netstat_port_count: usize,
    /// Retries performed by the surrounding retry loop
    pub retry_count: u32,
    /// Protocol of the last response received, if any
    pub protocol: Option<Protocol>,
    pub attempts: Vec<AttemptRecord>,
}

/// First 8 characters of a token, safe to log
pub fn token_prefix(token: &str) -> String {
    token.chars().take(8).collect()
}
